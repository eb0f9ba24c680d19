use clap::{Args, Parser, Subcommand};
use env_logger::{Builder, Env, Target};
use gpmon::monitor::GPMON_LOG;
use gpmon::{run, HotStartMode, OptimizerKind, RunConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Trains the test model under monitoring
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// JSON configuration file, overridden by the other options
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Optimizer
    #[arg(long, value_enum)]
    optimizer: Option<OptimizerKind>,
    /// Iteration budget
    #[arg(long)]
    max_iters: Option<u64>,
    /// Output directory
    #[arg(short, long)]
    outdir: Option<PathBuf>,
    /// Resumes from the latest checkpoint if any
    #[arg(long)]
    hot_start: bool,
    /// Extends the iteration budget of a resumed run
    #[arg(long)]
    ext_iters: Option<u64>,
}

impl RunArgs {
    fn config(&self) -> anyhow::Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };
        if let Some(optimizer) = self.optimizer {
            config = config.optimizer(optimizer);
        }
        if let Some(max_iters) = self.max_iters {
            config = config.max_iters(max_iters);
        }
        if let Some(outdir) = &self.outdir {
            config = config.outdir(outdir);
        }
        if self.hot_start || self.ext_iters.is_some() {
            config = config.hot_start(HotStartMode::from(Some(self.ext_iters.unwrap_or(0))));
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let env = Env::new().filter_or(GPMON_LOG, "info");
    let mut builder = Builder::from_env(env);
    let builder = builder.target(Target::Stdout);
    builder.try_init().ok();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => {
            let summary = run(&args.config()?)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}
