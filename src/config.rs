//! Configuration of a monitored run.
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the effective configuration file written in the output directory
pub const CONFIG_FILE: &str = "gpmon_config.json";

/// Optimizer used to train the model
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizerKind {
    /// Step-wise gradient descent with momentum
    #[default]
    Gd,
    /// Whole-loop Nelder-Mead simplex
    NelderMead,
}

/// An enumeration to define the type of a resumed run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HotStartMode {
    /// Checkpoints are saved but never used to resume
    #[default]
    Disabled,
    /// The run resumes from the latest checkpoint if it already exists
    Enabled,
    /// The run resumes from the latest checkpoint if it already exists
    /// with an iteration budget extended by the given number
    ExtendedIters(u64),
}

impl From<Option<u64>> for HotStartMode {
    fn from(value: Option<u64>) -> Self {
        match value {
            None => HotStartMode::Disabled,
            Some(0) => HotStartMode::Enabled,
            Some(ext_iters) => HotStartMode::ExtendedIters(ext_iters),
        }
    }
}

impl HotStartMode {
    /// Whether the run resumes from an existing checkpoint
    pub fn is_enabled(&self) -> bool {
        !matches!(self, HotStartMode::Disabled)
    }

    /// Iteration budget once extended
    pub fn budget(&self, max_iters: u64) -> u64 {
        match self {
            HotStartMode::ExtendedIters(ext_iters) => max_iters + ext_iters,
            _ => max_iters,
        }
    }
}

/// Monitored run configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Optimizer used to train the model
    pub optimizer: OptimizerKind,
    /// Iteration budget: optimizer steps for gradient descent,
    /// solver iterations for Nelder-Mead
    pub max_iters: u64,
    /// Gradient descent learning rate
    pub learning_rate: f64,
    /// Gradient descent momentum
    pub momentum: f64,
    /// Nelder-Mead iterations between two monitor invocations
    pub callback_every: u64,
    /// Starting point of the optimization
    pub x0: Vec<f64>,
    /// Output directory of logs, checkpoints and trace
    pub outdir: PathBuf,
    /// Resume mode
    pub hot_start: HotStartMode,
    /// Monitor iterations between two timing prints
    pub print_every: u64,
    /// Monitor iterations between two metric records
    pub record_every: u64,
    /// Global steps between two checkpoints
    pub checkpoint_every: u64,
    /// Number of checkpoint generations kept
    pub max_to_keep: usize,
    /// Prints the tasks timing summary at the end
    pub print_summary: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            optimizer: OptimizerKind::Gd,
            max_iters: 1000,
            learning_rate: 1e-3,
            momentum: 0.9,
            callback_every: 10,
            x0: vec![-1.2, 1.],
            outdir: PathBuf::from("./gpmon_out"),
            hot_start: HotStartMode::Disabled,
            print_every: 100,
            record_every: 10,
            checkpoint_every: 100,
            max_to_keep: 5,
            print_summary: true,
        }
    }
}

impl RunConfig {
    /// Reads a configuration from a JSON file, missing fields take default values
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("cannot read configuration {:?}", path.as_ref()))?;
        let config: RunConfig = serde_json::from_str(&content)
            .with_context(|| format!("invalid configuration {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Writes the configuration as [`CONFIG_FILE`] in the output directory
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.outdir)?;
        let path = self.outdir.join(CONFIG_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    /// Sets the optimizer
    pub fn optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Sets the iteration budget
    pub fn max_iters(mut self, max_iters: u64) -> Self {
        self.max_iters = max_iters;
        self
    }

    /// Sets the output directory
    pub fn outdir<P: AsRef<Path>>(mut self, outdir: P) -> Self {
        self.outdir = outdir.as_ref().to_path_buf();
        self
    }

    /// Sets the resume mode
    pub fn hot_start(mut self, hot_start: HotStartMode) -> Self {
        self.hot_start = hot_start;
        self
    }

    /// Sets the checkpoint period in global steps
    pub fn checkpoint_every(mut self, checkpoint_every: u64) -> Self {
        self.checkpoint_every = checkpoint_every;
        self
    }

    /// Checks periods and starting point
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.x0.is_empty() {
            anyhow::bail!("starting point x0 should not be empty");
        }
        for (name, period) in [
            ("callback_every", self.callback_every),
            ("print_every", self.print_every),
            ("record_every", self.record_every),
            ("checkpoint_every", self.checkpoint_every),
        ] {
            if period == 0 {
                anyhow::bail!("{name} should be greater than 0");
            }
        }
        Ok(())
    }
}
