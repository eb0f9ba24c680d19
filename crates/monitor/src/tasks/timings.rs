use crate::context::MonitorContext;
use crate::errors::Result;
use crate::task::MonitorTask;
use log::warn;
use std::io::Write;
use web_time::Duration;

/// Prints iteration and optimizer step counts with their total and recent rates.
///
/// Rates are computed over the optimisation time (monitoring excluded).
/// Output failures are logged, never raised.
pub struct PrintTimingsTask {
    out: Box<dyn Write + Send>,
    last: Option<(u64, u64, Duration)>,
}

impl Default for PrintTimingsTask {
    fn default() -> Self {
        Self::new()
    }
}

impl PrintTimingsTask {
    /// Constructor of a printer on the standard output
    pub fn new() -> Self {
        Self::to_writer(std::io::stdout())
    }

    /// Constructor of a printer on the given writer
    pub fn to_writer<W: Write + Send + 'static>(out: W) -> Self {
        PrintTimingsTask {
            out: Box::new(out),
            last: None,
        }
    }

    /// Formats the timing line for the given context
    pub fn line(&self, context: &MonitorContext) -> String {
        let opt_time = context.optimisation_time;
        let (last_iter, last_step, last_time) = self.last.unwrap_or((
            context.init_iteration,
            context.init_global_step,
            Duration::ZERO,
        ));
        let recent_time = opt_time.saturating_sub(last_time);
        let mut line = format!(
            "Iteration {}\ttotal itr.rate {:.2}/s\trecent itr.rate {:.2}/s",
            context.iteration,
            rate(context.iterations_done(), opt_time),
            rate(context.iteration.saturating_sub(last_iter), recent_time),
        );
        if context.has_global_step() {
            line.push_str(&format!(
                "\topt.step {}\ttotal opt.rate {:.2}/s\trecent opt.rate {:.2}/s",
                context.global_step,
                rate(context.steps_done(), opt_time),
                rate(context.global_step.saturating_sub(last_step), recent_time),
            ));
        }
        line
    }
}

fn rate(count: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0. {
        count as f64 / secs
    } else {
        0.
    }
}

impl MonitorTask for PrintTimingsTask {
    fn name(&self) -> String {
        "PrintTimingsTask".to_string()
    }

    fn run(&mut self, context: &MonitorContext) -> Result<()> {
        let line = self.line(context);
        if let Err(err) = writeln!(self.out, "{line}").and_then(|_| self.out.flush()) {
            warn!("Timings not printed: {}", err);
        }
        self.last = Some((
            context.iteration,
            context.global_step,
            context.optimisation_time,
        ));
        Ok(())
    }
}
