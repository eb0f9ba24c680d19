//! Mutable run state advanced by the monitor at each invocation.
use gpmon_optim::GlobalStep;
use std::sync::{Arc, Mutex};
use web_time::{Duration, Instant};

/// A context shared between a monitor and its creator
pub type SharedContext = Arc<Mutex<MonitorContext>>;

/// Counters and timings of a monitored optimization.
///
/// Mutated by the monitor only, tasks receive a read-only view.
#[derive(Clone, Debug)]
pub struct MonitorContext {
    /// Number of monitor invocations (1 at the first one)
    pub iteration: u64,
    /// Iteration value when the context was created
    pub init_iteration: u64,
    /// Optimizer step counter, equal to `iteration` when the optimizer has none
    pub global_step: u64,
    /// Global step value when the context was created
    pub init_global_step: u64,
    /// Context creation time
    pub start_time: Instant,
    /// Time of the last invocation
    pub last_iteration_time: Instant,
    /// Time spent in the optimizer, monitoring tasks excluded
    pub optimisation_time: Duration,
    /// Time elapsed from the context creation to the last invocation
    pub total_time: Duration,
    step_source: Option<GlobalStep>,
    last_return: Instant,
}

impl Default for MonitorContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorContext {
    /// Constructor of a context for an optimizer without step counter
    pub fn new() -> Self {
        let now = Instant::now();
        MonitorContext {
            iteration: 0,
            init_iteration: 0,
            global_step: 0,
            init_global_step: 0,
            start_time: now,
            last_iteration_time: now,
            optimisation_time: Duration::ZERO,
            total_time: Duration::ZERO,
            step_source: None,
            last_return: now,
        }
    }

    /// Constructor of a context reading the global step from the given counter
    pub fn with_global_step(global_step: GlobalStep) -> Self {
        Self::resume(0, Some(global_step))
    }

    /// Constructor of a context continuing a previous run from `iteration`
    pub fn resume(iteration: u64, global_step: Option<GlobalStep>) -> Self {
        let step = global_step.as_ref().map_or(iteration, |s| s.get());
        MonitorContext {
            iteration,
            init_iteration: iteration,
            global_step: step,
            init_global_step: step,
            step_source: global_step,
            ..Self::new()
        }
    }

    /// Whether the global step is read from an optimizer counter
    pub fn has_global_step(&self) -> bool {
        self.step_source.is_some()
    }

    /// Iterations done since the context creation
    pub fn iterations_done(&self) -> u64 {
        self.iteration - self.init_iteration
    }

    /// Optimizer steps done since the context creation
    pub fn steps_done(&self) -> u64 {
        self.global_step.saturating_sub(self.init_global_step)
    }

    /// Wraps the context in a shared handle
    pub fn shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }

    /// Starts a new iteration: time since the last return to the optimizer is
    /// accounted as optimisation time, the global step is re-read.
    pub(crate) fn advance(&mut self) {
        let now = Instant::now();
        self.optimisation_time += now.duration_since(self.last_return);
        self.iteration += 1;
        self.global_step = match &self.step_source {
            Some(step) => step.get(),
            None => self.iteration,
        };
        self.last_iteration_time = now;
        self.total_time = now.duration_since(self.start_time);
    }

    /// Reads the global step from `global_step` from now on.
    ///
    /// Counters are kept; the initial step is reset only before the first
    /// invocation of the context.
    pub(crate) fn attach_global_step(&mut self, global_step: GlobalStep) {
        self.global_step = global_step.get();
        if self.iteration == self.init_iteration {
            self.init_global_step = self.global_step;
        }
        self.step_source = Some(global_step);
    }

    /// Re-reads the global step from the optimizer counter if any
    pub(crate) fn refresh_global_step(&mut self) {
        if let Some(step) = &self.step_source {
            self.global_step = step.get();
        }
    }

    /// Marks the hand over back to the optimizer
    pub(crate) fn mark_return(&mut self) {
        self.last_return = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_step_follows_iteration_without_counter() {
        let mut ctx = MonitorContext::new();
        ctx.advance();
        ctx.advance();
        assert_eq!((ctx.iteration, ctx.global_step), (2, 2));
        assert!(!ctx.has_global_step());
    }

    #[test]
    fn test_global_step_reread_at_each_advance() {
        let step = GlobalStep::new(40);
        let mut ctx = MonitorContext::with_global_step(step.clone());
        assert_eq!(ctx.init_global_step, 40);
        step.set(45);
        ctx.advance();
        assert_eq!((ctx.iteration, ctx.global_step), (1, 45));
        step.increment();
        ctx.advance();
        assert_eq!((ctx.iteration, ctx.global_step), (2, 46));
        assert_eq!(ctx.steps_done(), 6);
    }

    #[test]
    fn test_attach_global_step_keeps_counters() {
        let mut ctx = MonitorContext::resume(30, None);
        let step = GlobalStep::new(300);
        ctx.attach_global_step(step.clone());
        assert_eq!((ctx.iteration, ctx.global_step, ctx.init_global_step), (30, 300, 300));
        step.set(310);
        ctx.refresh_global_step();
        assert_eq!((ctx.iteration, ctx.global_step), (30, 310));
        ctx.advance();
        assert_eq!((ctx.iteration, ctx.steps_done()), (31, 10));
    }

    #[test]
    fn test_resume_keeps_counters() {
        let mut ctx = MonitorContext::resume(30, None);
        ctx.advance();
        assert_eq!((ctx.iteration, ctx.global_step), (31, 31));
        assert_eq!(ctx.iterations_done(), 1);
    }

    #[test]
    fn test_time_accounting() {
        let mut ctx = MonitorContext::new();
        std::thread::sleep(std::time::Duration::from_millis(20));
        ctx.advance();
        // time spent in tasks is not optimisation time
        std::thread::sleep(std::time::Duration::from_millis(20));
        ctx.mark_return();
        ctx.advance();
        assert!(ctx.optimisation_time >= Duration::from_millis(20));
        assert!(ctx.total_time >= Duration::from_millis(40));
        assert!(ctx.optimisation_time < ctx.total_time);
    }
}
