//! Schedulable units of monitoring work.
use crate::condition::Condition;
use crate::context::MonitorContext;
use crate::errors::Result;
use log::debug;
use web_time::{Duration, Instant};

/// Behaviour of a monitoring task
pub trait MonitorTask: Send {
    /// Display name used when the task is not explicitly named
    fn name(&self) -> String;

    /// Runs the task. Errors are propagated to the monitor.
    fn run(&mut self, context: &MonitorContext) -> Result<()>;
}

/// A monitoring task with its scheduling settings and timing accumulator
pub struct Task {
    name: String,
    condition: Condition,
    run_on_exit: bool,
    elapsed: Duration,
    run_count: u64,
    action: Box<dyn MonitorTask>,
}

impl Task {
    /// Constructor of an always-firing task, not run on exit
    pub fn new<T: MonitorTask + 'static>(action: T) -> Self {
        Task {
            name: action.name(),
            condition: Condition::Always,
            run_on_exit: false,
            elapsed: Duration::ZERO,
            run_count: 0,
            action: Box::new(action),
        }
    }

    /// Sets the display name
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the run condition
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    /// Sets whether the task runs once more when the monitor closes
    pub fn with_exit_condition(mut self, run_on_exit: bool) -> Self {
        self.run_on_exit = run_on_exit;
        self
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run condition
    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    /// Whether the task runs when the monitor closes
    pub fn run_on_exit(&self) -> bool {
        self.run_on_exit
    }

    /// Cumulative time spent running the task
    pub fn elapsed_time(&self) -> Duration {
        self.elapsed
    }

    /// Number of runs so far
    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    /// Whether the condition holds for the given context
    pub fn is_due(&self, context: &MonitorContext) -> bool {
        self.condition
            .evaluate(context.iteration, context.global_step)
    }

    /// Runs the task, measuring and accumulating its duration even on failure.
    /// Returns the duration of this run.
    pub fn execute(&mut self, context: &MonitorContext) -> Result<Duration> {
        let start = Instant::now();
        let res = self.action.run(context);
        let duration = start.elapsed();
        self.elapsed += duration;
        self.run_count += 1;
        debug!(
            "Task {} at iteration {}: {:?}",
            self.name, context.iteration, duration
        );
        res.map(|_| duration)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("condition", &self.condition)
            .field("run_on_exit", &self.run_on_exit)
            .field("elapsed", &self.elapsed)
            .field("run_count", &self.run_count)
            .finish()
    }
}

/// Builder shortcuts turning any [`MonitorTask`] into a configured [`Task`]
pub trait IntoTask: MonitorTask + Sized + 'static {
    /// Wraps the behaviour in a task with default settings
    fn into_task(self) -> Task {
        Task::new(self)
    }

    /// See [`Task::with_name`]
    fn with_name<S: Into<String>>(self, name: S) -> Task {
        self.into_task().with_name(name)
    }

    /// See [`Task::with_condition`]
    fn with_condition(self, condition: Condition) -> Task {
        self.into_task().with_condition(condition)
    }

    /// See [`Task::with_exit_condition`]
    fn with_exit_condition(self, run_on_exit: bool) -> Task {
        self.into_task().with_exit_condition(run_on_exit)
    }
}

impl<T: MonitorTask + 'static> IntoTask for T {}

type TaskFn = dyn FnMut(&MonitorContext) -> Result<()> + Send;

/// A task defined by a closure
pub struct FnTask {
    name: String,
    f: Box<TaskFn>,
}

impl FnTask {
    /// Constructor from a name and a closure
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: FnMut(&MonitorContext) -> Result<()> + Send + 'static,
    {
        FnTask {
            name: name.to_string(),
            f: Box::new(f),
        }
    }
}

impl MonitorTask for FnTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn run(&mut self, context: &MonitorContext) -> Result<()> {
        (self.f)(context)
    }
}
