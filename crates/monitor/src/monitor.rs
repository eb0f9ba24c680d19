//! Supervisor of the monitoring tasks of an optimization loop.
use crate::context::{MonitorContext, SharedContext};
use crate::errors::{MonitorError, Result};
use crate::task::Task;

use gpmon_optim::{GlobalStep, StepCallback, VariableSync};
use log::{error, info, warn};
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

/// A monitor shared with the observer of a whole-loop optimizer
pub type SharedMonitor = Arc<Mutex<Monitor>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MonitorState {
    Open,
    Closed,
}

/// Runs registered tasks at each invocation from the optimization loop.
///
/// At each [`Monitor::invoke`] the context iteration is advanced, the working
/// copy of the optimizer (if any) is committed to the canonical store, then
/// the tasks whose condition holds are run in registration order.
/// Closing the monitor runs the exit tasks once more. A monitor is closed
/// at most once: explicitly, at the end of [`Monitor::scope`] or when dropped.
///
/// # Example
///
/// ```
/// use gpmon_monitor::{Condition, IntoTask, Monitor, PrintTimingsTask};
/// use gpmon_optim::{FnModel, GradientDescent, ParamStore};
/// use ndarray::array;
///
/// let model = FnModel::new(
///     ParamStore::new().add("x", array![1.]).unwrap(),
///     |x| x[0] * x[0],
/// );
/// let optimizer = GradientDescent::new(0.1);
/// let printer = PrintTimingsTask::to_writer(std::io::sink())
///     .with_condition(Condition::Periodic(10))
///     .with_exit_condition(true);
/// let mut monitor = Monitor::new(vec![printer]).with_global_step(optimizer.global_step());
/// optimizer.minimize(&model, 25, Some(&mut monitor)).unwrap();
/// monitor.close().unwrap();
/// assert_eq!(monitor.tasks()[0].run_count(), 3);
/// ```
pub struct Monitor {
    tasks: Vec<Task>,
    context: SharedContext,
    optimizer: Option<Box<dyn VariableSync>>,
    print_summary: bool,
    out: Box<dyn Write + Send>,
    state: MonitorState,
}

impl Monitor {
    /// Constructor of a monitor running `tasks` with a fresh context
    pub fn new(tasks: Vec<Task>) -> Self {
        Monitor {
            tasks,
            context: MonitorContext::new().shared(),
            optimizer: None,
            print_summary: false,
            out: Box::new(std::io::stdout()),
            state: MonitorState::Open,
        }
    }

    /// Prints the tasks execution times when closing
    pub fn print_summary(mut self, print_summary: bool) -> Self {
        self.print_summary = print_summary;
        self
    }

    /// Uses a context supplied by the caller, never reset by the monitor
    /// (e.g. restored from a checkpoint)
    pub fn with_context(mut self, context: SharedContext) -> Self {
        self.context = context;
        self
    }

    /// Reads the global step from the optimizer counter. The current context,
    /// supplied or not, is kept.
    pub fn with_global_step(self, global_step: GlobalStep) -> Self {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .attach_global_step(global_step);
        self
    }

    /// Commits the optimizer working copy before running the tasks
    pub fn with_optimizer<V: VariableSync + 'static>(mut self, optimizer: V) -> Self {
        self.optimizer = Some(Box::new(optimizer));
        self
    }

    /// Sets the summary output, standard output by default
    pub fn with_output<W: Write + Send + 'static>(mut self, out: W) -> Self {
        self.out = Box::new(out);
        self
    }

    /// Registers a task, run after the already registered ones
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        if self.is_closed() {
            return Err(MonitorError::MonitorClosed);
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Registered tasks
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Handle on the monitor context
    pub fn context(&self) -> SharedContext {
        self.context.clone()
    }

    /// Whether the monitor was closed
    pub fn is_closed(&self) -> bool {
        self.state == MonitorState::Closed
    }

    /// Wraps the monitor to be handed to a whole-loop optimizer observer
    pub fn into_shared(self) -> SharedMonitor {
        Arc::new(Mutex::new(self))
    }

    fn sync(&self) -> Result<()> {
        if let Some(optimizer) = &self.optimizer {
            optimizer.sync_variables()?;
        }
        Ok(())
    }

    /// Runs one monitoring cycle. The first task error aborts the cycle.
    pub fn invoke(&mut self) -> Result<()> {
        if self.is_closed() {
            return Err(MonitorError::MonitorClosed);
        }
        let context = {
            let mut context = self.context.lock()?;
            context.advance();
            context.clone()
        };
        let res = self.run_due_tasks(&context);
        self.context.lock()?.mark_return();
        res
    }

    fn run_due_tasks(&mut self, context: &MonitorContext) -> Result<()> {
        self.sync()?;
        for task in self.tasks.iter_mut() {
            if task.is_due(context) {
                task.execute(context)?;
            }
        }
        Ok(())
    }

    /// Closes the monitor: syncs the variables, runs every exit task and
    /// prints the summary if requested.
    ///
    /// All exit tasks are attempted, the first error is returned.
    /// Closing an already closed monitor does nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.state = MonitorState::Closed;

        let mut first_error = self.sync().err();
        let context = {
            let mut context = self.context.lock()?;
            context.refresh_global_step();
            context.clone()
        };
        for task in self.tasks.iter_mut().filter(|t| t.run_on_exit()) {
            if let Err(err) = task.execute(&context) {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    error!("Exit task {} failed: {}", task.name(), err);
                }
            }
        }
        if self.print_summary {
            self.write_summary();
        }
        info!(
            "Monitor closed at iteration {} (step {})",
            context.iteration, context.global_step
        );
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn write_summary(&mut self) {
        let mut summary = String::from("Tasks execution time summary:\n");
        for task in self.tasks.iter() {
            summary.push_str(&format!(
                "{}:\t{:.4} (sec)\t{} runs\n",
                task.name(),
                task.elapsed_time().as_secs_f64(),
                task.run_count()
            ));
        }
        if let Err(err) = self
            .out
            .write_all(summary.as_bytes())
            .and_then(|_| self.out.flush())
        {
            warn!("Monitor summary not printed: {}", err);
        }
    }

    /// Runs `f` with the monitor then closes it, whatever `f` returned.
    ///
    /// An error of `f` wins over an error at closing, which is only logged.
    pub fn scope<T, E, F>(mut self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Monitor) -> std::result::Result<T, E>,
        E: From<MonitorError>,
    {
        let res = f(&mut self);
        let closed = self.close();
        match res {
            Ok(value) => {
                closed?;
                Ok(value)
            }
            Err(err) => {
                if let Err(close_err) = closed {
                    error!("Monitor closed with error: {}", close_err);
                }
                Err(err)
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("Monitor closed with error: {}", err);
        }
    }
}

impl StepCallback for Monitor {
    fn on_step(&mut self) -> anyhow::Result<()> {
        Ok(self.invoke()?)
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("tasks", &self.tasks)
            .field("print_summary", &self.print_summary)
            .field("state", &self.state)
            .finish()
    }
}
