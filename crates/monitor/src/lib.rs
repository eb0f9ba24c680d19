//! This library implements a scheduler of monitoring tasks run at
//! independently configured cadences during a long-running optimization.
//!
//! A [`Monitor`] is invoked once per optimizer iteration, directly by a
//! step-wise optimizer or through the observer of a whole-loop optimizer
//! (see [`gpmon_optim`]). At each invocation it advances a [`MonitorContext`],
//! commits the optimizer working copy when there is one, then runs the
//! registered [`Task`]s whose [`Condition`] holds, in registration order.
//!
//! Built-in tasks:
//! * [`PrintTimingsTask`]: iteration and optimizer step rates,
//! * [`SleepTask`]: artificial delay,
//! * [`CheckpointTask`]: generations of parameters, optimizer state and counters,
//! * [`ModelRecorder`], [`ObjectiveRecorder`], [`ScalarsRecorder`] and
//!   [`VectorRecorder`]: scalar records written to a [`MetricSink`],
//! * [`TraceTask`]: history of the trainable values as a `.npy` file.
//!
//! Any [`MonitorTask`] implementation, or closure through [`FnTask`], can be
//! scheduled as well.
//!
//! # Example
//!
//! ```no_run
//! use gpmon_monitor::{
//!     CheckpointTask, Condition, IntoTask, MetricSink, ModelRecorder, Monitor,
//!     PrintTimingsTask,
//! };
//! use gpmon_optim::{FnModel, GradientDescent, Model, ParamStore};
//! use ndarray::array;
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = ParamStore::new()
//!     .add_scalar("variance", 2.)?
//!     .add("lengthscales", array![1., 0.5])?;
//! let model = FnModel::new(store, |x| x.iter().map(|v| (v - 1.) * (v - 1.)).sum());
//! let optimizer = GradientDescent::new(0.05);
//!
//! let sink = MetricSink::open("logs")?.shared();
//! let tasks = vec![
//!     PrintTimingsTask::new().with_condition(Condition::Periodic(100)),
//!     ModelRecorder::new(sink.clone(), model.store())?.with_condition(Condition::Periodic(10)),
//!     CheckpointTask::new("checkpoints", model.store())?
//!         .with_condition(Condition::PeriodicStep(500))
//!         .with_exit_condition(true),
//! ];
//!
//! Monitor::new(tasks)
//!     .with_global_step(optimizer.global_step())
//!     .print_summary(true)
//!     .scope(|monitor| {
//!         optimizer
//!             .minimize(&model, 2000, Some(monitor))
//!             .map_err(anyhow::Error::from)
//!     })?;
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

mod condition;
mod context;
mod errors;
mod monitor;
mod sink;
mod task;
mod tasks;

pub use condition::*;
pub use context::*;
pub use errors::*;
pub use monitor::*;
pub use sink::*;
pub use task::*;
pub use tasks::*;

/// Environment variable setting the log level of the `gpmon` programs
pub const GPMON_LOG: &str = "GPMON_LOG";
