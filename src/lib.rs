//! `gpmon` monitors the training of models by iterative optimizers.
//!
//! Monitoring tasks (timings printing, checkpointing, metric recording,
//! parameter tracing or user defined tasks) run at independently configured
//! cadences while an optimizer drives the training loop. The optimizer may be
//! step-wise, calling back the monitor after each step, or whole-loop, running
//! its own loop and calling back the monitor through its observer.
//!
//! This crate gathers:
//! * [`optim`]: the parameter store, model, hooks and optimizers
//!   (re-export of `gpmon-optim`),
//! * [`monitor`]: the monitor engine and its tasks
//!   (re-export of `gpmon-monitor`),
//! * a [`RunConfig`] and a [`run`] function training a test model
//!   under a fully equipped monitor, used by the `gpmon` binary.
//!
//! # Example
//!
//! ```no_run
//! use gpmon::{run, HotStartMode, OptimizerKind, RunConfig};
//!
//! let config = RunConfig::default()
//!     .optimizer(OptimizerKind::NelderMead)
//!     .max_iters(500)
//!     .outdir("./history")
//!     .hot_start(HotStartMode::Enabled);
//! let summary = run(&config).expect("run done");
//! println!("objective = {} at x = {:?}", summary.objective, summary.x);
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub use gpmon_monitor as monitor;
pub use gpmon_optim as optim;

mod config;
mod run;

pub use config::*;
pub use run::*;
