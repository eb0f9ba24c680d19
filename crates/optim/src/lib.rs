//! This library provides the collaborators supervised by `gpmon` monitors
//! during the training of a model:
//!
//! * a canonical [`ParamStore`] of named parameters shared as a [`SharedStore`],
//! * a [`Model`] trait exposing the store and the training objective,
//! * the hooks an optimization loop offers to a supervisor:
//!   a [`GlobalStep`] counter, a [`StepCallback`], a [`VariableSync`]
//!   for optimizers working on a [`ShadowCopy`] and an [`OptimizerState`]
//!   persisted by checkpoints,
//! * two optimizers with different execution models:
//!   [`GradientDescent`], step-wise, mutating the store at every step, and
//!   [`NelderMeadOptimizer`], whole-loop, run by `argmin` on a working copy
//!   committed at the end.
//!
//! # Example
//!
//! ```
//! use gpmon_optim::{FnModel, GradientDescent, Model, ParamStore};
//! use ndarray::array;
//!
//! let store = ParamStore::new().add("x", array![2., -3.]).unwrap();
//! let model = FnModel::new(store, |x| x.iter().map(|v| v * v).sum());
//!
//! let optimizer = GradientDescent::new(0.1).momentum(0.5);
//! let mut steps = 0;
//! let mut callback = || -> anyhow::Result<()> {
//!     steps += 1;
//!     Ok(())
//! };
//! let cost = optimizer
//!     .minimize(&model, 50, Some(&mut callback))
//!     .expect("quadratic minimized");
//! assert!(cost < 1e-3);
//! assert_eq!(optimizer.global_step().get(), 50);
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

mod errors;
mod gradient_descent;
mod hooks;
mod model;
mod nelder_mead;
mod params;

pub use errors::*;
pub use gradient_descent::*;
pub use hooks::*;
pub use model::*;
pub use nelder_mead::*;
pub use params::*;
