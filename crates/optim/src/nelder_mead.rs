//! Whole-loop optimizer: the `argmin` executor runs its own iteration loop on
//! a working copy of the variables. The canonical store is only written when
//! a supervisor asks for a sync and, at the end, with the best values found.
//!
//! The global step counts the completed solver iterations.
use crate::errors::{OptimError, Result};
use crate::hooks::{GlobalStep, ShadowCopy, StepCallback};
use crate::model::Model;
use crate::params::SharedStore;

use argmin::core::observers::{Observe, ObserverMode};
use argmin::core::{CostFunction, Error, Executor, State, KV};
use argmin::solver::neldermead::NelderMead;
use log::info;
use std::sync::{Arc, Mutex};

/// A callback shared with the `argmin` observer mechanism
pub type SharedCallback = Arc<Mutex<dyn StepCallback>>;

struct ModelCost {
    model: Arc<dyn Model>,
}

impl CostFunction for ModelCost {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> std::result::Result<Self::Output, Error> {
        Ok(self.model.objective_at(p))
    }
}

// Advances the global step after each solver iteration. Every
// `callback_every` completed iterations, stages the current best values of
// the solver in the working copy then hands over to the callback.
struct CallbackObserver {
    shadow: ShadowCopy,
    global_step: GlobalStep,
    init_step: u64,
    callback_every: u64,
    callback: Option<SharedCallback>,
}

impl<I> Observe<I> for CallbackObserver
where
    I: State<Param = Vec<f64>>,
{
    fn observe_iter(&mut self, state: &I, _kv: &KV) -> std::result::Result<(), Error> {
        // argmin observes before incrementing its iteration counter
        let done = state.get_iter() + 1;
        self.global_step.set(self.init_step + done);
        let callback = match &self.callback {
            Some(callback) if done % self.callback_every == 0 => callback,
            _ => return Ok(()),
        };
        if let Some(param) = state.get_best_param().or(state.get_param()) {
            self.shadow.stage(param)?;
        }
        callback
            .lock()
            .map_err(|e| anyhow::anyhow!("callback lock poisoned: {e}"))?
            .on_step()
    }
}

/// Nelder-Mead simplex optimizer run by `argmin`
#[derive(Clone)]
pub struct NelderMeadOptimizer {
    shadow: ShadowCopy,
    global_step: GlobalStep,
    max_iters: u64,
    initial_step: f64,
    sd_tolerance: f64,
    callback_every: u64,
}

impl NelderMeadOptimizer {
    /// Constructor of an optimizer working on a copy of the `store` values
    pub fn for_store(store: &SharedStore) -> Self {
        NelderMeadOptimizer {
            shadow: ShadowCopy::new(store.clone()),
            global_step: GlobalStep::default(),
            max_iters: 100,
            initial_step: 0.1,
            sd_tolerance: 1e-8,
            callback_every: 1,
        }
    }

    /// Uses the given counter as global step (e.g. restored from a checkpoint)
    pub fn with_global_step(mut self, global_step: GlobalStep) -> Self {
        self.global_step = global_step;
        self
    }

    /// Handle on the counter of completed solver iterations
    pub fn global_step(&self) -> GlobalStep {
        self.global_step.clone()
    }

    /// Sets the iteration budget of a call to [`NelderMeadOptimizer::minimize`]
    pub fn max_iters(mut self, max_iters: u64) -> Self {
        self.max_iters = max_iters;
        self
    }

    /// Sets the offset used to build the initial simplex around the current values
    pub fn initial_step(mut self, initial_step: f64) -> Self {
        self.initial_step = initial_step;
        self
    }

    /// Sets the simplex cost standard deviation stopping the optimization
    pub fn sd_tolerance(mut self, sd_tolerance: f64) -> Self {
        self.sd_tolerance = sd_tolerance;
        self
    }

    /// Sets the number of completed solver iterations between two callback calls
    pub fn callback_every(mut self, callback_every: u64) -> Self {
        self.callback_every = callback_every;
        self
    }

    /// Working copy of the variables, to be synced before reading the store
    /// while the optimization is running
    pub fn shadow(&self) -> ShadowCopy {
        self.shadow.clone()
    }

    /// Runs the whole optimization loop then commits the best values found
    /// in the canonical store. Returns the best objective value.
    pub fn minimize(&self, model: Arc<dyn Model>, callback: Option<SharedCallback>) -> Result<f64> {
        if !Arc::ptr_eq(model.store(), self.shadow.store()) {
            return Err(OptimError::InvalidConfigError(
                "optimizer was not created for this model store".to_string(),
            ));
        }
        if self.callback_every == 0 {
            return Err(OptimError::InvalidConfigError(
                "callback_every should be greater than 0".to_string(),
            ));
        }
        let x0 = model.store().read()?.trainable_values().to_vec();
        if x0.is_empty() {
            return Err(OptimError::InvalidConfigError(
                "no trainable parameter to optimize".to_string(),
            ));
        }

        let mut simplex = vec![x0.clone()];
        for i in 0..x0.len() {
            let mut vertex = x0.clone();
            vertex[i] += self.initial_step;
            simplex.push(vertex);
        }
        let solver = NelderMead::new(simplex)
            .with_sd_tolerance(self.sd_tolerance)
            .map_err(|e| OptimError::InvalidConfigError(e.to_string()))?;

        info!(
            "Nelder-Mead: {} trainable values, {} max iterations",
            x0.len(),
            self.max_iters
        );
        let max_iters = self.max_iters;
        let init_step = self.global_step.get();
        let observer = CallbackObserver {
            shadow: self.shadow.clone(),
            global_step: self.global_step.clone(),
            init_step,
            callback_every: self.callback_every,
            callback,
        };
        let result = Executor::new(
            ModelCost {
                model: model.clone(),
            },
            solver,
        )
        .configure(|state| state.max_iters(max_iters))
        .add_observer(observer, ObserverMode::Always)
        .run()?;
        self.global_step.set(init_step + result.state().get_iter());

        let best = result.state().get_best_param().cloned().ok_or_else(|| {
            OptimError::InvalidValue("Nelder-Mead ended without best parameters".to_string())
        })?;
        // deferred commit, anything staged is superseded
        self.shadow.discard()?;
        model.store().write()?.assign_trainable(&best)?;
        let cost = result.state().get_best_cost();
        info!(
            "Nelder-Mead done after {} iterations: objective = {}",
            result.state().get_iter(),
            cost
        );
        Ok(cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FnModel, ParamStore};
    use approx::assert_abs_diff_eq;
    use argmin_testfunctions::rosenbrock;
    use ndarray::array;

    fn rosenbrock_model() -> Arc<dyn Model> {
        let store = ParamStore::new().add("x", array![-1.2, 1.]).unwrap();
        Arc::new(FnModel::new(store, |x| rosenbrock(x)))
    }

    #[test]
    fn test_nelder_mead_commits_at_the_end() {
        let model = rosenbrock_model();
        let optimizer = NelderMeadOptimizer::for_store(model.store()).max_iters(500);
        let cost = optimizer.minimize(model.clone(), None).unwrap();
        assert_abs_diff_eq!(cost, 0., epsilon = 1e-3);
        let x = model.store().read().unwrap().get("x").unwrap().clone();
        assert_abs_diff_eq!(x, array![1., 1.], epsilon = 5e-2);
    }

    #[test]
    fn test_store_untouched_until_sync() {
        let model = rosenbrock_model();
        let optimizer = NelderMeadOptimizer::for_store(model.store())
            .max_iters(20)
            .callback_every(5);
        let store = model.store().clone();
        let shadow = optimizer.shadow();
        let calls = Arc::new(Mutex::new(vec![]));
        let calls_cb = calls.clone();
        let callback: SharedCallback = Arc::new(Mutex::new(move || -> anyhow::Result<()> {
            let before = store.read().unwrap().get("x").unwrap().clone();
            let staged = shadow.pending().unwrap().is_some();
            calls_cb.lock().unwrap().push((before, staged));
            Ok(())
        }));
        optimizer.minimize(model.clone(), Some(callback)).unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        for (before, staged) in calls.iter() {
            // nobody synced: the store still holds the initial values
            assert_abs_diff_eq!(*before, array![-1.2, 1.]);
            assert!(staged);
        }
    }

    #[test]
    fn test_global_step_counts_solver_iterations() {
        let model = rosenbrock_model();
        let optimizer = NelderMeadOptimizer::for_store(model.store())
            .max_iters(25)
            .callback_every(10);
        let step = optimizer.global_step();
        let seen = Arc::new(Mutex::new(vec![]));
        let seen_cb = seen.clone();
        let step_cb = step.clone();
        let callback: SharedCallback = Arc::new(Mutex::new(move || -> anyhow::Result<()> {
            seen_cb.lock().unwrap().push(step_cb.get());
            Ok(())
        }));
        optimizer.minimize(model.clone(), Some(callback)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![10, 20]);
        assert_eq!(step.get(), 25);

        // a second call continues the count with its own budget
        let optimizer = optimizer.max_iters(10);
        optimizer.minimize(model, None).unwrap();
        assert_eq!(step.get(), 35);
    }

    #[test]
    fn test_foreign_store_rejected() {
        let model = rosenbrock_model();
        let other = ParamStore::new().add_scalar("x", 0.).unwrap().shared();
        let optimizer = NelderMeadOptimizer::for_store(&other);
        assert!(matches!(
            optimizer.minimize(model, None),
            Err(OptimError::InvalidConfigError(_))
        ));
    }
}
