//! Step-wise optimizer: every step mutates the canonical parameter store
//! and advances a [`GlobalStep`] counter before calling back.
use crate::errors::{OptimError, Result};
use crate::hooks::{GlobalStep, OptimizerState, StepCallback};
use crate::model::Model;

use finitediff::FiniteDiff;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Internal state of the [`GradientDescent`] optimizer
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DescentState {
    /// Momentum accumulator, one component per trainable value
    pub velocity: Vec<f64>,
}

/// Shared handle on a [`DescentState`], persisted by checkpoints
#[derive(Clone, Debug, Default)]
pub struct DescentStateHandle(Arc<Mutex<DescentState>>);

impl DescentStateHandle {
    /// Copy of the current state
    pub fn get(&self) -> Result<DescentState> {
        Ok(self.0.lock()?.clone())
    }
}

impl OptimizerState for DescentStateHandle {
    fn save_state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&*self.0.lock()?)?)
    }

    fn load_state(&self, state: serde_json::Value) -> Result<()> {
        *self.0.lock()? = serde_json::from_value(state)?;
        Ok(())
    }
}

/// Gradient descent with momentum using central finite differences
#[derive(Clone, Debug)]
pub struct GradientDescent {
    learning_rate: f64,
    momentum: f64,
    global_step: GlobalStep,
    state: DescentStateHandle,
}

impl GradientDescent {
    /// Constructor with the given learning rate and no momentum
    pub fn new(learning_rate: f64) -> Self {
        GradientDescent {
            learning_rate,
            momentum: 0.,
            global_step: GlobalStep::default(),
            state: DescentStateHandle::default(),
        }
    }

    /// Sets the momentum coefficient in [0, 1)
    pub fn momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    /// Uses the given counter as global step (e.g. restored from a checkpoint)
    pub fn with_global_step(mut self, global_step: GlobalStep) -> Self {
        self.global_step = global_step;
        self
    }

    /// Handle on the step counter advanced by the optimizer
    pub fn global_step(&self) -> GlobalStep {
        self.global_step.clone()
    }

    /// Handle on the internal state
    pub fn state(&self) -> DescentStateHandle {
        self.state.clone()
    }

    fn check(&self) -> Result<()> {
        if self.learning_rate <= 0. || !self.learning_rate.is_finite() {
            return Err(OptimError::InvalidConfigError(format!(
                "learning rate should be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0. ..1.).contains(&self.momentum) {
            return Err(OptimError::InvalidConfigError(format!(
                "momentum should be in [0, 1), got {}",
                self.momentum
            )));
        }
        Ok(())
    }

    /// Runs `max_iters` steps, calling `callback` after each of them.
    /// Returns the objective value at the final parameters.
    pub fn minimize(
        &self,
        model: &dyn Model,
        max_iters: u64,
        mut callback: Option<&mut dyn StepCallback>,
    ) -> Result<f64> {
        self.check()?;
        info!(
            "Gradient descent: {} iterations from step {}",
            max_iters,
            self.global_step.get()
        );
        for _ in 0..max_iters {
            self.step(model)?;
            if let Some(cb) = callback.as_deref_mut() {
                cb.on_step()?;
            }
        }
        let cost = model.objective()?;
        info!(
            "Gradient descent done at step {}: objective = {}",
            self.global_step.get(),
            cost
        );
        Ok(cost)
    }

    /// Performs one descent step on the model store
    pub fn step(&self, model: &dyn Model) -> Result<()> {
        let x = model.store().read()?.trainable_values().to_vec();
        let f = |v: &Vec<f64>| model.objective_at(v);
        let grad = x.central_diff(&f);
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(OptimError::InvalidValue(format!(
                "non finite gradient at step {}",
                self.global_step.get()
            )));
        }

        let mut next = x.clone();
        {
            let mut state = self.state.0.lock()?;
            if state.velocity.len() != x.len() {
                state.velocity = vec![0.; x.len()];
            }
            for (i, xi) in next.iter_mut().enumerate() {
                state.velocity[i] =
                    self.momentum * state.velocity[i] - self.learning_rate * grad[i];
                *xi += state.velocity[i];
            }
        }
        model.store().write()?.assign_trainable(&next)?;
        let step = self.global_step.increment();
        debug!("step {}: x = {:?}", step, next);
        Ok(())
    }
}
