use crate::errors::Result;
use crate::params::{ParamStore, SharedStore};
use std::sync::Arc;

/// A model exposing its canonical parameter store and its training objective.
///
/// The objective is a function of the trainable parameters values (see
/// [`ParamStore::trainable_values`]) intended to be minimized.
pub trait Model: Send + Sync {
    /// Canonical parameter store of the model
    fn store(&self) -> &SharedStore;

    /// Training objective at the given trainable values
    fn objective_at(&self, x: &[f64]) -> f64;

    /// Full training objective at the current store values.
    /// Possibly expensive, safe to call between optimizer steps.
    fn objective(&self) -> Result<f64> {
        let x = self.store().read()?.trainable_values();
        Ok(self.objective_at(&x.to_vec()))
    }
}

type ObjectiveFn = dyn Fn(&[f64]) -> f64 + Send + Sync;

/// A model whose objective is given as a closure over the trainable values
#[derive(Clone)]
pub struct FnModel {
    store: SharedStore,
    objective: Arc<ObjectiveFn>,
}

impl FnModel {
    /// Constructor from an initial parameter store and an objective function
    pub fn new<F>(store: ParamStore, objective: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        FnModel {
            store: store.shared(),
            objective: Arc::new(objective),
        }
    }
}

impl Model for FnModel {
    fn store(&self) -> &SharedStore {
        &self.store
    }

    fn objective_at(&self, x: &[f64]) -> f64 {
        (self.objective)(x)
    }
}
