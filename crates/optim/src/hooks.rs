//! Narrow interfaces between an optimization loop and whoever supervises it.
use crate::errors::Result;
use crate::params::SharedStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Shared handle on an optimizer step counter.
///
/// Clones observe the same counter, readers always get the current value.
#[derive(Clone, Debug, Default)]
pub struct GlobalStep(Arc<AtomicU64>);

impl GlobalStep {
    /// Constructor of a counter starting at `value`
    pub fn new(value: u64) -> Self {
        GlobalStep(Arc::new(AtomicU64::new(value)))
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Sets the counter, used when restoring a checkpoint
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::SeqCst)
    }

    /// Increments the counter and returns the new value
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Callback invoked by an optimizer once per (observed) iteration.
///
/// An error aborts the optimization loop.
pub trait StepCallback: Send {
    /// Called after an optimizer iteration
    fn on_step(&mut self) -> anyhow::Result<()>;
}

impl<F> StepCallback for F
where
    F: FnMut() -> anyhow::Result<()> + Send,
{
    fn on_step(&mut self) -> anyhow::Result<()> {
        self()
    }
}

/// Optimizers keeping a working copy of the variables apart from the
/// canonical store implement this to commit it on demand.
pub trait VariableSync: Send {
    /// Writes the working copy back into the canonical store
    fn sync_variables(&self) -> Result<()>;
}

/// Working copy of the trainable values of a store.
///
/// The optimizer stages its current values, [`VariableSync::sync_variables`]
/// commits the last staged values into the canonical store.
#[derive(Clone)]
pub struct ShadowCopy {
    store: SharedStore,
    staged: Arc<Mutex<Option<Vec<f64>>>>,
}

impl ShadowCopy {
    /// Constructor of a working copy attached to `store`
    pub fn new(store: SharedStore) -> Self {
        ShadowCopy {
            store,
            staged: Arc::new(Mutex::new(None)),
        }
    }

    /// Records the optimizer current values without touching the store
    pub fn stage(&self, values: &[f64]) -> Result<()> {
        *self.staged.lock()? = Some(values.to_vec());
        Ok(())
    }

    /// Values staged and not committed yet
    pub fn pending(&self) -> Result<Option<Vec<f64>>> {
        Ok(self.staged.lock()?.clone())
    }

    /// Drops staged values without committing them
    pub fn discard(&self) -> Result<()> {
        self.staged.lock()?.take();
        Ok(())
    }

    /// Canonical store the copy is committed to
    pub fn store(&self) -> &SharedStore {
        &self.store
    }
}

impl VariableSync for ShadowCopy {
    fn sync_variables(&self) -> Result<()> {
        if let Some(values) = self.staged.lock()?.take() {
            self.store.write()?.assign_trainable(&values)?;
        }
        Ok(())
    }
}

/// Optimizer internals persisted by checkpoints
pub trait OptimizerState: Send + Sync {
    /// Serializes the optimizer internal state
    fn save_state(&self) -> Result<serde_json::Value>;
    /// Restores the optimizer internal state
    fn load_state(&self, state: serde_json::Value) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParamStore;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    #[test]
    fn test_global_step_is_shared() {
        let step = GlobalStep::default();
        let other = step.clone();
        step.increment();
        assert_eq!(other.increment(), 2);
        other.set(10);
        assert_eq!(step.get(), 10);
    }

    fn values(store: &SharedStore, name: &str) -> Array1<f64> {
        store.read().unwrap().get(name).unwrap().clone()
    }

    #[test]
    fn test_shadow_copy_commits_on_sync_only() {
        let store = ParamStore::new().add("w", array![0., 0.]).unwrap().shared();
        let shadow = ShadowCopy::new(store.clone());

        shadow.stage(&[1., 2.]).unwrap();
        assert_abs_diff_eq!(values(&store, "w"), array![0., 0.]);

        shadow.sync_variables().unwrap();
        assert_abs_diff_eq!(values(&store, "w"), array![1., 2.]);
        assert!(shadow.pending().unwrap().is_none());

        // nothing staged: store left untouched
        store.write().unwrap().set("w", array![5., 5.]).unwrap();
        shadow.sync_variables().unwrap();
        assert_abs_diff_eq!(values(&store, "w"), array![5., 5.]);
    }

    #[test]
    fn test_closure_callback() {
        let mut count = 0;
        {
            let mut cb = || -> anyhow::Result<()> {
                count += 1;
                Ok(())
            };
            cb.on_step().unwrap();
            cb.on_step().unwrap();
        }
        assert_eq!(count, 2);
    }
}
