//! Canonical store of named model parameters.
//!
//! Parameters are kept in registration order. Values are flat vectors, a
//! parameter holding exactly one value is a *scalar* parameter. Optimizers work
//! on the concatenation of the *trainable* parameters values.
use crate::errors::{OptimError, Result};
use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// A store shared between a model, its optimizer and the monitoring tasks
pub type SharedStore = Arc<RwLock<ParamStore>>;

/// A named parameter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name, unique within a store
    pub name: String,
    /// Parameter values
    pub value: Array1<f64>,
    /// Whether optimizers are allowed to change the values
    pub trainable: bool,
}

impl Param {
    /// Whether the parameter holds a single value
    pub fn is_scalar(&self) -> bool {
        self.value.len() == 1
    }
}

/// Ordered collection of named parameters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamStore {
    params: Vec<Param>,
}

impl ParamStore {
    /// Constructor of an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a trainable parameter. Fails if the name is already used.
    pub fn add(mut self, name: &str, value: Array1<f64>) -> Result<Self> {
        self.insert(name, value, true)?;
        Ok(self)
    }

    /// Registers a trainable scalar parameter
    pub fn add_scalar(self, name: &str, value: f64) -> Result<Self> {
        self.add(name, Array1::from_elem(1, value))
    }

    /// Registers a parameter with the given trainable flag
    pub fn insert(&mut self, name: &str, value: Array1<f64>, trainable: bool) -> Result<()> {
        if self.position(name).is_some() {
            return Err(OptimError::InvalidConfigError(format!(
                "parameter {name} already registered"
            )));
        }
        self.params.push(Param {
            name: name.to_string(),
            value,
            trainable,
        });
        Ok(())
    }

    /// Removes a parameter, returning it
    pub fn remove(&mut self, name: &str) -> Result<Param> {
        let idx = self
            .position(name)
            .ok_or_else(|| OptimError::UnknownParameter(name.to_string()))?;
        Ok(self.params.remove(idx))
    }

    /// Number of registered parameters
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Parameters in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    /// Parameter names in registration order
    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    /// Values of the named parameter
    pub fn get(&self, name: &str) -> Result<&Array1<f64>> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
            .ok_or_else(|| OptimError::UnknownParameter(name.to_string()))
    }

    /// Sets the values of the named parameter, shape is checked
    pub fn set(&mut self, name: &str, value: Array1<f64>) -> Result<()> {
        let param = self
            .params
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| OptimError::UnknownParameter(name.to_string()))?;
        if param.value.len() != value.len() {
            return Err(OptimError::ShapeMismatch {
                name: name.to_string(),
                expected: param.value.len(),
                actual: value.len(),
            });
        }
        param.value = value;
        Ok(())
    }

    /// Marks the named parameter as fixed (not trainable)
    pub fn fix(&mut self, name: &str) -> Result<()> {
        self.set_trainable(name, false)
    }

    /// Sets the trainable flag of the named parameter
    pub fn set_trainable(&mut self, name: &str, trainable: bool) -> Result<()> {
        let param = self
            .params
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| OptimError::UnknownParameter(name.to_string()))?;
        param.trainable = trainable;
        Ok(())
    }

    /// Scalar parameters as (name, value) pairs in registration order
    pub fn scalars(&self) -> Vec<(String, f64)> {
        self.params
            .iter()
            .filter(|p| p.is_scalar())
            .map(|p| (p.name.clone(), p.value[0]))
            .collect()
    }

    /// Total number of trainable values
    pub fn n_trainable(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.trainable)
            .map(|p| p.value.len())
            .sum()
    }

    /// Concatenation of the trainable parameters values
    pub fn trainable_values(&self) -> Array1<f64> {
        let mut values = Array1::zeros(self.n_trainable());
        let mut offset = 0;
        for p in self.params.iter().filter(|p| p.trainable) {
            let n = p.value.len();
            values.slice_mut(s![offset..offset + n]).assign(&p.value);
            offset += n;
        }
        values
    }

    /// Splits `values` back into the trainable parameters
    pub fn assign_trainable(&mut self, values: &[f64]) -> Result<()> {
        let expected = self.n_trainable();
        if values.len() != expected {
            return Err(OptimError::ShapeMismatch {
                name: "trainable".to_string(),
                expected,
                actual: values.len(),
            });
        }
        let mut offset = 0;
        for p in self.params.iter_mut().filter(|p| p.trainable) {
            let n = p.value.len();
            p.value = Array1::from(values[offset..offset + n].to_vec());
            offset += n;
        }
        Ok(())
    }

    /// Structure of the store: names and sizes in registration order.
    /// Two stores with equal signatures hold the same parameter set.
    pub fn signature(&self) -> Vec<(String, usize)> {
        self.params
            .iter()
            .map(|p| (p.name.clone(), p.value.len()))
            .collect()
    }

    /// Wraps the store in a shared handle
    pub fn shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn gp_params() -> ParamStore {
        ParamStore::new()
            .add_scalar("kern.variance", 1.0)
            .unwrap()
            .add("kern.lengthscales", array![0.5, 2.0])
            .unwrap()
            .add_scalar("likelihood.variance", 0.1)
            .unwrap()
    }

    #[test]
    fn test_trainable_values_roundtrip_order() {
        let mut store = gp_params();
        assert_eq!(store.n_trainable(), 4);
        assert_abs_diff_eq!(store.trainable_values(), array![1.0, 0.5, 2.0, 0.1]);

        store.fix("kern.lengthscales").unwrap();
        assert_eq!(store.n_trainable(), 2);
        store.assign_trainable(&[3.0, 0.2]).unwrap();
        assert_abs_diff_eq!(*store.get("kern.variance").unwrap(), array![3.0]);
        assert_abs_diff_eq!(*store.get("kern.lengthscales").unwrap(), array![0.5, 2.0]);
        assert_abs_diff_eq!(*store.get("likelihood.variance").unwrap(), array![0.2]);
    }

    #[test]
    fn test_scalars_skip_vectors() {
        let store = gp_params();
        let names: Vec<String> = store.scalars().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["kern.variance", "likelihood.variance"]);
    }

    #[test]
    fn test_invalid_updates() {
        let mut store = gp_params();
        assert!(matches!(
            store.set("kern.variance", array![1., 2.]),
            Err(OptimError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            store.set("mean.c", array![1.]),
            Err(OptimError::UnknownParameter(_))
        ));
        assert!(store.assign_trainable(&[1.0]).is_err());
        assert!(store.insert("kern.variance", array![1.], true).is_err());
    }

    #[test]
    fn test_signature_changes_with_structure() {
        let mut store = gp_params();
        let before = store.signature();
        store.set("kern.variance", array![2.0]).unwrap();
        assert_eq!(before, store.signature());
        store.remove("likelihood.variance").unwrap();
        assert_ne!(before, store.signature());
    }
}
