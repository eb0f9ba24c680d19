//! Tasks recording scalar metrics to a [`MetricSink`](crate::MetricSink).
//!
//! Every recorder goes through [`write_summaries`]: the values computed in one
//! run are written together, in order, at the context global step.
use crate::context::MonitorContext;
use crate::errors::{MonitorError, Result};
use crate::sink::SharedSink;
use crate::task::MonitorTask;

use gpmon_optim::{Model, SharedStore};
use ndarray::Array1;
use std::sync::Arc;

/// Writes the `(tag, value)` pairs to the sink at `step`, flushing afterwards
/// if requested so that the flush is attributed to the calling task.
pub fn write_summaries(
    sink: &SharedSink,
    step: u64,
    values: &[(String, f64)],
    flush: bool,
) -> Result<()> {
    let mut sink = sink.lock()?;
    for (tag, value) in values {
        sink.write_scalar(tag, *value, step)?;
    }
    if flush {
        sink.flush()?;
    }
    Ok(())
}

/// Records the values of the model parameters.
///
/// The parameter set is captured at creation, running the task after a
/// structural change of the store fails with
/// [`MonitorError::ModelStructureChanged`].
pub struct ModelRecorder {
    sink: SharedSink,
    store: SharedStore,
    signature: Vec<(String, usize)>,
    only_scalars: bool,
    flush_immediately: bool,
}

impl ModelRecorder {
    /// Constructor of a recorder of the `store` parameters
    pub fn new(sink: SharedSink, store: &SharedStore) -> Result<Self> {
        let signature = store.read()?.signature();
        Ok(ModelRecorder {
            sink,
            store: store.clone(),
            signature,
            only_scalars: true,
            flush_immediately: false,
        })
    }

    /// When false, vector parameters are also recorded element-wise
    /// as `<name>/<index>`
    pub fn only_scalars(mut self, only_scalars: bool) -> Self {
        self.only_scalars = only_scalars;
        self
    }

    /// Flushes the sink after each run
    pub fn with_flush_immediately(mut self, flush: bool) -> Self {
        self.flush_immediately = flush;
        self
    }

    /// Values to be recorded, read from the live store
    pub fn values(&self) -> Result<Vec<(String, f64)>> {
        let store = self.store.read()?;
        let actual = store.signature();
        if actual != self.signature {
            return Err(MonitorError::ModelStructureChanged {
                expected: self.signature.clone(),
                actual,
            });
        }
        let mut values = vec![];
        for param in store.iter() {
            if param.is_scalar() {
                values.push((param.name.clone(), param.value[0]));
            } else if !self.only_scalars {
                values.extend(
                    param
                        .value
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (format!("{}/{}", param.name, i), *v)),
                );
            }
        }
        Ok(values)
    }
}

impl MonitorTask for ModelRecorder {
    fn name(&self) -> String {
        "ModelRecorder".to_string()
    }

    fn run(&mut self, context: &MonitorContext) -> Result<()> {
        let values = self.values()?;
        write_summaries(
            &self.sink,
            context.global_step,
            &values,
            self.flush_immediately,
        )
    }
}

/// Records the full training objective of a model.
///
/// The objective may be expensive, choose a sparse condition.
pub struct ObjectiveRecorder {
    sink: SharedSink,
    model: Arc<dyn Model>,
    tag: String,
    flush_immediately: bool,
}

impl ObjectiveRecorder {
    /// Constructor of a recorder of the `model` objective tagged `objective`
    pub fn new(sink: SharedSink, model: Arc<dyn Model>) -> Self {
        ObjectiveRecorder {
            sink,
            model,
            tag: "objective".to_string(),
            flush_immediately: false,
        }
    }

    /// Sets the record tag
    pub fn tag(mut self, tag: &str) -> Self {
        self.tag = tag.to_string();
        self
    }

    /// Flushes the sink after each run
    pub fn with_flush_immediately(mut self, flush: bool) -> Self {
        self.flush_immediately = flush;
        self
    }
}

impl MonitorTask for ObjectiveRecorder {
    fn name(&self) -> String {
        "ObjectiveRecorder".to_string()
    }

    fn run(&mut self, context: &MonitorContext) -> Result<()> {
        let value = self.model.objective()?;
        write_summaries(
            &self.sink,
            context.global_step,
            &[(self.tag.clone(), value)],
            self.flush_immediately,
        )
    }
}

/// User defined metrics computed at each run of a [`ScalarsRecorder`]
pub trait MetricSource: Send {
    /// Computes `(tag, value)` pairs
    fn metrics(&mut self, context: &MonitorContext) -> Result<Vec<(String, f64)>>;
}

impl<F> MetricSource for F
where
    F: FnMut(&MonitorContext) -> Result<Vec<(String, f64)>> + Send,
{
    fn metrics(&mut self, context: &MonitorContext) -> Result<Vec<(String, f64)>> {
        self(context)
    }
}

/// Records custom metrics (e.g. a held-out error) computed by a [`MetricSource`]
pub struct ScalarsRecorder<S: MetricSource> {
    sink: SharedSink,
    source: S,
    flush_immediately: bool,
}

impl<S: MetricSource> ScalarsRecorder<S> {
    /// Constructor of a recorder of the `source` metrics
    pub fn new(sink: SharedSink, source: S) -> Self {
        ScalarsRecorder {
            sink,
            source,
            flush_immediately: false,
        }
    }

    /// Flushes the sink after each run
    pub fn with_flush_immediately(mut self, flush: bool) -> Self {
        self.flush_immediately = flush;
        self
    }
}

impl<S: MetricSource> MonitorTask for ScalarsRecorder<S> {
    fn name(&self) -> String {
        "ScalarsRecorder".to_string()
    }

    fn run(&mut self, context: &MonitorContext) -> Result<()> {
        let values = self.source.metrics(context)?;
        write_summaries(
            &self.sink,
            context.global_step,
            &values,
            self.flush_immediately,
        )
    }
}

type VectorFn = dyn FnMut(&MonitorContext) -> Result<Array1<f64>> + Send;

/// Records a vector valued function element-wise as `<tag>/<index>`
pub struct VectorRecorder {
    sink: SharedSink,
    tag: String,
    f: Box<VectorFn>,
    flush_immediately: bool,
}

impl VectorRecorder {
    /// Constructor of a recorder of the `f` values tagged `tag`
    pub fn new<F>(sink: SharedSink, tag: &str, f: F) -> Self
    where
        F: FnMut(&MonitorContext) -> Result<Array1<f64>> + Send + 'static,
    {
        VectorRecorder {
            sink,
            tag: tag.to_string(),
            f: Box::new(f),
            flush_immediately: false,
        }
    }

    /// Flushes the sink after each run
    pub fn with_flush_immediately(mut self, flush: bool) -> Self {
        self.flush_immediately = flush;
        self
    }
}

impl MonitorTask for VectorRecorder {
    fn name(&self) -> String {
        "VectorRecorder".to_string()
    }

    fn run(&mut self, context: &MonitorContext) -> Result<()> {
        let values: Vec<(String, f64)> = (self.f)(context)?
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("{}/{}", self.tag, i), *v))
            .collect();
        write_summaries(
            &self.sink,
            context.global_step,
            &values,
            self.flush_immediately,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{read_records, MetricSink};
    use gpmon_optim::{FnModel, ParamStore};
    use ndarray::array;

    fn store() -> SharedStore {
        ParamStore::new()
            .add_scalar("kern.variance", 1.5)
            .unwrap()
            .add("kern.lengthscales", array![0.5, 2.0])
            .unwrap()
            .shared()
    }

    fn ctx(step: u64) -> MonitorContext {
        MonitorContext::resume(step, None)
    }

    #[test]
    fn test_model_recorder_scalars_and_vectors() {
        let dir = "target/test_recorder_model";
        let _ = std::fs::remove_dir_all(dir);
        let sink = MetricSink::open(dir).unwrap().shared();
        let store = store();
        let mut scalars = ModelRecorder::new(sink.clone(), &store).unwrap();
        let mut all = ModelRecorder::new(sink.clone(), &store)
            .unwrap()
            .only_scalars(false)
            .with_flush_immediately(true);
        scalars.run(&ctx(3)).unwrap();
        all.run(&ctx(4)).unwrap();

        let records = read_records(dir).unwrap();
        let got: Vec<(String, u64)> = records.iter().map(|r| (r.tag.clone(), r.step)).collect();
        assert_eq!(
            got,
            vec![
                ("kern.variance".to_string(), 3),
                ("kern.variance".to_string(), 4),
                ("kern.lengthscales/0".to_string(), 4),
                ("kern.lengthscales/1".to_string(), 4),
            ]
        );
        sink.lock().unwrap().close().unwrap();
    }

    #[test]
    fn test_model_recorder_structure_change_is_fatal() {
        let dir = "target/test_recorder_structure";
        let _ = std::fs::remove_dir_all(dir);
        let sink = MetricSink::open(dir).unwrap().shared();
        let store = store();
        let mut recorder = ModelRecorder::new(sink.clone(), &store).unwrap();
        store
            .write()
            .unwrap()
            .insert("mean.c", array![0.], true)
            .unwrap();
        assert!(matches!(
            recorder.run(&ctx(1)),
            Err(MonitorError::ModelStructureChanged { .. })
        ));
        sink.lock().unwrap().close().unwrap();
    }

    #[test]
    fn test_objective_and_custom_recorders() {
        let dir = "target/test_recorder_objective";
        let _ = std::fs::remove_dir_all(dir);
        let sink = MetricSink::open(dir).unwrap().shared();
        let model = Arc::new(FnModel::new(
            ParamStore::new().add("x", array![1., 2.]).unwrap(),
            |x| x.iter().sum(),
        ));

        struct HeldOut {
            calls: usize,
        }
        impl MetricSource for HeldOut {
            fn metrics(&mut self, _context: &MonitorContext) -> Result<Vec<(String, f64)>> {
                self.calls += 1;
                Ok(vec![("test.rmse".to_string(), 0.5 / self.calls as f64)])
            }
        }

        let mut objective = ObjectiveRecorder::new(sink.clone(), model).tag("elbo");
        let mut custom = ScalarsRecorder::new(sink.clone(), HeldOut { calls: 0 });
        let mut vector = VectorRecorder::new(sink.clone(), "grad", |_| Ok(array![0.1, 0.2]));
        let mut closure = ScalarsRecorder::new(
            sink.clone(),
            |ctx: &MonitorContext| -> Result<Vec<(String, f64)>> {
                Ok(vec![("iter".to_string(), ctx.iteration as f64)])
            },
        );
        for task in [
            &mut objective as &mut dyn MonitorTask,
            &mut custom,
            &mut vector,
            &mut closure,
        ] {
            task.run(&ctx(7)).unwrap();
        }
        sink.lock().unwrap().close().unwrap();

        let records = read_records(dir).unwrap();
        let got: Vec<(&str, f64)> = records.iter().map(|r| (r.tag.as_str(), r.value)).collect();
        assert_eq!(
            got,
            vec![
                ("elbo", 3.),
                ("test.rmse", 0.5),
                ("grad/0", 0.1),
                ("grad/1", 0.2),
                ("iter", 7.)
            ]
        );
        assert!(records.iter().all(|r| r.step == 7));
    }

    #[test]
    fn test_custom_error_propagates() {
        let dir = "target/test_recorder_error";
        let _ = std::fs::remove_dir_all(dir);
        let sink = MetricSink::open(dir).unwrap().shared();
        let mut failing = ScalarsRecorder::new(
            sink.clone(),
            |_: &MonitorContext| -> Result<Vec<(String, f64)>> {
                Err(anyhow::anyhow!("held-out data missing").into())
            },
        );
        let err = failing.run(&ctx(1)).unwrap_err();
        assert!(err.to_string().contains("held-out data missing"));
        sink.lock().unwrap().close().unwrap();
    }
}
