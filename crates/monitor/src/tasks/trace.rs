use crate::context::MonitorContext;
use crate::errors::{MonitorError, Result};
use crate::task::MonitorTask;
use crate::tasks::publish;

use gpmon_optim::SharedStore;
use ndarray::Array2;
use ndarray_npy::{read_npy, write_npy};
use std::path::{Path, PathBuf};

/// Trace of the trainable values along the optimization.
///
/// Each run appends a row `[iteration, global_step, values...]` to the history
/// which is then published as a whole in a `.npy` file.
///
/// The history is kept in memory and rewritten at each run, so the cost of a
/// run grows with the number of rows. Use [`TraceTask::max_rows`] to bound it
/// on long optimizations.
pub struct TraceTask {
    path: PathBuf,
    store: SharedStore,
    signature: Vec<(String, usize)>,
    ncols: usize,
    max_rows: Option<usize>,
    history: Vec<f64>,
}

impl TraceTask {
    /// Constructor of a trace of the `store` trainable values saved in `path`
    pub fn new<P: AsRef<Path>>(path: P, store: &SharedStore) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store_ref = store.read()?;
        Ok(TraceTask {
            path,
            store: store.clone(),
            signature: store_ref.signature(),
            ncols: 2 + store_ref.n_trainable(),
            max_rows: None,
            history: vec![],
        })
    }

    /// Keeps only the `max_rows` latest rows, at least one
    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows.max(1));
        self
    }

    /// Trace file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// History recorded so far
    pub fn history(&self) -> Result<Array2<f64>> {
        let nrows = self.history.len() / self.ncols;
        Array2::from_shape_vec((nrows, self.ncols), self.history.clone())
            .map_err(|err| MonitorError::InvalidConfigError(err.to_string()))
    }
}

impl MonitorTask for TraceTask {
    fn name(&self) -> String {
        "TraceTask".to_string()
    }

    fn run(&mut self, context: &MonitorContext) -> Result<()> {
        let values = {
            let store = self.store.read()?;
            let actual = store.signature();
            if actual != self.signature {
                return Err(MonitorError::ModelStructureChanged {
                    expected: self.signature.clone(),
                    actual,
                });
            }
            store.trainable_values()
        };
        if values.len() + 2 != self.ncols {
            return Err(MonitorError::InvalidConfigError(format!(
                "trace expects {} trainable values, got {}",
                self.ncols - 2,
                values.len()
            )));
        }
        self.history.push(context.iteration as f64);
        self.history.push(context.global_step as f64);
        self.history.extend(values.iter());
        if let Some(max_rows) = self.max_rows {
            let excess = (self.history.len() / self.ncols).saturating_sub(max_rows);
            self.history.drain(..excess * self.ncols);
        }

        let history = self.history()?;
        publish(&self.path, |tmp| Ok(write_npy(tmp, &history)?))
    }
}

/// Reads back a trace written by a [`TraceTask`]
pub fn load_trace<P: AsRef<Path>>(path: P) -> Result<Array2<f64>> {
    Ok(read_npy(path.as_ref())?)
}
