//! Checkpoints of the model parameters, the optimizer state and the run counters.
//!
//! Each save creates a new generation file `ckpt-<global_step>.json` in the
//! checkpoint directory and updates the `checkpoint.json` index. Both files are
//! written to a temporary file first, synced, then renamed, so that an
//! interrupted or failed save leaves the previous generation loadable.
use crate::context::MonitorContext;
use crate::errors::Result;
use crate::task::MonitorTask;
use crate::tasks::publish;

use gpmon_optim::{GlobalStep, OptimizerState, ParamStore, SharedStore};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the index file within the checkpoint directory
pub const CHECKPOINT_INDEX: &str = "checkpoint.json";
/// Default number of generations kept on disk
pub const DEFAULT_MAX_TO_KEEP: usize = 5;

/// Content of a checkpoint generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointData {
    /// Monitor iteration at save time
    pub iteration: u64,
    /// Global step at save time
    pub global_step: u64,
    /// Snapshot of the parameters
    pub params: ParamStore,
    /// Optimizer internal state if any
    pub optimizer: Option<serde_json::Value>,
}

impl CheckpointData {
    /// Restores the saved values into `store`, the optimizer state and the
    /// step counter when given.
    ///
    /// Parameters are set one by one, the store structure is left untouched.
    pub fn restore(
        &self,
        store: &SharedStore,
        optimizer: Option<&dyn OptimizerState>,
        global_step: Option<&GlobalStep>,
    ) -> Result<()> {
        {
            let mut store = store.write()?;
            for param in self.params.iter() {
                store.set(&param.name, param.value.clone())?;
                store.set_trainable(&param.name, param.trainable)?;
            }
        }
        if let (Some(optimizer), Some(state)) = (optimizer, self.optimizer.as_ref()) {
            optimizer.load_state(state.clone())?;
        }
        if let Some(step) = global_step {
            step.set(self.global_step);
        }
        Ok(())
    }

    /// Context continuing the saved run
    pub fn context(&self, global_step: Option<GlobalStep>) -> MonitorContext {
        MonitorContext::resume(self.iteration, global_step)
    }
}

/// Index of the generations present in a checkpoint directory, oldest first
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointIndex {
    /// File name of the newest generation
    pub latest: Option<String>,
    /// File names of the kept generations
    pub generations: Vec<String>,
}

fn read_index(directory: &Path) -> Result<Option<CheckpointIndex>> {
    let path = directory.join(CHECKPOINT_INDEX);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Loads the newest generation of the `directory`, `None` when no
/// checkpoint was saved there.
pub fn load_latest<P: AsRef<Path>>(directory: P) -> Result<Option<CheckpointData>> {
    let directory = directory.as_ref();
    let latest = match read_index(directory)?.and_then(|index| index.latest) {
        Some(latest) => latest,
        None => return Ok(None),
    };
    let content = std::fs::read_to_string(directory.join(&latest))?;
    let data = serde_json::from_str(&content)?;
    info!("Checkpoint loaded from {:?}", directory.join(latest));
    Ok(Some(data))
}

/// Writer of checkpoint generations with bounded retention
#[derive(Clone, Debug)]
pub struct CheckpointSaver {
    directory: PathBuf,
    max_to_keep: usize,
    index: CheckpointIndex,
}

impl CheckpointSaver {
    /// Constructor of a saver in `directory`, created if needed.
    ///
    /// An existing index is resumed: new generations are appended to it.
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory)?;
        let index = read_index(&directory)?.unwrap_or_default();
        if let Some(latest) = &index.latest {
            info!("Checkpoint directory {:?} resumed at {}", directory, latest);
        }
        Ok(CheckpointSaver {
            directory,
            max_to_keep: DEFAULT_MAX_TO_KEEP,
            index,
        })
    }

    /// Sets the number of generations kept, at least one
    pub fn max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.max_to_keep = max_to_keep.max(1);
        self
    }

    /// Checkpoint directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Current index
    pub fn index(&self) -> &CheckpointIndex {
        &self.index
    }

    /// Saves `data` as the newest generation and drops the generations
    /// exceeding the retention limit. Returns the generation path.
    pub fn save(&mut self, data: &CheckpointData) -> Result<PathBuf> {
        let name = format!("ckpt-{:08}.json", data.global_step);
        let path = self.directory.join(&name);
        let content = serde_json::to_vec_pretty(data)?;
        publish(&path, |tmp| Ok(std::fs::write(tmp, &content)?))?;

        let mut index = self.index.clone();
        index.generations.retain(|g| g != &name);
        index.generations.push(name.clone());
        index.latest = Some(name);
        let n_removed = index.generations.len().saturating_sub(self.max_to_keep);
        let removed: Vec<String> = index.generations.drain(..n_removed).collect();

        let content = serde_json::to_vec_pretty(&index)?;
        publish(&self.directory.join(CHECKPOINT_INDEX), |tmp| {
            Ok(std::fs::write(tmp, &content)?)
        })?;
        self.index = index;

        for old in removed {
            if let Err(err) = std::fs::remove_file(self.directory.join(&old)) {
                warn!("Old checkpoint {} not removed: {}", old, err);
            }
        }
        info!(
            "Checkpoint saved at iteration {} (step {}) in {:?}",
            data.iteration, data.global_step, path
        );
        Ok(path)
    }
}

/// Saves the model parameters, the optimizer state and the counters
pub struct CheckpointTask {
    saver: CheckpointSaver,
    store: SharedStore,
    optimizer: Option<Arc<dyn OptimizerState>>,
}

impl CheckpointTask {
    /// Constructor of a task checkpointing `store` in `directory`
    pub fn new<P: AsRef<Path>>(directory: P, store: &SharedStore) -> Result<Self> {
        Ok(CheckpointTask {
            saver: CheckpointSaver::new(directory)?,
            store: store.clone(),
            optimizer: None,
        })
    }

    /// Also saves the given optimizer state
    pub fn with_optimizer(mut self, optimizer: Arc<dyn OptimizerState>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    /// Sets the number of generations kept on disk
    pub fn max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.saver = self.saver.max_to_keep(max_to_keep);
        self
    }

    /// Underlying saver
    pub fn saver(&self) -> &CheckpointSaver {
        &self.saver
    }
}

impl MonitorTask for CheckpointTask {
    fn name(&self) -> String {
        "CheckpointTask".to_string()
    }

    fn run(&mut self, context: &MonitorContext) -> Result<()> {
        let optimizer = match &self.optimizer {
            Some(optimizer) => Some(optimizer.save_state()?),
            None => None,
        };
        let data = CheckpointData {
            iteration: context.iteration,
            global_step: context.global_step,
            params: self.store.read()?.clone(),
            optimizer,
        };
        self.saver.save(&data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MonitorError;
    use approx::assert_abs_diff_eq;
    use gpmon_optim::GradientDescent;
    use ndarray::array;

    fn clean(dir: &str) {
        let _ = std::fs::remove_dir_all(dir);
    }

    fn store() -> SharedStore {
        ParamStore::new()
            .add("w", array![1., 2.])
            .unwrap()
            .add_scalar("b", 0.5)
            .unwrap()
            .shared()
    }

    #[test]
    fn test_retention_keeps_newest_generations() {
        let dir = "target/test_checkpoint_retention";
        clean(dir);
        let store = store();
        let mut task = CheckpointTask::new(dir, &store).unwrap().max_to_keep(2);
        for i in 1..=4 {
            task.run(&MonitorContext::resume(i * 10, None)).unwrap();
        }
        let index = task.saver().index().clone();
        assert_eq!(
            index.generations,
            vec!["ckpt-00000030.json", "ckpt-00000040.json"]
        );
        assert_eq!(index.latest.as_deref(), Some("ckpt-00000040.json"));
        assert!(!Path::new(dir).join("ckpt-00000010.json").exists());
        assert!(!Path::new(dir).join("ckpt-00000020.json").exists());

        let latest = load_latest(dir).unwrap().unwrap();
        assert_eq!((latest.iteration, latest.global_step), (40, 40));
        assert!(latest.optimizer.is_none());
    }

    #[test]
    fn test_resume_existing_directory() {
        let dir = "target/test_checkpoint_resume";
        clean(dir);
        let store = store();
        {
            let mut task = CheckpointTask::new(dir, &store).unwrap();
            task.run(&MonitorContext::resume(5, None)).unwrap();
        }
        let mut task = CheckpointTask::new(dir, &store).unwrap();
        assert_eq!(
            task.saver().index().latest.as_deref(),
            Some("ckpt-00000005.json")
        );
        task.run(&MonitorContext::resume(6, None)).unwrap();
        // same step saved twice is a single generation
        task.run(&MonitorContext::resume(6, None)).unwrap();
        assert_eq!(
            task.saver().index().generations,
            vec!["ckpt-00000005.json", "ckpt-00000006.json"]
        );
    }

    #[test]
    fn test_failed_save_keeps_previous_generation() {
        let dir = "target/test_checkpoint_failure";
        clean(dir);
        let store = store();
        let mut task = CheckpointTask::new(dir, &store).unwrap();
        task.run(&MonitorContext::resume(1, None)).unwrap();

        // the temporary file cannot be created
        std::fs::create_dir_all(Path::new(dir).join("ckpt-00000002.json.tmp")).unwrap();
        store.write().unwrap().set("b", array![9.]).unwrap();
        assert!(matches!(
            task.run(&MonitorContext::resume(2, None)),
            Err(MonitorError::IoError(_))
        ));

        let latest = load_latest(dir).unwrap().unwrap();
        assert_eq!(latest.global_step, 1);
        assert_abs_diff_eq!(*latest.params.get("b").unwrap(), array![0.5]);
    }

    #[test]
    fn test_restore_params_optimizer_and_step() {
        let dir = "target/test_checkpoint_restore";
        clean(dir);
        let saved = store();
        let optimizer = GradientDescent::new(0.1);
        let state = Arc::new(optimizer.state());
        state
            .load_state(serde_json::json!({"velocity": [0.1, 0.2, 0.3]}))
            .unwrap();
        let mut task = CheckpointTask::new(dir, &saved)
            .unwrap()
            .with_optimizer(state.clone());
        let step = GlobalStep::new(12);
        task.run(&MonitorContext::resume(3, Some(step))).unwrap();

        let other = store();
        other.write().unwrap().fix("b").unwrap();
        other.write().unwrap().set("w", array![0., 0.]).unwrap();
        let restored = GradientDescent::new(0.1);
        let data = load_latest(dir).unwrap().unwrap();
        let step = restored.global_step();
        let handle = restored.state();
        data.restore(&other, Some(&handle as &dyn OptimizerState), Some(&step))
            .unwrap();

        let (other, saved) = (other.read().unwrap().clone(), saved.read().unwrap().clone());
        assert_eq!(other, saved);
        assert_eq!(step.get(), 12);
        assert_eq!(restored.state().get().unwrap().velocity, vec![0.1, 0.2, 0.3]);
        let ctx = data.context(Some(step));
        assert_eq!((ctx.iteration, ctx.global_step), (3, 12));
    }

    #[test]
    fn test_restored_values_are_bitwise_equal() {
        let dir = "target/test_checkpoint_bits";
        clean(dir);
        let x = array![0.999943610574501, 0.9998866389710277, 1e-300, -2.2250738585072014e-308];
        let store = ParamStore::new().add("x", x.clone()).unwrap().shared();
        let mut task = CheckpointTask::new(dir, &store).unwrap();
        task.run(&MonitorContext::resume(1, None)).unwrap();

        let restored = ParamStore::new().add("x", array![0., 0., 0., 0.]).unwrap().shared();
        load_latest(dir)
            .unwrap()
            .unwrap()
            .restore(&restored, None, None)
            .unwrap();
        let loaded = restored.read().unwrap().get("x").unwrap().clone();
        for (a, b) in x.iter().zip(loaded.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_no_checkpoint() {
        let dir = "target/test_checkpoint_none";
        clean(dir);
        std::fs::create_dir_all(dir).unwrap();
        assert!(load_latest(dir).unwrap().is_none());
    }
}
