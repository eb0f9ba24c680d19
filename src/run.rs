//! Monitored training of a test model, optionally resumed from a checkpoint.
use crate::config::{OptimizerKind, RunConfig};

use anyhow::Context;
use argmin_testfunctions::rosenbrock;
use gpmon_monitor::{
    load_latest, CheckpointData, CheckpointTask, Condition, IntoTask, MetricSink, MonitorError,
    ModelRecorder, Monitor, MonitorContext, ObjectiveRecorder, PrintTimingsTask, SharedSink,
    Task, TraceTask,
};
use gpmon_optim::{
    FnModel, GlobalStep, GradientDescent, Model, NelderMeadOptimizer, OptimizerState, ParamStore,
    SharedCallback,
};
use log::info;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Checkpoint directory within the output directory
pub const CHECKPOINT_DIR: &str = "checkpoints";
/// Metric sink log directory within the output directory
pub const LOG_DIR: &str = "logs";
/// Parameter trace file within the output directory
pub const TRACE_FILE: &str = "trace.npy";

/// Outcome of a monitored run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Objective value at the final parameters
    pub objective: f64,
    /// Final monitor iteration
    pub iteration: u64,
    /// Final global step
    pub global_step: u64,
    /// Final parameters
    pub x: Vec<f64>,
    /// Whether the run was resumed from a checkpoint
    pub resumed: bool,
}

struct Paths {
    checkpoints: PathBuf,
    logs: PathBuf,
    trace: PathBuf,
}

impl Paths {
    fn new(config: &RunConfig) -> Self {
        Paths {
            checkpoints: config.outdir.join(CHECKPOINT_DIR),
            logs: config.outdir.join(LOG_DIR),
            trace: config.outdir.join(TRACE_FILE),
        }
    }
}

/// Minimizes the Rosenbrock function from `config.x0` under a monitor
/// printing timings, recording parameters and objective, tracing the
/// trainable values and saving checkpoints in `config.outdir`.
///
/// The effective configuration is written in the output directory first.
pub fn run(config: &RunConfig) -> anyhow::Result<RunSummary> {
    config.validate()?;
    let config_file = config.save()?;
    info!("Configuration written in {:?}", config_file);

    let paths = Paths::new(config);
    let store = ParamStore::new().add("x", Array1::from(config.x0.clone()))?;
    let model: Arc<dyn Model> = Arc::new(FnModel::new(store, |x| rosenbrock(x)));

    let restored = if config.hot_start.is_enabled() {
        load_latest(&paths.checkpoints)?
    } else {
        None
    };
    if let Some(data) = &restored {
        info!(
            "Hot start from iteration {} (step {})",
            data.iteration, data.global_step
        );
    }

    let sink = MetricSink::open(&paths.logs)?.shared();
    let res = match config.optimizer {
        OptimizerKind::Gd => {
            run_gradient_descent(config, &paths, &model, &sink, restored.as_ref())
        }
        OptimizerKind::NelderMead => {
            run_nelder_mead(config, &paths, &model, &sink, restored.as_ref())
        }
    };
    sink.lock().map_err(MonitorError::from)?.close()?;
    let (iteration, global_step) = res?;

    let objective = model.objective()?;
    let x = model
        .store()
        .read()
        .map_err(MonitorError::from)?
        .trainable_values()
        .to_vec();
    info!(
        "Run done at iteration {} (step {}): objective = {}",
        iteration, global_step, objective
    );
    Ok(RunSummary {
        objective,
        iteration,
        global_step,
        x,
        resumed: restored.is_some(),
    })
}

fn recording_tasks(
    config: &RunConfig,
    paths: &Paths,
    model: &Arc<dyn Model>,
    sink: &SharedSink,
) -> anyhow::Result<Vec<Task>> {
    let every = Condition::periodic(config.record_every)?;
    Ok(vec![
        PrintTimingsTask::new()
            .with_condition(Condition::periodic(config.print_every)?)
            .with_exit_condition(true),
        ModelRecorder::new(sink.clone(), model.store())?
            .only_scalars(false)
            .with_condition(every.clone()),
        ObjectiveRecorder::new(sink.clone(), model.clone()).with_condition(every.clone()),
        TraceTask::new(&paths.trace, model.store())?.with_condition(every),
    ])
}

fn run_gradient_descent(
    config: &RunConfig,
    paths: &Paths,
    model: &Arc<dyn Model>,
    sink: &SharedSink,
    restored: Option<&CheckpointData>,
) -> anyhow::Result<(u64, u64)> {
    let optimizer = GradientDescent::new(config.learning_rate).momentum(config.momentum);
    let global_step = optimizer.global_step();
    let state = optimizer.state();
    let context = match restored {
        Some(data) => {
            data.restore(
                model.store(),
                Some(&state as &dyn OptimizerState),
                Some(&global_step),
            )?;
            data.context(Some(global_step.clone()))
        }
        None => MonitorContext::with_global_step(global_step.clone()),
    };
    let remaining = config
        .hot_start
        .budget(config.max_iters)
        .saturating_sub(global_step.get());

    let mut tasks = recording_tasks(config, paths, model, sink)?;
    tasks.push(
        CheckpointTask::new(&paths.checkpoints, model.store())?
            .with_optimizer(Arc::new(state))
            .max_to_keep(config.max_to_keep)
            .with_condition(Condition::periodic_step(config.checkpoint_every)?)
            .with_exit_condition(true),
    );
    let context = context.shared();
    Monitor::new(tasks)
        .with_context(context.clone())
        .print_summary(config.print_summary)
        .scope(|monitor| {
            optimizer
                .minimize(model.as_ref(), remaining, Some(monitor))
                .context("gradient descent failed")
        })?;

    let context = context.lock().map_err(MonitorError::from)?;
    Ok((context.iteration, context.global_step))
}

fn run_nelder_mead(
    config: &RunConfig,
    paths: &Paths,
    model: &Arc<dyn Model>,
    sink: &SharedSink,
    restored: Option<&CheckpointData>,
) -> anyhow::Result<(u64, u64)> {
    // the global step counts the completed solver iterations
    let global_step = GlobalStep::default();
    let context = match restored {
        Some(data) => {
            data.restore(model.store(), None, Some(&global_step))?;
            data.context(Some(global_step.clone()))
        }
        None => MonitorContext::with_global_step(global_step.clone()),
    };
    let remaining = config
        .hot_start
        .budget(config.max_iters)
        .saturating_sub(global_step.get());

    let optimizer = NelderMeadOptimizer::for_store(model.store())
        .with_global_step(global_step)
        .max_iters(remaining)
        .callback_every(config.callback_every);

    let mut tasks = recording_tasks(config, paths, model, sink)?;
    tasks.push(
        CheckpointTask::new(&paths.checkpoints, model.store())?
            .max_to_keep(config.max_to_keep)
            .with_condition(Condition::periodic_step(config.checkpoint_every)?)
            .with_exit_condition(true),
    );
    let context = context.shared();
    let monitor = Monitor::new(tasks)
        .with_context(context.clone())
        .with_optimizer(optimizer.shadow())
        .print_summary(config.print_summary)
        .into_shared();

    let callback: SharedCallback = monitor.clone();
    let res = optimizer
        .minimize(model.clone(), Some(callback))
        .context("Nelder-Mead failed");
    // the best parameters are committed once the solver returned,
    // exit tasks see them
    monitor.lock().map_err(MonitorError::from)?.close()?;
    res?;

    let context = context.lock().map_err(MonitorError::from)?;
    Ok((context.iteration, context.global_step))
}
