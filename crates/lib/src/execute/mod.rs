//! Plan execution.
//!
//! This module provides the entry points for applying and destroying a plan.
//! It handles:
//! - Stage-by-stage execution with bounded concurrency inside a stage
//! - Idempotence through the state store
//! - Retry of transient backend errors
//! - Failure propagation and skip tracking
//! - Cooperative cancellation

mod cancel;
mod retry;
mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backend::{ErrorKind, ProvisionError, ProvisioningBackend, RemoteStatus, StateStore, StoredUnit};
use crate::graph::{ProvisioningUnit, UnitId};
use crate::outputs::ResultManifest;
use crate::plan::{Plan, Stage};

pub use cancel::{CancelHandle, CancelSignal, cancellation};
pub use retry::{RetryPolicy, RetryPolicyError};
pub use types::{
  ApplyOutcome, DestroyOutcome, ExecuteConfig, FailedDependency, PartialFailure, Resolution, RunReport, UnitError,
  UnitRecord, UnitStatus,
};

/// The external collaborators a run drives.
#[derive(Clone)]
pub struct Collaborators {
  pub backend: Arc<dyn ProvisioningBackend>,
  pub state: Arc<dyn StateStore>,
}

impl Collaborators {
  pub fn new(backend: Arc<dyn ProvisioningBackend>, state: Arc<dyn StateStore>) -> Self {
    Self { backend, state }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
  Apply,
  Destroy,
}

impl Operation {
  fn as_str(self) -> &'static str {
    match self {
      Operation::Apply => "apply",
      Operation::Destroy => "destroy",
    }
  }
}

/// What a spawned unit task reports back to the stage barrier.
enum TaskOutcome {
  /// Cancellation was observed before the unit started.
  NotStarted,
  Finished(UnitRecord),
}

/// Everything a unit task needs, cloned into each task.
#[derive(Clone)]
struct RunContext {
  /// State namespace of the plan being run.
  scope: String,
  collaborators: Collaborators,
  config: ExecuteConfig,
  cancel: CancelSignal,
  semaphore: Arc<Semaphore>,
}

/// Bring every unit of `plan` to `Succeeded`.
///
/// Stages run in order; stage K+1 starts only after every unit dispatched in
/// stage K reached a terminal state. A failed unit never stops its siblings,
/// but every unit depending on it, directly or transitively, is `Skipped`.
///
/// Units the state store already reports as succeeded are reused without a
/// backend call. With `probe_existing`, units the backend reports as present
/// are adopted instead of created.
///
/// # Errors
///
/// Returns [`PartialFailure`] when any unit failed, was skipped, or was not
/// started because `cancel` fired.
pub async fn apply(
  plan: &Plan,
  collaborators: &Collaborators,
  config: &ExecuteConfig,
  cancel: &CancelSignal,
) -> Result<ApplyOutcome, PartialFailure> {
  info!(
    scope = plan.scope(),
    units = plan.len(),
    stages = plan.stages().len(),
    "starting apply"
  );

  let stages: Vec<&Stage> = plan.stages().iter().collect();
  let (report, cancelled) = run(plan, &stages, Operation::Apply, collaborators, config, cancel).await;
  let outputs = ResultManifest::collect(plan, &report.outputs());

  if report.is_success() {
    Ok(ApplyOutcome { report, outputs })
  } else {
    Err(PartialFailure {
      report,
      cancelled,
      outputs: Some(outputs),
    })
  }
}

/// Tear down every unit of `plan`, last stage first.
///
/// A unit is destroyed only once every unit depending on it was destroyed or
/// never existed. Units without a succeeded state entry, and not found on the
/// backend, are no-ops.
///
/// # Errors
///
/// Returns [`PartialFailure`] when any unit could not be destroyed, was kept
/// because a dependent survived, or was not started because `cancel` fired.
pub async fn destroy(
  plan: &Plan,
  collaborators: &Collaborators,
  config: &ExecuteConfig,
  cancel: &CancelSignal,
) -> Result<DestroyOutcome, PartialFailure> {
  info!(
    scope = plan.scope(),
    units = plan.len(),
    stages = plan.stages().len(),
    "starting destroy"
  );

  let stages: Vec<&Stage> = plan.reversed_stages().collect();
  let (report, cancelled) = run(plan, &stages, Operation::Destroy, collaborators, config, cancel).await;

  if report.is_success() {
    Ok(DestroyOutcome { report })
  } else {
    Err(PartialFailure {
      report,
      cancelled,
      outputs: None,
    })
  }
}

async fn run(
  plan: &Plan,
  stages: &[&Stage],
  op: Operation,
  collaborators: &Collaborators,
  config: &ExecuteConfig,
  cancel: &CancelSignal,
) -> (RunReport, bool) {
  let mut records: BTreeMap<UnitId, UnitRecord> =
    plan.units().map(|u| (u.id.clone(), UnitRecord::pending())).collect();

  let ctx = RunContext {
    scope: plan.scope().to_string(),
    collaborators: collaborators.clone(),
    config: config.clone(),
    cancel: cancel.clone(),
    semaphore: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
  };

  let mut cancelled = false;

  for (position, stage) in stages.iter().enumerate() {
    if cancel.is_cancelled() {
      warn!(operation = op.as_str(), stage = stage.index, "run cancelled, not starting remaining stages");
      cancelled = true;
      break;
    }

    debug!(
      operation = op.as_str(),
      stage = stage.index,
      position,
      units = stage.units.len(),
      "executing stage"
    );

    let mut ready = Vec::new();
    for id in &stage.units {
      let Some(unit) = plan.unit(id) else {
        continue;
      };

      let blocker = match op {
        Operation::Apply => find_failed_dependency(unit.dependencies.iter(), &records),
        Operation::Destroy => find_failed_dependency(plan.dependents_of(id).into_iter(), &records),
      };

      if let Some(failed_dep) = blocker {
        warn!(
          operation = op.as_str(),
          unit = %id,
          failed_dep = %failed_dep,
          "skipping unit due to failed dependency"
        );
        records.insert(id.clone(), UnitRecord::skipped(failed_dep));
      } else {
        ready.push(unit.clone());
      }
    }

    for unit in &ready {
      if let Some(record) = records.get_mut(&unit.id) {
        record.status = UnitStatus::Running;
      }
    }

    for (id, outcome) in execute_stage(ready, op, &ctx).await {
      match outcome {
        TaskOutcome::Finished(record) => {
          match record.status {
            UnitStatus::Succeeded => info!(operation = op.as_str(), unit = %id, "unit succeeded"),
            _ => {
              if let Some(e) = &record.error {
                error!(operation = op.as_str(), unit = %id, attempts = record.attempts, error = %e, "unit failed");
              }
            }
          }
          records.insert(id, record);
        }
        TaskOutcome::NotStarted => {
          cancelled = true;
          records.insert(id, UnitRecord::pending());
        }
      }
    }

    // A panicked task leaves its unit Running; count it as failed.
    for id in &stage.units {
      if let Some(record) = records.get_mut(id)
        && record.status == UnitStatus::Running
      {
        *record = UnitRecord::failed(
          UnitError {
            kind: ErrorKind::Permanent,
            message: "unit task terminated unexpectedly".to_string(),
          },
          record.attempts,
        );
      }
    }
  }

  let report = RunReport { records };
  info!(
    operation = op.as_str(),
    succeeded = report.count(UnitStatus::Succeeded),
    failed = report.count(UnitStatus::Failed),
    skipped = report.count(UnitStatus::Skipped),
    pending = report.count(UnitStatus::Pending),
    cancelled,
    "run complete"
  );

  (report, cancelled)
}

/// Find a blocker among `neighbors`: a unit that failed or was itself skipped.
///
/// Neighbors outside the run (for instance dependencies of a subplan) are
/// assumed to be in place.
fn find_failed_dependency<'a>(
  neighbors: impl Iterator<Item = &'a UnitId>,
  records: &BTreeMap<UnitId, UnitRecord>,
) -> Option<FailedDependency> {
  let mut skipped = None;
  for neighbor in neighbors {
    let Some(record) = records.get(neighbor) else {
      continue;
    };
    match record.status {
      UnitStatus::Failed => return Some(FailedDependency::direct(neighbor.clone())),
      UnitStatus::Skipped if skipped.is_none() => {
        skipped = record
          .skipped_because
          .as_ref()
          .map(|upstream| FailedDependency::via(neighbor.clone(), upstream));
      }
      _ => {}
    }
  }
  skipped
}

/// Execute one stage's ready units in parallel.
async fn execute_stage(
  units: Vec<ProvisioningUnit>,
  op: Operation,
  ctx: &RunContext,
) -> Vec<(UnitId, TaskOutcome)> {
  let mut join_set = JoinSet::new();

  for unit in units {
    let ctx = ctx.clone();
    join_set.spawn(async move {
      let Ok(_permit) = ctx.semaphore.clone().acquire_owned().await else {
        return (unit.id, TaskOutcome::NotStarted);
      };

      if ctx.cancel.is_cancelled() {
        debug!(unit = %unit.id, "cancelled before start");
        return (unit.id, TaskOutcome::NotStarted);
      }

      let record = match op {
        Operation::Apply => apply_unit(&unit, &ctx).await,
        Operation::Destroy => destroy_unit(&unit, &ctx).await,
      };
      (unit.id, TaskOutcome::Finished(record))
    });
  }

  collect_join_results(join_set).await
}

/// Collect results from a JoinSet of unit tasks.
async fn collect_join_results(mut join_set: JoinSet<(UnitId, TaskOutcome)>) -> Vec<(UnitId, TaskOutcome)> {
  let mut results = Vec::new();

  while let Some(join_result) = join_set.join_next().await {
    match join_result {
      Ok(result) => results.push(result),
      Err(e) => error!(error = %e, "unit task panicked"),
    }
  }

  results
}

async fn apply_unit(unit: &ProvisioningUnit, ctx: &RunContext) -> UnitRecord {
  let backend = &ctx.collaborators.backend;
  let state = &ctx.collaborators.state;

  let scope = ctx.scope.as_str();

  match state.get(scope, &unit.id).await {
    Ok(Some(entry)) if entry.is_succeeded_for(unit) => {
      debug!(unit = %unit.id, "already succeeded, reusing recorded outputs");
      return UnitRecord::succeeded(Resolution::Reused, 0, entry.outputs);
    }
    Ok(Some(entry)) if entry.is_succeeded() => {
      warn!(unit = %unit.id, recorded = %entry.name, name = %unit.name, "recorded under another name, not reusing");
    }
    Ok(_) => {}
    Err(e) => return state_failure(&unit.id, 0, &e),
  }

  if ctx.config.probe_existing {
    match backend.status(unit).await {
      Ok(RemoteStatus::Present(outputs)) => {
        debug!(unit = %unit.id, name = %unit.name, "adopting existing unit");
        return match state
          .record(scope, &unit.id, StoredUnit::succeeded(&unit.name, outputs.clone()))
          .await
        {
          Ok(()) => UnitRecord::succeeded(Resolution::Adopted, 0, Some(outputs)),
          Err(e) => state_failure(&unit.id, 0, &e),
        };
      }
      Ok(RemoteStatus::Absent) => {}
      Err(e) => debug!(unit = %unit.id, error = %e, "status probe failed, creating"),
    }
  }

  debug!(unit = %unit.id, name = %unit.name, "creating unit");
  let (result, attempts) = ctx.config.retry.run(&unit.id, || backend.create(unit)).await;

  match result {
    Ok(outputs) => match state
      .record(scope, &unit.id, StoredUnit::succeeded(&unit.name, outputs.clone()))
      .await
    {
      Ok(()) => UnitRecord::succeeded(Resolution::Created, attempts, Some(outputs)),
      Err(e) => state_failure(&unit.id, attempts, &e),
    },
    Err(e) => {
      if let Err(state_err) = state.record(scope, &unit.id, StoredUnit::failed(&unit.name)).await {
        warn!(unit = %unit.id, error = %state_err, "failed to record unit failure");
      }
      UnitRecord::failed(UnitError::from(&e), attempts)
    }
  }
}

async fn destroy_unit(unit: &ProvisioningUnit, ctx: &RunContext) -> UnitRecord {
  let backend = &ctx.collaborators.backend;
  let state = &ctx.collaborators.state;

  let scope = ctx.scope.as_str();

  let recorded = match state.get(scope, &unit.id).await {
    Ok(entry) => entry.is_some_and(|e| e.is_succeeded()),
    Err(e) => return state_failure(&unit.id, 0, &e),
  };

  let exists = recorded
    || (ctx.config.probe_existing && matches!(backend.status(unit).await, Ok(RemoteStatus::Present(_))));

  if !exists {
    debug!(unit = %unit.id, "nothing to destroy");
    if let Err(e) = state.remove(scope, &unit.id).await {
      return state_failure(&unit.id, 0, &e);
    }
    return UnitRecord::succeeded(Resolution::Absent, 0, None);
  }

  debug!(unit = %unit.id, name = %unit.name, "destroying unit");
  let (result, attempts) = ctx.config.retry.run(&unit.id, || backend.destroy(unit)).await;

  match result {
    Ok(()) | Err(ProvisionError::NotFound(_)) => match state.remove(scope, &unit.id).await {
      Ok(()) => UnitRecord::succeeded(Resolution::Destroyed, attempts, None),
      Err(e) => state_failure(&unit.id, attempts, &e),
    },
    Err(e) => UnitRecord::failed(UnitError::from(&e), attempts),
  }
}

fn state_failure(id: &UnitId, attempts: u32, e: &crate::backend::StateError) -> UnitRecord {
  error!(unit = %id, error = %e, "state store error");
  UnitRecord::failed(
    UnitError {
      kind: ErrorKind::Permanent,
      message: format!("state store: {e}"),
    },
    attempts,
  )
}
