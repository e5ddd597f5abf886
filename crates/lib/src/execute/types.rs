//! Types for apply and destroy runs.
//!
//! This module defines per-unit run records, the run configuration, and the
//! aggregate outcome types returned by the orchestrator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::{ErrorKind, ProvisionError, UnitOutputs};
use crate::graph::UnitId;
use crate::outputs::ResultManifest;

use super::retry::RetryPolicy;

/// Lifecycle of a unit within one run.
///
/// `Pending → Running → {Succeeded | Failed}`, or `Pending → Skipped` when a
/// dependency did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
  Skipped,
}

impl UnitStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, UnitStatus::Succeeded | UnitStatus::Failed | UnitStatus::Skipped)
  }
}

impl fmt::Display for UnitStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      UnitStatus::Pending => "pending",
      UnitStatus::Running => "running",
      UnitStatus::Succeeded => "succeeded",
      UnitStatus::Failed => "failed",
      UnitStatus::Skipped => "skipped",
    };
    f.write_str(s)
  }
}

/// Identifies what caused a unit to be skipped.
///
/// `failed` is the unit that actually failed. `chain` lists the units between
/// the skipped unit and the failure, nearest first, ending with `failed`. On
/// destroy the chain runs through dependents rather than dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDependency {
  pub failed: UnitId,
  pub chain: Vec<UnitId>,
}

impl FailedDependency {
  pub fn direct(failed: UnitId) -> Self {
    Self {
      chain: vec![failed.clone()],
      failed,
    }
  }

  /// Extend a blocker's own skip reason by one hop.
  pub fn via(through: UnitId, upstream: &FailedDependency) -> Self {
    let mut chain = Vec::with_capacity(upstream.chain.len() + 1);
    chain.push(through);
    chain.extend(upstream.chain.iter().cloned());
    Self {
      failed: upstream.failed.clone(),
      chain,
    }
  }
}

impl fmt::Display for FailedDependency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.failed)?;
    if self.chain.len() > 1 {
      let path: Vec<&str> = self.chain.iter().map(UnitId::as_str).collect();
      write!(f, " (via {})", path.join(" -> "))?;
    }
    Ok(())
  }
}

/// Why a unit failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitError {
  pub kind: ErrorKind,
  pub message: String,
}

impl From<&ProvisionError> for UnitError {
  fn from(e: &ProvisionError) -> Self {
    Self {
      kind: e.kind(),
      message: e.to_string(),
    }
  }
}

impl fmt::Display for UnitError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let kind = match self.kind {
      ErrorKind::Transient => "transient",
      ErrorKind::Permanent => "permanent",
    };
    write!(f, "{kind}: {}", self.message)
  }
}

/// How a succeeded unit got there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
  /// Provisioned by this run.
  Created,
  /// Already recorded as succeeded in the state store.
  Reused,
  /// Found on the provider and recorded without creating it.
  Adopted,
  /// Deleted by this run.
  Destroyed,
  /// Nothing to delete.
  Absent,
}

/// Everything known about one unit at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitRecord {
  pub status: UnitStatus,

  /// Backend attempts made for the unit's main operation.
  pub attempts: u32,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub resolution: Option<Resolution>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<UnitError>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub skipped_because: Option<FailedDependency>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub outputs: Option<UnitOutputs>,
}

impl UnitRecord {
  pub fn pending() -> Self {
    Self {
      status: UnitStatus::Pending,
      attempts: 0,
      resolution: None,
      error: None,
      skipped_because: None,
      outputs: None,
    }
  }

  pub fn succeeded(resolution: Resolution, attempts: u32, outputs: Option<UnitOutputs>) -> Self {
    Self {
      status: UnitStatus::Succeeded,
      attempts,
      resolution: Some(resolution),
      outputs,
      ..Self::pending()
    }
  }

  pub fn failed(error: UnitError, attempts: u32) -> Self {
    Self {
      status: UnitStatus::Failed,
      attempts,
      error: Some(error),
      ..Self::pending()
    }
  }

  pub fn skipped(reason: FailedDependency) -> Self {
    Self {
      status: UnitStatus::Skipped,
      skipped_because: Some(reason),
      ..Self::pending()
    }
  }
}

/// Per-unit records of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
  pub records: BTreeMap<UnitId, UnitRecord>,
}

impl RunReport {
  pub fn record(&self, id: &UnitId) -> Option<&UnitRecord> {
    self.records.get(id)
  }

  pub fn status(&self, id: &UnitId) -> Option<UnitStatus> {
    self.records.get(id).map(|r| r.status)
  }

  /// Returns true if every unit succeeded.
  pub fn is_success(&self) -> bool {
    self.records.values().all(|r| r.status == UnitStatus::Succeeded)
  }

  pub fn ids_with(&self, status: UnitStatus) -> Vec<&UnitId> {
    self
      .records
      .iter()
      .filter(|(_, r)| r.status == status)
      .map(|(id, _)| id)
      .collect()
  }

  pub fn count(&self, status: UnitStatus) -> usize {
    self.records.values().filter(|r| r.status == status).count()
  }

  /// Succeeded units that got there by `resolution`.
  pub fn count_resolved(&self, resolution: Resolution) -> usize {
    self
      .records
      .values()
      .filter(|r| r.resolution == Some(resolution))
      .count()
  }

  /// Returns the total number of units in the run.
  pub fn total(&self) -> usize {
    self.records.len()
  }

  /// Outputs of every succeeded unit.
  pub fn outputs(&self) -> BTreeMap<UnitId, UnitOutputs> {
    self
      .records
      .iter()
      .filter(|(_, r)| r.status == UnitStatus::Succeeded)
      .filter_map(|(id, r)| r.outputs.clone().map(|o| (id.clone(), o)))
      .collect()
  }
}

/// Result of a fully successful apply.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
  pub report: RunReport,
  pub outputs: ResultManifest,
}

/// Result of a fully successful destroy.
#[derive(Debug, Clone)]
pub struct DestroyOutcome {
  pub report: RunReport,
}

/// Returned when a run did not bring every unit to `Succeeded`.
///
/// Carries the full per-unit record so a caller can retry only the failed
/// subtree, see [`PartialFailure::retry_ids`] and
/// [`Plan::subplan`](crate::plan::Plan::subplan).
#[derive(Debug, Clone)]
pub struct PartialFailure {
  pub report: RunReport,
  pub cancelled: bool,

  /// Outputs of the units that did succeed.
  pub outputs: Option<ResultManifest>,
}

impl fmt::Display for PartialFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} of {} units failed, {} skipped, {} not started",
      self.report.count(UnitStatus::Failed),
      self.report.total(),
      self.report.count(UnitStatus::Skipped),
      self.report.count(UnitStatus::Pending)
    )?;
    if self.cancelled {
      f.write_str(" (cancelled)")?;
    }
    Ok(())
  }
}

impl std::error::Error for PartialFailure {}

impl PartialFailure {
  pub fn failed(&self) -> Vec<&UnitId> {
    self.report.ids_with(UnitStatus::Failed)
  }

  /// Units that did not succeed; feed these to `Plan::subplan` to retry.
  pub fn retry_ids(&self) -> Vec<&UnitId> {
    self
      .report
      .records
      .iter()
      .filter(|(_, r)| r.status != UnitStatus::Succeeded)
      .map(|(id, _)| id)
      .collect()
  }
}

/// Configuration for apply and destroy runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteConfig {
  /// Maximum number of units in flight at once.
  pub max_concurrency: usize,

  /// Ask the backend whether a unit already exists before creating it.
  pub probe_existing: bool,

  pub retry: RetryPolicy,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      max_concurrency: num_cpus(),
      probe_existing: true,
      retry: RetryPolicy::default(),
    }
  }
}

/// Get the number of CPUs for default concurrency.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
