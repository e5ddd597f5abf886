//! Collaborators the orchestrator drives: a provisioning backend that talks to
//! the cloud, and a state store that remembers what has been provisioned.
//!
//! Both are traits so the engine stays provider-agnostic. This module ships an
//! in-memory and a file-backed [`StateStore`] plus a [`SimulatedBackend`] that
//! fabricates deterministic outputs for dry runs.

mod file;
mod memory;
mod simulated;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::execute::UnitStatus;
use crate::graph::{ProvisioningUnit, UnitId};

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use simulated::SimulatedBackend;

/// What a backend reports for a provisioned unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOutputs {
  /// Provider-side identifier.
  pub id: String,

  /// Endpoint, FQDN or URI, when the unit exposes one.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub endpoint: Option<String>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub attributes: BTreeMap<String, String>,
}

/// Whether a unit already exists on the provider side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
  Absent,
  Present(UnitOutputs),
}

/// Whether retrying an operation can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
  Transient,
  Permanent,
}

/// Errors reported by a [`ProvisioningBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
  #[error("operation timed out: {0}")]
  Timeout(String),

  #[error("conflicting operation in progress: {0}")]
  Conflict(String),

  #[error("request throttled: {0}")]
  Throttled(String),

  #[error("request rejected: {0}")]
  Rejected(String),

  #[error("not found: {0}")]
  NotFound(String),
}

impl ProvisionError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      ProvisionError::Timeout(_) | ProvisionError::Conflict(_) | ProvisionError::Throttled(_) => ErrorKind::Transient,
      ProvisionError::Rejected(_) | ProvisionError::NotFound(_) => ErrorKind::Permanent,
    }
  }

  pub fn is_transient(&self) -> bool {
    self.kind() == ErrorKind::Transient
  }
}

/// Creates, inspects and deletes provisioning units on a provider.
///
/// Implementations must be safe to call concurrently for different units.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
  /// Create the unit and return its outputs.
  async fn create(&self, unit: &ProvisioningUnit) -> Result<UnitOutputs, ProvisionError>;

  /// Report whether the unit already exists.
  async fn status(&self, unit: &ProvisioningUnit) -> Result<RemoteStatus, ProvisionError>;

  /// Delete the unit.
  async fn destroy(&self, unit: &ProvisioningUnit) -> Result<(), ProvisionError>;
}

/// Errors reported by a [`StateStore`].
#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to read state: {0}")]
  Read(#[source] std::io::Error),

  #[error("failed to write state: {0}")]
  Write(#[source] std::io::Error),

  #[error("failed to parse state: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize state: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported state version {0}")]
  UnsupportedVersion(u32),
}

/// The last terminal outcome recorded for a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUnit {
  pub status: UnitStatus,

  /// Resolved cloud-side name at the time the entry was written.
  pub name: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub outputs: Option<UnitOutputs>,
}

impl StoredUnit {
  pub fn succeeded(name: impl Into<String>, outputs: UnitOutputs) -> Self {
    Self {
      status: UnitStatus::Succeeded,
      name: name.into(),
      outputs: Some(outputs),
    }
  }

  pub fn failed(name: impl Into<String>) -> Self {
    Self {
      status: UnitStatus::Failed,
      name: name.into(),
      outputs: None,
    }
  }

  pub fn is_succeeded(&self) -> bool {
    self.status == UnitStatus::Succeeded
  }

  /// Succeeded, and recorded under the name `unit` resolves to now.
  pub fn is_succeeded_for(&self, unit: &ProvisioningUnit) -> bool {
    self.is_succeeded() && self.name == unit.name
  }
}

/// Records terminal unit outcomes so repeated runs are idempotent.
///
/// Entries are namespaced by plan scope (the resource-group name), so plans
/// for different projects or environments can share one store.
#[async_trait]
pub trait StateStore: Send + Sync {
  async fn get(&self, scope: &str, id: &UnitId) -> Result<Option<StoredUnit>, StateError>;

  async fn record(&self, scope: &str, id: &UnitId, entry: StoredUnit) -> Result<(), StateError>;

  async fn remove(&self, scope: &str, id: &UnitId) -> Result<(), StateError>;

  /// Every entry recorded under `scope`.
  async fn entries(&self, scope: &str) -> Result<BTreeMap<UnitId, StoredUnit>, StateError>;
}
