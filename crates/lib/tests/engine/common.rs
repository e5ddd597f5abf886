//! Shared test helpers for engine integration tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use infraplan_lib::backend::{
  MemoryStateStore, ProvisionError, ProvisioningBackend, RemoteStatus, StateStore, UnitOutputs,
};
use infraplan_lib::execute::{Collaborators, ExecuteConfig, RetryPolicy};
use infraplan_lib::graph::{ProvisioningUnit, UnitId};
use infraplan_lib::naming::NamingTable;
use infraplan_lib::pipeline::{Prepared, prepare};
use infraplan_lib::plan::Plan;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Read fixture content.
pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

pub fn prepare_fixture(name: &str) -> Prepared {
  prepare(&fixture_content(name), &NamingTable::standard()).unwrap()
}

pub fn test_config() -> ExecuteConfig {
  ExecuteConfig {
    max_concurrency: 4,
    probe_existing: false,
    retry: RetryPolicy::immediate(3),
  }
}

/// Every unit `id` depends on, directly or transitively.
pub fn transitive_dependencies(plan: &Plan, id: &UnitId) -> BTreeSet<UnitId> {
  let mut seen = BTreeSet::new();
  let mut queue = vec![id.clone()];
  while let Some(current) = queue.pop() {
    if let Some(unit) = plan.unit(&current) {
      for dep in &unit.dependencies {
        if seen.insert(dep.clone()) {
          queue.push(dep.clone());
        }
      }
    }
  }
  seen
}

/// A backend that records every call and fails listed units permanently.
#[derive(Default)]
pub struct RecordingBackend {
  rejected: HashSet<UnitId>,
  pub creates: Mutex<Vec<UnitId>>,
  pub destroys: Mutex<Vec<UnitId>>,
  existing: Mutex<HashMap<UnitId, UnitOutputs>>,
}

impl RecordingBackend {
  pub fn rejecting(ids: impl IntoIterator<Item = UnitId>) -> Self {
    Self {
      rejected: ids.into_iter().collect(),
      ..Default::default()
    }
  }

  pub fn creates(&self) -> Vec<UnitId> {
    self.creates.lock().unwrap().clone()
  }

  pub fn destroys(&self) -> Vec<UnitId> {
    self.destroys.lock().unwrap().clone()
  }
}

#[async_trait]
impl ProvisioningBackend for RecordingBackend {
  async fn create(&self, unit: &ProvisioningUnit) -> Result<UnitOutputs, ProvisionError> {
    self.creates.lock().unwrap().push(unit.id.clone());
    if self.rejected.contains(&unit.id) {
      return Err(ProvisionError::Rejected(format!("{} violates policy", unit.name)));
    }
    let outputs = UnitOutputs {
      id: format!("/test/{}", unit.name),
      endpoint: unit.kind.resource_type().map(|_| format!("{}.test", unit.name)),
      ..Default::default()
    };
    self.existing.lock().unwrap().insert(unit.id.clone(), outputs.clone());
    Ok(outputs)
  }

  async fn status(&self, unit: &ProvisioningUnit) -> Result<RemoteStatus, ProvisionError> {
    Ok(match self.existing.lock().unwrap().get(&unit.id) {
      Some(outputs) => RemoteStatus::Present(outputs.clone()),
      None => RemoteStatus::Absent,
    })
  }

  async fn destroy(&self, unit: &ProvisioningUnit) -> Result<(), ProvisionError> {
    self.destroys.lock().unwrap().push(unit.id.clone());
    match self.existing.lock().unwrap().remove(&unit.id) {
      Some(_) => Ok(()),
      None => Err(ProvisionError::NotFound(unit.name.clone())),
    }
  }
}

pub fn collaborators(backend: &Arc<RecordingBackend>, state: Arc<dyn StateStore>) -> Collaborators {
  Collaborators::new(backend.clone(), state)
}

pub fn memory_state() -> Arc<MemoryStateStore> {
  Arc::new(MemoryStateStore::new())
}
