use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{StateError, StateStore, StoredUnit};
use crate::graph::UnitId;

/// A [`StateStore`] that lives for the duration of the process.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
  scopes: RwLock<HashMap<String, BTreeMap<UnitId, StoredUnit>>>,
}

impl MemoryStateStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Pre-populate entries under `scope`, e.g. to resume an earlier run.
  pub fn with_entries(scope: &str, entries: impl IntoIterator<Item = (UnitId, StoredUnit)>) -> Self {
    let mut scopes = HashMap::new();
    scopes.insert(scope.to_string(), entries.into_iter().collect());
    Self {
      scopes: RwLock::new(scopes),
    }
  }

  pub async fn snapshot(&self, scope: &str) -> BTreeMap<UnitId, StoredUnit> {
    self.scopes.read().await.get(scope).cloned().unwrap_or_default()
  }
}

#[async_trait]
impl StateStore for MemoryStateStore {
  async fn get(&self, scope: &str, id: &UnitId) -> Result<Option<StoredUnit>, StateError> {
    Ok(self.scopes.read().await.get(scope).and_then(|units| units.get(id)).cloned())
  }

  async fn record(&self, scope: &str, id: &UnitId, entry: StoredUnit) -> Result<(), StateError> {
    self
      .scopes
      .write()
      .await
      .entry(scope.to_string())
      .or_default()
      .insert(id.clone(), entry);
    Ok(())
  }

  async fn remove(&self, scope: &str, id: &UnitId) -> Result<(), StateError> {
    let mut scopes = self.scopes.write().await;
    if let Some(units) = scopes.get_mut(scope) {
      units.remove(id);
      if units.is_empty() {
        scopes.remove(scope);
      }
    }
    Ok(())
  }

  async fn entries(&self, scope: &str) -> Result<BTreeMap<UnitId, StoredUnit>, StateError> {
    Ok(self.snapshot(scope).await)
  }
}
