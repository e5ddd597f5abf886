//! File-backed state store.
//!
//! # Storage Layout
//!
//! ```text
//! <path>          # StateDocument: version + per-scope unit entries
//! <path>.tmp      # written first, then renamed over <path>
//! ```

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{StateError, StateStore, StoredUnit};
use crate::graph::UnitId;

const STATE_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
  version: u32,
  scopes: BTreeMap<String, BTreeMap<UnitId, StoredUnit>>,
}

impl Default for StateDocument {
  fn default() -> Self {
    Self {
      version: STATE_VERSION,
      scopes: BTreeMap::new(),
    }
  }
}

/// A [`StateStore`] persisted as one JSON document.
///
/// Every write rewrites the document atomically (temp file + rename). Writes
/// are serialized through a lock, so one store instance may be shared by all
/// tasks of a run. Concurrent processes are not coordinated.
#[derive(Debug)]
pub struct FileStateStore {
  path: PathBuf,
  lock: Mutex<()>,
}

impl FileStateStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      lock: Mutex::new(()),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  async fn load(&self) -> Result<StateDocument, StateError> {
    let content = match tokio::fs::read_to_string(&self.path).await {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StateDocument::default()),
      Err(e) => return Err(StateError::Read(e)),
    };

    let document: StateDocument = serde_json::from_str(&content).map_err(StateError::Parse)?;
    if document.version != STATE_VERSION {
      return Err(StateError::UnsupportedVersion(document.version));
    }
    Ok(document)
  }

  async fn save(&self, document: &StateDocument) -> Result<(), StateError> {
    if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
      tokio::fs::create_dir_all(parent).await.map_err(StateError::Write)?;
    }

    let mut temp = self.path.clone().into_os_string();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    let content = serde_json::to_string_pretty(document).map_err(StateError::Serialize)?;
    tokio::fs::write(&temp, content).await.map_err(StateError::Write)?;
    tokio::fs::rename(&temp, &self.path).await.map_err(StateError::Write)?;

    debug!(path = %self.path.display(), scopes = document.scopes.len(), "saved state");
    Ok(())
  }
}

#[async_trait]
impl StateStore for FileStateStore {
  async fn get(&self, scope: &str, id: &UnitId) -> Result<Option<StoredUnit>, StateError> {
    let _guard = self.lock.lock().await;
    Ok(self.load().await?.scopes.remove(scope).and_then(|mut units| units.remove(id)))
  }

  async fn record(&self, scope: &str, id: &UnitId, entry: StoredUnit) -> Result<(), StateError> {
    let _guard = self.lock.lock().await;
    let mut document = self.load().await?;
    document.scopes.entry(scope.to_string()).or_default().insert(id.clone(), entry);
    self.save(&document).await
  }

  async fn remove(&self, scope: &str, id: &UnitId) -> Result<(), StateError> {
    let _guard = self.lock.lock().await;
    let mut document = self.load().await?;
    let Some(units) = document.scopes.get_mut(scope) else {
      return Ok(());
    };
    if units.remove(id).is_some() {
      if units.is_empty() {
        document.scopes.remove(scope);
      }
      self.save(&document).await?;
    }
    Ok(())
  }

  async fn entries(&self, scope: &str) -> Result<BTreeMap<UnitId, StoredUnit>, StateError> {
    let _guard = self.lock.lock().await;
    Ok(self.load().await?.scopes.remove(scope).unwrap_or_default())
  }
}
