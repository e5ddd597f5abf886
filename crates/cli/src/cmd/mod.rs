mod apply;
mod destroy;
mod plan;
mod validate;

pub use apply::cmd_apply;
pub use destroy::cmd_destroy;
pub use plan::cmd_plan;
pub use validate::cmd_validate;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use infraplan_lib::backend::{FileStateStore, MemoryStateStore, SimulatedBackend, StateStore};
use infraplan_lib::execute::{CancelSignal, Collaborators, cancellation};
use infraplan_lib::pipeline::{Prepared, prepare};
use infraplan_lib::settings::Settings;

use crate::output::print_warning;

/// Load settings and prepare the manifest at `file`.
fn load(file: &Path, config: Option<&Path>) -> Result<(Settings, Prepared)> {
  let settings = Settings::load(config).context("Failed to load settings")?;

  let raw = std::fs::read_to_string(file).with_context(|| format!("Failed to read manifest: {}", file.display()))?;
  let prepared = prepare(&raw, &settings.naming_table())
    .with_context(|| format!("Failed to prepare manifest: {}", file.display()))?;

  for warning in &prepared.warnings {
    print_warning(&warning.to_string());
  }

  Ok((settings, prepared))
}

/// Simulated backend plus the state store named on the command line.
fn simulated_collaborators(simulate: bool, state: Option<&Path>) -> Result<Collaborators> {
  if !simulate {
    bail!("no cloud backend is configured; pass --simulate to run against the simulated backend");
  }

  let state: Arc<dyn StateStore> = match state {
    Some(path) => {
      debug!(path = %path.display(), "using file state store");
      Arc::new(FileStateStore::new(path))
    }
    None => Arc::new(MemoryStateStore::new()),
  };

  Ok(Collaborators::new(Arc::new(SimulatedBackend::new()), state))
}

/// A cancellation signal that fires on Ctrl-C.
///
/// Must be called from inside a tokio runtime.
fn interrupt_signal() -> CancelSignal {
  let (handle, signal) = cancellation();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupted, letting in-flight units finish");
      handle.cancel();
    }
  });
  signal
}
