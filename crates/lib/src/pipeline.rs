//! Manifest text to execution plan in one call.
//!
//! Everything here is synchronous and side-effect free: a manifest that fails
//! any step never reaches a backend.

use thiserror::Error;
use tracing::{info, warn};

use crate::graph::{GraphBuilder, GraphError, ProvisioningGraph};
use crate::manifest::{Manifest, ValidationErrors, ValidationWarning, parse_manifest};
use crate::naming::NamingTable;
use crate::plan::{Plan, plan};

#[derive(Debug, Error)]
pub enum PrepareError {
  #[error(transparent)]
  Validation(#[from] ValidationErrors),

  /// Unresolved references, cycles, name collisions and naming failures.
  #[error(transparent)]
  Graph(#[from] GraphError),
}

/// A validated manifest with its graph and plan.
#[derive(Debug, Clone)]
pub struct Prepared {
  pub manifest: Manifest,
  pub warnings: Vec<ValidationWarning>,
  pub graph: ProvisioningGraph,
  pub plan: Plan,
}

/// Parse, name, wire and plan a raw YAML manifest.
///
/// # Errors
///
/// Returns [`PrepareError::Validation`] with every validation error found, or
/// [`PrepareError::Graph`] for the first graph error.
pub fn prepare(raw: &str, naming: &NamingTable) -> Result<Prepared, PrepareError> {
  let parsed = parse_manifest(raw)?;
  for warning in &parsed.warnings {
    warn!(position = warning.position, "{}", warning.message);
  }

  let graph = GraphBuilder::new(naming).build(&parsed.manifest)?;
  let plan = plan(&graph)?;

  info!(
    project = %parsed.manifest.metadata.project_name,
    environment = %parsed.manifest.environment(),
    units = plan.len(),
    stages = plan.stages().len(),
    "prepared manifest"
  );

  Ok(Prepared {
    manifest: parsed.manifest,
    warnings: parsed.warnings,
    graph,
    plan,
  })
}
