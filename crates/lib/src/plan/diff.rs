//! Compare a plan against what a state store recorded for its scope.

use serde::Serialize;
use tracing::debug;

use super::Plan;
use crate::backend::{StateError, StateStore};
use crate::graph::UnitId;

/// A unit present in state under a different cloud-side name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Renamed {
  pub id: UnitId,
  pub recorded: String,
  pub planned: String,
}

/// A state entry the plan no longer contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Orphan {
  pub id: UnitId,
  pub name: String,
}

/// What an apply of the plan would do relative to recorded state.
///
/// `added` and `unchanged` follow execution order; `orphaned` is sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanDiff {
  /// Units with no successful entry. Failed entries land here too.
  pub added: Vec<UnitId>,
  /// Units recorded as succeeded under the name they resolve to now.
  pub unchanged: Vec<UnitId>,
  /// Units recorded as succeeded under another name; apply creates them anew.
  pub renamed: Vec<Renamed>,
  /// Entries with no counterpart in the plan. Apply leaves them alone.
  pub orphaned: Vec<Orphan>,
}

impl PlanDiff {
  pub fn is_empty(&self) -> bool {
    self.added.is_empty() && self.renamed.is_empty() && self.orphaned.is_empty()
  }
}

/// Diff `plan` against the entries `state` holds for the plan's scope.
///
/// # Errors
///
/// Returns the store's [`StateError`] if its entries cannot be read.
pub async fn diff(plan: &Plan, state: &dyn StateStore) -> Result<PlanDiff, StateError> {
  let mut recorded = state.entries(plan.scope()).await?;
  let mut result = PlanDiff::default();

  for unit in plan.ordered_units() {
    match recorded.remove(&unit.id) {
      Some(entry) if entry.is_succeeded_for(unit) => result.unchanged.push(unit.id.clone()),
      Some(entry) if entry.is_succeeded() => result.renamed.push(Renamed {
        id: unit.id.clone(),
        recorded: entry.name,
        planned: unit.name.clone(),
      }),
      _ => result.added.push(unit.id.clone()),
    }
  }

  result.orphaned = recorded
    .into_iter()
    .filter(|(_, entry)| entry.is_succeeded())
    .map(|(id, entry)| Orphan { id, name: entry.name })
    .collect();

  debug!(
    scope = plan.scope(),
    added = result.added.len(),
    unchanged = result.unchanged.len(),
    renamed = result.renamed.len(),
    orphaned = result.orphaned.len(),
    "diffed plan against state"
  );
  Ok(result)
}
