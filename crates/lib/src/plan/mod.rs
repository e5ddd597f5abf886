//! Staged execution plans.
//!
//! A [`Plan`] layers the provisioning graph into stages: every unit sits in
//! the first stage after all of its dependencies. Units inside a stage are
//! independent of each other and may run concurrently.

mod diff;

pub use diff::{Orphan, PlanDiff, Renamed, diff};

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use serde::Serialize;
use tracing::{debug, info};

use crate::graph::{GraphError, ProvisioningGraph, ProvisioningUnit, UnitId};

/// A set of mutually independent units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
  pub index: usize,
  pub units: Vec<UnitId>,
}

/// Ordered stages plus the units they reference.
#[derive(Debug, Clone)]
pub struct Plan {
  scope: String,
  stages: Vec<Stage>,
  units: BTreeMap<UnitId, ProvisioningUnit>,
  stage_of: HashMap<UnitId, usize>,
}

/// Compute the staged plan for a graph.
///
/// Within a stage, units are ordered by (unit type ordinal, logical name, id),
/// so the same graph always yields the same plan.
///
/// # Errors
///
/// Returns [`GraphError::Cycle`] if no unit is ready while some remain.
pub fn plan(graph: &ProvisioningGraph) -> Result<Plan, GraphError> {
  let dag = graph.petgraph();

  let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
  for idx in dag.node_indices() {
    in_degree.insert(idx, dag.neighbors_directed(idx, Direction::Incoming).count());
  }

  let mut remaining: HashSet<NodeIndex> = dag.node_indices().collect();
  let mut stages = Vec::new();

  while !remaining.is_empty() {
    let ready: Vec<NodeIndex> = remaining.iter().filter(|&&idx| in_degree[&idx] == 0).copied().collect();

    if ready.is_empty() {
      let mut units: Vec<UnitId> = remaining.iter().map(|&idx| dag[idx].clone()).collect();
      units.sort();
      return Err(GraphError::Cycle { units });
    }

    for &idx in &ready {
      remaining.remove(&idx);
      for neighbor in dag.neighbors_directed(idx, Direction::Outgoing) {
        if let Some(deg) = in_degree.get_mut(&neighbor) {
          *deg = deg.saturating_sub(1);
        }
      }
    }

    let mut members: Vec<&ProvisioningUnit> = ready.iter().filter_map(|&idx| graph.unit(&dag[idx])).collect();
    members.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let index = stages.len();
    debug!(stage = index, units = members.len(), "planned stage");
    stages.push(Stage {
      index,
      units: members.into_iter().map(|u| u.id.clone()).collect(),
    });
  }

  let units = graph.units().map(|u| (u.id.clone(), u.clone())).collect();
  let plan = Plan::from_parts(graph.scope().to_string(), stages, units);
  info!(stages = plan.stages.len(), units = plan.len(), "computed execution plan");
  Ok(plan)
}

impl Plan {
  fn from_parts(scope: String, stages: Vec<Stage>, units: BTreeMap<UnitId, ProvisioningUnit>) -> Self {
    let stage_of = stages
      .iter()
      .flat_map(|stage| stage.units.iter().map(move |id| (id.clone(), stage.index)))
      .collect();
    Self {
      scope,
      stages,
      units,
      stage_of,
    }
  }

  pub fn scope(&self) -> &str {
    &self.scope
  }

  pub fn stages(&self) -> &[Stage] {
    &self.stages
  }

  /// Stages in teardown order.
  pub fn reversed_stages(&self) -> impl Iterator<Item = &Stage> {
    self.stages.iter().rev()
  }

  pub fn len(&self) -> usize {
    self.units.len()
  }

  pub fn is_empty(&self) -> bool {
    self.units.is_empty()
  }

  pub fn unit(&self, id: &UnitId) -> Option<&ProvisioningUnit> {
    self.units.get(id)
  }

  pub fn units(&self) -> impl Iterator<Item = &ProvisioningUnit> {
    self.units.values()
  }

  pub fn stage_of(&self, id: &UnitId) -> Option<usize> {
    self.stage_of.get(id).copied()
  }

  /// Units that directly depend on `id`.
  pub fn dependents_of(&self, id: &UnitId) -> Vec<&UnitId> {
    self
      .units
      .values()
      .filter(|u| u.dependencies.contains(id))
      .map(|u| &u.id)
      .collect()
  }

  /// Units in execution order, stage by stage.
  pub fn ordered_units(&self) -> impl Iterator<Item = &ProvisioningUnit> {
    self
      .stages
      .iter()
      .flat_map(|stage| stage.units.iter())
      .filter_map(|id| self.units.get(id))
  }

  /// A plan restricted to `targets` and everything that depends on them.
  ///
  /// Used to retry a failed subtree: dependencies outside the subtree are
  /// assumed to be in place already. Stages keep their relative order and are
  /// renumbered from zero.
  pub fn subplan<'a>(&self, targets: impl IntoIterator<Item = &'a UnitId>) -> Plan {
    let mut keep: BTreeSet<UnitId> = BTreeSet::new();
    let mut queue: Vec<UnitId> = targets.into_iter().filter(|id| self.units.contains_key(*id)).cloned().collect();
    while let Some(id) = queue.pop() {
      if keep.insert(id.clone()) {
        queue.extend(self.dependents_of(&id).into_iter().cloned());
      }
    }

    let stages: Vec<Stage> = self
      .stages
      .iter()
      .map(|stage| stage.units.iter().filter(|id| keep.contains(*id)).cloned().collect::<Vec<_>>())
      .filter(|units| !units.is_empty())
      .enumerate()
      .map(|(index, units)| Stage { index, units })
      .collect();

    let units = self
      .units
      .iter()
      .filter(|(id, _)| keep.contains(*id))
      .map(|(id, unit)| (id.clone(), unit.clone()))
      .collect();

    Plan::from_parts(self.scope.clone(), stages, units)
  }
}
