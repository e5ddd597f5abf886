//! Provisioning units: the nodes of the dependency graph.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::manifest::{ResourceConfig, ResourceType};

/// Stable, human-readable identifier of a provisioning unit.
///
/// Identifiers are derived from manifest content only, so the same manifest
/// always yields the same ids and a state store can be keyed by them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub String);

impl UnitId {
  pub fn resource_group() -> Self {
    UnitId("resource_group".to_string())
  }

  pub fn resource(resource_type: ResourceType, logical_name: &str) -> Self {
    UnitId(format!("resource:{resource_type}/{logical_name}"))
  }

  pub fn group(suffix: &str) -> Self {
    UnitId(format!("group:{suffix}"))
  }

  pub fn secret(resource_type: ResourceType, logical_name: &str, secret: &str) -> Self {
    UnitId(format!("secret:{resource_type}/{logical_name}/{secret}"))
  }

  pub fn role_assignment(principal: &UnitId, scope: &UnitId, role: &str) -> Self {
    UnitId(format!("rbac:{principal}>{scope}[{role}]"))
  }

  pub fn access_review(suffix: &str) -> Self {
    UnitId(format!("review:{suffix}"))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for UnitId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Coarse classification of units, used to select wiring rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitClass {
  ResourceGroup,
  Resource,
  SecurityGroup,
  Secret,
  RoleAssignment,
  AccessReview,
}

/// What a unit provisions.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitKind {
  /// The scope root every other unit lives in.
  ResourceGroup,

  Resource {
    resource_type: ResourceType,
    logical_name: String,
    config: ResourceConfig,
  },

  SecurityGroup {
    suffix: String,
  },

  /// Secret material captured from `producer` and written to `store`.
  Secret {
    producer: UnitId,
    store: UnitId,
    secret: String,
  },

  RoleAssignment {
    principal: UnitId,
    scope: UnitId,
    role: String,
  },

  AccessReview {
    group: UnitId,
  },
}

impl UnitKind {
  pub fn class(&self) -> UnitClass {
    match self {
      UnitKind::ResourceGroup => UnitClass::ResourceGroup,
      UnitKind::Resource { .. } => UnitClass::Resource,
      UnitKind::SecurityGroup { .. } => UnitClass::SecurityGroup,
      UnitKind::Secret { .. } => UnitClass::Secret,
      UnitKind::RoleAssignment { .. } => UnitClass::RoleAssignment,
      UnitKind::AccessReview { .. } => UnitClass::AccessReview,
    }
  }

  /// Ordinal used to order units within a plan stage: the scope root, then
  /// resources in resource-type order, then the synthetic kinds.
  pub fn type_ordinal(&self) -> u8 {
    let synthetic_base = ResourceType::ALL.len() as u8 + 1;
    match self {
      UnitKind::ResourceGroup => 0,
      UnitKind::Resource { resource_type, .. } => 1 + resource_type.ordinal(),
      UnitKind::SecurityGroup { .. } => synthetic_base,
      UnitKind::Secret { .. } => synthetic_base + 1,
      UnitKind::RoleAssignment { .. } => synthetic_base + 2,
      UnitKind::AccessReview { .. } => synthetic_base + 3,
    }
  }

  pub fn resource_type(&self) -> Option<ResourceType> {
    match self {
      UnitKind::Resource { resource_type, .. } => Some(*resource_type),
      _ => None,
    }
  }
}

/// One schedulable node of work.
///
/// Units are immutable once the graph is built; run-time status is tracked by
/// the orchestrator, keyed by [`UnitId`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningUnit {
  pub id: UnitId,

  /// The resolved cloud-side name.
  pub name: String,

  pub kind: UnitKind,

  /// Resource-group name the unit is created in.
  pub scope: String,

  pub location: String,

  pub tags: BTreeMap<String, String>,

  /// Position of the originating resource in the manifest, if any.
  pub origin: Option<usize>,

  pub dependencies: BTreeSet<UnitId>,
}

impl ProvisioningUnit {
  /// The name used to break ordering ties: the manifest's logical name for
  /// resources, the resolved name for synthetic units.
  pub fn logical_name(&self) -> &str {
    match &self.kind {
      UnitKind::Resource { logical_name, .. } => logical_name,
      UnitKind::SecurityGroup { suffix } => suffix,
      _ => &self.name,
    }
  }

  pub fn sort_key(&self) -> (u8, &str, &UnitId) {
    (self.kind.type_ordinal(), self.logical_name(), &self.id)
  }
}
