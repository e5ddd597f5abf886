//! The result document assembled after an apply.
//!
//! Only units that reached `Succeeded` contribute. The document is keyed by
//! manifest-level names (`type/name` for resources, the suffix for security
//! groups) so callers can look things up without knowing generated names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backend::UnitOutputs;
use crate::graph::{UnitId, UnitKind};
use crate::plan::Plan;

/// Identity and reachability of one provisioned resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOutput {
  pub name: String,
  pub id: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub endpoint: Option<String>,
}

/// Outputs of an apply, grouped by what they describe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultManifest {
  /// Name of the resource group every unit lives in.
  pub resource_group: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub resource_group_id: Option<String>,

  /// Keyed by `type/logical_name`.
  pub resources: BTreeMap<String, ResourceOutput>,

  /// Generated group names keyed by suffix (`admins`, `readers`, ...).
  pub security_groups: BTreeMap<String, String>,

  /// Generated secret names keyed by unit id.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub secrets: BTreeMap<UnitId, String>,
}

impl ResultManifest {
  /// Assemble the document from a plan and the outputs of its succeeded units.
  pub fn collect(plan: &Plan, outputs: &BTreeMap<UnitId, UnitOutputs>) -> Self {
    let mut result = ResultManifest {
      resource_group: plan.scope().to_string(),
      ..Default::default()
    };

    for unit in plan.ordered_units() {
      let Some(out) = outputs.get(&unit.id) else {
        continue;
      };
      match &unit.kind {
        UnitKind::ResourceGroup => result.resource_group_id = Some(out.id.clone()),
        UnitKind::Resource {
          resource_type,
          logical_name,
          ..
        } => {
          result.resources.insert(
            format!("{resource_type}/{logical_name}"),
            ResourceOutput {
              name: unit.name.clone(),
              id: out.id.clone(),
              endpoint: out.endpoint.clone(),
            },
          );
        }
        UnitKind::SecurityGroup { suffix } => {
          result.security_groups.insert(suffix.clone(), unit.name.clone());
        }
        UnitKind::Secret { .. } => {
          result.secrets.insert(unit.id.clone(), unit.name.clone());
        }
        UnitKind::RoleAssignment { .. } | UnitKind::AccessReview { .. } => {}
      }
    }

    result
  }

  /// Look up a resource by its manifest reference (`type/name`).
  pub fn resource(&self, reference: &str) -> Option<&ResourceOutput> {
    self.resources.get(reference)
  }

  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::GraphBuilder;
  use crate::manifest::parse_manifest;
  use crate::naming::NamingTable;

  fn plan() -> Plan {
    let raw = "metadata:\n  project_name: myapp\n  environment: dev\n  business_unit: eng\n  cost_center: CC-1\n  owner_email: o@example.com\nresources:\n  - type: keyvault\n    name: secrets\n  - type: postgresql\n    name: maindb\n";
    let manifest = parse_manifest(raw).unwrap().manifest;
    let graph = GraphBuilder::new(&NamingTable::standard()).build(&manifest).unwrap();
    crate::plan::plan(&graph).unwrap()
  }

  fn outputs_for_all(plan: &Plan) -> BTreeMap<UnitId, UnitOutputs> {
    plan
      .units()
      .map(|u| {
        (
          u.id.clone(),
          UnitOutputs {
            id: format!("id-{}", u.name),
            endpoint: u.kind.resource_type().map(|_| format!("{}.example.net", u.name)),
            ..Default::default()
          },
        )
      })
      .collect()
  }

  #[test]
  fn collects_resources_groups_and_secrets() {
    let plan = plan();
    let result = ResultManifest::collect(&plan, &outputs_for_all(&plan));

    assert_eq!(result.resource_group, "rg-myapp-dev");
    assert_eq!(result.resource_group_id.as_deref(), Some("id-rg-myapp-dev"));

    let db = result.resource("postgresql/maindb").unwrap();
    assert_eq!(db.name, "psql-myapp-maindb-dev");
    assert_eq!(db.endpoint.as_deref(), Some("psql-myapp-maindb-dev.example.net"));

    assert_eq!(result.security_groups.get("admins").map(String::as_str), Some("sg-myapp-admins-dev"));
    assert_eq!(result.secrets.len(), 2);
  }

  #[test]
  fn units_without_outputs_are_left_out() {
    let plan = plan();
    let mut outputs = outputs_for_all(&plan);
    outputs.remove(&UnitId::resource(crate::manifest::ResourceType::PostgreSql, "maindb"));

    let result = ResultManifest::collect(&plan, &outputs);
    assert!(result.resource("postgresql/maindb").is_none());
    assert!(result.resource("keyvault/secrets").is_some());
  }

  #[test]
  fn serializes_as_json() {
    let plan = plan();
    let json = ResultManifest::collect(&plan, &outputs_for_all(&plan)).to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["resources"]["keyvault/secrets"]["name"], "kv-myapp-secrets-d");
  }
}
