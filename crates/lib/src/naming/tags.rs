//! Tag merging.

use std::collections::BTreeMap;

use crate::consts::MANAGED_BY;
use crate::manifest::ProjectMetadata;

/// Keys owned by the engine. Custom tags cannot override them.
pub const SYSTEM_TAGS: [&str; 6] = ["Project", "Environment", "BusinessUnit", "CostCenter", "Owner", "ManagedBy"];

/// Merge custom tags with the system tags derived from project metadata.
///
/// System tags always win over custom tags with the same key.
pub fn merge_tags(metadata: &ProjectMetadata) -> BTreeMap<String, String> {
  let mut tags = metadata.tags.clone();
  let system = [
    metadata.project_name.as_str(),
    metadata.environment.as_str(),
    metadata.business_unit.as_str(),
    metadata.cost_center.as_str(),
    metadata.owner_email.as_str(),
    MANAGED_BY,
  ];
  for (key, value) in SYSTEM_TAGS.into_iter().zip(system) {
    tags.insert(key.to_string(), value.to_string());
  }
  tags
}
