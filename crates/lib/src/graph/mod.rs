//! Dependency graph of provisioning units.
//!
//! The [`GraphBuilder`] expands a validated manifest into provisioning units
//! (the resource group, resources, security groups, secrets, role assignments
//! and access reviews), then wires them with a declarative rule set and checks
//! that the result is acyclic.

pub mod rules;
mod unit;

use std::collections::{BTreeMap, HashMap};

use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::STANDARD_GROUPS;
use crate::manifest::{Manifest, ResourceSpec, ResourceType};
use crate::naming::{NamedKind, NamingError, NamingTable, merge_tags, role_assignment_name};

pub use rules::{DEFAULT_RULES, DependencySelector, ResourceProfile, WiringRule, profile};
pub use unit::{ProvisioningUnit, UnitClass, UnitId, UnitKind};

/// Errors raised while building the graph. All of them are fatal and occur
/// before anything is provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("{from} references unknown {reference}")]
  UnresolvedReference { from: UnitId, reference: String },

  #[error("dependency cycle detected among: {}", display_units(.units))]
  Cycle { units: Vec<UnitId> },

  #[error("{first} and {second} both resolve to the name '{name}'")]
  NameCollision { name: String, first: UnitId, second: UnitId },

  #[error("naming failed for {unit}: {source}")]
  Naming {
    unit: String,
    #[source]
    source: NamingError,
  },
}

fn display_units(units: &[UnitId]) -> String {
  units.iter().map(UnitId::as_str).collect::<Vec<_>>().join(", ")
}

/// An acyclic graph of provisioning units.
///
/// Edges point from a dependency to its dependent.
#[derive(Debug, Clone)]
pub struct ProvisioningGraph {
  graph: DiGraph<UnitId, ()>,
  nodes: HashMap<UnitId, NodeIndex>,
  units: BTreeMap<UnitId, ProvisioningUnit>,
  scope: String,
}

impl ProvisioningGraph {
  /// Resource-group name every unit lives in.
  pub fn scope(&self) -> &str {
    &self.scope
  }

  pub fn len(&self) -> usize {
    self.units.len()
  }

  pub fn is_empty(&self) -> bool {
    self.units.is_empty()
  }

  pub fn edge_count(&self) -> usize {
    self.graph.edge_count()
  }

  pub fn unit(&self, id: &UnitId) -> Option<&ProvisioningUnit> {
    self.units.get(id)
  }

  pub fn units(&self) -> impl Iterator<Item = &ProvisioningUnit> {
    self.units.values()
  }

  /// Direct dependencies of a unit.
  pub fn dependencies(&self, id: &UnitId) -> Vec<&UnitId> {
    self.neighbors(id, Direction::Incoming)
  }

  /// Units that directly depend on `id`.
  pub fn dependents(&self, id: &UnitId) -> Vec<&UnitId> {
    self.neighbors(id, Direction::Outgoing)
  }

  fn neighbors(&self, id: &UnitId, direction: Direction) -> Vec<&UnitId> {
    let Some(&idx) = self.nodes.get(id) else {
      return Vec::new();
    };
    self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| &self.graph[n])
      .collect()
  }

  pub(crate) fn petgraph(&self) -> &DiGraph<UnitId, ()> {
    &self.graph
  }
}

/// Expands manifests into provisioning graphs.
pub struct GraphBuilder<'a> {
  naming: &'a NamingTable,
  rules: &'a [WiringRule],
}

impl<'a> GraphBuilder<'a> {
  pub fn new(naming: &'a NamingTable) -> Self {
    Self {
      naming,
      rules: DEFAULT_RULES,
    }
  }

  /// Use a custom wiring rule set instead of [`DEFAULT_RULES`].
  pub fn with_rules(mut self, rules: &'a [WiringRule]) -> Self {
    self.rules = rules;
    self
  }

  /// Build the graph for a manifest.
  ///
  /// # Errors
  ///
  /// Returns a [`GraphError`] if a name cannot be resolved, two units share a
  /// name, a reference points at nothing, or the wiring is cyclic.
  pub fn build(&self, manifest: &Manifest) -> Result<ProvisioningGraph, GraphError> {
    let mut expansion = Expansion::new(self.naming, manifest)?;
    expansion.add_resources()?;
    expansion.add_security_groups()?;
    expansion.add_secrets()?;
    expansion.add_role_assignments()?;
    expansion.add_access_reviews();
    expansion.check_name_collisions()?;

    let Expansion {
      mut units,
      declared,
      stored_secrets,
      scope,
      ..
    } = expansion;

    let root = UnitId::resource_group();
    let mut edges: Vec<(UnitId, UnitId)> = Vec::new();
    for unit in units.values() {
      let class = unit.kind.class();
      for rule in self.rules.iter().filter(|r| r.applies(class)) {
        let selected = select(rule.dependency, unit, &root, &declared, &stored_secrets);
        for dependency in selected {
          if !units.contains_key(&dependency) {
            return Err(GraphError::UnresolvedReference {
              from: unit.id.clone(),
              reference: dependency.to_string(),
            });
          }
          debug!(rule = rule.name, from = %dependency, to = %unit.id, "wiring");
          edges.push((dependency, unit.id.clone()));
        }
      }
    }

    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();
    for id in units.keys() {
      nodes.insert(id.clone(), graph.add_node(id.clone()));
    }
    for (dependency, dependent) in edges {
      if let Some(unit) = units.get_mut(&dependent)
        && unit.dependencies.insert(dependency.clone())
      {
        graph.add_edge(nodes[&dependency], nodes[&dependent], ());
      }
    }

    let graph = ProvisioningGraph {
      graph,
      nodes,
      units,
      scope,
    };
    verify_acyclic(&graph)?;

    info!(
      units = graph.len(),
      edges = graph.edge_count(),
      scope = %graph.scope,
      "built provisioning graph"
    );
    Ok(graph)
  }
}

fn select(
  selector: DependencySelector,
  unit: &ProvisioningUnit,
  root: &UnitId,
  declared: &HashMap<UnitId, Vec<UnitId>>,
  stored_secrets: &HashMap<UnitId, Vec<UnitId>>,
) -> Vec<UnitId> {
  match (selector, &unit.kind) {
    (DependencySelector::ScopeRoot, _) if &unit.id != root => vec![root.clone()],
    (DependencySelector::SecretProducer, UnitKind::Secret { producer, .. }) => vec![producer.clone()],
    (DependencySelector::StoredSecrets, UnitKind::Resource { .. }) => {
      stored_secrets.get(&unit.id).cloned().unwrap_or_default()
    }
    (DependencySelector::Principal, UnitKind::RoleAssignment { principal, .. }) => vec![principal.clone()],
    (DependencySelector::GrantScope, UnitKind::RoleAssignment { scope, .. }) => vec![scope.clone()],
    (DependencySelector::ReviewedGroup, UnitKind::AccessReview { group }) => vec![group.clone()],
    (DependencySelector::Declared, _) => declared.get(&unit.id).cloned().unwrap_or_default(),
    _ => Vec::new(),
  }
}

fn verify_acyclic(graph: &ProvisioningGraph) -> Result<(), GraphError> {
  if toposort(&graph.graph, None).is_ok() {
    return Ok(());
  }

  let mut units: Vec<UnitId> = tarjan_scc(&graph.graph)
    .into_iter()
    .find(|component| {
      component.len() > 1 || component.iter().any(|&n| graph.graph.contains_edge(n, n))
    })
    .unwrap_or_default()
    .into_iter()
    .map(|n| graph.graph[n].clone())
    .collect();
  units.sort();
  Err(GraphError::Cycle { units })
}

/// Working state while a manifest is expanded into units.
struct Expansion<'a> {
  naming: &'a NamingTable,
  manifest: &'a Manifest,
  scope: String,
  units: BTreeMap<UnitId, ProvisioningUnit>,
  groups: Vec<String>,
  declared: HashMap<UnitId, Vec<UnitId>>,
  stored_secrets: HashMap<UnitId, Vec<UnitId>>,
}

impl<'a> Expansion<'a> {
  fn new(naming: &'a NamingTable, manifest: &'a Manifest) -> Result<Self, GraphError> {
    let metadata = &manifest.metadata;
    let scope = naming
      .resource_group_name(&metadata.project_name, metadata.environment)
      .map_err(|source| GraphError::Naming {
        unit: UnitId::resource_group().to_string(),
        source,
      })?;

    let mut expansion = Self {
      naming,
      manifest,
      scope: scope.clone(),
      units: BTreeMap::new(),
      groups: Vec::new(),
      declared: HashMap::new(),
      stored_secrets: HashMap::new(),
    };
    expansion.insert(UnitId::resource_group(), scope, UnitKind::ResourceGroup, None);
    Ok(expansion)
  }

  fn insert(&mut self, id: UnitId, name: String, kind: UnitKind, origin: Option<usize>) {
    let unit = ProvisioningUnit {
      id: id.clone(),
      name,
      kind,
      scope: self.scope.clone(),
      location: self.manifest.metadata.location.clone(),
      tags: merge_tags(&self.manifest.metadata),
      origin,
      dependencies: Default::default(),
    };
    self.units.entry(id).or_insert(unit);
  }

  fn resolve(&self, kind: NamedKind, logical_name: &str, unit: &UnitId) -> Result<String, GraphError> {
    let naming_error = |source| GraphError::Naming {
      unit: unit.to_string(),
      source,
    };
    let resolved = self
      .naming
      .resolve(kind, &self.manifest.metadata, logical_name)
      .map_err(naming_error)?;

    if resolved.truncated {
      let distinct =
        self
          .naming
          .check_environment_distinct(kind, &self.manifest.metadata.project_name, logical_name);
      match distinct {
        Err(source) if self.naming.strict_environment_names() => return Err(naming_error(source)),
        Err(source) => warn!(unit = %unit, error = %source, "name does not distinguish environments"),
        Ok(()) => {}
      }
    }
    Ok(resolved.name)
  }

  fn add_resources(&mut self) -> Result<(), GraphError> {
    let manifest = self.manifest;
    for spec in &manifest.resources {
      let id = UnitId::resource(spec.resource_type, &spec.logical_name);
      let name = self.resolve(NamedKind::Resource(spec.resource_type), &spec.logical_name, &id)?;

      let mut declared = Vec::with_capacity(spec.depends_on.len());
      for reference in &spec.depends_on {
        if manifest.find(reference).is_none() {
          return Err(GraphError::UnresolvedReference {
            from: id,
            reference: format!("resource {reference}"),
          });
        }
        declared.push(UnitId::resource(reference.resource_type, &reference.logical_name));
      }
      if !declared.is_empty() {
        self.declared.insert(id.clone(), declared);
      }

      self.insert(
        id,
        name,
        UnitKind::Resource {
          resource_type: spec.resource_type,
          logical_name: spec.logical_name.clone(),
          config: spec.config.clone(),
        },
        Some(spec.index),
      );
    }
    Ok(())
  }

  fn add_security_groups(&mut self) -> Result<(), GraphError> {
    let mut groups: Vec<String> = STANDARD_GROUPS.iter().map(|g| g.to_string()).collect();
    for group in &self.manifest.access.groups {
      if !groups.contains(group) {
        groups.push(group.clone());
      }
    }

    for suffix in &groups {
      let id = UnitId::group(suffix);
      let name = self.resolve(NamedKind::SecurityGroup, suffix, &id)?;
      self.insert(id, name, UnitKind::SecurityGroup { suffix: suffix.clone() }, None);
    }
    self.groups = groups;
    Ok(())
  }

  /// The key vault that stores a resource's secrets, if any.
  fn secret_store(&self, spec: &ResourceSpec) -> Result<Option<UnitId>, GraphError> {
    match &spec.secrets_store {
      Some(vault) => {
        let found = self
          .manifest
          .resources_of(ResourceType::KeyVault)
          .any(|kv| &kv.logical_name == vault);
        if !found {
          return Err(GraphError::UnresolvedReference {
            from: UnitId::resource(spec.resource_type, &spec.logical_name),
            reference: format!("key vault '{vault}'"),
          });
        }
        Ok(Some(UnitId::resource(ResourceType::KeyVault, vault)))
      }
      None => Ok(
        self
          .manifest
          .resources_of(ResourceType::KeyVault)
          .next()
          .map(|kv| UnitId::resource(ResourceType::KeyVault, &kv.logical_name)),
      ),
    }
  }

  fn add_secrets(&mut self) -> Result<(), GraphError> {
    let manifest = self.manifest;
    for spec in &manifest.resources {
      let store = self.secret_store(spec)?;
      let secrets = profile(spec.resource_type).secrets;
      let Some(store) = store else {
        if !secrets.is_empty() {
          debug!(resource = %spec.reference(), "no key vault in manifest, secrets not stored");
        }
        continue;
      };

      let producer = UnitId::resource(spec.resource_type, &spec.logical_name);
      let prefix = self
        .naming
        .rule(NamedKind::Resource(spec.resource_type))
        .map(|r| r.prefix.clone())
        .unwrap_or_default();

      for secret in secrets {
        let id = UnitId::secret(spec.resource_type, &spec.logical_name, secret);
        let name = format!("{prefix}-{}-{secret}", spec.logical_name).to_ascii_lowercase();
        self.stored_secrets.entry(store.clone()).or_default().push(id.clone());
        self.insert(
          id,
          name,
          UnitKind::Secret {
            producer: producer.clone(),
            store: store.clone(),
            secret: secret.to_string(),
          },
          Some(spec.index),
        );
      }
    }
    Ok(())
  }

  fn add_role_assignment(&mut self, principal: UnitId, scope: UnitId, role: &str, origin: Option<usize>) {
    let id = UnitId::role_assignment(&principal, &scope, role);
    let name = role_assignment_name(principal.as_str(), scope.as_str(), role);
    self.insert(
      id,
      name,
      UnitKind::RoleAssignment {
        principal,
        scope,
        role: role.to_string(),
      },
      origin,
    );
  }

  fn add_role_assignments(&mut self) -> Result<(), GraphError> {
    let root = UnitId::resource_group();
    for (group, role) in rules::SCOPE_GRANTS {
      self.add_role_assignment(UnitId::group(group), root.clone(), role, None);
    }

    let manifest = self.manifest;
    let vaults: Vec<UnitId> = manifest
      .resources_of(ResourceType::KeyVault)
      .map(|kv| UnitId::resource(ResourceType::KeyVault, &kv.logical_name))
      .collect();

    for spec in &manifest.resources {
      let target = UnitId::resource(spec.resource_type, &spec.logical_name);
      let resource_profile = profile(spec.resource_type);

      for (group, role) in resource_profile.grants {
        self.add_role_assignment(UnitId::group(group), target.clone(), role, Some(spec.index));
      }

      for grant in &spec.access {
        if !self.groups.contains(&grant.group) {
          return Err(GraphError::UnresolvedReference {
            from: target,
            reference: format!("security group '{}'", grant.group),
          });
        }
        self.add_role_assignment(UnitId::group(&grant.group), target.clone(), &grant.role, Some(spec.index));
      }

      if resource_profile.managed_identity {
        for vault in &vaults {
          self.add_role_assignment(target.clone(), vault.clone(), rules::IDENTITY_VAULT_ROLE, Some(spec.index));
        }
      }
    }
    Ok(())
  }

  fn add_access_reviews(&mut self) {
    if !self.manifest.access.reviews_enabled(self.manifest.environment()) {
      return;
    }
    for suffix in self.groups.clone() {
      let group = UnitId::group(&suffix);
      let group_name = self.units.get(&group).map(|g| g.name.clone()).unwrap_or_default();
      self.insert(
        UnitId::access_review(&suffix),
        format!("ar-{group_name}"),
        UnitKind::AccessReview { group },
        None,
      );
    }
  }

  /// Two resources of one type, or two groups, must not share a name.
  fn check_name_collisions(&self) -> Result<(), GraphError> {
    let mut seen: HashMap<(UnitClass, Option<ResourceType>, &str), &UnitId> = HashMap::new();
    for unit in self.units.values() {
      let key = (unit.kind.class(), unit.kind.resource_type(), unit.name.as_str());
      if let Some(first) = seen.insert(key, &unit.id) {
        return Err(GraphError::NameCollision {
          name: unit.name.clone(),
          first: first.clone(),
          second: unit.id.clone(),
        });
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::parse_manifest;

  const HEADER: &str = r#"
metadata:
  project_name: myapp
  environment: dev
  business_unit: engineering
  cost_center: CC-1234
  owner_email: owner@example.com
"#;

  fn manifest(body: &str) -> Manifest {
    parse_manifest(&format!("{HEADER}{body}")).unwrap().manifest
  }

  fn build(body: &str) -> Result<ProvisioningGraph, GraphError> {
    GraphBuilder::new(&NamingTable::standard()).build(&manifest(body))
  }

  fn id(raw: &str) -> UnitId {
    UnitId(raw.to_string())
  }

  #[test]
  fn scope_root_has_no_dependencies_and_everything_depends_on_it() {
    let graph = build("resources:\n  - type: postgresql\n    name: maindb\n").unwrap();
    let root = UnitId::resource_group();
    assert!(graph.dependencies(&root).is_empty());
    for unit in graph.units().filter(|u| u.id != root) {
      assert!(unit.dependencies.contains(&root), "{} misses the scope root", unit.id);
    }
    assert_eq!(graph.scope(), "rg-myapp-dev");
  }

  #[test]
  fn secrets_sit_between_producer_and_vault() {
    let graph = build(
      "resources:\n  - type: keyvault\n    name: secrets\n  - type: postgresql\n    name: maindb\n",
    )
    .unwrap();

    let secret = id("secret:postgresql/maindb/connection-string");
    let unit = graph.unit(&secret).unwrap();
    assert_eq!(unit.name, "psql-maindb-connection-string");
    assert!(unit.dependencies.contains(&id("resource:postgresql/maindb")));

    let vault = graph.unit(&id("resource:keyvault/secrets")).unwrap();
    assert!(vault.dependencies.contains(&secret));
    assert!(vault.dependencies.contains(&id("secret:postgresql/maindb/admin-password")));
  }

  #[test]
  fn no_vault_means_no_secret_units() {
    let graph = build("resources:\n  - type: postgresql\n    name: maindb\n").unwrap();
    assert!(graph.units().all(|u| u.kind.class() != UnitClass::Secret));
  }

  #[test]
  fn role_assignments_depend_on_principal_and_scope() {
    let graph = build("resources:\n  - type: keyvault\n    name: secrets\n").unwrap();
    let rbac = UnitId::role_assignment(
      &UnitId::group("admins"),
      &id("resource:keyvault/secrets"),
      "Key Vault Administrator",
    );
    let unit = graph.unit(&rbac).unwrap();
    assert!(unit.dependencies.contains(&UnitId::group("admins")));
    assert!(unit.dependencies.contains(&id("resource:keyvault/secrets")));
    assert_eq!(unit.name.len(), 36);
  }

  #[test]
  fn managed_identities_get_vault_access() {
    let graph = build(
      "resources:\n  - type: keyvault\n    name: secrets\n  - type: function_app\n    name: api\n",
    )
    .unwrap();
    let rbac = UnitId::role_assignment(
      &id("resource:function_app/api"),
      &id("resource:keyvault/secrets"),
      rules::IDENTITY_VAULT_ROLE,
    );
    assert!(graph.unit(&rbac).is_some());
  }

  #[test]
  fn undeclared_group_is_unresolved() {
    let err = build(
      "resources:\n  - type: keyvault\n    name: secrets\n    access:\n      - group: developers\n        role: Reader\n",
    )
    .unwrap_err();
    assert_eq!(
      err,
      GraphError::UnresolvedReference {
        from: id("resource:keyvault/secrets"),
        reference: "security group 'developers'".to_string(),
      }
    );
  }

  #[test]
  fn declared_group_resolves() {
    let graph = build(
      "access:\n  groups: [developers]\nresources:\n  - type: keyvault\n    name: secrets\n    access:\n      - group: developers\n        role: Reader\n",
    )
    .unwrap();
    assert_eq!(graph.unit(&UnitId::group("developers")).unwrap().name, "sg-myapp-developers-dev");
  }

  #[test]
  fn unknown_secrets_store_is_unresolved() {
    let err = build(
      "resources:\n  - type: keyvault\n    name: secrets\n  - type: postgresql\n    name: maindb\n    secrets_store: other\n",
    )
    .unwrap_err();
    assert!(matches!(err, GraphError::UnresolvedReference { .. }));
  }

  #[test]
  fn unknown_declared_dependency_is_unresolved() {
    let err = build("resources:\n  - type: postgresql\n    name: maindb\n    depends_on: [storage_account/files]\n")
      .unwrap_err();
    assert_eq!(
      err,
      GraphError::UnresolvedReference {
        from: id("resource:postgresql/maindb"),
        reference: "resource storage_account/files".to_string(),
      }
    );
  }

  #[test]
  fn cyclic_wiring_is_rejected() {
    // The vault waits on the database's secrets, which wait on the database.
    let err = build(
      "resources:\n  - type: keyvault\n    name: secrets\n  - type: postgresql\n    name: maindb\n    depends_on: [keyvault/secrets]\n",
    )
    .unwrap_err();
    let GraphError::Cycle { units } = err else {
      panic!("expected a cycle, got {err:?}");
    };
    assert!(units.contains(&id("resource:keyvault/secrets")));
    assert!(units.contains(&id("resource:postgresql/maindb")));
  }

  #[test]
  fn custom_rules_replace_defaults() {
    const ONLY_ROOT: &[WiringRule] = &[WiringRule {
      name: "scope-root",
      applies_to: &[UnitClass::Resource],
      dependency: DependencySelector::ScopeRoot,
    }];
    let naming = NamingTable::standard();
    let graph = GraphBuilder::new(&naming)
      .with_rules(ONLY_ROOT)
      .build(&manifest("resources:\n  - type: keyvault\n    name: secrets\n"))
      .unwrap();
    assert!(graph.dependencies(&UnitId::group("admins")).is_empty());
    assert_eq!(graph.dependents(&UnitId::resource_group()).len(), 1);
  }

  #[test]
  fn access_reviews_follow_environment() {
    let graph = build("resources:\n  - type: keyvault\n    name: secrets\n").unwrap();
    assert!(graph.units().all(|u| u.kind.class() != UnitClass::AccessReview));

    let graph = build("access:\n  access_reviews: true\nresources:\n  - type: keyvault\n    name: secrets\n").unwrap();
    let review = graph.unit(&UnitId::access_review("admins")).unwrap();
    assert_eq!(review.name, "ar-sg-myapp-admins-dev");
    assert!(review.dependencies.contains(&UnitId::group("admins")));
  }

  #[test]
  fn compact_name_collision_is_rejected() {
    let err = build(
      "resources:\n  - type: storage_account\n    name: data-1\n  - type: storage_account\n    name: data1\n",
    )
    .unwrap_err();
    assert!(matches!(err, GraphError::NameCollision { ref name, .. } if name == "stmyappdata1d"));
  }

  #[test]
  fn truncated_vault_name_without_environment_marker_is_rejected() {
    let body = "resources:\n  - type: keyvault\n    name: applicationsecrets\n";
    let err = build(body).unwrap_err();
    assert!(matches!(
      err,
      GraphError::Naming {
        source: NamingError::EnvironmentCollision { .. },
        ..
      }
    ));

    let lenient = NamingTable::standard().with_strict_environment_names(false);
    let graph = GraphBuilder::new(&lenient).build(&manifest(body)).unwrap();
    assert_eq!(
      graph.unit(&id("resource:keyvault/applicationsecrets")).unwrap().name,
      "kv-myapp-applicationsecr"
    );
  }

  #[test]
  fn invalid_logical_name_surfaces_naming_error() {
    let err = build("resources:\n  - type: eventhub\n    name: events_main\n").unwrap_err();
    assert!(matches!(
      err,
      GraphError::Naming {
        source: NamingError::InvalidCharacter { character: '_', .. },
        ..
      }
    ));
  }
}
