//! Deterministic, constraint-compliant resource names.
//!
//! A [`NamingTable`] maps every nameable kind to a prefix and a [`NameStyle`].
//! It is built once and shared read-only; resolving a name is a pure function
//! of the table, the project metadata and the logical name.

mod tags;

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use crate::manifest::{Environment, ProjectMetadata, ResourceType};

pub use tags::{SYSTEM_TAGS, merge_tags};

/// Anything that receives a generated name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NamedKind {
  ResourceGroup,
  SecurityGroup,
  Resource(ResourceType),
}

impl fmt::Display for NamedKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      NamedKind::ResourceGroup => f.write_str("resource_group"),
      NamedKind::SecurityGroup => f.write_str("security_group"),
      NamedKind::Resource(rt) => write!(f, "{rt}"),
    }
  }
}

/// How the parts of a name are joined and constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameStyle {
  /// `prefix-project-suffix-environment`, uncapped.
  Standard,

  /// `prefix` + project + suffix + environment abbreviation, no separators.
  ///
  /// When project and suffix overflow the budget left after the prefix and
  /// the abbreviation, the project keeps at most `project_share` characters
  /// and the suffix gets the rest.
  Compact { max_len: usize, project_share: usize },

  /// `prefix-project-suffix-abbrev`, cut to the first `max_len` characters.
  Hyphenated { max_len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingRule {
  pub prefix: String,
  pub style: NameStyle,
}

impl NamingRule {
  fn new(prefix: &str, style: NameStyle) -> Self {
    Self {
      prefix: prefix.to_string(),
      style,
    }
  }

  pub fn max_len(&self) -> Option<usize> {
    match self.style {
      NameStyle::Standard => None,
      NameStyle::Compact { max_len, .. } | NameStyle::Hyphenated { max_len } => Some(max_len),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamingError {
  #[error("{field} must not be empty")]
  Empty { field: &'static str },

  #[error("{field} '{value}' contains invalid character '{character}'")]
  InvalidCharacter {
    field: &'static str,
    value: String,
    character: char,
  },

  #[error("no naming rule for {0}")]
  NoRule(NamedKind),

  #[error("{kind} name '{name}' is identical across environments after truncation")]
  EnvironmentCollision { kind: NamedKind, name: String },
}

/// Result of resolving a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
  pub name: String,

  /// Name of the resource group the resource lives in.
  pub scope: String,

  pub tags: BTreeMap<String, String>,

  /// Whether any input was shortened to fit the length limit.
  pub truncated: bool,
}

/// The read-only table of naming rules.
#[derive(Debug, Clone)]
pub struct NamingTable {
  rules: BTreeMap<NamedKind, NamingRule>,
  discriminator: Option<String>,
  strict_environment_names: bool,
}

impl Default for NamingTable {
  fn default() -> Self {
    Self::standard()
  }
}

impl NamingTable {
  /// The standard prefix table.
  pub fn standard() -> Self {
    let standard = NameStyle::Standard;
    let mut rules = BTreeMap::new();
    rules.insert(NamedKind::ResourceGroup, NamingRule::new("rg", standard));
    rules.insert(NamedKind::SecurityGroup, NamingRule::new("sg", standard));

    for rt in ResourceType::ALL {
      let rule = match rt {
        ResourceType::StorageAccount => NamingRule::new(
          "st",
          NameStyle::Compact {
            max_len: 24,
            project_share: 14,
          },
        ),
        ResourceType::KeyVault => NamingRule::new("kv", NameStyle::Hyphenated { max_len: 24 }),
        ResourceType::PostgreSql => NamingRule::new("psql", standard),
        ResourceType::MongoDb => NamingRule::new("cosmos", standard),
        ResourceType::EventHub => NamingRule::new("evh", standard),
        ResourceType::FunctionApp => NamingRule::new("func", standard),
        ResourceType::LinuxVm => NamingRule::new("vm", standard),
        ResourceType::AksNamespace => NamingRule::new("ns", standard),
        ResourceType::StaticWebApp => NamingRule::new("stapp", standard),
        ResourceType::AzureSql => NamingRule::new("sql", standard),
      };
      rules.insert(NamedKind::Resource(rt), rule);
    }

    Self {
      rules,
      discriminator: None,
      strict_environment_names: true,
    }
  }

  /// Distinguish resource groups of several patterns deployed for one project.
  pub fn with_discriminator(mut self, discriminator: impl Into<String>) -> Self {
    self.discriminator = Some(discriminator.into());
    self
  }

  /// Fail instead of warn when truncation makes names identical across
  /// environments.
  pub fn with_strict_environment_names(mut self, strict: bool) -> Self {
    self.strict_environment_names = strict;
    self
  }

  pub fn strict_environment_names(&self) -> bool {
    self.strict_environment_names
  }

  pub fn rule(&self, kind: NamedKind) -> Option<&NamingRule> {
    self.rules.get(&kind)
  }

  /// `rg-{project}[-{discriminator}]-{environment}`.
  pub fn resource_group_name(&self, project: &str, environment: Environment) -> Result<String, NamingError> {
    let rule = self
      .rule(NamedKind::ResourceGroup)
      .ok_or(NamingError::NoRule(NamedKind::ResourceGroup))?;
    let project = check_part("project name", project)?;
    let mut parts = vec![rule.prefix.clone(), project];
    if let Some(discriminator) = &self.discriminator {
      parts.push(check_part("pattern discriminator", discriminator)?);
    }
    parts.push(environment.as_str().to_string());
    Ok(parts.join("-"))
  }

  /// Generate the name alone, reporting whether it was shortened.
  pub fn generate(
    &self,
    kind: NamedKind,
    project: &str,
    environment: Environment,
    logical_name: &str,
  ) -> Result<(String, bool), NamingError> {
    if kind == NamedKind::ResourceGroup {
      return self.resource_group_name(project, environment).map(|name| (name, false));
    }

    let rule = self.rule(kind).ok_or(NamingError::NoRule(kind))?;
    let project = check_part("project name", project)?;
    let suffix = check_part("logical name", logical_name)?;

    Ok(match rule.style {
      NameStyle::Standard => (
        format!("{}-{}-{}-{}", rule.prefix, project, suffix, environment.as_str()),
        false,
      ),
      NameStyle::Compact { max_len, project_share } => {
        compact(&rule.prefix, &project, &suffix, environment, max_len, project_share)
      }
      NameStyle::Hyphenated { max_len } => {
        let full = format!("{}-{}-{}-{}", rule.prefix, project, suffix, environment.abbrev());
        if full.len() > max_len {
          (full[..max_len].to_string(), true)
        } else {
          (full, false)
        }
      }
    })
  }

  /// Resolve the name, scope and tags of a resource or security group.
  ///
  /// # Errors
  ///
  /// Returns a [`NamingError`] when the project or logical name is empty or
  /// contains characters outside `[A-Za-z0-9-]`, or when no rule exists for
  /// `kind`.
  pub fn resolve(
    &self,
    kind: NamedKind,
    metadata: &ProjectMetadata,
    logical_name: &str,
  ) -> Result<ResolvedName, NamingError> {
    let (name, truncated) = self.generate(kind, &metadata.project_name, metadata.environment, logical_name)?;
    if truncated {
      warn!(%kind, logical_name, name = %name, "name truncated to fit length limit");
    }
    Ok(ResolvedName {
      name,
      scope: self.resource_group_name(&metadata.project_name, metadata.environment)?,
      tags: merge_tags(metadata),
      truncated,
    })
  }

  /// Check that the same logical resource gets a different name in every
  /// environment.
  ///
  /// Tail truncation can cut off the environment marker of long hyphenated
  /// names, which would make dev and prod resources collide.
  pub fn check_environment_distinct(&self, kind: NamedKind, project: &str, logical_name: &str) -> Result<(), NamingError> {
    let mut seen: BTreeMap<String, Environment> = BTreeMap::new();
    for environment in Environment::ALL {
      let (name, _) = self.generate(kind, project, environment, logical_name)?;
      if seen.insert(name.clone(), environment).is_some() {
        return Err(NamingError::EnvironmentCollision { kind, name });
      }
    }
    Ok(())
  }
}

fn compact(
  prefix: &str,
  project: &str,
  suffix: &str,
  environment: Environment,
  max_len: usize,
  project_share: usize,
) -> (String, bool) {
  let project: String = project.chars().filter(|c| *c != '-').collect();
  let suffix: String = suffix.chars().filter(|c| *c != '-').collect();
  let budget = max_len.saturating_sub(prefix.len() + 1);

  let (project, suffix, truncated) = if project.len() + suffix.len() > budget {
    let project = &project[..project.len().min(project_share).min(budget)];
    let suffix = &suffix[..suffix.len().min(budget - project.len())];
    (project.to_string(), suffix.to_string(), true)
  } else {
    (project, suffix, false)
  };

  (format!("{prefix}{project}{suffix}{}", environment.abbrev()), truncated)
}

/// Validate a name part and lower-case it.
fn check_part(field: &'static str, value: &str) -> Result<String, NamingError> {
  if value.is_empty() {
    return Err(NamingError::Empty { field });
  }
  if let Some(character) = value.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-')) {
    return Err(NamingError::InvalidCharacter {
      field,
      value: value.to_string(),
      character,
    });
  }
  Ok(value.to_ascii_lowercase())
}

/// GUID-shaped role-assignment name derived from its three inputs.
///
/// Role assignments are addressed by GUID; deriving it from the content keeps
/// repeated runs pointing at the same assignment.
pub fn role_assignment_name(principal: &str, scope: &str, role: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(principal.as_bytes());
  hasher.update([0]);
  hasher.update(scope.as_bytes());
  hasher.update([0]);
  hasher.update(role.as_bytes());
  let hex = format!("{:x}", hasher.finalize());
  format!(
    "{}-{}-{}-{}-{}",
    &hex[0..8],
    &hex[8..12],
    &hex[12..16],
    &hex[16..20],
    &hex[20..32]
  )
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;

  fn metadata(project: &str, environment: Environment) -> ProjectMetadata {
    ProjectMetadata {
      project_name: project.to_string(),
      environment,
      business_unit: "engineering".to_string(),
      cost_center: "CC-1234".to_string(),
      owner_email: "owner@example.com".to_string(),
      tags: BTreeMap::new(),
      location: "eastus".to_string(),
    }
  }

  #[test]
  fn storage_account_name_is_compact() {
    let table = NamingTable::standard();
    let resolved = table
      .resolve(
        NamedKind::Resource(ResourceType::StorageAccount),
        &metadata("myapp", Environment::Dev),
        "db01",
      )
      .unwrap();
    assert_eq!(resolved.name, "stmyappdb01d");
    assert_eq!(resolved.scope, "rg-myapp-dev");
    assert!(!resolved.truncated);
  }

  #[test]
  fn compact_names_drop_separators_and_lowercase() {
    let table = NamingTable::standard();
    let (name, _) = table
      .generate(
        NamedKind::Resource(ResourceType::StorageAccount),
        "my-app",
        Environment::Prod,
        "Files",
      )
      .unwrap();
    assert_eq!(name, "stmyappfilesp");
  }

  #[test]
  fn compact_overflow_caps_project_and_gives_suffix_the_rest() {
    let table = NamingTable::standard();
    let (name, truncated) = table
      .generate(
        NamedKind::Resource(ResourceType::StorageAccount),
        "averyveryverylongproject",
        Environment::Staging,
        "uploadsbucket",
      )
      .unwrap();
    assert!(truncated);
    assert_eq!(name, "staveryveryveryluploadss");
    assert_eq!(name.len(), 24);
  }

  #[test]
  fn compact_overflow_with_short_project_keeps_whole_project() {
    let table = NamingTable::standard();
    let (name, truncated) = table
      .generate(
        NamedKind::Resource(ResourceType::StorageAccount),
        "app",
        Environment::Dev,
        "averyveryveryverylongsuffix",
      )
      .unwrap();
    assert!(truncated);
    assert_eq!(name, "stappaveryveryveryveryld");
    assert_eq!(name.len(), 24);
  }

  #[test]
  fn keyvault_name_is_hyphenated_with_abbreviation() {
    let table = NamingTable::standard();
    let (name, truncated) = table
      .generate(NamedKind::Resource(ResourceType::KeyVault), "myapp", Environment::Prod, "secrets")
      .unwrap();
    assert_eq!(name, "kv-myapp-secrets-p");
    assert!(!truncated);
  }

  #[test]
  fn keyvault_name_is_tail_truncated() {
    let table = NamingTable::standard();
    let (name, truncated) = table
      .generate(
        NamedKind::Resource(ResourceType::KeyVault),
        "inventory",
        Environment::Dev,
        "applicationsecrets",
      )
      .unwrap();
    assert!(truncated);
    assert_eq!(name, "kv-inventory-application");
    assert_eq!(name.len(), 24);
  }

  #[test]
  fn standard_names_use_full_environment() {
    let table = NamingTable::standard();
    let (name, _) = table
      .generate(NamedKind::Resource(ResourceType::PostgreSql), "myapp", Environment::Staging, "maindb")
      .unwrap();
    assert_eq!(name, "psql-myapp-maindb-staging");

    let (group, _) = table
      .generate(NamedKind::SecurityGroup, "myapp", Environment::Dev, "admins")
      .unwrap();
    assert_eq!(group, "sg-myapp-admins-dev");
  }

  #[test]
  fn resource_group_honours_discriminator() {
    let table = NamingTable::standard();
    assert_eq!(table.resource_group_name("myapp", Environment::Dev).unwrap(), "rg-myapp-dev");

    let table = NamingTable::standard().with_discriminator("web");
    assert_eq!(
      table.resource_group_name("myapp", Environment::Prod).unwrap(),
      "rg-myapp-web-prod"
    );
  }

  #[test]
  fn invalid_characters_are_rejected() {
    let table = NamingTable::standard();
    let err = table
      .generate(NamedKind::Resource(ResourceType::EventHub), "myapp", Environment::Dev, "events_main")
      .unwrap_err();
    assert_eq!(
      err,
      NamingError::InvalidCharacter {
        field: "logical name",
        value: "events_main".to_string(),
        character: '_',
      }
    );
  }

  #[test]
  fn empty_inputs_are_rejected() {
    let table = NamingTable::standard();
    let err = table
      .generate(NamedKind::Resource(ResourceType::LinuxVm), "", Environment::Dev, "jump")
      .unwrap_err();
    assert_eq!(err, NamingError::Empty { field: "project name" });
  }

  #[test]
  fn environment_collision_is_detected_for_truncated_keyvaults() {
    let table = NamingTable::standard();
    let kind = NamedKind::Resource(ResourceType::KeyVault);
    assert!(table.check_environment_distinct(kind, "myapp", "secrets").is_ok());

    let err = table
      .check_environment_distinct(kind, "inventory", "applicationsecrets")
      .unwrap_err();
    assert!(matches!(err, NamingError::EnvironmentCollision { .. }));
  }

  #[test]
  fn resolve_merges_tags() {
    let table = NamingTable::standard();
    let resolved = table
      .resolve(
        NamedKind::Resource(ResourceType::MongoDb),
        &metadata("myapp", Environment::Dev),
        "catalog",
      )
      .unwrap();
    assert_eq!(resolved.tags.get("Project").map(String::as_str), Some("myapp"));
    assert_eq!(resolved.tags.get("ManagedBy").map(String::as_str), Some("infraplan"));
  }

  #[test]
  fn role_assignment_names_are_stable_guids() {
    let a = role_assignment_name("group:admins", "resource:keyvault/secrets", "Key Vault Administrator");
    let b = role_assignment_name("group:admins", "resource:keyvault/secrets", "Key Vault Administrator");
    let c = role_assignment_name("group:readers", "resource:keyvault/secrets", "Key Vault Administrator");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 36);
    assert_eq!(a.matches('-').count(), 4);
  }

  proptest! {
    #[test]
    fn length_limited_names_never_exceed_limit(
      project in "[a-z][a-z0-9-]{1,20}",
      logical in "[a-z0-9][a-z0-9-]{0,40}",
      env_idx in 0usize..3,
    ) {
      let table = NamingTable::standard();
      let environment = Environment::ALL[env_idx];
      for rt in [ResourceType::StorageAccount, ResourceType::KeyVault] {
        let kind = NamedKind::Resource(rt);
        let rule = table.rule(kind).unwrap();
        let (name, _) = table.generate(kind, &project, environment, &logical).unwrap();
        prop_assert!(name.len() <= rule.max_len().unwrap());
        prop_assert!(name.starts_with(&rule.prefix));
      }
    }

    #[test]
    fn compact_names_are_lowercase_alphanumeric(
      project in "[a-z][a-z0-9-]{1,20}",
      logical in "[A-Za-z0-9][A-Za-z0-9-]{0,30}",
      env_idx in 0usize..3,
    ) {
      let table = NamingTable::standard();
      let environment = Environment::ALL[env_idx];
      let (name, _) = table
        .generate(NamedKind::Resource(ResourceType::StorageAccount), &project, environment, &logical)
        .unwrap();
      prop_assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
      prop_assert!(name.ends_with(environment.abbrev()));
    }
  }
}
