//! Manifest types for infraplan.
//!
//! A manifest is the validated form of an application team's request: project
//! metadata plus an ordered list of typed resource requests. It is produced by
//! [`parse_manifest`](super::parse_manifest) and is immutable afterwards.
//!
//! # Ordering
//!
//! Resources keep their manifest order (`index`), and every map uses
//! [`BTreeMap`] so that re-serialization is deterministic.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::config::ResourceConfig;
use crate::consts::DEFAULT_LOCATION;

/// Deployment environment of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
  Dev,
  Staging,
  Prod,
}

impl Environment {
  pub const ALL: [Environment; 3] = [Environment::Dev, Environment::Staging, Environment::Prod];

  /// Full lowercase name, as used in standard resource names.
  pub fn as_str(&self) -> &'static str {
    match self {
      Environment::Dev => "dev",
      Environment::Staging => "staging",
      Environment::Prod => "prod",
    }
  }

  /// Single-character abbreviation used by length-constrained names.
  pub fn abbrev(&self) -> char {
    match self {
      Environment::Dev => 'd',
      Environment::Staging => 's',
      Environment::Prod => 'p',
    }
  }
}

impl fmt::Display for Environment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Environment {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Environment::ALL
      .into_iter()
      .find(|env| env.as_str() == s)
      .ok_or_else(|| format!("unknown environment '{s}' (expected dev, staging or prod)"))
  }
}

/// The closed set of provisionable resource types.
///
/// Declaration order is significant: it is the ordinal used to break ties
/// between units that land in the same plan stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceType {
  #[serde(rename = "storage_account")]
  StorageAccount,
  #[serde(rename = "keyvault")]
  KeyVault,
  #[serde(rename = "postgresql")]
  PostgreSql,
  #[serde(rename = "mongodb")]
  MongoDb,
  #[serde(rename = "eventhub")]
  EventHub,
  #[serde(rename = "function_app")]
  FunctionApp,
  #[serde(rename = "linux_vm")]
  LinuxVm,
  #[serde(rename = "aks_namespace")]
  AksNamespace,
  #[serde(rename = "static_web_app")]
  StaticWebApp,
  #[serde(rename = "azure_sql")]
  AzureSql,
}

impl ResourceType {
  pub const ALL: [ResourceType; 10] = [
    ResourceType::StorageAccount,
    ResourceType::KeyVault,
    ResourceType::PostgreSql,
    ResourceType::MongoDb,
    ResourceType::EventHub,
    ResourceType::FunctionApp,
    ResourceType::LinuxVm,
    ResourceType::AksNamespace,
    ResourceType::StaticWebApp,
    ResourceType::AzureSql,
  ];

  /// The spelling used in manifests.
  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceType::StorageAccount => "storage_account",
      ResourceType::KeyVault => "keyvault",
      ResourceType::PostgreSql => "postgresql",
      ResourceType::MongoDb => "mongodb",
      ResourceType::EventHub => "eventhub",
      ResourceType::FunctionApp => "function_app",
      ResourceType::LinuxVm => "linux_vm",
      ResourceType::AksNamespace => "aks_namespace",
      ResourceType::StaticWebApp => "static_web_app",
      ResourceType::AzureSql => "azure_sql",
    }
  }

  /// Position in the declaration order.
  pub fn ordinal(&self) -> u8 {
    *self as u8
  }
}

impl fmt::Display for ResourceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResourceType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ResourceType::ALL
      .into_iter()
      .find(|rt| rt.as_str() == s)
      .ok_or_else(|| format!("unknown resource type '{s}'"))
  }
}

/// Project-wide metadata shared by every resource in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadata {
  pub project_name: String,
  pub environment: Environment,
  pub business_unit: String,
  pub cost_center: String,
  pub owner_email: String,

  /// Custom tags. System tags with the same key take precedence.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub tags: BTreeMap<String, String>,

  #[serde(default = "default_location")]
  pub location: String,
}

fn default_location() -> String {
  DEFAULT_LOCATION.to_string()
}

/// Optional access controls declared at manifest level.
///
/// The standard `admins` and `readers` security groups always exist; `groups`
/// adds more suffixes that role grants may reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub groups: Vec<String>,

  /// Explicit access-review switch. When absent, reviews run in prod only.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub access_reviews: Option<bool>,
}

impl AccessPolicy {
  pub fn is_default(&self) -> bool {
    self == &AccessPolicy::default()
  }

  pub fn reviews_enabled(&self, environment: Environment) -> bool {
    self.access_reviews.unwrap_or(environment == Environment::Prod)
  }
}

/// A role granted to a security group on the declaring resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
  pub group: String,
  pub role: String,
}

/// A `type/name` reference to another resource in the same manifest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceRef {
  pub resource_type: ResourceType,
  pub logical_name: String,
}

impl fmt::Display for ResourceRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.resource_type, self.logical_name)
  }
}

impl FromStr for ResourceRef {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (ty, name) = s
      .split_once('/')
      .ok_or_else(|| format!("reference '{s}' must have the form type/name"))?;
    if name.is_empty() {
      return Err(format!("reference '{s}' has an empty name"));
    }
    Ok(ResourceRef {
      resource_type: ty.parse()?,
      logical_name: name.to_string(),
    })
  }
}

impl Serialize for ResourceRef {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for ResourceRef {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
  }
}

/// One validated resource request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
  pub resource_type: ResourceType,
  pub logical_name: String,
  pub config: ResourceConfig,

  /// Zero-based position in the manifest's resource list.
  pub index: usize,

  /// Extra role grants for declared security groups.
  pub access: Vec<RoleGrant>,

  /// Explicit ordering edges to other resources.
  pub depends_on: Vec<ResourceRef>,

  /// Logical name of the key vault that stores this resource's secrets.
  pub secrets_store: Option<String>,
}

impl ResourceSpec {
  pub fn reference(&self) -> ResourceRef {
    ResourceRef {
      resource_type: self.resource_type,
      logical_name: self.logical_name.clone(),
    }
  }
}

/// A validated manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
  pub metadata: ProjectMetadata,
  pub access: AccessPolicy,
  pub resources: Vec<ResourceSpec>,
}

impl Manifest {
  pub fn environment(&self) -> Environment {
    self.metadata.environment
  }

  /// Resources of one type, in manifest order.
  pub fn resources_of(&self, resource_type: ResourceType) -> impl Iterator<Item = &ResourceSpec> {
    self.resources.iter().filter(move |r| r.resource_type == resource_type)
  }

  pub fn find(&self, reference: &ResourceRef) -> Option<&ResourceSpec> {
    self
      .resources
      .iter()
      .find(|r| r.resource_type == reference.resource_type && r.logical_name == reference.logical_name)
  }
}
