//! Strongly-typed per-resource configuration.
//!
//! Each [`ResourceType`] owns one configuration record. Defaults depend on the
//! manifest's environment (dev gets free or basic tiers, prod gets production
//! tiers with redundancy) and are filled in at parse time, so a parsed
//! [`ResourceConfig`] is always complete.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use super::types::{Environment, ResourceType};

/// Environment-aware defaults for a configuration record.
pub(crate) trait ConfigDefaults: Serialize + DeserializeOwned {
  /// Keys accepted in the manifest's `config` block.
  const KEYS: &'static [&'static str];

  fn defaults(environment: Environment) -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageTier {
  Standard,
  Premium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Replication {
  Lrs,
  Zrs,
  Grs,
  Ragrs,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerAccess {
  #[default]
  Private,
  Blob,
  Container,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageContainer {
  pub name: String,
  #[serde(default)]
  pub access_type: ContainerAccess,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAccountConfig {
  pub tier: StorageTier,
  pub replication: Replication,
  pub containers: Vec<StorageContainer>,
}

impl ConfigDefaults for StorageAccountConfig {
  const KEYS: &'static [&'static str] = &["tier", "replication", "containers"];

  fn defaults(environment: Environment) -> Self {
    Self {
      tier: StorageTier::Standard,
      replication: match environment {
        Environment::Prod => Replication::Grs,
        _ => Replication::Lrs,
      },
      containers: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyVaultSku {
  Standard,
  Premium,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVaultConfig {
  pub sku: KeyVaultSku,
  pub enable_rbac: bool,
  pub soft_delete_retention_days: u16,
  pub purge_protection: bool,
}

impl ConfigDefaults for KeyVaultConfig {
  const KEYS: &'static [&'static str] = &["sku", "enable_rbac", "soft_delete_retention_days", "purge_protection"];

  fn defaults(environment: Environment) -> Self {
    let prod = environment == Environment::Prod;
    Self {
      sku: KeyVaultSku::Standard,
      enable_rbac: true,
      soft_delete_retention_days: if prod { 90 } else { 7 },
      purge_protection: prod,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgreSqlConfig {
  pub sku: String,
  pub storage_mb: u32,
  pub version: String,
  pub geo_redundant_backup: bool,
}

impl ConfigDefaults for PostgreSqlConfig {
  const KEYS: &'static [&'static str] = &["sku", "storage_mb", "version", "geo_redundant_backup"];

  fn defaults(environment: Environment) -> Self {
    let prod = environment == Environment::Prod;
    Self {
      sku: if prod { "GP_Standard_D2s_v3" } else { "B_Standard_B1ms" }.to_string(),
      storage_mb: 32768,
      version: "16".to_string(),
      geo_redundant_backup: prod,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MongoDatabase {
  pub name: String,
  #[serde(default)]
  pub collections: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MongoDbConfig {
  pub throughput: u32,
  pub databases: Vec<MongoDatabase>,
}

impl ConfigDefaults for MongoDbConfig {
  const KEYS: &'static [&'static str] = &["throughput", "databases"];

  fn defaults(_environment: Environment) -> Self {
    Self {
      throughput: 400,
      databases: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHubConfig {
  pub sku: String,
  pub capacity: u8,
  pub partition_count: u8,
  pub message_retention: u8,
}

impl ConfigDefaults for EventHubConfig {
  const KEYS: &'static [&'static str] = &["sku", "capacity", "partition_count", "message_retention"];

  fn defaults(environment: Environment) -> Self {
    let prod = environment == Environment::Prod;
    Self {
      sku: if environment == Environment::Dev { "Basic" } else { "Standard" }.to_string(),
      capacity: 1,
      partition_count: if prod { 4 } else { 2 },
      message_retention: if prod { 7 } else { 1 },
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionRuntime {
  Python,
  Node,
  Dotnet,
  Java,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
  Linux,
  Windows,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionAppConfig {
  pub runtime: FunctionRuntime,
  pub runtime_version: String,
  pub sku: String,
  pub os_type: OsType,
  pub app_settings: BTreeMap<String, String>,
}

impl ConfigDefaults for FunctionAppConfig {
  const KEYS: &'static [&'static str] = &["runtime", "runtime_version", "sku", "os_type", "app_settings"];

  fn defaults(environment: Environment) -> Self {
    Self {
      runtime: FunctionRuntime::Python,
      runtime_version: "3.11".to_string(),
      sku: if environment == Environment::Prod { "P1v2" } else { "Y1" }.to_string(),
      os_type: OsType::Linux,
      app_settings: BTreeMap::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxVmConfig {
  pub size: String,
  pub admin_username: String,
  pub os_disk_size_gb: u32,
  pub image: String,
}

impl ConfigDefaults for LinuxVmConfig {
  const KEYS: &'static [&'static str] = &["size", "admin_username", "os_disk_size_gb", "image"];

  fn defaults(environment: Environment) -> Self {
    Self {
      size: if environment == Environment::Prod { "Standard_D2s_v3" } else { "Standard_B1s" }.to_string(),
      admin_username: "azureuser".to_string(),
      os_disk_size_gb: 30,
      image: "Ubuntu2204".to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AksNamespaceConfig {
  pub cpu_limit: String,
  pub memory_limit: String,
  pub storage_limit: String,
}

impl ConfigDefaults for AksNamespaceConfig {
  const KEYS: &'static [&'static str] = &["cpu_limit", "memory_limit", "storage_limit"];

  fn defaults(environment: Environment) -> Self {
    let (cpu, memory, storage) = match environment {
      Environment::Prod => ("8", "16Gi", "100Gi"),
      _ => ("2", "4Gi", "10Gi"),
    };
    Self {
      cpu_limit: cpu.to_string(),
      memory_limit: memory.to_string(),
      storage_limit: storage.to_string(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaticWebAppSku {
  Free,
  Standard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticWebAppConfig {
  pub sku: StaticWebAppSku,
  pub app_location: String,
  pub output_location: String,
}

impl ConfigDefaults for StaticWebAppConfig {
  const KEYS: &'static [&'static str] = &["sku", "app_location", "output_location"];

  fn defaults(environment: Environment) -> Self {
    Self {
      sku: match environment {
        Environment::Prod => StaticWebAppSku::Standard,
        _ => StaticWebAppSku::Free,
      },
      app_location: "/".to_string(),
      output_location: "dist".to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlDatabase {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sku: Option<String>,
  #[serde(default = "default_max_size_gb")]
  pub max_size_gb: u32,
}

fn default_max_size_gb() -> u32 {
  2
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureSqlConfig {
  pub sku: String,
  pub databases: Vec<SqlDatabase>,
}

impl ConfigDefaults for AzureSqlConfig {
  const KEYS: &'static [&'static str] = &["sku", "databases"];

  fn defaults(environment: Environment) -> Self {
    Self {
      sku: match environment {
        Environment::Dev => "Free",
        Environment::Staging => "S0",
        Environment::Prod => "S1",
      }
      .to_string(),
      databases: Vec::new(),
    }
  }
}

/// Resolved configuration of one resource, tagged by resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceConfig {
  StorageAccount(StorageAccountConfig),
  KeyVault(KeyVaultConfig),
  PostgreSql(PostgreSqlConfig),
  MongoDb(MongoDbConfig),
  EventHub(EventHubConfig),
  FunctionApp(FunctionAppConfig),
  LinuxVm(LinuxVmConfig),
  AksNamespace(AksNamespaceConfig),
  StaticWebApp(StaticWebAppConfig),
  AzureSql(AzureSqlConfig),
}

/// Outcome of resolving one `config` block.
pub(crate) struct ParsedConfig {
  pub config: Result<ResourceConfig, String>,
  pub unknown_keys: Vec<String>,
}

impl ResourceConfig {
  pub fn resource_type(&self) -> ResourceType {
    match self {
      ResourceConfig::StorageAccount(_) => ResourceType::StorageAccount,
      ResourceConfig::KeyVault(_) => ResourceType::KeyVault,
      ResourceConfig::PostgreSql(_) => ResourceType::PostgreSql,
      ResourceConfig::MongoDb(_) => ResourceType::MongoDb,
      ResourceConfig::EventHub(_) => ResourceType::EventHub,
      ResourceConfig::FunctionApp(_) => ResourceType::FunctionApp,
      ResourceConfig::LinuxVm(_) => ResourceType::LinuxVm,
      ResourceConfig::AksNamespace(_) => ResourceType::AksNamespace,
      ResourceConfig::StaticWebApp(_) => ResourceType::StaticWebApp,
      ResourceConfig::AzureSql(_) => ResourceType::AzureSql,
    }
  }

  /// The configuration with every default filled in.
  pub fn defaults(resource_type: ResourceType, environment: Environment) -> Self {
    match resource_type {
      ResourceType::StorageAccount => ResourceConfig::StorageAccount(ConfigDefaults::defaults(environment)),
      ResourceType::KeyVault => ResourceConfig::KeyVault(ConfigDefaults::defaults(environment)),
      ResourceType::PostgreSql => ResourceConfig::PostgreSql(ConfigDefaults::defaults(environment)),
      ResourceType::MongoDb => ResourceConfig::MongoDb(ConfigDefaults::defaults(environment)),
      ResourceType::EventHub => ResourceConfig::EventHub(ConfigDefaults::defaults(environment)),
      ResourceType::FunctionApp => ResourceConfig::FunctionApp(ConfigDefaults::defaults(environment)),
      ResourceType::LinuxVm => ResourceConfig::LinuxVm(ConfigDefaults::defaults(environment)),
      ResourceType::AksNamespace => ResourceConfig::AksNamespace(ConfigDefaults::defaults(environment)),
      ResourceType::StaticWebApp => ResourceConfig::StaticWebApp(ConfigDefaults::defaults(environment)),
      ResourceType::AzureSql => ResourceConfig::AzureSql(ConfigDefaults::defaults(environment)),
    }
  }

  /// Keys accepted in the `config` block of a resource type.
  pub fn known_keys(resource_type: ResourceType) -> &'static [&'static str] {
    match resource_type {
      ResourceType::StorageAccount => StorageAccountConfig::KEYS,
      ResourceType::KeyVault => KeyVaultConfig::KEYS,
      ResourceType::PostgreSql => PostgreSqlConfig::KEYS,
      ResourceType::MongoDb => MongoDbConfig::KEYS,
      ResourceType::EventHub => EventHubConfig::KEYS,
      ResourceType::FunctionApp => FunctionAppConfig::KEYS,
      ResourceType::LinuxVm => LinuxVmConfig::KEYS,
      ResourceType::AksNamespace => AksNamespaceConfig::KEYS,
      ResourceType::StaticWebApp => StaticWebAppConfig::KEYS,
      ResourceType::AzureSql => AzureSqlConfig::KEYS,
    }
  }

  /// SKU-like tier identifier, when the resource type has one.
  pub fn sku(&self) -> Option<String> {
    match self {
      ResourceConfig::KeyVault(c) => Some(
        match c.sku {
          KeyVaultSku::Standard => "standard",
          KeyVaultSku::Premium => "premium",
        }
        .to_string(),
      ),
      ResourceConfig::PostgreSql(c) => Some(c.sku.clone()),
      ResourceConfig::EventHub(c) => Some(c.sku.clone()),
      ResourceConfig::FunctionApp(c) => Some(c.sku.clone()),
      ResourceConfig::LinuxVm(c) => Some(c.size.clone()),
      ResourceConfig::StaticWebApp(c) => Some(format!("{:?}", c.sku)),
      ResourceConfig::AzureSql(c) => Some(c.sku.clone()),
      ResourceConfig::StorageAccount(_) | ResourceConfig::MongoDb(_) | ResourceConfig::AksNamespace(_) => None,
    }
  }

  /// Serialize back to a `config` mapping.
  pub fn to_value(&self) -> Result<Value, serde_yaml::Error> {
    match self {
      ResourceConfig::StorageAccount(c) => serde_yaml::to_value(c),
      ResourceConfig::KeyVault(c) => serde_yaml::to_value(c),
      ResourceConfig::PostgreSql(c) => serde_yaml::to_value(c),
      ResourceConfig::MongoDb(c) => serde_yaml::to_value(c),
      ResourceConfig::EventHub(c) => serde_yaml::to_value(c),
      ResourceConfig::FunctionApp(c) => serde_yaml::to_value(c),
      ResourceConfig::LinuxVm(c) => serde_yaml::to_value(c),
      ResourceConfig::AksNamespace(c) => serde_yaml::to_value(c),
      ResourceConfig::StaticWebApp(c) => serde_yaml::to_value(c),
      ResourceConfig::AzureSql(c) => serde_yaml::to_value(c),
    }
  }

  /// Resolve a raw `config` block against the environment defaults.
  ///
  /// Unknown keys are reported separately and otherwise ignored; known keys
  /// with values of the wrong shape make the whole block invalid.
  pub(crate) fn parse(resource_type: ResourceType, environment: Environment, raw: Option<&Value>) -> ParsedConfig {
    let mapping = match raw {
      None | Some(Value::Null) => Mapping::new(),
      Some(Value::Mapping(m)) => m.clone(),
      Some(_) => {
        return ParsedConfig {
          config: Err("config must be a mapping".to_string()),
          unknown_keys: Vec::new(),
        };
      }
    };

    let config = match resource_type {
      ResourceType::StorageAccount => overlay::<StorageAccountConfig>(environment, &mapping).map(Self::StorageAccount),
      ResourceType::KeyVault => overlay::<KeyVaultConfig>(environment, &mapping).map(Self::KeyVault),
      ResourceType::PostgreSql => overlay::<PostgreSqlConfig>(environment, &mapping).map(Self::PostgreSql),
      ResourceType::MongoDb => overlay::<MongoDbConfig>(environment, &mapping).map(Self::MongoDb),
      ResourceType::EventHub => overlay::<EventHubConfig>(environment, &mapping).map(Self::EventHub),
      ResourceType::FunctionApp => overlay::<FunctionAppConfig>(environment, &mapping).map(Self::FunctionApp),
      ResourceType::LinuxVm => overlay::<LinuxVmConfig>(environment, &mapping).map(Self::LinuxVm),
      ResourceType::AksNamespace => overlay::<AksNamespaceConfig>(environment, &mapping).map(Self::AksNamespace),
      ResourceType::StaticWebApp => overlay::<StaticWebAppConfig>(environment, &mapping).map(Self::StaticWebApp),
      ResourceType::AzureSql => overlay::<AzureSqlConfig>(environment, &mapping).map(Self::AzureSql),
    };

    let known = Self::known_keys(resource_type);
    let unknown_keys = mapping
      .keys()
      .map(key_to_string)
      .filter(|k| !known.contains(&k.as_str()))
      .collect();

    ParsedConfig { config, unknown_keys }
  }
}

/// Lay the user's known keys over the serialized defaults and deserialize.
fn overlay<T: ConfigDefaults>(environment: Environment, user: &Mapping) -> Result<T, String> {
  let mut merged = match serde_yaml::to_value(T::defaults(environment)).map_err(|e| e.to_string())? {
    Value::Mapping(m) => m,
    _ => return Err("configuration defaults are not a mapping".to_string()),
  };

  for (key, value) in user {
    let name = key_to_string(key);
    if T::KEYS.contains(&name.as_str()) {
      merged.insert(Value::String(name), value.clone());
    }
  }

  serde_yaml::from_value(Value::Mapping(merged)).map_err(|e| e.to_string())
}

fn key_to_string(key: &Value) -> String {
  match key {
    Value::String(s) => s.clone(),
    other => serde_yaml::to_string(other)
      .map(|s| s.trim().to_string())
      .unwrap_or_default(),
  }
}
