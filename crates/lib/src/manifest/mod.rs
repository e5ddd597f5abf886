//! Application manifests: the typed, validated description of what a team
//! wants provisioned.

mod config;
mod parse;
mod types;

pub use config::{
  AksNamespaceConfig, AzureSqlConfig, ContainerAccess, EventHubConfig, FunctionAppConfig, FunctionRuntime,
  KeyVaultConfig, KeyVaultSku, LinuxVmConfig, MongoDatabase, MongoDbConfig, OsType, PostgreSqlConfig, Replication,
  ResourceConfig, SqlDatabase, StaticWebAppConfig, StaticWebAppSku, StorageAccountConfig, StorageContainer,
  StorageTier,
};
pub use parse::{ParsedManifest, ValidationError, ValidationErrors, ValidationWarning, parse_manifest};
pub use types::{
  AccessPolicy, Environment, Manifest, ProjectMetadata, ResourceRef, ResourceSpec, ResourceType, RoleGrant,
};
