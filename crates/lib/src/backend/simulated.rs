//! A backend that provisions nothing and reports plausible outputs.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ProvisionError, ProvisioningBackend, RemoteStatus, UnitOutputs};
use crate::graph::{ProvisioningUnit, UnitKind};
use crate::manifest::ResourceType;

const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";

/// Fabricates deterministic Azure-shaped identifiers and endpoints.
///
/// Tracks which units it has "created" so `status` and `destroy` behave like a
/// real provider within one process.
#[derive(Debug, Default)]
pub struct SimulatedBackend {
  latency: Duration,
  created: Mutex<HashSet<String>>,
}

impl SimulatedBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Delay every call, to make concurrency observable.
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  async fn pause(&self) {
    if !self.latency.is_zero() {
      tokio::time::sleep(self.latency).await;
    }
  }
}

#[async_trait]
impl ProvisioningBackend for SimulatedBackend {
  async fn create(&self, unit: &ProvisioningUnit) -> Result<UnitOutputs, ProvisionError> {
    self.pause().await;
    self.created.lock().await.insert(key(unit));
    debug!(unit = %unit.id, name = %unit.name, "simulated create");
    Ok(outputs_for(unit))
  }

  async fn status(&self, unit: &ProvisioningUnit) -> Result<RemoteStatus, ProvisionError> {
    if self.created.lock().await.contains(&key(unit)) {
      Ok(RemoteStatus::Present(outputs_for(unit)))
    } else {
      Ok(RemoteStatus::Absent)
    }
  }

  async fn destroy(&self, unit: &ProvisioningUnit) -> Result<(), ProvisionError> {
    self.pause().await;
    self.created.lock().await.remove(&key(unit));
    debug!(unit = %unit.id, name = %unit.name, "simulated destroy");
    Ok(())
  }
}

/// Units are tracked per resource group, like ids on the real provider.
fn key(unit: &ProvisioningUnit) -> String {
  format!("{}/{}", unit.scope, unit.id)
}

fn outputs_for(unit: &ProvisioningUnit) -> UnitOutputs {
  let group_path = format!("/subscriptions/{SUBSCRIPTION}/resourceGroups/{}", unit.scope);
  let mut attributes = BTreeMap::new();

  let (id, endpoint) = match &unit.kind {
    UnitKind::ResourceGroup => (group_path, None),
    UnitKind::Resource { resource_type, .. } => {
      let (provider, endpoint) = provider_for(*resource_type, &unit.name);
      (format!("{group_path}/providers/{provider}/{}", unit.name), endpoint)
    }
    UnitKind::SecurityGroup { .. } => (format!("group/{}", unit.name), None),
    UnitKind::Secret { store, secret, .. } => {
      attributes.insert("secret".to_string(), secret.clone());
      attributes.insert("store".to_string(), store.to_string());
      (format!("secret/{}", unit.name), None)
    }
    UnitKind::RoleAssignment { role, .. } => {
      attributes.insert("role".to_string(), role.clone());
      (
        format!("{group_path}/providers/Microsoft.Authorization/roleAssignments/{}", unit.name),
        None,
      )
    }
    UnitKind::AccessReview { .. } => (format!("accessReview/{}", unit.name), None),
  };

  UnitOutputs {
    id,
    endpoint,
    attributes,
  }
}

fn provider_for(resource_type: ResourceType, name: &str) -> (&'static str, Option<String>) {
  match resource_type {
    ResourceType::StorageAccount => (
      "Microsoft.Storage/storageAccounts",
      Some(format!("https://{name}.blob.core.windows.net")),
    ),
    ResourceType::KeyVault => ("Microsoft.KeyVault/vaults", Some(format!("https://{name}.vault.azure.net"))),
    ResourceType::PostgreSql => (
      "Microsoft.DBforPostgreSQL/flexibleServers",
      Some(format!("{name}.postgres.database.azure.com")),
    ),
    ResourceType::MongoDb => (
      "Microsoft.DocumentDB/databaseAccounts",
      Some(format!("{name}.mongo.cosmos.azure.com")),
    ),
    ResourceType::EventHub => (
      "Microsoft.EventHub/namespaces",
      Some(format!("{name}.servicebus.windows.net")),
    ),
    ResourceType::FunctionApp => ("Microsoft.Web/sites", Some(format!("https://{name}.azurewebsites.net"))),
    ResourceType::LinuxVm => ("Microsoft.Compute/virtualMachines", None),
    ResourceType::AksNamespace => ("Microsoft.ContainerService/managedClusters/namespaces", None),
    ResourceType::StaticWebApp => (
      "Microsoft.Web/staticSites",
      Some(format!("https://{name}.azurestaticapps.net")),
    ),
    ResourceType::AzureSql => ("Microsoft.Sql/servers", Some(format!("{name}.database.windows.net"))),
  }
}

#[cfg(test)]
mod tests {
  use std::collections::{BTreeMap, BTreeSet};

  use super::*;
  use crate::graph::UnitId;
  use crate::manifest::{Environment, ResourceConfig};

  fn vault() -> ProvisioningUnit {
    ProvisioningUnit {
      id: UnitId::resource(ResourceType::KeyVault, "secrets"),
      name: "kv-myapp-secrets-d".to_string(),
      kind: UnitKind::Resource {
        resource_type: ResourceType::KeyVault,
        logical_name: "secrets".to_string(),
        config: ResourceConfig::defaults(ResourceType::KeyVault, Environment::Dev),
      },
      scope: "rg-myapp-dev".to_string(),
      location: "eastus".to_string(),
      tags: BTreeMap::new(),
      origin: Some(0),
      dependencies: BTreeSet::new(),
    }
  }

  #[tokio::test]
  async fn create_reports_deterministic_outputs() {
    let backend = SimulatedBackend::new();
    let outputs = backend.create(&vault()).await.unwrap();
    assert_eq!(
      outputs.id,
      format!("/subscriptions/{SUBSCRIPTION}/resourceGroups/rg-myapp-dev/providers/Microsoft.KeyVault/vaults/kv-myapp-secrets-d")
    );
    assert_eq!(outputs.endpoint.as_deref(), Some("https://kv-myapp-secrets-d.vault.azure.net"));
  }

  #[tokio::test]
  async fn status_tracks_create_and_destroy() {
    let backend = SimulatedBackend::new();
    let unit = vault();
    assert_eq!(backend.status(&unit).await.unwrap(), RemoteStatus::Absent);
    backend.create(&unit).await.unwrap();
    assert!(matches!(backend.status(&unit).await.unwrap(), RemoteStatus::Present(_)));
    backend.destroy(&unit).await.unwrap();
    assert_eq!(backend.status(&unit).await.unwrap(), RemoteStatus::Absent);
  }

  #[tokio::test]
  async fn resource_groups_are_tracked_separately() {
    let backend = SimulatedBackend::new();
    backend.create(&vault()).await.unwrap();

    let prod = ProvisioningUnit {
      name: "kv-myapp-secrets-p".to_string(),
      scope: "rg-myapp-prod".to_string(),
      ..vault()
    };
    assert_eq!(backend.status(&prod).await.unwrap(), RemoteStatus::Absent);
  }
}
