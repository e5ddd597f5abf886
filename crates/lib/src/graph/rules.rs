//! Declarative wiring: per-type resource profiles and dependency rules.
//!
//! Every manifest goes through the same rule set. Adding a resource type means
//! adding a profile here, not writing new composition code.

use crate::manifest::ResourceType;

use super::unit::UnitClass;

/// Static facts about a resource type that drive unit expansion.
#[derive(Debug, Clone, Copy)]
pub struct ResourceProfile {
  /// Secrets the resource produces, stored in a key vault when one exists.
  pub secrets: &'static [&'static str],

  /// Whether the resource carries a managed identity that reads key vaults.
  pub managed_identity: bool,

  /// Roles granted to the standard security groups on the resource.
  pub grants: &'static [(&'static str, &'static str)],
}

/// Role granted to identity-bearing compute on every key vault.
pub const IDENTITY_VAULT_ROLE: &str = "Key Vault Secrets User";

/// Roles granted to the standard groups on the resource group itself.
pub const SCOPE_GRANTS: &[(&str, &str)] = &[("admins", "Contributor"), ("readers", "Reader")];

pub fn profile(resource_type: ResourceType) -> ResourceProfile {
  match resource_type {
    ResourceType::StorageAccount => ResourceProfile {
      secrets: &["connection-string"],
      managed_identity: false,
      grants: &[("admins", "Storage Blob Data Owner"), ("readers", "Storage Blob Data Reader")],
    },
    ResourceType::KeyVault => ResourceProfile {
      secrets: &[],
      managed_identity: false,
      grants: &[("admins", "Key Vault Administrator"), ("readers", "Key Vault Secrets User")],
    },
    ResourceType::PostgreSql => ResourceProfile {
      secrets: &["admin-password", "connection-string"],
      managed_identity: false,
      grants: &[("admins", "Contributor"), ("readers", "Reader")],
    },
    ResourceType::MongoDb => ResourceProfile {
      secrets: &["connection-string"],
      managed_identity: false,
      grants: &[
        ("admins", "DocumentDB Account Contributor"),
        ("readers", "Cosmos DB Account Reader Role"),
      ],
    },
    ResourceType::EventHub => ResourceProfile {
      secrets: &["connection-string"],
      managed_identity: false,
      grants: &[
        ("admins", "Azure Event Hubs Data Owner"),
        ("readers", "Azure Event Hubs Data Receiver"),
      ],
    },
    ResourceType::FunctionApp => ResourceProfile {
      secrets: &[],
      managed_identity: true,
      grants: &[("admins", "Website Contributor"), ("readers", "Reader")],
    },
    ResourceType::LinuxVm => ResourceProfile {
      secrets: &["admin-password"],
      managed_identity: true,
      grants: &[
        ("admins", "Virtual Machine Administrator Login"),
        ("readers", "Virtual Machine User Login"),
      ],
    },
    ResourceType::AksNamespace => ResourceProfile {
      secrets: &[],
      managed_identity: false,
      grants: &[
        ("admins", "Azure Kubernetes Service RBAC Admin"),
        ("readers", "Azure Kubernetes Service RBAC Reader"),
      ],
    },
    ResourceType::StaticWebApp => ResourceProfile {
      secrets: &["deployment-token"],
      managed_identity: false,
      grants: &[("admins", "Contributor"), ("readers", "Reader")],
    },
    ResourceType::AzureSql => ResourceProfile {
      secrets: &["admin-password", "connection-string"],
      managed_identity: false,
      grants: &[("admins", "SQL DB Contributor"), ("readers", "Reader")],
    },
  }
}

/// Which units a rule makes the subject depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencySelector {
  /// The resource-group unit.
  ScopeRoot,
  /// The resource a secret was produced by.
  SecretProducer,
  /// Every secret stored in this key vault.
  StoredSecrets,
  /// The group or identity a role is granted to.
  Principal,
  /// The unit a role is granted on.
  GrantScope,
  /// The group an access review covers.
  ReviewedGroup,
  /// Resources named in the manifest's `depends_on`.
  Declared,
}

/// One wiring rule: units of the listed classes depend on whatever the
/// selector picks out.
#[derive(Debug, Clone, Copy)]
pub struct WiringRule {
  pub name: &'static str,
  pub applies_to: &'static [UnitClass],
  pub dependency: DependencySelector,
}

impl WiringRule {
  pub fn applies(&self, class: UnitClass) -> bool {
    self.applies_to.contains(&class)
  }
}

pub const DEFAULT_RULES: &[WiringRule] = &[
  WiringRule {
    name: "scope-root",
    applies_to: &[
      UnitClass::Resource,
      UnitClass::SecurityGroup,
      UnitClass::Secret,
      UnitClass::RoleAssignment,
      UnitClass::AccessReview,
    ],
    dependency: DependencySelector::ScopeRoot,
  },
  WiringRule {
    name: "secret-after-producer",
    applies_to: &[UnitClass::Secret],
    dependency: DependencySelector::SecretProducer,
  },
  WiringRule {
    name: "vault-after-secrets",
    applies_to: &[UnitClass::Resource],
    dependency: DependencySelector::StoredSecrets,
  },
  WiringRule {
    name: "grant-after-principal",
    applies_to: &[UnitClass::RoleAssignment],
    dependency: DependencySelector::Principal,
  },
  WiringRule {
    name: "grant-after-scope",
    applies_to: &[UnitClass::RoleAssignment],
    dependency: DependencySelector::GrantScope,
  },
  WiringRule {
    name: "review-after-group",
    applies_to: &[UnitClass::AccessReview],
    dependency: DependencySelector::ReviewedGroup,
  },
  WiringRule {
    name: "declared-dependencies",
    applies_to: &[UnitClass::Resource],
    dependency: DependencySelector::Declared,
  },
];
