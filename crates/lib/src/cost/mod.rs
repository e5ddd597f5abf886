//! Monthly cost estimates and budget policy.
//!
//! Prices are flat per-type figures with per-SKU overrides for the types
//! whose price varies most by SKU. They are coarse planning numbers, not a
//! billing model.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::manifest::{Environment, Manifest, ResourceRef, ResourceType};

fn base_cost(resource_type: ResourceType) -> f64 {
  match resource_type {
    ResourceType::PostgreSql => 25.0,
    ResourceType::MongoDb => 25.0,
    ResourceType::KeyVault => 5.0,
    ResourceType::EventHub => 25.0,
    ResourceType::FunctionApp => 0.0,
    ResourceType::LinuxVm => 40.0,
    ResourceType::StorageAccount => 5.0,
    ResourceType::StaticWebApp => 0.0,
    ResourceType::AksNamespace => 10.0,
    ResourceType::AzureSql => 30.0,
  }
}

fn sku_cost(resource_type: ResourceType, sku: &str) -> Option<f64> {
  let table: &[(&str, f64)] = match resource_type {
    ResourceType::AzureSql => &[
      ("Free", 0.0),
      ("Basic", 5.0),
      ("S0", 15.0),
      ("S1", 30.0),
      ("S2", 75.0),
      ("P1", 465.0),
    ],
    ResourceType::FunctionApp => &[("Y1", 0.0), ("B1", 13.0), ("S1", 70.0), ("P1v2", 140.0)],
    ResourceType::PostgreSql => &[("B_Standard_B1ms", 25.0), ("GP_Standard_D2s_v3", 125.0)],
    _ => &[],
  };
  table.iter().find(|(name, _)| *name == sku).map(|(_, cost)| *cost)
}

/// The SKU that costs nothing, for types that have one.
pub fn free_tier_sku(resource_type: ResourceType) -> Option<&'static str> {
  match resource_type {
    ResourceType::AzureSql => Some("Free"),
    ResourceType::FunctionApp => Some("Y1"),
    ResourceType::StaticWebApp => Some("Free"),
    _ => None,
  }
}

/// Estimated monthly cost of one resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceCost {
  pub resource: ResourceRef,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub sku: Option<String>,

  pub monthly_usd: f64,
}

/// Estimated monthly cost of a manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostEstimate {
  pub environment: Environment,
  pub resources: Vec<ResourceCost>,
  pub total_usd: f64,
}

/// Estimate the monthly cost of every resource in `manifest`.
///
/// Uses the SKU price when one is listed for the resource's effective SKU,
/// else the type's base price.
pub fn estimate(manifest: &Manifest) -> CostEstimate {
  let resources: Vec<ResourceCost> = manifest
    .resources
    .iter()
    .map(|spec| {
      let sku = spec.config.sku();
      let monthly_usd = sku
        .as_deref()
        .and_then(|sku| sku_cost(spec.resource_type, sku))
        .unwrap_or_else(|| base_cost(spec.resource_type));
      ResourceCost {
        resource: spec.reference(),
        sku,
        monthly_usd,
      }
    })
    .collect();

  let total_usd = resources.iter().map(|r| r.monthly_usd).sum();
  debug!(resources = resources.len(), total_usd, "estimated monthly cost");

  CostEstimate {
    environment: manifest.environment(),
    resources,
    total_usd,
  }
}

/// Monthly budget per environment, in USD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostLimits {
  pub dev: f64,
  pub staging: f64,
  pub prod: f64,
}

impl Default for CostLimits {
  fn default() -> Self {
    Self {
      dev: 500.0,
      staging: 2000.0,
      prod: 10000.0,
    }
  }
}

impl CostLimits {
  pub fn limit_for(&self, environment: Environment) -> f64 {
    match environment {
      Environment::Dev => self.dev,
      Environment::Staging => self.staging,
      Environment::Prod => self.prod,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Warning,
  Error,
}

/// A manifest that breaks a cost policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyViolation {
  pub policy: &'static str,
  pub severity: Severity,
  pub message: String,
}

/// Check `manifest` against the budget for its environment.
pub fn check_policy(manifest: &Manifest, limits: &CostLimits) -> Vec<PolicyViolation> {
  let environment = manifest.environment();
  let estimated = estimate(manifest).total_usd;
  let limit = limits.limit_for(environment);

  let mut violations = Vec::new();
  if estimated > limit {
    warn!(%environment, estimated, limit, "estimated cost exceeds budget");
    violations.push(PolicyViolation {
      policy: "cost_limit",
      severity: Severity::Error,
      message: format!("Estimated cost ${estimated:.2}/month exceeds {environment} limit of ${limit}"),
    });
  }
  violations
}

/// A cheaper SKU worth considering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
  pub resource: ResourceRef,
  pub current_sku: String,
  pub recommended_sku: &'static str,
}

/// Suggest free-tier SKUs for dev resources that are not on one.
///
/// Staging and prod manifests get no recommendations.
pub fn free_tier_recommendations(manifest: &Manifest) -> Vec<Recommendation> {
  if manifest.environment() != Environment::Dev {
    return Vec::new();
  }

  manifest
    .resources
    .iter()
    .filter_map(|spec| {
      let free = free_tier_sku(spec.resource_type)?;
      let current = spec.config.sku().unwrap_or_else(|| "default".to_string());
      (current != free).then(|| Recommendation {
        resource: spec.reference(),
        current_sku: current,
        recommended_sku: free,
      })
    })
    .collect()
}
