//! Implementation of the `infraplan validate` command.
//!
//! Parses and plans a manifest without touching any backend, then reports
//! its estimated monthly cost, budget violations and cheaper SKUs.

use std::path::Path;

use anyhow::{Result, bail};

use infraplan_lib::cost::{self, Severity};

use crate::output::{
  OutputFormat, format_usd, print_error, print_info, print_json, print_stat, print_success,
  print_warning,
};

pub fn cmd_validate(file: &Path, config: Option<&Path>, format: OutputFormat) -> Result<()> {
  let (settings, prepared) = super::load(file, config)?;
  let manifest = &prepared.manifest;

  let estimate = cost::estimate(manifest);
  let violations = cost::check_policy(manifest, &settings.cost_limits);
  let recommendations = cost::free_tier_recommendations(manifest);
  let errors = violations.iter().filter(|v| v.severity == Severity::Error).count();

  if format.is_json() {
    print_json(&serde_json::json!({
      "valid": errors == 0,
      "project": manifest.metadata.project_name,
      "environment": manifest.environment(),
      "units": prepared.plan.len(),
      "stages": prepared.plan.stages().len(),
      "warnings": prepared.warnings,
      "cost": estimate,
      "violations": violations,
      "recommendations": recommendations,
    }))?;
  } else {
    print_success(&format!(
      "{} ({}): {} resource(s), {} unit(s) in {} stage(s)",
      manifest.metadata.project_name,
      manifest.environment(),
      manifest.resources.len(),
      prepared.plan.len(),
      prepared.plan.stages().len()
    ));

    println!();
    println!("Estimated cost:");
    for item in &estimate.resources {
      let label = match &item.sku {
        Some(sku) => format!("{} [{}]", item.resource, sku),
        None => item.resource.to_string(),
      };
      print_stat(&label, &format_usd(item.monthly_usd));
    }
    print_stat("Total", &format_usd(estimate.total_usd));

    if !recommendations.is_empty() {
      println!();
      for rec in &recommendations {
        print_info(&format!(
          "{}: consider the free tier '{}' instead of '{}'",
          rec.resource, rec.recommended_sku, rec.current_sku
        ));
      }
    }

    for violation in &violations {
      let line = format!("{}: {}", violation.policy, violation.message);
      match violation.severity {
        Severity::Error => print_error(&line),
        Severity::Warning => print_warning(&line),
      }
    }
  }

  if errors > 0 {
    bail!("manifest violates {} cost policy rule(s)", errors);
  }

  Ok(())
}
