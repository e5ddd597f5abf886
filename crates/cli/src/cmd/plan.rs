//! Implementation of the `infraplan plan` command.
//!
//! Prints the stages a manifest would execute in. Units within a stage are
//! independent and run concurrently during apply. With `--state`, each unit is
//! marked against what a previous apply recorded.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use infraplan_lib::backend::FileStateStore;
use infraplan_lib::graph::UnitId;
use infraplan_lib::plan::{self, Plan, PlanDiff};

use crate::output::{OutputFormat, print_info, print_json, print_success, symbols};

/// How one planned unit relates to recorded state.
#[derive(Clone, Copy)]
enum Change<'a> {
  Add,
  Unchanged,
  Renamed(&'a str),
}

pub fn cmd_plan(file: &Path, config: Option<&Path>, state: Option<&Path>, format: OutputFormat, verbose: bool) -> Result<()> {
  let (_, prepared) = super::load(file, config)?;
  let plan = &prepared.plan;

  let diff = match state {
    Some(path) => Some(diff_against(plan, path)?),
    None => None,
  };

  if format.is_json() {
    let mut json = plan_json(plan);
    if let Some(diff) = &diff {
      json["diff"] = serde_json::to_value(diff).context("Failed to serialize plan diff")?;
    }
    return print_json(&json);
  }

  print_success(&format!(
    "Plan for {}: {} unit(s) in {} stage(s)",
    plan.scope(),
    plan.len(),
    plan.stages().len()
  ));
  if let Some(diff) = &diff {
    print_info(&format!(
      "{} to add, {} unchanged, {} renamed, {} orphaned",
      diff.added.len(),
      diff.unchanged.len(),
      diff.renamed.len(),
      diff.orphaned.len()
    ));
  }

  let changes = diff.as_ref().map(changes_by_unit).unwrap_or_default();

  for stage in plan.stages() {
    println!();
    println!("Stage {}:", stage.index);
    for id in &stage.units {
      let Some(unit) = plan.unit(id) else { continue };
      let change = changes.get(id).copied().unwrap_or(Change::Add);
      let marker = match change {
        Change::Add => symbols::ADD.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
        Change::Unchanged => " ".to_string(),
        Change::Renamed(_) => symbols::SKIP.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
      };
      let name = match change {
        Change::Renamed(recorded) => format!("({} {} {})", recorded, symbols::ARROW, unit.name),
        _ => format!("({})", unit.name),
      };
      println!(
        "  {} {} {}",
        marker,
        unit.id,
        name.if_supports_color(Stream::Stdout, |s| s.dimmed())
      );
      if verbose {
        for dependency in &unit.dependencies {
          println!("      {} {}", symbols::ARROW, dependency);
        }
      }
    }
  }

  if let Some(diff) = &diff
    && !diff.orphaned.is_empty()
  {
    println!();
    println!("Recorded but no longer planned:");
    for orphan in &diff.orphaned {
      println!(
        "  {} {} {}",
        symbols::REMOVE.if_supports_color(Stream::Stdout, |s| s.red()),
        orphan.id,
        format!("({})", orphan.name).if_supports_color(Stream::Stdout, |s| s.dimmed())
      );
    }
  }

  Ok(())
}

fn diff_against(plan: &Plan, path: &Path) -> Result<PlanDiff> {
  let store = FileStateStore::new(path);
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(plan::diff(plan, &store))
    .with_context(|| format!("Failed to read state: {}", path.display()))
}

fn changes_by_unit(diff: &PlanDiff) -> HashMap<UnitId, Change<'_>> {
  let mut changes = HashMap::new();
  for id in &diff.added {
    changes.insert(id.clone(), Change::Add);
  }
  for id in &diff.unchanged {
    changes.insert(id.clone(), Change::Unchanged);
  }
  for renamed in &diff.renamed {
    changes.insert(renamed.id.clone(), Change::Renamed(renamed.recorded.as_str()));
  }
  changes
}

fn plan_json(plan: &Plan) -> serde_json::Value {
  let stages: Vec<_> = plan
    .stages()
    .iter()
    .map(|stage| {
      let units: Vec<_> = stage
        .units
        .iter()
        .filter_map(|id| plan.unit(id))
        .map(|unit| {
          serde_json::json!({
            "id": unit.id,
            "name": unit.name,
            "class": unit.kind.class(),
            "dependencies": unit.dependencies,
          })
        })
        .collect();
      serde_json::json!({ "index": stage.index, "units": units })
    })
    .collect();

  serde_json::json!({ "scope": plan.scope(), "units": plan.len(), "stages": stages })
}
