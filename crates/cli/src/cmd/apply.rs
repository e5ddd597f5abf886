//! Implementation of the `infraplan apply` command.
//!
//! Prepares a manifest and drives its plan to completion against the
//! simulated backend. With `--state`, unit state survives between runs, so a
//! second apply reuses everything the first one created.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::info;

use infraplan_lib::execute::{self, PartialFailure, Resolution, RunReport, UnitStatus};

use crate::output::{
  OutputFormat, format_duration, print_error, print_json, print_stat, print_success, print_warning, status_symbol,
};

pub fn cmd_apply(
  file: &Path,
  config: Option<&Path>,
  simulate: bool,
  state: Option<&Path>,
  format: OutputFormat,
) -> Result<()> {
  let collaborators = super::simulated_collaborators(simulate, state)?;
  let (settings, prepared) = super::load(file, config)?;

  let started = Instant::now();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = rt.block_on(async {
    let cancel = super::interrupt_signal();
    execute::apply(&prepared.plan, &collaborators, &settings.execute, &cancel).await
  });
  let elapsed = started.elapsed();

  match result {
    Ok(outcome) => {
      info!(units = outcome.report.total(), "apply complete");
      if format.is_json() {
        return print_json(&outcome.outputs);
      }

      print_success(&format!(
        "Applied {} unit(s) in {}",
        outcome.report.total(),
        format_duration(elapsed)
      ));
      print_resolutions(&outcome.report);

      println!();
      println!("Resource group: {}", outcome.outputs.resource_group);
      for (reference, resource) in &outcome.outputs.resources {
        match &resource.endpoint {
          Some(endpoint) => print_stat(reference, &format!("{} ({})", resource.name, endpoint)),
          None => print_stat(reference, &resource.name),
        }
      }
      Ok(())
    }
    Err(failure) => {
      if format.is_json() {
        print_json(&failure.report)?;
      } else {
        print_failure(&failure, state);
      }
      bail!("Apply failed: {}", failure);
    }
  }
}

fn print_resolutions(report: &RunReport) {
  print_stat("Created", &report.count_resolved(Resolution::Created).to_string());
  print_stat("Reused", &report.count_resolved(Resolution::Reused).to_string());
  print_stat("Adopted", &report.count_resolved(Resolution::Adopted).to_string());
}

/// Per-unit breakdown of a run that did not fully succeed.
pub(super) fn print_failure(failure: &PartialFailure, state: Option<&Path>) {
  for (id, record) in &failure.report.records {
    match record.status {
      UnitStatus::Failed => {
        let reason = record.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
        print_error(&format!("{} {}: {}", status_symbol(record.status), id, reason));
      }
      UnitStatus::Skipped => {
        let reason = record
          .skipped_because
          .as_ref()
          .map(|r| format!("depends on failed {r}"))
          .unwrap_or_default();
        print_warning(&format!("{} {}: {}", status_symbol(record.status), id, reason));
      }
      UnitStatus::Pending => eprintln!("  {} {}: not started", status_symbol(record.status), id),
      UnitStatus::Succeeded | UnitStatus::Running => {}
    }
  }

  if failure.cancelled {
    print_warning("Run was cancelled before every unit started");
  }
  eprintln!("{}", retry_hint(failure.retry_ids().len(), state));
}

/// Only a persisted state file lets a re-run skip what already succeeded.
fn retry_hint(remaining: usize, state: Option<&Path>) -> String {
  match state {
    Some(path) => format!(
      "Re-run with --state {} to retry the {} unit(s) that did not succeed.",
      path.display(),
      remaining
    ),
    None => format!(
      "{} unit(s) did not succeed. State was kept in memory only; pass --state <PATH> so a re-run skips units that already succeeded.",
      remaining
    ),
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;

  #[test]
  fn retry_hint_names_the_state_file() {
    let path = PathBuf::from("state.json");
    let hint = retry_hint(3, Some(path.as_path()));
    assert!(hint.contains("--state state.json"));
    assert!(hint.contains("3 unit(s)"));
  }

  #[test]
  fn retry_hint_without_state_asks_for_one() {
    let hint = retry_hint(2, None);
    assert!(hint.contains("pass --state <PATH>"));
    assert!(!hint.starts_with("Re-run"));
  }
}
