//! Implementation of the `infraplan destroy` command.
//!
//! Tears down every unit of a manifest's plan in reverse stage order. Units
//! with no state entry that the backend does not know about are no-ops.

use std::path::Path;

use anyhow::{Context, Result, bail};

use infraplan_lib::execute::{self, Resolution};

use crate::output::{print_info, print_stat, print_success};

pub fn cmd_destroy(file: &Path, config: Option<&Path>, simulate: bool, state: Option<&Path>) -> Result<()> {
  let collaborators = super::simulated_collaborators(simulate, state)?;
  let (settings, prepared) = super::load(file, config)?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = rt.block_on(async {
    let cancel = super::interrupt_signal();
    execute::destroy(&prepared.plan, &collaborators, &settings.execute, &cancel).await
  });

  match result {
    Ok(outcome) => {
      let destroyed = outcome.report.count_resolved(Resolution::Destroyed);
      if destroyed == 0 {
        print_info("Nothing to destroy.");
      } else {
        print_success(&format!("Destroyed {} unit(s) in {}", destroyed, prepared.plan.scope()));
        print_stat("Already absent", &outcome.report.count_resolved(Resolution::Absent).to_string());
      }
      Ok(())
    }
    Err(failure) => {
      super::apply::print_failure(&failure, state);
      bail!("Destroy failed: {}", failure);
    }
  }
}
