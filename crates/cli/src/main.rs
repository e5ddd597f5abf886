mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::output::OutputFormat;

/// infraplan - plan and provision cloud resources from an application manifest
#[derive(Parser)]
#[command(name = "infraplan")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Settings file (default: $INFRAPLAN_CONFIG, then the user config directory)
  #[arg(long, global = true, value_name = "PATH")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a manifest and estimate its monthly cost
  Validate {
    /// Path to the manifest (default: manifest.yaml)
    #[arg(default_value = "manifest.yaml")]
    file: PathBuf,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
  },

  /// Show the staged execution plan for a manifest
  Plan {
    /// Path to the manifest (default: manifest.yaml)
    #[arg(default_value = "manifest.yaml")]
    file: PathBuf,

    /// Compare against unit state written by a previous apply
    #[arg(long, value_name = "PATH")]
    state: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
  },

  /// Provision every unit of a manifest
  Apply {
    /// Path to the manifest (default: manifest.yaml)
    #[arg(default_value = "manifest.yaml")]
    file: PathBuf,

    /// Provision against the simulated backend
    #[arg(long)]
    simulate: bool,

    /// Persist unit state to this file (default: in memory)
    #[arg(long, value_name = "PATH")]
    state: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
  },

  /// Tear down every unit of a manifest, last stage first
  Destroy {
    /// Path to the manifest (default: manifest.yaml)
    #[arg(default_value = "manifest.yaml")]
    file: PathBuf,

    /// Destroy against the simulated backend
    #[arg(long)]
    simulate: bool,

    /// Unit state written by a previous apply
    #[arg(long, value_name = "PATH")]
    state: Option<PathBuf>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let config = cli.config.as_deref();
  match cli.command {
    Commands::Validate { file, format } => cmd::cmd_validate(&file, config, format),
    Commands::Plan { file, state, format } => cmd::cmd_plan(&file, config, state.as_deref(), format, cli.verbose),
    Commands::Apply {
      file,
      simulate,
      state,
      format,
    } => cmd::cmd_apply(&file, config, simulate, state.as_deref(), format),
    Commands::Destroy { file, simulate, state } => cmd::cmd_destroy(&file, config, simulate, state.as_deref()),
  }
}
