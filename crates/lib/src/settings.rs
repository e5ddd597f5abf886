//! Engine settings.
//!
//! Settings are looked up in this order, first match wins:
//! 1. an explicit path (the CLI's `--config`)
//! 2. the file named by `$INFRAPLAN_CONFIG`
//! 3. `config.yaml` in the user config directory, when it exists
//! 4. built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{APP_NAME, SETTINGS_ENV_VAR, SETTINGS_FILE};
use crate::cost::CostLimits;
use crate::execute::{ExecuteConfig, RetryPolicyError};
use crate::naming::NamingTable;

#[derive(Debug, Error)]
pub enum SettingsError {
  #[error("failed to read settings from {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid settings in {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("invalid settings in {path}: execute.{source}")]
  Invalid {
    path: PathBuf,
    #[source]
    source: RetryPolicyError,
  },
}

/// Naming knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamingSettings {
  /// Fail planning when truncation makes a name identical across environments.
  pub strict_environment_names: bool,

  /// Extra resource-group segment for projects with several deployments.
  pub discriminator: Option<String>,
}

impl Default for NamingSettings {
  fn default() -> Self {
    Self {
      strict_environment_names: true,
      discriminator: None,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
  pub execute: ExecuteConfig,
  pub naming: NamingSettings,
  pub cost_limits: CostLimits,
}

impl Settings {
  /// Load settings following the lookup order above.
  ///
  /// # Errors
  ///
  /// Returns [`SettingsError`] when an explicitly named file (argument or
  /// environment variable) cannot be read, or when any file found is invalid.
  pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
    match settings_path(explicit) {
      Some(path) => Self::from_file(&path),
      None => {
        debug!("no settings file, using defaults");
        Ok(Self::default())
      }
    }
  }

  pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let settings = Self::from_yaml(&content).map_err(|source| SettingsError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    settings.validate().map_err(|source| SettingsError::Invalid {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), "loaded settings");
    Ok(settings)
  }

  pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
    if content.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(content)
  }

  /// Reject values that parse but cannot drive a run.
  pub fn validate(&self) -> Result<(), RetryPolicyError> {
    self.execute.retry.validate()
  }

  /// The naming table these settings describe.
  pub fn naming_table(&self) -> NamingTable {
    let table = NamingTable::standard().with_strict_environment_names(self.naming.strict_environment_names);
    match &self.naming.discriminator {
      Some(discriminator) => table.with_discriminator(discriminator.clone()),
      None => table,
    }
  }
}

fn settings_path(explicit: Option<&Path>) -> Option<PathBuf> {
  if let Some(path) = explicit {
    return Some(path.to_path_buf());
  }
  if let Ok(path) = std::env::var(SETTINGS_ENV_VAR)
    && !path.is_empty()
  {
    return Some(PathBuf::from(path));
  }
  config_dir()
    .map(|dir| dir.join(SETTINGS_FILE))
    .filter(|path| path.is_file())
}

/// Returns the directory for configuration files for the application
#[cfg(windows)]
pub fn config_dir() -> Option<PathBuf> {
  std::env::var("APPDATA").ok().map(|appdata| PathBuf::from(appdata).join(APP_NAME))
}

/// Returns the directory for configuration files for the application
#[cfg(not(windows))]
pub fn config_dir() -> Option<PathBuf> {
  let config_home = match std::env::var("XDG_CONFIG_HOME") {
    Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
    _ => PathBuf::from(std::env::var("HOME").ok()?).join(".config"),
  };
  Some(config_home.join(APP_NAME))
}
