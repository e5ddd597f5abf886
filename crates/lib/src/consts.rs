/// Location used when a manifest does not name one.
pub const DEFAULT_LOCATION: &str = "eastus";

/// Value of the `ManagedBy` system tag.
pub const MANAGED_BY: &str = "infraplan";

/// Security groups that exist for every project.
pub const STANDARD_GROUPS: [&str; 2] = ["admins", "readers"];

/// Environment variable naming an engine settings file.
pub const SETTINGS_ENV_VAR: &str = "INFRAPLAN_CONFIG";

/// Directory name under the user's config directory.
pub const APP_NAME: &str = "infraplan";

/// Settings file name inside the config directory.
pub const SETTINGS_FILE: &str = "config.yaml";
