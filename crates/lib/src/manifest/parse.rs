//! Manifest parsing and validation.
//!
//! Parsing walks the raw YAML tree by hand rather than deserializing in one go
//! so that every problem in a manifest is reported at once, not just the first.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::config::ResourceConfig;
use super::types::{AccessPolicy, Environment, Manifest, ProjectMetadata, ResourceRef, ResourceSpec, ResourceType, RoleGrant};
use crate::consts::DEFAULT_LOCATION;

const REQUIRED_METADATA: [&str; 5] = ["project_name", "environment", "business_unit", "cost_center", "owner_email"];
const OPTIONAL_METADATA: [&str; 2] = ["tags", "location"];
const RESOURCE_KEYS: [&str; 6] = ["type", "name", "config", "access", "depends_on", "secrets_store"];
const MAX_PROJECT_NAME_LEN: usize = 21;

/// A single manifest validation failure.
///
/// `position` is the one-based position of the offending resource entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("malformed manifest: {0}")]
  Malformed(String),

  #[error("missing required field: {0}")]
  MissingField(String),

  #[error("invalid {field}: {message}")]
  InvalidField { field: String, message: String },

  #[error("manifest must declare at least one resource")]
  NoResources,

  #[error("resource {position}: {message}")]
  InvalidResource { position: usize, message: String },

  #[error("resource {position}: unknown type '{found}'")]
  UnknownType { position: usize, found: String },

  #[error("resource {position}: duplicate {resource_type} name '{name}'")]
  DuplicateName {
    position: usize,
    resource_type: ResourceType,
    name: String,
  },

  #[error("resource {position}: invalid {resource_type} config: {message}")]
  InvalidConfig {
    position: usize,
    resource_type: ResourceType,
    message: String,
  },
}

/// Every validation failure found in one manifest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
  pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
    self.0.iter()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Display for ValidationErrors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "manifest validation failed with {} error(s)", self.0.len())?;
    for error in &self.0 {
      write!(f, "\n  - {error}")?;
    }
    Ok(())
  }
}

/// A non-fatal finding, such as an unknown config key.
///
/// `position` is the one-based position of the resource entry it concerns, or
/// 0 for findings outside `resources`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationWarning {
  pub position: usize,
  pub message: String,
}

impl ValidationWarning {
  fn manifest(message: String) -> Self {
    Self { position: 0, message }
  }
}

impl fmt::Display for ValidationWarning {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.position {
      0 => f.write_str(&self.message),
      position => write!(f, "resource {}: {}", position, self.message),
    }
  }
}

/// A validated manifest together with its warnings.
#[derive(Debug, Clone)]
pub struct ParsedManifest {
  pub manifest: Manifest,
  pub warnings: Vec<ValidationWarning>,
}

/// Parse and validate a raw YAML manifest.
///
/// # Errors
///
/// Returns every [`ValidationError`] found; nothing downstream runs on an
/// invalid manifest.
pub fn parse_manifest(raw: &str) -> Result<ParsedManifest, ValidationErrors> {
  let root: Value = serde_yaml::from_str(raw).map_err(|e| ValidationErrors(vec![ValidationError::Malformed(e.to_string())]))?;

  let Value::Mapping(root) = root else {
    return Err(ValidationErrors(vec![ValidationError::Malformed(
      "top level must be a mapping".to_string(),
    )]));
  };

  let mut errors = Vec::new();
  let mut warnings = Vec::new();

  let metadata = parse_metadata(root.get("metadata"), &mut errors, &mut warnings);
  let access = parse_access(root.get("access"), &mut errors);

  // Config defaults need an environment even when metadata is broken, so
  // config errors are still collected.
  let environment = metadata.as_ref().map(|m| m.environment).unwrap_or(Environment::Dev);
  let resources = parse_resources(root.get("resources"), environment, &mut errors, &mut warnings);

  if !errors.is_empty() {
    debug!(errors = errors.len(), "manifest rejected");
    return Err(ValidationErrors(errors));
  }

  let (Some(metadata), Some(access)) = (metadata, access) else {
    return Err(ValidationErrors(vec![ValidationError::Malformed(
      "metadata could not be read".to_string(),
    )]));
  };

  Ok(ParsedManifest {
    manifest: Manifest {
      metadata,
      access,
      resources,
    },
    warnings,
  })
}

impl Manifest {
  /// Parse a manifest, logging any warnings.
  pub fn from_yaml(raw: &str) -> Result<Self, ValidationErrors> {
    let parsed = parse_manifest(raw)?;
    for warning in &parsed.warnings {
      warn!(position = warning.position, "{}", warning.message);
    }
    Ok(parsed.manifest)
  }

  /// Serialize back to manifest YAML with every default made explicit.
  pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
    let mut root = Mapping::new();
    root.insert("metadata".into(), serde_yaml::to_value(&self.metadata)?);
    if !self.access.is_default() {
      root.insert("access".into(), serde_yaml::to_value(&self.access)?);
    }

    let mut resources = Vec::with_capacity(self.resources.len());
    for spec in &self.resources {
      let mut entry = Mapping::new();
      entry.insert("type".into(), spec.resource_type.as_str().into());
      entry.insert("name".into(), spec.logical_name.clone().into());
      entry.insert("config".into(), spec.config.to_value()?);
      if !spec.access.is_empty() {
        entry.insert("access".into(), serde_yaml::to_value(&spec.access)?);
      }
      if !spec.depends_on.is_empty() {
        entry.insert("depends_on".into(), serde_yaml::to_value(&spec.depends_on)?);
      }
      if let Some(store) = &spec.secrets_store {
        entry.insert("secrets_store".into(), store.clone().into());
      }
      resources.push(Value::Mapping(entry));
    }
    root.insert("resources".into(), Value::Sequence(resources));

    serde_yaml::to_string(&Value::Mapping(root))
  }
}

fn parse_metadata(
  raw: Option<&Value>,
  errors: &mut Vec<ValidationError>,
  warnings: &mut Vec<ValidationWarning>,
) -> Option<ProjectMetadata> {
  let Some(raw) = raw else {
    errors.push(ValidationError::MissingField("metadata".to_string()));
    return None;
  };
  let Value::Mapping(map) = raw else {
    errors.push(ValidationError::InvalidField {
      field: "metadata".to_string(),
      message: "must be a mapping".to_string(),
    });
    return None;
  };

  let before = errors.len();
  let mut fields = BTreeMap::new();
  for field in REQUIRED_METADATA {
    match map.get(field).map(scalar_string) {
      Some(Some(value)) if !value.trim().is_empty() => {
        fields.insert(field, value.trim().to_string());
      }
      Some(Some(_)) | None => errors.push(ValidationError::MissingField(format!("metadata.{field}"))),
      Some(None) => errors.push(ValidationError::InvalidField {
        field: format!("metadata.{field}"),
        message: "must be a string".to_string(),
      }),
    }
  }

  for key in map.keys() {
    let key = key.as_str().unwrap_or("<non-string key>");
    if !REQUIRED_METADATA.contains(&key) && !OPTIONAL_METADATA.contains(&key) {
      warnings.push(ValidationWarning::manifest(format!("unknown metadata field '{key}' ignored")));
    }
  }

  let environment = fields.get("environment").and_then(|raw| match raw.parse::<Environment>() {
    Ok(env) => Some(env),
    Err(message) => {
      errors.push(ValidationError::InvalidField {
        field: "metadata.environment".to_string(),
        message,
      });
      None
    }
  });

  if let Some(project) = fields.get("project_name")
    && let Err(message) = check_project_name(project)
  {
    errors.push(ValidationError::InvalidField {
      field: "metadata.project_name".to_string(),
      message,
    });
  }

  if let Some(email) = fields.get("owner_email")
    && !email.contains('@')
  {
    errors.push(ValidationError::InvalidField {
      field: "metadata.owner_email".to_string(),
      message: format!("'{email}' is not an email address"),
    });
  }

  let tags = parse_tags(map.get("tags"), errors);

  let location = match map.get("location") {
    None | Some(Value::Null) => DEFAULT_LOCATION.to_string(),
    Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
    Some(_) => {
      errors.push(ValidationError::InvalidField {
        field: "metadata.location".to_string(),
        message: "must be a non-empty string".to_string(),
      });
      DEFAULT_LOCATION.to_string()
    }
  };

  if errors.len() != before {
    return None;
  }

  Some(ProjectMetadata {
    project_name: fields.remove("project_name")?,
    environment: environment?,
    business_unit: fields.remove("business_unit")?,
    cost_center: fields.remove("cost_center")?,
    owner_email: fields.remove("owner_email")?,
    tags,
    location,
  })
}

/// Project names feed every naming rule, so they are held to the strictest
/// character set: a lowercase letter followed by lowercase letters, digits or
/// hyphens.
fn check_project_name(name: &str) -> Result<(), String> {
  let mut chars = name.chars();
  let Some(first) = chars.next() else {
    return Err("must not be empty".to_string());
  };
  if !first.is_ascii_lowercase() {
    return Err(format!("'{name}' must start with a lowercase letter"));
  }
  if name.len() < 2 || name.len() > MAX_PROJECT_NAME_LEN {
    return Err(format!("'{name}' must be 2 to {MAX_PROJECT_NAME_LEN} characters"));
  }
  if let Some(bad) = chars.find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')) {
    return Err(format!("'{name}' contains invalid character '{bad}'"));
  }
  Ok(())
}

fn parse_tags(raw: Option<&Value>, errors: &mut Vec<ValidationError>) -> BTreeMap<String, String> {
  let mut tags = BTreeMap::new();
  match raw {
    None | Some(Value::Null) => {}
    Some(Value::Mapping(map)) => {
      for (key, value) in map {
        match (key.as_str(), scalar_string(value)) {
          (Some(k), Some(v)) => {
            tags.insert(k.to_string(), v);
          }
          _ => errors.push(ValidationError::InvalidField {
            field: "metadata.tags".to_string(),
            message: "tags must map strings to scalar values".to_string(),
          }),
        }
      }
    }
    Some(_) => errors.push(ValidationError::InvalidField {
      field: "metadata.tags".to_string(),
      message: "must be a mapping".to_string(),
    }),
  }
  tags
}

fn parse_access(raw: Option<&Value>, errors: &mut Vec<ValidationError>) -> Option<AccessPolicy> {
  let Some(raw) = raw.filter(|v| !v.is_null()) else {
    return Some(AccessPolicy::default());
  };
  match serde_yaml::from_value::<AccessPolicy>(raw.clone()) {
    Ok(policy) => {
      if let Some(empty) = policy.groups.iter().position(|g| g.trim().is_empty()) {
        errors.push(ValidationError::InvalidField {
          field: format!("access.groups[{empty}]"),
          message: "group suffix must not be empty".to_string(),
        });
        return None;
      }
      Some(policy)
    }
    Err(e) => {
      errors.push(ValidationError::InvalidField {
        field: "access".to_string(),
        message: e.to_string(),
      });
      None
    }
  }
}

fn parse_resources(
  raw: Option<&Value>,
  environment: Environment,
  errors: &mut Vec<ValidationError>,
  warnings: &mut Vec<ValidationWarning>,
) -> Vec<ResourceSpec> {
  let entries = match raw {
    None => {
      errors.push(ValidationError::MissingField("resources".to_string()));
      return Vec::new();
    }
    Some(Value::Sequence(entries)) => entries,
    Some(_) => {
      errors.push(ValidationError::InvalidField {
        field: "resources".to_string(),
        message: "must be a list".to_string(),
      });
      return Vec::new();
    }
  };

  if entries.is_empty() {
    errors.push(ValidationError::NoResources);
    return Vec::new();
  }

  let mut seen: HashSet<(ResourceType, String)> = HashSet::new();
  let mut resources = Vec::with_capacity(entries.len());

  for (index, entry) in entries.iter().enumerate() {
    let position = index + 1;
    let Value::Mapping(entry) = entry else {
      errors.push(ValidationError::InvalidResource {
        position,
        message: "entry must be a mapping".to_string(),
      });
      continue;
    };

    for key in entry.keys() {
      let key = key.as_str().unwrap_or("<non-string key>");
      if !RESOURCE_KEYS.contains(&key) {
        warnings.push(ValidationWarning {
          position,
          message: format!("unknown resource field '{key}' ignored"),
        });
      }
    }

    let resource_type = match entry.get("type") {
      None => {
        errors.push(ValidationError::InvalidResource {
          position,
          message: "missing type".to_string(),
        });
        None
      }
      Some(value) => {
        let found = scalar_string(value).unwrap_or_default();
        match found.parse::<ResourceType>() {
          Ok(rt) => Some(rt),
          Err(_) => {
            errors.push(ValidationError::UnknownType { position, found });
            None
          }
        }
      }
    };

    let logical_name = match entry.get("name").and_then(scalar_string) {
      Some(name) if !name.trim().is_empty() => Some(name.trim().to_string()),
      _ => {
        errors.push(ValidationError::InvalidResource {
          position,
          message: "missing name".to_string(),
        });
        None
      }
    };

    let access = read_list::<RoleGrant>(entry, "access", position, errors);
    for grant in &access {
      if grant.group.trim().is_empty() || grant.role.trim().is_empty() {
        errors.push(ValidationError::InvalidResource {
          position,
          message: "access grants need a group and a role".to_string(),
        });
      }
    }
    let depends_on = read_list::<ResourceRef>(entry, "depends_on", position, errors);

    let secrets_store = match entry.get("secrets_store") {
      None | Some(Value::Null) => None,
      Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
      Some(_) => {
        errors.push(ValidationError::InvalidResource {
          position,
          message: "secrets_store must be a key vault name".to_string(),
        });
        None
      }
    };

    let (Some(resource_type), Some(logical_name)) = (resource_type, logical_name) else {
      continue;
    };

    if !seen.insert((resource_type, logical_name.clone())) {
      errors.push(ValidationError::DuplicateName {
        position,
        resource_type,
        name: logical_name.clone(),
      });
    }

    let parsed = ResourceConfig::parse(resource_type, environment, entry.get("config"));
    for key in parsed.unknown_keys {
      warnings.push(ValidationWarning {
        position,
        message: format!("unknown {resource_type} config key '{key}' ignored"),
      });
    }

    match parsed.config {
      Ok(config) => resources.push(ResourceSpec {
        resource_type,
        logical_name,
        config,
        index,
        access,
        depends_on,
        secrets_store,
      }),
      Err(message) => errors.push(ValidationError::InvalidConfig {
        position,
        resource_type,
        message,
      }),
    }
  }

  resources
}

fn read_list<T: serde::de::DeserializeOwned>(
  entry: &Mapping,
  key: &str,
  position: usize,
  errors: &mut Vec<ValidationError>,
) -> Vec<T> {
  match entry.get(key) {
    None | Some(Value::Null) => Vec::new(),
    Some(value) => serde_yaml::from_value(value.clone()).unwrap_or_else(|e| {
      errors.push(ValidationError::InvalidResource {
        position,
        message: format!("invalid {key}: {e}"),
      });
      Vec::new()
    }),
  }
}

fn scalar_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}
