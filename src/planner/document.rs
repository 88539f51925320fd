//! Plan document model, serialization and object keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::assets::normalize_prefix;
use crate::error::{AssetError, ConfigError, Result};

/// Template format version written into every plan document.
pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// Serialization format of the plan document.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlanFormat {
    /// Pretty-printed JSON with a 2-space indent.
    #[default]
    #[serde(alias = "JSON")]
    Json,
    /// YAML.
    #[serde(alias = "YAML", alias = "yml")]
    Yaml,
}

impl PlanFormat {
    /// Extension appended to file names that lack one of this format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yml",
        }
    }

    /// Content type of the serialized document.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Yaml => "application/yaml",
        }
    }

    /// Infers the format from a file name suffix.
    #[must_use]
    pub fn from_file_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".yml") || lower.ends_with(".yaml") {
            Self::Yaml
        } else {
            Self::Json
        }
    }

    /// Explicit format if any, otherwise inferred from the file name.
    #[must_use]
    pub fn resolve(explicit: Option<Self>, file_name: &str) -> Self {
        explicit.unwrap_or_else(|| Self::from_file_name(file_name))
    }

    /// True if `name` already carries an extension of this format.
    fn has_extension(self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        match self {
            Self::Json => lower.ends_with(".json"),
            Self::Yaml => lower.ends_with(".yml") || lower.ends_with(".yaml"),
        }
    }
}

/// Object key of the plan document.
///
/// The prefix is normalized, and the format's extension is appended when the
/// file name does not already end with one.
///
/// ```
/// use stack_deploy::planner::{plan_key, PlanFormat};
///
/// assert_eq!(plan_key("assets-prefix", "123", PlanFormat::Json), "assets-prefix/123.json");
/// assert_eq!(plan_key("/a//b\\", "t.yaml", PlanFormat::Yaml), "a/b/t.yaml");
/// ```
#[must_use]
pub fn plan_key(prefix: &str, file_name: &str, format: PlanFormat) -> String {
    let name = file_name.trim_start_matches(['/', '\\']);
    let name = if format.has_extension(name) {
        name.to_string()
    } else {
        format!("{name}.{}", format.extension())
    };

    normalize_prefix(&format!("{}{name}", normalize_prefix(prefix)))
        .trim_end_matches('/')
        .to_string()
}

/// HTTPS URL of an object.
#[must_use]
pub fn object_url(bucket: &str, region: Option<&str>, key: &str) -> String {
    let path = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");

    match region {
        Some(region) => format!("https://{bucket}.s3.{region}.amazonaws.com/{path}"),
        None => format!("https://{bucket}.s3.amazonaws.com/{path}"),
    }
}

/// Uploaded plan document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanLocation {
    /// Bucket.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// URL handed to the control plane.
    pub url: String,
}

/// Reference to the code bundle in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleRef {
    /// Bucket.
    pub bucket: String,
    /// Object key.
    pub key: String,
}

/// Stack template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    /// Format version.
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    /// Description.
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Resources by logical id.
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, Value>,
    /// Outputs by name.
    #[serde(rename = "Outputs", skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Value>,
}

impl Template {
    /// Creates an empty template.
    #[must_use]
    pub fn new(description: Option<String>) -> Self {
        Self {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            description,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Adds a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the logical id is already taken.
    pub fn add_resource(&mut self, logical_id: impl Into<String>, resource: Value) -> Result<()> {
        let logical_id = logical_id.into();
        if self.resources.contains_key(&logical_id) {
            return Err(ConfigError::DuplicateName {
                resource_type: String::from("logical id"),
                name: logical_id,
            }
            .into());
        }
        self.resources.insert(logical_id, resource);
        Ok(())
    }

    /// Adds an output with the given value expression.
    pub fn add_output(&mut self, name: impl Into<String>, value: Value) {
        self.outputs
            .insert(name.into(), serde_json::json!({ "Value": value }));
    }

    /// Serializes the template.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self, format: PlanFormat) -> Result<Vec<u8>> {
        let bytes = match format {
            PlanFormat::Json => serde_json::to_vec_pretty(self).map_err(|e| e.to_string()),
            PlanFormat::Yaml => serde_yaml::to_string(self)
                .map(String::into_bytes)
                .map_err(|e| e.to_string()),
        };

        bytes.map_err(|message| AssetError::Serialize { message }.into())
    }
}
