//! Configuration specification types for the deployment system.
//!
//! This module defines all the structs that map to the `stack-deploy.yaml`
//! file. Optional fields are filled in by [`super::DesiredState`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::planner::PlanFormat;
use crate::stack::ChangeSetType;

/// The root configuration structure for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// Where and how the stack is deployed.
    #[serde(default)]
    pub deployment: DeploymentConfig,
    /// Code bundle produced by the packager.
    #[serde(default)]
    pub bundle: Option<BundleConfig>,
    /// Static asset folders synchronized into a bucket.
    #[serde(default)]
    pub assets: Vec<AssetFolderConfig>,
    /// Resources rendered into the stack template, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Stage (e.g., "dev", "staging", "prod").
    #[serde(default = "default_stage")]
    pub stage: String,
    /// AWS region; the SDK default chain is used when absent.
    #[serde(default)]
    pub region: Option<String>,
}

/// Deployment target configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentConfig {
    /// Bucket holding the plan document and bundles. Required.
    #[serde(default)]
    pub bucket: Option<String>,
    /// Key prefix inside the bucket (defaults to `<project>/<stage>/`).
    #[serde(default)]
    pub prefix: Option<String>,
    /// Stack name (defaults to `<project>-<stage>`).
    #[serde(default)]
    pub stack_name: Option<String>,
    /// File name of the uploaded plan document (defaults to `template`).
    #[serde(default)]
    pub plan_file: Option<String>,
    /// Explicit plan format; inferred from `plan_file` when absent.
    #[serde(default)]
    pub format: Option<PlanFormat>,
    /// Explicit change-set type. Only `CREATE` and `IMPORT` may be requested.
    #[serde(default)]
    pub change_set_type: Option<ChangeSetType>,
    /// Existing resources to import into the stack.
    #[serde(default)]
    pub import_resources: Vec<ImportResourceConfig>,
    /// Capabilities acknowledged on change-set creation.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Stack parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Tags applied to the stack and the deployment bucket.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A resource to adopt through an `IMPORT` change set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportResourceConfig {
    /// Logical id in the template.
    pub logical_id: String,
    /// Resource type (e.g. `AWS::S3::Bucket`).
    pub resource_type: String,
    /// Identifier properties of the live resource.
    pub identifier: BTreeMap<String, String>,
}

/// Code bundle location.
///
/// Either a local archive uploaded by the synchronizer, or an object that
/// the packager already placed in a bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleConfig {
    /// Local archive to upload.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Bucket of a pre-uploaded bundle.
    #[serde(default)]
    pub bucket: Option<String>,
    /// Key of a pre-uploaded bundle.
    #[serde(default)]
    pub key: Option<String>,
}

/// A folder of static assets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetFolderConfig {
    /// Local folder.
    pub source: PathBuf,
    /// Key prefix for uploaded files.
    #[serde(default)]
    pub prefix: String,
    /// Target bucket (defaults to the deployment bucket).
    #[serde(default)]
    pub bucket: Option<String>,
}

/// A resource definition. The `kind` selects the template handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceConfig {
    /// A function running the code bundle.
    Function(FunctionConfig),
    /// An HTTP API with a deployed stage proxying to a function.
    Api(ApiConfig),
    /// A resource passed to the template verbatim.
    Raw(RawResourceConfig),
}

/// Function resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionConfig {
    /// Name, also used to derive logical ids.
    pub name: String,
    /// Entry point inside the bundle.
    pub handler: String,
    /// Runtime identifier.
    #[serde(default = "default_runtime")]
    pub runtime: String,
    /// Memory size in MB.
    #[serde(default = "default_memory")]
    pub memory_mb: u32,
    /// Timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
    /// Environment variables.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// API resource with a single stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiConfig {
    /// Name, also used to derive logical ids.
    pub name: String,
    /// Function receiving every request.
    pub function: String,
    /// Stage name (defaults to the project stage).
    #[serde(default)]
    pub stage: Option<String>,
}

/// Verbatim template resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawResourceConfig {
    /// Logical id.
    pub name: String,
    /// Resource type.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Properties block.
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl ResourceConfig {
    /// Declared name of the resource.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Function(f) => &f.name,
            Self::Api(a) => &a.name,
            Self::Raw(r) => &r.name,
        }
    }

    /// Kind label, as written in the configuration.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Function(_) => "function",
            Self::Api(_) => "api",
            Self::Raw(_) => "raw",
        }
    }
}

impl DeployConfig {
    /// Returns the functions declared in the configuration.
    pub fn functions(&self) -> impl Iterator<Item = &FunctionConfig> {
        self.resources.iter().filter_map(|r| match r {
            ResourceConfig::Function(f) => Some(f),
            _ => None,
        })
    }
}

fn default_stage() -> String {
    String::from("dev")
}

fn default_runtime() -> String {
    String::from("nodejs20.x")
}

const fn default_memory() -> u32 {
    256
}

const fn default_timeout() -> u32 {
    10
}
