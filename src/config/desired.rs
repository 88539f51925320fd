//! The desired state of a single deployment attempt.
//!
//! [`DesiredState`] is built once from a [`DeployConfig`]: defaults are filled
//! in first, then the result is validated. It is immutable afterwards and
//! shared by every phase of the deployment.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::Result;
use crate::planner::PlanFormat;
use crate::stack::{ChangeSetType, ImportResource};

use super::spec::{AssetFolderConfig, DeployConfig, ResourceConfig};
use super::validator::ConfigValidator;

/// Default plan document file name.
pub const DEFAULT_PLAN_FILE: &str = "template";

/// Capability acknowledged when none are configured.
pub const DEFAULT_CAPABILITY: &str = "CAPABILITY_IAM";

/// Where the code bundle comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleSource {
    /// A local archive to upload to the deployment bucket.
    Local(PathBuf),
    /// An object already uploaded by the packager, consumed as-is.
    Remote {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },
}

/// A static asset folder with its target bucket resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFolder {
    /// Local folder.
    pub source: PathBuf,
    /// Key prefix.
    pub prefix: String,
    /// Target bucket.
    pub bucket: String,
}

/// Validated, defaulted configuration of one deployment attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    /// Project name.
    pub project: String,
    /// Stage name.
    pub stage: String,
    /// Region, if pinned.
    pub region: Option<String>,
    /// Deployment bucket.
    pub bucket: String,
    /// Key prefix for deployment artifacts.
    pub prefix: String,
    /// Stack name.
    pub stack_name: String,
    /// Plan document file name.
    pub plan_file: String,
    /// Explicit plan format.
    pub format: Option<PlanFormat>,
    /// Change-set type used when the stack does not exist yet.
    pub change_set_type: ChangeSetType,
    /// Resources to import.
    pub import_resources: Vec<ImportResource>,
    /// Acknowledged capabilities.
    pub capabilities: Vec<String>,
    /// Stack parameters.
    pub parameters: BTreeMap<String, String>,
    /// Tags for the stack and the bucket.
    pub tags: BTreeMap<String, String>,
    /// Code bundle.
    pub bundle: Option<BundleSource>,
    /// Static asset folders.
    pub assets: Vec<AssetFolder>,
    /// Resources in declaration order.
    pub resources: Vec<ResourceConfig>,
}

impl DesiredState {
    /// Builds the desired state: defaults first, then validation.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the defaulted configuration is invalid.
    pub fn from_config(mut config: DeployConfig) -> Result<Self> {
        apply_defaults(&mut config);
        ConfigValidator::new().validate(&config)?;

        let deployment = config.deployment;
        let bucket = deployment.bucket.unwrap_or_default();

        let bundle = config.bundle.and_then(|b| match (b.path, b.bucket, b.key) {
            (Some(path), _, _) => Some(BundleSource::Local(path)),
            (None, Some(bucket), Some(key)) => Some(BundleSource::Remote { bucket, key }),
            _ => None,
        });

        let assets = config
            .assets
            .into_iter()
            .map(|AssetFolderConfig { source, prefix, bucket: target }| AssetFolder {
                source,
                prefix,
                bucket: target.unwrap_or_else(|| bucket.clone()),
            })
            .collect();

        let import_resources = deployment
            .import_resources
            .into_iter()
            .map(|i| ImportResource {
                logical_id: i.logical_id,
                resource_type: i.resource_type,
                identifier: i.identifier,
            })
            .collect();

        Ok(Self {
            project: config.project.name,
            stage: config.project.stage,
            region: config.project.region,
            prefix: deployment.prefix.unwrap_or_default(),
            stack_name: deployment.stack_name.unwrap_or_default(),
            plan_file: deployment
                .plan_file
                .unwrap_or_else(|| DEFAULT_PLAN_FILE.to_string()),
            format: deployment.format,
            change_set_type: deployment.change_set_type.unwrap_or(ChangeSetType::Create),
            import_resources,
            capabilities: deployment.capabilities,
            parameters: deployment.parameters,
            tags: deployment.tags,
            bucket,
            bundle,
            assets,
            resources: config.resources,
        })
    }

    /// Returns true if any resource publishes an API stage.
    #[must_use]
    pub fn declares_api_stage(&self) -> bool {
        self.resources
            .iter()
            .any(|r| matches!(r, ResourceConfig::Api(_)))
    }
}

/// Fills in every optional field that has a default.
fn apply_defaults(config: &mut DeployConfig) {
    let project = &config.project;
    let deployment = &mut config.deployment;

    if deployment.stack_name.is_none() {
        deployment.stack_name = Some(format!("{}-{}", project.name, project.stage));
    }

    if deployment.prefix.is_none() {
        deployment.prefix = Some(format!("{}/{}/", project.name, project.stage));
    }

    if deployment.capabilities.is_empty() {
        deployment.capabilities.push(DEFAULT_CAPABILITY.to_string());
    }

    deployment
        .tags
        .entry(String::from("stack-deploy:project"))
        .or_insert_with(|| project.name.clone());
    deployment
        .tags
        .entry(String::from("stack-deploy:stage"))
        .or_insert_with(|| project.stage.clone());
}
