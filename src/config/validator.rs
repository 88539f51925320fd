//! Configuration validation for deployment configs.
//!
//! Validation runs on the defaulted configuration and collects every problem
//! before failing with the first one, so nothing reaches the provider with a
//! bad configuration.

use crate::error::{ConfigError, DeployError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{DeployConfig, ResourceConfig};
use crate::stack::ChangeSetType;

/// Maximum stack name length accepted by the control plane.
const MAX_STACK_NAME_LEN: usize = 128;

/// Validator for deployment configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error.
    pub error: ConfigError,
}

impl ValidationResult {
    /// Returns true when no errors were collected.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, field: &str, error: ConfigError) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            error,
        });
    }
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a deployment configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error found if validation fails.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let mut result = self.collect(config);

        if result.is_valid() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first = result.errors.remove(0);
            Err(DeployError::Config(first.error))
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn collect(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(config, &mut result);
        Self::validate_deployment(config, &mut result);
        Self::validate_resources(config, &mut result);
        Self::validate_assets(config, &mut result);

        result
    }

    fn validate_project(config: &DeployConfig, result: &mut ValidationResult) {
        let project = &config.project;

        if project.name.is_empty() {
            result.push(
                "project.name",
                ConfigError::validation("Project name cannot be empty", "project.name"),
            );
        } else if !is_valid_name(&project.name) {
            result.push(
                "project.name",
                ConfigError::validation(
                    format!(
                        "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        project.name
                    ),
                    "project.name",
                ),
            );
        }

        if project.stage.is_empty() {
            result.push(
                "project.stage",
                ConfigError::validation("Stage cannot be empty", "project.stage"),
            );
        }
    }

    fn validate_deployment(config: &DeployConfig, result: &mut ValidationResult) {
        let deployment = &config.deployment;

        if deployment.bucket.as_ref().is_none_or(String::is_empty) {
            result.push("deployment.bucket", ConfigError::MissingBucket);
        }

        if let Some(stack_name) = &deployment.stack_name {
            if !is_valid_stack_name(stack_name) {
                result.push(
                    "deployment.stack_name",
                    ConfigError::validation(
                        format!(
                            "Stack name '{stack_name}' must start with a letter, contain only letters, digits and hyphens, and be at most {MAX_STACK_NAME_LEN} characters"
                        ),
                        "deployment.stack_name",
                    ),
                );
            }
        }

        if deployment.plan_file.as_ref().is_some_and(|f| f.trim().is_empty()) {
            result.push(
                "deployment.plan_file",
                ConfigError::validation("Plan file name cannot be empty", "deployment.plan_file"),
            );
        }

        let has_imports = !deployment.import_resources.is_empty();
        match deployment.change_set_type {
            Some(ChangeSetType::Update) => result.push(
                "deployment.change_set_type",
                ConfigError::ConflictingChangeSetType {
                    requested: ChangeSetType::Update.to_string(),
                    reason: String::from("UPDATE is chosen automatically and cannot be requested"),
                },
            ),
            Some(ChangeSetType::Import) if !has_imports => result.push(
                "deployment.change_set_type",
                ConfigError::ConflictingChangeSetType {
                    requested: ChangeSetType::Import.to_string(),
                    reason: String::from("IMPORT requires deployment.import_resources"),
                },
            ),
            Some(ChangeSetType::Create) | None if has_imports => result.push(
                "deployment.import_resources",
                ConfigError::ConflictingChangeSetType {
                    requested: deployment
                        .change_set_type
                        .unwrap_or(ChangeSetType::Create)
                        .to_string(),
                    reason: String::from("import_resources requires change_set_type IMPORT"),
                },
            ),
            _ => {}
        }

        let logical_ids: HashSet<&str> = config.resources.iter().map(ResourceConfig::name).collect();
        for import in &deployment.import_resources {
            if import.identifier.is_empty() {
                result.push(
                    "deployment.import_resources",
                    ConfigError::validation(
                        format!("Import '{}' has no identifier", import.logical_id),
                        "deployment.import_resources",
                    ),
                );
            }
            if !logical_ids.contains(import.logical_id.as_str()) {
                result.warnings.push(format!(
                    "Imported resource '{}' is not declared in resources; the template must define it",
                    import.logical_id
                ));
            }
        }
    }

    fn validate_resources(config: &DeployConfig, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for resource in &config.resources {
            if resource.name().is_empty() {
                result.push(
                    "resources",
                    ConfigError::validation(
                        format!("A {} resource has an empty name", resource.kind()),
                        "resources",
                    ),
                );
                continue;
            }
            if !seen.insert(resource.name()) {
                result.push(
                    "resources",
                    ConfigError::DuplicateName {
                        resource_type: resource.kind().to_string(),
                        name: resource.name().to_string(),
                    },
                );
            }
        }

        let functions: HashSet<&str> = config.functions().map(|f| f.name.as_str()).collect();
        let has_functions = !functions.is_empty();

        for resource in &config.resources {
            if let ResourceConfig::Api(api) = resource {
                if !functions.contains(api.function.as_str()) {
                    result.push(
                        "resources",
                        ConfigError::validation(
                            format!(
                                "API '{}' targets unknown function '{}'",
                                api.name, api.function
                            ),
                            "resources",
                        ),
                    );
                }
            }
        }

        if has_functions && config.bundle.is_none() {
            result.push(
                "bundle",
                ConfigError::validation("Functions are declared but no bundle is configured", "bundle"),
            );
        }

        if let Some(bundle) = &config.bundle {
            let remote = bundle.bucket.is_some() && bundle.key.is_some();
            if bundle.path.is_none() && !remote {
                result.push(
                    "bundle",
                    ConfigError::validation(
                        "Bundle needs either a local path or both bucket and key",
                        "bundle",
                    ),
                );
            }
        }
    }

    fn validate_assets(config: &DeployConfig, result: &mut ValidationResult) {
        for folder in &config.assets {
            if folder.source.as_os_str().is_empty() {
                result.push(
                    "assets",
                    ConfigError::validation("Asset folder source cannot be empty", "assets"),
                );
            }
        }
    }
}

/// Checks if a name is valid (lowercase alphanumeric with hyphens).
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

/// Checks a stack name against the control plane's naming rule.
fn is_valid_stack_name(name: &str) -> bool {
    name.len() <= MAX_STACK_NAME_LEN
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}
