//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, DeployError, Result};
use std::path::Path;
use tracing::{debug, info};

use super::spec::DeployConfig;

/// Configuration parser for loading deployment configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<std::path::PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// Relative bundle and asset paths are resolved against the base path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(DeployError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let mut config = self.parse_yaml(&content, Some(path))?;
        self.resolve_paths(&mut config);
        Ok(config)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        debug!("Parsing YAML configuration");

        let config: DeployConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            DeployError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Successfully parsed configuration for project: {}",
            config.project.name
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `STACK_DEPLOY_<KEY>` (e.g., `STACK_DEPLOY_BUCKET`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let mut config = self.load_file(path)?;

        apply_overrides(&mut config, |name| std::env::var(name).ok());

        Ok(config)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| std::path::PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                DeployError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Makes relative local paths absolute against the base path.
    fn resolve_paths(&self, config: &mut DeployConfig) {
        let Some(base) = &self.base_path else {
            return;
        };

        if let Some(path) = config.bundle.as_mut().and_then(|b| b.path.as_mut()) {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }

        for folder in &mut config.assets {
            if folder.source.is_relative() {
                folder.source = base.join(&folder.source);
            }
        }
    }
}

/// Applies `STACK_DEPLOY_*` overrides using `lookup` to read variables.
pub fn apply_overrides(config: &mut DeployConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(stage) = lookup("STACK_DEPLOY_STAGE") {
        debug!("Overriding project.stage from environment");
        config.project.stage = stage;
    }

    if let Some(region) = lookup("STACK_DEPLOY_REGION") {
        debug!("Overriding project.region from environment");
        config.project.region = Some(region);
    }

    if let Some(bucket) = lookup("STACK_DEPLOY_BUCKET") {
        debug!("Overriding deployment.bucket from environment");
        config.deployment.bucket = Some(bucket);
    }

    if let Some(prefix) = lookup("STACK_DEPLOY_PREFIX") {
        debug!("Overriding deployment.prefix from environment");
        config.deployment.prefix = Some(prefix);
    }

    if let Some(stack_name) = lookup("STACK_DEPLOY_STACK_NAME") {
        debug!("Overriding deployment.stack_name from environment");
        config.deployment.stack_name = Some(stack_name);
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["stack-deploy.yaml", "stack-deploy.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(DeployError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConfig;
    use crate::planner::PlanFormat;
    use crate::stack::ChangeSetType;
    use std::collections::HashMap;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
project:
  name: test-project
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).unwrap();

        assert_eq!(config.project.name, "test-project");
        assert_eq!(config.project.stage, "dev");
        assert!(config.deployment.bucket.is_none());
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
project:
  name: shop
  stage: prod
  region: eu-west-1

deployment:
  bucket: shop-deployments
  prefix: releases/
  plan_file: stack.yaml
  format: yaml
  change_set_type: IMPORT
  import_resources:
    - logical_id: Uploads
      resource_type: "AWS::S3::Bucket"
      identifier:
        BucketName: shop-uploads
  tags:
    team: checkout

bundle:
  path: dist/shop.zip

assets:
  - source: public
    prefix: static/

resources:
  - kind: function
    name: checkout
    handler: index.handler
  - kind: api
    name: public
    function: checkout
  - kind: raw
    name: Uploads
    type: "AWS::S3::Bucket"
    properties:
      BucketName: shop-uploads
"#;
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).unwrap();

        assert_eq!(config.project.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.deployment.format, Some(PlanFormat::Yaml));
        assert_eq!(config.deployment.change_set_type, Some(ChangeSetType::Import));
        assert_eq!(config.deployment.import_resources.len(), 1);
        assert_eq!(config.resources.len(), 3);
        assert!(matches!(config.resources[0], ResourceConfig::Function(ref f) if f.memory_mb == 256));
        assert_eq!(config.resources[1].kind(), "api");
        assert_eq!(config.resources[2].name(), "Uploads");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let yaml = r"
project:
  name: test-project
resources:
  - kind: queue
    name: jobs
";
        let result = ConfigParser::new().parse_yaml(yaml, None);
        assert!(matches!(
            result,
            Err(DeployError::Config(ConfigError::ParseError { .. }))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let yaml = r"
project:
  name: test-project
deployment:
  bucket: from-file
";
        let mut config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        let vars: HashMap<&str, &str> = [
            ("STACK_DEPLOY_BUCKET", "from-env"),
            ("STACK_DEPLOY_STAGE", "qa"),
        ]
        .into_iter()
        .collect();

        apply_overrides(&mut config, |name| vars.get(name).map(|v| (*v).to_string()));

        assert_eq!(config.deployment.bucket.as_deref(), Some("from-env"));
        assert_eq!(config.project.stage, "qa");
        assert!(config.deployment.prefix.is_none());
    }

    #[test]
    fn test_relative_paths_resolved_against_base() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack-deploy.yaml");
        std::fs::write(
            &path,
            "project:\n  name: app\nbundle:\n  path: dist/app.zip\nassets:\n  - source: public\n",
        )
        .unwrap();

        let config = ConfigParser::new()
            .with_base_path(dir.path())
            .load_file(&path)
            .unwrap();

        let bundle_path = config.bundle.unwrap().path.unwrap();
        assert_eq!(bundle_path, dir.path().join("dist/app.zip"));
        assert_eq!(config.assets[0].source, dir.path().join("public"));
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("stack-deploy.yml"), "project:\n  name: x\n").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("stack-deploy.yml"));
    }
}
