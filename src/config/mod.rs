//! Configuration module for the deployment system.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `stack-deploy.yaml`
//! - Environment overrides and `.env` loading
//! - Validation of configuration values
//! - Building the immutable [`DesiredState`] of a deployment attempt

mod desired;
mod parser;
mod spec;
mod validator;

pub use desired::{AssetFolder, BundleSource, DesiredState, DEFAULT_CAPABILITY, DEFAULT_PLAN_FILE};
pub use parser::{apply_overrides, find_config_file, ConfigParser, DEFAULT_CONFIG_FILES};
pub use spec::{
    ApiConfig, AssetFolderConfig, BundleConfig, DeployConfig, DeploymentConfig, FunctionConfig,
    ImportResourceConfig, ProjectConfig, RawResourceConfig, ResourceConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
