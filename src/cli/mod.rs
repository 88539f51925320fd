//! CLI module for stack-deploy.
//!
//! This module provides the command-line interface for deploying and
//! destroying stacks.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
