//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{DesiredState, ValidationResult};
use crate::orchestrator::DeploymentResult;
use crate::planner::logical_id;
use crate::stack::ApplyOutcome;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Logical ID")]
    logical_id: String,
}

/// Stack output row for table display.
#[derive(Tabled)]
struct OutputRow {
    #[tabled(rename = "Output")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a validated configuration.
    #[must_use]
    pub fn format_validation(
        &self,
        desired: &DesiredState,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "stack_name": desired.stack_name,
                    "bucket": desired.bucket,
                    "prefix": desired.prefix,
                    "resources": desired.resources.len(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_validation_text(desired, result, show_warnings),
        }
    }

    fn format_validation_text(
        desired: &DesiredState,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        let mut output = format!("{} Configuration is valid\n\n", "✓".green());

        let _ = writeln!(output, "   Project: {} ({})", desired.project, desired.stage);
        let _ = writeln!(output, "   Stack: {}", desired.stack_name);
        let _ = writeln!(output, "   Bucket: {}/{}", desired.bucket, desired.prefix);
        let _ = writeln!(output, "   Assets: {} folder(s)", desired.assets.len());

        if !desired.resources.is_empty() {
            let rows: Vec<ResourceRow> = desired
                .resources
                .iter()
                .map(|r| ResourceRow {
                    kind: r.kind().to_string(),
                    name: r.name().to_string(),
                    logical_id: logical_id(r.name()),
                })
                .collect();
            output.push('\n');
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if show_warnings && !result.warnings.is_empty() {
            let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
            for warning in &result.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        }

        output
    }

    /// Formats the result of a deployment.
    #[must_use]
    pub fn format_deployment(&self, result: &DeploymentResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => Self::format_deployment_text(result),
        }
    }

    fn format_deployment_text(result: &DeploymentResult) -> String {
        let mut output = format!(
            "{}\n\n",
            Self::format_outcome(&result.stack_name, &result.outcome)
        );

        let _ = writeln!(output, "   Plan: {}", result.plan.url);
        if let Some(bundle) = &result.bundle {
            let _ = writeln!(output, "   Bundle: s3://{}/{}", bundle.bucket, bundle.key);
        }
        let _ = writeln!(
            output,
            "   Uploads: {} uploaded, {} unchanged",
            result.sync.uploaded.to_string().green(),
            result.sync.skipped.to_string().dimmed()
        );
        if let Some(change_set) = &result.change_set {
            let _ = writeln!(
                output,
                "   Change set: {} ({})",
                change_set.name, change_set.change_set_type
            );
        }

        if !result.outputs.is_empty() {
            let rows: Vec<OutputRow> = result
                .outputs
                .iter()
                .map(|(key, value)| OutputRow {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect();
            output.push('\n');
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        output
    }

    /// Formats an apply outcome with color.
    fn format_outcome(stack_name: &str, outcome: &ApplyOutcome) -> String {
        match outcome {
            ApplyOutcome::Applied { status, .. } if outcome.is_rolled_back() => {
                format!("{} Stack {stack_name} rolled back ({status})", "✗".red())
            }
            ApplyOutcome::Applied {
                status,
                stage_deployment,
            } => {
                let mut line = format!("{} Stack {stack_name} is {status}", "✓".green());
                if let Some(deployment) = stage_deployment {
                    let _ = write!(line, ", stage republished ({deployment})");
                }
                line
            }
            ApplyOutcome::NoChanges => {
                format!("{} Stack {stack_name} is up to date", "✓".green())
            }
            ApplyOutcome::PlanRejected { reason } => {
                format!("{} Plan rejected for {stack_name}: {reason}", "✗".red())
            }
            ApplyOutcome::TimedOut => format!(
                "{} Stack {stack_name} did not settle in time; check the console",
                "⚠".yellow()
            ),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "success", "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✓".green()),
        }
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "error", "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✗".red()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::SyncReport;
    use crate::planner::PlanLocation;
    use std::collections::BTreeMap;

    fn result(outcome: ApplyOutcome) -> DeploymentResult {
        DeploymentResult {
            stack_name: String::from("shop-prod"),
            plan: PlanLocation {
                bucket: String::from("deploys"),
                key: String::from("shop/prod/template.json"),
                url: String::from("https://deploys.s3.amazonaws.com/shop/prod/template.json"),
            },
            bundle: None,
            sync: SyncReport { uploaded: 2, skipped: 7 },
            change_set: None,
            outcome,
            outputs: BTreeMap::from([(String::from("ApiUrl"), String::from("https://x"))]),
        }
    }

    #[test]
    fn test_json_deployment_is_tagged() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let json: serde_json::Value =
            serde_json::from_str(&formatter.format_deployment(&result(ApplyOutcome::TimedOut)))
                .unwrap();

        assert_eq!(json["outcome"]["outcome"], "timed_out");
        assert_eq!(json["sync"]["skipped"], 7);
        assert_eq!(json["outputs"]["ApiUrl"], "https://x");
    }

    #[test]
    fn test_text_deployment_mentions_rollback() {
        colored::control::set_override(false);
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let text = formatter.format_deployment(&result(ApplyOutcome::Applied {
            status: String::from("UPDATE_ROLLBACK_COMPLETE"),
            stage_deployment: None,
        }));

        assert!(text.contains("rolled back (UPDATE_ROLLBACK_COMPLETE)"));
        assert!(text.contains("ApiUrl"));
    }
}
