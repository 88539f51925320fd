//! stack-deploy CLI entrypoint.
//!
//! This is the main entrypoint for the stack-deploy command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use stack_deploy::api::ApiGatewayStages;
use stack_deploy::assets::S3ObjectStore;
use stack_deploy::cli::{Cli, Commands, OutputFormatter};
use stack_deploy::config::{
    find_config_file, BundleSource, ConfigParser, ConfigValidator, DesiredState,
};
use stack_deploy::error::{DeployError, Result};
use stack_deploy::orchestrator::DeploymentOrchestrator;
use stack_deploy::planner::{render_template, BundleRef, PlanFormat};
use stack_deploy::stack::CloudFormationControlPlane;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", formatter.error(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<ExitCode> {
    match cli.command {
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, formatter),
        Commands::Render { out } => cmd_render(cli.config.as_ref(), out.as_deref()),
        Commands::Deploy { yes, concurrency } => {
            cmd_deploy(cli.config.as_ref(), yes, concurrency, formatter).await
        }
        Commands::Destroy { yes } => cmd_destroy(cli.config.as_ref(), yes, formatter).await,
    }
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().collect(&config);
    let desired = DesiredState::from_config(config)?;

    write_stdout(&formatter.format_validation(&desired, &result, show_warnings))?;
    Ok(ExitCode::SUCCESS)
}

/// Render the plan document locally.
fn cmd_render(config_path: Option<&PathBuf>, out: Option<&Path>) -> Result<ExitCode> {
    let desired = load_desired(config_path)?;

    // The bundle key depends on its content hash, which is only known at upload time.
    let bundle = desired.bundle.as_ref().map(|source| match source {
        BundleSource::Remote { bucket, key } => BundleRef {
            bucket: bucket.clone(),
            key: key.clone(),
        },
        BundleSource::Local(path) => BundleRef {
            bucket: desired.bucket.clone(),
            key: path.display().to_string(),
        },
    });

    let template = render_template(&desired, bundle.as_ref())?;
    let format = PlanFormat::resolve(desired.format, &desired.plan_file);
    let body = template.to_bytes(format)?;

    match out {
        Some(path) => {
            std::fs::write(path, &body)?;
            eprintln!("Wrote plan document: {}", path.display());
        }
        None => std::io::stdout().lock().write_all(&body)?,
    }

    Ok(ExitCode::SUCCESS)
}

/// Deploy the stack.
async fn cmd_deploy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    concurrency: usize,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let desired = load_desired(config_path)?;

    eprintln!(
        "Deploying {} resource(s) to stack {} via s3://{}/{}",
        desired.resources.len(),
        desired.stack_name,
        desired.bucket,
        desired.prefix
    );

    if !auto_approve && !confirm("Do you want to deploy? [y/N]: ", "y")? {
        eprintln!("Deploy cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let orchestrator = build_orchestrator(desired)
        .await
        .with_upload_concurrency(concurrency);
    let result = orchestrator.deploy().await?;

    write_stdout(&formatter.format_deployment(&result))?;

    if result.outcome.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Destroy the stack.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let desired = load_desired(config_path)?;
    let stack_name = desired.stack_name.clone();

    if !auto_approve {
        eprintln!("Stack {stack_name} and every resource it owns will be deleted.");
        if !confirm("This action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")? {
            eprintln!("Destruction cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    build_orchestrator(desired).await.destroy_stack().await?;

    write_stdout(&formatter.success(&format!("Stack {stack_name} deleted")))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Creates a parser rooted at the configuration file's directory.
fn parser_for(config_file: &Path) -> ConfigParser {
    ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")))
}

/// Loads `.env`, the configuration file and environment overrides.
fn load_desired(config_path: Option<&PathBuf>) -> Result<DesiredState> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;

    DesiredState::from_config(parser.load_with_env(&config_file)?)
}

/// Wires the AWS adapters into an orchestrator.
async fn build_orchestrator(desired: DesiredState) -> DeploymentOrchestrator {
    let sdk_config = match desired.region.as_deref() {
        Some(region) => {
            aws_config::from_env()
                .region(aws_config::Region::new(region.to_string()))
                .load()
                .await
        }
        None => aws_config::load_from_env().await,
    };

    DeploymentOrchestrator::new(
        desired,
        Arc::new(S3ObjectStore::new(&sdk_config)),
        Arc::new(CloudFormationControlPlane::new(&sdk_config)),
        Arc::new(ApiGatewayStages::new(&sdk_config)),
    )
}

/// Prompts on stderr and compares the answer.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Writes a formatted block to stdout.
fn write_stdout(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}").map_err(DeployError::from)
}
