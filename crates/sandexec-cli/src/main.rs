//! Sandexec CLI
//!
//! A command-line tool for running code fragments in isolated child processes.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sandexec::{Config, EXAMPLE_CONFIG, ExecuteError, Executor, Keywords};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

/// Exit status when the callable itself reported a failure
const EXIT_BUSINESS_FAILURE: u8 = 1;

/// Exit status for every other failed invocation
const EXIT_FAULT: u8 = 2;

#[derive(Parser)]
#[command(name = "sandexec")]
#[command(about = "A tool for running code fragments in isolated child processes")]
#[command(version)]
struct Cli {
    /// Path to configuration file (SANDEXEC_* variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: sandexec.toml)
        #[arg(short, long, default_value = "sandexec.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run the callable defined in a source file
    Run {
        /// Source file defining the callable
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Keyword arguments as a JSON object
        #[arg(short, long, conflicts_with = "kwargs_file")]
        kwargs: Option<String>,

        /// File holding keyword arguments as a JSON object
        #[arg(long, value_name = "FILE")]
        kwargs_file: Option<PathBuf>,
    },

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file_with_env(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration with environment overrides");
        Config::from_env().context("failed to load configuration")?
    };

    match cli.command {
        Commands::Init { output, force } => {
            init_config(&output, force).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            source,
            kwargs,
            kwargs_file,
        } => run_source(config, &source, kwargs.as_deref(), kwargs_file.as_deref()).await,
        Commands::ShowConfig => {
            show_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_source(
    config: Config,
    source: &Path,
    kwargs: Option<&str>,
    kwargs_file: Option<&Path>,
) -> Result<ExitCode> {
    let code = tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("failed to read source file '{}'", source.display()))?;

    let keywords = match (kwargs, kwargs_file) {
        (Some(json), _) => parse_keywords(json).context("invalid --kwargs")?,
        (None, Some(path)) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read kwargs file '{}'", path.display()))?;
            parse_keywords(&json).context("invalid --kwargs-file")?
        }
        (None, None) => Keywords::new(),
    };

    let executor = Executor::new(config).context("failed to prepare executor")?;
    info!(source = %source.display(), keywords = keywords.len(), "running callable");

    match executor.execute(&code, &keywords).await {
        Ok(value) => {
            // Result goes to stdout alone, logs go to stderr
            println!(
                "{}",
                serde_json::to_string_pretty(&value).context("failed to encode result")?
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => Ok(ExitCode::from(report_failure(&err))),
    }
}

fn report_failure(err: &ExecuteError) -> u8 {
    if err.is_business_failure() {
        eprintln!("{err}");
        return EXIT_BUSINESS_FAILURE;
    }

    eprintln!("error: {err}");
    if err.is_timeout() {
        eprintln!("hint: raise `timeout` in the configuration or SANDEXEC_TIMEOUT");
    }
    EXIT_FAULT
}

fn parse_keywords(json: &str) -> Result<Keywords> {
    let value: serde_json::Value = serde_json::from_str(json).context("not valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => anyhow::bail!("expected a JSON object, got {other}"),
    }
}

fn show_config(config: &Config) {
    println!("Sandbox root: {}", config.sandbox_root.display());
    println!("Interpreter: {}", config.interpreter_binary().display());
    println!("Working directory: {}", config.working_dir().display());
    println!("Isolation: {:?}", config.isolation);
    println!("Sandbox user: {}", config.sandbox_user);
    println!(
        "Sensitive prefixes: {}",
        config.sensitive_env_prefixes.join(", ")
    );
    match config.timeout() {
        Some(timeout) => println!("Timeout: {:.3}s", timeout.as_secs_f64()),
        None => println!("Timeout: none"),
    }
    println!("Entry policy: {}", config.entry_policy.as_str());
    match config.max_concurrency {
        Some(limit) => println!("Max concurrency: {limit}"),
        None => println!("Max concurrency: unbounded"),
    }
    println!();
    println!(
        "Namespaces available: {}",
        if sandexec::namespaces_available() {
            "yes"
        } else {
            "no"
        }
    );
}

async fn init_config(output: &PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
