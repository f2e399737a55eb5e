//! CLI Command Handlers
//!
//! Implementation of all CLI commands for the buy relay.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::adapters::audit::AuditStore;
use crate::adapters::http::{self, AppState};
use crate::adapters::process::ProcessRunner;
use crate::application::{Dispatcher, WebhookPipeline};
use crate::config::{resolve_config, Config};
use crate::domain::{check, route, OperatingMode, SafetyLimits, StatusReport, TradeInstruction};

/// Buy relay - guarded webhook trade dispatcher
#[derive(Parser, Debug)]
#[command(
    name = "buy-relay",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = "Guarded webhook trade dispatcher",
    long_about = "Receives buy instructions over a webhook, checks them against profit, \
                  level and token limits, and runs the matching buy worker with a \
                  bounded lifetime. Every request is recorded to an audit log."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the webhook server
    Serve(ServeCmd),

    /// Show limits, mode and the last recorded outcomes
    Status(StatusCmd),

    /// Evaluate an instruction against the policy without running anything
    Check(CheckCmd),
}

impl Command {
    fn config_path(&self) -> Option<&Path> {
        match self {
            Command::Serve(cmd) => cmd.config.as_deref(),
            Command::Status(cmd) => cmd.config.as_deref(),
            Command::Check(cmd) => cmd.config.as_deref(),
        }
    }
}

/// Run the webhook server
#[derive(Parser, Debug)]
pub struct ServeCmd {
    /// Path to configuration file (default: config/relay.toml if present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override listen port
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Pass --dry-run to every worker (no real orders)
    #[arg(long)]
    pub dry_run: bool,
}

/// Show relay status
#[derive(Parser, Debug)]
pub struct StatusCmd {
    /// Path to configuration file (default: config/relay.toml if present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format (text, json)
    #[arg(short, long, value_name = "FORMAT", default_value = "text")]
    pub format: String,
}

/// Dry evaluation of one instruction
#[derive(Parser, Debug)]
pub struct CheckCmd {
    /// Path to configuration file (default: config/relay.toml if present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profit target in USDC
    #[arg(long, value_name = "USDC")]
    pub profit: String,

    /// Buy level (0 = initial buy)
    #[arg(long, value_name = "LEVEL", allow_negative_numbers = true)]
    pub level: i64,

    /// Token to buy
    #[arg(long, value_name = "TOKEN")]
    pub token_id: String,
}

/// Execute the CLI command
pub async fn execute(app: CliApp) -> Result<()> {
    let config = resolve_config(app.command.config_path())
        .context("Failed to load configuration")?;

    // Initialize logging based on flags
    init_logging(app.verbose, app.debug, &config.logging.level)?;

    match app.command {
        Command::Serve(cmd) => serve_command(cmd, config).await,
        Command::Status(cmd) => status_command(cmd, config).await,
        Command::Check(cmd) => check_command(cmd, config),
    }
}

/// Initialize logging system. RUST_LOG wins over the flags, the flags win
/// over the configured level.
fn init_logging(verbose: bool, debug: bool, config_level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let fallback = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        config_level
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Handle serve command
async fn serve_command(cmd: ServeCmd, mut config: Config) -> Result<()> {
    tracing::info!("Starting buy relay...");

    if cmd.dry_run {
        config.workers.dry_run = true;
    }
    let port = cmd.port.unwrap_or_else(|| config.server.get_port());
    let addr: SocketAddr = format!("{}:{}", config.server.host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, port))?;

    let limits = Arc::new(SafetyLimits::from(&config));
    let audit = AuditStore::open(config.audit.get_data_dir())
        .context("Failed to prepare data directory")?;
    tracing::info!("Data directory: {}", audit.data_dir().display());

    let settings = config.worker_settings(audit.data_dir().to_path_buf());
    let dispatcher = Dispatcher::new(settings, Arc::new(ProcessRunner::new()))
        .with_timeout(config.workers.timeout());
    let pipeline = WebhookPipeline::new(limits.clone(), dispatcher, audit);

    match pipeline.mode() {
        OperatingMode::Live => tracing::warn!("LIVE TRADING MODE - workers place real orders"),
        OperatingMode::DryRun => tracing::info!("DRY RUN mode - workers do not place orders"),
    }
    if limits.enabled {
        tracing::info!(
            "Safety limits: max profit {} USDC, max level {}, {} allowed token(s)",
            limits.max_profit,
            limits.max_level,
            if limits.restricts_tokens() {
                limits.allowed_token_ids.len().to_string()
            } else {
                "all".to_string()
            }
        );
    } else {
        tracing::warn!("Safety checks DISABLED - every instruction will be executed");
    }

    http::serve(AppState::new(pipeline), addr)
        .await
        .context("Webhook server failed")?;

    tracing::info!("Buy relay stopped");
    Ok(())
}

/// Handle status command
async fn status_command(cmd: StatusCmd, config: Config) -> Result<()> {
    let limits = SafetyLimits::from(&config);
    let mode = OperatingMode::from_dry_run(config.workers.dry_run);
    let status = StatusReport::new(mode, &limits);

    let data_dir = config.audit.get_data_dir();
    let audit = if data_dir.is_dir() {
        Some(AuditStore::open(&data_dir)?)
    } else {
        None
    };
    let last_response = match &audit {
        Some(store) => store.last_response()?,
        None => None,
    };
    let last_error = match &audit {
        Some(store) => store.last_error()?,
        None => None,
    };
    let requests = match &audit {
        Some(store) => store.raw_entries()?.len(),
        None => 0,
    };

    match cmd.format.as_str() {
        "json" => {
            let doc = serde_json::json!({
                "status": status,
                "data_dir": data_dir.display().to_string(),
                "requests_logged": requests,
                "last_response": last_response,
                "last_error": last_error,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        _ => {
            println!("Buy Relay - Status");
            println!("  Mode: {}", mode.description());
            if limits.enabled {
                println!("  Max profit: {} USDC", limits.max_profit);
                println!("  Max level: {}", limits.max_level);
                if limits.restricts_tokens() {
                    let tokens: Vec<&str> =
                        limits.allowed_token_ids.iter().map(String::as_str).collect();
                    println!("  Allowed tokens: {}", tokens.join(", "));
                } else {
                    println!("  Allowed tokens: all");
                }
            } else {
                println!("  Safety checks: DISABLED");
            }
            println!("  Data directory: {}", data_dir.display());
            println!("  Requests logged: {}", requests);

            match last_response {
                Some(r) => println!(
                    "  Last response: {} {} level {} ({})",
                    r.timestamp, r.worker, r.parameters.level, r.parameters.token_id
                ),
                None => println!("  Last response: none"),
            }
            match last_error {
                Some(e) => println!("  Last error: {} {}", e.timestamp, e),
                None => println!("  Last error: none"),
            }
        }
    }

    Ok(())
}

/// Handle check command
fn check_command(cmd: CheckCmd, config: Config) -> Result<()> {
    let instruction = TradeInstruction::new(&cmd.profit, cmd.level, &cmd.token_id)?;
    let limits = SafetyLimits::from(&config);

    let verdict = check(&instruction, &limits);
    if let Some(reason) = verdict.reason() {
        println!("REJECTED: {}", reason);
        bail!("Instruction would be rejected by the safety policy");
    }

    let invocation = route(&instruction, &config.worker_settings(config.audit.get_data_dir()));
    println!("ACCEPTED");
    println!("  Worker: {}", invocation.worker());
    println!("  Command: {}", invocation.command_line());
    if !limits.enabled {
        println!("  Note: safety checks are disabled");
    }

    Ok(())
}
