//! # Docket: case deadline tracker
//!
//! Usage:
//!   docket serve                 # HTTP API + background scheduler
//!   docket serve --port 8080     # Custom port
//!   docket check                 # Run one scheduler tick and print the report
//!   docket overdue               # Overdue nodes grouped by case
//!   docket upcoming --days 3     # Nodes due within 3 days
//!   docket init                  # Write a default config file
//!   docket case add --title "Zhang v. Li"
//!   docket cost add --case 1 --type "court fee" --amount 350 --due 2024-10-20
//!   docket cost pay 1            # Stop cost-due reminders for a cost

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use docket_core::{DocketConfig, DocketError};
use docket_gateway::AppState;
use docket_scheduler::clock::offset_from_hours;
use docket_scheduler::{DocketDb, system_clock};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "docket",
    version,
    about = "📅 Docket: deadline tracking and reminders for case procedures"
)]
struct Cli {
    /// Config file (defaults to ~/.docket/config.toml)
    #[arg(short, long, env = "DOCKET_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API and the background scheduler
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
        /// Serve the API without the background scheduler
        #[arg(long)]
        no_scheduler: bool,
    },
    /// Run a single scheduler tick and print its report as JSON
    Check,
    /// Print overdue statistics as JSON
    Overdue,
    /// Print nodes due within the given number of days
    Upcoming {
        #[arg(short, long)]
        days: Option<u32>,
    },
    /// Write the default config file and exit
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Register or inspect cases in the local store
    Case {
        #[command(subcommand)]
        action: CaseAction,
    },
    /// Record cost items that drive cost-due reminders
    Cost {
        #[command(subcommand)]
        action: CostAction,
    },
}

#[derive(Subcommand)]
enum CaseAction {
    /// Create a case
    Add {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "open")]
        status: String,
    },
    /// Print a case with its nodes and log
    Show { id: i64 },
}

#[derive(Subcommand)]
enum CostAction {
    /// Add an unpaid cost to a case
    Add {
        #[arg(long = "case")]
        case_id: i64,
        #[arg(long = "type")]
        cost_type: String,
        #[arg(long)]
        amount: f64,
        /// RFC 3339 timestamp, or YYYY-MM-DD for local midnight
        #[arg(long)]
        due: Option<String>,
    },
    /// Mark a cost paid; it no longer produces reminders
    Pay { id: i64 },
}

fn load_config(path: Option<&Path>) -> Result<DocketConfig> {
    let mut config = match path {
        Some(p) => {
            let expanded = shellexpand::tilde(&p.to_string_lossy()).to_string();
            DocketConfig::load_from(Path::new(&expanded))?
        }
        None => DocketConfig::load()?,
    };
    config.database_path = shellexpand::tilde(&config.database_path).to_string();
    Ok(config)
}

fn open_state(config: DocketConfig) -> Result<AppState> {
    let db = DocketDb::open(Path::new(&config.database_path))
        .with_context(|| format!("opening database {}", config.database_path))?;
    Ok(AppState::new(config, Arc::new(db), system_clock()))
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(DocketConfig::default_path);
    if path.exists() && !force {
        println!("⚠️  {} already exists (use --force to overwrite)", path.display());
        return Ok(());
    }
    DocketConfig::default().save_to(&path)?;
    println!("✅ Wrote default config to {}", path.display());
    Ok(())
}

/// Accept a full timestamp or a bare date taken as midnight at `offset`.
fn parse_due(raw: &str, offset: FixedOffset) -> Result<DateTime<Utc>, DocketError> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|midnight| offset.from_local_datetime(&midnight).single())
        .map(|at| at.with_timezone(&Utc))
        .ok_or_else(|| DocketError::validation(format!("invalid due date '{raw}'")))
}

fn run_case(state: &AppState, action: CaseAction) -> Result<serde_json::Value, DocketError> {
    match action {
        CaseAction::Add { title, status } => {
            let title = title.trim();
            if title.is_empty() {
                return Err(DocketError::validation("case title is required"));
            }
            let case = state.db.insert_case(title, &status, state.lifecycle.now())?;
            tracing::info!("📁 Case #{} '{}' created", case.id, case.title);
            Ok(serde_json::to_value(case)?)
        }
        CaseAction::Show { id } => {
            let case = state.db.get_case(id)?.ok_or(DocketError::not_found("case", id))?;
            Ok(serde_json::json!({
                "case": case,
                "nodes": state.lifecycle.list_case_nodes(id)?,
                "logs": state.db.list_case_logs(id)?,
            }))
        }
    }
}

fn run_cost(state: &AppState, action: CostAction) -> Result<serde_json::Value, DocketError> {
    match action {
        CostAction::Add { case_id, cost_type, amount, due } => {
            if cost_type.trim().is_empty() {
                return Err(DocketError::validation("cost type is required"));
            }
            if !amount.is_finite() || amount < 0.0 {
                return Err(DocketError::validation("amount must be a non-negative number"));
            }
            if state.db.get_case(case_id)?.is_none() {
                return Err(DocketError::not_found("case", case_id));
            }
            let offset = offset_from_hours(state.config.scheduler.utc_offset_hours);
            let due = due.as_deref().map(|raw| parse_due(raw, offset)).transpose()?;
            let cost = state.db.insert_cost(
                case_id,
                cost_type.trim(),
                amount,
                due,
                state.lifecycle.now(),
            )?;
            tracing::info!("💰 Cost #{} added to case #{}", cost.id, case_id);
            Ok(serde_json::to_value(cost)?)
        }
        CostAction::Pay { id } => {
            if !state.db.mark_cost_paid(id)? {
                return Err(DocketError::not_found("cost", id));
            }
            let cost = state.db.get_cost(id)?.ok_or(DocketError::not_found("cost", id))?;
            Ok(serde_json::to_value(cost)?)
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "docket=debug,docket_scheduler=debug,docket_gateway=debug,tower_http=debug"
    } else {
        "docket=info,docket_scheduler=info,docket_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    if let Command::Init { force } = cli.command {
        return init_config(cli.config, force);
    }
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { port, no_scheduler } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if no_scheduler {
                config.scheduler.enabled = false;
            }
            if config.gateway.api_token.as_deref().is_none_or(str::is_empty) {
                tracing::warn!("⚠️  No API token configured; the API is open to anyone who can reach it");
            }
            println!("📅 Docket v{}", env!("CARGO_PKG_VERSION"));
            println!("   🌐 API:       http://{}:{}/api/v1", config.gateway.host, config.gateway.port);
            println!("   🗄️  Database:  {}", config.database_path);
            println!(
                "   ⏰ Scheduler: {}",
                if config.scheduler.enabled {
                    format!("every {}s", config.scheduler.check_interval_secs)
                } else {
                    "disabled".to_string()
                }
            );
            println!();
            docket_gateway::start(config).await?;
        }
        Command::Check => {
            let state = open_state(config)?;
            print_json(&state.scheduler.tick().await)?;
        }
        Command::Overdue => {
            let state = open_state(config)?;
            print_json(&state.lifecycle.overdue_statistics()?)?;
        }
        Command::Upcoming { days } => {
            let days = days.unwrap_or(config.lifecycle.upcoming_days_default);
            let state = open_state(config)?;
            print_json(&state.lifecycle.upcoming_nodes(days)?)?;
        }
        Command::Case { action } => {
            let state = open_state(config)?;
            print_json(&run_case(&state, action)?)?;
        }
        Command::Cost { action } => {
            let state = open_state(config)?;
            print_json(&run_cost(&state, action)?)?;
        }
        Command::Init { .. } => {}
    }

    Ok(())
}
