//! kyoyu binary
//!
//! Terminal front end for shared tasks and finances over a local SQLite
//! database.
//!
//! ## Usage
//!
//! ```bash
//! kyoyu register ana@example.com --name Ana
//! kyoyu confirm ana@example.com
//! kyoyu provision
//! kyoyu --as ana@example.com task add "Buy milk" --priority high
//! kyoyu --as ana@example.com task share 0190c2 --with bo@example.com
//! kyoyu --as bo@example.com shared
//! ```

mod commands;
mod render;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing_subscriber::{EnvFilter, fmt};

use kyoyu_core::config::{self, KyoyuConfig};
use kyoyu_core::{TaskStatus, YearMonth};
use kyoyu_types::{Flow, Priority};

/// Shared tasks and finances.
#[derive(Parser, Debug)]
#[command(name = "kyoyu", version)]
#[command(about = "Track tasks and finances, and share them with other accounts")]
struct Args {
    /// Config file (default: <config dir>/kyoyu/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overriding the config file and KYOYU_DB
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Act as the account with this email
    #[arg(long = "as", value_name = "EMAIL", global = true)]
    as_email: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account (email starts unconfirmed)
    Register {
        email: String,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Confirm an account's email
    Confirm { email: String },
    /// Create profile rows for newly registered accounts
    Provision,
    /// List accounts
    Users,
    /// Show or update the acting account's profile
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Tasks
    #[command(subcommand)]
    Task(TaskCommand),
    /// Income and expenses
    #[command(subcommand)]
    Finance(FinanceCommand),
    /// Everything other accounts shared with you
    Shared,
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    Add {
        text: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value_t = Priority::Medium)]
        priority: Priority,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<NaiveDate>,
    },
    List {
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long, default_value_t = TaskStatus::All)]
        status: TaskStatus,
        /// Case-insensitive category substring
        #[arg(long)]
        category: Option<String>,
        /// Most urgent first instead of creation order
        #[arg(long)]
        by_priority: bool,
    },
    Edit {
        /// Record id or unique prefix
        id: String,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long)]
        due: Option<NaiveDate>,
    },
    /// Toggle completion
    Done { id: String },
    Delete { id: String },
    Share {
        id: String,
        /// Grantee email
        #[arg(long = "with", value_name = "EMAIL")]
        with: String,
    },
}

#[derive(Subcommand, Debug)]
enum FinanceCommand {
    Add {
        description: String,
        amount: Decimal,
        #[arg(long, default_value_t = Flow::Expense)]
        flow: Flow,
        /// Transaction date (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        category: Option<String>,
    },
    List {
        #[arg(long)]
        flow: Option<Flow>,
        #[arg(long)]
        category: Option<String>,
        /// Month (YYYY-MM)
        #[arg(long)]
        month: Option<YearMonth>,
    },
    Edit {
        id: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        amount: Option<Decimal>,
        #[arg(long)]
        flow: Option<Flow>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        category: Option<String>,
    },
    Delete { id: String },
    Share {
        id: String,
        #[arg(long = "with", value_name = "EMAIL")]
        with: String,
    },
    /// Income, expense, and balance
    Summary {
        #[arg(long)]
        month: Option<YearMonth>,
        #[arg(long)]
        category: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(config::default_path);
    let mut config = KyoyuConfig::load_with_env(&config_path)?;
    if let Some(db) = &args.db {
        config.database = db.clone();
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(parent) = config.database.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tracing::debug!(database = %config.database.display(), "opening database");

    let app = commands::App::open(config, args.as_email)?;
    app.run(args.command).await
}
