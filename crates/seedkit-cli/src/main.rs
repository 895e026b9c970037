//! seedkit: runs database seeders in dependency order.
//!
//! # Usage
//!
//! ```text
//! seedkit init [--create-history]
//! seedkit run [--force] [--fresh] [--dry-run] [-s NAME]... [-t TAG]...
//! seedkit rollback (-s NAME... | --all | --batch N) [--dry-run]
//! seedkit refresh [--dry-run]
//! seedkit status [--detailed]
//! seedkit list
//! seedkit make NAME [--environment E]... [--dep D]... [--priority P] [--rollback]
//! ```
//!
//! Global options: `--config`, `--env`, `--database-url`, `--debug`, `--yes`.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use seedkit::{PgSession, RollbackTarget, SeedManager, SeederConfig};
use seedkit_cli::commands::{self, RunRequest};
use seedkit_cli::demo;
use seedkit_cli::scaffold::{self, MakeRequest};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "seedkit",
    version,
    about = "Run database seeders in dependency order",
    long_about = None,
)]
struct Cli {
    /// Config file (default: seeder.config.json, .seederrc or .seederrc.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Target environment (default: detected from SEEDER_ENVIRONMENT, ENVIRONMENT, ENV, APP_ENV).
    #[arg(short, long, global = true)]
    env: Option<String>,

    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Log at debug level regardless of RUST_LOG.
    #[arg(long, global = true)]
    debug: bool,

    /// Skip the confirmation prompt for protected environments.
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default seeder.config.json and create the seeders directory.
    Init {
        /// Also create the history table in the configured database.
        #[arg(long)]
        create_history: bool,
    },

    /// Run pending seeders.
    Run(RunArgs),

    /// Roll back executed seeders, most recent first.
    Rollback(RollbackArgs),

    /// Roll back everything, then run every seeder again.
    Refresh {
        #[arg(long)]
        dry_run: bool,
    },

    /// Show executed, pending and changed seeders.
    Status {
        /// Include history and statistics.
        #[arg(long)]
        detailed: bool,
    },

    /// List registered seeders.
    List,

    /// Create a new seeder file in the configured seeders path.
    Make(MakeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Re-run seeders that are already up to date.
    #[arg(long)]
    force: bool,

    /// Clear this environment's history first.
    #[arg(long)]
    fresh: bool,

    #[arg(long)]
    dry_run: bool,

    /// Run only these seeders (and their dependencies).
    #[arg(short, long = "seeder", value_name = "NAME")]
    seeders: Vec<String>,

    /// Run only seeders carrying one of these tags.
    #[arg(short, long = "tag", value_name = "TAG")]
    tags: Vec<String>,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["seeders", "all", "batch"])))]
struct RollbackArgs {
    #[arg(short, long = "seeder", value_name = "NAME")]
    seeders: Vec<String>,

    /// Every executed seeder.
    #[arg(long)]
    all: bool,

    /// The N most recent batches.
    #[arg(long, value_name = "N")]
    batch: Option<usize>,

    #[arg(long)]
    dry_run: bool,
}

impl RollbackArgs {
    fn target(&self) -> RollbackTarget {
        if self.all {
            RollbackTarget::All
        } else if let Some(n) = self.batch {
            RollbackTarget::LastBatches(n)
        } else {
            RollbackTarget::Units(self.seeders.clone())
        }
    }
}

#[derive(Args, Debug)]
struct MakeArgs {
    /// Seeder name, e.g. `products` or `ProductsSeeder`.
    name: String,

    /// Restrict the seeder to these environments.
    #[arg(long = "environment", value_name = "ENV")]
    environments: Vec<String>,

    #[arg(long = "dep", value_name = "SEEDER")]
    dependencies: Vec<String>,

    #[arg(long)]
    priority: Option<i32>,

    /// Generate a rollback stage.
    #[arg(long)]
    rollback: bool,
}

impl From<MakeArgs> for MakeRequest {
    fn from(args: MakeArgs) -> Self {
        Self {
            name: args.name,
            environments: args.environments,
            dependencies: args.dependencies,
            priority: args.priority,
            rollback: args.rollback,
        }
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn confirm(environment: &str) -> Result<bool> {
    print!("You are about to seed the {environment} environment. Continue? [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut config = SeederConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.database_url {
        config.database_url = Some(url);
    }
    if let Some(env) = cli.env {
        config.default_environment = env.trim().to_lowercase();
    }
    let environment = config.default_environment.clone();

    let command = match cli.command {
        Commands::Init { create_history } => {
            let report = scaffold::init(&std::env::current_dir()?, &SeederConfig::default())?;
            println!("Created {}", report.config_file.display());
            println!("Created {}", report.seeders_dir.display());
            if create_history {
                let database_url = config
                    .database_url
                    .clone()
                    .context("No database URL configured (set DATABASE_URL or pass --database-url)")?;
                let mut session = PgSession::connect(&database_url).await?;
                session.ensure_history_table(&config.tracking_table).await?;
                println!("History table {} is ready", config.tracking_table);
            }
            return Ok(ExitCode::SUCCESS);
        }
        Commands::List => {
            print!("{}", commands::render_list(&demo::registry()?));
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Make(args) => {
            let path = scaffold::make(&config.seeders_path, &args.into())?;
            println!("Created {}", path.display());
            return Ok(ExitCode::SUCCESS);
        }
        command => command,
    };

    let dry_run = match &command {
        Commands::Run(args) => args.dry_run,
        Commands::Rollback(args) => args.dry_run,
        Commands::Refresh { dry_run } => *dry_run,
        _ => true,
    };
    if !dry_run && !cli.yes && config.requires_confirmation(&environment) && !confirm(&environment)? {
        println!("Aborted.");
        return Ok(ExitCode::FAILURE);
    }

    let database_url = config
        .database_url
        .clone()
        .context("No database URL configured (set DATABASE_URL or pass --database-url)")?;
    let mut session = PgSession::connect(&database_url).await?;

    sqlx::migrate!("./migrations").run(session.pool()).await?;
    if config.auto_create_tracking_table {
        session.ensure_history_table(&config.tracking_table).await?;
    }

    let mut manager = SeedManager::new(session, demo::registry()?, config);

    let success = match command {
        Commands::Run(args) => {
            let request = RunRequest {
                environment,
                force: args.force,
                fresh: args.fresh,
                dry_run: args.dry_run,
                seeders: args.seeders,
                tags: args.tags,
            };
            let summary = commands::run(&mut manager, &request).await?;
            print!("{}", commands::render_summary("Run", &summary));
            summary.is_success()
        }
        Commands::Rollback(args) => {
            let summary = manager.rollback(&args.target(), args.dry_run).await?;
            print!("{}", commands::render_summary("Rollback", &summary));
            summary.is_success()
        }
        Commands::Refresh { dry_run } => {
            let summary = manager.refresh(Some(&environment), dry_run).await?;
            print!("{}", commands::render_refresh(&summary));
            summary.is_success()
        }
        Commands::Status { detailed } => {
            let report = manager.status(detailed).await?;
            print!("{}", commands::render_status(&report));
            true
        }
        Commands::Init { .. } | Commands::List | Commands::Make(_) => true,
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
