mod report;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use strata_config::{AppConfig, ConfigLoader, LoggingConfig};
use strata_db::SqliteDatabase;
use strata_engine::{Catalog, LogStore, MigrationRunner, RunnerOptions};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Guarded, resumable schema migrations for SQLite", version)]
struct Cli {
    /// Config file (.yml, .yaml or .toml)
    #[arg(long, global = true, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true, env = "STRATA_DATABASE")]
    database: Option<PathBuf>,

    /// Directory holding the step files, overriding the config
    #[arg(long, global = true, env = "STRATA_CATALOG")]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply every pending step
    Migrate {
        /// Run every step without a transaction
        #[arg(long)]
        no_transaction: bool,
    },

    /// Reverse the most recently applied steps
    Rollback {
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },

    /// Show applied and pending steps
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Clear a migration lock left behind by a crashed run
    Unlock,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config.logging)?;

    match cli.command {
        Commands::Migrate { no_transaction } => migrate(&config, no_transaction),
        Commands::Rollback { steps } => rollback(&config, steps),
        Commands::Status { json } => status(&config, json),
        Commands::Unlock => unlock(&config),
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ConfigLoader::discover().context("failed to load config")?.0,
    };
    if let Some(path) = &cli.database {
        config.database.path = path.clone();
    }
    if let Some(dir) = &cli.catalog {
        config.catalog.dir = dir.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("invalid log level")?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
    Ok(())
}

fn open_database(config: &AppConfig) -> Result<SqliteDatabase> {
    SqliteDatabase::open(&config.database, &config.log).with_context(|| {
        format!(
            "failed to open database {}",
            config.database.path.display()
        )
    })
}

fn load_catalog(config: &AppConfig) -> Result<Catalog> {
    Catalog::load_dir(&config.catalog.dir)
        .with_context(|| format!("failed to load catalog {}", config.catalog.dir.display()))
}

fn migrate(config: &AppConfig, no_transaction: bool) -> Result<()> {
    let catalog = load_catalog(config)?;
    let db = open_database(config)?;
    let options = RunnerOptions {
        transactional: config.runner.transactional && !no_transaction,
        ..RunnerOptions::default()
    };

    let mut runner = MigrationRunner::new(&catalog, &db, &db).with_options(options);
    let report = runner.run().context("migration failed")?;
    report::print_run(&report);
    Ok(())
}

fn rollback(config: &AppConfig, steps: usize) -> Result<()> {
    if steps == 0 {
        bail!("--steps must be at least 1");
    }
    let catalog = load_catalog(config)?;
    let db = open_database(config)?;

    let mut runner = MigrationRunner::new(&catalog, &db, &db);
    let rolled_back = runner.rollback(steps).context("rollback failed")?;
    if rolled_back.is_empty() {
        println!("Nothing to roll back.");
    }
    for step in &rolled_back {
        println!("  {}  {} rolled back", step.version, step.name);
    }
    Ok(())
}

fn status(config: &AppConfig, json: bool) -> Result<()> {
    let catalog = load_catalog(config)?;
    let db = open_database(config)?;

    let status = MigrationRunner::new(&catalog, &db, &db)
        .status()
        .context("failed to read migration status")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report::status_json(&status))?);
    } else {
        report::print_status(&status, &config.database.path, &config.catalog.dir);
    }
    Ok(())
}

fn unlock(config: &AppConfig) -> Result<()> {
    let db = open_database(config)?;
    db.ensure_log().context("failed to prepare migration log")?;
    if db.force_release_lock().context("failed to clear migration lock")? {
        warn!("cleared migration lock; make sure no other run is in progress");
        println!("Migration lock cleared.");
    } else {
        info!("no migration lock was held");
        println!("No migration lock held.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_override_config() {
        let cli = Cli::try_parse_from([
            "strata",
            "status",
            "--database",
            "tmp/app.sqlite3",
            "--catalog",
            "tmp/migrate",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.database.path, PathBuf::from("tmp/app.sqlite3"));
        assert_eq!(config.catalog.dir, PathBuf::from("tmp/migrate"));
    }

    #[test]
    fn rollback_defaults_to_one_step() {
        let cli = Cli::try_parse_from(["strata", "rollback"]).unwrap();
        assert!(matches!(cli.command, Commands::Rollback { steps: 1 }));
    }
}
