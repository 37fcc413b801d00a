// src/main.rs

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use schemaboot::db::{AppliedPatchRecord, AppliedPatchTable, table_is_queryable};
use schemaboot::lock::LOCK_TABLE;
use schemaboot::{BootstrapConfig, PatchRegistry, SchemaBootstrap};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "schemaboot")]
#[command(author, version, about = "Cluster-safe database schema bootstrap and validation", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the schema
    Bootstrap {
        /// Database path
        #[arg(short, long)]
        db: String,
    },
    /// Compare the schema with the reference schemas
    Validate {
        /// Database path
        #[arg(short, long)]
        db: String,
        /// Write the report here instead of to temp files
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Dump the schema as XML
    Dump {
        /// Database path
        #[arg(short, long)]
        db: String,
        /// Table prefixes to dump (default: configured prefixes)
        #[arg(short, long = "prefix")]
        prefixes: Vec<String>,
    },
    /// Show applied patches and lock state
    Status {
        /// Database path
        #[arg(short, long)]
        db: String,
        /// Print applied patches as JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<BootstrapConfig> {
    match path {
        Some(path) => BootstrapConfig::load(path)
            .with_context(|| format!("Failed to load config file: {}", path.display())),
        None => Ok(BootstrapConfig::default()),
    }
}

fn open_db(db: &str) -> Result<Connection> {
    schemaboot::db::open(db).with_context(|| format!("Failed to open database: {}", db))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Bootstrap { db } => {
            let conn = open_db(&db)?;
            let registry = config.registry()?;
            let loader = config.loader();
            let secondary = config.secondary_engine(&loader)?;

            let mut bootstrap = SchemaBootstrap::new(&config, &registry, &loader);
            if let Some(engine) = &secondary {
                bootstrap = bootstrap.with_secondary(engine);
            }
            let report = bootstrap.run(&conn)?;

            info!("Schema bootstrap finished: {}", report.outcome);
            println!("Schema {}", report.outcome.to_string().to_lowercase());
            if let Some(path) = &report.statements_file {
                println!("  Statements: {}", path.display());
            }
            if report.attempts > 1 {
                println!("  Attempts: {}", report.attempts);
            }
            if let Some(validation) = &report.validation {
                println!("  Potential problems: {}", validation.total_problems);
                for file in &validation.files {
                    println!("  Report: {}", file.display());
                }
            }
            Ok(())
        }
        Commands::Validate { db, output } => {
            let conn = open_db(&db)?;
            let registry = config.registry()?;
            let loader = config.loader();
            let bootstrap = SchemaBootstrap::new(&config, &registry, &loader);

            let report = match &output {
                Some(path) => {
                    let mut writer = BufWriter::new(
                        File::create(path)
                            .with_context(|| format!("Failed to create {}", path.display()))?,
                    );
                    let out: &mut dyn Write = &mut writer;
                    let report = bootstrap.validate_schema(&conn, Some(out))?;
                    writer.flush()?;
                    report
                }
                None => bootstrap.validate_schema(&conn, None)?,
            };

            println!("Potential problems: {}", report.total_problems);
            for file in &report.files {
                println!("  Report: {}", file.display());
            }
            for warning in &report.warnings {
                println!("  Warning: {}", warning);
            }
            if !report.is_clean() {
                bail!("Schema validation found problems");
            }
            Ok(())
        }
        Commands::Dump { db, prefixes } => {
            let conn = open_db(&db)?;
            let registry = PatchRegistry::new(config.schema_version);
            let loader = config.loader();
            let bootstrap = SchemaBootstrap::new(&config, &registry, &loader);

            let prefixes = (!prefixes.is_empty()).then_some(prefixes.as_slice());
            let files = bootstrap.dump_schema(&conn, prefixes)?;
            if files.is_empty() {
                bail!("No schema dump was written");
            }
            for file in files {
                println!("{}", file.display());
            }
            Ok(())
        }
        Commands::Status { db, json } => {
            let conn = open_db(&db)?;
            let located = AppliedPatchTable::locate(&conn, config.schema_name.as_deref())?;
            let Some((table_ref, table)) = located.first() else {
                println!("No schema found");
                return Ok(());
            };

            let records = AppliedPatchRecord::list_all(&conn, *table)?;
            if json {
                let stdout = io::stdout();
                serde_json::to_writer_pretty(stdout.lock(), &records)?;
                println!();
                return Ok(());
            }

            let installed = AppliedPatchRecord::installed_schema_version(&conn, *table)?;
            println!("Schema: {}.{}", table_ref.database, table_ref.name);
            println!("  Installed version: {}", installed);
            println!(
                "  Bootstrap in progress: {}",
                if table_is_queryable(&conn, LOCK_TABLE) { "yes" } else { "no" }
            );
            println!("  Applied patches: {}", records.len());
            for record in &records {
                let state = match (record.succeeded, record.was_executed) {
                    (true, true) => "applied",
                    (true, false) => "placeholder",
                    (false, _) => "FAILED",
                };
                println!(
                    "    {:<40} {:<12} {}",
                    record.id,
                    state,
                    record.applied_on_date.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["schemaboot", "--config", "boot.toml", "bootstrap", "--db", "app.db"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("boot.toml")));
        assert!(matches!(cli.command, Commands::Bootstrap { db } if db == "app.db"));

        let cli = Cli::try_parse_from(["schemaboot", "status", "--db", "app.db", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Status { json: true, .. }));

        let cli =
            Cli::try_parse_from(["schemaboot", "dump", "--db", "app.db", "-p", "alf_", "-p", "act_"]).unwrap();
        match cli.command {
            Commands::Dump { prefixes, .. } => assert_eq!(prefixes, vec!["alf_", "act_"]),
            _ => panic!("expected dump"),
        }
    }

    #[test]
    fn test_missing_db_is_rejected() {
        assert!(Cli::try_parse_from(["schemaboot", "bootstrap"]).is_err());
    }

    #[test]
    fn test_default_config_without_file() {
        let config = load_config(None).unwrap();
        assert!(config.update_schema);
    }
}
