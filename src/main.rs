use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use fireledger_lib::backup::{self, BackupReport};
use fireledger_lib::dataset::seed::NoSeed;
use fireledger_lib::dataset::DatasetManager;
use fireledger_lib::{logging, migrate, Namespace, SqliteStore, StoreConfig, StoreHandle};

#[derive(Debug, Parser)]
#[command(
    name = "fireledger",
    about = "Maintenance tools for the FireLedger local store",
    version
)]
struct Cli {
    /// Database file to operate on instead of the configured default.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Open the database, apply pending migrations and print the schema version.
    Migrate,
    /// Write a namespace's datasets as a snapshot document.
    Export {
        #[arg(long)]
        namespace: String,
        /// Output file; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Replace a namespace's datasets from a snapshot document.
    Import {
        #[arg(long)]
        namespace: String,
        file: PathBuf,
    },
    /// Copy every live dataset of a namespace to its backup keys.
    Backup {
        #[arg(long)]
        namespace: String,
    },
    /// Copy a namespace's backup keys over its live datasets.
    Restore {
        #[arg(long)]
        namespace: String,
    },
    /// Print when a namespace was last backed up.
    LastBackup {
        #[arg(long)]
        namespace: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let mut config = StoreConfig::load();
    if let Some(path) = cli.db.clone() {
        config = config.with_db_path(path);
    }
    let log_guard = logging::init(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start async runtime: {err}");
            process::exit(1);
        }
    };

    let code = match runtime.block_on(handle_cli(cli.command, &config)) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            1
        }
    };
    drop(runtime);
    // Flush the file sink before exiting.
    drop(log_guard);
    process::exit(code);
}

async fn handle_cli(command: Commands, config: &StoreConfig) -> Result<i32> {
    match command {
        Commands::Migrate => {
            let store = SqliteStore::new(config);
            let pool = store.pool().await.context("open database")?;
            let version = migrate::current_version(pool)
                .await
                .context("read schema version")?;
            store.close().await;
            println!("Schema version {version} (latest {}).", migrate::latest_version());
            Ok(0)
        }
        Commands::Export { namespace, out } => {
            let namespace = user_namespace(&namespace)?;
            let datasets = load_datasets(config, namespace).await?;
            let value = datasets
                .export_snapshot()
                .to_value()
                .context("serialize snapshot")?;
            let serialized =
                serde_json::to_string_pretty(&value).context("serialize snapshot")?;
            match out {
                Some(path) => {
                    std::fs::write(&path, serialized)
                        .with_context(|| format!("write snapshot to {}", path.display()))?;
                    println!("Snapshot written to {}", path.display());
                }
                None => println!("{serialized}"),
            }
            Ok(0)
        }
        Commands::Import { namespace, file } => {
            let namespace = user_namespace(&namespace)?;
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("read snapshot {}", file.display()))?;
            let value: serde_json::Value =
                serde_json::from_str(&raw).context("parse snapshot JSON")?;
            let datasets = load_datasets(config, namespace).await?;
            datasets
                .import_snapshot(value)
                .await
                .context("import snapshot")?;
            // An imported namespace must never be seeded over later.
            datasets
                .initialized()
                .set(true)
                .await
                .context("mark namespace initialized")?;
            println!("Snapshot imported.");
            Ok(0)
        }
        Commands::Backup { namespace } => {
            let namespace = user_namespace(&namespace)?;
            let store = open_store(config).await?;
            let report = backup::backup_namespace(&store, &namespace).await;
            print_report("backup", &report)?;
            Ok(exit_code(&report))
        }
        Commands::Restore { namespace } => {
            let namespace = user_namespace(&namespace)?;
            let store = open_store(config).await?;
            let report = backup::restore_namespace(&store, &namespace).await;
            print_report("restore", &report)?;
            Ok(exit_code(&report))
        }
        Commands::LastBackup { namespace } => {
            let namespace = user_namespace(&namespace)?;
            let store = open_store(config).await?;
            match backup::last_backup_at(&store, &namespace)
                .await
                .context("read backup timestamp")?
            {
                Some(stamp) => println!("{}", stamp.to_rfc3339()),
                None => println!("never"),
            }
            Ok(0)
        }
    }
}

fn user_namespace(raw: &str) -> Result<Namespace> {
    let namespace = Namespace::resolve(Some(raw));
    if namespace.is_guest() {
        bail!("the guest namespace is never persisted; pass a user identity");
    }
    Ok(namespace)
}

/// Open the database up front so a broken store fails the command instead of
/// silently reading as empty.
async fn open_store(config: &StoreConfig) -> Result<StoreHandle> {
    let store = Arc::new(SqliteStore::new(config));
    store.pool().await.context("open database")?;
    Ok(StoreHandle::from_store(store))
}

async fn load_datasets(config: &StoreConfig, namespace: Namespace) -> Result<DatasetManager> {
    let datasets = DatasetManager::new(open_store(config).await?, Arc::new(NoSeed));
    datasets.bind_namespace(namespace).await;
    Ok(datasets)
}

fn print_report(operation: &str, report: &BackupReport) -> Result<()> {
    let failed: Vec<_> = report
        .failed
        .iter()
        .map(|(name, err)| json!({ "name": name, "error": err }))
        .collect();
    let payload = json!({
        "operation": operation,
        "copied": report.copied,
        "skipped": report.skipped,
        "failed": failed,
    });
    let serialized = serde_json::to_string_pretty(&payload).context("serialize report")?;
    println!("{serialized}");
    Ok(())
}

fn exit_code(report: &BackupReport) -> i32 {
    if report.is_complete() {
        0
    } else {
        1
    }
}
