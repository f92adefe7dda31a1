//! Backup Orchestrator - Main entry point
//!
//! One orchestration run per invocation.

use anyhow::{Context, Result};
use backup_orchestrator::filter::ScopeFilter;
use backup_orchestrator::fs::FilesystemSpace;
use backup_orchestrator::manifest::TokenMap;
use backup_orchestrator::purge::{self, PurgePolicy, TokenMapFile};
use backup_orchestrator::restore::{self, DownloadRestorer, RestoreMapping, RestoreOutcome};
use backup_orchestrator::storage::Storage;
use backup_orchestrator::transfer::progress::format_bytes;
use backup_orchestrator::transfer::{self, UploadRequest};
use backup_orchestrator::{schema, utils, verify, Config};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

/// Keyspace/table restrictions shared by transfer commands.
#[derive(ClapArgs, Debug, Clone, Default)]
struct ScopeArgs {
    /// Keyspace to include (repeatable)
    #[arg(long = "keyspace")]
    keyspaces: Vec<String>,

    /// Table to include as keyspace.table (repeatable)
    #[arg(long = "table")]
    tables: Vec<String>,

    /// Leave out the system keyspaces
    #[arg(long)]
    ignore_system_keyspaces: bool,
}

impl ScopeArgs {
    fn filter(&self) -> ScopeFilter {
        ScopeFilter::new(self.keyspaces.clone(), self.tables.clone(), self.ignore_system_keyspaces)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a staged snapshot tree as a backup of this node
    Backup {
        #[arg(long)]
        backup_name: String,
        /// Root of the staged tree (<keyspace>/<columnfamily>/...)
        #[arg(long)]
        staged_dir: PathBuf,
        /// Schema dump of the cluster
        #[arg(long)]
        schema_file: PathBuf,
        /// Token map of the cluster as JSON
        #[arg(long)]
        tokenmap_file: PathBuf,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Download a backup of this node into a directory
    Download {
        #[arg(long)]
        backup_name: String,
        #[arg(long)]
        destination: PathBuf,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Restore this node from a backup, following the restore mapping if set
    RestoreNode {
        #[arg(long)]
        backup_name: String,
        /// Overrides restore.staging_dir
        #[arg(long)]
        staging_dir: Option<PathBuf>,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Delete expired backups of nodes that left the cluster
    PurgeDecommissioned {
        /// Current token map of the live cluster as JSON
        #[arg(long)]
        tokenmap: PathBuf,
    },
    /// List the backups of a node
    ListBackups {
        /// Defaults to storage.fqdn
        #[arg(long)]
        node: Option<String>,
    },
    /// Check that every object of a backup is stored
    Verify {
        #[arg(long)]
        backup_name: String,
        /// Defaults to storage.fqdn
        #[arg(long)]
        node: Option<String>,
    },
    /// Print the catalog of a schema dump as JSON
    ParseSchema { file: PathBuf },
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    if let Err(e) = utils::logger::init(log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: Config) -> Result<()> {
    match command {
        Command::Backup {
            backup_name,
            staged_dir,
            schema_file,
            tokenmap_file,
            scope,
        } => {
            let storage = config.storage.build()?;
            backup(storage.as_ref(), &config, &backup_name, &staged_dir, &schema_file, &tokenmap_file, &scope).await
        }
        Command::Download {
            backup_name,
            destination,
            scope,
        } => {
            let storage = config.storage.build()?;
            let report = transfer::download_backup(
                storage.as_ref(),
                &config.storage.fqdn,
                &backup_name,
                &scope.filter(),
                &destination,
                &FilesystemSpace,
            )
            .await
            .with_context(|| format!("Download of backup {} failed", backup_name))?;
            tracing::info!(
                tables = report.transferred.len(),
                skipped = report.skipped.len(),
                size = %format_bytes(report.bytes),
                "Backup {} downloaded to {}",
                backup_name,
                destination.display()
            );
            Ok(())
        }
        Command::RestoreNode {
            backup_name,
            staging_dir,
            scope,
        } => restore_node(&config, &backup_name, staging_dir, &scope).await,
        Command::PurgeDecommissioned { tokenmap } => {
            let storage = config.storage.build()?;
            let monitoring = config.monitoring.provider.build();
            let policy = PurgePolicy {
                grace_period_days: config.purge.grace_period_days,
                isolate_node_failures: config.purge.isolate_node_failures,
            };
            purge::run_purge(storage.as_ref(), &TokenMapFile::new(tokenmap), monitoring.as_ref(), policy).await?;
            Ok(())
        }
        Command::ListBackups { node } => {
            let storage = config.storage.build()?;
            let node = node.unwrap_or_else(|| config.storage.fqdn.clone());
            for backup in verify::list_backups(storage.as_ref(), &node).await? {
                match backup.finished {
                    Some(finished) => println!("{} (finished {})", backup.name, finished.to_rfc3339()),
                    None => println!("{} [incomplete]", backup.name),
                }
            }
            Ok(())
        }
        Command::Verify { backup_name, node } => {
            let storage = config.storage.build()?;
            let node = node.unwrap_or_else(|| config.storage.fqdn.clone());
            let report = verify::verify_backup(storage.as_ref(), &node, &backup_name).await?;
            for path in &report.missing {
                println!("missing: {}", path);
            }
            for mismatch in &report.size_mismatches {
                println!(
                    "size mismatch: {} (expected {}, found {})",
                    mismatch.path, mismatch.expected, mismatch.actual
                );
            }
            if !report.is_valid() {
                anyhow::bail!("Backup {}/{} failed verification", node, backup_name);
            }
            println!("{}/{}: {} objects verified", node, backup_name, report.checked);
            Ok(())
        }
        Command::ParseSchema { file } => {
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read schema {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&schema::parse(&content))?);
            Ok(())
        }
        Command::ShowConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn backup(
    storage: &dyn Storage,
    config: &Config,
    backup_name: &str,
    staged_dir: &Path,
    schema_file: &Path,
    tokenmap_file: &Path,
    scope: &ScopeArgs,
) -> Result<()> {
    let schema = tokio::fs::read_to_string(schema_file)
        .await
        .with_context(|| format!("Failed to read schema {}", schema_file.display()))?;
    let tokenmap = tokio::fs::read_to_string(tokenmap_file)
        .await
        .with_context(|| format!("Failed to read token map {}", tokenmap_file.display()))?;
    let tokenmap = TokenMap::from_json(&tokenmap)?;

    let report = transfer::upload_backup(
        storage,
        UploadRequest {
            node: &config.storage.fqdn,
            backup: backup_name,
            staged_root: staged_dir,
            filter: &scope.filter(),
            schema: &schema,
            tokenmap: &tokenmap,
        },
    )
    .await
    .with_context(|| format!("Backup {} failed", backup_name))?;

    tracing::info!(
        tables = report.manifest.sections.len(),
        ignored = report.ignored.len(),
        objects = report.objects,
        size = %format_bytes(report.bytes),
        "Backup {} complete",
        backup_name
    );
    Ok(())
}

async fn restore_node(
    config: &Config,
    backup_name: &str,
    staging_dir: Option<PathBuf>,
    scope: &ScopeArgs,
) -> Result<()> {
    let storage: Arc<dyn Storage> = config.storage.build()?;
    let mapping = RestoreMapping::from_env(&config.restore.mapping_env)
        .with_context(|| format!("Invalid restore mapping in ${}", config.restore.mapping_env))?;
    let restorer = DownloadRestorer::new(
        storage.clone(),
        staging_dir.unwrap_or_else(|| config.restore.staging_dir.clone()),
        Arc::new(FilesystemSpace),
    );

    let outcome = restore::restore_node(
        storage.as_ref(),
        &restorer,
        &config.storage.fqdn,
        mapping.as_ref(),
        backup_name,
        scope.filter(),
    )
    .await
    .with_context(|| format!("Restore of backup {} failed", backup_name))?;

    match outcome {
        RestoreOutcome::Restored { source, backup, in_place } => {
            tracing::info!(source = %source, in_place, "Restored backup {}", backup)
        }
        RestoreOutcome::SkippedNotFound { source, backup } => {
            tracing::warn!(source = %source, "Skipped restore, backup {} not found", backup)
        }
        RestoreOutcome::NoSourceMapped => {
            tracing::warn!(node = %config.storage.fqdn, "Skipped restore, node has no source in the mapping")
        }
    }
    Ok(())
}
