//! Download planning and execution.
//!
//! A run goes through three phases, in order:
//! 1. plan: walk the manifest in order, skip tables that are out of scope or
//!    empty, and split each remaining table's objects into backend-sized batches;
//! 2. pre-flight: create the destination root, check it has room for every
//!    planned byte and that no table directory exists yet;
//! 3. transfer: one table at a time, one batch at a time, then the backup's
//!    metadata objects into the destination root.
//!
//! Nothing is transferred if the pre-flight fails.

use super::progress::{format_bytes, format_duration, format_speed, TransferProgress};
use crate::filter::ScopeFilter;
use crate::fs::space::{check_available_space, FreeSpace};
use crate::manifest::{add_size, objects_size, FqtnWithId, Manifest, ManifestSection, MetaObject};
use crate::storage::{hidden_parent, NodeBackup, Storage};
use crate::utils::{OrchestratorError, Result};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotRequested,
    NothingToDownload,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotRequested => f.write_str("not requested"),
            SkipReason::NothingToDownload => f.write_str("nothing to download"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTable {
    pub table: FqtnWithId,
    pub reason: SkipReason,
}

/// Objects fetched by a single backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub paths: Vec<String>,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct TablePlan {
    pub table: FqtnWithId,
    pub destination: PathBuf,
    /// Hidden sub-directories (secondary index files) to create before transfer.
    pub hidden_dirs: BTreeSet<String>,
    pub batches: Vec<Batch>,
    pub bytes: u64,
}

impl TablePlan {
    pub fn object_count(&self) -> usize {
        self.batches.iter().map(|b| b.paths.len()).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadPlan {
    pub tables: Vec<TablePlan>,
    pub skipped: Vec<SkippedTable>,
    pub total_bytes: u64,
}

impl DownloadPlan {
    /// Reject the plan if any table directory is already present.
    pub fn check_destinations(&self) -> Result<()> {
        match self.tables.iter().find(|t| t.destination.exists()) {
            Some(table) => Err(OrchestratorError::DestinationExists(table.destination.display().to_string())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub transferred: Vec<FqtnWithId>,
    pub skipped: Vec<SkippedTable>,
    pub objects: usize,
    pub bytes: u64,
}

/// Split `section`'s objects into consecutive batches of at most `max_batch_size`.
pub fn batches(section: &ManifestSection, max_batch_size: usize) -> Result<Vec<Batch>> {
    section
        .objects
        .chunks(max_batch_size.max(1))
        .map(|chunk| {
            Ok(Batch {
                paths: chunk.iter().map(|o| o.path.clone()).collect(),
                bytes: objects_size(chunk)?,
            })
        })
        .collect()
}

fn plan_table(section: &ManifestSection, destination_root: &Path, max_batch_size: usize) -> Result<TablePlan> {
    let hidden_dirs = section
        .objects
        .iter()
        .filter_map(|o| hidden_parent(&o.path))
        .map(str::to_string)
        .collect();
    Ok(TablePlan {
        table: section.fqtn_with_id(),
        destination: destination_root.join(&section.keyspace).join(&section.columnfamily),
        hidden_dirs,
        batches: batches(section, max_batch_size)?,
        bytes: section.size()?,
    })
}

pub fn plan_download(
    manifest: &Manifest,
    scope: &HashSet<FqtnWithId>,
    destination_root: &Path,
    max_batch_size: usize,
) -> Result<DownloadPlan> {
    let mut plan = DownloadPlan::default();

    for section in &manifest.sections {
        let table = section.fqtn_with_id();
        let reason = if !scope.contains(&table) {
            Some(SkipReason::NotRequested)
        } else if section.objects.is_empty() {
            Some(SkipReason::NothingToDownload)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                debug!(table = %table, reason = %reason, "Skipping table");
                plan.skipped.push(SkippedTable { table, reason });
            }
            None => {
                let table_plan = plan_table(section, destination_root, max_batch_size)?;
                plan.total_bytes = add_size(plan.total_bytes, table_plan.bytes)?;
                plan.tables.push(table_plan);
            }
        }
    }

    Ok(plan)
}

/// Run the transfer phase of an already validated plan.
async fn execute_plan(
    storage: &dyn Storage,
    plan: &DownloadPlan,
    progress: &mut TransferProgress,
) -> Result<Vec<FqtnWithId>> {
    let mut transferred = Vec::with_capacity(plan.tables.len());

    for table in &plan.tables {
        if let Some(parent) = table.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::create_dir(&table.destination).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                OrchestratorError::DestinationExists(table.destination.display().to_string())
            } else {
                e.into()
            }
        })?;
        for hidden in &table.hidden_dirs {
            tokio::fs::create_dir_all(table.destination.join(hidden)).await?;
        }

        info!(
            table = %table.table,
            objects = table.object_count(),
            batches = table.batches.len(),
            size = %format_bytes(table.bytes),
            "Downloading table"
        );
        for batch in &table.batches {
            storage.download_blobs(&batch.paths, &table.destination).await?;
            progress.record_batch(batch.paths.len(), batch.bytes);
        }
        progress.record_table();
        debug!(table = %table.table, progress = %format!("{:.1}%", progress.percent_complete()), "Table downloaded");
        transferred.push(table.table.clone());
    }

    Ok(transferred)
}

/// Download the in-scope tables of `manifest` plus the backup's metadata into
/// `destination_root`.
pub async fn download_manifest(
    storage: &dyn Storage,
    backup: &NodeBackup,
    manifest: &Manifest,
    scope: &HashSet<FqtnWithId>,
    destination_root: &Path,
    space: &dyn FreeSpace,
) -> Result<DownloadReport> {
    let plan = plan_download(manifest, scope, destination_root, storage.max_batch_size())?;

    let available = check_available_space(destination_root, plan.total_bytes, space)?;
    plan.check_destinations()?;
    info!(
        node = %backup.node,
        backup = %backup.name,
        tables = plan.tables.len(),
        required = %format_bytes(plan.total_bytes),
        available = %format_bytes(available),
        "Starting download"
    );

    let mut progress = TransferProgress::new(plan.total_bytes);
    for _ in &plan.skipped {
        progress.record_skip();
    }
    let transferred = execute_plan(storage, &plan, &mut progress).await?;

    let metadata: Vec<String> = MetaObject::ALL.iter().map(|m| backup.meta_path(*m)).collect();
    storage.download_blobs(&metadata, destination_root).await?;

    info!(
        tables = progress.tables_transferred,
        skipped = progress.tables_skipped,
        objects = progress.transferred_objects,
        size = %format_bytes(progress.transferred_bytes),
        elapsed = %format_duration(progress.elapsed()),
        speed = %format_speed(progress.average_speed()),
        "Download complete"
    );

    Ok(DownloadReport {
        transferred,
        skipped: plan.skipped,
        objects: progress.transferred_objects,
        bytes: progress.transferred_bytes,
    })
}

/// Download the completed backup `backup_name` of `node`, limited to what
/// `filter` keeps.
pub async fn download_backup(
    storage: &dyn Storage,
    node: &str,
    backup_name: &str,
    filter: &ScopeFilter,
    destination_root: &Path,
    space: &dyn FreeSpace,
) -> Result<DownloadReport> {
    if destination_root.exists() && !destination_root.is_dir() {
        return Err(OrchestratorError::NotADirectory(destination_root.display().to_string()));
    }

    let backups = storage.list_node_backups(node).await?;
    let backup = backups
        .into_iter()
        .find(|b| b.is_complete() && b.name == backup_name)
        .ok_or_else(|| OrchestratorError::BackupNotFound(format!("{}/{}", node, backup_name)))?;

    let content = storage.read_blob_as_string(&backup.meta_path(MetaObject::Manifest)).await?;
    let manifest = Manifest::from_json(&content)?;
    let scope = filter.apply(&manifest);
    for table in &scope.ignored {
        debug!(table = %table, "Table not requested");
    }
    download_manifest(storage, &backup, &manifest, &scope.retained, destination_root, space).await
}
