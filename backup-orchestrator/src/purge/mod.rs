//! Purge of backups belonging to nodes that left the cluster.
//!
//! A node is decommissioned when storage holds backups for it but it owns no
//! token in the live cluster. Its backups are deleted once they are older than
//! the grace period; younger ones are kept and counted.
//!
//! Purging is forward-only. Data objects go first and the manifest last, so an
//! interrupted run leaves a manifest that the next run uses to finish the job.
//! Deleting an object that is already gone is not an error.

pub mod membership;

use crate::manifest::{add_size, Manifest, MetaObject};
use crate::storage::{BlobRef, NodeBackup, Storage, INDEX_SEGMENT};
use crate::transfer::progress::format_bytes;
use crate::utils::{OrchestratorError, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

pub use crate::monitoring::{LogMonitoring, Monitoring, NoMonitoring};
pub use membership::{MembershipSource, StaticMembership, TokenMapFile};

/// Metric identity of the purge run status (0 = success, 1 = failure).
pub const PURGE_METRIC_TAGS: [&str; 3] = ["decommissioned-node-purge", "purge-error", "PURGE-ERROR"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgePolicy {
    pub grace_period_days: i64,
    /// Keep going after a node fails and report all failures at the end.
    pub isolate_node_failures: bool,
}

impl Default for PurgePolicy {
    fn default() -> Self {
        Self {
            grace_period_days: 10,
            isolate_node_failures: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub decommissioned: BTreeSet<String>,
    pub backups_purged: usize,
    pub objects_purged: usize,
    pub bytes_purged: u64,
    /// Backups of decommissioned nodes still inside the grace period.
    pub retained_within_grace: usize,
    /// `(node, error)` for nodes that failed when failures are isolated.
    pub failed_nodes: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct NodePurge {
    backups: usize,
    objects: usize,
    bytes: u64,
    retained: usize,
}

/// Node identities found at the top of the storage namespace. Entries under
/// the `index` catalog are not nodes.
pub fn extract_nodes(blobs: &[BlobRef]) -> BTreeSet<String> {
    blobs
        .iter()
        .filter(|blob| !blob.name.split('/').any(|segment| segment == INDEX_SEGMENT))
        .filter_map(|blob| blob.name.split('/').find(|segment| !segment.is_empty()))
        .map(str::to_string)
        .collect()
}

pub fn decommissioned_nodes(all_nodes: &BTreeSet<String>, live_nodes: &BTreeSet<String>) -> BTreeSet<String> {
    all_nodes.difference(live_nodes).cloned().collect()
}

/// Whether `backup` finished more than `grace_period_days` before `now`.
/// Backups without a manifest never qualify.
pub fn is_expired(backup: &NodeBackup, now: DateTime<Utc>, grace_period_days: i64) -> bool {
    match backup.finished {
        Some(finished) => now - finished > Duration::days(grace_period_days),
        None => false,
    }
}

/// Delete every object of `backup`. Returns the number of objects deleted and
/// the bytes of data objects that were still present.
pub async fn purge_backup(storage: &dyn Storage, backup: &NodeBackup) -> Result<(usize, u64)> {
    let manifest_path = backup.meta_path(MetaObject::Manifest);
    let manifest = match storage.get_blob(&manifest_path).await? {
        Some(_) => Manifest::from_json(&storage.read_blob_as_string(&manifest_path).await?)?,
        None => Manifest::default(),
    };

    let data: Vec<String> = manifest
        .sections
        .iter()
        .flat_map(|section| section.objects.iter().map(|o| o.path.clone()))
        .collect();
    let mut deleted = 0;
    let mut bytes = 0u64;
    for batch in data.chunks(storage.max_batch_size().max(1)) {
        let mut present = 0u64;
        for path in batch {
            if let Some(blob) = storage.get_blob(path).await? {
                present = add_size(present, blob.size)?;
            }
        }
        deleted += storage.delete_objects(batch).await?;
        bytes = add_size(bytes, present)?;
    }

    let metadata = vec![
        backup.meta_path(MetaObject::Schema),
        backup.meta_path(MetaObject::TokenMap),
        manifest_path,
    ];
    deleted += storage.delete_objects(&metadata).await?;

    Ok((deleted, bytes))
}

async fn purge_node(
    storage: &dyn Storage,
    node: &str,
    now: DateTime<Utc>,
    grace_period_days: i64,
) -> Result<NodePurge> {
    let mut result = NodePurge::default();

    for backup in storage.list_node_backups(node).await? {
        if !is_expired(&backup, now, grace_period_days) {
            debug!(node = %node, backup = %backup.name, "Backup within grace period");
            result.retained += 1;
            continue;
        }
        let (objects, bytes) = purge_backup(storage, &backup).await?;
        info!(node = %node, backup = %backup.name, objects, size = %format_bytes(bytes), "Purged backup");
        result.backups += 1;
        result.objects += objects;
        result.bytes += bytes;
    }

    Ok(result)
}

/// Find decommissioned nodes and purge their expired backups.
pub async fn purge_decommissioned(
    storage: &dyn Storage,
    membership: &dyn MembershipSource,
    policy: PurgePolicy,
    now: DateTime<Utc>,
) -> Result<PurgeReport> {
    let all_nodes = extract_nodes(&storage.list_root_blobs().await?);
    let live_nodes = membership.live_nodes().await?;
    let decommissioned = decommissioned_nodes(&all_nodes, &live_nodes);
    info!(
        nodes_with_backups = all_nodes.len(),
        live = live_nodes.len(),
        decommissioned = decommissioned.len(),
        "Computed decommissioned nodes"
    );

    let mut report = PurgeReport::default();
    for node in &decommissioned {
        match purge_node(storage, node, now, policy.grace_period_days).await {
            Ok(purged) => {
                report.backups_purged += purged.backups;
                report.objects_purged += purged.objects;
                report.bytes_purged += purged.bytes;
                report.retained_within_grace += purged.retained;
            }
            Err(e) if policy.isolate_node_failures => {
                warn!(node = %node, error = %e, "Failed to purge node, continuing");
                report.failed_nodes.push((node.clone(), e.to_string()));
            }
            Err(e) => return Err(e),
        }
    }
    report.decommissioned = decommissioned;

    if !report.failed_nodes.is_empty() {
        let nodes: Vec<&str> = report.failed_nodes.iter().map(|(node, _)| node.as_str()).collect();
        return Err(OrchestratorError::Storage(format!("Purge failed for nodes: {}", nodes.join(", "))));
    }
    Ok(report)
}

/// Full purge run: always reports its status to monitoring, logs failures with
/// their cause chain.
pub async fn run_purge(
    storage: &dyn Storage,
    membership: &dyn MembershipSource,
    monitoring: &dyn Monitoring,
    policy: PurgePolicy,
) -> Result<PurgeReport> {
    info!(grace_period_days = policy.grace_period_days, "Starting decommissioned node purge");
    match purge_decommissioned(storage, membership, policy, Utc::now()).await {
        Ok(report) => {
            info!(
                decommissioned = ?report.decommissioned,
                backups = report.backups_purged,
                objects = report.objects_purged,
                size = %format_bytes(report.bytes_purged),
                retained = report.retained_within_grace,
                "Purge complete"
            );
            monitoring.send(&PURGE_METRIC_TAGS, 0.0);
            Ok(report)
        }
        Err(e) => {
            error!(error = ?e, "Decommissioned node purge failed");
            monitoring.send(&PURGE_METRIC_TAGS, 1.0);
            Err(e)
        }
    }
}
