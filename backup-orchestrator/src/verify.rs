//! Backup verification and listing.

use crate::manifest::{Manifest, MetaObject};
use crate::storage::{NodeBackup, Storage};
use crate::utils::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeMismatch {
    pub path: String,
    pub expected: u64,
    pub actual: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// False when the backup has no manifest.
    pub complete: bool,
    pub checked: usize,
    pub missing: Vec<String>,
    pub size_mismatches: Vec<SizeMismatch>,
}

impl VerifyReport {
    pub fn is_valid(&self) -> bool {
        self.complete && self.missing.is_empty() && self.size_mismatches.is_empty()
    }
}

/// Check that every object the manifest of `node/backup` records is stored
/// with the recorded size.
pub async fn verify_backup(storage: &dyn Storage, node: &str, backup: &str) -> Result<VerifyReport> {
    let manifest_path = crate::storage::meta_path(node, backup, MetaObject::Manifest);
    let mut report = VerifyReport::default();
    if storage.get_blob(&manifest_path).await?.is_none() {
        warn!(node = %node, backup = %backup, "Backup has no manifest");
        return Ok(report);
    }
    report.complete = true;

    let manifest = Manifest::from_json(&storage.read_blob_as_string(&manifest_path).await?)?;
    for section in &manifest.sections {
        for object in &section.objects {
            report.checked += 1;
            let expected = object.size.bytes()?;
            match storage.get_blob(&object.path).await? {
                None => report.missing.push(object.path.clone()),
                Some(blob) if blob.size != expected => report.size_mismatches.push(SizeMismatch {
                    path: object.path.clone(),
                    expected,
                    actual: blob.size,
                }),
                Some(_) => debug!(path = %object.path, "Object verified"),
            }
        }
    }

    info!(
        node = %node,
        backup = %backup,
        checked = report.checked,
        missing = report.missing.len(),
        mismatched = report.size_mismatches.len(),
        "Verification finished"
    );
    Ok(report)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSummary {
    pub name: String,
    pub finished: Option<DateTime<Utc>>,
}

impl BackupSummary {
    pub fn is_complete(&self) -> bool {
        self.finished.is_some()
    }
}

impl From<NodeBackup> for BackupSummary {
    fn from(backup: NodeBackup) -> Self {
        Self {
            name: backup.name,
            finished: backup.finished,
        }
    }
}

/// Backups of `node`, oldest first; incomplete backups come last.
pub async fn list_backups(storage: &dyn Storage, node: &str) -> Result<Vec<BackupSummary>> {
    let mut backups: Vec<BackupSummary> = storage
        .list_node_backups(node)
        .await?
        .into_iter()
        .map(BackupSummary::from)
        .collect();
    backups.sort_by(|a, b| match (a.finished, b.finished) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.name.cmp(&b.name)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    });
    Ok(backups)
}
