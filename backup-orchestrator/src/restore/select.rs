//! Backup selection and node-level restore invocation.

use super::topology::{resolve, ResolvedSource, RestoreMapping};
use crate::filter::ScopeFilter;
use crate::fs::space::FreeSpace;
use crate::manifest::{Manifest, MetaObject};
use crate::storage::{NodeBackup, Storage};
use crate::transfer::download::{download_manifest, DownloadReport};
use crate::utils::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a node-level restore needs to know.
#[derive(Debug, Clone)]
pub struct NodeRestoreRequest {
    pub backup: NodeBackup,
    pub in_place: bool,
    pub seed: bool,
    pub filter: ScopeFilter,
}

#[async_trait]
pub trait NodeRestorer: Send + Sync {
    async fn restore(&self, request: &NodeRestoreRequest) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored { source: String, backup: String, in_place: bool },
    /// No completed backup with the requested name exists for the source node.
    SkippedNotFound { source: String, backup: String },
    /// The topology mapping does not mention this node.
    NoSourceMapped,
}

/// The completed backup named `name`, if any.
pub fn select_backup<'a>(name: &str, backups: &'a [NodeBackup]) -> Option<&'a NodeBackup> {
    backups.iter().find(|b| b.is_complete() && b.name == name)
}

/// Resolve this node's source, find the requested backup and hand it to `restorer`.
pub async fn restore_node(
    storage: &dyn Storage,
    restorer: &dyn NodeRestorer,
    own_identity: &str,
    mapping: Option<&RestoreMapping>,
    backup_name: &str,
    filter: ScopeFilter,
) -> Result<RestoreOutcome> {
    let resolved = resolve(own_identity, mapping)?;
    if let Some(mapping) = mapping {
        info!(in_place = mapping.in_place, seeds = ?mapping.seeds(), "Restore mapping loaded");
    }
    let (source, seed) = match &resolved {
        ResolvedSource::Undetermined => {
            warn!(node = %own_identity, "Node is not part of the restore mapping");
            return Ok(RestoreOutcome::NoSourceMapped);
        }
        ResolvedSource::InPlace { source, seed } | ResolvedSource::Remote { source, seed } => {
            (source.clone(), *seed)
        }
    };

    let backups = storage.list_node_backups(&source).await?;
    let Some(backup) = select_backup(backup_name, &backups) else {
        warn!(source = %source, backup = %backup_name, "Skipped: backup not found");
        return Ok(RestoreOutcome::SkippedNotFound {
            source,
            backup: backup_name.to_string(),
        });
    };

    info!(
        node = %own_identity,
        source = %source,
        backup = %backup.name,
        in_place = resolved.is_in_place(),
        seed,
        "Restoring node"
    );
    let request = NodeRestoreRequest {
        backup: backup.clone(),
        in_place: resolved.is_in_place(),
        seed,
        filter,
    };
    restorer.restore(&request).await?;

    Ok(RestoreOutcome::Restored {
        source,
        backup: backup.name.clone(),
        in_place: request.in_place,
    })
}

/// Restores a node by downloading the scoped backup into a staging directory,
/// from which the database loads it.
pub struct DownloadRestorer {
    storage: Arc<dyn Storage>,
    staging_dir: PathBuf,
    space: Arc<dyn FreeSpace>,
}

impl DownloadRestorer {
    pub fn new(storage: Arc<dyn Storage>, staging_dir: PathBuf, space: Arc<dyn FreeSpace>) -> Self {
        Self {
            storage,
            staging_dir,
            space,
        }
    }

    pub async fn download(&self, request: &NodeRestoreRequest) -> Result<DownloadReport> {
        let content = self
            .storage
            .read_blob_as_string(&request.backup.meta_path(MetaObject::Manifest))
            .await?;
        let manifest = Manifest::from_json(&content)?;
        let scope = request.filter.apply(&manifest);
        for table in &scope.ignored {
            info!(table = %table, "Table not restored");
        }

        let destination = self.staging_dir.join(&request.backup.name);
        download_manifest(
            self.storage.as_ref(),
            &request.backup,
            &manifest,
            &scope.retained,
            &destination,
            self.space.as_ref(),
        )
        .await
    }
}

#[async_trait]
impl NodeRestorer for DownloadRestorer {
    async fn restore(&self, request: &NodeRestoreRequest) -> Result<()> {
        let report = self.download(request).await?;
        info!(
            backup = %request.backup.name,
            tables = report.transferred.len(),
            objects = report.objects,
            "Restore data staged"
        );
        Ok(())
    }
}
