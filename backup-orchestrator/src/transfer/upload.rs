//! Upload of a staged snapshot tree as a node backup.
//!
//! Tables are uploaded in directory order, each in backend-sized batches. The
//! manifest is built from what the backend reports back and is written after
//! the schema and token map, so a backup only lists as complete once all of
//! its objects are stored.

use super::progress::{format_bytes, format_duration, TransferProgress};
use crate::filter::ScopeFilter;
use crate::fs::walker::{discover_tables, StagedTable};
use crate::manifest::{Fqtn, Manifest, ManifestObject, ManifestSection, MetaObject, ObjectSize, TokenMap};
use crate::storage::{data_prefix, meta_path, Storage};
use crate::utils::{OrchestratorError, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What to back up and where it goes.
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    pub node: &'a str,
    pub backup: &'a str,
    pub staged_root: &'a Path,
    pub filter: &'a ScopeFilter,
    pub schema: &'a str,
    pub tokenmap: &'a TokenMap,
}

#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub manifest: Manifest,
    pub ignored: BTreeSet<Fqtn>,
    pub objects: usize,
    pub bytes: u64,
}

async fn upload_table(
    storage: &dyn Storage,
    request: &UploadRequest<'_>,
    table: &StagedTable,
    progress: &mut TransferProgress,
) -> Result<ManifestSection> {
    let prefix = storage.path_prefix(&data_prefix(request.node, request.backup, &table.keyspace, &table.columnfamily));
    let mut objects = Vec::with_capacity(table.files.len());

    for batch in table.files.chunks(storage.max_batch_size().max(1)) {
        let uploaded = storage.upload_blobs(batch, &prefix).await?;
        let bytes: u64 = uploaded.iter().map(|blob| blob.size).sum();
        progress.record_batch(uploaded.len(), bytes);
        objects.extend(uploaded.into_iter().map(|blob| ManifestObject {
            path: blob.name,
            size: ObjectSize::Number(blob.size),
            checksum: blob.hash,
        }));
    }

    Ok(ManifestSection {
        keyspace: table.keyspace.clone(),
        columnfamily: table.columnfamily.clone(),
        objects,
    })
}

pub async fn upload_backup(storage: &dyn Storage, request: UploadRequest<'_>) -> Result<UploadReport> {
    let existing = storage.list_node_backups(request.node).await?;
    if existing.iter().any(|b| b.name == request.backup) {
        return Err(OrchestratorError::BackupExists(format!("{}/{}", request.node, request.backup)));
    }

    let root: PathBuf = request.staged_root.to_path_buf();
    let tables = tokio::task::spawn_blocking(move || discover_tables(&root))
        .await
        .map_err(|e| OrchestratorError::Storage(format!("Table discovery task failed: {}", e)))??;

    let mut report = UploadReport::default();
    let (retained, ignored): (Vec<_>, Vec<_>) = tables
        .into_iter()
        .partition(|t| request.filter.retains(&t.keyspace, &t.columnfamily));
    for table in &ignored {
        debug!(keyspace = %table.keyspace, table = %table.columnfamily, "Table not in backup scope");
    }
    report.ignored = ignored
        .iter()
        .map(|t| Fqtn::new(&t.keyspace, crate::manifest::table_name(&t.columnfamily)))
        .collect();

    let total: u64 = retained.iter().map(|t| t.size).sum();
    info!(
        node = %request.node,
        backup = %request.backup,
        tables = retained.len(),
        size = %format_bytes(total),
        "Starting upload"
    );

    let mut progress = TransferProgress::new(total);
    for table in &retained {
        let section = upload_table(storage, &request, table, &mut progress).await?;
        progress.record_table();
        report.manifest.sections.push(section);
    }

    let tokenmap = serde_json::to_string(request.tokenmap)?;
    storage
        .upload_blob_from_string(&meta_path(request.node, request.backup, MetaObject::Schema), request.schema)
        .await?;
    storage
        .upload_blob_from_string(&meta_path(request.node, request.backup, MetaObject::TokenMap), &tokenmap)
        .await?;
    storage
        .upload_blob_from_string(
            &meta_path(request.node, request.backup, MetaObject::Manifest),
            &report.manifest.to_json()?,
        )
        .await?;

    report.objects = progress.transferred_objects;
    report.bytes = progress.transferred_bytes;
    info!(
        objects = report.objects,
        size = %format_bytes(report.bytes),
        elapsed = %format_duration(progress.elapsed()),
        "Upload complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use std::fs;
    use tempfile::TempDir;

    fn stage(root: &Path) {
        for (dir, file, content) in [
            ("shop/orders-5a1c", "nb-1-big-Data.db", "orders"),
            ("shop/orders-5a1c/.orders_idx", "nb-1-big-Data.db", "idx"),
            ("audit/events-7c3e", "nb-1-big-Data.db", "events"),
        ] {
            fs::create_dir_all(root.join(dir)).unwrap();
            fs::write(root.join(dir).join(file), content).unwrap();
        }
    }

    #[tokio::test]
    async fn test_upload_writes_manifest_for_scoped_tables() {
        let staged = TempDir::new().unwrap();
        let bucket = TempDir::new().unwrap();
        stage(staged.path());
        let storage = LocalStorage::new(bucket.path(), None);
        let filter = ScopeFilter::new(["shop"], Vec::<String>::new(), true);
        let tokenmap = TokenMap([("0".to_string(), "node1".to_string())].into());

        let report = upload_backup(
            &storage,
            UploadRequest {
                node: "node1",
                backup: "b1",
                staged_root: staged.path(),
                filter: &filter,
                schema: "CREATE KEYSPACE shop WITH replication = {};",
                tokenmap: &tokenmap,
            },
        )
        .await
        .unwrap();

        assert_eq!(report.objects, 2);
        assert_eq!(report.bytes, 9);
        assert_eq!(report.ignored, BTreeSet::from([Fqtn::from("audit.events")]));

        let stored = storage.read_blob_as_string("node1/b1/meta/manifest.json").await.unwrap();
        let manifest = Manifest::from_json(&stored).unwrap();
        assert_eq!(manifest.sections.len(), 1);
        assert_eq!(manifest.sections[0].columnfamily, "orders-5a1c");
        assert!(manifest.sections[0]
            .objects
            .iter()
            .any(|o| o.path == "node1/b1/data/shop/orders-5a1c/.orders_idx/nb-1-big-Data.db"));
        assert!(storage.get_blob("node1/b1/meta/tokenmap.json").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_existing_backup_name_is_refused() {
        let staged = TempDir::new().unwrap();
        let bucket = TempDir::new().unwrap();
        let storage = LocalStorage::new(bucket.path(), None);
        storage.upload_blob_from_string("node1/b1/meta/manifest.json", "[]").await.unwrap();

        let result = upload_backup(
            &storage,
            UploadRequest {
                node: "node1",
                backup: "b1",
                staged_root: staged.path(),
                filter: &ScopeFilter::default(),
                schema: "",
                tokenmap: &TokenMap::default(),
            },
        )
        .await;
        assert!(matches!(result, Err(OrchestratorError::BackupExists(_))));
    }
}
