//! Filesystem-backed storage, for NFS/local targets.
//!
//! Object keys map to paths below `<base_path>/<prefix>`. Content hashes are
//! SHA-256 hex digests.

use super::{download_target, hidden_parent, BlobRef, NodeBackup, Storage, StorageProvider};
use crate::manifest::MetaObject;
use crate::utils::{OrchestratorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::debug;

const HASH_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>, prefix: Option<&str>) -> Self {
        let base_path = base_path.into();
        let root = match prefix.filter(|p| !p.is_empty()) {
            Some(prefix) => base_path.join(prefix.trim_matches('/')),
            None => base_path,
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }

    /// Blob reference with the SHA-256 of the content, read in fixed-size chunks.
    async fn hashed_blob_ref(&self, key: &str, path: &Path) -> Result<BlobRef> {
        let mut file = tokio::fs::File::open(path).await?;
        let metadata = file.metadata().await?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(BlobRef {
            name: key.to_string(),
            size: metadata.len(),
            hash: hex::encode(hasher.finalize()),
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    /// Remove directories left empty by a delete, walking up towards the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if tokio::fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

fn storage_error(context: &str, path: &Path, err: std::io::Error) -> OrchestratorError {
    OrchestratorError::Storage(format!("{} {}: {}", context, path.display(), err))
}

#[async_trait]
impl Storage for LocalStorage {
    fn provider(&self) -> StorageProvider {
        StorageProvider::Local
    }

    async fn list_root_blobs(&self) -> Result<Vec<BlobRef>> {
        let mut blobs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(blobs),
            Err(e) => return Err(storage_error("Failed to list", &self.root, e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            let mut name = entry.file_name().to_string_lossy().to_string();
            if metadata.is_dir() {
                name.push('/');
            }
            blobs.push(BlobRef {
                name,
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                hash: String::new(),
                last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        blobs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(blobs)
    }

    async fn list_node_backups(&self, node: &str) -> Result<Vec<NodeBackup>> {
        let node_dir = self.object_path(node);
        let mut backups = Vec::new();
        let mut entries = match tokio::fs::read_dir(&node_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(backups),
            Err(e) => return Err(storage_error("Failed to list", &node_dir, e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let manifest = self.object_path(&super::meta_path(node, &name, MetaObject::Manifest));
            let finished = match tokio::fs::metadata(&manifest).await {
                Ok(metadata) => metadata.modified().ok().map(DateTime::<Utc>::from),
                Err(_) => None,
            };
            backups.push(NodeBackup {
                node: node.to_string(),
                name,
                finished,
            });
        }

        backups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(backups)
    }

    async fn get_blob(&self, path: &str) -> Result<Option<BlobRef>> {
        let object = self.object_path(path);
        match tokio::fs::metadata(&object).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(BlobRef {
                name: path.to_string(),
                size: metadata.len(),
                hash: String::new(),
                last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("Failed to stat", &object, e)),
        }
    }

    async fn read_blob_as_string(&self, path: &str) -> Result<String> {
        let object = self.object_path(path);
        tokio::fs::read_to_string(&object)
            .await
            .map_err(|e| storage_error("Failed to read", &object, e))
    }

    async fn download_blobs(&self, paths: &[String], destination: &Path) -> Result<()> {
        for path in paths {
            let source = self.object_path(path);
            let target = download_target(path, destination);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&source, &target)
                .await
                .map_err(|e| storage_error("Failed to download", &source, e))?;
        }
        debug!(objects = paths.len(), destination = %destination.display(), "Downloaded batch");
        Ok(())
    }

    async fn upload_blobs(&self, sources: &[PathBuf], dest_prefix: &str) -> Result<Vec<BlobRef>> {
        let mut uploaded = Vec::with_capacity(sources.len());
        for source in sources {
            let file_name = source
                .file_name()
                .ok_or_else(|| OrchestratorError::Storage(format!("Not a file: {}", source.display())))?
                .to_string_lossy()
                .to_string();
            let source_key = source.to_string_lossy().replace('\\', "/");
            let key = match hidden_parent(&source_key) {
                Some(parent) => format!("{}/{}/{}", dest_prefix.trim_end_matches('/'), parent, file_name),
                None => format!("{}/{}", dest_prefix.trim_end_matches('/'), file_name),
            };
            let target = self.object_path(&key);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(source, &target)
                .await
                .map_err(|e| storage_error("Failed to upload", source, e))?;
            uploaded.push(self.hashed_blob_ref(&key, &target).await?);
        }
        Ok(uploaded)
    }

    async fn upload_blob_from_string(&self, path: &str, content: &str) -> Result<BlobRef> {
        let target = self.object_path(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| storage_error("Failed to write", &target, e))?;
        self.hashed_blob_ref(path, &target).await
    }

    async fn delete_objects(&self, paths: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for path in paths {
            let object = self.object_path(path);
            match tokio::fs::remove_file(&object).await {
                Ok(()) => {
                    deleted += 1;
                    self.prune_empty_parents(&object).await;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(object = %path, "Object already absent");
                }
                Err(e) => return Err(storage_error("Failed to delete", &object, e)),
            }
        }
        Ok(deleted)
    }
}
