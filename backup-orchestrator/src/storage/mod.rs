//! Object storage abstraction.
//!
//! The orchestrator only talks to storage through [`Storage`]. Keys are
//! relative to the configured bucket/base path and use `/` separators:
//!
//! ```text
//! <node>/<backup>/meta/manifest.json
//! <node>/<backup>/meta/schema.cql
//! <node>/<backup>/meta/tokenmap.json
//! <node>/<backup>/data/<keyspace>/<columnfamily>/<file>
//! index/...
//! ```

pub mod local;

use crate::manifest::MetaObject;
use crate::utils::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub use local::LocalStorage;

/// Top-level namespace entry reserved for the secondary backup catalog.
pub const INDEX_SEGMENT: &str = "index";

/// Supported backends. Each caps how many objects one transfer call may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Local,
    S3,
    Gcs,
    Azure,
}

impl StorageProvider {
    pub fn max_batch_size(&self) -> usize {
        match self {
            StorageProvider::Local => 1000,
            StorageProvider::S3 => 1000,
            StorageProvider::Gcs => 100,
            StorageProvider::Azure => 256,
        }
    }
}

impl fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageProvider::Local => "local",
            StorageProvider::S3 => "s3",
            StorageProvider::Gcs => "gcs",
            StorageProvider::Azure => "azure",
        };
        f.write_str(name)
    }
}

/// A stored object, or a top-level "directory" entry (name ending in `/`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub name: String,
    pub size: u64,
    pub hash: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One backup of one node, as found in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBackup {
    pub node: String,
    pub name: String,
    /// Completion time; `None` while the manifest has not been written.
    pub finished: Option<DateTime<Utc>>,
}

impl NodeBackup {
    pub fn is_complete(&self) -> bool {
        self.finished.is_some()
    }

    pub fn meta_path(&self, object: MetaObject) -> String {
        meta_path(&self.node, &self.name, object)
    }
}

pub fn backup_prefix(node: &str, backup: &str) -> String {
    format!("{}/{}", node, backup)
}

pub fn meta_path(node: &str, backup: &str, object: MetaObject) -> String {
    format!("{}/meta/{}", backup_prefix(node, backup), object.file_name())
}

pub fn data_prefix(node: &str, backup: &str, keyspace: &str, columnfamily: &str) -> String {
    format!("{}/data/{}/{}", backup_prefix(node, backup), keyspace, columnfamily)
}

/// Name of the object's parent directory when that directory is hidden
/// (secondary index files live in `.<index>` below the table directory).
pub fn hidden_parent(path: &str) -> Option<&str> {
    let mut segments = path.rsplit('/');
    segments.next()?;
    segments.next().filter(|parent| parent.starts_with('.'))
}

/// Where a downloaded object lands below `destination`.
pub fn download_target(path: &str, destination: &Path) -> PathBuf {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match hidden_parent(path) {
        Some(parent) => destination.join(parent).join(file_name),
        None => destination.join(file_name),
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    fn provider(&self) -> StorageProvider;

    /// Maximum number of objects a single transfer call may carry.
    fn max_batch_size(&self) -> usize {
        self.provider().max_batch_size()
    }

    /// Key prefix under which data for `data_root` is stored.
    fn path_prefix(&self, data_root: &str) -> String {
        format!("{}/", data_root.trim_end_matches('/'))
    }

    /// Entries directly below the storage root.
    async fn list_root_blobs(&self) -> Result<Vec<BlobRef>>;

    async fn list_node_backups(&self, node: &str) -> Result<Vec<NodeBackup>>;

    /// Size and modification time of one object, `None` if absent. `hash` is
    /// left empty by backends that would have to read the content to produce it.
    async fn get_blob(&self, path: &str) -> Result<Option<BlobRef>>;

    async fn read_blob_as_string(&self, path: &str) -> Result<String>;

    /// Fetch every object in `paths` into `destination` (see [`download_target`]).
    async fn download_blobs(&self, paths: &[String], destination: &Path) -> Result<()>;

    /// Store every file in `sources` below `dest_prefix`, keeping a hidden
    /// parent directory in the key.
    async fn upload_blobs(&self, sources: &[PathBuf], dest_prefix: &str) -> Result<Vec<BlobRef>>;

    async fn upload_blob_from_string(&self, path: &str, content: &str) -> Result<BlobRef>;

    /// Delete the given objects, returning how many existed. Missing objects
    /// are not an error.
    async fn delete_objects(&self, paths: &[String]) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_limits_differ_per_backend() {
        assert_eq!(StorageProvider::S3.max_batch_size(), 1000);
        assert_eq!(StorageProvider::Gcs.max_batch_size(), 100);
        assert_eq!(StorageProvider::Azure.max_batch_size(), 256);
    }

    #[test]
    fn test_layout() {
        assert_eq!(meta_path("node1", "b1", MetaObject::Manifest), "node1/b1/meta/manifest.json");
        assert_eq!(data_prefix("node1", "b1", "ks", "t-1"), "node1/b1/data/ks/t-1");
    }

    #[test]
    fn test_hidden_parent() {
        assert_eq!(hidden_parent("n/b/data/ks/t-1/.t_idx/nb-1-big-Data.db"), Some(".t_idx"));
        assert_eq!(hidden_parent("n/b/data/ks/t-1/nb-1-big-Data.db"), None);
        assert_eq!(hidden_parent("file"), None);
    }

    #[test]
    fn test_download_target() {
        let dest = Path::new("/restore/ks/t-1");
        assert_eq!(
            download_target("n/b/data/ks/t-1/.t_idx/nb-1-big-Data.db", dest),
            PathBuf::from("/restore/ks/t-1/.t_idx/nb-1-big-Data.db")
        );
        assert_eq!(
            download_target("n/b/data/ks/t-1/nb-1-big-Data.db", dest),
            PathBuf::from("/restore/ks/t-1/nb-1-big-Data.db")
        );
    }
}
