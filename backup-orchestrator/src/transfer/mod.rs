//! Object transfer between storage and the local filesystem.

pub mod download;
pub mod progress;
pub mod upload;

pub use download::{download_backup, download_manifest, plan_download, DownloadPlan, DownloadReport};
pub use upload::{upload_backup, UploadReport, UploadRequest};
