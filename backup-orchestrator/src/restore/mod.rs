//! Restore source resolution and node restore.

pub mod select;
pub mod topology;

pub use select::{restore_node, select_backup, DownloadRestorer, NodeRestorer, RestoreOutcome};
pub use topology::{resolve, ResolvedSource, RestoreMapping};
