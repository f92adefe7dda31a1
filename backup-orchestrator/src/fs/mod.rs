//! Local filesystem helpers.

pub mod space;
pub mod walker;

pub use space::{check_available_space, ensure_directory, FilesystemSpace, FreeSpace};
