//! Discovery of table files in a staged snapshot tree.
//!
//! A staged tree is laid out the way the database stores data on disk:
//! `<root>/<keyspace>/<columnfamily>/<file>`, with secondary index files in
//! hidden directories one level further down (`<columnfamily>/.<index>/<file>`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// The files of one table found under a staged root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedTable {
    pub keyspace: String,
    pub columnfamily: String,
    /// Files in walk order (sorted by name within each directory).
    pub files: Vec<PathBuf>,
    pub size: u64,
}

fn name_of(entry: &DirEntry) -> String {
    entry.file_name().to_string_lossy().to_string()
}

/// Keyspace and column family of a file at depth 3 or 4 below the root, or
/// `None` when the file is not part of a table.
fn table_of(entry: &DirEntry, root: &Path) -> Option<(String, String)> {
    let relative = entry.path().strip_prefix(root).ok()?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();

    match segments.as_slice() {
        [keyspace, columnfamily, _file] => Some((keyspace.clone(), columnfamily.clone())),
        [keyspace, columnfamily, hidden, _file] if hidden.starts_with('.') => {
            Some((keyspace.clone(), columnfamily.clone()))
        }
        _ => None,
    }
    .filter(|(keyspace, _)| !keyspace.starts_with('.'))
}

/// Walk `root` and group regular files per table, ordered by keyspace then table.
pub fn discover_tables(root: &Path) -> std::io::Result<Vec<StagedTable>> {
    let mut tables: BTreeMap<(String, String), StagedTable> = BTreeMap::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(3)
        .max_depth(4)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some((keyspace, columnfamily)) = table_of(&entry, root) else {
            tracing::debug!(path = %entry.path().display(), "Ignoring file outside a table directory");
            continue;
        };
        let size = entry.metadata()?.len();
        let table = tables
            .entry((keyspace.clone(), columnfamily.clone()))
            .or_insert_with(|| StagedTable {
                keyspace,
                columnfamily,
                files: Vec::new(),
                size: 0,
            });
        table.files.push(entry.path().to_path_buf());
        table.size += size;
    }

    Ok(tables.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_root() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        assert!(discover_tables(temp_dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_groups_files_per_table() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let orders = temp_dir.path().join("shop/orders-5a1c");
        let customers = temp_dir.path().join("shop/customers-6b2d");
        fs::create_dir_all(orders.join(".orders_customer_idx"))?;
        fs::create_dir_all(&customers)?;

        fs::write(orders.join("nb-1-big-Data.db"), b"12345")?;
        fs::write(orders.join("nb-1-big-TOC.txt"), b"12")?;
        fs::write(orders.join(".orders_customer_idx/nb-1-big-Data.db"), b"1")?;
        fs::write(customers.join("nb-1-big-Data.db"), b"1234567")?;

        let tables = discover_tables(temp_dir.path())?;
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].columnfamily, "customers-6b2d");
        assert_eq!(tables[0].size, 7);
        assert_eq!(tables[1].columnfamily, "orders-5a1c");
        assert_eq!(tables[1].files.len(), 3);
        assert_eq!(tables[1].size, 8);
        Ok(())
    }

    #[test]
    fn test_skips_non_table_files() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join("shop/orders-5a1c/snapshots/tag"))?;
        fs::write(temp_dir.path().join("stray.txt"), b"x")?;
        fs::write(temp_dir.path().join("shop/keyspace.txt"), b"x")?;
        fs::write(temp_dir.path().join("shop/orders-5a1c/snapshots/tag/nb-1-big-Data.db"), b"x")?;

        assert!(discover_tables(temp_dir.path())?.is_empty());
        Ok(())
    }
}
