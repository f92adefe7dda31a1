//! Backup manifest and table identity types.
//!
//! A manifest lists, per table as it was backed up, every object stored for
//! that table. It is written once at backup completion and never modified.
//!
//! Tables carry two identities. [`Fqtn`] (`keyspace.table`) survives a table
//! being dropped and recreated and is what scope decisions are made on.
//! [`FqtnWithId`] (`keyspace.table-<id>`) names one incarnation of a table and
//! is what manifest lookups are keyed on.

use crate::utils::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// Keyspaces managed by the database itself.
pub const SYSTEM_KEYSPACES: [&str; 4] = ["system", "system_auth", "system_distributed", "system_schema"];

/// Returns the table name of a `<table_name>-<table_id>` column family directory.
pub fn table_name(columnfamily: &str) -> &str {
    columnfamily.split('-').next().unwrap_or(columnfamily)
}

pub fn is_system_keyspace(keyspace: &str) -> bool {
    SYSTEM_KEYSPACES.contains(&keyspace)
}

/// `keyspace.table`, stable across table recreation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fqtn(String);

impl Fqtn {
    pub fn new(keyspace: &str, table: &str) -> Self {
        Self(format!("{}.{}", keyspace, table))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Fqtn {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Fqtn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `keyspace.table-<id>`, naming a single incarnation of a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FqtnWithId(String);

impl FqtnWithId {
    pub fn new(keyspace: &str, columnfamily: &str) -> Self {
        Self(format!("{}.{}", keyspace, columnfamily))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FqtnWithId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for FqtnWithId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Object size as written by the various backends: either a JSON number or a
/// numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectSize {
    Number(u64),
    Text(String),
}

impl ObjectSize {
    pub fn bytes(&self) -> Result<u64> {
        match self {
            ObjectSize::Number(n) => Ok(*n),
            ObjectSize::Text(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| OrchestratorError::InvalidSize(s.clone())),
        }
    }
}

impl From<u64> for ObjectSize {
    fn from(value: u64) -> Self {
        ObjectSize::Number(value)
    }
}

/// One physical file of a backed-up table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestObject {
    pub path: String,
    pub size: ObjectSize,
    #[serde(rename = "MD5", default)]
    pub checksum: String,
}

/// `total + size`, rejecting totals that do not fit in a `u64`.
pub fn add_size(total: u64, size: u64) -> Result<u64> {
    total
        .checked_add(size)
        .ok_or_else(|| OrchestratorError::InvalidSize(format!("total of {} + {} bytes overflows", total, size)))
}

/// Sum of the sizes of `objects`.
pub fn objects_size(objects: &[ManifestObject]) -> Result<u64> {
    objects.iter().try_fold(0u64, |total, object| add_size(total, object.size.bytes()?))
}

/// All objects of one table as backed up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSection {
    pub keyspace: String,
    pub columnfamily: String,
    #[serde(default)]
    pub objects: Vec<ManifestObject>,
}

impl ManifestSection {
    pub fn table(&self) -> &str {
        table_name(&self.columnfamily)
    }

    pub fn fqtn(&self) -> Fqtn {
        Fqtn::new(&self.keyspace, self.table())
    }

    pub fn fqtn_with_id(&self) -> FqtnWithId {
        FqtnWithId::new(&self.keyspace, &self.columnfamily)
    }

    pub fn size(&self) -> Result<u64> {
        objects_size(&self.objects)
    }
}

/// Ordered list of table sections; serialized as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    pub sections: Vec<ManifestSection>,
}

impl Manifest {
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn object_count(&self) -> usize {
        self.sections.iter().map(|s| s.objects.len()).sum()
    }

    /// Total bytes of every section whose id-qualified name is in `scope`.
    pub fn size_in_scope(&self, scope: &HashSet<FqtnWithId>) -> Result<u64> {
        self.sections
            .iter()
            .filter(|section| scope.contains(&section.fqtn_with_id()))
            .try_fold(0u64, |total, section| add_size(total, section.size()?))
    }

    pub fn total_size(&self) -> Result<u64> {
        self.sections.iter().try_fold(0u64, |total, section| add_size(total, section.size()?))
    }
}

/// Token ownership map: token -> owning node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenMap(pub BTreeMap<String, String>);

impl TokenMap {
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn nodes(&self) -> BTreeSet<String> {
        self.0.values().cloned().collect()
    }
}

/// The three metadata objects every backup owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaObject {
    Manifest,
    Schema,
    TokenMap,
}

impl MetaObject {
    pub const ALL: [MetaObject; 3] = [MetaObject::Manifest, MetaObject::Schema, MetaObject::TokenMap];

    pub fn file_name(&self) -> &'static str {
        match self {
            MetaObject::Manifest => "manifest.json",
            MetaObject::Schema => "schema.cql",
            MetaObject::TokenMap => "tokenmap.json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"[
        {"keyspace": "ks1", "columnfamily": "tableA-0b8d2d10b7a311e9",
         "objects": [
            {"path": "node1/b1/data/ks1/tableA-0b8d2d10b7a311e9/nb-1-big-Data.db", "size": 100, "MD5": "a"},
            {"path": "node1/b1/data/ks1/tableA-0b8d2d10b7a311e9/nb-1-big-Index.db", "size": 101, "MD5": "b"},
            {"path": "node1/b1/data/ks1/tableA-0b8d2d10b7a311e9/nb-1-big-TOC.txt", "size": 100, "MD5": "c"}
         ]},
        {"keyspace": "ks1", "columnfamily": "tableB-1c2d3e4f",
         "objects": [
            {"path": "node1/b1/data/ks1/tableB-1c2d3e4f/nb-1-big-Data.db", "size": "100", "MD5": "d"},
            {"path": "node1/b1/data/ks1/tableB-1c2d3e4f/nb-1-big-Index.db", "size": "123000", "MD5": "e"}
         ]}
    ]"#;

    #[test]
    fn test_mixed_size_representations_sum_exactly() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        assert_eq!(manifest.total_size().unwrap(), 123401);
        assert_eq!(manifest.object_count(), 5);
    }

    #[test]
    fn test_size_in_scope_only_counts_scoped_sections() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        let scope: HashSet<FqtnWithId> = [FqtnWithId::from("ks1.tableB-1c2d3e4f")].into();
        assert_eq!(manifest.size_in_scope(&scope).unwrap(), 123100);
    }

    #[test]
    fn test_overflowing_total_is_rejected() {
        let manifest = Manifest::from_json(
            r#"[{"keyspace": "ks1", "columnfamily": "t-1", "objects": [
                {"path": "a", "size": "18446744073709551615", "MD5": ""},
                {"path": "b", "size": 1, "MD5": ""}
            ]}]"#,
        )
        .unwrap();
        assert!(matches!(manifest.total_size(), Err(OrchestratorError::InvalidSize(_))));
    }

    #[test]
    fn test_non_numeric_size_is_rejected() {
        let size = ObjectSize::Text("12kb".to_string());
        assert!(matches!(size.bytes(), Err(OrchestratorError::InvalidSize(_))));
    }

    #[test]
    fn test_table_identity() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        let section = &manifest.sections[0];
        assert_eq!(section.table(), "tableA");
        assert_eq!(section.fqtn().as_str(), "ks1.tableA");
        assert_eq!(section.fqtn_with_id().as_str(), "ks1.tableA-0b8d2d10b7a311e9");
    }

    #[test]
    fn test_manifest_serializes_as_array_with_md5_key() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        let json = manifest.to_json().unwrap();
        assert!(json.starts_with('['));
        assert!(json.contains("\"MD5\":\"a\""));
        assert!(json.contains("\"size\":\"123000\""));
    }

    #[test]
    fn test_tokenmap_nodes() {
        let tokenmap = TokenMap::from_json(r#"{"-9000": "node1", "0": "node3", "9000": "node1"}"#).unwrap();
        let nodes: Vec<String> = tokenmap.nodes().into_iter().collect();
        assert_eq!(nodes, vec!["node1".to_string(), "node3".to_string()]);
    }
}
