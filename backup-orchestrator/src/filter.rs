//! Table scope selection for restore and upload.
//!
//! Retained tables are reported by their id-qualified name so the transfer
//! planner can match manifest sections exactly. Ignored tables are reported
//! by their plain name, for operators.

use crate::manifest::{is_system_keyspace, table_name, Fqtn, FqtnWithId, Manifest};
use std::collections::{BTreeSet, HashSet};

/// Keep-lists deciding which tables take part in an operation.
#[derive(Debug, Clone, Default)]
pub struct ScopeFilter {
    pub keep_keyspaces: HashSet<String>,
    pub keep_tables: HashSet<Fqtn>,
    pub ignore_system_keyspaces: bool,
}

/// Outcome of applying a [`ScopeFilter`] to a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub retained: HashSet<FqtnWithId>,
    pub ignored: BTreeSet<Fqtn>,
}

impl ScopeFilter {
    pub fn new<K, T>(keep_keyspaces: K, keep_tables: T, ignore_system_keyspaces: bool) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            keep_keyspaces: keep_keyspaces.into_iter().map(Into::into).collect(),
            keep_tables: keep_tables
                .into_iter()
                .map(|t| Fqtn::from(t.into().as_str()))
                .collect(),
            ignore_system_keyspaces,
        }
    }

    /// Whether the table stored under `keyspace/columnfamily` is in scope.
    pub fn retains(&self, keyspace: &str, columnfamily: &str) -> bool {
        if self.keep_keyspaces.is_empty() && self.keep_tables.is_empty() {
            return true;
        }
        if self.keep_keyspaces.contains(keyspace)
            || (!self.ignore_system_keyspaces && is_system_keyspace(keyspace))
        {
            return true;
        }
        self.keep_tables.contains(&Fqtn::new(keyspace, table_name(columnfamily)))
    }

    pub fn apply(&self, manifest: &Manifest) -> Scope {
        let mut scope = Scope::default();
        for section in &manifest.sections {
            if self.retains(&section.keyspace, &section.columnfamily) {
                scope.retained.insert(section.fqtn_with_id());
            } else {
                scope.ignored.insert(section.fqtn());
            }
        }
        scope
    }
}

/// Partition every table of `manifest` into retained and ignored sets.
pub fn filter(
    keep_keyspaces: &HashSet<String>,
    keep_tables: &HashSet<Fqtn>,
    manifest: &Manifest,
    ignore_system_keyspaces: bool,
) -> Scope {
    ScopeFilter {
        keep_keyspaces: keep_keyspaces.clone(),
        keep_tables: keep_tables.clone(),
        ignore_system_keyspaces,
    }
    .apply(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestSection;

    fn manifest() -> Manifest {
        let section = |keyspace: &str, columnfamily: &str| ManifestSection {
            keyspace: keyspace.to_string(),
            columnfamily: columnfamily.to_string(),
            objects: Vec::new(),
        };
        Manifest {
            sections: vec![
                section("system", "local-7ad54392bcdd35a684174e047860b377"),
                section("system_schema", "tables-afddfb9dbc1e30688056eed6c302ba09"),
                section("shop", "orders-5a1c395e2b5e11ea"),
                section("shop", "customers-6b2d406f3c6f22fb"),
                section("audit", "events-7c3e517a4d7a33ac"),
            ],
        }
    }

    #[test]
    fn test_empty_keep_lists_retain_everything() {
        let scope = ScopeFilter::new(Vec::<String>::new(), Vec::<String>::new(), false).apply(&manifest());
        assert_eq!(scope.retained.len(), 5);
        assert!(scope.retained.contains(&FqtnWithId::from("system.local-7ad54392bcdd35a684174e047860b377")));
        assert!(scope.ignored.is_empty());
    }

    #[test]
    fn test_keep_keyspace_also_keeps_system_keyspaces() {
        let scope = ScopeFilter::new(["shop"], Vec::<String>::new(), false).apply(&manifest());
        assert_eq!(scope.retained.len(), 4);
        assert!(scope.retained.contains(&FqtnWithId::from("shop.orders-5a1c395e2b5e11ea")));
        assert_eq!(scope.ignored, BTreeSet::from([Fqtn::from("audit.events")]));
    }

    #[test]
    fn test_ignore_system_keyspaces() {
        let scope = ScopeFilter::new(["shop"], Vec::<String>::new(), true).apply(&manifest());
        assert_eq!(scope.retained.len(), 2);
        assert!(scope.ignored.contains(&Fqtn::from("system.local")));
        assert!(scope.ignored.contains(&Fqtn::from("system_schema.tables")));
    }

    #[test]
    fn test_keep_single_table() {
        let scope = ScopeFilter::new(Vec::<String>::new(), ["shop.customers"], true).apply(&manifest());
        let retained: Vec<&str> = scope.retained.iter().map(FqtnWithId::as_str).collect();
        assert_eq!(retained, vec!["shop.customers-6b2d406f3c6f22fb"]);
        assert!(scope.ignored.contains(&Fqtn::from("shop.orders")));
    }

    #[test]
    fn test_free_function_matches_filter_struct() {
        let keep_keyspaces = HashSet::from(["audit".to_string()]);
        let keep_tables = HashSet::new();
        let scope = filter(&keep_keyspaces, &keep_tables, &manifest(), true);
        assert_eq!(scope.retained, HashSet::from([FqtnWithId::from("audit.events-7c3e517a4d7a33ac")]));
        assert_eq!(scope.ignored.len(), 4);
    }
}
