//! Best-effort parser turning a CQL schema dump into a per-keyspace catalog.
//!
//! The dump is split on `;`, each statement is collapsed onto a single line and
//! classified by its leading `CREATE <KIND> <name>[.<name>]`. Statements that
//! do not match, or that name a keyspace not declared earlier in the dump, are
//! dropped without error.
//!
//! Materialized views also satisfy the generic pattern. Any statement whose
//! text contains `CREATE MATERIALIZED VIEW` is therefore filed as a view, keyed
//! by the second identifier, whichever kind the pattern matched.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static CREATE_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^CREATE (TABLE|KEYSPACE|CUSTOM INDEX|INDEX|MATERIALIZED VIEW|TYPE|AGGREGATE) (?:IF NOT EXISTS )?("?[\w]+"?)(?:\.("?[\w]+"?))?"#,
    )
    .expect("schema statement pattern is valid")
});

const MATERIALIZED_VIEW_MARKER: &str = "CREATE MATERIALIZED VIEW";

/// Every object declared under one keyspace, as raw `CREATE` statements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyspaceSchema {
    pub create_statement: String,
    pub tables: BTreeMap<String, String>,
    pub indices: BTreeMap<String, String>,
    pub materialized_views: BTreeMap<String, String>,
    pub user_types: BTreeMap<String, String>,
    pub user_aggregates: BTreeMap<String, String>,
}

/// Keyspace name -> declared objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SchemaCatalog {
    pub keyspaces: BTreeMap<String, KeyspaceSchema>,
}

impl SchemaCatalog {
    pub fn keyspace(&self, name: &str) -> Option<&KeyspaceSchema> {
        self.keyspaces.get(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Keyspace,
    Table,
    Index,
    MaterializedView,
    Type,
    Aggregate,
}

impl Kind {
    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_uppercase().as_str() {
            "KEYSPACE" => Some(Kind::Keyspace),
            "TABLE" => Some(Kind::Table),
            "INDEX" | "CUSTOM INDEX" => Some(Kind::Index),
            "MATERIALIZED VIEW" => Some(Kind::MaterializedView),
            "TYPE" => Some(Kind::Type),
            "AGGREGATE" => Some(Kind::Aggregate),
            _ => None,
        }
    }
}

/// A matched statement, before keyspace resolution.
struct Declaration<'a> {
    kind: Kind,
    first: String,
    second: Option<String>,
    text: &'a str,
}

fn unquote(identifier: &str) -> String {
    identifier.trim_matches('"').to_string()
}

fn classify(statement: &str) -> Option<Declaration<'_>> {
    let captures = CREATE_STATEMENT.captures(statement)?;
    let matched = Kind::from_keyword(captures.get(1)?.as_str())?;
    let kind = if statement.contains(MATERIALIZED_VIEW_MARKER) {
        Kind::MaterializedView
    } else {
        matched
    };
    Some(Declaration {
        kind,
        first: unquote(captures.get(2)?.as_str()),
        second: captures.get(3).map(|m| unquote(m.as_str())),
        text: statement,
    })
}

/// Split a dump into one-line statements, dropping blank lines.
fn statements(schema: &str) -> Vec<String> {
    schema
        .split(';')
        .map(|raw| {
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|statement| !statement.is_empty())
        .map(|statement| format!("{};", statement))
        .collect()
}

/// Fold accumulator: the catalog so far and the keyspace most recently declared.
#[derive(Default)]
struct ParseState {
    catalog: SchemaCatalog,
    current_keyspace: Option<String>,
}

impl ParseState {
    fn apply(mut self, declaration: Declaration<'_>) -> Self {
        let text = declaration.text.to_string();

        if declaration.kind == Kind::Keyspace {
            let keyspace = KeyspaceSchema {
                create_statement: text,
                ..KeyspaceSchema::default()
            };
            self.catalog.keyspaces.insert(declaration.first.clone(), keyspace);
            self.current_keyspace = Some(declaration.first);
            return self;
        }

        // Index names are never keyspace-qualified in a dump; everything else
        // is `keyspace.name`, or a bare name under the current keyspace.
        let (keyspace, name) = match (declaration.kind, declaration.second) {
            (Kind::Index, _) => (self.current_keyspace.clone(), declaration.first),
            (_, Some(second)) => (Some(declaration.first), second),
            (_, None) => (self.current_keyspace.clone(), declaration.first),
        };

        let Some(keyspace) = keyspace.filter(|ks| self.catalog.keyspaces.contains_key(ks)) else {
            tracing::debug!(statement = %text, "Skipping statement for undeclared keyspace");
            return self;
        };
        let record = self.catalog.keyspaces.entry(keyspace).or_default();

        let target = match declaration.kind {
            Kind::Table => &mut record.tables,
            Kind::Index => &mut record.indices,
            Kind::MaterializedView => &mut record.materialized_views,
            Kind::Type => &mut record.user_types,
            Kind::Aggregate => &mut record.user_aggregates,
            Kind::Keyspace => unreachable!("keyspaces are handled above"),
        };
        target.insert(name, text);
        self
    }
}

/// Parse a schema dump. Never fails: unrecognised statements are skipped.
pub fn parse(schema: &str) -> SchemaCatalog {
    statements(schema)
        .iter()
        .filter_map(|statement| classify(statement))
        .fold(ParseState::default(), ParseState::apply)
        .catalog
}
