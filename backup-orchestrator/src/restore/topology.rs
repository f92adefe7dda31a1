//! Mapping of restore destinations onto the nodes whose backups they restore.
//!
//! The mapping document is supplied per restore run, usually through an
//! environment variable:
//!
//! ```json
//! {"in_place": false,
//!  "host_map": {"node-a": {"source": ["old-node-1"], "seed": true},
//!               "node-b": {"source": "old-node-2", "seed": false}}}
//! ```
//!
//! Resolution returns the source node explicitly; callers pass it on to the
//! transfer code instead of reading it back from process state.

use crate::utils::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// `source` may be written as one node or as a list of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceNodes {
    One(String),
    Many(Vec<String>),
}

impl SourceNodes {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            SourceNodes::One(node) => vec![node.clone()],
            SourceNodes::Many(nodes) => nodes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMapping {
    pub source: SourceNodes,
    #[serde(default)]
    pub seed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreMapping {
    pub in_place: bool,
    #[serde(default)]
    pub host_map: BTreeMap<String, HostMapping>,
}

impl RestoreMapping {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| OrchestratorError::InvalidMapping(e.to_string()))
    }

    /// Read the mapping from environment variable `var`; an unset or empty
    /// variable means no mapping was supplied.
    pub fn from_env(var: &str) -> Result<Option<Self>> {
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Self::from_json(&value).map(Some),
            _ => Ok(None),
        }
    }

    /// Destination nodes flagged as seeds, for bootstrap ordering.
    pub fn seeds(&self) -> Vec<&str> {
        self.host_map
            .iter()
            .filter(|(_, mapping)| mapping.seed)
            .map(|(node, _)| node.as_str())
            .collect()
    }
}

/// Where this node's restore data comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    /// The backup was taken on this node; data stays where it is.
    InPlace { source: String, seed: bool },
    /// The backup of another node is copied over.
    Remote { source: String, seed: bool },
    /// The mapping does not mention this node.
    Undetermined,
}

impl ResolvedSource {
    pub fn is_in_place(&self) -> bool {
        matches!(self, ResolvedSource::InPlace { .. })
    }

    pub fn source(&self) -> Option<&str> {
        match self {
            ResolvedSource::InPlace { source, .. } | ResolvedSource::Remote { source, .. } => Some(source.as_str()),
            ResolvedSource::Undetermined => None,
        }
    }

    /// Address downstream transfers must pull from; only set for cross-node restores.
    pub fn remote_source(&self) -> Option<&str> {
        match self {
            ResolvedSource::Remote { source, .. } => Some(source.as_str()),
            _ => None,
        }
    }

    pub fn seed(&self) -> bool {
        match self {
            ResolvedSource::InPlace { seed, .. } | ResolvedSource::Remote { seed, .. } => *seed,
            ResolvedSource::Undetermined => false,
        }
    }
}

/// Resolve the restore source for `own_identity`.
pub fn resolve(own_identity: &str, mapping: Option<&RestoreMapping>) -> Result<ResolvedSource> {
    let Some(mapping) = mapping else {
        return Ok(ResolvedSource::InPlace {
            source: own_identity.to_string(),
            seed: false,
        });
    };

    let Some(host) = mapping.host_map.get(own_identity) else {
        return Ok(ResolvedSource::Undetermined);
    };

    if mapping.in_place {
        return Ok(ResolvedSource::InPlace {
            source: own_identity.to_string(),
            seed: host.seed,
        });
    }

    let sources = host.source.to_vec();
    let Some(source) = sources.first() else {
        return Err(OrchestratorError::InvalidMapping(format!(
            "empty source list for {}",
            own_identity
        )));
    };
    if sources.len() > 1 {
        debug!(node = %own_identity, sources = ?sources, "Several sources mapped, restoring from the first");
    }
    Ok(ResolvedSource::Remote {
        source: source.to_string(),
        seed: host.seed,
    })
}
