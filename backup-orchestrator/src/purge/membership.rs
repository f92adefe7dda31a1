//! Live cluster membership.

use crate::manifest::TokenMap;
use crate::utils::{OrchestratorError, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Source of the cluster's current token ownership.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    async fn token_map(&self) -> Result<TokenMap>;

    /// Nodes currently owning at least one token.
    async fn live_nodes(&self) -> Result<BTreeSet<String>> {
        Ok(self.token_map().await?.nodes())
    }
}

/// Token map exported from the cluster as JSON (`{"<token>": "<node>", ...}`).
#[derive(Debug, Clone)]
pub struct TokenMapFile {
    path: PathBuf,
}

impl TokenMapFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MembershipSource for TokenMapFile {
    async fn token_map(&self) -> Result<TokenMap> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            OrchestratorError::Membership(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        let tokenmap = TokenMap::from_json(&content)?;
        if tokenmap.0.is_empty() {
            return Err(OrchestratorError::Membership(format!(
                "Token map {} has no owners",
                self.path.display()
            )));
        }
        Ok(tokenmap)
    }
}

/// A fixed token map, for callers that already hold one.
#[derive(Debug, Clone, Default)]
pub struct StaticMembership(pub TokenMap);

#[async_trait]
impl MembershipSource for StaticMembership {
    async fn token_map(&self) -> Result<TokenMap> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_live_nodes_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tokenmap.json");
        std::fs::write(&path, r#"{"-100": "node1", "0": "node3", "100": "node1"}"#).unwrap();

        let live = TokenMapFile::new(&path).live_nodes().await.unwrap();
        assert_eq!(live, BTreeSet::from(["node1".to_string(), "node3".to_string()]));
    }

    #[tokio::test]
    async fn test_empty_token_map_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tokenmap.json");
        std::fs::write(&path, "{}").unwrap();
        assert!(matches!(
            TokenMapFile::new(&path).live_nodes().await,
            Err(OrchestratorError::Membership(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let result = TokenMapFile::new("/nonexistent/tokenmap.json").token_map().await;
        assert!(matches!(result, Err(OrchestratorError::Membership(_))));
    }
}
