use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use serenity::async_trait;

use crate::error::CatalogError;

/// Read-only source of valid team names per region/country.
#[async_trait]
pub trait TeamCatalog: Send + Sync {
    /// Unknown scopes have no teams.
    async fn teams(&self, scope: &str) -> Result<Vec<String>, CatalogError>;
}

/// Team roster kept in a JSON file of `{ "<region>": ["<team>", ...] }`.
///
/// The file is re-read on every lookup so rosters can be refreshed without a
/// restart.
pub struct FileTeamCatalog {
    path: PathBuf,
}

impl FileTeamCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TeamCatalog for FileTeamCatalog {
    async fn teams(&self, scope: &str) -> Result<Vec<String>, CatalogError> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|err| CatalogError::Unreachable(Box::new(err)))?;
        let mut rosters: HashMap<String, BTreeSet<String>> =
            serde_json::from_slice(&raw).map_err(CatalogError::Malformed)?;

        let teams = rosters.remove(scope).or_else(|| {
            rosters
                .into_iter()
                .find(|(region, _)| region.eq_ignore_ascii_case(scope))
                .map(|(_, teams)| teams)
        });

        Ok(teams.unwrap_or_default().into_iter().collect())
    }
}
