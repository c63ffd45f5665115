use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subscription document of a single guild, stored under the guild id.
///
/// A channel that follows nothing is absent from `subscriptions`; empty
/// sequences are never kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    /// Channel id -> followed team names, most recently followed first.
    #[serde(default)]
    pub subscriptions: BTreeMap<String, Vec<String>>,
}

impl Guild {
    pub fn channel_follows(&self, channel_id: &str) -> &[String] {
        self.subscriptions
            .get(channel_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub team_a: String,
    pub team_b: String,
    pub league: String,
    pub starts_at: DateTime<Utc>,
}

impl Match {
    pub fn involves(&self, team_name: &str) -> bool {
        self.team_a == team_name || self.team_b == team_name
    }
}
