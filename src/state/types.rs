//! Persisted state types.
//!
//! A [`DeploymentState`] is the snapshot written by a state store: one
//! [`ResourceRecord`] per tracked instance plus a bounded run history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::resource::{ResourceAddr, ResourceId};
use crate::schema::AttributeSet;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of history entries kept.
pub const MAX_HISTORY: usize = 100;

/// The complete persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the last applied configuration.
    pub config_hash: String,
    /// Incremented on every save.
    #[serde(default)]
    pub serial: u64,
    /// Tracked instances by address.
    #[serde(default)]
    pub resources: BTreeMap<ResourceAddr, ResourceRecord>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent runs, oldest first.
    #[serde(default)]
    pub history: Vec<DeploymentHistoryEntry>,
}

/// Last observed state of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Local address.
    pub addr: ResourceAddr,
    /// Remote identifier.
    pub id: ResourceId,
    /// Attributes from the last successful read.
    pub attributes: AttributeSet,
    /// When the instance was first tracked.
    pub created_at: DateTime<Utc>,
    /// When the attributes were last observed.
    pub observed_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: DeploymentOperation,
    /// Run identifier.
    pub run_id: Uuid,
    /// Configuration hash at the time of the run.
    pub config_hash: String,
    /// Addresses the run touched.
    pub resources: Vec<String>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Error message for failed runs.
    #[serde(default)]
    pub error: Option<String>,
}

/// Kinds of recorded runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOperation {
    /// Converge to the configuration.
    Apply,
    /// Re-read tracked instances.
    Refresh,
    /// Adopt an existing instance.
    Import,
    /// Delete everything tracked.
    Destroy,
}

impl DeploymentState {
    /// Creates a new empty state.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            config_hash: String::new(),
            serial: 0,
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a record by address.
    #[must_use]
    pub fn get(&self, addr: &ResourceAddr) -> Option<&ResourceRecord> {
        self.resources.get(addr)
    }

    /// Adds a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: DeploymentHistoryEntry) {
        self.history.push(entry);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }

    /// Most recent history entry.
    #[must_use]
    pub fn last_run(&self) -> Option<&DeploymentHistoryEntry> {
        self.history.last()
    }
}

impl ResourceRecord {
    /// Creates a record observed now.
    #[must_use]
    pub fn new(addr: ResourceAddr, id: ResourceId, attributes: AttributeSet) -> Self {
        let now = Utc::now();
        Self {
            addr,
            id,
            attributes,
            created_at: now,
            observed_at: now,
        }
    }

    /// Returns a copy with freshly observed attributes.
    #[must_use]
    pub fn refreshed(&self, attributes: AttributeSet) -> Self {
        Self {
            attributes,
            observed_at: Utc::now(),
            ..self.clone()
        }
    }
}

impl DeploymentHistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(
        operation: DeploymentOperation,
        run_id: Uuid,
        config_hash: &str,
        resources: Vec<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            run_id,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Marks the entry as failed.
    #[must_use]
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

impl std::fmt::Display for DeploymentOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Refresh => "refresh",
            Self::Import => "import",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_capped() {
        let mut state = DeploymentState::new("p", "dev");
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(DeploymentHistoryEntry::new(
                DeploymentOperation::Apply,
                Uuid::new_v4(),
                &i.to_string(),
                Vec::new(),
            ));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].config_hash, "5");
        assert_eq!(
            state.last_run().map(|e| e.config_hash.as_str()),
            Some((MAX_HISTORY + 4).to_string().as_str())
        );
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = DeploymentState::new("p", "dev");
        let addr = ResourceAddr::new("api_cache", "primary");
        state.resources.insert(
            addr.clone(),
            ResourceRecord::new(
                addr.clone(),
                ResourceId::new("api-1"),
                AttributeSet::new().with("ttl", 60).with("type", "SMALL"),
            ),
        );

        let json = serde_json::to_string(&state).expect("serialize");
        let back: DeploymentState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.get(&addr), state.get(&addr));
    }

    #[test]
    fn test_refreshed_keeps_creation_time() {
        let record = ResourceRecord::new(
            ResourceAddr::new("api_cache", "a"),
            ResourceId::new("api-1"),
            AttributeSet::new(),
        );
        let next = record.refreshed(AttributeSet::new().with("ttl", 5));
        assert_eq!(next.created_at, record.created_at);
        assert_eq!(next.attributes.get_int("ttl"), Some(5));
    }
}
