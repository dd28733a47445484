use concord_core::{new_entity_id, EntityId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Agent status in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Constructed but not yet accepted by a directory
    Registered,
    /// Registered and heartbeating
    Active,
    /// Silent for longer than the heartbeat timeout
    Stale,
    /// Removed from the directory
    Deregistered,
}

/// An agent: an independently addressable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Agent {
    /// Unique identifier for this agent
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub agent_id: EntityId,
    /// Display name (e.g., "planner", "browser-navigator")
    pub name: String,
    /// Actions this agent can perform; no duplicates, in declaration order
    pub capabilities: Vec<String>,
    pub version: String,
    pub max_concurrent_tasks: u32,

    /// Current status
    pub status: AgentStatus,

    /// When this agent was created
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    /// Last heartbeat timestamp
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub last_heartbeat: Timestamp,
}

impl Agent {
    /// Create a new agent. Duplicate capabilities are dropped.
    pub fn new<I, S>(name: &str, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        let mut caps: Vec<String> = Vec::new();
        for cap in capabilities {
            let cap = cap.into();
            if !caps.contains(&cap) {
                caps.push(cap);
            }
        }
        Self {
            agent_id: new_entity_id(),
            name: name.to_string(),
            capabilities: caps,
            version: "1.0.0".to_string(),
            max_concurrent_tasks: 1,
            status: AgentStatus::Registered,
            created_at: now,
            last_heartbeat: now,
        }
    }

    /// Use a caller-chosen id instead of a fresh one.
    pub fn with_id(mut self, agent_id: EntityId) -> Self {
        self.agent_id = agent_id;
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: u32) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// Update heartbeat timestamp.
    pub fn heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    /// Check if agent has a specific capability.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Time since the last heartbeat, measured against `now`.
    pub fn silence(&self, now: Timestamp) -> chrono::Duration {
        now - self.last_heartbeat
    }
}
