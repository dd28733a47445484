use chrono::Utc;
use concord_core::{millis, new_entity_id, DurationMs, EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Scope tier without its qualifier, for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Global,
    Agent,
    Task,
}

/// Visibility/ownership tier of a context entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum ContextScope {
    /// Shared by every agent
    Global,
    /// Private to one agent
    Agent(EntityId),
    /// Shared by agents working one task
    Task(EntityId),
}

impl ContextScope {
    pub fn kind(&self) -> ScopeKind {
        match self {
            ContextScope::Global => ScopeKind::Global,
            ContextScope::Agent(_) => ScopeKind::Agent,
            ContextScope::Task(_) => ScopeKind::Task,
        }
    }
}

impl fmt::Display for ContextScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextScope::Global => write!(f, "global"),
            ContextScope::Agent(id) => write!(f, "agent:{}", id),
            ContextScope::Task(id) => write!(f, "task:{}", id),
        }
    }
}

/// One versioned value in the context store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ContextEntry {
    /// Stable for the lifetime of the key; every version shares it
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub entry_id: EntityId,
    pub scope: ContextScope,
    /// Hierarchical dotted key (e.g., "browser.tab.url")
    pub key: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub value: serde_json::Value,
    /// Agent that made this write
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub agent_id: EntityId,
    /// Starts at 1, +1 per accepted write
    pub version: u64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub expires_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ContextEntry {
    /// First version of a new key.
    pub fn new(
        scope: ContextScope,
        key: &str,
        value: serde_json::Value,
        agent_id: EntityId,
    ) -> Self {
        Self {
            entry_id: new_entity_id(),
            scope,
            key: key.to_string(),
            value,
            agent_id,
            version: 1,
            timestamp: Utc::now(),
            expires_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// Optional parameters for a context write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    /// Optimistic concurrency check; a missing key has version 0
    pub expected_version: Option<u64>,
    /// Time to live; falls back to the store default
    pub ttl_ms: Option<DurationMs>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn with_ttl(mut self, ttl_ms: DurationMs) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub(crate) fn expiry(&self, default_ttl_ms: Option<DurationMs>, now: Timestamp) -> Option<Timestamp> {
        self.ttl_ms
            .or(default_ttl_ms)
            .map(|ttl| now + millis(ttl))
    }
}

/// Filters for [`ContextStore::select`](crate::ContextStore::select).
///
/// Every filter left unset matches everything. Expired entries are skipped
/// unless [`ContextQuery::include_expired`] is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextQuery {
    pub pattern: Option<String>,
    pub scope: Option<ScopeKind>,
    /// Writing agent
    pub agent_id: Option<EntityId>,
    pub include_expired: bool,
}

impl ContextQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    pub fn with_scope(mut self, scope: ScopeKind) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_agent(mut self, agent_id: EntityId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn include_expired(mut self) -> Self {
        self.include_expired = true;
        self
    }
}
