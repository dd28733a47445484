//! CONCORD Core - Shared Types
//!
//! Identity, time, error taxonomy, configuration, domain events and the
//! hierarchical topic pattern matcher. Every other crate depends on this one;
//! nothing in here holds shared state.

pub mod config;
pub mod error;
pub mod event;
pub mod pattern;

pub use config::{
    ConcordConfig, ConflictStrategy, ContextConfig, DirectoryConfig, EventBusConfig, GoalsConfig,
    ProgressPolicy, RouterConfig,
};
pub use error::{
    AgentError, ConcordError, ConcordResult, ConfigError, ContextError, EventError, GoalError,
    StorageError, ValidationError,
};
pub use event::{Event, EventKind};
pub use pattern::{topic_matches, TopicPattern};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Duration in milliseconds for TTL and timeout values.
pub type DurationMs = i64;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Convert a millisecond duration into a chrono duration.
pub fn millis(ms: DurationMs) -> chrono::Duration {
    chrono::Duration::milliseconds(ms)
}

/// Entity type discriminator used in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum EntityType {
    Agent,
    Message,
    Subscription,
    ContextEntry,
    Goal,
    Task,
}

// ============================================================================
// TESTS
// ============================================================================
