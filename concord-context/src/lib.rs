//! CONCORD Context - Shared Versioned State
//!
//! A key/value store shared by every agent in the process:
//! - Entries live in a scope: global, one agent, or one task
//! - Each accepted write bumps the entry version; previous versions are kept
//!   in a bounded history
//! - Concurrent writers are reconciled by the configured
//!   [`ConflictStrategy`](concord_core::ConflictStrategy)
//! - Entries may carry a TTL; expired entries are hidden and purged lazily
//! - Writes are published on the event bus with the key as topic, so
//!   subscribers use the same wildcard patterns as queries
//!
//! [`AgentContext`] wraps a store for one agent.

mod agent_context;
mod entry;
mod merge;
mod store;

pub use agent_context::AgentContext;
pub use entry::{ContextEntry, ContextQuery, ContextScope, ScopeKind, WriteOptions};
pub use merge::{merge_json, JsonMerger, ValueMerger};
pub use store::ContextStore;
