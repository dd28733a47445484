//! CONCORD Agents - Directory and Messaging
//!
//! Provides the two agent-facing coordination primitives:
//! - Agent identity, capability advertisement and heartbeat health
//!   ([`AgentDirectory`])
//! - Point-to-point and broadcast messaging with per-agent priority inboxes
//!   and a dead-letter queue ([`MessageRouter`])

mod agent;
mod directory;
mod message;
mod router;

pub use agent::{Agent, AgentStatus};
pub use directory::AgentDirectory;
pub use message::{AgentMessage, DeadLetter, DeadLetterReason, MessageKind, MessagePriority};
pub use router::MessageRouter;
