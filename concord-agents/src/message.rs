use chrono::Utc;
use concord_core::{millis, new_entity_id, DurationMs, EntityId, Timestamp};
use serde::{Deserialize, Serialize};

/// Type of agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Notification,
    /// Heartbeat/keepalive
    Heartbeat,
    /// Hand a unit of work to another agent
    TaskDelegation,
    /// Result of delegated work
    TaskCompletion,
    /// Request for context from another agent
    ContextRequest,
    /// Sharing context with another agent
    ContextShare,
    Error,
    Shutdown,
}

/// Priority level for messages. Ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
}

impl MessagePriority {
    /// Numeric weight on the 0-100 scale.
    pub const fn weight(&self) -> u8 {
        match self {
            MessagePriority::Lowest => 0,
            MessagePriority::Low => 25,
            MessagePriority::Normal => 50,
            MessagePriority::High => 75,
            MessagePriority::Highest => 100,
        }
    }
}

/// A message between agents. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentMessage {
    /// Unique identifier for this message
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub message_id: EntityId,
    /// Agent sending the message
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub sender_id: EntityId,
    /// Specific agent to receive; `None` means broadcast to kind subscribers
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub recipient_id: Option<EntityId>,
    pub kind: MessageKind,
    /// Opaque payload
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: serde_json::Value,
    pub priority: MessagePriority,
    /// Pairs a response with the request it answers
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub correlation_id: Option<EntityId>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub expires_at: Option<Timestamp>,
}

impl AgentMessage {
    /// Create a new message to a specific agent.
    pub fn to_agent(
        sender_id: EntityId,
        recipient_id: EntityId,
        kind: MessageKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message_id: new_entity_id(),
            sender_id,
            recipient_id: Some(recipient_id),
            kind,
            payload,
            priority: MessagePriority::Normal,
            correlation_id: None,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Create a new message for every agent subscribed to `kind`.
    pub fn broadcast(sender_id: EntityId, kind: MessageKind, payload: serde_json::Value) -> Self {
        Self {
            message_id: new_entity_id(),
            sender_id,
            recipient_id: None,
            kind,
            payload,
            priority: MessagePriority::Normal,
            correlation_id: None,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Build a response to this message, addressed back to its sender and
    /// correlated with its id.
    pub fn reply(&self, responder_id: EntityId, payload: serde_json::Value) -> Self {
        Self::to_agent(responder_id, self.sender_id, MessageKind::Response, payload)
            .with_priority(self.priority)
            .with_correlation(self.message_id)
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_correlation(mut self, correlation_id: EntityId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Set expiration.
    pub fn with_expiration(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Expire `ttl_ms` after creation.
    pub fn with_ttl(self, ttl_ms: DurationMs) -> Self {
        let expires_at = self.created_at + millis(ttl_ms);
        self.with_expiration(expires_at)
    }

    /// Check if message has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient_id.is_none()
    }
}

// ============================================================================
// DEAD LETTERS
// ============================================================================

/// Why a message was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// TTL elapsed before send or before drain
    Expired,
    /// Recipient inbox at capacity
    InboxFull,
    /// Still queued when the recipient left the directory
    RecipientDeregistered,
}

/// An undeliverable message and the reason it was set aside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DeadLetter {
    pub message: AgentMessage,
    pub reason: DeadLetterReason,
    /// Intended recipient, when one was resolved
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub recipient_id: Option<EntityId>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub dead_lettered_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_ordering_matches_weight() {
        let all = [
            MessagePriority::Lowest,
            MessagePriority::Low,
            MessagePriority::Normal,
            MessagePriority::High,
            MessagePriority::Highest,
        ];
        for pair in all.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].weight() < pair[1].weight());
        }
        assert_eq!(MessagePriority::default(), MessagePriority::Normal);
    }

    #[test]
    fn test_reply_correlates_with_request() {
        let requester = new_entity_id();
        let responder = new_entity_id();
        let request = AgentMessage::to_agent(
            requester,
            responder,
            MessageKind::Request,
            json!({"q": "title?"}),
        )
        .with_priority(MessagePriority::High);

        let response = request.reply(responder, json!({"a": "Example"}));
        assert_eq!(response.kind, MessageKind::Response);
        assert_eq!(response.sender_id, responder);
        assert_eq!(response.recipient_id, Some(requester));
        assert_eq!(response.correlation_id, Some(request.message_id));
        assert_eq!(response.priority, MessagePriority::High);
    }

    #[test]
    fn test_expiry() {
        let msg = AgentMessage::broadcast(new_entity_id(), MessageKind::Notification, json!(null));
        assert!(msg.is_broadcast());
        assert!(!msg.is_expired());

        let expired = msg.clone().with_ttl(-1);
        assert!(expired.is_expired());

        let later = msg.with_ttl(60_000);
        assert!(!later.is_expired());
        assert!(later.is_expired_at(Utc::now() + chrono::Duration::minutes(2)));
    }
}
