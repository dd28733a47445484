//! Domain events carried on the event bus.
//!
//! An [`Event`] is the unit published on the event bus. The context store and
//! the goal orchestrator describe their state changes as events, and
//! subscribers receive each one alongside the concrete topic it was published
//! on.

use crate::{new_entity_id, EntityId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// EVENT KIND
// ============================================================================

/// What happened. Closed set of lifecycle kinds plus an escape hatch for
/// application-defined events.
///
/// Every kind maps to a 16-bit code: the upper 4 bits encode the category,
/// the lower 12 bits the specific type.
///
/// Category allocation:
/// - 0x0xxx: Untyped data events
/// - 0x1xxx: Goal events
/// - 0x2xxx: Context events
/// - 0x3xxx: Task events
/// - 0xFxxx: Custom/extension events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Data,
    GoalCreated,
    GoalUpdated,
    GoalStatusChanged,
    GoalDeleted,
    ContextWritten,
    TaskCreated,
    TaskAssigned,
    TaskUpdated,
    /// Application event; only the lower 12 bits of the code are kept.
    Custom(u16),
}

impl EventKind {
    /// Stable numeric code for this kind.
    pub const fn code(&self) -> u16 {
        match self {
            EventKind::Data => 0x0000,
            EventKind::GoalCreated => 0x1001,
            EventKind::GoalUpdated => 0x1002,
            EventKind::GoalStatusChanged => 0x1003,
            EventKind::GoalDeleted => 0x1004,
            EventKind::ContextWritten => 0x2001,
            EventKind::TaskCreated => 0x3001,
            EventKind::TaskAssigned => 0x3002,
            EventKind::TaskUpdated => 0x3003,
            EventKind::Custom(type_id) => 0xF000 | (*type_id & 0x0FFF),
        }
    }

    /// Get the category (upper 4 bits of the code).
    pub const fn category(&self) -> u8 {
        (self.code() >> 12) as u8
    }

    /// Get the type ID within the category (lower 12 bits of the code).
    pub const fn type_id(&self) -> u16 {
        self.code() & 0x0FFF
    }

    pub const fn is_goal(&self) -> bool {
        self.category() == 0x1
    }

    pub const fn is_task(&self) -> bool {
        self.category() == 0x3
    }

    pub const fn is_custom(&self) -> bool {
        matches!(self, EventKind::Custom(_))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06X}", self.code())
    }
}

// ============================================================================
// EVENT
// ============================================================================

/// A published event. The topic is not part of the event; the bus passes it
/// to handlers separately so one event value can be published on several
/// topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Event {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub event_id: EntityId,
    pub kind: EventKind,
    /// Agent (or other entity) that caused the event, if any
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub source: Option<EntityId>,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: serde_json::Value,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl Event {
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            event_id: new_entity_id(),
            kind,
            source: None,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Untyped event with an arbitrary payload.
    pub fn data(payload: serde_json::Value) -> Self {
        Self::new(EventKind::Data, payload)
    }

    pub fn with_source(mut self, source: EntityId) -> Self {
        self.source = Some(source);
        self
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_categories() {
        assert!(EventKind::GoalStatusChanged.is_goal());
        assert!(!EventKind::TaskCreated.is_goal());
        assert!(EventKind::TaskAssigned.is_task());
        assert_eq!(EventKind::ContextWritten.category(), 0x2);

        let custom = EventKind::Custom(0x123);
        assert!(custom.is_custom());
        assert_eq!(custom.category(), 0xF);
        assert_eq!(custom.type_id(), 0x123);
    }

    #[test]
    fn test_custom_code_is_masked_to_its_category() {
        assert_eq!(EventKind::Custom(0xFFFF).code(), 0xFFFF);
        assert_eq!(EventKind::Custom(0x1001).code(), 0xF001);
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::GoalCreated.to_string(), "0x1001");
        assert_eq!(EventKind::Data.to_string(), "0x0000");
    }

    #[test]
    fn test_event_builder() {
        let source = new_entity_id();
        let event =
            Event::new(EventKind::TaskCreated, json!({"title": "scan"})).with_source(source);
        assert_eq!(event.kind, EventKind::TaskCreated);
        assert_eq!(event.source, Some(source));
        assert_eq!(event.payload["title"], "scan");
    }

    #[test]
    fn test_event_serde() -> Result<(), serde_json::Error> {
        let event = Event::data(json!(42));
        let value = serde_json::to_value(&event)?;
        assert_eq!(value["kind"], json!("data"));
        let back: Event = serde_json::from_value(value)?;
        assert_eq!(back, event);
        Ok(())
    }
}
