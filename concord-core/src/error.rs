//! Error types for CONCORD operations

use crate::EntityType;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the in-memory stores themselves.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Lock poisoned: {component}")]
    LockPoisoned { component: String },
}

/// Agent directory and message routing errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Agent not registered: {agent_id}")]
    NotRegistered { agent_id: Uuid },

    #[error("Agent already registered: {agent_id}")]
    DuplicateAgent { agent_id: Uuid },

    #[error("No registered agent offers capability '{capability}'")]
    NoCapableAgent { capability: String },
}

/// Event bus errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Subscription not found: {subscription_id}")]
    SubscriptionNotFound { subscription_id: Uuid },
}

/// Shared context store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Context entry not found: {key} ({scope})")]
    NotFound { key: String, scope: String },

    #[error("Context entry expired: {key} ({scope})")]
    Expired { key: String, scope: String },

    #[error("Version conflict on {key}: expected {expected}, found {actual}")]
    VersionConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("Write to {key} requires an expected version (current is {current})")]
    MissingExpectedVersion { key: String, current: u64 },
}

/// Goal and task orchestration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GoalError {
    #[error("Goal not found: {goal_id}")]
    GoalNotFound { goal_id: Uuid },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: Uuid },

    #[error("Goal already exists: {goal_id}")]
    DuplicateGoal { goal_id: Uuid },

    #[error("Task already exists: {task_id}")]
    DuplicateTask { task_id: Uuid },

    #[error("Cyclic dependency through task {task_id}: {cycle:?}")]
    CyclicDependency { task_id: Uuid, cycle: Vec<Uuid> },

    #[error("Task {task_id} cannot depend on {dependency_id}, which belongs to another goal than {goal_id}")]
    ForeignDependency {
        task_id: Uuid,
        dependency_id: Uuid,
        goal_id: Uuid,
    },

    #[error("Invalid {entity_type:?} transition for {id}: {from} -> {to}")]
    InvalidTransition {
        entity_type: EntityType,
        id: Uuid,
        from: String,
        to: String,
    },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all CONCORD errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConcordError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Goal error: {0}")]
    Goal(#[from] GoalError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ConcordError {
    /// True for every "unknown id / key" failure, including expired context
    /// entries, which callers treat the same as missing ones.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ConcordError::Agent(AgentError::NotRegistered { .. })
                | ConcordError::Agent(AgentError::NoCapableAgent { .. })
                | ConcordError::Event(EventError::SubscriptionNotFound { .. })
                | ConcordError::Context(ContextError::NotFound { .. })
                | ConcordError::Context(ContextError::Expired { .. })
                | ConcordError::Goal(GoalError::GoalNotFound { .. })
                | ConcordError::Goal(GoalError::TaskNotFound { .. })
        )
    }

    /// Shorthand for a poisoned lock on the named component.
    pub fn lock_poisoned(component: &str) -> Self {
        ConcordError::Storage(StorageError::LockPoisoned {
            component: component.to_string(),
        })
    }
}

/// Result type alias for CONCORD operations.
pub type ConcordResult<T> = Result<T, ConcordError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_display_duplicate() {
        let err = AgentError::DuplicateAgent {
            agent_id: Uuid::nil(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("already registered"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_context_error_display_version_conflict() {
        let err = ContextError::VersionConflict {
            key: "browser.url".to_string(),
            expected: 2,
            actual: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("browser.url"));
        assert!(msg.contains("expected 2"));
        assert!(msg.contains("found 3"));
    }

    #[test]
    fn test_goal_error_display_invalid_transition() {
        let err = GoalError::InvalidTransition {
            entity_type: EntityType::Goal,
            id: Uuid::nil(),
            from: "completed".to_string(),
            to: "in_progress".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Goal"));
        assert!(msg.contains("completed -> in_progress"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "router.inbox_capacity".to_string(),
            value: "0".to_string(),
            reason: "must be greater than 0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("router.inbox_capacity"));
        assert!(msg.contains("must be greater than 0"));
    }

    #[test]
    fn test_event_error_display_is_not_agent_error() {
        let err = ConcordError::from(EventError::SubscriptionNotFound {
            subscription_id: Uuid::nil(),
        });
        let msg = format!("{}", err);
        assert!(msg.starts_with("Event error: Subscription not found"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_concord_error_from_variants() {
        let storage = ConcordError::from(StorageError::LockPoisoned {
            component: "directory".to_string(),
        });
        assert!(matches!(storage, ConcordError::Storage(_)));

        let agent = ConcordError::from(AgentError::NotRegistered {
            agent_id: Uuid::nil(),
        });
        assert!(matches!(agent, ConcordError::Agent(_)));

        let context = ConcordError::from(ContextError::NotFound {
            key: "k".to_string(),
            scope: "global".to_string(),
        });
        assert!(matches!(context, ConcordError::Context(_)));

        let goal = ConcordError::from(GoalError::GoalNotFound {
            goal_id: Uuid::nil(),
        });
        assert!(matches!(goal, ConcordError::Goal(_)));

        let validation = ConcordError::from(ValidationError::RequiredFieldMissing {
            field: "title".to_string(),
        });
        assert!(matches!(validation, ConcordError::Validation(_)));

        let config = ConcordError::from(ConfigError::Parse {
            reason: "bad toml".to_string(),
        });
        assert!(matches!(config, ConcordError::Config(_)));
    }

    #[test]
    fn test_expired_is_reported_as_not_found() {
        let expired = ConcordError::from(ContextError::Expired {
            key: "session.token".to_string(),
            scope: "global".to_string(),
        });
        assert!(expired.is_not_found());

        let conflict = ConcordError::from(ContextError::VersionConflict {
            key: "k".to_string(),
            expected: 1,
            actual: 2,
        });
        assert!(!conflict.is_not_found());
    }

    #[test]
    fn test_lock_poisoned_helper() {
        let err = ConcordError::lock_poisoned("router");
        assert_eq!(
            err,
            ConcordError::Storage(StorageError::LockPoisoned {
                component: "router".to_string()
            })
        );
    }
}
