use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// GOAL STATUS
// ============================================================================

/// Lifecycle state shared by goals and tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    /// Created, not yet planned
    Pending,
    /// Decomposed into tasks
    Planned,
    /// Work has started
    InProgress,
    /// Waiting on something outside the goal
    Blocked,
    Completed,
    Failed,
    Cancelled,
}

impl GoalStatus {
    pub const ALL: [GoalStatus; 7] = [
        GoalStatus::Pending,
        GoalStatus::Planned,
        GoalStatus::InProgress,
        GoalStatus::Blocked,
        GoalStatus::Completed,
        GoalStatus::Failed,
        GoalStatus::Cancelled,
    ];

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            GoalStatus::Pending => "pending",
            GoalStatus::Planned => "planned",
            GoalStatus::InProgress => "in_progress",
            GoalStatus::Blocked => "blocked",
            GoalStatus::Completed => "completed",
            GoalStatus::Failed => "failed",
            GoalStatus::Cancelled => "cancelled",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, GoalStatusParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(GoalStatus::Pending),
            "planned" => Ok(GoalStatus::Planned),
            "inprogress" | "in_progress" | "in-progress" => Ok(GoalStatus::InProgress),
            "blocked" => Ok(GoalStatus::Blocked),
            "completed" | "complete" => Ok(GoalStatus::Completed),
            "failed" | "failure" => Ok(GoalStatus::Failed),
            "cancelled" | "canceled" => Ok(GoalStatus::Cancelled),
            _ => Err(GoalStatusParseError(s.to_string())),
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GoalStatus::Completed | GoalStatus::Failed | GoalStatus::Cancelled
        )
    }

    fn rank(&self) -> u8 {
        match self {
            GoalStatus::Pending => 0,
            GoalStatus::Planned => 1,
            GoalStatus::InProgress | GoalStatus::Blocked => 2,
            GoalStatus::Completed | GoalStatus::Failed | GoalStatus::Cancelled => 3,
        }
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Status only moves toward a terminal state; `in_progress` and
    /// `blocked` may alternate. Staying put is always allowed, leaving a
    /// terminal state never is.
    pub fn can_transition_to(&self, next: GoalStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for GoalStatus {
    type Err = GoalStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid goal status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalStatusParseError(pub String);

impl fmt::Display for GoalStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid goal status: {}", self.0)
    }
}

impl std::error::Error for GoalStatusParseError {}

// ============================================================================
// GOAL PRIORITY
// ============================================================================

/// Named points on the 0-100 goal priority scale.
pub struct GoalPriority;

impl GoalPriority {
    pub const LOWEST: u8 = 0;
    pub const LOW: u8 = 25;
    pub const NORMAL: u8 = 50;
    pub const HIGH: u8 = 75;
    pub const HIGHEST: u8 = 100;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_db_str() {
        for status in GoalStatus::ALL {
            assert_eq!(GoalStatus::from_db_str(status.as_db_str()), Ok(status));
        }
        assert_eq!("In-Progress".parse::<GoalStatus>(), Ok(GoalStatus::InProgress));
        assert!(GoalStatus::from_db_str("done-ish").is_err());
    }

    #[test]
    fn test_forward_transitions() {
        use GoalStatus::*;
        assert!(Pending.can_transition_to(Planned));
        assert!(Pending.can_transition_to(InProgress));
        assert!(Planned.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Blocked));
        assert!(Blocked.can_transition_to(InProgress));
        assert!(Blocked.can_transition_to(Failed));
    }

    #[test]
    fn test_backward_and_terminal_transitions_rejected() {
        use GoalStatus::*;
        assert!(!Planned.can_transition_to(Pending));
        assert!(!InProgress.can_transition_to(Planned));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Completed));
    }

    #[test]
    fn test_serde_uses_snake_case() -> Result<(), serde_json::Error> {
        assert_eq!(
            serde_json::to_string(&GoalStatus::InProgress)?,
            "\"in_progress\""
        );
        Ok(())
    }
}
