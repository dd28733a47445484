//! CONCORD Goals - Objectives, Tasks and Progress
//!
//! The [`Orchestrator`] owns goals and the tasks they decompose into:
//! - Goals nest through an optional parent and carry a 0-100 priority
//! - Tasks depend on other tasks of the same goal; each goal's dependency
//!   graph stays acyclic, checked by depth-first search on every new edge
//! - Tasks are assigned to agents registered in the
//!   [`AgentDirectory`](concord_agents::AgentDirectory), directly or by
//!   capability
//! - Progress is derived from task status on demand, and may move the goal
//!   forward according to the configured
//!   [`ProgressPolicy`](concord_core::ProgressPolicy)
//!
//! Lifecycle changes are published on the event bus:
//!
//! | Topic                 | Kind                |
//! |-----------------------|---------------------|
//! | `goal.created`        | `GoalCreated`       |
//! | `goal.updated`        | `GoalUpdated`       |
//! | `goal.status_changed` | `GoalStatusChanged` |
//! | `goal.deleted`        | `GoalDeleted`       |
//! | `task.created`        | `TaskCreated`       |
//! | `task.assigned`       | `TaskAssigned`      |
//! | `task.updated`        | `TaskUpdated`       |

mod goal;
mod graph;
mod orchestrator;
mod status;

pub use goal::{Goal, GoalUpdate, ProgressInfo, Task, TaskUpdate};
pub use orchestrator::Orchestrator;
pub use status::{GoalPriority, GoalStatus, GoalStatusParseError};
