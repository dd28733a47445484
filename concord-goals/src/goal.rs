//! Goal and task records.

use crate::status::{GoalPriority, GoalStatus};
use chrono::Utc;
use concord_core::{
    new_entity_id, ConcordResult, EntityId, EntityType, GoalError, Timestamp, ValidationError,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// GOAL
// ============================================================================

/// A user-level objective, optionally nested under a parent goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Goal {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub goal_id: EntityId,
    pub title: String,
    pub description: String,
    pub status: GoalStatus,
    /// 0-100, see [`GoalPriority`]
    pub priority: u8,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub parent_goal_id: Option<EntityId>,
    pub success_criteria: Vec<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub assigned_agent_id: Option<EntityId>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub started_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub completed_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Goal {
    pub fn new(title: &str) -> Self {
        Self {
            goal_id: new_entity_id(),
            title: title.to_string(),
            description: String::new(),
            status: GoalStatus::Pending,
            priority: GoalPriority::NORMAL,
            parent_goal_id: None,
            success_criteria: Vec::new(),
            assigned_agent_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, goal_id: EntityId) -> Self {
        self.goal_id = goal_id;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parent(mut self, parent_goal_id: EntityId) -> Self {
        self.parent_goal_id = Some(parent_goal_id);
        self
    }

    pub fn with_success_criterion(mut self, criterion: &str) -> Self {
        self.success_criteria.push(criterion.to_string());
        self
    }

    pub fn with_assignee(mut self, agent_id: EntityId) -> Self {
        self.assigned_agent_id = Some(agent_id);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Not yet completed, failed or cancelled.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub(crate) fn validate(&self) -> ConcordResult<()> {
        validate_title(&self.title)?;
        validate_priority(self.priority)
    }

    /// Move to `next`, stamping start/completion times. Returns the previous
    /// status when it changed.
    pub(crate) fn transition(
        &mut self,
        next: GoalStatus,
        now: Timestamp,
    ) -> ConcordResult<Option<GoalStatus>> {
        let previous = self.status;
        if !check_transition(EntityType::Goal, self.goal_id, previous, next)? {
            return Ok(None);
        }
        self.status = next;
        stamp(&mut self.started_at, &mut self.completed_at, next, now);
        Ok(Some(previous))
    }
}

// ============================================================================
// TASK
// ============================================================================

/// One unit of work contributing to a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Task {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub task_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub goal_id: EntityId,
    pub title: String,
    pub description: String,
    pub status: GoalStatus,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub assigned_agent_id: Option<EntityId>,
    /// Tasks in the same goal that must complete first
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<String>))]
    pub dependencies: Vec<EntityId>,
    /// Minutes
    pub estimated_effort: Option<u32>,
    /// Minutes
    pub actual_effort: Option<u32>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub started_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub completed_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Task {
    pub fn new(goal_id: EntityId, title: &str) -> Self {
        Self {
            task_id: new_entity_id(),
            goal_id,
            title: title.to_string(),
            description: String::new(),
            status: GoalStatus::Pending,
            assigned_agent_id: None,
            dependencies: Vec::new(),
            estimated_effort: None,
            actual_effort: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, task_id: EntityId) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_dependency(mut self, task_id: EntityId) -> Self {
        if !self.dependencies.contains(&task_id) {
            self.dependencies.push(task_id);
        }
        self
    }

    pub fn with_dependencies<I>(self, task_ids: I) -> Self
    where
        I: IntoIterator<Item = EntityId>,
    {
        task_ids
            .into_iter()
            .fold(self, |task, id| task.with_dependency(id))
    }

    pub fn with_estimated_effort(mut self, minutes: u32) -> Self {
        self.estimated_effort = Some(minutes);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Completed, failed or cancelled.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn transition(
        &mut self,
        next: GoalStatus,
        now: Timestamp,
    ) -> ConcordResult<Option<GoalStatus>> {
        let previous = self.status;
        if !check_transition(EntityType::Task, self.task_id, previous, next)? {
            return Ok(None);
        }
        self.status = next;
        stamp(&mut self.started_at, &mut self.completed_at, next, now);
        Ok(Some(previous))
    }
}

/// Ok(true) for a real change, Ok(false) for a no-op.
fn check_transition(
    entity_type: EntityType,
    id: EntityId,
    from: GoalStatus,
    to: GoalStatus,
) -> ConcordResult<bool> {
    if !from.can_transition_to(to) {
        return Err(GoalError::InvalidTransition {
            entity_type,
            id,
            from: from.to_string(),
            to: to.to_string(),
        }
        .into());
    }
    Ok(from != to)
}

fn stamp(
    started_at: &mut Option<Timestamp>,
    completed_at: &mut Option<Timestamp>,
    status: GoalStatus,
    now: Timestamp,
) {
    if status == GoalStatus::InProgress && started_at.is_none() {
        *started_at = Some(now);
    }
    if status.is_terminal() {
        *completed_at = Some(now);
    }
}

pub(crate) fn validate_title(title: &str) -> ConcordResult<()> {
    if title.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "title".to_string(),
        }
        .into());
    }
    Ok(())
}

pub(crate) fn validate_priority(priority: u8) -> ConcordResult<()> {
    if priority > GoalPriority::HIGHEST {
        return Err(ValidationError::InvalidValue {
            field: "priority".to_string(),
            reason: format!("{} is outside 0-100", priority),
        }
        .into());
    }
    Ok(())
}

// ============================================================================
// UPDATES
// ============================================================================

/// Partial update for a goal. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoalUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<GoalStatus>,
    pub priority: Option<u8>,
    pub success_criteria: Option<Vec<String>>,
    pub assigned_agent_id: Option<EntityId>,
    /// Merged into the existing metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl GoalUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_status(mut self, status: GoalStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_success_criteria(mut self, criteria: Vec<String>) -> Self {
        self.success_criteria = Some(criteria);
        self
    }

    pub fn with_assignee(mut self, agent_id: EntityId) -> Self {
        self.assigned_agent_id = Some(agent_id);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub(crate) fn validate(&self) -> ConcordResult<()> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(priority) = self.priority {
            validate_priority(priority)?;
        }
        Ok(())
    }

    /// Apply to `goal`. The status change is checked before any field is
    /// touched, so a rejected update leaves the goal as it was.
    pub(crate) fn apply(
        self,
        goal: &mut Goal,
        now: Timestamp,
    ) -> ConcordResult<Option<GoalStatus>> {
        let previous = match self.status {
            Some(status) => goal.transition(status, now)?,
            None => None,
        };
        if let Some(title) = self.title {
            goal.title = title;
        }
        if let Some(description) = self.description {
            goal.description = description;
        }
        if let Some(priority) = self.priority {
            goal.priority = priority;
        }
        if let Some(criteria) = self.success_criteria {
            goal.success_criteria = criteria;
        }
        if let Some(agent_id) = self.assigned_agent_id {
            goal.assigned_agent_id = Some(agent_id);
        }
        goal.metadata.extend(self.metadata);
        Ok(previous)
    }
}

/// Partial update for a task. Dependencies and assignment have their own
/// operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<GoalStatus>,
    pub estimated_effort: Option<u32>,
    pub actual_effort: Option<u32>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_status(mut self, status: GoalStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_estimated_effort(mut self, minutes: u32) -> Self {
        self.estimated_effort = Some(minutes);
        self
    }

    pub fn with_actual_effort(mut self, minutes: u32) -> Self {
        self.actual_effort = Some(minutes);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub(crate) fn validate(&self) -> ConcordResult<()> {
        match &self.title {
            Some(title) => validate_title(title),
            None => Ok(()),
        }
    }

    pub(crate) fn apply(
        self,
        task: &mut Task,
        now: Timestamp,
    ) -> ConcordResult<Option<GoalStatus>> {
        let previous = match self.status {
            Some(status) => task.transition(status, now)?,
            None => None,
        };
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(minutes) = self.estimated_effort {
            task.estimated_effort = Some(minutes);
        }
        if let Some(minutes) = self.actual_effort {
            task.actual_effort = Some(minutes);
        }
        task.metadata.extend(self.metadata);
        Ok(previous)
    }
}

// ============================================================================
// PROGRESS
// ============================================================================

/// Snapshot of a goal's progress, derived from its tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ProgressInfo {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub goal_id: EntityId,
    /// Goal status after any automatic transition
    pub goal_status: GoalStatus,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub in_progress_tasks: usize,
    pub blocked_tasks: usize,
    /// Task count per status; statuses with no tasks are omitted
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub by_status: BTreeMap<GoalStatus, usize>,
    /// 0.0-100.0, rounded to two decimals
    pub percent_complete: f64,
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<String>))]
    pub completed_task_ids: Vec<EntityId>,
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<String>))]
    pub blocked_task_ids: Vec<EntityId>,
}

impl ProgressInfo {
    /// Tally `tasks`, which must all belong to `goal_id`.
    pub(crate) fn tally<'a, I>(goal_id: EntityId, goal_status: GoalStatus, tasks: I) -> Self
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let mut info = Self {
            goal_id,
            goal_status,
            total_tasks: 0,
            completed_tasks: 0,
            in_progress_tasks: 0,
            blocked_tasks: 0,
            by_status: BTreeMap::new(),
            percent_complete: 0.0,
            completed_task_ids: Vec::new(),
            blocked_task_ids: Vec::new(),
        };
        for task in tasks {
            info.total_tasks += 1;
            *info.by_status.entry(task.status).or_insert(0) += 1;
            match task.status {
                GoalStatus::Completed => {
                    info.completed_tasks += 1;
                    info.completed_task_ids.push(task.task_id);
                }
                GoalStatus::InProgress => info.in_progress_tasks += 1,
                GoalStatus::Blocked => {
                    info.blocked_tasks += 1;
                    info.blocked_task_ids.push(task.task_id);
                }
                _ => {}
            }
        }
        if info.total_tasks > 0 {
            let percent = info.completed_tasks as f64 / info.total_tasks as f64 * 100.0;
            info.percent_complete = (percent * 100.0).round() / 100.0;
        }
        info
    }

    pub fn is_complete(&self) -> bool {
        self.total_tasks > 0 && self.completed_tasks == self.total_tasks
    }
}
