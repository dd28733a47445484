use crate::goal::{validate_title, Goal, GoalUpdate, ProgressInfo, Task, TaskUpdate};
use crate::graph::{dependency_path, topological_order};
use crate::status::GoalStatus;
use chrono::Utc;
use concord_agents::AgentDirectory;
use concord_core::{
    AgentError, ConcordError, ConcordResult, EntityId, Event, EventKind, GoalError, GoalsConfig,
    ValidationError,
};
use concord_events::EventBus;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Default)]
struct GoalBook {
    goals: HashMap<EntityId, Goal>,
    tasks: HashMap<EntityId, Task>,
    /// Creation sequence for goals and tasks alike; ids never collide
    seq: HashMap<EntityId, u64>,
    next_seq: u64,
}

impl GoalBook {
    fn stamp_seq(&mut self, id: EntityId) {
        self.seq.insert(id, self.next_seq);
        self.next_seq += 1;
    }

    fn order(&self, id: &EntityId) -> u64 {
        self.seq.get(id).copied().unwrap_or(u64::MAX)
    }

    fn goal(&self, goal_id: EntityId) -> ConcordResult<&Goal> {
        self.goals
            .get(&goal_id)
            .ok_or_else(|| GoalError::GoalNotFound { goal_id }.into())
    }

    fn goal_mut(&mut self, goal_id: EntityId) -> ConcordResult<&mut Goal> {
        self.goals
            .get_mut(&goal_id)
            .ok_or_else(|| GoalError::GoalNotFound { goal_id }.into())
    }

    fn task(&self, task_id: EntityId) -> ConcordResult<&Task> {
        self.tasks
            .get(&task_id)
            .ok_or_else(|| GoalError::TaskNotFound { task_id }.into())
    }

    fn task_mut(&mut self, task_id: EntityId) -> ConcordResult<&mut Task> {
        self.tasks
            .get_mut(&task_id)
            .ok_or_else(|| GoalError::TaskNotFound { task_id }.into())
    }

    fn sorted_goals<'a>(&'a self, keep: impl Fn(&Goal) -> bool) -> Vec<Goal> {
        let mut goals: Vec<&'a Goal> = self.goals.values().filter(|g| keep(*g)).collect();
        goals.sort_by_key(|g| self.order(&g.goal_id));
        goals.into_iter().cloned().collect()
    }

    fn sorted_tasks<'a>(&'a self, keep: impl Fn(&Task) -> bool) -> Vec<Task> {
        let mut tasks: Vec<&'a Task> = self.tasks.values().filter(|t| keep(*t)).collect();
        tasks.sort_by_key(|t| self.order(&t.task_id));
        tasks.into_iter().cloned().collect()
    }

    /// Check a new dependency edge `task_id -> dependency_id`.
    fn check_edge(&self, task_id: EntityId, goal_id: EntityId, dependency_id: EntityId) -> ConcordResult<()> {
        if dependency_id == task_id {
            return Err(GoalError::CyclicDependency {
                task_id,
                cycle: vec![task_id, task_id],
            }
            .into());
        }
        let dependency = self.task(dependency_id)?;
        if dependency.goal_id != goal_id {
            return Err(GoalError::ForeignDependency {
                task_id,
                dependency_id,
                goal_id,
            }
            .into());
        }
        if let Some(path) = dependency_path(&self.tasks, dependency_id, task_id) {
            let mut cycle = vec![task_id];
            cycle.extend(path);
            return Err(GoalError::CyclicDependency { task_id, cycle }.into());
        }
        Ok(())
    }

    /// Validate and insert a task, recording its creation event.
    fn insert_task(&mut self, task: Task, events: &mut Vec<(&'static str, Event)>) -> ConcordResult<EntityId> {
        validate_title(&task.title)?;
        if self.tasks.contains_key(&task.task_id) {
            return Err(GoalError::DuplicateTask {
                task_id: task.task_id,
            }
            .into());
        }
        self.goal(task.goal_id)?;
        for dependency_id in &task.dependencies {
            self.check_edge(task.task_id, task.goal_id, *dependency_id)?;
        }

        let task_id = task.task_id;
        events.push(("task.created", Event::new(EventKind::TaskCreated, to_payload(&task))));
        self.stamp_seq(task_id);
        self.tasks.insert(task_id, task);
        Ok(task_id)
    }
}

/// Serialized record for an event payload. Records are plain data, so this
/// only yields `Null` if serde_json itself gives up.
fn to_payload<T: serde::Serialize>(record: &T) -> serde_json::Value {
    serde_json::to_value(record).unwrap_or_default()
}

fn status_event(goal_id: EntityId, from: GoalStatus, to: GoalStatus) -> Event {
    Event::new(
        EventKind::GoalStatusChanged,
        json!({ "goal_id": goal_id, "from": from, "to": to }),
    )
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Goals, their tasks and the dependency graph between those tasks.
///
/// Assignment consults the [`AgentDirectory`]; lifecycle changes are
/// published on the [`EventBus`] under `goal.*` and `task.*` topics once
/// the orchestrator's lock is released.
pub struct Orchestrator {
    config: GoalsConfig,
    directory: Arc<AgentDirectory>,
    bus: Arc<EventBus>,
    book: RwLock<GoalBook>,
}

impl Orchestrator {
    pub fn new(directory: Arc<AgentDirectory>, bus: Arc<EventBus>, config: GoalsConfig) -> Self {
        tracing::info!(
            auto_start = config.progress_policy.auto_start,
            auto_complete = config.progress_policy.auto_complete,
            auto_block = config.progress_policy.auto_block,
            "Goal orchestrator initialized"
        );
        Self {
            config,
            directory,
            bus,
            book: RwLock::new(GoalBook::default()),
        }
    }

    pub fn directory(&self) -> &Arc<AgentDirectory> {
        &self.directory
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    fn read(&self) -> ConcordResult<RwLockReadGuard<'_, GoalBook>> {
        self.book
            .read()
            .map_err(|_| ConcordError::lock_poisoned("goal_book"))
    }

    fn write(&self) -> ConcordResult<RwLockWriteGuard<'_, GoalBook>> {
        self.book
            .write()
            .map_err(|_| ConcordError::lock_poisoned("goal_book"))
    }

    /// Publish events collected under the lock. Call only after the guard
    /// has been dropped so handlers may call back into the orchestrator.
    fn emit(&self, events: Vec<(&'static str, Event)>) {
        for (topic, event) in events {
            let report = self.bus.publish(topic, &event);
            if !report.is_clean() {
                tracing::warn!(
                    topic,
                    failures = report.failures.len(),
                    "Goal event handlers failed"
                );
            }
        }
    }

    // ------------------------------------------------------------------------
    // Goals
    // ------------------------------------------------------------------------

    pub fn create_goal(&self, goal: Goal) -> ConcordResult<EntityId> {
        goal.validate()?;
        let goal_id = goal.goal_id;
        let event = {
            let mut book = self.write()?;
            if book.goals.contains_key(&goal_id) {
                return Err(GoalError::DuplicateGoal { goal_id }.into());
            }
            if let Some(parent_id) = goal.parent_goal_id {
                book.goal(parent_id)?;
            }
            let event = Event::new(EventKind::GoalCreated, to_payload(&goal));
            book.stamp_seq(goal_id);
            book.goals.insert(goal_id, goal);
            event
        };
        tracing::info!(goal_id = %goal_id, "Goal created");
        self.emit(vec![("goal.created", event)]);
        Ok(goal_id)
    }

    pub fn get_goal(&self, goal_id: EntityId) -> ConcordResult<Goal> {
        self.read()?.goal(goal_id).cloned()
    }

    /// Apply a partial update. A status change must be a legal transition;
    /// nothing leaves a terminal state.
    pub fn update_goal(&self, goal_id: EntityId, update: GoalUpdate) -> ConcordResult<Goal> {
        update.validate()?;
        let now = Utc::now();
        let (goal, previous) = {
            let mut book = self.write()?;
            let goal = book.goal_mut(goal_id)?;
            let previous = update.apply(goal, now)?;
            (goal.clone(), previous)
        };

        let mut events = vec![("goal.updated", Event::new(EventKind::GoalUpdated, to_payload(&goal)))];
        if let Some(from) = previous {
            tracing::info!(goal_id = %goal_id, from = %from, to = %goal.status, "Goal status changed");
            events.push(("goal.status_changed", status_event(goal_id, from, goal.status)));
        }
        self.emit(events);
        Ok(goal)
    }

    /// Remove a goal and all of its tasks. Child goals are kept and become
    /// top-level.
    pub fn delete_goal(&self, goal_id: EntityId) -> ConcordResult<Goal> {
        let (goal, removed_tasks) = {
            let mut book = self.write()?;
            let Some(goal) = book.goals.remove(&goal_id) else {
                tracing::warn!(goal_id = %goal_id, "Delete of unknown goal");
                return Err(GoalError::GoalNotFound { goal_id }.into());
            };
            let task_ids: Vec<EntityId> = book
                .tasks
                .values()
                .filter(|t| t.goal_id == goal_id)
                .map(|t| t.task_id)
                .collect();
            for task_id in &task_ids {
                book.tasks.remove(task_id);
                book.seq.remove(task_id);
            }
            book.seq.remove(&goal_id);
            for child in book.goals.values_mut() {
                if child.parent_goal_id == Some(goal_id) {
                    child.parent_goal_id = None;
                }
            }
            (goal, task_ids.len())
        };
        tracing::info!(goal_id = %goal_id, removed_tasks, "Goal deleted");
        self.emit(vec![("goal.deleted", Event::new(EventKind::GoalDeleted, to_payload(&goal)))]);
        Ok(goal)
    }

    /// Goals not yet completed, failed or cancelled, in creation order.
    pub fn active_goals(&self) -> ConcordResult<Vec<Goal>> {
        Ok(self.read()?.sorted_goals(Goal::is_active))
    }

    pub fn child_goals(&self, parent_goal_id: EntityId) -> ConcordResult<Vec<Goal>> {
        Ok(self
            .read()?
            .sorted_goals(|g| g.parent_goal_id == Some(parent_goal_id)))
    }

    /// Every goal, in creation order.
    pub fn goals(&self) -> ConcordResult<Vec<Goal>> {
        Ok(self.read()?.sorted_goals(|_| true))
    }

    // ------------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------------

    /// Add a task to its goal. Every dependency must be an existing task of
    /// the same goal, and the new edges must keep the graph acyclic.
    pub fn create_task(&self, task: Task) -> ConcordResult<EntityId> {
        let mut events = Vec::new();
        let task_id = {
            let mut book = self.write()?;
            book.insert_task(task, &mut events)?
        };
        tracing::debug!(task_id = %task_id, "Task created");
        self.emit(events);
        Ok(task_id)
    }

    pub fn get_task(&self, task_id: EntityId) -> ConcordResult<Task> {
        self.read()?.task(task_id).cloned()
    }

    pub fn update_task(&self, task_id: EntityId, update: TaskUpdate) -> ConcordResult<Task> {
        update.validate()?;
        let now = Utc::now();
        let (task, previous) = {
            let mut book = self.write()?;
            let task = book.task_mut(task_id)?;
            let previous = update.apply(task, now)?;
            (task.clone(), previous)
        };
        if let Some(from) = previous {
            tracing::debug!(task_id = %task_id, from = %from, to = %task.status, "Task status changed");
        }
        self.emit(vec![("task.updated", Event::new(EventKind::TaskUpdated, to_payload(&task)))]);
        Ok(task)
    }

    /// Make `task_id` depend on `dependency_id`.
    pub fn add_dependency(&self, task_id: EntityId, dependency_id: EntityId) -> ConcordResult<Task> {
        let task = {
            let mut book = self.write()?;
            let goal_id = book.task(task_id)?.goal_id;
            book.check_edge(task_id, goal_id, dependency_id)?;
            let task = book.task_mut(task_id)?;
            if !task.dependencies.contains(&dependency_id) {
                task.dependencies.push(dependency_id);
            }
            task.clone()
        };
        self.emit(vec![("task.updated", Event::new(EventKind::TaskUpdated, to_payload(&task)))]);
        Ok(task)
    }

    /// Execution order for `task_id`: every transitive dependency first,
    /// `task_id` last. Independent tasks keep their creation order.
    pub fn resolve_dependencies(&self, task_id: EntityId) -> ConcordResult<Vec<EntityId>> {
        let book = self.read()?;
        book.task(task_id)?;
        topological_order(&book.tasks, &book.seq, task_id)
    }

    /// Create one dependency-free task per title. A pending goal becomes
    /// planned.
    pub fn decompose_goal<S: AsRef<str>>(
        &self,
        goal_id: EntityId,
        titles: &[S],
    ) -> ConcordResult<Vec<EntityId>> {
        for title in titles {
            validate_title(title.as_ref())?;
        }
        let now = Utc::now();
        let mut events = Vec::new();
        let task_ids = {
            let mut book = self.write()?;
            book.goal(goal_id)?;
            let mut task_ids = Vec::with_capacity(titles.len());
            for title in titles {
                let id = book.insert_task(Task::new(goal_id, title.as_ref()), &mut events)?;
                task_ids.push(id);
            }
            let goal = book.goal_mut(goal_id)?;
            if goal.status == GoalStatus::Pending {
                if let Some(from) = goal.transition(GoalStatus::Planned, now)? {
                    events.push((
                        "goal.status_changed",
                        status_event(goal_id, from, GoalStatus::Planned),
                    ));
                }
            }
            task_ids
        };
        tracing::info!(goal_id = %goal_id, tasks = task_ids.len(), "Goal decomposed");
        self.emit(events);
        Ok(task_ids)
    }

    /// Set the assignee without touching the task's status.
    pub fn assign_task(&self, task_id: EntityId, agent_id: EntityId) -> ConcordResult<Task> {
        if !self.directory.is_registered(agent_id)? {
            tracing::warn!(agent_id = %agent_id, task_id = %task_id, "Assignment to unknown agent");
            return Err(AgentError::NotRegistered { agent_id }.into());
        }
        let task = {
            let mut book = self.write()?;
            let task = book.task_mut(task_id)?;
            task.assigned_agent_id = Some(agent_id);
            task.clone()
        };
        tracing::debug!(task_id = %task_id, agent_id = %agent_id, "Task assigned");
        self.emit(vec![("task.assigned", Event::new(EventKind::TaskAssigned, to_payload(&task)).with_source(agent_id))]);
        Ok(task)
    }

    /// Assign to the registered agent offering `capability` with the fewest
    /// unfinished tasks; ties go to the earliest registered.
    pub fn assign_by_capability(&self, task_id: EntityId, capability: &str) -> ConcordResult<EntityId> {
        let candidates = self.directory.find_by_capability(capability)?;
        let (task, agent_id) = {
            let mut book = self.write()?;
            book.task(task_id)?;
            let load = |agent_id: EntityId| {
                book.tasks
                    .values()
                    .filter(|t| t.assigned_agent_id == Some(agent_id) && !t.is_finished())
                    .count()
            };
            let Some(agent_id) = candidates
                .iter()
                .map(|agent| agent.agent_id)
                .min_by_key(|id| load(*id))
            else {
                return Err(AgentError::NoCapableAgent {
                    capability: capability.to_string(),
                }
                .into());
            };
            let task = book.task_mut(task_id)?;
            task.assigned_agent_id = Some(agent_id);
            (task.clone(), agent_id)
        };
        tracing::debug!(task_id = %task_id, agent_id = %agent_id, capability, "Task assigned by capability");
        self.emit(vec![("task.assigned", Event::new(EventKind::TaskAssigned, to_payload(&task)).with_source(agent_id))]);
        Ok(agent_id)
    }

    /// Tasks of a goal, in creation order.
    pub fn goal_tasks(&self, goal_id: EntityId) -> ConcordResult<Vec<Task>> {
        Ok(self.read()?.sorted_tasks(|t| t.goal_id == goal_id))
    }

    pub fn agent_tasks(&self, agent_id: EntityId) -> ConcordResult<Vec<Task>> {
        Ok(self
            .read()?
            .sorted_tasks(|t| t.assigned_agent_id == Some(agent_id)))
    }

    /// Every task, in creation order.
    pub fn tasks(&self) -> ConcordResult<Vec<Task>> {
        Ok(self.read()?.sorted_tasks(|_| true))
    }

    /// Pending or planned tasks of a goal whose dependencies have all
    /// completed.
    pub fn ready_tasks(&self, goal_id: EntityId) -> ConcordResult<Vec<Task>> {
        let book = self.read()?;
        book.goal(goal_id)?;
        Ok(book.sorted_tasks(|t| {
            t.goal_id == goal_id
                && matches!(t.status, GoalStatus::Pending | GoalStatus::Planned)
                && t.dependencies.iter().all(|dep| {
                    book.tasks
                        .get(dep)
                        .is_some_and(|d| d.status == GoalStatus::Completed)
                })
        }))
    }

    // ------------------------------------------------------------------------
    // Progress
    // ------------------------------------------------------------------------

    /// Recount a goal's tasks and apply the configured progress policy.
    ///
    /// Terminal goals are never moved. Otherwise, with the default policy,
    /// the goal completes once every task has completed and starts once any
    /// task has left `pending`. With `auto_block`, an in-progress goal
    /// blocks while every unfinished task is blocked and resumes once one
    /// is not.
    pub fn calculate_progress(&self, goal_id: EntityId) -> ConcordResult<ProgressInfo> {
        let policy = self.config.progress_policy;
        let now = Utc::now();
        let mut events = Vec::new();
        let info = {
            let mut book = self.write()?;
            let status = book.goal(goal_id)?.status;
            let tasks: Vec<&Task> = book.tasks.values().filter(|t| t.goal_id == goal_id).collect();
            let mut info = ProgressInfo::tally(goal_id, status, tasks.iter().copied());

            let any_started = tasks.iter().any(|t| t.status != GoalStatus::Pending);
            let unfinished: Vec<&&Task> = tasks.iter().filter(|t| !t.is_finished()).collect();
            let all_blocked = !unfinished.is_empty()
                && unfinished.iter().all(|t| t.status == GoalStatus::Blocked);

            let next = if status.is_terminal() {
                None
            } else if policy.auto_complete && info.is_complete() {
                Some(GoalStatus::Completed)
            } else if policy.auto_block && status == GoalStatus::InProgress && all_blocked {
                Some(GoalStatus::Blocked)
            } else if policy.auto_block && status == GoalStatus::Blocked && !all_blocked {
                Some(GoalStatus::InProgress)
            } else if policy.auto_start
                && matches!(status, GoalStatus::Pending | GoalStatus::Planned)
                && any_started
            {
                Some(GoalStatus::InProgress)
            } else {
                None
            };

            // Sort the id lists into creation order for stable output.
            info.completed_task_ids.sort_by_key(|id| book.order(id));
            info.blocked_task_ids.sort_by_key(|id| book.order(id));

            if let Some(next) = next {
                let goal = book.goal_mut(goal_id)?;
                if let Some(from) = goal.transition(next, now)? {
                    tracing::info!(goal_id = %goal_id, from = %from, to = %next, "Goal status changed by progress");
                    events.push(("goal.status_changed", status_event(goal_id, from, next)));
                    info.goal_status = next;
                }
            }
            info
        };
        self.emit(events);
        Ok(info)
    }

    /// Drive a goal's status from a manually reported percentage.
    ///
    /// `0` leaves the goal alone, anything below `100` starts a pending or
    /// planned goal, and `100` completes it. Terminal goals are left as
    /// they are.
    pub fn update_progress(&self, goal_id: EntityId, percent: f64) -> ConcordResult<Goal> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(ValidationError::InvalidValue {
                field: "progress".to_string(),
                reason: format!("{} is outside 0-100", percent),
            }
            .into());
        }
        let now = Utc::now();
        let mut events = Vec::new();
        let goal = {
            let mut book = self.write()?;
            let goal = book.goal_mut(goal_id)?;
            let status = goal.status;
            let next = if status.is_terminal() || percent == 0.0 {
                None
            } else if percent < 100.0 {
                matches!(status, GoalStatus::Pending | GoalStatus::Planned)
                    .then_some(GoalStatus::InProgress)
            } else {
                Some(GoalStatus::Completed)
            };
            if let Some(next) = next {
                if let Some(from) = goal.transition(next, now)? {
                    tracing::info!(goal_id = %goal_id, percent, from = %from, to = %next, "Goal status changed by reported progress");
                    events.push(("goal.status_changed", status_event(goal_id, from, next)));
                }
            }
            goal.clone()
        };
        self.emit(events);
        Ok(goal)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Random DAGs (edges only to earlier tasks) resolve with every
        /// dependency before its dependent, and any back edge is rejected.
        #[test]
        fn prop_resolution_respects_dependencies(
            edges in proptest::collection::vec(proptest::collection::vec(any::<prop::sample::Index>(), 0..3), 1..10),
            back in any::<prop::sample::Index>(),
        ) {
            let fail = |e: ConcordError| TestCaseError::fail(e.to_string());
            let orch = Orchestrator::new(
                Arc::new(AgentDirectory::default()),
                Arc::new(EventBus::default()),
                GoalsConfig::default(),
            );
            let g = orch.create_goal(Goal::new("g")).map_err(fail)?;
            let mut ids: Vec<EntityId> = Vec::new();
            for picks in &edges {
                let deps: Vec<EntityId> = if ids.is_empty() {
                    Vec::new()
                } else {
                    picks.iter().map(|i| ids[i.index(ids.len())]).collect()
                };
                let id = orch.create_task(Task::new(g, "t").with_dependencies(deps)).map_err(fail)?;
                ids.push(id);
            }

            let last = ids[ids.len() - 1];
            let order = orch.resolve_dependencies(last).map_err(fail)?;
            prop_assert_eq!(order.last().copied(), Some(last));
            for (pos, id) in order.iter().enumerate() {
                let task = orch.get_task(*id).map_err(fail)?;
                for dep in &task.dependencies {
                    let dep_pos = order.iter().position(|x| x == dep);
                    prop_assert!(dep_pos.is_some_and(|p| p < pos));
                }
            }

            // Pointing an ancestor of `last` back at `last` closes a cycle.
            let ancestor = order[back.index(order.len())];
            if ancestor != last {
                let rejected = matches!(
                    orch.add_dependency(ancestor, last),
                    Err(ConcordError::Goal(GoalError::CyclicDependency { .. }))
                );
                prop_assert!(rejected);
            }
        }
    }
}
