use crate::entry::{ContextEntry, ContextScope};
use crate::store::ContextStore;
use concord_core::{ConcordResult, EntityId, ValidationError};
use std::sync::Arc;

/// One agent's view of a shared [`ContextStore`].
///
/// Writes are attributed to the agent. Agent-scoped keys resolve to the
/// agent's own scope, task-scoped keys to the bound task.
#[derive(Debug, Clone)]
pub struct AgentContext {
    store: Arc<ContextStore>,
    agent_id: EntityId,
    task_id: Option<EntityId>,
}

impl AgentContext {
    pub fn new(store: Arc<ContextStore>, agent_id: EntityId) -> Self {
        Self {
            store,
            agent_id,
            task_id: None,
        }
    }

    /// Bind the view to a task so the task-scope helpers work.
    pub fn with_task(mut self, task_id: EntityId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn agent_id(&self) -> EntityId {
        self.agent_id
    }

    pub fn task_id(&self) -> Option<EntityId> {
        self.task_id
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Global entries, this agent's own scope and the bound task's scope.
    pub fn can_see(&self, scope: &ContextScope) -> bool {
        visible_to(scope, self.agent_id, self.task_id)
    }

    fn task_scope(&self) -> ConcordResult<ContextScope> {
        self.task_id
            .map(ContextScope::Task)
            .ok_or_else(|| {
                ValidationError::RequiredFieldMissing {
                    field: "task_id".to_string(),
                }
                .into()
            })
    }

    pub fn set_global(&self, key: &str, value: serde_json::Value) -> ConcordResult<ContextEntry> {
        self.store.set(key, value, self.agent_id, ContextScope::Global)
    }

    pub fn get_global(&self, key: &str) -> ConcordResult<Option<serde_json::Value>> {
        Ok(self.store.get(key, ContextScope::Global)?.map(|e| e.value))
    }

    pub fn set_agent(&self, key: &str, value: serde_json::Value) -> ConcordResult<ContextEntry> {
        self.store
            .set(key, value, self.agent_id, ContextScope::Agent(self.agent_id))
    }

    pub fn get_agent(&self, key: &str) -> ConcordResult<Option<serde_json::Value>> {
        Ok(self
            .store
            .get(key, ContextScope::Agent(self.agent_id))?
            .map(|e| e.value))
    }

    pub fn set_task(&self, key: &str, value: serde_json::Value) -> ConcordResult<ContextEntry> {
        let scope = self.task_scope()?;
        self.store.set(key, value, self.agent_id, scope)
    }

    pub fn get_task(&self, key: &str) -> ConcordResult<Option<serde_json::Value>> {
        let scope = self.task_scope()?;
        Ok(self.store.get(key, scope)?.map(|e| e.value))
    }

    /// Entries this agent can see: global, its own scope, and its task's
    /// scope when bound.
    pub fn query(&self, pattern: &str) -> ConcordResult<Vec<ContextEntry>> {
        let mut visible = self
            .store
            .query(pattern)?
            .into_iter()
            .filter(|e| self.can_see(&e.scope))
            .collect::<Vec<_>>();
        visible.sort_by(|a, b| a.key.cmp(&b.key).then(a.timestamp.cmp(&b.timestamp)));
        Ok(visible)
    }

    /// Watch writes this agent can see; other agents' private writes and
    /// writes to unbound tasks are filtered out.
    pub fn subscribe<F>(&self, pattern: &str, callback: F) -> ConcordResult<EntityId>
    where
        F: Fn(&ContextEntry) + Send + Sync + 'static,
    {
        let (agent_id, task_id) = (self.agent_id, self.task_id);
        self.store.subscribe(pattern, move |entry: &ContextEntry| {
            if visible_to(&entry.scope, agent_id, task_id) {
                callback(entry);
            }
        })
    }

    pub fn unsubscribe(&self, subscription_id: EntityId) -> ConcordResult<()> {
        self.store.unsubscribe(subscription_id)
    }

    /// Drop everything in this agent's private scope.
    pub fn clear_own(&self) -> ConcordResult<usize> {
        self.store.clear_scope(ContextScope::Agent(self.agent_id))
    }
}

fn visible_to(scope: &ContextScope, agent_id: EntityId, task_id: Option<EntityId>) -> bool {
    match *scope {
        ContextScope::Global => true,
        ContextScope::Agent(id) => id == agent_id,
        ContextScope::Task(id) => Some(id) == task_id,
    }
}
