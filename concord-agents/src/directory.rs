//! Agent directory: identity, capabilities and heartbeat health.

use crate::agent::{Agent, AgentStatus};
use chrono::Utc;
use concord_core::{
    millis, AgentError, ConcordError, ConcordResult, DirectoryConfig, EntityId,
};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct DirectoryState {
    agents: HashMap<EntityId, Agent>,
    /// Registration order; ids are removed on deregistration.
    order: Vec<EntityId>,
}

impl DirectoryState {
    fn ordered(&self) -> impl Iterator<Item = &Agent> {
        self.order.iter().filter_map(|id| self.agents.get(id))
    }
}

/// Registry of live agents.
///
/// Staleness detection is advisory: [`AgentDirectory::get_stale`] reports and
/// flags silent agents but never removes them.
#[derive(Debug)]
pub struct AgentDirectory {
    config: DirectoryConfig,
    state: RwLock<DirectoryState>,
}

impl AgentDirectory {
    pub fn new(config: DirectoryConfig) -> Self {
        tracing::info!(
            heartbeat_timeout_ms = config.heartbeat_timeout_ms,
            "Agent directory initialized"
        );
        Self {
            config,
            state: RwLock::new(DirectoryState::default()),
        }
    }

    fn read(&self) -> ConcordResult<RwLockReadGuard<'_, DirectoryState>> {
        self.state
            .read()
            .map_err(|_| ConcordError::lock_poisoned("directory"))
    }

    fn write(&self) -> ConcordResult<RwLockWriteGuard<'_, DirectoryState>> {
        self.state
            .write()
            .map_err(|_| ConcordError::lock_poisoned("directory"))
    }

    /// Register an agent. It becomes `Active` with a fresh heartbeat.
    pub fn register(&self, mut agent: Agent) -> ConcordResult<EntityId> {
        let mut state = self.write()?;
        let agent_id = agent.agent_id;
        if state.agents.contains_key(&agent_id) {
            return Err(AgentError::DuplicateAgent { agent_id }.into());
        }
        agent.status = AgentStatus::Active;
        agent.heartbeat();
        tracing::info!(
            agent_id = %agent_id,
            name = %agent.name,
            capabilities = ?agent.capabilities,
            "Agent registered"
        );
        state.agents.insert(agent_id, agent);
        state.order.push(agent_id);
        Ok(agent_id)
    }

    /// Remove an agent, returning its final record.
    pub fn deregister(&self, agent_id: EntityId) -> ConcordResult<Agent> {
        let mut state = self.write()?;
        let Some(mut agent) = state.agents.remove(&agent_id) else {
            tracing::warn!(agent_id = %agent_id, "Deregister of unknown agent");
            return Err(AgentError::NotRegistered { agent_id }.into());
        };
        state.order.retain(|id| *id != agent_id);
        agent.status = AgentStatus::Deregistered;
        tracing::info!(agent_id = %agent_id, name = %agent.name, "Agent deregistered");
        Ok(agent)
    }

    pub fn get(&self, agent_id: EntityId) -> ConcordResult<Option<Agent>> {
        Ok(self.read()?.agents.get(&agent_id).cloned())
    }

    pub fn is_registered(&self, agent_id: EntityId) -> ConcordResult<bool> {
        Ok(self.read()?.agents.contains_key(&agent_id))
    }

    /// All registered agents in registration order.
    pub fn agents(&self) -> ConcordResult<Vec<Agent>> {
        Ok(self.read()?.ordered().cloned().collect())
    }

    pub fn len(&self) -> ConcordResult<usize> {
        Ok(self.read()?.agents.len())
    }

    pub fn is_empty(&self) -> ConcordResult<bool> {
        Ok(self.read()?.agents.is_empty())
    }

    pub fn update_status(&self, agent_id: EntityId, status: AgentStatus) -> ConcordResult<()> {
        let mut state = self.write()?;
        let agent = state
            .agents
            .get_mut(&agent_id)
            .ok_or(AgentError::NotRegistered { agent_id })?;
        agent.status = status;
        tracing::debug!(agent_id = %agent_id, status = ?status, "Agent status updated");
        Ok(())
    }

    /// Agents advertising `capability`, in registration order.
    pub fn find_by_capability(&self, capability: &str) -> ConcordResult<Vec<Agent>> {
        let state = self.read()?;
        let found: Vec<Agent> = state
            .ordered()
            .filter(|agent| agent.has_capability(capability))
            .cloned()
            .collect();
        tracing::debug!(capability, count = found.len(), "Capability lookup");
        Ok(found)
    }

    /// Record a heartbeat. A stale agent becomes active again.
    pub fn heartbeat(&self, agent_id: EntityId) -> ConcordResult<()> {
        let mut state = self.write()?;
        let Some(agent) = state.agents.get_mut(&agent_id) else {
            tracing::warn!(agent_id = %agent_id, "Heartbeat from unknown agent");
            return Err(AgentError::NotRegistered { agent_id }.into());
        };
        agent.heartbeat();
        if agent.status == AgentStatus::Stale {
            agent.status = AgentStatus::Active;
        }
        Ok(())
    }

    /// Agents whose last heartbeat is older than `threshold`. Each returned
    /// agent is marked `Stale` in the directory.
    pub fn get_stale(&self, threshold: chrono::Duration) -> ConcordResult<Vec<Agent>> {
        let now = Utc::now();
        let mut state = self.write()?;
        let DirectoryState { agents, order } = &mut *state;
        let mut stale = Vec::new();
        for id in order.iter() {
            if let Some(agent) = agents.get_mut(id) {
                if agent.silence(now) > threshold {
                    agent.status = AgentStatus::Stale;
                    stale.push(agent.clone());
                }
            }
        }
        if !stale.is_empty() {
            tracing::warn!(count = stale.len(), "Found stale agents");
        }
        Ok(stale)
    }

    /// [`AgentDirectory::get_stale`] with the configured heartbeat timeout.
    pub fn get_stale_default(&self) -> ConcordResult<Vec<Agent>> {
        self.get_stale(millis(self.config.heartbeat_timeout_ms))
    }
}

impl Default for AgentDirectory {
    fn default() -> Self {
        Self::new(DirectoryConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================
