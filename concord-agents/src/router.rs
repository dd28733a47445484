//! Message router: per-agent priority inboxes, kind-based broadcast and a
//! bounded dead-letter queue.

use crate::agent::Agent;
use crate::directory::AgentDirectory;
use crate::message::{AgentMessage, DeadLetter, DeadLetterReason, MessageKind};
use chrono::Utc;
use concord_core::{AgentError, ConcordError, ConcordResult, EntityId, RouterConfig};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Inbox slot. Max-heap order: higher priority first, then earlier arrival.
#[derive(Debug, Clone)]
struct QueuedMessage {
    seq: u64,
    message: AgentMessage,
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedMessage {}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.message
            .priority
            .cmp(&other.message.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct RouterState {
    inboxes: HashMap<EntityId, BinaryHeap<QueuedMessage>>,
    subscriptions: HashMap<MessageKind, Vec<EntityId>>,
    dead_letters: VecDeque<DeadLetter>,
    next_seq: u64,
}

/// Routes [`AgentMessage`]s between agents registered in a shared
/// [`AgentDirectory`].
///
/// Within one inbox messages are totally ordered by (priority desc, arrival
/// asc). There is no ordering across inboxes.
#[derive(Debug)]
pub struct MessageRouter {
    directory: Arc<AgentDirectory>,
    config: RouterConfig,
    state: RwLock<RouterState>,
}

impl MessageRouter {
    pub fn new(directory: Arc<AgentDirectory>, config: RouterConfig) -> Self {
        tracing::info!(
            inbox_capacity = config.inbox_capacity,
            dead_letter_capacity = config.dead_letter_capacity,
            "Message router initialized"
        );
        Self {
            directory,
            config,
            state: RwLock::new(RouterState::default()),
        }
    }

    pub fn directory(&self) -> &Arc<AgentDirectory> {
        &self.directory
    }

    fn read(&self) -> ConcordResult<RwLockReadGuard<'_, RouterState>> {
        self.state
            .read()
            .map_err(|_| ConcordError::lock_poisoned("router"))
    }

    fn write(&self) -> ConcordResult<RwLockWriteGuard<'_, RouterState>> {
        self.state
            .write()
            .map_err(|_| ConcordError::lock_poisoned("router"))
    }

    /// Fails with `NotRegistered` for an unknown id, first discarding any
    /// inbox and subscriptions left behind by a deregistered agent.
    fn require_registered(&self, agent_id: EntityId) -> ConcordResult<()> {
        if self.directory.is_registered(agent_id)? {
            return Ok(());
        }
        let mut state = self.write()?;
        self.forget(&mut state, agent_id);
        Err(AgentError::NotRegistered { agent_id }.into())
    }

    /// Drop the subscriptions and inbox of `agent_id`. Queued messages are
    /// dead-lettered. Returns how many messages were queued.
    fn forget(&self, state: &mut RouterState, agent_id: EntityId) -> usize {
        for subscribers in state.subscriptions.values_mut() {
            subscribers.retain(|id| *id != agent_id);
        }
        state.subscriptions.retain(|_, subscribers| !subscribers.is_empty());
        let Some(inbox) = state.inboxes.remove(&agent_id) else {
            return 0;
        };
        let dropped = inbox.len();
        for queued in inbox.into_sorted_vec().into_iter().rev() {
            self.dead_letter(
                state,
                queued.message,
                DeadLetterReason::RecipientDeregistered,
                Some(agent_id),
            );
        }
        if dropped > 0 {
            tracing::info!(agent_id = %agent_id, dropped, "Discarded inbox of departed agent");
        }
        dropped
    }

    /// Deregister `agent_id` from the shared directory and release its
    /// router state in one step.
    pub fn deregister(&self, agent_id: EntityId) -> ConcordResult<Agent> {
        let agent = self.directory.deregister(agent_id)?;
        let mut state = self.write()?;
        self.forget(&mut state, agent_id);
        Ok(agent)
    }

    fn dead_letter(
        &self,
        state: &mut RouterState,
        message: AgentMessage,
        reason: DeadLetterReason,
        recipient_id: Option<EntityId>,
    ) {
        tracing::warn!(
            message_id = %message.message_id,
            reason = ?reason,
            "Message moved to dead letter queue"
        );
        state.dead_letters.push_back(DeadLetter {
            message,
            reason,
            recipient_id,
            dead_lettered_at: Utc::now(),
        });
        while state.dead_letters.len() > self.config.dead_letter_capacity {
            state.dead_letters.pop_front();
        }
    }

    /// Queue into one inbox. Returns false if the message was dead-lettered.
    fn enqueue(&self, state: &mut RouterState, recipient_id: EntityId, message: AgentMessage) -> bool {
        let queued = state.inboxes.get(&recipient_id).map_or(0, BinaryHeap::len);
        if queued >= self.config.inbox_capacity {
            self.dead_letter(state, message, DeadLetterReason::InboxFull, Some(recipient_id));
            return false;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .inboxes
            .entry(recipient_id)
            .or_default()
            .push(QueuedMessage { seq, message });
        true
    }

    /// Deliver a message. Without a recipient this is a [`broadcast`].
    ///
    /// Returns the number of inboxes the message was queued into; an expired
    /// message is dead-lettered and yields 0.
    ///
    /// [`broadcast`]: MessageRouter::broadcast
    pub fn send(&self, message: AgentMessage) -> ConcordResult<usize> {
        let Some(recipient_id) = message.recipient_id else {
            return self.broadcast(message);
        };
        self.require_registered(recipient_id)?;

        let mut state = self.write()?;
        if message.is_expired() {
            self.dead_letter(&mut state, message, DeadLetterReason::Expired, Some(recipient_id));
            return Ok(0);
        }
        tracing::debug!(
            message_id = %message.message_id,
            sender_id = %message.sender_id,
            recipient_id = %recipient_id,
            kind = ?message.kind,
            priority = ?message.priority,
            "Message queued"
        );
        Ok(usize::from(self.enqueue(&mut state, recipient_id, message)))
    }

    /// Deliver a copy to every agent subscribed to the message's kind,
    /// the sender included when it is subscribed. Subscribers no longer
    /// registered are skipped and their router state released.
    pub fn broadcast(&self, message: AgentMessage) -> ConcordResult<usize> {
        let subscribers = self
            .read()?
            .subscriptions
            .get(&message.kind)
            .cloned()
            .unwrap_or_default();

        let mut recipients = Vec::with_capacity(subscribers.len());
        let mut departed = Vec::new();
        for agent_id in subscribers {
            if self.directory.is_registered(agent_id)? {
                recipients.push(agent_id);
            } else {
                tracing::warn!(agent_id = %agent_id, "Skipping unregistered broadcast subscriber");
                departed.push(agent_id);
            }
        }

        let mut state = self.write()?;
        for agent_id in departed {
            self.forget(&mut state, agent_id);
        }
        if message.is_expired() {
            self.dead_letter(&mut state, message, DeadLetterReason::Expired, None);
            return Ok(0);
        }
        let mut delivered = 0;
        for agent_id in recipients {
            if self.enqueue(&mut state, agent_id, message.clone()) {
                delivered += 1;
            }
        }
        tracing::debug!(
            message_id = %message.message_id,
            kind = ?message.kind,
            delivered,
            "Message broadcast"
        );
        Ok(delivered)
    }

    /// Subscribe a registered agent to broadcasts of the given kinds.
    pub fn subscribe(&self, agent_id: EntityId, kinds: &[MessageKind]) -> ConcordResult<()> {
        self.require_registered(agent_id)?;
        let mut state = self.write()?;
        for kind in kinds {
            let subscribers = state.subscriptions.entry(*kind).or_default();
            if !subscribers.contains(&agent_id) {
                subscribers.push(agent_id);
            }
        }
        tracing::debug!(agent_id = %agent_id, kinds = ?kinds, "Agent subscribed to message kinds");
        Ok(())
    }

    /// Drop every kind subscription of `agent_id` and discard its inbox.
    /// Returns whether the agent had any subscriptions or queued messages.
    pub fn unsubscribe(&self, agent_id: EntityId) -> ConcordResult<bool> {
        let mut state = self.write()?;
        let mut removed = false;
        for subscribers in state.subscriptions.values_mut() {
            let before = subscribers.len();
            subscribers.retain(|id| *id != agent_id);
            removed |= subscribers.len() != before;
        }
        state.subscriptions.retain(|_, subscribers| !subscribers.is_empty());
        if let Some(inbox) = state.inboxes.remove(&agent_id) {
            removed |= !inbox.is_empty();
        }
        tracing::debug!(agent_id = %agent_id, removed, "Agent unsubscribed from all message kinds");
        Ok(removed)
    }

    /// Drain up to `max` messages (all when `None`) in priority order.
    /// Expired messages met along the way are dead-lettered, not returned.
    pub fn get_pending(
        &self,
        agent_id: EntityId,
        max: Option<usize>,
    ) -> ConcordResult<Vec<AgentMessage>> {
        self.require_registered(agent_id)?;
        let limit = max.unwrap_or(usize::MAX);
        let now = Utc::now();

        let mut state = self.write()?;
        let mut messages = Vec::new();
        let mut expired = Vec::new();
        if let Some(inbox) = state.inboxes.get_mut(&agent_id) {
            while messages.len() < limit {
                let Some(queued) = inbox.pop() else { break };
                if queued.message.is_expired_at(now) {
                    expired.push(queued.message);
                } else {
                    messages.push(queued.message);
                }
            }
        }
        for message in expired {
            self.dead_letter(&mut state, message, DeadLetterReason::Expired, Some(agent_id));
        }
        tracing::debug!(agent_id = %agent_id, count = messages.len(), "Retrieved pending messages");
        Ok(messages)
    }

    /// Remove and return the highest-priority pending message in the inbox
    /// of `agent_id` that carries `correlation_id`. Never waits.
    pub fn take_correlated(
        &self,
        agent_id: EntityId,
        correlation_id: EntityId,
    ) -> ConcordResult<Option<AgentMessage>> {
        self.require_registered(agent_id)?;
        let mut state = self.write()?;
        let Some(inbox) = state.inboxes.get_mut(&agent_id) else {
            return Ok(None);
        };
        let mut queued = std::mem::take(inbox).into_sorted_vec();
        // into_sorted_vec is ascending; scan from the back for priority order
        let position = queued
            .iter()
            .rposition(|q| q.message.correlation_id == Some(correlation_id));
        let found = position.map(|i| queued.remove(i).message);
        *inbox = BinaryHeap::from(queued);
        Ok(found)
    }

    /// Snapshot of the dead-letter queue, oldest first.
    pub fn dead_letters(&self) -> ConcordResult<Vec<DeadLetter>> {
        Ok(self.read()?.dead_letters.iter().cloned().collect())
    }

    /// Empty the dead-letter queue, returning how many entries it held.
    pub fn clear_dead_letters(&self) -> ConcordResult<usize> {
        let mut state = self.write()?;
        let count = state.dead_letters.len();
        state.dead_letters.clear();
        tracing::debug!(count, "Dead letter queue cleared");
        Ok(count)
    }

    /// Messages waiting for `agent_id`; always 0 for an unregistered id.
    pub fn pending_count(&self, agent_id: EntityId) -> ConcordResult<usize> {
        if !self.directory.is_registered(agent_id)? {
            let mut state = self.write()?;
            self.forget(&mut state, agent_id);
            return Ok(0);
        }
        Ok(self
            .read()?
            .inboxes
            .get(&agent_id)
            .map_or(0, BinaryHeap::len))
    }
}

// ============================================================================
// TESTS
// ============================================================================
