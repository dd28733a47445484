//! The context store.

use crate::entry::{ContextEntry, ContextQuery, ContextScope, ScopeKind, WriteOptions};
use crate::merge::{JsonMerger, ValueMerger};
use chrono::Utc;
use concord_core::{
    ConcordError, ConcordResult, ConflictStrategy, ContextConfig, ContextError, EntityId, Event,
    EventKind, TopicPattern, ValidationError,
};
use concord_events::{EventBus, HandlerError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

type SlotKey = (ContextScope, String);

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<SlotKey, ContextEntry>,
    /// Superseded versions per slot, oldest first.
    history: HashMap<SlotKey, VecDeque<ContextEntry>>,
}

impl StoreState {
    /// Remove a slot's live entry together with its history.
    fn evict(&mut self, slot: &SlotKey) -> Option<ContextEntry> {
        self.history.remove(slot);
        self.entries.remove(slot)
    }

    /// Evict every slot whose entry fails `keep`. Returns how many went.
    fn evict_where<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&SlotKey, &ContextEntry) -> bool,
    {
        let doomed: Vec<SlotKey> = self
            .entries
            .iter()
            .filter(|(slot, entry)| !keep(*slot, *entry))
            .map(|(slot, _)| slot.clone())
            .collect();
        for slot in &doomed {
            self.evict(slot);
        }
        doomed.len()
    }
}

/// Versioned, scoped key/value store shared across agents.
///
/// One coarse lock guards all entries. Subscriber callbacks run after the
/// lock is released, so a callback may read or write the store.
pub struct ContextStore {
    config: ContextConfig,
    state: RwLock<StoreState>,
    bus: Arc<EventBus>,
    merger: Arc<dyn ValueMerger>,
}

impl ContextStore {
    /// Store with its own private event bus.
    pub fn new(config: ContextConfig) -> Self {
        tracing::info!(
            strategy = config.conflict_strategy.as_db_str(),
            max_history = config.max_history,
            "Context store initialized"
        );
        Self {
            config,
            state: RwLock::new(StoreState::default()),
            bus: Arc::new(EventBus::default()),
            merger: Arc::new(JsonMerger),
        }
    }

    /// Publish writes on a shared bus instead of a private one.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Replace the combinator used by the merge strategy.
    pub fn with_merger<M>(mut self, merger: M) -> Self
    where
        M: ValueMerger + 'static,
    {
        self.merger = Arc::new(merger);
        self
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.config.conflict_strategy
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    fn read(&self) -> ConcordResult<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| ConcordError::lock_poisoned("context_store"))
    }

    fn write(&self) -> ConcordResult<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| ConcordError::lock_poisoned("context_store"))
    }

    /// Live entry for `key` in `scope`. An expired entry is purged and
    /// reported as absent.
    pub fn get(&self, key: &str, scope: ContextScope) -> ConcordResult<Option<ContextEntry>> {
        let slot = (scope, key.to_string());
        {
            let state = self.read()?;
            match state.entries.get(&slot) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.clone())),
                Some(_) => {}
            }
        }
        let mut state = self.write()?;
        if state.entries.get(&slot).is_some_and(ContextEntry::is_expired) {
            tracing::debug!(key, scope = %scope, "Context entry expired");
            state.evict(&slot);
        }
        Ok(state.entries.get(&slot).cloned())
    }

    /// Like [`ContextStore::get`] but fails with `Expired` or `NotFound`.
    pub fn require(&self, key: &str, scope: ContextScope) -> ConcordResult<ContextEntry> {
        let slot = (scope, key.to_string());
        let mut state = self.write()?;
        match state.entries.get(&slot) {
            Some(entry) if !entry.is_expired() => Ok(entry.clone()),
            Some(_) => {
                state.evict(&slot);
                Err(ContextError::Expired {
                    key: key.to_string(),
                    scope: scope.to_string(),
                }
                .into())
            }
            None => Err(ContextError::NotFound {
                key: key.to_string(),
                scope: scope.to_string(),
            }
            .into()),
        }
    }

    /// Write with default options.
    pub fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        agent_id: EntityId,
        scope: ContextScope,
    ) -> ConcordResult<ContextEntry> {
        self.set_with(key, value, agent_id, scope, WriteOptions::default())
    }

    /// Write `value` under the configured conflict strategy.
    ///
    /// A supplied `expected_version` that differs from the current version
    /// (0 for a missing key) fails with `VersionConflict` and leaves the
    /// entry untouched, whatever the strategy. Under `VersionCheck` an
    /// overwrite without `expected_version` fails with
    /// `MissingExpectedVersion`.
    pub fn set_with(
        &self,
        key: &str,
        value: serde_json::Value,
        agent_id: EntityId,
        scope: ContextScope,
        options: WriteOptions,
    ) -> ConcordResult<ContextEntry> {
        let slot = (scope, key.to_string());
        let now = Utc::now();
        let written = {
            let mut state = self.write()?;
            if state.entries.get(&slot).is_some_and(|e| e.is_expired_at(now)) {
                state.evict(&slot);
            }
            let existing = state.entries.get(&slot);
            let current_version = existing.map_or(0, |e| e.version);

            if let Some(expected) = options.expected_version {
                if expected != current_version {
                    tracing::debug!(
                        key,
                        expected,
                        actual = current_version,
                        "Context version conflict"
                    );
                    return Err(ContextError::VersionConflict {
                        key: key.to_string(),
                        expected,
                        actual: current_version,
                    }
                    .into());
                }
            } else if existing.is_some()
                && self.config.conflict_strategy == ConflictStrategy::VersionCheck
            {
                return Err(ContextError::MissingExpectedVersion {
                    key: key.to_string(),
                    current: current_version,
                }
                .into());
            }

            let expires_at = options.expiry(self.config.default_ttl_ms, now);
            let entry = match existing {
                None => ContextEntry {
                    expires_at,
                    metadata: options.metadata,
                    timestamp: now,
                    ..ContextEntry::new(scope, key, value, agent_id)
                },
                Some(previous) => {
                    let value = match self.config.conflict_strategy {
                        ConflictStrategy::Merge => self.merger.merge(&previous.value, &value),
                        ConflictStrategy::LastWriteWins | ConflictStrategy::VersionCheck => value,
                    };
                    ContextEntry {
                        entry_id: previous.entry_id,
                        scope,
                        key: key.to_string(),
                        value,
                        agent_id,
                        version: previous.version + 1,
                        timestamp: now,
                        expires_at,
                        metadata: options.metadata,
                    }
                }
            };

            if let Some(previous) = state.entries.insert(slot.clone(), entry.clone()) {
                let history = state.history.entry(slot).or_default();
                history.push_back(previous);
                while history.len() > self.config.max_history {
                    history.pop_front();
                }
            }
            entry
        };

        tracing::debug!(
            key,
            scope = %written.scope,
            version = written.version,
            agent_id = %agent_id,
            "Context entry written"
        );
        self.publish_write(&written);
        Ok(written)
    }

    fn publish_write(&self, entry: &ContextEntry) {
        match serde_json::to_value(entry) {
            Ok(payload) => {
                let event =
                    Event::new(EventKind::ContextWritten, payload).with_source(entry.agent_id);
                self.bus.publish(&entry.key, &event);
            }
            Err(e) => {
                tracing::warn!(key = %entry.key, error = %e, "Context entry not publishable");
            }
        }
    }

    /// Remove an entry and its history, returning the entry.
    pub fn delete(&self, key: &str, scope: ContextScope) -> ConcordResult<ContextEntry> {
        let slot = (scope, key.to_string());
        let removed = self.write()?.evict(&slot);
        match removed {
            Some(entry) => {
                tracing::debug!(key, scope = %scope, "Context entry deleted");
                Ok(entry)
            }
            None => Err(ContextError::NotFound {
                key: key.to_string(),
                scope: scope.to_string(),
            }
            .into()),
        }
    }

    /// Live entries whose key matches `pattern`, across all scopes.
    pub fn query(&self, pattern: &str) -> ConcordResult<Vec<ContextEntry>> {
        self.query_scoped(Some(pattern), None, None)
    }

    /// Live entries filtered by key pattern, scope tier and writing agent.
    /// Results are ordered by key, then by write time.
    pub fn query_scoped(
        &self,
        pattern: Option<&str>,
        scope: Option<ScopeKind>,
        agent_id: Option<EntityId>,
    ) -> ConcordResult<Vec<ContextEntry>> {
        self.select(&ContextQuery {
            pattern: pattern.map(str::to_string),
            scope,
            agent_id,
            include_expired: false,
        })
    }

    /// Entries passing every filter of `query`, ordered like
    /// [`ContextStore::query_scoped`]. Expired entries not yet purged are
    /// returned only when the query asks for them.
    pub fn select(&self, query: &ContextQuery) -> ConcordResult<Vec<ContextEntry>> {
        let pattern = query.pattern.as_deref().map(TopicPattern::new);
        let now = Utc::now();
        let state = self.read()?;
        let mut results: Vec<ContextEntry> = state
            .entries
            .values()
            .filter(|e| query.include_expired || !e.is_expired_at(now))
            .filter(|e| query.scope.map_or(true, |kind| e.scope.kind() == kind))
            .filter(|e| query.agent_id.map_or(true, |id| e.agent_id == id))
            .filter(|e| pattern.as_ref().map_or(true, |p| p.matches(&e.key)))
            .cloned()
            .collect();
        results.sort_by(|a, b| a.key.cmp(&b.key).then(a.timestamp.cmp(&b.timestamp)));
        Ok(results)
    }

    /// Previous versions of an entry, newest first.
    pub fn history(
        &self,
        key: &str,
        scope: ContextScope,
        limit: Option<usize>,
    ) -> ConcordResult<Vec<ContextEntry>> {
        let slot = (scope, key.to_string());
        let state = self.read()?;
        Ok(state
            .history
            .get(&slot)
            .map(|h| {
                h.iter()
                    .rev()
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Remove entries, optionally limited to one scope tier and/or one
    /// writing agent. Returns how many were removed.
    pub fn clear(&self, scope: Option<ScopeKind>, agent_id: Option<EntityId>) -> ConcordResult<usize> {
        let cleared = self.write()?.evict_where(|(slot_scope, _), entry| {
            let scope_hit = scope.map_or(true, |kind| slot_scope.kind() == kind);
            let agent_hit = agent_id.map_or(true, |id| entry.agent_id == id);
            !(scope_hit && agent_hit)
        });
        tracing::info!(cleared, "Cleared context entries");
        Ok(cleared)
    }

    /// Remove every entry living in exactly `scope`, whoever wrote it.
    pub fn clear_scope(&self, scope: ContextScope) -> ConcordResult<usize> {
        let cleared = self
            .write()?
            .evict_where(|(slot_scope, _), _| *slot_scope != scope);
        tracing::info!(cleared, scope = %scope, "Cleared context scope");
        Ok(cleared)
    }

    /// Snapshot of every live entry, for enumeration by outer layers.
    pub fn entries(&self) -> ConcordResult<Vec<ContextEntry>> {
        self.query_scoped(None, None, None)
    }

    /// Drop every expired entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> ConcordResult<usize> {
        let now = Utc::now();
        let purged = self
            .write()?
            .evict_where(|_, entry| !entry.is_expired_at(now));
        if purged > 0 {
            tracing::debug!(purged, "Purged expired context entries");
        }
        Ok(purged)
    }

    /// Number of live entries.
    pub fn len(&self) -> ConcordResult<usize> {
        let now = Utc::now();
        Ok(self
            .read()?
            .entries
            .values()
            .filter(|e| !e.is_expired_at(now))
            .count())
    }

    pub fn is_empty(&self) -> ConcordResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Reconcile several versions of one key into a single entry without
    /// touching the store.
    ///
    /// - last-write-wins: the newest entry
    /// - version-check: the highest version
    /// - merge: values folded oldest to newest with the store's combinator
    ///   when they are all objects or all arrays, otherwise the newest entry
    pub fn merge_entries(
        &self,
        entries: &[ContextEntry],
        strategy: Option<ConflictStrategy>,
    ) -> ConcordResult<ContextEntry> {
        let Some(first) = entries.first() else {
            return Err(ValidationError::RequiredFieldMissing {
                field: "entries".to_string(),
            }
            .into());
        };
        if entries.iter().any(|e| e.key != first.key) {
            return Err(ValidationError::InvalidValue {
                field: "key".to_string(),
                reason: "cannot merge entries with different keys".to_string(),
            }
            .into());
        }

        let newest = entries
            .iter()
            .max_by_key(|e| e.timestamp)
            .unwrap_or(first);

        match strategy.unwrap_or(self.config.conflict_strategy) {
            ConflictStrategy::LastWriteWins => Ok(newest.clone()),
            ConflictStrategy::VersionCheck => Ok(entries
                .iter()
                .max_by_key(|e| e.version)
                .unwrap_or(first)
                .clone()),
            ConflictStrategy::Merge => {
                let all_objects = entries.iter().all(|e| e.value.is_object());
                let all_arrays = entries.iter().all(|e| e.value.is_array());
                if !(all_objects || all_arrays) {
                    tracing::warn!(key = %first.key, "Cannot merge mixed values, using last write");
                    return Ok(newest.clone());
                }
                let mut ordered: Vec<&ContextEntry> = entries.iter().collect();
                ordered.sort_by_key(|e| e.timestamp);
                let mut value = ordered[0].value.clone();
                for entry in &ordered[1..] {
                    value = self.merger.merge(&value, &entry.value);
                }
                let merged_from: Vec<serde_json::Value> = ordered
                    .iter()
                    .map(|e| serde_json::json!(format!("{}@{}", e.entry_id, e.version)))
                    .collect();
                let mut metadata = newest.metadata.clone();
                metadata.insert("merged_from".to_string(), serde_json::Value::Array(merged_from));
                Ok(ContextEntry {
                    value,
                    version: entries.iter().map(|e| e.version).max().unwrap_or(first.version),
                    metadata,
                    ..newest.clone()
                })
            }
        }
    }

    /// Call `callback` after every write whose key matches `pattern`.
    pub fn subscribe<F>(&self, pattern: &str, callback: F) -> ConcordResult<EntityId>
    where
        F: Fn(&ContextEntry) + Send + Sync + 'static,
    {
        self.bus
            .subscribe(pattern, move |_: &str, event: &Event| -> Result<(), HandlerError> {
                if event.kind != EventKind::ContextWritten {
                    return Ok(());
                }
                let entry: ContextEntry = serde_json::from_value(event.payload.clone())
                    .map_err(|e| HandlerError::new(e.to_string()))?;
                callback(&entry);
                Ok(())
            })
    }

    pub fn unsubscribe(&self, subscription_id: EntityId) -> ConcordResult<()> {
        self.bus.unsubscribe(subscription_id)
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("config", &self.config)
            .field("entries", &self.len().unwrap_or(0))
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use concord_core::new_entity_id;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Under version-check, a write naming any version other than the
        /// current one fails and leaves value and version unchanged.
        #[test]
        fn prop_stale_version_never_mutates(
            writes in 1u64..8,
            stale in 0u64..16,
            payload in any::<i64>(),
        ) {
            let store = ContextStore::new(ContextConfig {
                conflict_strategy: ConflictStrategy::VersionCheck,
                ..ContextConfig::default()
            });
            let agent = new_entity_id();
            let fail = |e: ConcordError| TestCaseError::fail(e.to_string());
            for n in 0..writes {
                store
                    .set_with("k", json!(n), agent, ContextScope::Global,
                        WriteOptions::new().expect_version(n))
                    .map_err(fail)?;
            }
            prop_assume!(stale != writes);

            let before = store.require("k", ContextScope::Global).map_err(fail)?;
            let result = store.set_with("k", json!(payload), agent, ContextScope::Global,
                WriteOptions::new().expect_version(stale));
            let is_conflict = matches!(
                result,
                Err(ConcordError::Context(ContextError::VersionConflict { .. }))
            );
            prop_assert!(is_conflict);
            let after = store.require("k", ContextScope::Global).map_err(fail)?;
            prop_assert_eq!(before, after);
        }
    }
}
