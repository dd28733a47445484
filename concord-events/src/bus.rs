use crate::handler::EventHandler;
use chrono::Utc;
use concord_core::{
    new_entity_id, ConcordError, ConcordResult, EntityId, Event, EventBusConfig, EventError,
    Timestamp, TopicPattern,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

/// A handler that failed while receiving an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HandlerFailure {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub subscription_id: EntityId,
    pub pattern: String,
    pub topic: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub event_id: EntityId,
    pub error: String,
    /// True when the handler panicked rather than returning an error
    pub panicked: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub failed_at: Timestamp,
}

/// Outcome of one publish.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PublishReport {
    /// Subscriptions whose pattern matched
    pub matched: usize,
    /// Handlers that returned `Ok`
    pub delivered: usize,
    pub failures: Vec<HandlerFailure>,
}

impl PublishReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Subscription {
    id: EntityId,
    pattern: TopicPattern,
    handler: Arc<dyn EventHandler>,
}

/// In-process topic bus.
pub struct EventBus {
    config: EventBusConfig,
    subscriptions: RwLock<Vec<Subscription>>,
    failures: RwLock<VecDeque<HandlerFailure>>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        tracing::info!(
            failure_log_capacity = config.failure_log_capacity,
            "Event bus initialized"
        );
        Self {
            config,
            subscriptions: RwLock::new(Vec::new()),
            failures: RwLock::new(VecDeque::new()),
        }
    }

    /// Register `handler` for every topic matching `pattern`.
    pub fn subscribe<H>(&self, pattern: &str, handler: H) -> ConcordResult<EntityId>
    where
        H: EventHandler + 'static,
    {
        let id = new_entity_id();
        self.subscriptions
            .write()
            .map_err(|_| ConcordError::lock_poisoned("event_bus"))?
            .push(Subscription {
                id,
                pattern: TopicPattern::new(pattern),
                handler: Arc::new(handler),
            });
        tracing::debug!(subscription_id = %id, pattern, "Subscription created");
        Ok(id)
    }

    pub fn unsubscribe(&self, subscription_id: EntityId) -> ConcordResult<()> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .map_err(|_| ConcordError::lock_poisoned("event_bus"))?;
        let Some(index) = subscriptions.iter().position(|s| s.id == subscription_id) else {
            tracing::warn!(subscription_id = %subscription_id, "Subscription not found");
            return Err(EventError::SubscriptionNotFound { subscription_id }.into());
        };
        subscriptions.remove(index);
        tracing::debug!(subscription_id = %subscription_id, "Subscription removed");
        Ok(())
    }

    pub fn subscription_count(&self) -> ConcordResult<usize> {
        Ok(self
            .subscriptions
            .read()
            .map_err(|_| ConcordError::lock_poisoned("event_bus"))?
            .len())
    }

    /// Deliver `event` to every handler whose pattern matches `topic`.
    pub fn publish(&self, topic: &str, event: &Event) -> PublishReport {
        let targets = self.snapshot(|pattern| pattern.matches(topic));
        if targets.is_empty() {
            tracing::debug!(topic, "No handlers for topic");
            return PublishReport::default();
        }
        tracing::debug!(topic, handlers = targets.len(), "Publishing event");
        self.deliver(targets, event, |_| topic.to_string())
    }

    /// Deliver `event` to every subscription whose own pattern is matched by
    /// `pattern`. Each handler receives its subscription pattern as the topic.
    pub fn publish_pattern(&self, pattern: &str, event: &Event) -> PublishReport {
        let query = TopicPattern::new(pattern);
        let targets = self.snapshot(|subscribed| query.matches(subscribed.as_str()));
        if targets.is_empty() {
            tracing::debug!(pattern, "No handlers matching pattern");
            return PublishReport::default();
        }
        self.deliver(targets, event, |subscribed| subscribed.as_str().to_string())
    }

    /// Most recent handler failures, oldest first.
    pub fn recent_failures(&self) -> ConcordResult<Vec<HandlerFailure>> {
        Ok(self
            .failures
            .read()
            .map_err(|_| ConcordError::lock_poisoned("event_bus"))?
            .iter()
            .cloned()
            .collect())
    }

    /// Matching subscriptions, copied out so handlers run without the lock.
    fn snapshot<F>(&self, select: F) -> Vec<(EntityId, TopicPattern, Arc<dyn EventHandler>)>
    where
        F: Fn(&TopicPattern) -> bool,
    {
        // Handlers never run under this lock, so poisoning cannot leave the
        // list half-updated.
        let subscriptions = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        subscriptions
            .iter()
            .filter(|s| select(&s.pattern))
            .map(|s| (s.id, s.pattern.clone(), Arc::clone(&s.handler)))
            .collect()
    }

    fn deliver<T>(
        &self,
        targets: Vec<(EntityId, TopicPattern, Arc<dyn EventHandler>)>,
        event: &Event,
        topic_for: T,
    ) -> PublishReport
    where
        T: Fn(&TopicPattern) -> String,
    {
        let mut report = PublishReport {
            matched: targets.len(),
            ..PublishReport::default()
        };
        for (subscription_id, pattern, handler) in targets {
            let topic = topic_for(&pattern);
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(&topic, event)));
            let (error, panicked) = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(err)) => (err.message, false),
                Err(payload) => (panic_message(payload.as_ref()), true),
            };
            tracing::error!(
                subscription_id = %subscription_id,
                topic = %topic,
                error = %error,
                panicked,
                "Event handler failed"
            );
            report.failures.push(HandlerFailure {
                subscription_id,
                pattern: pattern.as_str().to_string(),
                topic,
                event_id: event.event_id,
                error,
                panicked,
                failed_at: Utc::now(),
            });
        }
        if !report.failures.is_empty() {
            self.record_failures(&report.failures);
        }
        report
    }

    fn record_failures(&self, failures: &[HandlerFailure]) {
        let mut log = self.failures.write().unwrap_or_else(PoisonError::into_inner);
        log.extend(failures.iter().cloned());
        while log.len() > self.config.failure_log_capacity {
            log.pop_front();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .field("subscriptions", &self.subscription_count().unwrap_or(0))
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn counter(bus: &EventBus, pattern: &str) -> ConcordResult<Arc<AtomicUsize>> {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        bus.subscribe(pattern, move |_: &str, _: &Event| -> Result<(), HandlerError> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?;
        Ok(hits)
    }

    #[test]
    fn test_multi_wildcard_handler_invoked_exactly_once() -> ConcordResult<()> {
        let bus = EventBus::default();
        let hits = counter(&bus, "a.b.**")?;
        let event = Event::data(json!(1));

        let report = bus.publish("a.b.c.d", &event);
        assert_eq!(report.matched, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let report = bus.publish("a.x", &event);
        assert_eq!(report.matched, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_handlers_called_in_subscription_order() -> ConcordResult<()> {
        let bus = EventBus::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (i, pattern) in ["goal.*", "**", "goal.created"].iter().enumerate() {
            let order = Arc::clone(&order);
            bus.subscribe(pattern, move |_: &str, _: &Event| -> Result<(), HandlerError> {
                order.lock().map_err(|e| HandlerError::new(e.to_string()))?.push(i);
                Ok(())
            })?;
        }
        bus.publish("goal.created", &Event::data(json!(null)));
        let seen = order.lock().map(|v| v.clone()).unwrap_or_default();
        assert_eq!(seen, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_failing_handlers_do_not_stop_delivery() -> ConcordResult<()> {
        let bus = EventBus::default();
        bus.subscribe("task.*", |_: &str, _: &Event| -> Result<(), HandlerError> {
            Err(HandlerError::new("boom"))
        })?;
        bus.subscribe("task.*", |_: &str, _: &Event| -> Result<(), HandlerError> {
            panic!("handler exploded")
        })?;
        let hits = counter(&bus, "task.*")?;

        let event = Event::data(json!({"task": 1}));
        let report = bus.publish("task.updated", &event);
        assert_eq!(report.matched, 3);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 2);
        assert!(!report.is_clean());
        assert_eq!(report.failures[0].error, "boom");
        assert!(!report.failures[0].panicked);
        assert_eq!(report.failures[1].error, "handler exploded");
        assert!(report.failures[1].panicked);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let failures = bus.recent_failures()?;
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].topic, "task.updated");
        assert_eq!(failures[0].event_id, event.event_id);
        Ok(())
    }

    #[test]
    fn test_failure_log_is_bounded() -> ConcordResult<()> {
        let bus = EventBus::new(EventBusConfig {
            failure_log_capacity: 2,
        });
        bus.subscribe("**", |topic: &str, _: &Event| -> Result<(), HandlerError> {
            Err(HandlerError::new(topic))
        })?;
        for topic in ["one", "two", "three"] {
            bus.publish(topic, &Event::data(json!(null)));
        }
        let errors: Vec<String> = bus.recent_failures()?.into_iter().map(|f| f.error).collect();
        assert_eq!(errors, vec!["two", "three"]);
        Ok(())
    }

    #[test]
    fn test_unsubscribe() -> ConcordResult<()> {
        let bus = EventBus::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let id = bus.subscribe("x", move |_: &str, _: &Event| -> Result<(), HandlerError> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?;
        assert_eq!(bus.subscription_count()?, 1);
        bus.unsubscribe(id)?;
        assert_eq!(bus.subscription_count()?, 0);
        bus.publish("x", &Event::data(json!(null)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let err = bus.unsubscribe(id).unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(
            err,
            ConcordError::Event(EventError::SubscriptionNotFound { subscription_id }) if subscription_id == id
        ));
        Ok(())
    }

    #[test]
    fn test_handler_may_reenter_the_bus() -> ConcordResult<()> {
        let bus = Arc::new(EventBus::default());
        let downstream = counter(&bus, "audit.**")?;

        let inner = Arc::clone(&bus);
        bus.subscribe("goal.created", move |_: &str, event: &Event| -> Result<(), HandlerError> {
            inner.publish("audit.goal", event);
            inner.subscribe("late.topic", |_: &str, _: &Event| -> Result<(), HandlerError> {
                Ok(())
            })?;
            Ok(())
        })?;

        let report = bus.publish("goal.created", &Event::data(json!(null)));
        assert!(report.is_clean());
        assert_eq!(downstream.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscription_count()?, 3);
        Ok(())
    }

    #[test]
    fn test_publish_pattern_matches_subscription_patterns() -> ConcordResult<()> {
        let bus = EventBus::default();
        let topics = Arc::new(Mutex::new(Vec::new()));
        for pattern in ["goal.created", "goal.deleted", "task.created"] {
            let topics = Arc::clone(&topics);
            bus.subscribe(pattern, move |topic: &str, _: &Event| -> Result<(), HandlerError> {
                topics
                    .lock()
                    .map_err(|e| HandlerError::new(e.to_string()))?
                    .push(topic.to_string());
                Ok(())
            })?;
        }
        let report = bus.publish_pattern("goal.*", &Event::data(json!(null)));
        assert_eq!(report.matched, 2);
        let seen = topics.lock().map(|v| v.clone()).unwrap_or_default();
        assert_eq!(seen, vec!["goal.created", "goal.deleted"]);
        Ok(())
    }

    #[test]
    fn test_concurrent_publishers() -> ConcordResult<()> {
        let bus = EventBus::default();
        let hits = counter(&bus, "load.*")?;
        std::thread::scope(|s| {
            for _ in 0..4 {
                let bus = &bus;
                s.spawn(move || {
                    for _ in 0..100 {
                        bus.publish("load.tick", &Event::data(json!(null)));
                    }
                });
            }
        });
        assert_eq!(hits.load(Ordering::SeqCst), 400);
        Ok(())
    }
}
