//! CONCORD Test Utilities
//!
//! Shared test infrastructure for the CONCORD workspace:
//! - Tracing setup for tests
//! - Proptest generators for topics, patterns, priorities and capabilities
//! - Fixtures that wire the components together
//! - Assertions for CONCORD error classes

use std::sync::Arc;

// Re-export core types for convenience
pub use concord_agents::{Agent, AgentDirectory, AgentMessage, MessageKind, MessagePriority, MessageRouter};
pub use concord_context::{AgentContext, ContextScope, ContextStore};
pub use concord_core::{ConcordConfig, ConcordError, ConcordResult, EntityId};
pub use concord_events::EventBus;
pub use concord_goals::Orchestrator;

// ============================================================================
// TRACING
// ============================================================================

/// Install a fmt subscriber honoring `RUST_LOG` (default `concord=debug`).
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("concord=debug,info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for CONCORD inputs.

    use super::*;
    use proptest::prelude::*;

    /// A single topic segment.
    pub fn arb_segment() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,5}"
    }

    /// A dotted topic of one to five segments.
    pub fn arb_topic() -> impl Strategy<Value = String> {
        proptest::collection::vec(arb_segment(), 1..=5).prop_map(|segments| segments.join("."))
    }

    /// A pattern built from literal segments and `*`, optionally ending in
    /// `**`.
    pub fn arb_pattern() -> impl Strategy<Value = String> {
        let segment = prop_oneof![3 => arb_segment(), 1 => Just("*".to_string())];
        (proptest::collection::vec(segment, 0..=4), any::<bool>()).prop_map(
            |(mut segments, trailing)| {
                if trailing || segments.is_empty() {
                    segments.push("**".to_string());
                }
                segments.join(".")
            },
        )
    }

    /// A topic together with a pattern derived from it that must match.
    pub fn arb_matching_pair() -> impl Strategy<Value = (String, String)> {
        proptest::collection::vec((arb_segment(), any::<bool>()), 1..=5).prop_flat_map(|parts| {
            let len = parts.len();
            (Just(parts), 0..=len).prop_map(|(parts, keep)| {
                let topic = parts
                    .iter()
                    .map(|(s, _)| s.as_str())
                    .collect::<Vec<_>>()
                    .join(".");
                let mut pattern: Vec<String> = parts[..keep]
                    .iter()
                    .map(|(s, wild)| if *wild { "*".to_string() } else { s.clone() })
                    .collect();
                if keep < parts.len() {
                    pattern.push("**".to_string());
                }
                (topic, pattern.join("."))
            })
        })
    }

    pub fn arb_priority() -> impl Strategy<Value = MessagePriority> {
        prop_oneof![
            Just(MessagePriority::Lowest),
            Just(MessagePriority::Low),
            Just(MessagePriority::Normal),
            Just(MessagePriority::High),
            Just(MessagePriority::Highest),
        ]
    }

    pub fn arb_message_kind() -> impl Strategy<Value = MessageKind> {
        prop_oneof![
            Just(MessageKind::Request),
            Just(MessageKind::Response),
            Just(MessageKind::Notification),
            Just(MessageKind::TaskDelegation),
            Just(MessageKind::ContextShare),
        ]
    }

    /// Capability sets drawn from a small vocabulary so overlaps are common.
    pub fn arb_capabilities() -> impl Strategy<Value = Vec<String>> {
        proptest::sample::subsequence(
            vec!["search", "browse", "summarize", "code", "review", "plan"],
            0..=4,
        )
        .prop_map(|caps| caps.into_iter().map(str::to_string).collect())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values and wired component stacks.

    use super::*;

    /// An unregistered agent offering `capabilities`.
    pub fn agent_with(name: &str, capabilities: &[&str]) -> Agent {
        Agent::new(name, capabilities.iter().copied())
    }

    /// Every component built from one configuration, sharing a directory
    /// and an event bus the way an application would wire them.
    pub struct CoordinationStack {
        pub directory: Arc<AgentDirectory>,
        pub router: MessageRouter,
        pub bus: Arc<EventBus>,
        pub context: Arc<ContextStore>,
        pub orchestrator: Orchestrator,
    }

    impl CoordinationStack {
        /// Register an agent and return its context handle.
        pub fn join(&self, name: &str, capabilities: &[&str]) -> ConcordResult<AgentContext> {
            let agent_id = self.directory.register(agent_with(name, capabilities))?;
            Ok(AgentContext::new(Arc::clone(&self.context), agent_id))
        }
    }

    pub fn coordination_stack_with(config: &ConcordConfig) -> CoordinationStack {
        let directory = Arc::new(AgentDirectory::new(config.directory.clone()));
        let bus = Arc::new(EventBus::new(config.events.clone()));
        let router = MessageRouter::new(Arc::clone(&directory), config.router.clone());
        let context = Arc::new(
            ContextStore::new(config.context.clone()).with_event_bus(Arc::clone(&bus)),
        );
        let orchestrator = Orchestrator::new(
            Arc::clone(&directory),
            Arc::clone(&bus),
            config.goals.clone(),
        );
        CoordinationStack {
            directory,
            router,
            bus,
            context,
            orchestrator,
        }
    }

    pub fn coordination_stack() -> CoordinationStack {
        coordination_stack_with(&ConcordConfig::default())
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for CONCORD error classes.

    use super::*;

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &ConcordResult<T>) {
        match result {
            Err(e) if e.is_not_found() => {}
            other => panic!("Expected a not-found error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_goal_error<T: std::fmt::Debug>(result: &ConcordResult<T>) {
        match result {
            Err(ConcordError::Goal(_)) => {}
            other => panic!("Expected Goal error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_context_error<T: std::fmt::Debug>(result: &ConcordResult<T>) {
        match result {
            Err(ConcordError::Context(_)) => {}
            other => panic!("Expected Context error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::topic_matches;
    use proptest::prelude::*;

    #[test]
    fn test_stack_shares_directory_and_bus() -> ConcordResult<()> {
        init_test_tracing();
        let stack = fixtures::coordination_stack();
        let ctx = stack.join("reader", &["browse"])?;
        assert!(stack.directory.is_registered(ctx.agent_id())?);
        assert!(Arc::ptr_eq(stack.router.directory(), &stack.directory));
        assert!(Arc::ptr_eq(stack.context.event_bus(), &stack.bus));
        assert!(Arc::ptr_eq(stack.orchestrator.event_bus(), &stack.bus));
        Ok(())
    }

    #[test]
    fn test_not_found_assertion() {
        let result: ConcordResult<()> = Err(concord_core::AgentError::NotRegistered {
            agent_id: uuid::Uuid::nil(),
        }
        .into());
        assertions::assert_not_found(&result);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_matching_pairs_match((topic, pattern) in generators::arb_matching_pair()) {
            prop_assert!(topic_matches(&pattern, &topic), "{} should match {}", pattern, topic);
        }

        #[test]
        fn prop_generated_topics_have_no_wildcards(topic in generators::arb_topic()) {
            prop_assert!(!topic.contains('*'));
            prop_assert!(topic.split('.').all(|s| !s.is_empty()));
        }
    }
}
