//! CONCORD Events - Topic Publish/Subscribe
//!
//! An in-process event bus, independent of direct agent messaging.
//!
//! # Delivery
//!
//! `publish(topic, event)` runs synchronously on the publisher's thread and
//! calls every handler whose pattern matches `topic`, in subscription order.
//! Patterns use the dotted grammar from `concord-core` (`*` is one segment,
//! `**` is zero or more).
//!
//! A failing handler (an `Err` return or a panic) is recorded and logged;
//! delivery to the remaining handlers continues and `publish` itself never
//! fails. Handlers run without the bus lock held, so a handler may publish,
//! subscribe or unsubscribe on the same bus.
//!
//! # Key Types
//!
//! - [`EventBus`]: the bus
//! - [`EventHandler`]: handler trait, implemented for matching closures
//! - [`PublishReport`] / [`HandlerFailure`]: per-publish outcome

mod bus;
mod handler;

pub use bus::{EventBus, HandlerFailure, PublishReport};
pub use handler::{EventHandler, HandlerError};

// Re-export core types for convenience
pub use concord_core::{topic_matches, Event, EventKind, TopicPattern};
