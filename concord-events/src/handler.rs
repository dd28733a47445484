use concord_core::{ConcordError, Event};
use thiserror::Error;

/// Error returned by an event handler. Recorded by the bus, never propagated
/// to the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<ConcordError> for HandlerError {
    fn from(err: ConcordError) -> Self {
        Self::new(err.to_string())
    }
}

/// A subscriber on the event bus.
///
/// Handlers run synchronously on the publisher's thread and should be cheap
/// state updates.
pub trait EventHandler: Send + Sync {
    /// Handle one event published on `topic`.
    fn handle(&self, topic: &str, event: &Event) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&str, &Event) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, topic: &str, event: &Event) -> Result<(), HandlerError> {
        self(topic, event)
    }
}
