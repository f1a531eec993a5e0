//! Event bus error primitives.

use std::fmt::{self, Display, Formatter};

/// Error emitted when a registration cannot be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventBusError {
    /// Listener delivery needs a Tokio runtime and none was active.
    NoRuntime {
        /// Kind of registration that was attempted.
        registration: &'static str,
    },
}

impl EventBusError {
    /// Kind of registration that failed.
    #[must_use]
    pub const fn registration(&self) -> &'static str {
        match self {
            Self::NoRuntime { registration } => registration,
        }
    }
}

impl Display for EventBusError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("event bus registration requires a tokio runtime")
    }
}

impl std::error::Error for EventBusError {}

/// Result wrapper for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_bus_error_exposes_fields() {
        let err = EventBusError::NoRuntime {
            registration: "listener",
        };
        assert_eq!(err.registration(), "listener");
        assert_eq!(
            err.to_string(),
            "event bus registration requires a tokio runtime"
        );
    }
}
