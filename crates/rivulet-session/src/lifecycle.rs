//! Engine lifecycle state machine.
//!
//! # Design
//! - The state lives in an atomic so `is_running` never takes a lock.
//! - Transitions are compare-and-swap edges; an edge that does not apply is a no-op and
//!   reports `false`, which gives start/stop their idempotence.
//! - Only the coordinator worker drives transitions. Everyone else reads or subscribes.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

/// Whether the native engine is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EngineState {
    /// No native session exists.
    Stopped = 0,
    /// The native session is being brought up.
    Starting = 1,
    /// The native session accepts commands.
    Running = 2,
    /// The native session is being torn down.
    Stopping = 3,
}

impl EngineState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single authority for the engine state.
#[derive(Debug)]
pub struct EngineLifecycle {
    state: AtomicU8,
    changes: watch::Sender<EngineState>,
}

impl Default for EngineLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineLifecycle {
    /// A lifecycle in the `Stopped` state.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = watch::channel(EngineState::Stopped);
        Self {
            state: AtomicU8::new(EngineState::Stopped as u8),
            changes,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Lock-free check for `Running`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Receiver that observes every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.changes.subscribe()
    }

    pub(crate) fn begin_start(&self) -> bool {
        self.transition(EngineState::Stopped, EngineState::Starting)
    }

    pub(crate) fn finish_start(&self) -> bool {
        self.transition(EngineState::Starting, EngineState::Running)
    }

    pub(crate) fn abort_start(&self) -> bool {
        self.transition(EngineState::Starting, EngineState::Stopped)
    }

    pub(crate) fn begin_stop(&self) -> bool {
        self.transition(EngineState::Running, EngineState::Stopping)
    }

    pub(crate) fn finish_stop(&self) -> bool {
        self.transition(EngineState::Stopping, EngineState::Stopped)
    }

    fn transition(&self, from: EngineState, to: EngineState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            self.changes.send_replace(to);
            info!(from = %from, to = %to, "engine state changed");
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy)]
    enum Edge {
        BeginStart,
        FinishStart,
        AbortStart,
        BeginStop,
        FinishStop,
    }

    fn apply(lifecycle: &EngineLifecycle, edge: Edge) -> bool {
        match edge {
            Edge::BeginStart => lifecycle.begin_start(),
            Edge::FinishStart => lifecycle.finish_start(),
            Edge::AbortStart => lifecycle.abort_start(),
            Edge::BeginStop => lifecycle.begin_stop(),
            Edge::FinishStop => lifecycle.finish_stop(),
        }
    }

    fn edge() -> impl Strategy<Value = Edge> {
        prop_oneof![
            Just(Edge::BeginStart),
            Just(Edge::FinishStart),
            Just(Edge::AbortStart),
            Just(Edge::BeginStop),
            Just(Edge::FinishStop),
        ]
    }

    proptest! {
        #[test]
        fn arbitrary_edges_only_follow_the_cycle(edges in proptest::collection::vec(edge(), 0..64)) {
            let lifecycle = EngineLifecycle::new();
            for edge in edges {
                let before = lifecycle.state();
                let moved = apply(&lifecycle, edge);
                let after = lifecycle.state();
                let legal = matches!(
                    (before, after),
                    (EngineState::Stopped, EngineState::Starting)
                        | (EngineState::Starting, EngineState::Running | EngineState::Stopped)
                        | (EngineState::Running, EngineState::Stopping)
                        | (EngineState::Stopping, EngineState::Stopped)
                );
                prop_assert_eq!(moved, legal);
                if !moved {
                    prop_assert_eq!(before, after);
                }
            }
        }
    }

    #[test]
    fn start_is_a_no_op_unless_stopped() {
        let lifecycle = EngineLifecycle::new();
        assert!(lifecycle.begin_start());
        assert!(!lifecycle.begin_start());
        assert!(lifecycle.finish_start());
        assert!(lifecycle.is_running());
        assert!(!lifecycle.begin_start());
        assert!(!lifecycle.finish_stop());
        assert_eq!(lifecycle.state(), EngineState::Running);
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let lifecycle = EngineLifecycle::new();
        let mut rx = lifecycle.subscribe();
        assert!(lifecycle.begin_start());
        assert!(lifecycle.abort_start());
        rx.changed().await.expect("sender alive");
        assert_eq!(*rx.borrow_and_update(), EngineState::Stopped);
    }
}
