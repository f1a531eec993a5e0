//! Read-side streams derived from coordinator state.
//!
//! # Design
//! - Every observation owns one background task. It recomputes its value when a relevant
//!   bus event arrives and on a fixed tick, so values the engine changes silently (speeds,
//!   peers) still flow.
//! - Values travel through a `watch` channel: a slow consumer only sees the latest value
//!   and never blocks the producer. Equal consecutive values are not republished.
//! - Deleted-torrent notifications use a capacity-one channel instead; when it is full the
//!   newest id is dropped.
//! - Dropping an [`Observation`] cancels its task.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use rivulet_events::{Event, EventFilter, EventKind};
use rivulet_torrent_core::{
    AdvancedTorrentInfo, PeerInfo, SessionStats, TorrentId, TorrentInfo, TrackerInfo,
};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::{ReceiverStream, WatchStream};
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::coordinator::SessionCoordinator;

const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Stream of projected values; dropping it stops the projection.
pub struct Observation<T> {
    inner: Pin<Box<dyn Stream<Item = T> + Send>>,
    _guard: DropGuard,
}

impl<T> Stream for Observation<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Turns coordinator state into observable streams.
#[derive(Clone)]
pub struct InfoSnapshotProjector {
    coordinator: SessionCoordinator,
    interval: Duration,
}

impl InfoSnapshotProjector {
    /// Projector refreshing every second.
    #[must_use]
    pub const fn new(coordinator: SessionCoordinator) -> Self {
        Self::with_interval(coordinator, REFRESH_INTERVAL)
    }

    /// Projector with a custom refresh tick.
    #[must_use]
    pub const fn with_interval(coordinator: SessionCoordinator, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    /// Snapshot of one torrent; `None` while it is unknown.
    #[must_use]
    pub fn observe(&self, id: &TorrentId) -> Observation<Option<TorrentInfo>> {
        let id = id.clone();
        self.project(concerns(id.clone()), move |session| session.torrent_info(&id))
    }

    /// Snapshots of every known torrent, sorted by id.
    #[must_use]
    pub fn observe_info_list(&self) -> Observation<Vec<TorrentInfo>> {
        self.project(|_| true, SessionCoordinator::torrent_infos)
    }

    /// Connected peers of one torrent.
    #[must_use]
    pub fn observe_peers(&self, id: &TorrentId) -> Observation<Vec<PeerInfo>> {
        let id = id.clone();
        self.project(concerns(id.clone()), move |session| session.peers(&id))
    }

    /// Trackers of one torrent.
    #[must_use]
    pub fn observe_trackers(&self, id: &TorrentId) -> Observation<Vec<TrackerInfo>> {
        let id = id.clone();
        self.project(concerns(id.clone()), move |session| session.trackers(&id))
    }

    /// Piece bitmap of one torrent.
    #[must_use]
    pub fn observe_pieces(&self, id: &TorrentId) -> Observation<Vec<bool>> {
        let id = id.clone();
        self.project(concerns(id.clone()), move |session| session.pieces(&id))
    }

    /// Detail counters of one torrent.
    #[must_use]
    pub fn observe_advanced(&self, id: &TorrentId) -> Observation<Option<AdvancedTorrentInfo>> {
        let id = id.clone();
        self.project(concerns(id.clone()), move |session| session.advanced_info(&id))
    }

    /// Engine-wide statistics.
    #[must_use]
    pub fn observe_session_stats(&self) -> Observation<SessionStats> {
        self.project(
            |event| event.event_kind() == EventKind::SessionStats,
            SessionCoordinator::session_stats,
        )
    }

    /// Whether the engine is running.
    #[must_use]
    pub fn observe_engine_running(&self) -> Observation<bool> {
        self.project(
            |event| {
                matches!(
                    event.event_kind(),
                    EventKind::SessionStarted | EventKind::SessionStopped
                )
            },
            SessionCoordinator::is_running,
        )
    }

    /// Ids of deleted torrents; ids arriving while one is still unread are dropped.
    #[must_use]
    pub fn observe_torrents_deleted(&self) -> Observation<TorrentId> {
        let (tx, rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let cancel = token.clone();
        let mut events = self
            .coordinator
            .events()
            .subscribe(EventFilter::only([EventKind::TorrentRemoved]));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tx.closed() => break,
                    envelope = events.next() => {
                        let Some(envelope) = envelope else { break };
                        if let Event::TorrentRemoved { torrent_id } = envelope.event
                            && tx.try_send(torrent_id).is_err()
                        {
                            debug!("deleted-torrent observer is behind; dropping id");
                        }
                    }
                }
            }
        });
        Observation {
            inner: Box::pin(ReceiverStream::new(rx)),
            _guard: token.drop_guard(),
        }
    }

    fn project<T, R, C>(&self, relevant: R, compute: C) -> Observation<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        R: Fn(&Event) -> bool + Send + 'static,
        C: Fn(&SessionCoordinator) -> T + Send + 'static,
    {
        let coordinator = self.coordinator.clone();
        let (tx, rx) = watch::channel(compute(&coordinator));
        let token = CancellationToken::new();
        let cancel = token.clone();
        let mut events = coordinator.events().subscribe(EventFilter::All);
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::spawn(async move {
            tick.tick().await;
            loop {
                let refresh = tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tx.closed() => break,
                    _ = tick.tick() => true,
                    envelope = events.next() => match envelope {
                        Some(envelope) => relevant(&envelope.event),
                        None => break,
                    },
                };
                if refresh {
                    let next = compute(&coordinator);
                    tx.send_if_modified(|current| {
                        if *current == next {
                            false
                        } else {
                            *current = next;
                            true
                        }
                    });
                }
            }
        });
        Observation {
            inner: Box::pin(WatchStream::new(rx)),
            _guard: token.drop_guard(),
        }
    }
}

fn concerns(id: TorrentId) -> impl Fn(&Event) -> bool + Send + 'static {
    move |event| event.torrent_id().is_none_or(|torrent| *torrent == id)
}
