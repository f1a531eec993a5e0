//! Event kinds and subscription filters.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::payloads::Event;

/// Payload-free discriminator for [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// See [`Event::SessionStarted`].
    SessionStarted,
    /// See [`Event::SessionStopped`].
    SessionStopped,
    /// See [`Event::SessionError`].
    SessionError,
    /// See [`Event::NatError`].
    NatError,
    /// See [`Event::TorrentAdded`].
    TorrentAdded,
    /// See [`Event::TorrentLoaded`].
    TorrentLoaded,
    /// See [`Event::TorrentStateChanged`].
    TorrentStateChanged,
    /// See [`Event::TorrentFinished`].
    TorrentFinished,
    /// See [`Event::TorrentRemoved`].
    TorrentRemoved,
    /// See [`Event::TorrentPaused`].
    TorrentPaused,
    /// See [`Event::TorrentResumed`].
    TorrentResumed,
    /// See [`Event::TorrentError`].
    TorrentError,
    /// See [`Event::TorrentMetadataLoaded`].
    TorrentMetadataLoaded,
    /// See [`Event::MagnetMetadataReceived`].
    MagnetMetadataReceived,
    /// See [`Event::RestoreSessionError`].
    RestoreSessionError,
    /// See [`Event::TorrentMoving`].
    TorrentMoving,
    /// See [`Event::TorrentMoved`].
    TorrentMoved,
    /// See [`Event::IpFilterParsed`].
    IpFilterParsed,
    /// See [`Event::SessionStats`].
    SessionStats,
    /// See [`Event::SessionSettingsApplied`].
    SessionSettingsApplied,
}

impl EventKind {
    /// Stable `snake_case` label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::SessionStopped => "session_stopped",
            Self::SessionError => "session_error",
            Self::NatError => "nat_error",
            Self::TorrentAdded => "torrent_added",
            Self::TorrentLoaded => "torrent_loaded",
            Self::TorrentStateChanged => "torrent_state_changed",
            Self::TorrentFinished => "torrent_finished",
            Self::TorrentRemoved => "torrent_removed",
            Self::TorrentPaused => "torrent_paused",
            Self::TorrentResumed => "torrent_resumed",
            Self::TorrentError => "torrent_error",
            Self::TorrentMetadataLoaded => "torrent_metadata_loaded",
            Self::MagnetMetadataReceived => "magnet_metadata_received",
            Self::RestoreSessionError => "restore_session_error",
            Self::TorrentMoving => "torrent_moving",
            Self::TorrentMoved => "torrent_moved",
            Self::IpFilterParsed => "ip_filter_parsed",
            Self::SessionStats => "session_stats",
            Self::SessionSettingsApplied => "session_settings_applied",
        }
    }
}

/// Subset of event kinds a listener wants delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EventFilter {
    /// Every event.
    #[default]
    All,
    /// Only the listed kinds.
    Only(BTreeSet<EventKind>),
}

impl EventFilter {
    /// Build a filter accepting only the given kinds.
    #[must_use]
    pub fn only(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self::Only(kinds.into_iter().collect())
    }

    /// Whether `event` passes the filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::All => true,
            Self::Only(kinds) => kinds.contains(&event.event_kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::TorrentId;

    #[test]
    fn only_filter_rejects_other_kinds() {
        let filter = EventFilter::only([EventKind::SessionStarted, EventKind::TorrentRemoved]);
        assert!(filter.matches(&Event::SessionStarted));
        assert!(filter.matches(&Event::TorrentRemoved {
            torrent_id: TorrentId::new("aa"),
        }));
        assert!(!filter.matches(&Event::SessionStopped));
        assert!(EventFilter::All.matches(&Event::SessionStopped));
    }
}
