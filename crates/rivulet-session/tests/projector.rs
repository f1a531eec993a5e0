mod common;

use std::time::Duration;

use anyhow::{Context, Result};
use common::{Harness, WAIT, next_event};
use rivulet_events::Event;
use rivulet_session::InfoSnapshotProjector;
use rivulet_test_support::TorrentFixture;
use rivulet_torrent_core::TorrentStateCode;
use tokio::time::timeout;
use tokio_stream::{Stream, StreamExt};

const QUIET: Duration = Duration::from_millis(150);

async fn next<T>(stream: &mut (impl Stream<Item = T> + Unpin)) -> Result<T> {
    timeout(WAIT, stream.next())
        .await
        .context("timed out waiting for a projection")?
        .context("projection ended")
}

fn projector(harness: &Harness) -> InfoSnapshotProjector {
    InfoSnapshotProjector::with_interval(harness.coordinator.clone(), Duration::from_millis(20))
}

#[tokio::test]
async fn torrent_snapshots_are_emitted_only_when_they_change() -> Result<()> {
    let harness = Harness::new()?;
    harness.start().await?;
    let torrent = harness.add(&TorrentFixture::single("watched.iso", 4_096)).await?;
    let mut infos = projector(&harness).observe(&torrent.id);

    let first = next(&mut infos).await?.context("live torrent")?;
    assert_eq!(first.state, TorrentStateCode::Downloading);
    // Several refresh ticks pass without a change.
    assert!(timeout(QUIET, infos.next()).await.is_err());

    harness.coordinator.pause_resume_torrent(&torrent.id).await?;
    let paused = next(&mut infos).await?.context("still live")?;
    assert_eq!(paused.state, TorrentStateCode::Paused);

    harness.coordinator.delete_torrents(&[torrent.id.clone()], false).await?;
    assert_eq!(next(&mut infos).await?, None);
    Ok(())
}

#[tokio::test]
async fn info_lists_follow_additions() -> Result<()> {
    let harness = Harness::new()?;
    harness.start().await?;
    let mut lists = projector(&harness).observe_info_list();
    assert!(next(&mut lists).await?.is_empty());

    let torrent = harness.add(&TorrentFixture::single("listed.iso", 1_024)).await?;
    let list = next(&mut lists).await?;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].torrent_id, torrent.id);
    Ok(())
}

#[tokio::test]
async fn engine_running_tracks_the_lifecycle() -> Result<()> {
    let harness = Harness::new()?;
    let mut running = projector(&harness).observe_engine_running();
    assert!(!next(&mut running).await?);

    harness.start().await?;
    assert!(next(&mut running).await?);
    harness.stop().await?;
    assert!(!next(&mut running).await?);
    Ok(())
}

#[tokio::test]
async fn session_stats_report_the_listen_port() -> Result<()> {
    let harness = Harness::new()?;
    let mut stats = projector(&harness).observe_session_stats();
    assert_eq!(next(&mut stats).await?.listen_port, 0);

    harness.start().await?;
    let port = harness.coordinator.settings().port_range_first;
    let updated = next(&mut stats).await?;
    assert_eq!(updated.listen_port, port);
    assert_eq!(harness.coordinator.session_stats(), updated);
    assert_eq!(*harness.coordinator.subscribe_session_stats().borrow(), updated);
    Ok(())
}

#[tokio::test]
async fn deleted_torrents_are_announced_by_id() -> Result<()> {
    let harness = Harness::new()?;
    harness.start().await?;
    let torrent = harness.add(&TorrentFixture::single("deleted.iso", 1_024)).await?;
    let mut deleted = projector(&harness).observe_torrents_deleted();

    harness.coordinator.delete_torrents(&[torrent.id.clone()], true).await?;
    assert_eq!(next(&mut deleted).await?, torrent.id);
    Ok(())
}

#[tokio::test]
async fn torrent_errors_are_recorded_and_projected() -> Result<()> {
    let harness = Harness::new()?;
    harness.start().await?;
    let torrent = harness.add(&TorrentFixture::single("failing.iso", 1_024)).await?;
    let mut infos = projector(&harness).observe(&torrent.id);
    next(&mut infos).await?;
    let mut events = harness.subscribe();

    harness.probe.raise_error(&torrent.id, "disk full");
    let event = next_event(&mut events, |event| matches!(event, Event::TorrentError { .. })).await?;
    assert_eq!(
        event,
        Event::TorrentError {
            torrent_id: torrent.id.clone(),
            message: "disk full".into()
        }
    );
    let info = next(&mut infos).await?.context("still live")?;
    assert_eq!(info.state, TorrentStateCode::Error);
    assert_eq!(info.error.as_deref(), Some("disk full"));
    assert_eq!(
        harness.repository.record(&torrent.id).and_then(|r| r.error),
        Some("disk full".to_string())
    );
    Ok(())
}
