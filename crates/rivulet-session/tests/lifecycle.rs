mod common;

use anyhow::Result;
use common::{Harness, WAIT, eventually, is_for, next_event, test_policy};
use proptest::prelude::*;
use rivulet_events::Event;
use rivulet_session::EngineState;
use rivulet_test_support::{MemoryRepository, TorrentFixture};
use rivulet_torrent_core::{PolicySnapshot, Priority, Torrent, TorrentId};
use tokio::time::timeout;

#[derive(Debug, Clone, Copy)]
enum Request {
    Start,
    ForceStop,
    RequestStop,
}

fn request() -> impl Strategy<Value = Request> {
    prop_oneof![
        Just(Request::Start),
        Just(Request::ForceStop),
        Just(Request::RequestStop),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn queued_lifecycle_requests_follow_the_state_machine(
        requests in proptest::collection::vec(request(), 0..12),
        keep_alive in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Runtime::new().map_err(|err| TestCaseError::fail(err.to_string()))?;
        let outcome: Result<(usize, usize, bool, EngineState, bool)> = runtime.block_on(async {
            let harness = Harness::with_policy(|dir| PolicySnapshot {
                keep_alive,
                ..test_policy(dir)
            })?;
            for request in &requests {
                match request {
                    Request::Start => harness.coordinator.start().await?,
                    Request::ForceStop => harness.coordinator.force_stop().await?,
                    Request::RequestStop => harness.coordinator.request_stop().await?,
                }
            }
            harness.settle().await?;
            Ok((
                harness.probe.calls("start"),
                harness.probe.calls("stop"),
                harness.probe.is_started(),
                harness.coordinator.engine_state(),
                harness.coordinator.is_running(),
            ))
        });
        let (starts, stops, started, state, running) =
            outcome.map_err(|err| TestCaseError::fail(err.to_string()))?;

        let mut model_running = false;
        let mut model_starts = 0;
        let mut model_stops = 0;
        for request in &requests {
            match request {
                Request::Start if !model_running => {
                    model_running = true;
                    model_starts += 1;
                }
                Request::ForceStop if model_running => {
                    model_running = false;
                    model_stops += 1;
                }
                Request::RequestStop if model_running && !keep_alive => {
                    model_running = false;
                    model_stops += 1;
                }
                _ => {}
            }
        }
        prop_assert_eq!(starts, model_starts);
        prop_assert_eq!(stops, model_stops);
        prop_assert_eq!(started, model_running);
        prop_assert_eq!(running, model_running);
        let expected = if model_running { EngineState::Running } else { EngineState::Stopped };
        prop_assert_eq!(state, expected);
    }
}

#[tokio::test]
async fn failed_native_start_reverts_to_stopped_and_reports_once() -> Result<()> {
    let harness = Harness::new()?;
    harness.probe.fail("start", "port in use");
    let mut events = harness.subscribe();
    harness.coordinator.start().await?;
    let event = next_event(&mut events, |event| matches!(event, Event::SessionError { .. })).await?;
    assert_eq!(
        event,
        Event::SessionError {
            message: "port in use".into()
        }
    );
    harness.settle().await?;
    assert_eq!(harness.coordinator.engine_state(), EngineState::Stopped);
    assert_eq!(harness.probe.calls("start"), 1);

    harness.probe.recover("start");
    harness.start().await?;
    assert_eq!(harness.probe.calls("start"), 2);
    Ok(())
}

#[tokio::test]
async fn keep_alive_blocks_request_stop_but_not_force_stop() -> Result<()> {
    let harness = Harness::with_policy(|dir| PolicySnapshot {
        keep_alive: true,
        ..test_policy(dir)
    })?;
    harness.start().await?;
    harness.coordinator.request_stop().await?;
    harness.settle().await?;
    assert!(harness.coordinator.is_running());

    harness.stop().await?;
    assert!(!harness.probe.is_started());
    Ok(())
}

#[tokio::test]
async fn stop_persists_resume_data_and_start_restores_torrents() -> Result<()> {
    let harness = Harness::new()?;
    harness.start().await?;
    let fixture = TorrentFixture::single("restore.iso", 64 * 1024);
    let torrent = harness.add(&fixture).await?;
    harness.probe.complete(&torrent.id);
    let mut events = harness.subscribe();
    next_event(&mut events, |event| matches!(event, Event::TorrentFinished { .. })).await?;

    harness.stop().await?;
    assert!(harness.coordinator.registry().is_empty());
    assert!(harness.repository.fast_resume(&torrent.id).is_some());
    assert!(harness.repository.session_state().is_some());

    harness.coordinator.start().await?;
    let loaded = next_event(&mut events, |event| matches!(event, Event::TorrentLoaded { .. })).await?;
    assert_eq!(
        loaded,
        Event::TorrentLoaded {
            torrent_id: torrent.id.clone()
        }
    );
    assert!(harness.coordinator.registry().contains(&torrent.id));
    assert_eq!(harness.probe.calls("add_torrent"), 2);
    let status = harness.probe.status(&torrent.id).expect("restored status");
    assert!(status.finished);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_leaves_running_before_the_registry_empties() -> Result<()> {
    let harness = Harness::new()?;
    harness.start().await?;
    for index in 0..8 {
        harness
            .add(&TorrentFixture::single(&format!("stop-{index}.iso"), 1_024))
            .await?;
    }

    let coordinator = harness.coordinator.clone();
    let sampler = tokio::task::spawn_blocking(move || {
        let mut samples = 0_u32;
        loop {
            let empty = coordinator.registry().is_empty();
            let state = coordinator.engine_state();
            if empty {
                assert_ne!(state, EngineState::Running, "running with an empty registry");
            }
            samples += 1;
            if state == EngineState::Stopped {
                return samples;
            }
        }
    });
    harness.stop().await?;
    let samples = timeout(WAIT, sampler).await??;
    assert!(samples > 0);
    Ok(())
}

#[tokio::test]
async fn restart_keeps_file_selection_sequential_mode_and_limits() -> Result<()> {
    let harness = Harness::new()?;
    harness.start().await?;
    let fixture = TorrentFixture::multi("album", &[("01.flac", 40_000), ("02.flac", 40_000)]);
    let torrent = harness.add(&fixture).await?;
    let id = torrent.id.clone();
    harness
        .coordinator
        .prioritize_files(&id, vec![Priority::Default, Priority::Ignore])
        .await?;
    harness.coordinator.set_sequential_download(&id, true).await?;
    harness.coordinator.set_download_speed_limit(&id, 64_000).await?;
    harness.coordinator.set_upload_speed_limit(&id, 8_000).await?;
    harness.probe.update_status(&id, |status| status.progress_permille = 300);

    harness.stop().await?;
    harness.start().await?;
    eventually(|| harness.coordinator.registry().contains(&id)).await?;

    let status = harness.probe.status(&id).expect("restored status");
    assert_eq!(status.file_priorities, vec![Priority::Default, Priority::Ignore]);
    assert!(status.sequential);
    assert_eq!(status.progress_permille, 300);
    assert_eq!(harness.coordinator.download_speed_limit(&id), 64_000);
    assert_eq!(harness.coordinator.upload_speed_limit(&id), 8_000);
    Ok(())
}

#[tokio::test]
async fn restore_failure_is_reported_and_recorded_on_the_torrent() -> Result<()> {
    let id = TorrentId::new("c".repeat(40));
    let record = Torrent {
        id: id.clone(),
        name: "lost.iso".into(),
        download_path: "downloads".into(),
        date_added: chrono::Utc::now(),
        error: None,
        manually_paused: false,
        downloading_metadata: false,
    };
    let harness = Harness::with_repository(MemoryRepository::with_records([record]), test_policy)?;
    let mut events = harness.subscribe();
    harness.coordinator.start().await?;
    let event = next_event(&mut events, is_for(&id)).await?;
    assert_eq!(event, Event::RestoreSessionError { torrent_id: id.clone() });
    assert!(harness.repository.record(&id).and_then(|r| r.error).is_some());
    assert!(!harness.coordinator.registry().contains(&id));
    let info = harness.coordinator.torrent_info(&id).expect("record snapshot");
    assert!(info.error.is_some());
    Ok(())
}

#[tokio::test]
async fn finishing_every_download_stops_the_engine_when_configured() -> Result<()> {
    let harness = Harness::with_policy(|dir| PolicySnapshot {
        shutdown_downloads_complete: true,
        ..test_policy(dir)
    })?;
    harness.start().await?;
    let first = harness.add(&TorrentFixture::single("one.iso", 1024)).await?;
    let second = harness.add(&TorrentFixture::single("two.iso", 1024)).await?;

    harness.probe.complete(&first.id);
    harness.settle().await?;
    eventually(|| harness.coordinator.task(&first.id).is_some_and(|t| t.is_finished())).await?;
    assert!(harness.coordinator.is_running());

    harness.probe.complete(&second.id);
    timeout(WAIT, harness.coordinator.wait_for_state(EngineState::Stopped)).await?;
    assert_eq!(harness.probe.calls("stop"), 1);
    Ok(())
}

#[tokio::test]
async fn dropping_every_handle_stops_a_running_engine() -> Result<()> {
    let harness = Harness::new()?;
    harness.start().await?;
    let probe = harness.probe.clone();
    drop(harness);
    eventually(|| !probe.is_started()).await?;
    assert_eq!(probe.calls("stop"), 1);
    Ok(())
}
