mod common;

use std::time::Duration;

use anyhow::Result;
use common::{Harness, eventually, next_event, test_policy};
use rivulet_events::Event;
use rivulet_session::make_stream_url;
use rivulet_test_support::TorrentFixture;
use rivulet_torrent_core::{NativeAlert, PolicySnapshot, TorrentId};
use tokio::time::sleep;

#[tokio::test]
async fn ip_filter_is_loaded_at_start_and_cleared_on_disable() -> Result<()> {
    let harness = Harness::with_policy(|dir| PolicySnapshot {
        ip_filtering: true,
        ip_filtering_file: dir.path().join("blocklist.p2p"),
        ..test_policy(dir)
    })?;
    std::fs::write(
        harness.path("blocklist.p2p"),
        "# ranges\nblocklist:1.2.3.4-1.2.3.255\nother:10.0.0.0-10.0.0.255\n",
    )?;
    let mut events = harness.subscribe();

    harness.start().await?;
    let parsed = next_event(&mut events, |event| matches!(event, Event::IpFilterParsed { .. })).await?;
    assert_eq!(parsed, Event::IpFilterParsed { rule_count: 2 });
    assert_eq!(harness.probe.ip_filter_rules(), Some(2));

    harness.policy.update_policy(|policy| policy.ip_filtering = false);
    eventually(|| harness.probe.ip_filter_rules().is_none()).await?;
    Ok(())
}

#[tokio::test]
async fn unreadable_ip_filter_reports_zero_rules_and_an_error() -> Result<()> {
    let harness = Harness::with_policy(|dir| PolicySnapshot {
        ip_filtering: true,
        ip_filtering_file: dir.path().join("missing.dat"),
        ..test_policy(dir)
    })?;
    let mut events = harness.subscribe();

    harness.start().await?;
    let parsed = next_event(&mut events, |event| matches!(event, Event::IpFilterParsed { .. })).await?;
    assert_eq!(parsed, Event::IpFilterParsed { rule_count: 0 });
    next_event(&mut events, |event| matches!(event, Event::SessionError { .. })).await?;
    assert!(harness.coordinator.is_running());
    assert_eq!(harness.probe.ip_filter_rules(), None);

    // Pointing the policy at a valid file reloads it.
    let fixed = harness.path("fixed.dat");
    std::fs::write(&fixed, "1.1.1.0 - 1.1.1.255 , 100 , example\n")?;
    harness
        .policy
        .update_policy(|policy| policy.ip_filtering_file = fixed.clone());
    let parsed = next_event(&mut events, |event| matches!(event, Event::IpFilterParsed { .. })).await?;
    assert_eq!(parsed, Event::IpFilterParsed { rule_count: 1 });
    Ok(())
}

#[tokio::test]
async fn watch_directory_adds_new_torrent_files() -> Result<()> {
    let harness = Harness::with_policy(|dir| PolicySnapshot {
        watch_dir: true,
        dir_to_watch: dir.path().join("watch"),
        ..test_policy(dir)
    })?;
    let watch = harness.path("watch");
    std::fs::create_dir_all(&watch)?;
    harness.start().await?;

    let fixture = TorrentFixture::single("watched.iso", 2_048);
    let dropped = watch.join("watched.torrent");
    std::fs::write(&dropped, fixture.bytes()?)?;
    std::fs::write(watch.join("notes.txt"), "not a torrent")?;

    let id = fixture.info_hash()?;
    eventually(|| harness.coordinator.registry().contains(&id)).await?;
    eventually(|| !dropped.exists()).await?;
    assert!(watch.join("notes.txt").exists());
    assert_eq!(
        harness.repository.record(&id).map(|r| r.download_path),
        Some(harness.path("downloads"))
    );
    Ok(())
}

#[tokio::test]
async fn watch_directory_stops_with_the_policy_flag() -> Result<()> {
    let harness = Harness::with_policy(|dir| PolicySnapshot {
        watch_dir: true,
        dir_to_watch: dir.path().join("watch"),
        ..test_policy(dir)
    })?;
    let watch = harness.path("watch");
    std::fs::create_dir_all(&watch)?;
    harness.start().await?;

    harness.policy.update_policy(|policy| policy.watch_dir = false);
    sleep(Duration::from_millis(50)).await;
    let late = watch.join("late.torrent");
    std::fs::write(&late, TorrentFixture::single("late.iso", 64).bytes()?)?;
    sleep(Duration::from_millis(150)).await;
    assert!(late.exists());
    assert!(harness.coordinator.registry().is_empty());
    Ok(())
}

fn streaming_policy(dir: &tempfile::TempDir) -> PolicySnapshot {
    PolicySnapshot {
        streaming_enabled: true,
        streaming_hostname: "127.0.0.1".into(),
        streaming_port: 0,
        ..test_policy(dir)
    }
}

#[tokio::test]
async fn streaming_listener_serves_whole_files_and_ranges() -> Result<()> {
    let harness = Harness::with_policy(streaming_policy)?;
    harness.start().await?;
    let fixture = TorrentFixture::single("clip.mp4", 10);
    let torrent = harness.add(&fixture).await?;
    std::fs::create_dir_all(harness.path("downloads"))?;
    std::fs::write(harness.path("downloads").join("clip.mp4"), b"0123456789")?;

    let url = harness
        .coordinator
        .stream_url(&torrent.id, 0)
        .expect("listener bound");
    let client = reqwest::Client::new();

    let full = client.get(&url).send().await?;
    assert_eq!(full.status(), reqwest::StatusCode::OK);
    assert_eq!(full.headers()["content-type"], "video/mp4");
    assert_eq!(full.headers()["accept-ranges"], "bytes");
    let etag = full.headers()["etag"].clone();
    assert_eq!(full.bytes().await?.as_ref(), b"0123456789");

    let partial = client.get(&url).header("range", "bytes=2-5").send().await?;
    assert_eq!(partial.status(), reqwest::StatusCode::PARTIAL_CONTENT);
    assert_eq!(partial.headers()["content-range"], "bytes 2-5/10");
    assert_eq!(partial.bytes().await?.as_ref(), b"2345");

    let tail = client.get(&url).header("range", "bytes=7-").send().await?;
    assert_eq!(tail.bytes().await?.as_ref(), b"789");

    let beyond = client.get(&url).header("range", "bytes=10-").send().await?;
    assert_eq!(beyond.status(), reqwest::StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(beyond.headers()["content-range"], "bytes */10");

    let cached = client.get(&url).header("if-none-match", etag).send().await?;
    assert_eq!(cached.status(), reqwest::StatusCode::NOT_MODIFIED);
    Ok(())
}

#[tokio::test]
async fn streaming_listener_rejects_unknown_torrents_and_files() -> Result<()> {
    let harness = Harness::with_policy(streaming_policy)?;
    harness.start().await?;
    let torrent = harness.add(&TorrentFixture::single("only.bin", 4)).await?;
    let addr = harness.coordinator.stream_address().expect("listener bound");
    let client = reqwest::Client::new();

    let unknown = make_stream_url(addr, &TorrentId::new("f".repeat(40)), 0);
    assert_eq!(client.get(&unknown).send().await?.status(), reqwest::StatusCode::NOT_FOUND);
    let past_end = make_stream_url(addr, &torrent.id, 5);
    assert_eq!(client.get(&past_end).send().await?.status(), reqwest::StatusCode::NOT_FOUND);
    let not_downloaded = make_stream_url(addr, &torrent.id, 0);
    assert_eq!(
        client.get(&not_downloaded).send().await?.status(),
        reqwest::StatusCode::NOT_FOUND
    );
    let malformed = format!("http://{addr}/stream?torrent={}", torrent.id);
    assert_eq!(client.get(&malformed).send().await?.status(), reqwest::StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn streaming_listener_follows_the_policy_and_the_engine() -> Result<()> {
    let harness = Harness::with_policy(test_policy)?;
    harness.start().await?;
    assert!(harness.coordinator.stream_address().is_none());

    harness.policy.update_policy(|policy| {
        policy.streaming_enabled = true;
        policy.streaming_port = 0;
    });
    eventually(|| harness.coordinator.stream_address().is_some()).await?;
    let addr = harness.coordinator.stream_address().expect("listener bound");

    harness.stop().await?;
    assert!(harness.coordinator.stream_address().is_none());
    assert!(harness.coordinator.stream_url(&TorrentId::new("ab"), 0).is_none());
    eventually(|| std::net::TcpStream::connect(addr).is_err()).await?;

    harness.start().await?;
    eventually(|| harness.coordinator.stream_address().is_some()).await?;
    harness.policy.update_policy(|policy| policy.streaming_enabled = false);
    eventually(|| harness.coordinator.stream_address().is_none()).await?;
    Ok(())
}

#[tokio::test]
async fn streaming_bind_failure_is_reported_without_stopping_the_engine() -> Result<()> {
    let taken = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = taken.local_addr()?.port();
    let harness = Harness::with_policy(|dir| PolicySnapshot {
        streaming_port: port,
        ..streaming_policy(dir)
    })?;
    let mut events = harness.subscribe();
    harness.start().await?;

    let error = next_event(&mut events, |event| matches!(event, Event::SessionError { .. })).await?;
    assert!(matches!(error, Event::SessionError { ref message } if message.contains("streaming")));
    assert!(harness.coordinator.is_running());
    assert!(harness.coordinator.stream_address().is_none());
    Ok(())
}

#[tokio::test]
async fn session_alerts_surface_as_session_and_nat_errors() -> Result<()> {
    let harness = Harness::new()?;
    harness.start().await?;
    let mut events = harness.subscribe();

    harness.probe.push_alert(NativeAlert::PortmapError {
        message: "upnp: no router".into(),
    });
    let nat = next_event(&mut events, |event| matches!(event, Event::NatError { .. })).await?;
    assert_eq!(
        nat,
        Event::NatError {
            message: "upnp: no router".into()
        }
    );

    harness.probe.push_alert(NativeAlert::ListenFailed {
        message: "address in use".into(),
    });
    let listen = next_event(&mut events, |event| matches!(event, Event::SessionError { .. })).await?;
    assert_eq!(
        listen,
        Event::SessionError {
            message: "address in use".into()
        }
    );

    harness.probe.push_alert(NativeAlert::SessionError {
        message: "dht bootstrap failed".into(),
    });
    let session = next_event(&mut events, |event| matches!(event, Event::SessionError { .. })).await?;
    assert_eq!(
        session,
        Event::SessionError {
            message: "dht bootstrap failed".into()
        }
    );
    assert!(harness.coordinator.is_running());
    Ok(())
}
