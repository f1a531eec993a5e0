use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use rivulet_config::{
    AppConfig, ConfigError, ConfigPolicySource, ConfigWatcher, load,
};
use rivulet_telemetry::LogFormat;
use rivulet_torrent_core::{
    BatteryStatus, NetworkStatus, PolicySignal, PolicySource, SessionSettings, SettingKey,
};
use tempfile::TempDir;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn write_config(path: &Path, body: &str, stamp_offset: u64) -> Result<()> {
    fs::write(path, body)?;
    // Force a distinct modification time regardless of filesystem granularity.
    File::options()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + stamp_offset))?;
    Ok(())
}

#[test]
fn missing_file_loads_defaults() -> Result<()> {
    let dir = TempDir::new()?;
    let loaded = load(&dir.path().join("absent.yaml"))?;
    assert_eq!(loaded.config, AppConfig::default());
    assert!(loaded.warnings.is_empty());
    Ok(())
}

#[test]
fn partial_documents_keep_defaults_for_the_rest() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("rivulet.yaml");
    write_config(
        &path,
        "storage:\n  data_dir: /var/lib/rivulet\nsession:\n  dht_enabled: false\n  upload_rate_limit: -10\npolicy:\n  keep_alive: false\nlogging:\n  level: debug\n  format: json\n",
        0,
    )?;

    let loaded = load(&path)?;
    let config = &loaded.config;
    assert_eq!(config.storage.data_dir, Path::new("/var/lib/rivulet"));
    assert_eq!(config.storage.metadata_dir(), Path::new("/var/lib/rivulet/metadata"));
    assert!(!config.session.dht_enabled);
    assert_eq!(config.session.upload_rate_limit, 0);
    assert_eq!(
        config.session.port_range_first,
        SessionSettings::DEFAULT_PORT_RANGE_FIRST
    );
    assert!(!config.policy.keep_alive);
    assert_eq!(loaded.warnings, vec!["upload_rate_limit < 0 requested; disabling limit"]);

    let logging = config.logging.logging_config();
    assert_eq!(logging.level, "debug");
    assert_eq!(logging.format, LogFormat::Json);
    Ok(())
}

#[test]
fn invalid_values_are_reported_with_their_field() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("rivulet.yaml");
    write_config(&path, "policy:\n  move_after_download: true\n", 0)?;

    let err = load(&path).expect_err("destination missing");
    assert!(matches!(
        err,
        ConfigError::InvalidField {
            section: "policy",
            field: "move_after_download_in",
            ..
        }
    ));

    write_config(&path, "session: [not, a, map]\n", 1)?;
    assert!(matches!(load(&path), Err(ConfigError::Parse { .. })));
    Ok(())
}

#[tokio::test]
async fn watcher_applies_changes_and_keeps_values_on_bad_reloads() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("rivulet.yaml");
    write_config(&path, "policy:\n  watch_dir: false\n", 0)?;
    let source = ConfigPolicySource::new(&load(&path)?.config);
    let mut signals = source.subscribe();
    let mut watcher = ConfigWatcher::new(path.clone(), source.clone());

    assert!(watcher.poll_once()?.is_empty());

    write_config(
        &path,
        "session:\n  download_rate_limit: 512000\npolicy:\n  unmetered_connections_only: true\n",
        1,
    )?;
    let changed = watcher.poll_once()?;
    assert_eq!(
        changed,
        vec![SettingKey::DownloadRateLimit, SettingKey::UnmeteredConnectionsOnly]
    );
    assert_eq!(source.session_settings().download_rate_limit, 512_000);
    assert!(source.policy().unmetered_connections_only);
    assert_eq!(
        signals.recv().await?,
        PolicySignal::SettingChanged(SettingKey::DownloadRateLimit)
    );
    assert_eq!(
        signals.recv().await?,
        PolicySignal::SettingChanged(SettingKey::UnmeteredConnectionsOnly)
    );

    write_config(&path, "policy: {{{\n", 2)?;
    assert!(watcher.poll_once().is_err());
    assert!(source.policy().unmetered_connections_only);
    assert_eq!(source.session_settings().download_rate_limit, 512_000);
    Ok(())
}

#[tokio::test]
async fn spawned_watcher_reloads_until_cancelled() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("rivulet.yaml");
    write_config(&path, "", 0)?;
    let source = ConfigPolicySource::new(&AppConfig::default());
    let mut signals = source.subscribe();
    let cancel = CancellationToken::new();
    let handle = ConfigWatcher::new(path.clone(), source.clone())
        .with_interval(Duration::from_millis(10))
        .spawn(cancel.clone());

    write_config(&path, "policy:\n  keep_alive: false\n", 1)?;
    let signal = timeout(Duration::from_secs(2), signals.recv()).await??;
    assert_eq!(signal, PolicySignal::SettingChanged(SettingKey::KeepAlive));
    assert!(!source.policy().keep_alive);

    cancel.cancel();
    timeout(Duration::from_secs(2), handle).await??;
    Ok(())
}

#[tokio::test]
async fn device_conditions_publish_only_real_changes() -> Result<()> {
    let source = ConfigPolicySource::new(&AppConfig::default());
    let mut signals = source.subscribe();

    source.set_network(NetworkStatus::default());
    let metered = NetworkStatus {
        metered: true,
        roaming: false,
    };
    source.set_network(metered);
    let low = BatteryStatus {
        level: 10,
        charging: false,
    };
    source.set_battery(low);

    assert_eq!(signals.recv().await?, PolicySignal::NetworkChanged(metered));
    assert_eq!(signals.recv().await?, PolicySignal::BatteryChanged(low));
    assert_eq!(source.network(), metered);
    assert_eq!(source.battery(), low);
    Ok(())
}
