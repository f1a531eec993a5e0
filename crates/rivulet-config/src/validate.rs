//! Hard validation and guard-rail normalisation for configuration values.

use rivulet_torrent_core::{ProxyType, SessionSettings};

use crate::error::{ConfigError, ConfigResult};
use crate::model::AppConfig;

/// Reject configurations the session cannot act on.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] naming the first offending field.
pub fn validate_config(config: &AppConfig) -> ConfigResult<()> {
    if config.storage.data_dir.as_os_str().is_empty() {
        return Err(invalid("storage", "data_dir", None, "must not be empty"));
    }
    let policy = &config.policy;
    if policy.watch_dir && policy.dir_to_watch.as_os_str().is_empty() {
        return Err(invalid(
            "policy",
            "dir_to_watch",
            None,
            "required when watch_dir is enabled",
        ));
    }
    if policy.ip_filtering && policy.ip_filtering_file.as_os_str().is_empty() {
        return Err(invalid(
            "policy",
            "ip_filtering_file",
            None,
            "required when ip_filtering is enabled",
        ));
    }
    if policy.move_after_download && policy.move_after_download_in.as_os_str().is_empty() {
        return Err(invalid(
            "policy",
            "move_after_download_in",
            None,
            "required when move_after_download is enabled",
        ));
    }
    if policy.streaming_enabled && policy.streaming_hostname.trim().is_empty() {
        return Err(invalid(
            "policy",
            "streaming_hostname",
            None,
            "required when streaming_enabled is set",
        ));
    }
    if policy.custom_battery_control_value > 100 {
        return Err(invalid(
            "policy",
            "custom_battery_control_value",
            Some(policy.custom_battery_control_value.to_string()),
            "must be a percentage",
        ));
    }
    Ok(())
}

/// Produce the effective engine settings plus a note for every adjusted value.
#[must_use]
pub fn normalize_settings(settings: &SessionSettings) -> (SessionSettings, Vec<String>) {
    let defaults = SessionSettings::default();
    let mut warnings = Vec::new();
    let mut effective = settings.clone();

    if effective.port_range_first == 0 || effective.port_range_second == 0 {
        warnings.push("port range contains port 0; restoring default range".to_string());
        effective.port_range_first = SessionSettings::DEFAULT_PORT_RANGE_FIRST;
        effective.port_range_second = SessionSettings::DEFAULT_PORT_RANGE_SECOND;
    } else if effective.port_range_first > effective.port_range_second {
        warnings.push(format!(
            "port range {}-{} is reversed; swapping bounds",
            effective.port_range_first, effective.port_range_second
        ));
        std::mem::swap(
            &mut effective.port_range_first,
            &mut effective.port_range_second,
        );
    }

    effective.download_rate_limit = clamp_rate_limit(
        "download_rate_limit",
        effective.download_rate_limit,
        &mut warnings,
    );
    effective.upload_rate_limit = clamp_rate_limit(
        "upload_rate_limit",
        effective.upload_rate_limit,
        &mut warnings,
    );

    for (field, value, fallback) in [
        (
            "active_downloads",
            &mut effective.active_downloads,
            defaults.active_downloads,
        ),
        ("active_seeds", &mut effective.active_seeds, defaults.active_seeds),
        ("active_limit", &mut effective.active_limit, defaults.active_limit),
        (
            "max_peer_list_size",
            &mut effective.max_peer_list_size,
            defaults.max_peer_list_size,
        ),
        (
            "connections_limit",
            &mut effective.connections_limit,
            defaults.connections_limit,
        ),
        (
            "connections_limit_per_torrent",
            &mut effective.connections_limit_per_torrent,
            defaults.connections_limit_per_torrent,
        ),
        (
            "uploads_limit_per_torrent",
            &mut effective.uploads_limit_per_torrent,
            defaults.uploads_limit_per_torrent,
        ),
    ] {
        if *value <= 0 {
            warnings.push(format!("{field} <= 0 requested; using default {fallback}"));
            *value = fallback;
        }
    }

    if effective.proxy_type != ProxyType::None {
        if effective.proxy_port == 0 {
            warnings.push(format!(
                "proxy_port 0 requested; using default {}",
                SessionSettings::DEFAULT_PROXY_PORT
            ));
            effective.proxy_port = SessionSettings::DEFAULT_PROXY_PORT;
        }
        if effective.proxy_address.trim().is_empty() {
            warnings.push("proxy_address is empty; disabling proxy".to_string());
            effective.proxy_type = ProxyType::None;
        }
    }

    (effective, warnings)
}

fn clamp_rate_limit(field: &str, value: i64, warnings: &mut Vec<String>) -> i64 {
    if value < 0 {
        warnings.push(format!("{field} < 0 requested; disabling limit"));
        0
    } else {
        value
    }
}

fn invalid(
    section: &'static str,
    field: &'static str,
    value: Option<String>,
    reason: &'static str,
) -> ConfigError {
    ConfigError::InvalidField {
        section,
        field,
        value,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn defaults_pass_untouched() {
        let (effective, warnings) = normalize_settings(&SessionSettings::default());
        assert_eq!(effective, SessionSettings::default());
        assert!(warnings.is_empty());
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn port_ranges_are_repaired() {
        let (effective, warnings) = normalize_settings(&SessionSettings {
            port_range_first: 0,
            ..SessionSettings::default()
        });
        assert_eq!(
            effective.port_range_first,
            SessionSettings::DEFAULT_PORT_RANGE_FIRST
        );
        assert_eq!(warnings.len(), 1);

        let (effective, _) = normalize_settings(&SessionSettings {
            port_range_first: 6_900,
            port_range_second: 6_881,
            ..SessionSettings::default()
        });
        assert_eq!(
            (effective.port_range_first, effective.port_range_second),
            (6_881, 6_900)
        );
    }

    #[test]
    fn negative_limits_are_clamped() {
        let (effective, warnings) = normalize_settings(&SessionSettings {
            download_rate_limit: -1,
            active_limit: 0,
            connections_limit: -5,
            ..SessionSettings::default()
        });
        let defaults = SessionSettings::default();
        assert_eq!(effective.download_rate_limit, 0);
        assert_eq!(effective.active_limit, defaults.active_limit);
        assert_eq!(effective.connections_limit, defaults.connections_limit);
        assert_eq!(warnings.len(), 3);
    }

    #[test]
    fn proxy_settings_are_made_consistent() {
        let (effective, _) = normalize_settings(&SessionSettings {
            proxy_type: ProxyType::Socks5,
            proxy_address: "proxy.local".into(),
            proxy_port: 0,
            ..SessionSettings::default()
        });
        assert_eq!(effective.proxy_port, SessionSettings::DEFAULT_PROXY_PORT);
        assert_eq!(effective.proxy_type, ProxyType::Socks5);

        let (effective, warnings) = normalize_settings(&SessionSettings {
            proxy_type: ProxyType::Http,
            ..SessionSettings::default()
        });
        assert_eq!(effective.proxy_type, ProxyType::None);
        assert_eq!(warnings, vec!["proxy_address is empty; disabling proxy"]);
    }

    #[test]
    fn enabled_services_need_their_paths() {
        let mut config = AppConfig::default();
        config.policy.watch_dir = true;
        let err = validate_config(&config).expect_err("watch dir missing");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "dir_to_watch",
                ..
            }
        ));

        config.policy.dir_to_watch = PathBuf::from("/srv/watch");
        config.policy.ip_filtering = true;
        let err = validate_config(&config).expect_err("filter file missing");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "ip_filtering_file",
                ..
            }
        ));

        config.policy.ip_filtering_file = PathBuf::from("/srv/filter.dat");
        config.policy.streaming_enabled = true;
        config.policy.streaming_hostname = " ".into();
        let err = validate_config(&config).expect_err("hostname missing");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "streaming_hostname",
                ..
            }
        ));
        config.policy.streaming_hostname = "0.0.0.0".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn battery_thresholds_are_percentages() {
        let mut config = AppConfig::default();
        config.policy.custom_battery_control_value = 101;
        let err = validate_config(&config).expect_err("out of range");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "custom_battery_control_value",
                value: Some(ref value),
                ..
            } if value == "101"
        ));
    }
}
