//! Prometheus-backed metrics registry.
//!
//! # Design
//! - Collector registration stays private; callers only see typed update methods.
//! - One cloneable handle is shared by the coordinator and the composition root.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    commands_total: IntCounterVec,
    events_dispatched_total: IntCounterVec,
    listener_failures_total: IntCounter,
    active_torrents: IntGauge,
    engine_running: IntGauge,
}

/// Snapshot of the gauges and counters used in tests and health output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Live torrent tasks.
    pub active_torrents: i64,
    /// Whether the engine is running.
    pub engine_running: bool,
    /// Listener failures observed by the event bus.
    pub listener_failures_total: u64,
}

impl Metrics {
    /// Construct a registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any collector cannot be built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let commands_total = IntCounterVec::new(
            Opts::new("rivulet_commands_total", "Coordinator commands processed"),
            &["command"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "rivulet_commands_total",
            source,
        })?;
        let events_dispatched_total = IntCounterVec::new(
            Opts::new(
                "rivulet_events_dispatched_total",
                "Events dispatched on the bus by kind",
            ),
            &["kind"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "rivulet_events_dispatched_total",
            source,
        })?;
        let listener_failures_total = IntCounter::with_opts(Opts::new(
            "rivulet_listener_failures_total",
            "Listener callbacks that failed or panicked",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "rivulet_listener_failures_total",
            source,
        })?;
        let active_torrents = IntGauge::with_opts(Opts::new(
            "rivulet_active_torrents",
            "Torrent tasks registered with the engine",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "rivulet_active_torrents",
            source,
        })?;
        let engine_running = IntGauge::with_opts(Opts::new(
            "rivulet_engine_running",
            "1 while the engine is running",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "rivulet_engine_running",
            source,
        })?;

        register(&registry, "rivulet_commands_total", &commands_total)?;
        register(
            &registry,
            "rivulet_events_dispatched_total",
            &events_dispatched_total,
        )?;
        register(
            &registry,
            "rivulet_listener_failures_total",
            &listener_failures_total,
        )?;
        register(&registry, "rivulet_active_torrents", &active_torrents)?;
        register(&registry, "rivulet_engine_running", &engine_running)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                commands_total,
                events_dispatched_total,
                listener_failures_total,
                active_torrents,
                engine_running,
            }),
        })
    }

    /// Count one processed coordinator command.
    pub fn inc_command(&self, command: &str) {
        self.inner
            .commands_total
            .with_label_values(&[command])
            .inc();
    }

    /// Count one dispatched event.
    pub fn inc_event(&self, kind: &str) {
        self.inner
            .events_dispatched_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Add newly observed listener failures.
    pub fn add_listener_failures(&self, count: u64) {
        self.inner.listener_failures_total.inc_by(count);
    }

    /// Set the active torrent gauge.
    pub fn set_active_torrents(&self, count: usize) {
        self.inner
            .active_torrents
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Record whether the engine is running.
    pub fn set_engine_running(&self, running: bool) {
        self.inner.engine_running.set(i64::from(running));
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the output is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Point-in-time view of the gauges.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_torrents: self.inner.active_torrents.get(),
            engine_running: self.inner.engine_running.get() == 1,
            listener_failures_total: self.inner.listener_failures_total.get(),
        }
    }
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}
