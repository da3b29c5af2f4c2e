//! Metrics collection for the Test-Session Gateway
//!
//! Provides basic counters for monitoring gateway health and throughput.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Gateway metrics collector.
#[derive(Default)]
pub struct Metrics {
    /// Total sessions created since startup
    sessions_created: AtomicU64,

    /// Total sessions that reached a terminal state since startup
    sessions_ended: AtomicU64,

    /// Total accepted measurements since startup
    measurements_accepted: AtomicU64,

    /// Total rejected measurements (validation/sequence) since startup
    measurements_rejected: AtomicU64,

    /// Total alerts recorded since startup
    alerts_recorded: AtomicU64,

    /// Total streaming connections admitted since startup
    connections_opened: AtomicU64,

    /// Total streaming connections closed since startup
    connections_closed: AtomicU64,

    /// Total events fanned out since startup
    events_broadcast: AtomicU64,

    /// Current active sessions count
    active_sessions: AtomicU64,

    /// Startup timestamp (unix seconds)
    startup_time: AtomicU64,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            startup_time: AtomicU64::new(now),
            ..Default::default()
        }
    }

    /// Record a session creation.
    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session reaching a terminal state.
    pub fn session_ended(&self) {
        self.sessions_ended.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an accepted measurement.
    pub fn measurement_accepted(&self) {
        self.measurements_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected measurement.
    pub fn measurement_rejected(&self) {
        self.measurements_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a recorded alert.
    pub fn alert_recorded(&self) {
        self.alerts_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an admitted connection.
    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a closed connection.
    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fanned-out event.
    pub fn event_broadcast(&self) {
        self.events_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let uptime_secs = now.saturating_sub(self.startup_time.load(Ordering::Relaxed));

        MetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_ended: self.sessions_ended.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            measurements_accepted: self.measurements_accepted.load(Ordering::Relaxed),
            measurements_rejected: self.measurements_rejected.load(Ordering::Relaxed),
            alerts_recorded: self.alerts_recorded.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            events_broadcast: self.events_broadcast.load(Ordering::Relaxed),
            uptime_secs,
        }
    }

    /// Get active session count.
    pub fn active_session_count(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }
}

/// Snapshot of current metrics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Total sessions created
    pub sessions_created: u64,

    /// Total sessions ended
    pub sessions_ended: u64,

    /// Currently active sessions
    pub active_sessions: u64,

    /// Total accepted measurements
    pub measurements_accepted: u64,

    /// Total rejected measurements
    pub measurements_rejected: u64,

    /// Total alerts recorded
    pub alerts_recorded: u64,

    /// Total connections admitted
    pub connections_opened: u64,

    /// Total connections closed
    pub connections_closed: u64,

    /// Total events fanned out
    pub events_broadcast: u64,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl MetricsSnapshot {
    /// Calculate accepted measurements per second.
    pub fn measurements_per_second(&self) -> f64 {
        if self.uptime_secs == 0 {
            0.0
        } else {
            self.measurements_accepted as f64 / self.uptime_secs as f64
        }
    }

    /// Share of submitted measurements that were accepted.
    pub fn acceptance_rate(&self) -> f64 {
        let total = self.measurements_accepted + self.measurements_rejected;
        if total == 0 {
            1.0
        } else {
            self.measurements_accepted as f64 / total as f64
        }
    }
}

/// Global metrics instance.
static GLOBAL_METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get the global metrics instance.
pub fn global_metrics() -> Arc<Metrics> {
    GLOBAL_METRICS
        .get_or_init(|| Arc::new(Metrics::new()))
        .clone()
}
