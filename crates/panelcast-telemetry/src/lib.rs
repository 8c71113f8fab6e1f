mod metrics;

pub use metrics::{MetricSample, MetricType, MetricsCollector, PROMETHEUS_CONTENT_TYPE};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Stable metric names exposed on `/metrics`.
pub mod names {
    pub const SESSIONS_CONNECTED: &str = "panelcast_sessions_connected";
    pub const SESSIONS_OPENED_TOTAL: &str = "panelcast_sessions_opened_total";
    pub const EVENTS_BROADCAST_TOTAL: &str = "panelcast_events_broadcast_total";
    pub const ENVELOPES_DROPPED_TOTAL: &str = "panelcast_envelopes_dropped_total";
    pub const HTTP_REQUESTS_TOTAL: &str = "panelcast_http_requests_total";
}

/// Collector with `# HELP` text registered for every panelcast metric.
pub fn panel_metrics() -> MetricsCollector {
    let m = MetricsCollector::new();
    m.describe(names::SESSIONS_CONNECTED, "WebSocket sessions currently connected.");
    m.describe(names::SESSIONS_OPENED_TOTAL, "WebSocket sessions accepted since start.");
    m.describe(names::EVENTS_BROADCAST_TOTAL, "Domain events broadcast, by event type.");
    m.describe(
        names::ENVELOPES_DROPPED_TOTAL,
        "Envelopes discarded because a session queue was full.",
    );
    m.describe(names::HTTP_REQUESTS_TOTAL, "REST requests served, by endpoint and status.");
    m.gauge_set(names::SESSIONS_CONNECTED, &[], 0.0);
    m
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "panelcast_server" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Filter directive string built from the configured levels.
    pub fn filter_directives(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Install the global tracing subscriber.
///
/// Returns `false` when a subscriber was already installed (for example by an
/// embedding host); the existing one is left in place.
pub fn init_telemetry(config: &TelemetryConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .is_ok()
}
