//! Prometheus metrics for probe attempts, node outcomes and wait times.
//!
//! Metrics go through the `metrics` facade; without an installed recorder
//! every call is a no-op. A recorder is installed by [`init_metrics`] when
//! metrics are enabled, optionally serving `/metrics` on `listen_addr` or
//! writing a textfile for a node exporter's textfile collector.
//!
//! # Example
//!
//! ```rust,no_run
//! use stackup_core::telemetry::metrics::{NodeMetrics, ProbeMetrics};
//!
//! ProbeMetrics::record_attempt("database");
//! NodeMetrics::record_outcome("database", &stackup_core::Outcome::Ready, std::time::Duration::from_secs(3));
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::report::Outcome;

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Serve Prometheus text on this address for the duration of the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_addr: Option<SocketAddr>,

    /// Write Prometheus text here once the run finishes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textfile_path: Option<PathBuf>,

    /// Histogram buckets for wait durations (in seconds)
    #[serde(default = "default_wait_buckets")]
    pub wait_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: None,
            textfile_path: None,
            wait_buckets: default_wait_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_wait_buckets() -> Vec<f64> {
    vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
}

/// Handle on the installed recorder.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// Registry that records nothing.
    pub fn disabled() -> Self {
        Self {
            prometheus_handle: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }

    /// Write the current metrics to `path` atomically (write + rename), the
    /// way textfile collectors expect.
    pub fn write_textfile(&self, path: &Path) -> std::io::Result<()> {
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, self.render())?;
        std::fs::rename(&tmp, path)
    }
}

/// Initialize the metrics subsystem.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed or the listener
/// cannot bind.
pub fn init_metrics(config: &MetricsConfig) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let mut builder = PrometheusBuilder::new();

    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    builder = builder.set_buckets(&config.wait_buckets)?;

    let handle = match config.listen_addr {
        Some(addr) => {
            let (recorder, exporter) = builder.with_http_listener(addr).build()?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .map_err(|_| anyhow::anyhow!("a metrics recorder is already installed"))?;
            tokio::spawn(async move {
                if let Err(e) = exporter.await {
                    tracing::warn!(error = ?e, "Metrics listener stopped");
                }
            });
            handle
        }
        None => builder.install_recorder()?,
    };

    register_metric_descriptions();

    tracing::info!(
        listen_addr = ?config.listen_addr,
        textfile = ?config.textfile_path,
        "Metrics initialized"
    );

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

/// Register all metric descriptions.
fn register_metric_descriptions() {
    describe_counter!(
        "stackup_probe_attempts_total",
        "Readiness probe invocations by node"
    );
    describe_counter!(
        "stackup_node_outcomes_total",
        "Terminal node outcomes by node and outcome"
    );
    describe_histogram!(
        "stackup_node_wait_seconds",
        metrics::Unit::Seconds,
        "Time from a node becoming eligible to its terminal outcome"
    );
    describe_counter!(
        "stackup_errors_total",
        "Errors constructed, by code and category"
    );
}

/// Probe attempt counter.
pub struct ProbeMetrics;

impl ProbeMetrics {
    pub fn record_attempt(node: &str) {
        counter!("stackup_probe_attempts_total", "node" => node.to_string()).increment(1);
    }
}

/// Per-node outcome metrics.
pub struct NodeMetrics;

impl NodeMetrics {
    /// Record a node's terminal outcome and how long it took.
    pub fn record_outcome(node: &str, outcome: &Outcome, elapsed: Duration) {
        counter!(
            "stackup_node_outcomes_total",
            "node" => node.to_string(),
            "outcome" => outcome.label(),
        )
        .increment(1);

        histogram!("stackup_node_wait_seconds", "node" => node.to_string())
            .record(elapsed.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_defaults() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert!(config.listen_addr.is_none());
        assert!(!config.wait_buckets.is_empty());
    }

    #[test]
    fn test_disabled_registry_renders_nothing() {
        let registry = init_metrics(&MetricsConfig::default()).unwrap();
        assert!(!registry.is_enabled());
        assert!(registry.render().is_empty());
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        ProbeMetrics::record_attempt("database");
        NodeMetrics::record_outcome("database", &Outcome::Ready, Duration::from_millis(250));
    }
}
