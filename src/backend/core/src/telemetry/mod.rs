//! Telemetry: structured logging and Prometheus metrics.
//!
//! - **Logging**: `tracing` events to stderr in JSON, pretty or compact form,
//!   with credential redaction for free-form error text
//! - **Metrics**: probe attempts, node outcomes and wait times through the
//!   `metrics` facade, exported by `metrics-exporter-prometheus`
//!
//! # Example
//!
//! ```rust,no_run
//! use stackup_core::telemetry::{init_telemetry, TelemetryConfig};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let telemetry = init_telemetry(&TelemetryConfig::default())?;
//! // ... run ...
//! telemetry.flush()?;
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, CredentialRedactor, LogFormat, LoggingConfig, RedactionConfig};
pub use metrics::{init_metrics, MetricsConfig, MetricsRegistry, NodeMetrics, ProbeMetrics};

use serde::{Deserialize, Serialize};

/// Unified telemetry configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Keeps telemetry state alive for the process lifetime.
#[derive(Debug)]
pub struct TelemetryHandle {
    metrics: MetricsRegistry,
    textfile_path: Option<std::path::PathBuf>,
}

impl TelemetryHandle {
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Write the metrics textfile, if one is configured.
    pub fn flush(&self) -> anyhow::Result<()> {
        if let (true, Some(path)) = (self.metrics.is_enabled(), &self.textfile_path) {
            self.metrics.write_textfile(path)?;
            tracing::debug!(path = %path.display(), "Wrote metrics textfile");
        }
        Ok(())
    }
}

/// Initialize logging and metrics.
///
/// # Errors
///
/// Returns an error if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryHandle> {
    init_logging(&config.logging)?;
    let metrics = init_metrics(&config.metrics)?;

    Ok(TelemetryHandle {
        metrics,
        textfile_path: config.metrics.textfile_path.clone(),
    })
}
