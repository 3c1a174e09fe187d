// src/observability/mod.rs
//! Metrics, tracing, and logging initialization
//!
//! Call `init_tracing()` and `init_metrics()` once at process startup.
//! Library code only emits through the `tracing` and `metrics` macros and
//! never touches exporter configuration.

use crate::utils::config::MetricsConfig;
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the tracing subscriber (idempotent in tests)
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| EngineError::Runtime(format!("failed to init tracing: {}", e)))?;

    Ok(())
}

/// Install the Prometheus metrics exporter
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if config.disabled {
        return Ok(());
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.prometheus_port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::Runtime(format!("failed to install metrics exporter: {}", e)))?;

    Ok(())
}
