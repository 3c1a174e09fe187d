// src/utils/config.rs
//! Engine configuration
//!
//! Loaded from an optional `shardsim.toml` file with `SHARDSIM_*`
//! environment overrides (e.g. `SHARDSIM_LOOP__MINIMUM_TICK_DURATION_MS=500`).
//! Every section has sensible defaults so a bare environment still runs.

use crate::utils::errors::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sandbox and script-engine settings
    pub runtime: RuntimeConfig,

    /// Work queue polling behavior
    pub queues: QueueConfig,

    /// Worker pool sizing
    pub workers: WorkerConfig,

    /// Tick loop pacing
    #[serde(rename = "loop")]
    pub tick_loop: TickLoopConfig,

    /// Watchdog escalation thresholds
    pub watchdog: WatchdogConfig,

    /// Metrics exporter settings
    pub metrics: MetricsConfig,
}

/// Sandbox and script-engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Default CPU limit per execution in milliseconds
    pub default_cpu_limit_ms: u64,

    /// Extra wall-clock allowance before the interrupt fires
    pub interrupt_buffer_ms: u64,

    /// Heap ceiling per sandbox in bytes
    pub heap_limit_bytes: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_cpu_limit_ms: 100,
            interrupt_buffer_ms: 50,
            heap_limit_bytes: 256 * 1024 * 1024, // 256MB per sandbox
        }
    }
}

/// Work queue polling behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Initial fetch backoff in milliseconds
    pub fetch_backoff_min_ms: u64,

    /// Backoff ceiling in milliseconds
    pub fetch_backoff_max_ms: u64,

    /// Poll interval for drain waits in milliseconds
    pub drain_poll_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            fetch_backoff_min_ms: 2,
            fetch_backoff_max_ms: 50,
            drain_poll_ms: 10,
        }
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Concurrent script-runner loops
    pub runner_concurrency: usize,

    /// Concurrent room-processor loops
    pub processor_concurrency: usize,

    /// How long an idle worker blocks on fetch before re-polling, ms
    pub idle_wait_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            runner_concurrency: 4,
            processor_concurrency: 4,
            idle_wait_ms: 100,
        }
    }
}

/// Tick loop pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickLoopConfig {
    /// Minimum wall-clock duration of one tick in milliseconds
    pub minimum_tick_duration_ms: u64,

    /// Save a history chunk every N ticks
    pub history_chunk_size: u64,
}

impl Default for TickLoopConfig {
    fn default() -> Self {
        Self {
            minimum_tick_duration_ms: 1000,
            history_chunk_size: 20,
        }
    }
}

/// Watchdog escalation thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Consecutive failures before an alert fires
    pub failure_threshold: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
        }
    }
}

/// Metrics exporter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus scrape endpoint port
    pub prometheus_port: u16,

    /// Disable the exporter entirely (tests, embedded use)
    pub disabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prometheus_port: 9184,
            disabled: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `shardsim.toml` and the environment
    pub fn load() -> Result<Self> {
        Self::load_from("shardsim")
    }

    /// Load configuration from a specific file stem and the environment
    pub fn load_from(stem: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(stem).required(false))
            .add_source(Environment::with_prefix("SHARDSIM").separator("__"))
            .build()?;

        let config = settings.try_deserialize()?;
        Ok(config)
    }
}
