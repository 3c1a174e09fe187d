// src/telemetry/mod.rs
//! Execution telemetry and watchdog escalation
//!
//! - **Monitor**: fans raw telemetry and watchdog alerts out to registered
//!   listeners; a failing listener is logged and skipped, never fatal
//! - **Watchdog**: counts consecutive per-user failures and escalates with
//!   a one-shot forced-cold-sandbox request once the threshold is crossed

pub mod monitor;
pub mod watchdog;

pub use monitor::{ExporterBridge, TelemetryListener, TelemetryMonitor};
pub use watchdog::{Watchdog, WatchdogAlert};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One telemetry event from a unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// User (runner role) or room (processor role) the unit worked on
    pub subject: String,

    /// Tick the unit ran in
    pub tick: u64,

    /// CPU consumed in milliseconds
    pub cpu_used_ms: u64,

    /// The sandbox's wall-clock interrupt fired
    pub timed_out: bool,

    /// The script raised an uncaught error or breached its heap ceiling
    pub script_error: bool,

    /// The unit of work itself threw (worker-loop fault, not script fault)
    pub scheduler_fault: bool,

    /// Error text, if any
    pub error: Option<String>,

    /// Heap bytes used by the run
    pub heap_used: u64,

    /// Wall-clock capture time
    pub at: DateTime<Utc>,
}

impl TelemetryRecord {
    /// Telemetry for a completed sandbox execution
    pub fn execution(
        subject: impl Into<String>,
        tick: u64,
        cpu_used_ms: u64,
        timed_out: bool,
        script_error: bool,
        error: Option<String>,
        heap_used: u64,
    ) -> Self {
        Self {
            subject: subject.into(),
            tick,
            cpu_used_ms,
            timed_out,
            script_error,
            scheduler_fault: false,
            error,
            heap_used,
            at: Utc::now(),
        }
    }

    /// Telemetry for a unit of work that escaped its worker closure
    pub fn scheduler_fault(subject: impl Into<String>, tick: u64, error: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            tick,
            cpu_used_ms: 0,
            timed_out: false,
            script_error: false,
            scheduler_fault: true,
            error: Some(error.into()),
            heap_used: 0,
            at: Utc::now(),
        }
    }

    /// A failing event for watchdog purposes
    pub fn is_failure(&self) -> bool {
        self.timed_out || self.script_error || self.scheduler_fault
    }
}
