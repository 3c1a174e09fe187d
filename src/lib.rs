// src/lib.rs
//! Shardsim Simulation Engine Library
//!
//! This library provides the tick-driven simulation core for a persistent
//! multiplayer strategy-game server.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **orchestrator**: tick clock, lifecycle observation, the main loop
//! - **queue**: named work queues with pending/processing semantics
//! - **workers**: runner and processor pools draining the queues
//! - **runtime**: sandboxed script execution and the warm instance pool
//! - **validation**: the staged intent validation pipeline
//! - **mutation**: accumulate-then-flush batch writers
//! - **world**: read-only room and global snapshots
//! - **telemetry**: execution telemetry, fan-out, watchdog escalation
//! - **ports**: collaborator contracts plus the in-memory backplane
//! - **observability**: metrics, tracing, and logging
//! - **utils**: configuration and error types

// Public module exports
pub mod mutation;
pub mod observability;
pub mod orchestrator;
pub mod ports;
pub mod queue;
pub mod runtime;
pub mod telemetry;
pub mod utils;
pub mod validation;
pub mod workers;
pub mod world;

// Re-export commonly used types
pub use orchestrator::{TickClock, TickLoop};
pub use queue::{QueueMode, QueueStore, WorkQueue};
pub use runtime::{Sandbox, SandboxPool};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = BuildInfo::current();
        assert!(!info.version.is_empty());
    }
}
