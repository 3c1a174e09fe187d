// src/runtime/mod.rs
//! Sandboxed script execution
//!
//! This module provides the isolated execution environment for untrusted
//! player scripts:
//!
//! - **Engine**: the ports-and-adapters seam around the embedded script
//!   engine — the rest of the core only sees `ScriptEngine`
//! - **Sandbox**: one-shot execution with wall-clock interrupt and heap
//!   ceiling; always returns a result, never throws for broken user code
//! - **Sandbox Pool**: warm instances keyed by (user, code hash) to
//!   amortize engine startup, with a forced-cold escape hatch
//!
//! # Architecture
//!
//! ```text
//! Worker ──▶ SandboxPool.rent(user, hash) ──▶ Sandbox
//!                                               │ execute(ctx)
//!                                               ▼
//!                                    ScriptEngine (trait)
//!                                     │           │
//!                               LocalEngine   test stubs
//! ```

pub mod engine;
pub mod sandbox;
pub mod sandbox_pool;

pub use engine::{
    EngineFault, EngineJob, HostBridge, InterruptHandle, LocalEngine, NotifyRequest, ScriptEngine,
};
pub use sandbox::{ExecutionContext, ExecutionMetrics, ExecutionResult, Sandbox};
pub use sandbox_pool::{EngineFactory, PoolStats, SandboxPool};
