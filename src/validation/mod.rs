// src/validation/mod.rs
//! Intent validation pipeline
//!
//! An ordered chain of independent validators with early-exit semantics:
//!
//! Schema → State → Range → Permission → Resource
//!
//! The first failing stage drops the intent from the output silently — no
//! error ever reaches the issuing player. Rejections are visible only
//! through the statistics sink and telemetry.

pub mod payload;
pub mod pipeline;
pub mod stages;
pub mod stats;

pub use payload::{IntentPayload, IntentRecord, RejectionCode, ValidIntent};
pub use pipeline::{IntentInFlight, ValidationPipeline, ValidationStage};
pub use stats::{StatsSnapshot, ValidationStats};
