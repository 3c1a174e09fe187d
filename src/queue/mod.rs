// src/queue/mod.rs
//! Distributed work queues
//!
//! Named FIFO channels with pending/processing semantics:
//!
//! - **Fetch** atomically moves one item pending → processing so a crashed
//!   consumer never loses it
//! - **MarkDone** acknowledges completion; its absence is the recovery signal
//! - **Reset** moves everything in processing back to pending on startup
//! - **WaitUntilDrained** is the orchestrator's phase-completion handshake

pub mod work_queue;

pub use work_queue::{QueueMode, QueueStore, WorkQueue};
