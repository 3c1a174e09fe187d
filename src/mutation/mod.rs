// src/mutation/mod.rs
//! Mutation batching and dispatch
//!
//! Writers accumulate upserts, patches, removals, and log entries in memory
//! during one processing unit, then flush exactly once as an all-or-nothing
//! batch through a dispatcher. Nothing touches storage before the flush,
//! and an empty flush never reaches the dispatcher at all.

pub mod global_writer;
pub mod room_writer;

pub use global_writer::{GlobalMutationBatch, GlobalMutationWriter, TransactionEntry, UserLogEntry};
pub use room_writer::{RoomMutationBatch, RoomMutationWriter};
