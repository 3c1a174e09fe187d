// src/workers/mod.rs
//! Worker pools and their units of work
//!
//! Two pools drain the two queues each tick:
//!
//! - **runner**: one user id per item — sandbox script execution
//! - **processor**: one room name per item — snapshot, validate, mutate
//!
//! Workers are peers with no coordination beyond the shared queue. A unit
//! of work that throws is logged and converted to scheduler-fault
//! telemetry; the worker loop itself never dies for it.

pub mod pool;
pub mod processor;
pub mod runner;

pub use pool::{UnitOfWork, WorkerPool};
pub use processor::RoomProcessor;
pub use runner::UserRunner;
