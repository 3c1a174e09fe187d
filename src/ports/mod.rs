// src/ports/mod.rs
//! Collaborator contracts
//!
//! The core is implementable purely in terms of these traits; it has no
//! knowledge of how state is stored, how batches are applied, or where
//! notifications go. Payload shapes beyond the batch types are owned by
//! the collaborator, not by this crate.

pub mod memory;

use crate::mutation::{GlobalMutationBatch, RoomMutationBatch};
use crate::runtime::{ExecutionContext, NotifyRequest};
use crate::telemetry::{TelemetryRecord, WatchdogAlert};
use crate::utils::errors::Result;
use crate::world::{GlobalSnapshot, RoomSnapshot};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Read-only, point-in-time world state access
#[async_trait]
pub trait StateProvider: Send + Sync {
    async fn room_snapshot(&self, room: &str, tick: u64) -> Result<RoomSnapshot>;

    async fn global_snapshot(&self, tick: u64) -> Result<GlobalSnapshot>;

    /// Users with active scripts this tick
    async fn active_users(&self, tick: u64) -> Result<Vec<String>>;

    /// Rooms requiring processing this tick
    async fn active_rooms(&self, tick: u64) -> Result<Vec<String>>;
}

/// Applies one room-scoped batch atomically; the core never retries
#[async_trait]
pub trait RoomMutationDispatcher: Send + Sync {
    async fn apply(&self, batch: RoomMutationBatch) -> Result<()>;
}

/// Applies one world-scoped batch atomically; the core never retries
#[async_trait]
pub trait GlobalMutationDispatcher: Send + Sync {
    async fn apply(&self, batch: GlobalMutationBatch) -> Result<()>;
}

/// Persists user memory produced by sandbox runs
#[async_trait]
pub trait MemorySink: Send + Sync {
    async fn save_raw_memory(&self, user_id: &str, blob: &str) -> Result<()>;

    async fn save_memory_segments(
        &self,
        user_id: &str,
        segments: &HashMap<u8, String>,
    ) -> Result<()>;

    async fn save_inter_shard_segment(&self, user_id: &str, blob: &str) -> Result<()>;
}

/// Loads a user's execution context (code, memory, limits) for one tick
#[async_trait]
pub trait ScriptStore: Send + Sync {
    async fn load_context(&self, user_id: &str, tick: u64) -> Result<ExecutionContext>;
}

/// Receives the intents a script emitted, for the processor stage to pick up
#[async_trait]
pub trait IntentSink: Send + Sync {
    async fn save_intents(
        &self,
        user_id: &str,
        tick: u64,
        room_intents: &HashMap<String, HashMap<String, Value>>,
        global_intents: &HashMap<String, Value>,
    ) -> Result<()>;
}

/// Outbound player messaging
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send_notification(&self, user_id: &str, request: &NotifyRequest) -> Result<()>;

    async fn publish_console_messages(
        &self,
        user_id: &str,
        log: &[String],
        results: &[String],
    ) -> Result<()>;

    async fn publish_console_error(&self, user_id: &str, error: &str) -> Result<()>;
}

/// Fire-and-forget observability export; failures are the exporter's problem
pub trait ObservabilityExporter: Send + Sync {
    fn export_telemetry(&self, record: &TelemetryRecord);

    fn export_watchdog_alert(&self, alert: &WatchdogAlert);

    fn export_room_stats(&self, room: &str, tick: u64, stats: &Value);
}

/// Room history capture, called by the room-processing unit
#[async_trait]
pub trait HistoryService: Send + Sync {
    async fn save_room_history_tick(&self, room: &str, tick: u64, payload: &Value) -> Result<()>;

    async fn upload_history_chunk(&self, room: &str, base_tick: u64) -> Result<()>;
}
