// src/ports/memory.rs
//! In-memory backplane
//!
//! One struct implementing every collaborator port against process-local
//! state. Batches are applied for real (patches mutate the stored
//! objects), so a tick loop wired against it produces a world that
//! actually evolves. Used by the headless demo binary and the
//! integration suite; a production deployment swaps in storage-backed
//! implementations port by port.

use crate::mutation::{GlobalMutationBatch, RoomMutationBatch};
use crate::ports::{
    GlobalMutationDispatcher, HistoryService, IntentSink, MemorySink, NotificationService,
    ObservabilityExporter, RoomMutationDispatcher, ScriptStore, StateProvider,
};
use crate::runtime::{ExecutionContext, NotifyRequest};
use crate::telemetry::{TelemetryRecord, WatchdogAlert};
use crate::utils::errors::{EngineError, Result};
use crate::validation::payload::IntentRecord;
use crate::world::{GlobalSnapshot, RoomObject, RoomSnapshot};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::trace;

/// Per-user script and memory state
#[derive(Debug, Clone, Default)]
pub struct UserRecord {
    pub script: String,
    pub code_hash: String,
    pub cpu_limit_ms: u64,
    pub memory: Option<String>,
    pub memory_segments: HashMap<u8, String>,
    pub inter_shard_segment: Option<String>,
}

/// Process-local world implementing all collaborator ports
#[derive(Default)]
pub struct InMemoryWorld {
    rooms: DashMap<String, RoomSnapshot>,
    users: DashMap<String, UserRecord>,

    /// Intents deposited by runners, drained into the next room snapshot
    intents: DashMap<String, Vec<IntentRecord>>,

    /// Room-less intents (market orders, pixel generation, ...), drained by
    /// the global stage: (user id, intent name, payload)
    global_intents: Mutex<Vec<(String, String, Value)>>,

    global: Mutex<GlobalSnapshot>,

    /// Applied batches, kept for inspection
    room_batches: Mutex<Vec<RoomMutationBatch>>,
    global_batches: Mutex<Vec<GlobalMutationBatch>>,

    console: Mutex<Vec<(String, String)>>,
    notifications: Mutex<Vec<(String, NotifyRequest)>>,
    history_ticks: Mutex<Vec<(String, u64)>>,
    history_chunks: Mutex<Vec<(String, u64)>>,
    alerts: Mutex<Vec<WatchdogAlert>>,
}

impl InMemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_room(&self, snapshot: RoomSnapshot) {
        self.rooms.insert(snapshot.room.clone(), snapshot);
    }

    pub fn add_user(&self, user_id: &str, record: UserRecord) {
        self.users.insert(user_id.to_string(), record);
    }

    pub fn room(&self, room: &str) -> Option<RoomSnapshot> {
        self.rooms.get(room).map(|r| r.clone())
    }

    pub fn user(&self, user_id: &str) -> Option<UserRecord> {
        self.users.get(user_id).map(|u| u.clone())
    }

    pub fn set_global(&self, global: GlobalSnapshot) {
        *self.global.lock() = global;
    }

    pub fn room_batches(&self) -> Vec<RoomMutationBatch> {
        self.room_batches.lock().clone()
    }

    pub fn global_batches(&self) -> Vec<GlobalMutationBatch> {
        self.global_batches.lock().clone()
    }

    pub fn console_lines(&self) -> Vec<(String, String)> {
        self.console.lock().clone()
    }

    pub fn history_ticks(&self) -> Vec<(String, u64)> {
        self.history_ticks.lock().clone()
    }

    /// Drain deposited room-less intents; each deposit is taken exactly once
    pub fn take_global_intents(&self) -> Vec<(String, String, Value)> {
        std::mem::take(&mut *self.global_intents.lock())
    }
}

/// Apply one partial document to a stored object
fn apply_partial(object: &mut RoomObject, partial: &Value) {
    if let Some(x) = partial.get("x").and_then(Value::as_u64) {
        object.pos.x = x as u8;
    }
    if let Some(y) = partial.get("y").and_then(Value::as_u64) {
        object.pos.y = y as u8;
    }
    if let Some(hits) = partial.get("hits").and_then(Value::as_i64) {
        object.hits = Some(hits);
    }
    if let Some(store) = partial.get("store").and_then(Value::as_object) {
        object.store = store
            .iter()
            .filter_map(|(k, v)| v.as_i64().map(|amount| (k.clone(), amount)))
            .collect();
    }
    if let Some(reservation) = partial.get("reservation") {
        object.reservation = serde_json::from_value(reservation.clone()).ok();
    }
}

#[async_trait]
impl StateProvider for InMemoryWorld {
    async fn room_snapshot(&self, room: &str, tick: u64) -> Result<RoomSnapshot> {
        let mut snapshot = self
            .rooms
            .get(room)
            .map(|r| r.clone())
            .ok_or_else(|| EngineError::StateProvider(format!("unknown room '{}'", room)))?;
        snapshot.tick = tick;
        // Intents are consumed: each deposit is processed exactly once
        snapshot.intents = self.intents.remove(room).map(|(_, v)| v).unwrap_or_default();
        Ok(snapshot)
    }

    async fn global_snapshot(&self, tick: u64) -> Result<GlobalSnapshot> {
        let mut global = self.global.lock().clone();
        global.tick = tick;
        Ok(global)
    }

    async fn active_users(&self, _tick: u64) -> Result<Vec<String>> {
        let mut users: Vec<String> = self.users.iter().map(|e| e.key().clone()).collect();
        users.sort();
        Ok(users)
    }

    async fn active_rooms(&self, _tick: u64) -> Result<Vec<String>> {
        let mut rooms: Vec<String> = self.rooms.iter().map(|e| e.key().clone()).collect();
        rooms.sort();
        Ok(rooms)
    }
}

#[async_trait]
impl RoomMutationDispatcher for InMemoryWorld {
    async fn apply(&self, batch: RoomMutationBatch) -> Result<()> {
        if let Some(mut room) = self.rooms.get_mut(&batch.room) {
            for object in &batch.upserts {
                room.objects.insert(object.id.clone(), object.clone());
            }
            for (id, partial) in &batch.patches {
                if let Some(object) = room.objects.get_mut(id) {
                    apply_partial(object, partial);
                }
            }
            for id in &batch.removals {
                room.objects.remove(id);
            }
        }
        trace!(room = %batch.room, ops = batch.op_count(), "Applied room batch");
        self.room_batches.lock().push(batch);
        Ok(())
    }
}

#[async_trait]
impl GlobalMutationDispatcher for InMemoryWorld {
    async fn apply(&self, batch: GlobalMutationBatch) -> Result<()> {
        for (room, id, partial) in &batch.room_object_patches {
            if let Some(mut snapshot) = self.rooms.get_mut(room) {
                if let Some(object) = snapshot.objects.get_mut(id) {
                    apply_partial(object, partial);
                }
            }
        }
        {
            let mut global = self.global.lock();
            for (room, accessible) in &batch.room_accessibility {
                let listed = global.accessible_rooms.iter().any(|r| r == room);
                if *accessible && !listed {
                    global.accessible_rooms.push(room.clone());
                } else if !*accessible {
                    global.accessible_rooms.retain(|r| r != room);
                }
            }
            for id in &batch.market_order_removals {
                global.market_orders.retain(|o| &o.id != id);
            }
            for (id, partial) in &batch.market_order_patches {
                if let Some(order) = global.market_orders.iter_mut().find(|o| &o.id == id) {
                    if let Some(amount) = partial.get("amount").and_then(Value::as_i64) {
                        order.amount = amount;
                    }
                }
            }
            for order in &batch.market_order_upserts {
                global.market_orders.push(order.clone());
            }
        }
        self.global_batches.lock().push(batch);
        Ok(())
    }
}

#[async_trait]
impl MemorySink for InMemoryWorld {
    async fn save_raw_memory(&self, user_id: &str, blob: &str) -> Result<()> {
        if let Some(mut user) = self.users.get_mut(user_id) {
            user.memory = Some(blob.to_string());
        }
        Ok(())
    }

    async fn save_memory_segments(
        &self,
        user_id: &str,
        segments: &HashMap<u8, String>,
    ) -> Result<()> {
        if let Some(mut user) = self.users.get_mut(user_id) {
            for (index, value) in segments {
                user.memory_segments.insert(*index, value.clone());
            }
        }
        Ok(())
    }

    async fn save_inter_shard_segment(&self, user_id: &str, blob: &str) -> Result<()> {
        if let Some(mut user) = self.users.get_mut(user_id) {
            user.inter_shard_segment = Some(blob.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl ScriptStore for InMemoryWorld {
    async fn load_context(&self, user_id: &str, tick: u64) -> Result<ExecutionContext> {
        let user = self.users.get(user_id).ok_or_else(|| EngineError::ScriptStore {
            user_id: user_id.to_string(),
            message: "unknown user".to_string(),
        })?;
        Ok(ExecutionContext {
            user_id: user_id.to_string(),
            code_hash: user.code_hash.clone(),
            cpu_limit_ms: user.cpu_limit_ms,
            cpu_bucket_ms: 0,
            tick,
            memory: user.memory.clone(),
            memory_segments: user.memory_segments.clone(),
            inter_shard_segment: user.inter_shard_segment.clone(),
            script: user.script.clone(),
            force_cold: false,
        })
    }
}

#[async_trait]
impl IntentSink for InMemoryWorld {
    async fn save_intents(
        &self,
        user_id: &str,
        _tick: u64,
        room_intents: &HashMap<String, HashMap<String, Value>>,
        global_intents: &HashMap<String, Value>,
    ) -> Result<()> {
        if !global_intents.is_empty() {
            let mut deposited = self.global_intents.lock();
            for (name, payload) in global_intents {
                deposited.push((user_id.to_string(), name.clone(), payload.clone()));
            }
        }
        for (room, intents) in room_intents {
            let mut deposited = self.intents.entry(room.clone()).or_default();
            for (name, payload) in intents {
                // Payloads name their actor; scripts acting as the user
                // itself fall back to the user id
                let actor_id = payload
                    .get("actor")
                    .and_then(Value::as_str)
                    .unwrap_or(user_id)
                    .to_string();
                deposited.push(IntentRecord {
                    actor_id,
                    name: name.clone(),
                    payload: payload.clone(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationService for InMemoryWorld {
    async fn send_notification(&self, user_id: &str, request: &NotifyRequest) -> Result<()> {
        self.notifications
            .lock()
            .push((user_id.to_string(), request.clone()));
        Ok(())
    }

    async fn publish_console_messages(
        &self,
        user_id: &str,
        log: &[String],
        results: &[String],
    ) -> Result<()> {
        let mut console = self.console.lock();
        for line in log.iter().chain(results.iter()) {
            console.push((user_id.to_string(), line.clone()));
        }
        Ok(())
    }

    async fn publish_console_error(&self, user_id: &str, error: &str) -> Result<()> {
        self.console
            .lock()
            .push((user_id.to_string(), format!("error: {}", error)));
        Ok(())
    }
}

impl ObservabilityExporter for InMemoryWorld {
    fn export_telemetry(&self, record: &TelemetryRecord) {
        trace!(subject = %record.subject, tick = record.tick, "Telemetry exported");
    }

    fn export_watchdog_alert(&self, alert: &WatchdogAlert) {
        self.alerts.lock().push(alert.clone());
    }

    fn export_room_stats(&self, room: &str, tick: u64, stats: &Value) {
        trace!(room, tick, %stats, "Room stats exported");
    }
}

#[async_trait]
impl HistoryService for InMemoryWorld {
    async fn save_room_history_tick(&self, room: &str, tick: u64, _payload: &Value) -> Result<()> {
        self.history_ticks.lock().push((room.to_string(), tick));
        Ok(())
    }

    async fn upload_history_chunk(&self, room: &str, base_tick: u64) -> Result<()> {
        self.history_chunks.lock().push((room.to_string(), base_tick));
        Ok(())
    }
}
