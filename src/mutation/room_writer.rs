// src/mutation/room_writer.rs
//! Room-scoped mutation writer
//!
//! One writer per room per tick, never shared across concurrent rooms.
//! Operations only buffer; `flush` hands the dispatcher a single batch and
//! resets the buffers whether or not the dispatch succeeded — retry policy
//! belongs to the caller, never to the writer.

use crate::ports::RoomMutationDispatcher;
use crate::utils::errors::Result;
use crate::world::RoomObject;
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

/// One atomic unit of room-scoped storage mutations
#[derive(Debug, Clone, Default)]
pub struct RoomMutationBatch {
    pub room: String,
    pub tick: u64,

    /// Full-object writes
    pub upserts: Vec<RoomObject>,

    /// Partial writes: (object id, partial fields)
    pub patches: Vec<(String, Value)>,

    /// Object deletions
    pub removals: Vec<String>,

    /// Partial write to the room's info document
    pub room_info_patch: Option<Value>,

    /// Event-log blob for this tick
    pub event_log: Option<Value>,

    /// Map-view blob for this tick
    pub map_view: Option<Value>,
}

impl RoomMutationBatch {
    /// Number of buffered operations
    pub fn op_count(&self) -> usize {
        self.upserts.len()
            + self.patches.len()
            + self.removals.len()
            + usize::from(self.room_info_patch.is_some())
            + usize::from(self.event_log.is_some())
            + usize::from(self.map_view.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.op_count() == 0
    }
}

/// Accumulate-then-flush writer for one room's processing unit
pub struct RoomMutationWriter {
    batch: RoomMutationBatch,
    dispatcher: Arc<dyn RoomMutationDispatcher>,
}

impl RoomMutationWriter {
    pub fn new(
        room: impl Into<String>,
        tick: u64,
        dispatcher: Arc<dyn RoomMutationDispatcher>,
    ) -> Self {
        Self {
            batch: RoomMutationBatch {
                room: room.into(),
                tick,
                ..Default::default()
            },
            dispatcher,
        }
    }

    /// Buffer a full-object write; objects with a blank id are ignored
    pub fn upsert(&mut self, object: RoomObject) {
        if object.id.trim().is_empty() {
            return;
        }
        self.batch.upserts.push(object);
    }

    /// Buffer a partial write; blank ids and null payloads are ignored
    pub fn patch(&mut self, id: &str, partial: Value) {
        if id.trim().is_empty() || partial.is_null() {
            return;
        }
        self.batch.patches.push((id.to_string(), partial));
    }

    /// Buffer an object removal; blank ids are ignored
    pub fn remove(&mut self, id: &str) {
        if id.trim().is_empty() {
            return;
        }
        self.batch.removals.push(id.to_string());
    }

    /// Buffer a partial write to the room info document
    pub fn patch_room_info(&mut self, partial: Value) {
        if partial.is_null() {
            return;
        }
        self.batch.room_info_patch = Some(partial);
    }

    pub fn set_event_log(&mut self, blob: Value) {
        if blob.is_null() {
            return;
        }
        self.batch.event_log = Some(blob);
    }

    pub fn set_map_view(&mut self, blob: Value) {
        if blob.is_null() {
            return;
        }
        self.batch.map_view = Some(blob);
    }

    /// Resolve an object's most recent buffered patch, if any
    ///
    /// Last write wins: the scan runs newest-first and stops at the first
    /// match, so a later processing step sees an earlier step's patch
    /// before anything is flushed.
    pub fn pending_object_state(&self, id: &str) -> Option<&Value> {
        self.batch
            .patches
            .iter()
            .rev()
            .find(|(patched_id, _)| patched_id == id)
            .map(|(_, partial)| partial)
    }

    /// Number of operations currently buffered
    pub fn op_count(&self) -> usize {
        self.batch.op_count()
    }

    /// Flush the buffered batch through the dispatcher
    ///
    /// A writer with nothing buffered makes zero dispatcher calls. Buffers
    /// are reset unconditionally before the dispatch outcome is known;
    /// partial batches are never retried piecemeal.
    pub async fn flush(&mut self) -> Result<()> {
        let room = self.batch.room.clone();
        let tick = self.batch.tick;
        let batch = std::mem::replace(
            &mut self.batch,
            RoomMutationBatch {
                room,
                tick,
                ..Default::default()
            },
        );

        if batch.is_empty() {
            trace!(room = %batch.room, "Nothing buffered, skipping flush");
            return Ok(());
        }

        trace!(room = %batch.room, ops = batch.op_count(), "Flushing room batch");
        metrics::counter!("room_batches_flushed_total").increment(1);
        self.dispatcher.apply(batch).await
    }
}
