// src/mutation/global_writer.rs
//! World-scoped mutation writer
//!
//! Same accumulate-then-flush pattern as the room writer, at world scope:
//! power creeps, market orders, user currency/resource deltas, user log
//! entries, free-standing room-object mutations, and the transaction log.
//! Built during the cross-room global stage, flushed once.

use crate::ports::GlobalMutationDispatcher;
use crate::utils::errors::Result;
use crate::world::MarketOrder;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;
use ulid::Ulid;

/// One entry in a user's activity log
#[derive(Debug, Clone)]
pub struct UserLogEntry {
    pub user_id: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// One transaction-log entry
#[derive(Debug, Clone)]
pub struct TransactionEntry {
    pub id: String,
    pub at: DateTime<Utc>,
    pub sender: String,
    pub recipient: String,
    pub resource: String,
    pub amount: i64,
}

/// One atomic unit of world-scoped storage mutations
#[derive(Debug, Clone, Default)]
pub struct GlobalMutationBatch {
    pub tick: u64,

    pub power_creep_upserts: Vec<(String, Value)>,
    pub power_creep_patches: Vec<(String, Value)>,
    pub power_creep_removals: Vec<String>,

    pub market_order_upserts: Vec<MarketOrder>,
    pub market_order_patches: Vec<(String, Value)>,
    pub market_order_removals: Vec<String>,

    /// (user id, delta)
    pub user_gcl_increments: Vec<(String, i64)>,

    /// (user id, delta)
    pub user_money_adjustments: Vec<(String, i64)>,

    /// (user id, resource, delta)
    pub user_resource_adjustments: Vec<(String, String, i64)>,

    pub user_log_entries: Vec<UserLogEntry>,

    /// Free-standing room-object patches: (room, object id, partial)
    pub room_object_patches: Vec<(String, String, Value)>,

    pub transactions: Vec<TransactionEntry>,

    /// (room, accessible)
    pub room_accessibility: Vec<(String, bool)>,
}

impl GlobalMutationBatch {
    pub fn op_count(&self) -> usize {
        self.power_creep_upserts.len()
            + self.power_creep_patches.len()
            + self.power_creep_removals.len()
            + self.market_order_upserts.len()
            + self.market_order_patches.len()
            + self.market_order_removals.len()
            + self.user_gcl_increments.len()
            + self.user_money_adjustments.len()
            + self.user_resource_adjustments.len()
            + self.user_log_entries.len()
            + self.room_object_patches.len()
            + self.transactions.len()
            + self.room_accessibility.len()
    }

    pub fn is_empty(&self) -> bool {
        self.op_count() == 0
    }
}

/// Accumulate-then-flush writer for the global stage
pub struct GlobalMutationWriter {
    batch: GlobalMutationBatch,
    dispatcher: Arc<dyn GlobalMutationDispatcher>,
}

impl GlobalMutationWriter {
    pub fn new(tick: u64, dispatcher: Arc<dyn GlobalMutationDispatcher>) -> Self {
        Self {
            batch: GlobalMutationBatch {
                tick,
                ..Default::default()
            },
            dispatcher,
        }
    }

    pub fn upsert_power_creep(&mut self, id: &str, doc: Value) {
        if id.trim().is_empty() || doc.is_null() {
            return;
        }
        self.batch.power_creep_upserts.push((id.to_string(), doc));
    }

    pub fn patch_power_creep(&mut self, id: &str, partial: Value) {
        if id.trim().is_empty() || partial.is_null() {
            return;
        }
        self.batch.power_creep_patches.push((id.to_string(), partial));
    }

    pub fn remove_power_creep(&mut self, id: &str) {
        if id.trim().is_empty() {
            return;
        }
        self.batch.power_creep_removals.push(id.to_string());
    }

    pub fn upsert_market_order(&mut self, order: MarketOrder) {
        if order.id.trim().is_empty() {
            return;
        }
        self.batch.market_order_upserts.push(order);
    }

    pub fn patch_market_order(&mut self, id: &str, partial: Value) {
        if id.trim().is_empty() || partial.is_null() {
            return;
        }
        self.batch.market_order_patches.push((id.to_string(), partial));
    }

    pub fn remove_market_order(&mut self, id: &str) {
        if id.trim().is_empty() {
            return;
        }
        self.batch.market_order_removals.push(id.to_string());
    }

    pub fn increment_user_gcl(&mut self, user_id: &str, delta: i64) {
        if user_id.trim().is_empty() || delta == 0 {
            return;
        }
        self.batch
            .user_gcl_increments
            .push((user_id.to_string(), delta));
    }

    pub fn adjust_user_money(&mut self, user_id: &str, delta: i64) {
        if user_id.trim().is_empty() || delta == 0 {
            return;
        }
        self.batch
            .user_money_adjustments
            .push((user_id.to_string(), delta));
    }

    pub fn adjust_user_resource(&mut self, user_id: &str, resource: &str, delta: i64) {
        if user_id.trim().is_empty() || resource.trim().is_empty() || delta == 0 {
            return;
        }
        self.batch.user_resource_adjustments.push((
            user_id.to_string(),
            resource.to_string(),
            delta,
        ));
    }

    pub fn append_user_log(&mut self, user_id: &str, message: &str) {
        if user_id.trim().is_empty() || message.is_empty() {
            return;
        }
        self.batch.user_log_entries.push(UserLogEntry {
            user_id: user_id.to_string(),
            message: message.to_string(),
            at: Utc::now(),
        });
    }

    pub fn patch_room_object(&mut self, room: &str, id: &str, partial: Value) {
        if room.trim().is_empty() || id.trim().is_empty() || partial.is_null() {
            return;
        }
        self.batch
            .room_object_patches
            .push((room.to_string(), id.to_string(), partial));
    }

    pub fn insert_transaction(
        &mut self,
        sender: &str,
        recipient: &str,
        resource: &str,
        amount: i64,
    ) {
        if sender.trim().is_empty() || recipient.trim().is_empty() || amount <= 0 {
            return;
        }
        self.batch.transactions.push(TransactionEntry {
            id: Ulid::new().to_string(),
            at: Utc::now(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            resource: resource.to_string(),
            amount,
        });
    }

    pub fn set_room_accessibility(&mut self, room: &str, accessible: bool) {
        if room.trim().is_empty() {
            return;
        }
        self.batch
            .room_accessibility
            .push((room.to_string(), accessible));
    }

    pub fn op_count(&self) -> usize {
        self.batch.op_count()
    }

    /// Flush the buffered batch; empty buffers make zero dispatcher calls
    pub async fn flush(&mut self) -> Result<()> {
        let tick = self.batch.tick;
        let batch = std::mem::replace(
            &mut self.batch,
            GlobalMutationBatch {
                tick,
                ..Default::default()
            },
        );

        if batch.is_empty() {
            return Ok(());
        }

        trace!(tick = batch.tick, ops = batch.op_count(), "Flushing global batch");
        metrics::counter!("global_batches_flushed_total").increment(1);
        self.dispatcher.apply(batch).await
    }
}
