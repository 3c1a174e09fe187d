// src/orchestrator/main_loop.rs
//! The main tick loop
//!
//! One sequential async loop, no internal concurrency: parallelism lives
//! in the worker pools draining the queues this loop fills. Per tick:
//! gate, enqueue users, wait for drain, enqueue rooms, wait for drain,
//! then the cross-room global stage (inter-room movement, market deals)
//! committed through a `GlobalMutationWriter`, then the clock advances.
//!
//! A fault anywhere in the tick body abandons that tick; pacing still
//! applies and the next tick starts fresh. Only cancellation exits.

use crate::mutation::GlobalMutationWriter;
use crate::orchestrator::lifecycle::{Lifecycle, TickStage};
use crate::orchestrator::TickClock;
use crate::ports::{GlobalMutationDispatcher, StateProvider};
use crate::queue::WorkQueue;
use crate::utils::config::TickLoopConfig;
use crate::utils::errors::Result;
use crate::world::{InterRoomMove, MarketOrder};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// The sequential tick orchestrator
pub struct TickLoop {
    config: TickLoopConfig,
    clock: Arc<TickClock>,
    state: Arc<dyn StateProvider>,
    global_dispatcher: Arc<dyn GlobalMutationDispatcher>,

    /// Producer handle onto the user-execution queue
    users_queue: WorkQueue,

    /// Producer handle onto the room-processing queue
    rooms_queue: WorkQueue,

    lifecycle: Lifecycle,
}

impl TickLoop {
    pub fn new(
        config: TickLoopConfig,
        clock: Arc<TickClock>,
        state: Arc<dyn StateProvider>,
        global_dispatcher: Arc<dyn GlobalMutationDispatcher>,
        users_queue: WorkQueue,
        rooms_queue: WorkQueue,
    ) -> Self {
        Self {
            config,
            clock,
            state,
            global_dispatcher,
            users_queue,
            rooms_queue,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Run ticks until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            minimum_ms = self.config.minimum_tick_duration_ms,
            "Tick loop started"
        );

        while !cancel.is_cancelled() {
            let started = Instant::now();
            let tick = self.clock.current();

            if let Err(e) = self.run_tick(tick, &cancel).await {
                // Abandon this tick; the world stays at its last committed
                // state and the next tick starts from there.
                error!(tick, error = %e, "Tick failed");
                metrics::counter!("ticks_failed_total").increment(1);
            }

            let elapsed = started.elapsed();
            metrics::histogram!("tick_duration_seconds").record(elapsed.as_secs_f64());

            let minimum = Duration::from_millis(self.config.minimum_tick_duration_ms);
            if let Some(remaining) = minimum.checked_sub(elapsed) {
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        info!(tick = self.clock.current(), "Tick loop stopped");
    }

    async fn run_tick(&self, tick: u64, cancel: &CancellationToken) -> Result<()> {
        self.lifecycle.dispatch_started(TickStage::TickStarted, tick);
        if !self.lifecycle.gate(tick) {
            debug!(tick, "Tick gated, skipping body");
            return Ok(());
        }
        self.lifecycle.dispatch_finished(TickStage::TickStarted, tick);

        self.lifecycle.dispatch_started(TickStage::EnumerateUsers, tick);
        let users = self.state.active_users(tick).await?;
        self.lifecycle.dispatch_finished(TickStage::EnumerateUsers, tick);

        self.lifecycle.dispatch_started(TickStage::EnqueueUsers, tick);
        self.users_queue.enqueue_many(users)?;
        self.lifecycle.dispatch_finished(TickStage::EnqueueUsers, tick);

        self.lifecycle.dispatch_started(TickStage::WaitUsersDrained, tick);
        self.users_queue.wait_until_drained().await;
        if cancel.is_cancelled() {
            return Ok(());
        }
        self.lifecycle.dispatch_finished(TickStage::WaitUsersDrained, tick);

        self.lifecycle.dispatch_started(TickStage::EnumerateRooms, tick);
        let rooms = self.state.active_rooms(tick).await?;
        self.lifecycle.dispatch_finished(TickStage::EnumerateRooms, tick);

        self.lifecycle.dispatch_started(TickStage::EnqueueRooms, tick);
        self.rooms_queue.enqueue_many(rooms)?;
        self.lifecycle.dispatch_finished(TickStage::EnqueueRooms, tick);

        self.lifecycle.dispatch_started(TickStage::WaitRoomsDrained, tick);
        self.rooms_queue.wait_until_drained().await;
        if cancel.is_cancelled() {
            return Ok(());
        }
        self.lifecycle.dispatch_finished(TickStage::WaitRoomsDrained, tick);

        // Room batches were flushed by the processors; this marks the
        // boundary between per-room and cross-room work.
        self.lifecycle.dispatch_started(TickStage::CommitPre, tick);
        self.lifecycle.dispatch_finished(TickStage::CommitPre, tick);

        self.lifecycle.dispatch_started(TickStage::GlobalStage, tick);
        let global = self.state.global_snapshot(tick).await?;
        let mut writer = GlobalMutationWriter::new(tick, Arc::clone(&self.global_dispatcher));
        apply_inter_room_moves(&mut writer, &global.inter_room_moves);
        settle_market(&mut writer, &global.market_orders);
        self.lifecycle.dispatch_finished(TickStage::GlobalStage, tick);

        self.lifecycle.dispatch_started(TickStage::CommitPost, tick);
        writer.flush().await?;
        self.lifecycle.dispatch_finished(TickStage::CommitPost, tick);

        self.lifecycle.dispatch_started(TickStage::IncrementTick, tick);
        let next = self.clock.advance();
        metrics::gauge!("current_tick").set(next as f64);
        self.lifecycle.dispatch_finished(TickStage::IncrementTick, tick);

        self.lifecycle
            .dispatch_started(TickStage::UpdateAccessibility, tick);
        let mut writer = GlobalMutationWriter::new(next, Arc::clone(&self.global_dispatcher));
        for room in &global.accessible_rooms {
            writer.set_room_accessibility(room, true);
        }
        writer.flush().await?;
        self.lifecycle
            .dispatch_finished(TickStage::UpdateAccessibility, tick);

        self.lifecycle.dispatch_started(TickStage::TickDone, tick);
        self.lifecycle.dispatch_finished(TickStage::TickDone, tick);
        debug!(tick, next, "Tick complete");
        Ok(())
    }
}

/// Buffer position patches for actors that crossed a room boundary
fn apply_inter_room_moves(writer: &mut GlobalMutationWriter, moves: &[InterRoomMove]) {
    for mv in moves {
        writer.patch_room_object(
            &mv.to_room,
            &mv.object_id,
            json!({
                "room": mv.to_room,
                "x": mv.entry_pos.x,
                "y": mv.entry_pos.y,
            }),
        );
    }
}

/// Match crossed market orders and buffer the resulting settlement
///
/// Greedy matching: highest bids against lowest asks, deals settle at the
/// seller's asking price. Orders never self-match.
fn settle_market(writer: &mut GlobalMutationWriter, orders: &[MarketOrder]) {
    let mut buys: Vec<MarketOrder> = orders
        .iter()
        .filter(|o| o.buy && o.amount > 0)
        .cloned()
        .collect();
    let mut sells: Vec<MarketOrder> = orders
        .iter()
        .filter(|o| !o.buy && o.amount > 0)
        .cloned()
        .collect();
    buys.sort_by(|a, b| b.price.cmp(&a.price));
    sells.sort_by(|a, b| a.price.cmp(&b.price));

    let original: HashMap<String, i64> = orders
        .iter()
        .map(|o| (o.id.clone(), o.amount))
        .collect();

    for buy in &mut buys {
        for sell in &mut sells {
            if buy.amount == 0 {
                break;
            }
            if sell.amount == 0
                || sell.resource != buy.resource
                || buy.price < sell.price
                || buy.user_id == sell.user_id
            {
                continue;
            }

            let traded = buy.amount.min(sell.amount);
            let cost = traded * sell.price;

            writer.insert_transaction(&sell.user_id, &buy.user_id, &buy.resource, traded);
            writer.adjust_user_money(&buy.user_id, -cost);
            writer.adjust_user_money(&sell.user_id, cost);
            writer.adjust_user_resource(&buy.user_id, &buy.resource, traded);
            writer.adjust_user_resource(&sell.user_id, &sell.resource, -traded);
            writer.append_user_log(
                &buy.user_id,
                &format!("bought {} {} at {}", traded, buy.resource, sell.price),
            );
            writer.append_user_log(
                &sell.user_id,
                &format!("sold {} {} at {}", traded, sell.resource, sell.price),
            );
            metrics::counter!("market_deals_total").increment(1);

            buy.amount -= traded;
            sell.amount -= traded;
        }
    }

    for order in buys.iter().chain(sells.iter()) {
        if original.get(&order.id) == Some(&order.amount) {
            continue;
        }
        if order.amount == 0 {
            writer.remove_market_order(&order.id);
        } else {
            writer.patch_market_order(&order.id, json!({"amount": order.amount}));
        }
    }
}
