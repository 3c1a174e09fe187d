// src/workers/runner.rs
//! Runner role: sandbox script execution for one user
//!
//! Per work item: load the user's execution context, rent a sandbox (cold
//! when the watchdog demands it), execute on a blocking thread, persist
//! memory and intents, forward console output and notifications, and
//! record execution telemetry.

use crate::orchestrator::TickClock;
use crate::ports::{IntentSink, MemorySink, NotificationService, ScriptStore};
use crate::runtime::SandboxPool;
use crate::telemetry::{TelemetryMonitor, TelemetryRecord};
use crate::utils::errors::{EngineError, Result};
use crate::workers::pool::UnitOfWork;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

/// Unit of work for the runner pool
pub struct UserRunner {
    script_store: Arc<dyn ScriptStore>,
    sandbox_pool: Arc<SandboxPool>,
    memory_sink: Arc<dyn MemorySink>,
    intent_sink: Arc<dyn IntentSink>,
    notifications: Arc<dyn NotificationService>,
    monitor: Arc<TelemetryMonitor>,
    clock: Arc<TickClock>,
}

impl UserRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        script_store: Arc<dyn ScriptStore>,
        sandbox_pool: Arc<SandboxPool>,
        memory_sink: Arc<dyn MemorySink>,
        intent_sink: Arc<dyn IntentSink>,
        notifications: Arc<dyn NotificationService>,
        monitor: Arc<TelemetryMonitor>,
        clock: Arc<TickClock>,
    ) -> Self {
        Self {
            script_store,
            sandbox_pool,
            memory_sink,
            intent_sink,
            notifications,
            monitor,
            clock,
        }
    }
}

#[async_trait]
impl UnitOfWork for UserRunner {
    fn role(&self) -> &'static str {
        "runner"
    }

    async fn run(&self, user_id: &str) -> Result<()> {
        let tick = self.clock.current();
        let mut ctx = self.script_store.load_context(user_id, tick).await?;

        // Watchdog escalation: a pending cold-start request forces a
        // clean-slate instance for this run.
        let force_cold =
            ctx.force_cold || self.monitor.watchdog().try_consume_cold_start(user_id);
        ctx.force_cold = force_cold;

        let sandbox = self
            .sandbox_pool
            .rent(&ctx.user_id, &ctx.code_hash, force_cold);

        trace!(user = user_id, tick, force_cold, "Executing user script");

        // Sandbox execution is synchronous; keep it off the async workers
        let exec_ctx = ctx.clone();
        let (sandbox, result) = tokio::task::spawn_blocking(move || {
            let mut sandbox = sandbox;
            let result = sandbox.execute(&exec_ctx);
            (sandbox, result)
        })
        .await
        .map_err(|e| EngineError::Runtime(format!("sandbox task panicked: {}", e)))?;

        if force_cold {
            self.sandbox_pool.invalidate(sandbox);
        } else {
            self.sandbox_pool.give_back(sandbox);
        }

        // "Memory present" is the write signal; None means unchanged
        if let Some(memory) = &result.memory {
            self.memory_sink.save_raw_memory(user_id, memory).await?;
        }
        if !result.memory_segments.is_empty() {
            self.memory_sink
                .save_memory_segments(user_id, &result.memory_segments)
                .await?;
        }
        if let Some(blob) = &result.inter_shard_segment {
            self.memory_sink
                .save_inter_shard_segment(user_id, blob)
                .await?;
        }

        if !result.room_intents.is_empty() || !result.global_intents.is_empty() {
            self.intent_sink
                .save_intents(user_id, tick, &result.room_intents, &result.global_intents)
                .await?;
        }

        if !result.console_log.is_empty() || !result.console_results.is_empty() {
            self.notifications
                .publish_console_messages(user_id, &result.console_log, &result.console_results)
                .await?;
        }
        for error in &result.console_errors {
            self.notifications
                .publish_console_error(user_id, error)
                .await?;
        }
        if let Some(error) = &result.error {
            self.notifications
                .publish_console_error(user_id, error)
                .await?;
        }
        for request in &result.notifications {
            self.notifications
                .send_notification(user_id, request)
                .await?;
        }

        debug!(
            user = user_id,
            tick,
            cpu_ms = result.cpu_used_ms,
            ok = result.succeeded(),
            "User script finished"
        );

        self.monitor.record(TelemetryRecord::execution(
            user_id,
            tick,
            result.cpu_used_ms,
            result.metrics.timed_out,
            result.metrics.script_error,
            result.error.clone(),
            result.metrics.heap_used,
        ));

        Ok(())
    }
}
