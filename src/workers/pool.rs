// src/workers/pool.rs
//! Fixed-concurrency worker pool
//!
//! Spawns `concurrency` independent loops over one consumer queue handle.
//! Each iteration: fetch (bounded idle wait) → run the unit of work →
//! report telemetry → acknowledge. Cancellation is cooperative: it stops
//! workers between iterations and never aborts an in-flight unit.

use crate::orchestrator::TickClock;
use crate::queue::WorkQueue;
use crate::telemetry::{TelemetryMonitor, TelemetryRecord};
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// One role's unit of work, invoked once per dequeued item
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Role name for logs and telemetry
    fn role(&self) -> &'static str;

    /// Process one work item
    async fn run(&self, id: &str) -> Result<()>;
}

/// A running pool of worker loops
pub struct WorkerPool {
    role: &'static str,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `concurrency` worker loops over the given consumer queue
    pub fn spawn(
        queue: Arc<WorkQueue>,
        unit: Arc<dyn UnitOfWork>,
        concurrency: usize,
        idle_wait: Duration,
        monitor: Arc<TelemetryMonitor>,
        clock: Arc<TickClock>,
        cancel: CancellationToken,
    ) -> Self {
        let role = unit.role();
        info!(role, concurrency, "Starting worker pool");

        let handles = (0..concurrency)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let unit = Arc::clone(&unit);
                let monitor = Arc::clone(&monitor);
                let clock = Arc::clone(&clock);
                let cancel = cancel.clone();

                tokio::spawn(async move {
                    worker_loop(worker_id, queue, unit, idle_wait, monitor, clock, cancel).await;
                })
            })
            .collect();

        Self { role, handles }
    }

    /// Await shutdown of every worker loop
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
        info!(role = self.role, "Worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<WorkQueue>,
    unit: Arc<dyn UnitOfWork>,
    idle_wait: Duration,
    monitor: Arc<TelemetryMonitor>,
    clock: Arc<TickClock>,
    cancel: CancellationToken,
) {
    let role = unit.role();
    debug!(role, worker_id, "Worker loop started");

    while !cancel.is_cancelled() {
        let fetched = match queue.fetch(idle_wait).await {
            Ok(fetched) => fetched,
            Err(e) => {
                // Backing-store fault: log, brief pause, keep the loop alive
                error!(role, worker_id, error = %e, "Queue fetch failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let Some(id) = fetched else {
            continue; // idle fetch, poll again
        };

        if let Err(e) = unit.run(&id).await {
            error!(role, worker_id, item = %id, error = %e, "Unit of work failed");
            metrics::counter!("worker_faults_total", "role" => role).increment(1);
            monitor.record(TelemetryRecord::scheduler_fault(
                &id,
                clock.current(),
                e.to_string(),
            ));
        }

        // Acknowledge regardless of the unit outcome: the fault was already
        // reported, re-delivering the same item would fail the same way.
        if let Err(e) = queue.mark_done(&id) {
            error!(role, worker_id, item = %id, error = %e, "Acknowledge failed");
        }
    }

    debug!(role, worker_id, "Worker loop stopped");
}
