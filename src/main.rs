// src/main.rs
//! Shardsim Simulation Engine
//!
//! Headless demo deployment: the full tick pipeline (orchestrator, queues,
//! worker pools, sandboxes, validation, mutation writers) wired against the
//! in-memory backplane with a small seeded world. Runs until ctrl-c.

use anyhow::Result;
use shardsim_engine::observability::{init_metrics, init_tracing};
use shardsim_engine::orchestrator::{TickClock, TickLoop};
use shardsim_engine::ports::memory::{InMemoryWorld, UserRecord};
use shardsim_engine::queue::{QueueMode, QueueStore, WorkQueue};
use shardsim_engine::runtime::{LocalEngine, SandboxPool, ScriptEngine};
use shardsim_engine::telemetry::{ExporterBridge, TelemetryMonitor, Watchdog};
use shardsim_engine::utils::config::EngineConfig;
use shardsim_engine::validation::{ValidationPipeline, ValidationStats};
use shardsim_engine::workers::{RoomProcessor, UserRunner, WorkerPool};
use shardsim_engine::world::{ObjectKind, RoomObject, RoomPosition, RoomSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn demo_object(id: &str, kind: ObjectKind, pos: RoomPosition, owner: Option<&str>) -> RoomObject {
    RoomObject {
        id: id.to_string(),
        kind,
        pos,
        owner: owner.map(str::to_string),
        hits: Some(100),
        hits_max: Some(100),
        store: HashMap::new(),
        store_capacity: Some(50),
        spawning: false,
        safe_mode_until: None,
        reservation: None,
        level: None,
    }
}

/// Seed a minimal world: one room, one user, one scripted creep
fn seed_world(world: &InMemoryWorld) {
    let mut room = RoomSnapshot::new("W1N1", 0);
    room.objects.insert(
        "spawn-1".to_string(),
        demo_object("spawn-1", ObjectKind::Spawn, RoomPosition::new(25, 25), Some("alice")),
    );
    room.objects.insert(
        "creep-1".to_string(),
        demo_object("creep-1", ObjectKind::Creep, RoomPosition::new(10, 10), Some("alice")),
    );
    let mut source = demo_object("source-1", ObjectKind::Source, RoomPosition::new(5, 5), None);
    source.store.insert("energy".to_string(), 3000);
    source.store_capacity = Some(3000);
    room.objects.insert("source-1".to_string(), source);
    world.add_room(room);

    // Instruction-stream script: log a line and nudge the creep each tick
    let script = r#"[
        {"op": "log", "message": "running"},
        {"op": "intent", "name": "move",
         "payload": {"room": "W1N1", "actor": "creep-1", "x": 11, "y": 10}}
    ]"#;
    world.add_user(
        "alice",
        UserRecord {
            script: script.to_string(),
            code_hash: "demo-v1".to_string(),
            cpu_limit_ms: 100,
            ..Default::default()
        },
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = EngineConfig::load()?;
    init_metrics(&config.metrics)?;

    info!("Starting Shardsim Simulation Engine v{}", env!("CARGO_PKG_VERSION"));

    let world = Arc::new(InMemoryWorld::new());
    seed_world(&world);

    let cancel = CancellationToken::new();
    let store = Arc::new(QueueStore::new());
    let open = |name: &str, mode| {
        WorkQueue::open(
            Arc::clone(&store),
            name,
            mode,
            config.queues.clone(),
            cancel.clone(),
        )
    };

    let users_producer = open("users", QueueMode::Producer);
    let rooms_producer = open("rooms", QueueMode::Producer);
    let users_consumer = Arc::new(open("users", QueueMode::Consumer));
    let rooms_consumer = Arc::new(open("rooms", QueueMode::Consumer));

    // Recover anything stranded in processing from a previous run
    users_consumer.reset();
    rooms_consumer.reset();

    let clock = Arc::new(TickClock::new(0));
    let monitor = Arc::new(TelemetryMonitor::new(
        Watchdog::new(config.watchdog.failure_threshold),
        1024,
    ));
    monitor.register(Arc::new(ExporterBridge::new(Arc::clone(&world) as _)));
    let sandbox_pool = Arc::new(SandboxPool::new(
        Arc::new(|| Box::new(LocalEngine::new()) as Box<dyn ScriptEngine>),
        config.runtime.clone(),
    ));

    let runner = Arc::new(UserRunner::new(
        Arc::clone(&world) as _,
        Arc::clone(&sandbox_pool),
        Arc::clone(&world) as _,
        Arc::clone(&world) as _,
        Arc::clone(&world) as _,
        Arc::clone(&monitor),
        Arc::clone(&clock),
    ));
    let idle_wait = Duration::from_millis(config.workers.idle_wait_ms);
    let runner_pool = WorkerPool::spawn(
        users_consumer,
        runner,
        config.workers.runner_concurrency,
        idle_wait,
        Arc::clone(&monitor),
        Arc::clone(&clock),
        cancel.clone(),
    );

    let pipeline = Arc::new(ValidationPipeline::new(Arc::new(ValidationStats::new())));
    let processor = Arc::new(RoomProcessor::new(
        Arc::clone(&world) as _,
        pipeline,
        Arc::clone(&world) as _,
        Arc::clone(&world) as _,
        Arc::clone(&world) as _,
        Arc::clone(&clock),
        config.tick_loop.history_chunk_size,
    ));
    let processor_pool = WorkerPool::spawn(
        rooms_consumer,
        processor,
        config.workers.processor_concurrency,
        idle_wait,
        Arc::clone(&monitor),
        Arc::clone(&clock),
        cancel.clone(),
    );

    let tick_loop = Arc::new(TickLoop::new(
        config.tick_loop.clone(),
        Arc::clone(&clock),
        Arc::clone(&world) as _,
        Arc::clone(&world) as _,
        users_producer,
        rooms_producer,
    ));
    let loop_handle = tokio::spawn({
        let tick_loop = Arc::clone(&tick_loop);
        let cancel = cancel.clone();
        async move { tick_loop.run(cancel).await }
    });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, cleaning up...");
    cancel.cancel();

    loop_handle.await?;
    runner_pool.join().await;
    processor_pool.join().await;

    info!(tick = clock.current(), "Engine stopped");
    Ok(())
}
