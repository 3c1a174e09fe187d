// tests/engine_e2e.rs
//! Full-pipeline integration tests against the in-memory backplane:
//! orchestrator, queues, worker pools, sandboxes, validation, and the
//! mutation writers wired exactly like the binary does it.

use shardsim_engine::orchestrator::{TickClock, TickLoop};
use shardsim_engine::ports::memory::{InMemoryWorld, UserRecord};
use shardsim_engine::queue::{QueueMode, QueueStore, WorkQueue};
use shardsim_engine::runtime::{LocalEngine, SandboxPool, ScriptEngine};
use shardsim_engine::telemetry::{TelemetryMonitor, Watchdog};
use shardsim_engine::utils::config::{EngineConfig, TickLoopConfig};
use shardsim_engine::validation::{ValidationPipeline, ValidationStats};
use shardsim_engine::workers::{RoomProcessor, UserRunner, WorkerPool};
use shardsim_engine::world::{ObjectKind, RoomObject, RoomPosition, RoomSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn creep(id: &str, owner: &str, x: u8, y: u8) -> RoomObject {
    RoomObject {
        id: id.to_string(),
        kind: ObjectKind::Creep,
        pos: RoomPosition::new(x, y),
        owner: Some(owner.to_string()),
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

fn move_script(room: &str, actor: &str, x: u8, y: u8) -> String {
    format!(
        r#"[
            {{"op": "log", "message": "acting"}},
            {{"op": "intent", "name": "move",
              "payload": {{"room": "{room}", "actor": "{actor}", "x": {x}, "y": {y}}}}}
        ]"#
    )
}

struct Harness {
    world: Arc<InMemoryWorld>,
    clock: Arc<TickClock>,
    cancel: CancellationToken,
    tick_loop: Arc<TickLoop>,
    runner_pool: WorkerPool,
    processor_pool: WorkerPool,
}

fn wire(world: Arc<InMemoryWorld>, minimum_tick_ms: u64) -> Harness {
    let config = EngineConfig::default();
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

    let clock = Arc::new(TickClock::new(0));
    let monitor = Arc::new(TelemetryMonitor::new(Watchdog::new(3), 256));
    let sandbox_pool = Arc::new(SandboxPool::new(
        Arc::new(|| Box::new(LocalEngine::new()) as Box<dyn ScriptEngine>),
        config.runtime.clone(),
    ));

    let runner = Arc::new(UserRunner::new(
        Arc::clone(&world) as _,
        sandbox_pool,
        Arc::clone(&world) as _,
        Arc::clone(&world) as _,
        Arc::clone(&world) as _,
        Arc::clone(&monitor),
        Arc::clone(&clock),
    ));
    let idle_wait = Duration::from_millis(20);
    let runner_pool = WorkerPool::spawn(
        users_consumer,
        runner,
        2,
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
        20,
    ));
    let processor_pool = WorkerPool::spawn(
        rooms_consumer,
        processor,
        2,
        idle_wait,
        Arc::clone(&monitor),
        Arc::clone(&clock),
        cancel.clone(),
    );

    let tick_loop = Arc::new(TickLoop::new(
        TickLoopConfig {
            minimum_tick_duration_ms: minimum_tick_ms,
            history_chunk_size: 20,
        },
        Arc::clone(&clock),
        Arc::clone(&world) as _,
        Arc::clone(&world) as _,
        users_producer,
        rooms_producer,
    ));

    Harness {
        world,
        clock,
        cancel,
        tick_loop,
        runner_pool,
        processor_pool,
    }
}

async fn run_for(harness: &Harness, duration: Duration) {
    let handle = tokio::spawn({
        let tick_loop = Arc::clone(&harness.tick_loop);
        let cancel = harness.cancel.clone();
        async move { tick_loop.run(cancel).await }
    });
    tokio::time::sleep(duration).await;
    harness.cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_two_room_move_scenario() {
    let world = Arc::new(InMemoryWorld::new());

    let mut west = RoomSnapshot::new("W1N1", 0);
    west.objects
        .insert("c-alice".to_string(), creep("c-alice", "alice", 10, 10));
    world.add_room(west);

    let mut east = RoomSnapshot::new("W2N2", 0);
    east.objects
        .insert("c-bob".to_string(), creep("c-bob", "bob", 40, 40));
    world.add_room(east);

    world.add_user(
        "alice",
        UserRecord {
            script: move_script("W1N1", "c-alice", 11, 10),
            code_hash: "alice-v1".to_string(),
            cpu_limit_ms: 100,
            ..Default::default()
        },
    );
    world.add_user(
        "bob",
        UserRecord {
            script: move_script("W2N2", "c-bob", 41, 40),
            code_hash: "bob-v1".to_string(),
            cpu_limit_ms: 100,
            ..Default::default()
        },
    );

    let harness = wire(Arc::clone(&world), 50);
    run_for(&harness, Duration::from_millis(600)).await;
    let runner_pool = harness.runner_pool;
    let processor_pool = harness.processor_pool;
    runner_pool.join().await;
    processor_pool.join().await;

    // Multiple ticks completed
    assert!(harness.clock.current() >= 2, "only {} ticks ran", harness.clock.current());

    // Both creeps ended up at their scripted destinations
    let west = world.room("W1N1").unwrap();
    assert_eq!(west.object("c-alice").unwrap().pos, RoomPosition::new(11, 10));
    let east = world.room("W2N2").unwrap();
    assert_eq!(east.object("c-bob").unwrap().pos, RoomPosition::new(41, 40));

    // Every flushed batch is scoped to exactly one room
    let batches = world.room_batches();
    assert!(!batches.is_empty());
    assert!(batches
        .iter()
        .all(|b| b.room == "W1N1" || b.room == "W2N2"));

    // Console output from both scripts made it through
    let console = world.console_lines();
    assert!(console.iter().any(|(user, _)| user == "alice"));
    assert!(console.iter().any(|(user, _)| user == "bob"));

    // History captured per room per tick
    assert!(world
        .history_ticks()
        .iter()
        .any(|(room, _)| room == "W1N1"));
}

#[tokio::test]
async fn test_tick_pacing_under_load() {
    let world = Arc::new(InMemoryWorld::new());
    world.add_room(RoomSnapshot::new("W1N1", 0));
    world.add_user(
        "alice",
        UserRecord {
            script: r#"[{"op": "log", "message": "noop"}]"#.to_string(),
            code_hash: "v1".to_string(),
            cpu_limit_ms: 100,
            ..Default::default()
        },
    );

    let harness = wire(world, 100);
    let started = Instant::now();
    run_for(&harness, Duration::from_millis(450)).await;
    harness.runner_pool.join().await;
    harness.processor_pool.join().await;

    // A 100ms floor caps throughput at ~elapsed/100 ticks
    let ticks = harness.clock.current();
    let ceiling = (started.elapsed().as_millis() / 100 + 1) as u64;
    assert!(ticks >= 2, "only {} ticks ran", ticks);
    assert!(ticks <= ceiling, "{} ticks exceeded pacing ceiling {}", ticks, ceiling);
}

#[tokio::test]
async fn test_script_error_becomes_console_error_not_crash() {
    let world = Arc::new(InMemoryWorld::new());
    world.add_room(RoomSnapshot::new("W1N1", 0));
    world.add_user(
        "alice",
        UserRecord {
            script: r#"[{"op": "fail", "message": "boom"}]"#.to_string(),
            code_hash: "v1".to_string(),
            cpu_limit_ms: 100,
            ..Default::default()
        },
    );

    let harness = wire(Arc::clone(&world), 50);
    run_for(&harness, Duration::from_millis(300)).await;
    harness.runner_pool.join().await;
    harness.processor_pool.join().await;

    // Ticks kept flowing despite the failing script
    assert!(harness.clock.current() >= 2);
    assert!(world
        .console_lines()
        .iter()
        .any(|(user, line)| user == "alice" && line.contains("boom")));
}
