// src/workers/processor.rs
//! Processor role: per-room intent application
//!
//! Per work item: snapshot the room, run the validation pipeline over its
//! pending intents, apply the survivors as buffered mutations, capture a
//! history tick, export room stats, and flush the writer exactly once.
//! Mechanics are intentionally thin; the interesting part is the ordering
//! and the single-batch commit.

use crate::mutation::RoomMutationWriter;
use crate::orchestrator::TickClock;
use crate::ports::{HistoryService, ObservabilityExporter, RoomMutationDispatcher, StateProvider};
use crate::utils::errors::Result;
use crate::validation::payload::{IntentPayload, ValidIntent};
use crate::validation::ValidationPipeline;
use crate::workers::pool::UnitOfWork;
use crate::world::{ObjectKind, RoomObject, RoomPosition, RoomSnapshot};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, trace};
use ulid::Ulid;

const ATTACK_POWER: i64 = 30;
const RANGED_ATTACK_POWER: i64 = 10;
const HEAL_POWER: i64 = 12;
const HARVEST_POWER: i64 = 2;
const BUILD_POWER: i64 = 5;
const REPAIR_POWER: i64 = 20;
const RESERVE_DURATION_TICKS: u64 = 100;

/// Unit of work for the processor pool
pub struct RoomProcessor {
    state: Arc<dyn StateProvider>,
    pipeline: Arc<ValidationPipeline>,
    dispatcher: Arc<dyn RoomMutationDispatcher>,
    history: Arc<dyn HistoryService>,
    exporter: Arc<dyn ObservabilityExporter>,
    clock: Arc<TickClock>,
    history_chunk_size: u64,
}

impl RoomProcessor {
    pub fn new(
        state: Arc<dyn StateProvider>,
        pipeline: Arc<ValidationPipeline>,
        dispatcher: Arc<dyn RoomMutationDispatcher>,
        history: Arc<dyn HistoryService>,
        exporter: Arc<dyn ObservabilityExporter>,
        clock: Arc<TickClock>,
        history_chunk_size: u64,
    ) -> Self {
        Self {
            state,
            pipeline,
            dispatcher,
            history,
            exporter,
            clock,
            history_chunk_size: history_chunk_size.max(1),
        }
    }

    fn apply_intent(
        &self,
        intent: &ValidIntent,
        snapshot: &RoomSnapshot,
        writer: &mut RoomMutationWriter,
        events: &mut Vec<Value>,
    ) {
        let actor_id = intent.record.actor_id.as_str();
        match &intent.payload {
            IntentPayload::Move { x, y } => {
                writer.patch(actor_id, json!({"x": x, "y": y}));
            }
            IntentPayload::Attack { target_id } => {
                self.apply_damage(target_id, ATTACK_POWER, snapshot, writer);
                events.push(json!({"event": "attack", "actor": actor_id, "target": target_id}));
            }
            IntentPayload::RangedAttack { target_id } => {
                self.apply_damage(target_id, RANGED_ATTACK_POWER, snapshot, writer);
                events.push(json!({"event": "ranged_attack", "actor": actor_id, "target": target_id}));
            }
            IntentPayload::Heal { target_id } => {
                let Some(target) = snapshot.object(target_id) else {
                    return;
                };
                let hits = pending_hits(writer, snapshot, target_id).unwrap_or(0);
                let max = target.hits_max.unwrap_or(hits);
                writer.patch(target_id, json!({"hits": (hits + HEAL_POWER).min(max)}));
            }
            IntentPayload::Harvest { target_id } => {
                let (Some(actor), Some(source)) =
                    (snapshot.object(actor_id), snapshot.object(target_id))
                else {
                    return;
                };
                let mined = HARVEST_POWER
                    .min(source.store_of("energy"))
                    .min(actor.store_free_capacity());
                if mined == 0 {
                    return;
                }
                writer.patch(
                    target_id,
                    json!({"store": adjusted_store(source, "energy", -mined)}),
                );
                writer.patch(
                    actor_id,
                    json!({"store": adjusted_store(actor, "energy", mined)}),
                );
            }
            IntentPayload::Transfer {
                target_id,
                resource,
                amount,
            } => {
                let (Some(actor), Some(target)) =
                    (snapshot.object(actor_id), snapshot.object(target_id))
                else {
                    return;
                };
                writer.patch(
                    actor_id,
                    json!({"store": adjusted_store(actor, resource, -amount)}),
                );
                writer.patch(
                    target_id,
                    json!({"store": adjusted_store(target, resource, *amount)}),
                );
            }
            IntentPayload::Withdraw {
                target_id,
                resource,
                amount,
            } => {
                let (Some(actor), Some(target)) =
                    (snapshot.object(actor_id), snapshot.object(target_id))
                else {
                    return;
                };
                writer.patch(
                    target_id,
                    json!({"store": adjusted_store(target, resource, -amount)}),
                );
                writer.patch(
                    actor_id,
                    json!({"store": adjusted_store(actor, resource, *amount)}),
                );
            }
            IntentPayload::Pickup { target_id } => {
                let (Some(actor), Some(dropped)) =
                    (snapshot.object(actor_id), snapshot.object(target_id))
                else {
                    return;
                };
                let Some((resource, amount)) =
                    dropped.store.iter().map(|(r, a)| (r.clone(), *a)).next()
                else {
                    return;
                };
                let taken = amount.min(actor.store_free_capacity());
                if taken == 0 {
                    return;
                }
                writer.patch(
                    actor_id,
                    json!({"store": adjusted_store(actor, &resource, taken)}),
                );
                if taken == amount {
                    writer.remove(target_id);
                } else {
                    writer.patch(
                        target_id,
                        json!({"store": adjusted_store(dropped, &resource, -taken)}),
                    );
                }
            }
            IntentPayload::Drop { resource, amount } => {
                let Some(actor) = snapshot.object(actor_id) else {
                    return;
                };
                writer.patch(
                    actor_id,
                    json!({"store": adjusted_store(actor, resource, -amount)}),
                );
                writer.upsert(dropped_resource(actor.pos, resource, *amount));
            }
            IntentPayload::Build { target_id } => {
                let Some(actor) = snapshot.object(actor_id) else {
                    return;
                };
                let spent = BUILD_POWER.min(actor.store_of("energy"));
                if spent == 0 {
                    return;
                }
                writer.patch(
                    actor_id,
                    json!({"store": adjusted_store(actor, "energy", -spent)}),
                );
                writer.patch(target_id, json!({"progress_delta": spent}));
            }
            IntentPayload::Repair { target_id } => {
                let Some(target) = snapshot.object(target_id) else {
                    return;
                };
                let Some(actor) = snapshot.object(actor_id) else {
                    return;
                };
                let hits = pending_hits(writer, snapshot, target_id).unwrap_or(0);
                let max = target.hits_max.unwrap_or(hits);
                writer.patch(
                    actor_id,
                    json!({"store": adjusted_store(actor, "energy", -1)}),
                );
                writer.patch(target_id, json!({"hits": (hits + REPAIR_POWER).min(max)}));
            }
            IntentPayload::UpgradeController { target_id } => {
                let Some(actor) = snapshot.object(actor_id) else {
                    return;
                };
                writer.patch(
                    actor_id,
                    json!({"store": adjusted_store(actor, "energy", -1)}),
                );
                writer.patch(target_id, json!({"progress_delta": 1}));
            }
            IntentPayload::ReserveController { target_id } => {
                let Some(actor) = snapshot.object(actor_id) else {
                    return;
                };
                let Some(user) = actor.owner.as_deref() else {
                    return;
                };
                writer.patch(
                    target_id,
                    json!({"reservation": [user, snapshot.tick + RESERVE_DURATION_TICKS]}),
                );
            }
            IntentPayload::AttackController { target_id } => {
                writer.patch(target_id, json!({"reservation": Value::Null}));
                events.push(json!({"event": "attack_controller", "actor": actor_id}));
            }
            IntentPayload::Say { message } => {
                events.push(json!({"event": "say", "actor": actor_id, "message": message}));
            }
        }
    }

    /// Damage accounting that sees earlier buffered hits patches, so two
    /// attacks against one target stack within the tick
    fn apply_damage(
        &self,
        target_id: &str,
        power: i64,
        snapshot: &RoomSnapshot,
        writer: &mut RoomMutationWriter,
    ) {
        let Some(hits) = pending_hits(writer, snapshot, target_id) else {
            return;
        };
        let remaining = (hits - power).max(0);
        if remaining == 0 {
            writer.remove(target_id);
        } else {
            writer.patch(target_id, json!({"hits": remaining}));
        }
    }
}

/// Current hit points: the most recent buffered patch wins over the snapshot
fn pending_hits(
    writer: &RoomMutationWriter,
    snapshot: &RoomSnapshot,
    id: &str,
) -> Option<i64> {
    if let Some(hits) = writer
        .pending_object_state(id)
        .and_then(|partial| partial.get("hits"))
        .and_then(Value::as_i64)
    {
        return Some(hits);
    }
    snapshot.object(id)?.hits
}

/// The object's store with one resource adjusted, clamped at zero
fn adjusted_store(object: &RoomObject, resource: &str, delta: i64) -> Value {
    let mut store = object.store.clone();
    let entry = store.entry(resource.to_string()).or_insert(0);
    *entry = (*entry + delta).max(0);
    json!(store)
}

fn dropped_resource(pos: RoomPosition, resource: &str, amount: i64) -> RoomObject {
    RoomObject {
        id: Ulid::new().to_string(),
        kind: ObjectKind::Resource,
        pos,
        owner: None,
        hits: None,
        hits_max: None,
        store: std::collections::HashMap::from([(resource.to_string(), amount.max(0))]),
        store_capacity: None,
        spawning: false,
        safe_mode_until: None,
        reservation: None,
        level: None,
    }
}

#[async_trait]
impl UnitOfWork for RoomProcessor {
    fn role(&self) -> &'static str {
        "processor"
    }

    async fn run(&self, room: &str) -> Result<()> {
        let tick = self.clock.current();
        let snapshot = self.state.room_snapshot(room, tick).await?;
        trace!(
            room,
            tick,
            objects = snapshot.objects.len(),
            intents = snapshot.intents.len(),
            "Processing room"
        );

        let valid = self.pipeline.validate(&snapshot.intents, &snapshot);

        let mut writer = RoomMutationWriter::new(room, tick, Arc::clone(&self.dispatcher));
        let mut events = Vec::new();
        for intent in &valid {
            self.apply_intent(intent, &snapshot, &mut writer, &mut events);
        }
        if !events.is_empty() {
            writer.set_event_log(json!(events));
        }

        let history_payload = json!({
            "tick": tick,
            "objects": snapshot.objects,
        });
        self.history
            .save_room_history_tick(room, tick, &history_payload)
            .await?;
        if tick > 0 && tick % self.history_chunk_size == 0 {
            let base_tick = tick - self.history_chunk_size;
            self.history.upload_history_chunk(room, base_tick).await?;
        }

        self.exporter.export_room_stats(
            room,
            tick,
            &json!({
                "objects": snapshot.objects.len(),
                "intents": snapshot.intents.len(),
                "valid_intents": valid.len(),
            }),
        );

        debug!(
            room,
            tick,
            valid = valid.len(),
            ops = writer.op_count(),
            "Room processed"
        );
        writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::RoomMutationBatch;
    use crate::telemetry::{TelemetryRecord, WatchdogAlert};
    use crate::validation::payload::IntentRecord;
    use crate::validation::stats::ValidationStats;
    use crate::world::GlobalSnapshot;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct FixedWorld {
        snapshot: RoomSnapshot,
    }

    #[async_trait]
    impl StateProvider for FixedWorld {
        async fn room_snapshot(&self, _room: &str, _tick: u64) -> Result<RoomSnapshot> {
            Ok(self.snapshot.clone())
        }

        async fn global_snapshot(&self, tick: u64) -> Result<GlobalSnapshot> {
            Ok(GlobalSnapshot {
                tick,
                ..Default::default()
            })
        }

        async fn active_users(&self, _tick: u64) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn active_rooms(&self, _tick: u64) -> Result<Vec<String>> {
            Ok(vec![self.snapshot.room.clone()])
        }
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        batches: Mutex<Vec<RoomMutationBatch>>,
    }

    #[async_trait]
    impl crate::ports::RoomMutationDispatcher for RecordingDispatcher {
        async fn apply(&self, batch: RoomMutationBatch) -> Result<()> {
            self.batches.lock().push(batch);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingHistory {
        ticks: Mutex<Vec<(String, u64)>>,
        chunks: Mutex<Vec<(String, u64)>>,
    }

    #[async_trait]
    impl HistoryService for RecordingHistory {
        async fn save_room_history_tick(
            &self,
            room: &str,
            tick: u64,
            _payload: &Value,
        ) -> Result<()> {
            self.ticks.lock().push((room.to_string(), tick));
            Ok(())
        }

        async fn upload_history_chunk(&self, room: &str, base_tick: u64) -> Result<()> {
            self.chunks.lock().push((room.to_string(), base_tick));
            Ok(())
        }
    }

    struct NullExporter;

    impl ObservabilityExporter for NullExporter {
        fn export_telemetry(&self, _record: &TelemetryRecord) {}
        fn export_watchdog_alert(&self, _alert: &WatchdogAlert) {}
        fn export_room_stats(&self, _room: &str, _tick: u64, _stats: &Value) {}
    }

    fn creep(id: &str, owner: &str, x: u8, y: u8, energy: i64) -> RoomObject {
        RoomObject {
            id: id.to_string(),
            kind: ObjectKind::Creep,
            pos: RoomPosition::new(x, y),
            owner: Some(owner.to_string()),
            hits: Some(100),
            hits_max: Some(100),
            store: HashMap::from([("energy".to_string(), energy)]),
            store_capacity: Some(100),
            spawning: false,
            safe_mode_until: None,
            reservation: None,
            level: None,
        }
    }

    fn intent(actor: &str, name: &str, payload: Value) -> IntentRecord {
        IntentRecord {
            actor_id: actor.to_string(),
            name: name.to_string(),
            payload,
        }
    }

    fn processor(
        snapshot: RoomSnapshot,
        tick: u64,
    ) -> (RoomProcessor, Arc<RecordingDispatcher>, Arc<RecordingHistory>) {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let history = Arc::new(RecordingHistory::default());
        let processor = RoomProcessor::new(
            Arc::new(FixedWorld { snapshot }),
            Arc::new(ValidationPipeline::new(Arc::new(ValidationStats::new()))),
            Arc::clone(&dispatcher) as Arc<dyn crate::ports::RoomMutationDispatcher>,
            Arc::clone(&history) as Arc<dyn HistoryService>,
            Arc::new(NullExporter),
            Arc::new(TickClock::new(tick)),
            20,
        );
        (processor, dispatcher, history)
    }

    #[tokio::test]
    async fn test_move_intent_patches_position() {
        let mut snapshot = RoomSnapshot::new("W1N1", 5);
        let c1 = creep("c1", "alice", 10, 10, 0);
        snapshot.objects.insert("c1".to_string(), c1);
        snapshot
            .intents
            .push(intent("c1", "move", json!({"x": 11, "y": 10})));

        let (processor, dispatcher, _) = processor(snapshot, 5);
        processor.run("W1N1").await.unwrap();

        let batches = dispatcher.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].patches, vec![(
            "c1".to_string(),
            json!({"x": 11, "y": 10})
        )]);
    }

    #[tokio::test]
    async fn test_damage_stacks_within_tick() {
        let mut snapshot = RoomSnapshot::new("W1N1", 5);
        snapshot
            .objects
            .insert("c1".to_string(), creep("c1", "alice", 10, 10, 0));
        snapshot
            .objects
            .insert("c2".to_string(), creep("c2", "alice", 12, 10, 0));
        snapshot
            .objects
            .insert("t".to_string(), creep("t", "bob", 11, 10, 0));
        snapshot.intents.push(intent("c1", "attack", json!({"id": "t"})));
        snapshot.intents.push(intent("c2", "attack", json!({"id": "t"})));

        let (processor, dispatcher, _) = processor(snapshot, 5);
        processor.run("W1N1").await.unwrap();

        // Second attack saw the first one's buffered patch: 100 → 70 → 40
        let batches = dispatcher.batches.lock();
        let hits: Vec<i64> = batches[0]
            .patches
            .iter()
            .filter(|(id, _)| id == "t")
            .filter_map(|(_, p)| p.get("hits").and_then(Value::as_i64))
            .collect();
        assert_eq!(hits, vec![70, 40]);
    }

    #[tokio::test]
    async fn test_lethal_damage_removes_target() {
        let mut snapshot = RoomSnapshot::new("W1N1", 5);
        snapshot
            .objects
            .insert("c1".to_string(), creep("c1", "alice", 10, 10, 0));
        let mut weak = creep("t", "bob", 11, 10, 0);
        weak.hits = Some(20);
        snapshot.objects.insert("t".to_string(), weak);
        snapshot.intents.push(intent("c1", "attack", json!({"id": "t"})));

        let (processor, dispatcher, _) = processor(snapshot, 5);
        processor.run("W1N1").await.unwrap();

        let batches = dispatcher.batches.lock();
        assert_eq!(batches[0].removals, vec!["t".to_string()]);
    }

    #[tokio::test]
    async fn test_transfer_moves_store_both_sides() {
        let mut snapshot = RoomSnapshot::new("W1N1", 5);
        snapshot
            .objects
            .insert("c1".to_string(), creep("c1", "alice", 10, 10, 50));
        snapshot
            .objects
            .insert("s1".to_string(), creep("s1", "alice", 11, 10, 10));
        snapshot.intents.push(intent(
            "c1",
            "transfer",
            json!({"id": "s1", "resource": "energy", "amount": 30}),
        ));

        let (processor, dispatcher, _) = processor(snapshot, 5);
        processor.run("W1N1").await.unwrap();

        let batches = dispatcher.batches.lock();
        let patch_of = |id: &str| {
            batches[0]
                .patches
                .iter()
                .find(|(pid, _)| pid == id)
                .map(|(_, p)| p.clone())
                .unwrap()
        };
        assert_eq!(patch_of("c1"), json!({"store": {"energy": 20}}));
        assert_eq!(patch_of("s1"), json!({"store": {"energy": 40}}));
    }

    #[tokio::test]
    async fn test_build_spends_energy_and_advances_progress() {
        let mut snapshot = RoomSnapshot::new("W1N1", 5);
        snapshot
            .objects
            .insert("c1".to_string(), creep("c1", "alice", 10, 10, 50));
        let mut site = creep("site", "alice", 11, 10, 0);
        site.kind = ObjectKind::ConstructionSite;
        snapshot.objects.insert("site".to_string(), site);
        snapshot
            .intents
            .push(intent("c1", "build", json!({"id": "site"})));

        let (processor, dispatcher, _) = processor(snapshot, 5);
        processor.run("W1N1").await.unwrap();

        let batches = dispatcher.batches.lock();
        let patch_of = |id: &str| {
            batches[0]
                .patches
                .iter()
                .find(|(pid, _)| pid == id)
                .map(|(_, p)| p.clone())
                .unwrap()
        };
        assert_eq!(patch_of("c1"), json!({"store": {"energy": 45}}));
        assert_eq!(patch_of("site"), json!({"progress_delta": 5}));
    }

    #[tokio::test]
    async fn test_repair_restores_hits_capped_at_max() {
        let mut snapshot = RoomSnapshot::new("W1N1", 5);
        snapshot
            .objects
            .insert("c1".to_string(), creep("c1", "alice", 10, 10, 50));
        let mut container = creep("box", "alice", 11, 10, 0);
        container.kind = ObjectKind::Container;
        container.hits = Some(90);
        snapshot.objects.insert("box".to_string(), container);
        snapshot
            .intents
            .push(intent("c1", "repair", json!({"id": "box"})));

        let (processor, dispatcher, _) = processor(snapshot, 5);
        processor.run("W1N1").await.unwrap();

        let batches = dispatcher.batches.lock();
        let hits = batches[0]
            .patches
            .iter()
            .find(|(id, _)| id == "box")
            .and_then(|(_, p)| p.get("hits").and_then(Value::as_i64));
        // 90 + 20 clamps at hits_max
        assert_eq!(hits, Some(100));
    }

    #[tokio::test]
    async fn test_invalid_intents_produce_no_mutations() {
        let mut snapshot = RoomSnapshot::new("W1N1", 5);
        snapshot
            .objects
            .insert("c1".to_string(), creep("c1", "alice", 10, 10, 0));
        // Target out of melee range: rejected, and the batch stays empty
        snapshot
            .objects
            .insert("t".to_string(), creep("t", "bob", 30, 30, 0));
        snapshot.intents.push(intent("c1", "attack", json!({"id": "t"})));

        let (processor, dispatcher, _) = processor(snapshot, 5);
        processor.run("W1N1").await.unwrap();

        assert!(dispatcher.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_say_goes_to_event_log_only() {
        let mut snapshot = RoomSnapshot::new("W1N1", 5);
        snapshot
            .objects
            .insert("c1".to_string(), creep("c1", "alice", 10, 10, 0));
        snapshot
            .intents
            .push(intent("c1", "say", json!({"message": "hi"})));

        let (processor, dispatcher, _) = processor(snapshot, 5);
        processor.run("W1N1").await.unwrap();

        let batches = dispatcher.batches.lock();
        assert!(batches[0].patches.is_empty());
        let log = batches[0].event_log.as_ref().unwrap();
        assert_eq!(log[0]["event"], "say");
        assert_eq!(log[0]["message"], "hi");
    }

    #[tokio::test]
    async fn test_history_chunk_uploaded_on_boundary() {
        let snapshot = RoomSnapshot::new("W1N1", 40);
        let (processor, _, history) = processor(snapshot, 40);
        processor.run("W1N1").await.unwrap();

        assert_eq!(*history.ticks.lock(), vec![("W1N1".to_string(), 40)]);
        assert_eq!(*history.chunks.lock(), vec![("W1N1".to_string(), 20)]);
    }

    #[tokio::test]
    async fn test_history_chunk_skipped_off_boundary() {
        let snapshot = RoomSnapshot::new("W1N1", 41);
        let (processor, _, history) = processor(snapshot, 41);
        processor.run("W1N1").await.unwrap();

        assert_eq!(history.ticks.lock().len(), 1);
        assert!(history.chunks.lock().is_empty());
    }
}
