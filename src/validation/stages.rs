// src/validation/stages.rs
//! The four post-schema validation stages
//!
//! Each stage is independent and order-agnostic in isolation; the pipeline
//! fixes the order State → Range → Permission → Resource.

use crate::validation::payload::{IntentPayload, RejectionCode};
use crate::validation::pipeline::{IntentInFlight, ValidationStage};
use crate::world::{ObjectKind, RoomObject, RoomPosition, RoomSnapshot};

fn actor<'a>(
    intent: &IntentInFlight<'_>,
    snapshot: &'a RoomSnapshot,
) -> Result<&'a RoomObject, RejectionCode> {
    snapshot
        .object(&intent.record.actor_id)
        .ok_or(RejectionCode::ActorMissing)
}

fn target<'a>(
    intent: &IntentInFlight<'_>,
    snapshot: &'a RoomSnapshot,
) -> Result<Option<&'a RoomObject>, RejectionCode> {
    match intent.payload.target_id() {
        Some(id) => snapshot
            .object(id)
            .map(Some)
            .ok_or(RejectionCode::TargetMissing),
        None => Ok(None),
    }
}

/// State stage: actor/target existence and actor fitness for the intent kind
pub struct StateStage;

impl ValidationStage for StateStage {
    fn name(&self) -> &'static str {
        "state"
    }

    fn check(
        &self,
        intent: &IntentInFlight<'_>,
        snapshot: &RoomSnapshot,
    ) -> Result<(), RejectionCode> {
        let actor = actor(intent, snapshot)?;

        if actor.spawning {
            return Err(RejectionCode::ActorSpawning);
        }

        if intent.payload.requires_actor_hits() && actor.hits.map(|h| h <= 0).unwrap_or(true) {
            return Err(RejectionCode::ActorNoHits);
        }

        if intent.payload.requires_actor_store() && actor.store_capacity.is_none() {
            return Err(RejectionCode::ActorNoStore);
        }

        // Targeted intents need a resolvable target
        target(intent, snapshot)?;

        Ok(())
    }
}

/// Range stage: Chebyshev distance to the target within the per-kind range
pub struct RangeStage;

impl ValidationStage for RangeStage {
    fn name(&self) -> &'static str {
        "range"
    }

    fn check(
        &self,
        intent: &IntentInFlight<'_>,
        snapshot: &RoomSnapshot,
    ) -> Result<(), RejectionCode> {
        let actor = actor(intent, snapshot)?;

        let target_pos = match intent.payload {
            IntentPayload::Move { x, y } => RoomPosition::new(*x, *y),
            _ => match target(intent, snapshot)? {
                Some(target) => target.pos,
                None => return Ok(()), // untargeted: nothing to range-check
            },
        };

        if actor.pos.range_to(&target_pos) > intent.payload.required_range() {
            return Err(RejectionCode::OutOfRange);
        }

        Ok(())
    }
}

/// Permission stage: ownership, room control, safe mode, rampart redirection
pub struct PermissionStage;

impl ValidationStage for PermissionStage {
    fn name(&self) -> &'static str {
        "permission"
    }

    fn check(
        &self,
        intent: &IntentInFlight<'_>,
        snapshot: &RoomSnapshot,
    ) -> Result<(), RejectionCode> {
        let actor = actor(intent, snapshot)?;
        let user = actor.owner.as_deref().unwrap_or("");
        let controller = snapshot.controller();

        if intent.payload.is_hostile() {
            // Safe mode blocks hostile actions from anyone but the room owner
            if let Some(controller) = controller {
                let safe_mode_active = controller
                    .safe_mode_until
                    .map(|until| until > snapshot.tick)
                    .unwrap_or(false);
                let owns_room = controller.owner.as_deref() == Some(user);
                if safe_mode_active && !owns_room {
                    return Err(RejectionCode::SafeModeBlocked);
                }
            }

            // A hostile rampart over the target absorbs the attack instead
            if let Some(target) = target(intent, snapshot)? {
                if snapshot.hostile_rampart_at(target.pos, user).is_some() {
                    return Err(RejectionCode::RampartBlocked);
                }
            }
        }

        match intent.payload {
            IntentPayload::UpgradeController { .. } => {
                let target = target(intent, snapshot)?.ok_or(RejectionCode::TargetMissing)?;
                if target.kind != ObjectKind::Controller
                    || target.owner.as_deref() != Some(user)
                {
                    return Err(RejectionCode::NotOwned);
                }
            }
            IntentPayload::ReserveController { .. } => {
                let target = target(intent, snapshot)?.ok_or(RejectionCode::TargetMissing)?;
                let reserved_by_other = target
                    .reservation
                    .as_ref()
                    .map(|(who, _)| who != user)
                    .unwrap_or(false);
                if target.kind != ObjectKind::Controller
                    || target.owner.is_some()
                    || reserved_by_other
                {
                    return Err(RejectionCode::NotOwned);
                }
            }
            IntentPayload::AttackController { .. } => {
                let target = target(intent, snapshot)?.ok_or(RejectionCode::TargetMissing)?;
                // Attacking your own controller makes no sense
                if target.kind != ObjectKind::Controller
                    || target.owner.as_deref() == Some(user)
                {
                    return Err(RejectionCode::NotOwned);
                }
            }
            IntentPayload::Build { .. } => {
                // Construction needs an owned or reserved room, or no claim at all
                if let Some(controller) = controller {
                    let owned_by_other = controller
                        .owner
                        .as_deref()
                        .map(|owner| owner != user)
                        .unwrap_or(false);
                    let reserved_by_other = controller
                        .reservation
                        .as_ref()
                        .map(|(who, _)| who != user)
                        .unwrap_or(false);
                    if owned_by_other || reserved_by_other {
                        return Err(RejectionCode::NotOwned);
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }
}

/// Resource stage: store sufficiency and capacity headroom
pub struct ResourceStage;

impl ValidationStage for ResourceStage {
    fn name(&self) -> &'static str {
        "resource"
    }

    fn check(
        &self,
        intent: &IntentInFlight<'_>,
        snapshot: &RoomSnapshot,
    ) -> Result<(), RejectionCode> {
        let actor = actor(intent, snapshot)?;

        match intent.payload {
            IntentPayload::Transfer {
                resource, amount, ..
            } => {
                if *amount <= 0 || actor.store_of(resource) < *amount {
                    return Err(RejectionCode::InsufficientResources);
                }
                let target = target(intent, snapshot)?.ok_or(RejectionCode::TargetMissing)?;
                if target.store_free_capacity() < *amount {
                    return Err(RejectionCode::CapacityFull);
                }
            }
            IntentPayload::Withdraw {
                resource, amount, ..
            } => {
                let target = target(intent, snapshot)?.ok_or(RejectionCode::TargetMissing)?;
                if *amount <= 0 || target.store_of(resource) < *amount {
                    return Err(RejectionCode::InsufficientResources);
                }
                if actor.store_free_capacity() < *amount {
                    return Err(RejectionCode::CapacityFull);
                }
            }
            IntentPayload::Drop { resource, amount } => {
                if *amount <= 0 || actor.store_of(resource) < *amount {
                    return Err(RejectionCode::InsufficientResources);
                }
            }
            IntentPayload::Pickup { .. } => {
                if actor.store_free_capacity() <= 0 {
                    return Err(RejectionCode::CapacityFull);
                }
            }
            IntentPayload::Build { .. }
            | IntentPayload::Repair { .. }
            | IntentPayload::UpgradeController { .. } => {
                if actor.store_of("energy") <= 0 {
                    return Err(RejectionCode::InsufficientResources);
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::payload::IntentRecord;
    use serde_json::json;
    use std::collections::HashMap;

    fn object(id: &str, kind: ObjectKind, owner: Option<&str>, x: u8, y: u8) -> RoomObject {
        RoomObject {
            id: id.to_string(),
            kind,
            pos: RoomPosition::new(x, y),
            owner: owner.map(String::from),
            hits: Some(100),
            hits_max: Some(100),
            store: HashMap::new(),
            store_capacity: None,
            spawning: false,
            safe_mode_until: None,
            reservation: None,
            level: None,
        }
    }

    fn creep(id: &str, owner: &str, x: u8, y: u8) -> RoomObject {
        let mut obj = object(id, ObjectKind::Creep, Some(owner), x, y);
        obj.store_capacity = Some(100);
        obj.store.insert("energy".to_string(), 50);
        obj
    }

    fn snapshot_with(objects: Vec<RoomObject>) -> RoomSnapshot {
        let mut snapshot = RoomSnapshot::new("W1N1", 100);
        for obj in objects {
            snapshot.objects.insert(obj.id.clone(), obj);
        }
        snapshot
    }

    fn in_flight<'a>(
        record: &'a IntentRecord,
        payload: &'a IntentPayload,
    ) -> IntentInFlight<'a> {
        IntentInFlight { record, payload }
    }

    fn check(
        stage: &dyn ValidationStage,
        snapshot: &RoomSnapshot,
        actor: &str,
        name: &str,
        raw: serde_json::Value,
    ) -> Result<(), RejectionCode> {
        let record = IntentRecord {
            actor_id: actor.to_string(),
            name: name.to_string(),
            payload: raw.clone(),
        };
        let payload = IntentPayload::parse(name, &raw).unwrap();
        stage.check(&in_flight(&record, &payload), snapshot)
    }

    #[test]
    fn test_state_rejects_spawning_actor() {
        let mut actor = creep("c1", "alice", 5, 5);
        actor.spawning = true;
        let snapshot = snapshot_with(vec![actor]);

        let result = check(&StateStage, &snapshot, "c1", "move", json!({"x": 6, "y": 5}));
        assert_eq!(result, Err(RejectionCode::ActorSpawning));
    }

    #[test]
    fn test_state_rejects_missing_target() {
        let snapshot = snapshot_with(vec![creep("c1", "alice", 5, 5)]);
        let result = check(&StateStage, &snapshot, "c1", "attack", json!({"id": "nope"}));
        assert_eq!(result, Err(RejectionCode::TargetMissing));
    }

    #[test]
    fn test_range_boundaries() {
        let snapshot = snapshot_with(vec![
            creep("c1", "alice", 10, 10),
            creep("near", "bob", 11, 11),
            creep("mid", "bob", 13, 10),
            creep("far", "bob", 14, 10),
        ]);

        assert!(check(&RangeStage, &snapshot, "c1", "attack", json!({"id": "near"})).is_ok());
        assert_eq!(
            check(&RangeStage, &snapshot, "c1", "attack", json!({"id": "mid"})),
            Err(RejectionCode::OutOfRange)
        );
        assert!(
            check(&RangeStage, &snapshot, "c1", "ranged_attack", json!({"id": "mid"})).is_ok()
        );
        assert_eq!(
            check(&RangeStage, &snapshot, "c1", "ranged_attack", json!({"id": "far"})),
            Err(RejectionCode::OutOfRange)
        );
    }

    #[test]
    fn test_permission_safe_mode_blocks_hostile() {
        let mut controller = object("ctrl", ObjectKind::Controller, Some("bob"), 25, 25);
        controller.safe_mode_until = Some(1_000);
        let snapshot = snapshot_with(vec![
            creep("c1", "alice", 10, 10),
            creep("victim", "bob", 11, 10),
            controller,
        ]);

        assert_eq!(
            check(&PermissionStage, &snapshot, "c1", "attack", json!({"id": "victim"})),
            Err(RejectionCode::SafeModeBlocked)
        );
        // Heal is not hostile: unaffected by safe mode
        assert!(check(&PermissionStage, &snapshot, "c1", "heal", json!({"id": "victim"})).is_ok());
    }

    #[test]
    fn test_permission_rampart_redirection() {
        let rampart = object("r1", ObjectKind::Rampart, Some("bob"), 11, 10);
        let snapshot = snapshot_with(vec![
            creep("c1", "alice", 10, 10),
            creep("victim", "bob", 11, 10),
            rampart,
        ]);

        assert_eq!(
            check(&PermissionStage, &snapshot, "c1", "attack", json!({"id": "victim"})),
            Err(RejectionCode::RampartBlocked)
        );
    }

    #[test]
    fn test_permission_upgrade_requires_ownership() {
        let controller = object("ctrl", ObjectKind::Controller, Some("bob"), 11, 10);
        let snapshot = snapshot_with(vec![creep("c1", "alice", 10, 10), controller]);

        assert_eq!(
            check(
                &PermissionStage,
                &snapshot,
                "c1",
                "upgrade_controller",
                json!({"id": "ctrl"})
            ),
            Err(RejectionCode::NotOwned)
        );
    }

    #[test]
    fn test_resource_transfer_checks_both_sides() {
        let mut storage = object("s1", ObjectKind::Storage, Some("alice"), 11, 10);
        storage.store_capacity = Some(10);
        storage.store.insert("energy".to_string(), 10);
        let snapshot = snapshot_with(vec![creep("c1", "alice", 10, 10), storage]);

        // Actor has 50 energy but target has no headroom
        assert_eq!(
            check(
                &ResourceStage,
                &snapshot,
                "c1",
                "transfer",
                json!({"id": "s1", "resource": "energy", "amount": 10})
            ),
            Err(RejectionCode::CapacityFull)
        );

        // More than the actor carries
        assert_eq!(
            check(
                &ResourceStage,
                &snapshot,
                "c1",
                "transfer",
                json!({"id": "s1", "resource": "energy", "amount": 500})
            ),
            Err(RejectionCode::InsufficientResources)
        );
    }

    #[test]
    fn test_resource_rejects_non_positive_amounts() {
        let mut storage = object("s1", ObjectKind::Storage, Some("alice"), 11, 10);
        storage.store_capacity = Some(1000);
        storage.store.insert("energy".to_string(), 100);
        let snapshot = snapshot_with(vec![creep("c1", "alice", 10, 10), storage]);

        for (name, raw) in [
            ("transfer", json!({"id": "s1", "resource": "energy", "amount": 0})),
            ("withdraw", json!({"id": "s1", "resource": "energy", "amount": -5})),
            ("drop", json!({"resource": "energy", "amount": 0})),
        ] {
            assert_eq!(
                check(&ResourceStage, &snapshot, "c1", name, raw),
                Err(RejectionCode::InsufficientResources),
                "{} should reject a non-positive amount",
                name
            );
        }
    }

    #[test]
    fn test_resource_upgrade_needs_energy() {
        let controller = object("ctrl", ObjectKind::Controller, Some("alice"), 11, 10);
        let mut empty = creep("c1", "alice", 10, 10);
        empty.store.clear();
        let snapshot = snapshot_with(vec![empty, controller]);

        assert_eq!(
            check(
                &ResourceStage,
                &snapshot,
                "c1",
                "upgrade_controller",
                json!({"id": "ctrl"})
            ),
            Err(RejectionCode::InsufficientResources)
        );
    }
}
