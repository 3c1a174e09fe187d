// src/validation/payload.rs
//! Intent records and typed payloads
//!
//! Player scripts emit intents as raw JSON. The schema stage converts each
//! one into a strongly-typed `IntentPayload` keyed by intent name before
//! any other stage runs; unknown names and malformed payloads fail schema
//! validation instead of being dynamically dispatched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One player-issued command, as captured from sandbox execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRecord {
    /// Acting object id
    pub actor_id: String,

    /// Intent name, e.g. "move", "attack"
    pub name: String,

    /// Raw payload; shape depends on the intent name and is validated,
    /// never assumed
    pub payload: Value,
}

/// Closed taxonomy of validation rejection codes
///
/// These are values, not errors: a rejected intent is dropped silently and
/// the code only shows up in the statistics sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionCode {
    InvalidSchema,
    ActorMissing,
    TargetMissing,
    ActorSpawning,
    ActorNoHits,
    ActorNoStore,
    OutOfRange,
    NotOwned,
    SafeModeBlocked,
    RampartBlocked,
    InsufficientResources,
    CapacityFull,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::InvalidSchema => "invalid-schema",
            RejectionCode::ActorMissing => "actor-missing",
            RejectionCode::TargetMissing => "target-missing",
            RejectionCode::ActorSpawning => "actor-spawning",
            RejectionCode::ActorNoHits => "actor-no-hits",
            RejectionCode::ActorNoStore => "actor-no-store",
            RejectionCode::OutOfRange => "out-of-range",
            RejectionCode::NotOwned => "not-owned",
            RejectionCode::SafeModeBlocked => "safe-mode-blocked",
            RejectionCode::RampartBlocked => "rampart-blocked",
            RejectionCode::InsufficientResources => "insufficient-resource",
            RejectionCode::CapacityFull => "capacity-full",
        }
    }
}

#[derive(Debug, Deserialize)]
struct MovePayload {
    x: u8,
    y: u8,
}

#[derive(Debug, Deserialize)]
struct TargetPayload {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResourcePayload {
    id: String,
    resource: String,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct DropPayload {
    resource: String,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct SayPayload {
    message: String,
}

/// Typed intent payload, one variant per supported intent kind
#[derive(Debug, Clone, PartialEq)]
pub enum IntentPayload {
    Move { x: u8, y: u8 },
    Attack { target_id: String },
    RangedAttack { target_id: String },
    Heal { target_id: String },
    Harvest { target_id: String },
    Build { target_id: String },
    Repair { target_id: String },
    Transfer { target_id: String, resource: String, amount: i64 },
    Withdraw { target_id: String, resource: String, amount: i64 },
    Pickup { target_id: String },
    Drop { resource: String, amount: i64 },
    UpgradeController { target_id: String },
    ReserveController { target_id: String },
    AttackController { target_id: String },
    Say { message: String },
}

impl IntentPayload {
    /// Schema stage: convert a raw payload into its typed form
    pub fn parse(name: &str, raw: &Value) -> Result<Self, RejectionCode> {
        let invalid = |_| RejectionCode::InvalidSchema;
        match name {
            "move" => {
                let p: MovePayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
                Ok(IntentPayload::Move { x: p.x, y: p.y })
            }
            "attack" => {
                let p: TargetPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
                Ok(IntentPayload::Attack { target_id: p.id })
            }
            "ranged_attack" => {
                let p: TargetPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
                Ok(IntentPayload::RangedAttack { target_id: p.id })
            }
            "heal" => {
                let p: TargetPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
                Ok(IntentPayload::Heal { target_id: p.id })
            }
            "harvest" => {
                let p: TargetPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
                Ok(IntentPayload::Harvest { target_id: p.id })
            }
            "build" => {
                let p: TargetPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
                Ok(IntentPayload::Build { target_id: p.id })
            }
            "repair" => {
                let p: TargetPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
                Ok(IntentPayload::Repair { target_id: p.id })
            }
            "transfer" => {
                let p: ResourcePayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
                Ok(IntentPayload::Transfer {
                    target_id: p.id,
                    resource: p.resource,
                    amount: p.amount,
                })
            }
            "withdraw" => {
                let p: ResourcePayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
                Ok(IntentPayload::Withdraw {
                    target_id: p.id,
                    resource: p.resource,
                    amount: p.amount,
                })
            }
            "pickup" => {
                let p: TargetPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
                Ok(IntentPayload::Pickup { target_id: p.id })
            }
            "drop" => {
                let p: DropPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
                Ok(IntentPayload::Drop {
                    resource: p.resource,
                    amount: p.amount,
                })
            }
            "upgrade_controller" => {
                let p: TargetPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
                Ok(IntentPayload::UpgradeController { target_id: p.id })
            }
            "reserve_controller" => {
                let p: TargetPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
                Ok(IntentPayload::ReserveController { target_id: p.id })
            }
            "attack_controller" => {
                let p: TargetPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
                Ok(IntentPayload::AttackController { target_id: p.id })
            }
            "say" => {
                let p: SayPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
                Ok(IntentPayload::Say { message: p.message })
            }
            _ => Err(RejectionCode::InvalidSchema),
        }
    }

    /// Target object id, for targeted intents
    pub fn target_id(&self) -> Option<&str> {
        match self {
            IntentPayload::Attack { target_id }
            | IntentPayload::RangedAttack { target_id }
            | IntentPayload::Heal { target_id }
            | IntentPayload::Harvest { target_id }
            | IntentPayload::Build { target_id }
            | IntentPayload::Repair { target_id }
            | IntentPayload::Transfer { target_id, .. }
            | IntentPayload::Withdraw { target_id, .. }
            | IntentPayload::Pickup { target_id }
            | IntentPayload::UpgradeController { target_id }
            | IntentPayload::ReserveController { target_id }
            | IntentPayload::AttackController { target_id } => Some(target_id),
            IntentPayload::Move { .. }
            | IntentPayload::Drop { .. }
            | IntentPayload::Say { .. } => None,
        }
    }

    /// Maximum Chebyshev distance to the target for this intent kind
    ///
    /// Melee-class actions work at range 1; ranged attack and the
    /// controller interactions work at range 3.
    pub fn required_range(&self) -> u32 {
        match self {
            IntentPayload::RangedAttack { .. }
            | IntentPayload::UpgradeController { .. }
            | IntentPayload::ReserveController { .. }
            | IntentPayload::AttackController { .. } => 3,
            _ => 1,
        }
    }

    /// Hostile intents are subject to safe mode and rampart redirection
    pub fn is_hostile(&self) -> bool {
        matches!(
            self,
            IntentPayload::Attack { .. }
                | IntentPayload::RangedAttack { .. }
                | IntentPayload::AttackController { .. }
        )
    }

    /// Whether the actor must be a live (has-hits) creep
    pub fn requires_actor_hits(&self) -> bool {
        !matches!(self, IntentPayload::Say { .. })
    }

    /// Whether the actor must carry a store
    pub fn requires_actor_store(&self) -> bool {
        matches!(
            self,
            IntentPayload::Transfer { .. }
                | IntentPayload::Withdraw { .. }
                | IntentPayload::Pickup { .. }
                | IntentPayload::Drop { .. }
                | IntentPayload::Build { .. }
                | IntentPayload::Repair { .. }
                | IntentPayload::UpgradeController { .. }
        )
    }
}

/// An intent that survived every validation stage
#[derive(Debug, Clone)]
pub struct ValidIntent {
    pub record: IntentRecord,
    pub payload: IntentPayload,
}
