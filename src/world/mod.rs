// src/world/mod.rs
//! World state snapshots
//!
//! Read-only, point-in-time views built fresh per processing unit. Nothing
//! here is ever mutated in place: every change is expressed as a buffered
//! patch collected by a mutation writer.

use crate::validation::payload::IntentRecord;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Room grid dimensions (50x50, coordinates 0-49)
pub const ROOM_SIZE: u8 = 50;

/// A position within one room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomPosition {
    pub x: u8,
    pub y: u8,
}

impl RoomPosition {
    pub fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    /// Chebyshev distance: max(|dx|, |dy|)
    pub fn range_to(&self, other: &RoomPosition) -> u32 {
        let dx = (self.x as i32 - other.x as i32).unsigned_abs();
        let dy = (self.y as i32 - other.y as i32).unsigned_abs();
        dx.max(dy)
    }
}

/// Kinds of objects that can occupy a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Creep,
    Spawn,
    Controller,
    Rampart,
    Storage,
    Container,
    Tower,
    Source,
    ConstructionSite,
    Resource,
}

/// One object in a room snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomObject {
    /// Storage document id
    pub id: String,

    /// Object kind
    pub kind: ObjectKind,

    /// Position within the room
    pub pos: RoomPosition,

    /// Owning user id, if owned
    #[serde(default)]
    pub owner: Option<String>,

    /// Current hit points (absent for indestructible objects)
    #[serde(default)]
    pub hits: Option<i64>,

    /// Maximum hit points
    #[serde(default)]
    pub hits_max: Option<i64>,

    /// Carried/stored resources by resource name
    #[serde(default)]
    pub store: HashMap<String, i64>,

    /// Total store capacity (absent means no store)
    #[serde(default)]
    pub store_capacity: Option<i64>,

    /// Creep still being spawned
    #[serde(default)]
    pub spawning: bool,

    /// Controller: safe mode active until this tick
    #[serde(default)]
    pub safe_mode_until: Option<u64>,

    /// Controller: reservation (user id, end tick)
    #[serde(default)]
    pub reservation: Option<(String, u64)>,

    /// Controller level
    #[serde(default)]
    pub level: Option<u32>,
}

impl RoomObject {
    /// Free capacity remaining in this object's store
    pub fn store_free_capacity(&self) -> i64 {
        let capacity = self.store_capacity.unwrap_or(0);
        let used: i64 = self.store.values().sum();
        (capacity - used).max(0)
    }

    /// Amount of one resource currently stored
    pub fn store_of(&self, resource: &str) -> i64 {
        self.store.get(resource).copied().unwrap_or(0)
    }
}

/// Read-only view of one room at one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Room name, e.g. "W1N1"
    pub room: String,

    /// Tick this snapshot was taken at
    pub tick: u64,

    /// Objects by id
    pub objects: HashMap<String, RoomObject>,

    /// Impassable terrain cells
    #[serde(default)]
    pub terrain_walls: HashSet<(u8, u8)>,

    /// Intents deposited by the runner stage for this room and tick
    #[serde(default)]
    pub intents: Vec<IntentRecord>,
}

impl RoomSnapshot {
    pub fn new(room: impl Into<String>, tick: u64) -> Self {
        Self {
            room: room.into(),
            tick,
            objects: HashMap::new(),
            terrain_walls: HashSet::new(),
            intents: Vec::new(),
        }
    }

    pub fn object(&self, id: &str) -> Option<&RoomObject> {
        self.objects.get(id)
    }

    /// The room's controller, if it has one
    pub fn controller(&self) -> Option<&RoomObject> {
        self.objects
            .values()
            .find(|o| o.kind == ObjectKind::Controller)
    }

    /// A hostile rampart standing on the given position, if any
    pub fn hostile_rampart_at(&self, pos: RoomPosition, user: &str) -> Option<&RoomObject> {
        self.objects.values().find(|o| {
            o.kind == ObjectKind::Rampart
                && o.pos == pos
                && o.owner.as_deref().map(|owner| owner != user).unwrap_or(false)
        })
    }
}

/// An actor crossing a room boundary this tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterRoomMove {
    pub object_id: String,
    pub from_room: String,
    pub to_room: String,
    pub entry_pos: RoomPosition,
}

/// One open market order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOrder {
    pub id: String,
    pub user_id: String,
    pub resource: String,
    pub amount: i64,
    pub price: i64,
    pub buy: bool,
}

/// Read-only world-scope view used by the global stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalSnapshot {
    /// Tick this snapshot was taken at
    pub tick: u64,

    /// Rooms reachable by players this tick
    pub accessible_rooms: Vec<String>,

    /// Actors moving between rooms
    pub inter_room_moves: Vec<InterRoomMove>,

    /// Open market orders
    pub market_orders: Vec<MarketOrder>,
}
