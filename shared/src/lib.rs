//! Shared replication core for the tank arena game.
//!
//! This crate is transport-agnostic: it defines the wire types exchanged
//! between the authority and its participants, plus the three building blocks
//! both sides are assembled from:
//!
//! - [`registry::Registry`] — connection identities, roles and object ownership
//! - [`store::ValueStore`] — replicated fields with permissioned writes,
//!   monotonic versions and change notification
//! - [`calls::CallChannel`] — named, directed remote procedure dispatch
//!
//! The `server` crate drives these as the single authority; the `client`
//! crate drives them as an observer with a local cosmetic echo. Neither side
//! implements transport reliability — a reliable, ordered link per connection
//! is assumed.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod calls;
pub mod error;
pub mod math;
pub mod registry;
pub mod store;
pub mod wire;

pub use calls::{CallChannel, CallTarget, Outbox, OutboundCall};
pub use error::ReplicationError;
pub use math::Vec2;
pub use registry::{Registry, Role};
pub use store::{SubscriptionId, ValueStore};
pub use wire::{FieldChange, ObjectKind, Packet, SpawnRecord, Value};

/// Connection identifier assigned at join. Id 0 is reserved for the authority.
pub type ConnectionId = u32;
/// Globally unique simulation object identifier, minted by the authority.
pub type ObjectId = u32;
/// Field identifier within a replicated object.
pub type FieldId = u16;

pub const PROTOCOL_VERSION: u32 = 1;

// Arena bounds
pub const ARENA_WIDTH: f32 = 800.0;
pub const ARENA_HEIGHT: f32 = 600.0;

// Tank tuning
pub const MOVEMENT_SPEED: f32 = 120.0;
pub const TURNING_RATE: f32 = 180.0;
pub const TANK_RADIUS: f32 = 16.0;
pub const MAX_HEALTH: i32 = 100;

// Projectiles
pub const PROJECTILE_SPEED: f32 = 400.0;
pub const PROJECTILE_LIFETIME: f32 = 1.5;
pub const PROJECTILE_RADIUS: f32 = 4.0;
pub const PROJECTILE_DAMAGE: i32 = 5;
/// Shots per second; the cooldown between shots is `1.0 / FIRE_RATE`.
pub const FIRE_RATE: f32 = 4.0;
/// How far from the tank centre a claimed muzzle position may be.
pub const MUZZLE_SLACK: f32 = 48.0;

// Coins
pub const COIN_VALUE: i32 = 10;
pub const COIN_PICKUP_RADIUS: f32 = 24.0;

// Replicated field ids
pub const FIELD_POSITION: FieldId = 0;
pub const FIELD_ROTATION: FieldId = 1;
pub const FIELD_TURRET: FieldId = 2;
pub const FIELD_HEALTH: FieldId = 3;
pub const FIELD_COINS: FieldId = 4;
pub const FIELD_VELOCITY: FieldId = 5;
pub const FIELD_COLLECTED: FieldId = 6;
pub const FIELD_COIN_VALUE: FieldId = 7;

// Remote call names
pub const CALL_PRIMARY_FIRE: &str = "primary_fire";
pub const CALL_COLLECT_COIN: &str = "collect_coin";
pub const CALL_DUMMY_PROJECTILE: &str = "dummy_projectile";
pub const CALL_PLAYER_DIED: &str = "player_died";

/// Whether a field accepts writes from the owning connection rather than
/// only the authority. Owner-writable fields carry the owner-controlled
/// transform; everything else is authority-only.
pub fn owner_writable(kind: ObjectKind, field: FieldId) -> bool {
    matches!(
        (kind, field),
        (ObjectKind::Tank, FIELD_POSITION)
            | (ObjectKind::Tank, FIELD_ROTATION)
            | (ObjectKind::Tank, FIELD_TURRET)
    )
}

/// Current wall-clock time in milliseconds, for heartbeats and logs.
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
