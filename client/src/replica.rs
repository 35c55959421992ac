//! Observer-side mirror of the authoritative object set.
//!
//! Everything here is derived from what the authority sends: spawn records
//! carry full current values so a late joiner needs no history, field
//! changes apply in version order with stale deliveries discarded, and
//! despawns drop the object entirely. The replica also hosts the dummy
//! projectiles — purely visual tracers that exist on no authority and are
//! never replicated back.

use log::{debug, info};
use shared::{
    owner_writable, CallChannel, ConnectionId, FieldChange, ObjectId, ObjectKind,
    ReplicationError, SpawnRecord, Value, ValueStore, Vec2, ARENA_HEIGHT, ARENA_WIDTH,
    CALL_DUMMY_PROJECTILE, CALL_PLAYER_DIED, FIELD_POSITION, PROJECTILE_LIFETIME,
    PROJECTILE_SPEED,
};
use std::collections::HashMap;

/// What the replica knows about a mirrored object beyond its fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplicaObject {
    pub kind: ObjectKind,
    pub owner: Option<ConnectionId>,
}

/// A cosmetic projectile tracer. Spawned locally on fire and from the
/// authority's broadcast for other players' shots; hit resolution happens
/// only on the authority.
#[derive(Debug, Clone, Copy)]
pub struct DummyProjectile {
    pub position: Vec2,
    pub velocity: Vec2,
    pub remaining: f32,
}

#[derive(Default)]
pub struct Replica {
    connection_id: Option<ConnectionId>,
    pub store: ValueStore,
    objects: HashMap<ObjectId, ReplicaObject>,
    dummies: Vec<DummyProjectile>,
    deaths: Vec<ObjectId>,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connection_id(&mut self, connection_id: ConnectionId) {
        self.connection_id = Some(connection_id);
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    /// Wires the observer-side handlers for authority broadcasts.
    pub fn register_observer_handlers(channel: &mut CallChannel<Replica>) {
        channel.register(CALL_DUMMY_PROJECTILE, |replica, _outbox, args, _sender| {
            let (Some(muzzle), Some(direction)) = (
                args.first().and_then(Value::as_vector),
                args.get(1).and_then(Value::as_vector),
            ) else {
                debug!("Malformed dummy_projectile broadcast");
                return;
            };
            replica.spawn_dummy(muzzle, direction.normalized() * PROJECTILE_SPEED);
        });
        channel.register(CALL_PLAYER_DIED, |replica, _outbox, args, _sender| {
            let Some(tank_object) = args.first().and_then(Value::as_int) else {
                debug!("Malformed player_died broadcast");
                return;
            };
            info!("Tank {} was destroyed", tank_object);
            replica.deaths.push(tank_object as ObjectId);
        });
    }

    /// Mirrors a spawned object, defining its fields at the carried
    /// current values and versions. A duplicate spawn (snapshot overlap,
    /// re-delivery) is ignored.
    pub fn apply_spawn(&mut self, record: SpawnRecord) {
        if self.objects.contains_key(&record.object_id) {
            debug!("Ignoring duplicate spawn of object {}", record.object_id);
            return;
        }

        self.objects.insert(
            record.object_id,
            ReplicaObject {
                kind: record.kind,
                owner: record.owner,
            },
        );
        for change in &record.fields {
            self.store.define(
                record.object_id,
                change.field_id,
                change.value,
                owner_writable(record.kind, change.field_id),
            );
            if change.version > 0 {
                // Adopt the carried version so older in-flight changes
                // cannot apply over the snapshot.
                let _ = self.store.apply_remote(change);
            }
        }
    }

    /// Mirrors the full join-time snapshot.
    pub fn apply_snapshot(&mut self, spawns: Vec<SpawnRecord>) {
        for record in spawns {
            self.apply_spawn(record);
        }
    }

    pub fn apply_despawn(&mut self, object_id: ObjectId) {
        self.objects.remove(&object_id);
        self.store.remove_object(object_id);
    }

    /// Applies an authoritative field change. Stale and duplicate
    /// deliveries are discarded, which is what makes the mirror converge
    /// regardless of delivery order.
    pub fn apply_change(&mut self, change: &FieldChange) {
        match self.store.apply_remote(change) {
            Ok(()) => {}
            Err(ReplicationError::StaleVersion {
                received, current, ..
            }) => {
                debug!(
                    "Discarding stale change for {}/{} (got {}, have {})",
                    change.object_id, change.field_id, received, current
                );
            }
            Err(err) => debug!("Dropping field change: {}", err),
        }
    }

    pub fn object(&self, object_id: ObjectId) -> Option<&ReplicaObject> {
        self.objects.get(&object_id)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// The tank owned by this connection, once both the identity and its
    /// spawn have arrived.
    pub fn my_tank(&self) -> Option<ObjectId> {
        let me = self.connection_id?;
        self.objects
            .iter()
            .find(|(_, object)| object.kind == ObjectKind::Tank && object.owner == Some(me))
            .map(|(object_id, _)| *object_id)
    }

    pub fn coin_objects(&self) -> Vec<ObjectId> {
        let mut coins: Vec<ObjectId> = self
            .objects
            .iter()
            .filter(|(_, object)| object.kind == ObjectKind::Coin)
            .map(|(object_id, _)| *object_id)
            .collect();
        coins.sort_unstable();
        coins
    }

    pub fn position_of(&self, object_id: ObjectId) -> Option<Vec2> {
        self.store
            .read(object_id, FIELD_POSITION)
            .and_then(|value| value.as_vector())
    }

    pub fn spawn_dummy(&mut self, position: Vec2, velocity: Vec2) {
        self.dummies.push(DummyProjectile {
            position,
            velocity,
            remaining: PROJECTILE_LIFETIME,
        });
    }

    /// Advances the cosmetic tracers and drops the expired ones.
    pub fn tick_dummies(&mut self, dt: f32) {
        for dummy in self.dummies.iter_mut() {
            dummy.position += dummy.velocity * dt;
            dummy.remaining -= dt;
        }
        self.dummies.retain(|dummy| {
            dummy.remaining > 0.0
                && dummy.position.x >= 0.0
                && dummy.position.y >= 0.0
                && dummy.position.x <= ARENA_WIDTH
                && dummy.position.y <= ARENA_HEIGHT
        });
    }

    pub fn dummies(&self) -> &[DummyProjectile] {
        &self.dummies
    }

    /// Death notifications received since the last drain.
    pub fn drain_deaths(&mut self) -> Vec<ObjectId> {
        std::mem::take(&mut self.deaths)
    }
}
