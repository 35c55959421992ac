//! Authoritative simulation state.
//!
//! Tanks, projectiles and respawning coins, all expressed as replicated
//! objects in the shared core. Every canonical mutation funnels through the
//! action handlers and tick step in this module; observers only ever see the
//! resulting spawn/despawn events and field changes.
//!
//! The action pipeline for firing and collection follows one shape: the
//! initiating connection has already played a local cosmetic echo, its call
//! arrives here, the handler validates (ownership, cooldown, guard
//! condition) and on success mutates the store and broadcasts the cosmetic
//! echo to everyone else. Validation failures are absorbed — the only
//! visible outcome for the caller is that nothing happened.

use log::{debug, info, warn};
use rand::Rng;
use shared::{
    owner_writable, CallChannel, ConnectionId, FieldChange, FieldId, ObjectId, ObjectKind, Outbox,
    Registry, ReplicationError, Role, SpawnRecord, Value, ValueStore, Vec2, ARENA_HEIGHT,
    ARENA_WIDTH, CALL_COLLECT_COIN, CALL_DUMMY_PROJECTILE, CALL_PLAYER_DIED, CALL_PRIMARY_FIRE,
    COIN_PICKUP_RADIUS, COIN_VALUE, FIELD_COINS, FIELD_COIN_VALUE, FIELD_COLLECTED, FIELD_HEALTH,
    FIELD_POSITION, FIELD_ROTATION, FIELD_TURRET, FIELD_VELOCITY, FIRE_RATE, MAX_HEALTH,
    MUZZLE_SLACK, PROJECTILE_DAMAGE, PROJECTILE_LIFETIME, PROJECTILE_RADIUS, PROJECTILE_SPEED,
    TANK_RADIUS,
};
use std::collections::HashMap;

/// The authority's own connection id in the registry.
pub const AUTHORITY_ID: ConnectionId = 0;

const COIN_COUNT: usize = 4;
const COIN_MARGIN: f32 = 40.0;

/// Spawn/despawn notification for the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    Spawn(SpawnRecord),
    Despawn { object_id: ObjectId },
}

#[derive(Debug)]
struct Tank {
    object_id: ObjectId,
    dead: bool,
    last_fire: f64,
}

#[derive(Debug)]
struct Projectile {
    shooter: ConnectionId,
    position: Vec2,
    velocity: Vec2,
    remaining: f32,
}

pub struct World {
    pub registry: Registry,
    pub store: ValueStore,
    tanks: HashMap<ConnectionId, Tank>,
    projectiles: HashMap<ObjectId, Projectile>,
    coins: Vec<ObjectId>,
    kinds: HashMap<ObjectId, ObjectKind>,
    next_object_id: ObjectId,
    clock: f64,
    events: Vec<WorldEvent>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        let mut registry = Registry::new();
        registry.register_connection(AUTHORITY_ID, Role::Authority);

        let mut world = Self {
            registry,
            store: ValueStore::new(),
            tanks: HashMap::new(),
            projectiles: HashMap::new(),
            coins: Vec::new(),
            kinds: HashMap::new(),
            next_object_id: 1,
            clock: 0.0,
            events: Vec::new(),
        };
        for _ in 0..COIN_COUNT {
            world.spawn_coin();
        }
        world
    }

    /// Wires the authority-side action handlers into a call channel.
    pub fn register_handlers(channel: &mut CallChannel<World>) {
        channel.register(CALL_PRIMARY_FIRE, |world, outbox, args, sender| {
            world.primary_fire(sender, args, outbox);
        });
        channel.register(CALL_COLLECT_COIN, |world, _outbox, args, sender| {
            world.collect_coin(sender, args);
        });
    }

    fn alloc_object_id(&mut self) -> ObjectId {
        let id = self.next_object_id;
        self.next_object_id += 1;
        id
    }

    fn define_tank_field(&mut self, object_id: ObjectId, field_id: FieldId, initial: Value) {
        self.store.define(
            object_id,
            field_id,
            initial,
            owner_writable(ObjectKind::Tank, field_id),
        );
    }

    /// Admits a connection: registers its identity, spawns its tank and
    /// assigns ownership. The caller sends the snapshot and the spawn
    /// broadcast.
    pub fn on_join(&mut self, connection: ConnectionId) -> ObjectId {
        self.registry.register_connection(connection, Role::Participant);

        let object_id = self.alloc_object_id();
        self.registry.spawn_object(object_id, Some(connection));
        self.kinds.insert(object_id, ObjectKind::Tank);

        let spawn = Vec2::new(
            100.0 + (connection as f32 * 60.0) % (ARENA_WIDTH - 200.0),
            ARENA_HEIGHT / 2.0,
        );
        self.define_tank_field(object_id, FIELD_POSITION, Value::Vector(spawn));
        self.define_tank_field(object_id, FIELD_ROTATION, Value::Float(0.0));
        self.define_tank_field(object_id, FIELD_TURRET, Value::Float(0.0));
        self.define_tank_field(object_id, FIELD_HEALTH, Value::Int(MAX_HEALTH));
        self.define_tank_field(object_id, FIELD_COINS, Value::Int(0));

        self.tanks.insert(
            connection,
            Tank {
                object_id,
                dead: false,
                last_fire: f64::MIN,
            },
        );

        info!("Spawned tank {} for connection {}", object_id, connection);
        let record = self.spawn_record(object_id);
        self.events.push(WorldEvent::Spawn(record));
        object_id
    }

    /// Disconnect cleanup: despawns everything the connection exclusively
    /// owned and frees its identity slot. Projectiles it fired are unowned
    /// and keep flying.
    pub fn on_leave(&mut self, connection: ConnectionId) {
        self.tanks.remove(&connection);
        for object_id in self.registry.remove_connection(connection) {
            self.despawn(object_id);
        }
    }

    fn despawn(&mut self, object_id: ObjectId) {
        self.registry.despawn_object(object_id);
        self.store.remove_object(object_id);
        self.kinds.remove(&object_id);
        self.projectiles.remove(&object_id);
        self.coins.retain(|id| *id != object_id);
        self.events.push(WorldEvent::Despawn { object_id });
    }

    fn spawn_coin(&mut self) {
        let object_id = self.alloc_object_id();
        self.registry.spawn_object(object_id, None);
        self.kinds.insert(object_id, ObjectKind::Coin);

        self.store.define(
            object_id,
            FIELD_POSITION,
            Value::Vector(random_coin_position()),
            false,
        );
        self.store
            .define(object_id, FIELD_COIN_VALUE, Value::Int(COIN_VALUE), false);
        self.store
            .define(object_id, FIELD_COLLECTED, Value::Bool(false), false);

        self.coins.push(object_id);
        let record = self.spawn_record(object_id);
        self.events.push(WorldEvent::Spawn(record));
    }

    pub fn spawn_record(&self, object_id: ObjectId) -> SpawnRecord {
        SpawnRecord {
            object_id,
            kind: self.kinds[&object_id],
            owner: self.registry.owner_of(object_id),
            fields: self.store.snapshot_object(object_id),
        }
    }

    /// Full current-value snapshot of every live object, for a new observer.
    pub fn snapshot(&self) -> Vec<SpawnRecord> {
        let mut object_ids: Vec<ObjectId> = self.kinds.keys().copied().collect();
        object_ids.sort_unstable();
        object_ids
            .into_iter()
            .map(|object_id| self.spawn_record(object_id))
            .collect()
    }

    /// Owner-writable intent from a participant. The store's permission
    /// check is the gate; rejected writes are logged and dropped so a
    /// misbehaving participant cannot crash or desynchronize the simulation.
    pub fn handle_field_write(
        &mut self,
        sender: ConnectionId,
        object_id: ObjectId,
        field_id: FieldId,
        value: Value,
    ) {
        let value = match (field_id, value) {
            // Keep claimed positions inside the arena.
            (FIELD_POSITION, Value::Vector(position)) => Value::Vector(position.clamped(
                TANK_RADIUS,
                TANK_RADIUS,
                ARENA_WIDTH - TANK_RADIUS,
                ARENA_HEIGHT - TANK_RADIUS,
            )),
            (_, value) => value,
        };

        match self.store.write(object_id, field_id, value, sender, &self.registry) {
            Ok(_) => {}
            Err(ReplicationError::PermissionDenied(_)) => {
                warn!(
                    "Dropping field write {}/{} from non-owner {}",
                    object_id, field_id, sender
                );
            }
            Err(err) => debug!("Dropping field write from {}: {}", sender, err),
        }
    }

    fn tank_position(&self, object_id: ObjectId) -> Option<Vec2> {
        self.store
            .read(object_id, FIELD_POSITION)
            .and_then(|value| value.as_vector())
    }

    /// `primary_fire(tank, muzzle_position, direction)` — validates that the
    /// sender owns the acting tank (the defense against a forged call
    /// spoofing another player), that the fire cooldown has elapsed and that
    /// the claimed muzzle is near the tank, then spawns the authoritative
    /// projectile and broadcasts the cosmetic echo to everyone but the
    /// shooter, who already played it locally.
    fn primary_fire(&mut self, sender: ConnectionId, args: &[Value], outbox: &mut Outbox) {
        let (Some(tank_object), Some(muzzle), Some(direction)) = (
            args.first().and_then(Value::as_int),
            args.get(1).and_then(Value::as_vector),
            args.get(2).and_then(Value::as_vector),
        ) else {
            warn!("Malformed primary_fire from {}", sender);
            return;
        };
        let tank_object = tank_object as ObjectId;

        if self.registry.owner_of(tank_object) != Some(sender) {
            warn!(
                "Rejecting primary_fire from {}: not the owner of object {}",
                sender, tank_object
            );
            return;
        }
        let Some(tank) = self.tanks.get(&sender) else {
            return;
        };
        if tank.dead {
            return;
        }
        if self.clock - tank.last_fire < (1.0 / FIRE_RATE) as f64 {
            debug!("Fire from {} inside cooldown, ignored", sender);
            return;
        }
        let Some(tank_position) = self.tank_position(tank_object) else {
            return;
        };
        if tank_position.distance(muzzle) > MUZZLE_SLACK {
            warn!("Rejecting primary_fire from {}: muzzle too far from tank", sender);
            return;
        }

        let velocity = direction.normalized() * PROJECTILE_SPEED;
        let object_id = self.alloc_object_id();
        self.registry.spawn_object(object_id, None);
        self.kinds.insert(object_id, ObjectKind::Projectile);
        self.store
            .define(object_id, FIELD_POSITION, Value::Vector(muzzle), false);
        self.store
            .define(object_id, FIELD_VELOCITY, Value::Vector(velocity), false);
        self.projectiles.insert(
            object_id,
            Projectile {
                shooter: sender,
                position: muzzle,
                velocity,
                remaining: PROJECTILE_LIFETIME,
            },
        );
        let record = self.spawn_record(object_id);
        self.events.push(WorldEvent::Spawn(record));

        if let Some(tank) = self.tanks.get_mut(&sender) {
            tank.last_fire = self.clock;
        }

        outbox.broadcast(
            CALL_DUMMY_PROJECTILE,
            vec![Value::Vector(muzzle), Value::Vector(direction)],
            Some(sender),
        );
    }

    /// `collect_coin(tank, coin, expected_version)` — first valid claim
    /// wins. The guard is the version of the coin's collected field: a
    /// request racing a previous collection assumes an old version and is
    /// rejected, so the field transitions uncollected-to-collected exactly
    /// once per respawn cycle. On success the wallet increments and the coin
    /// respawns elsewhere, which also advances the guard version.
    fn collect_coin(&mut self, sender: ConnectionId, args: &[Value]) {
        let (Some(tank_object), Some(coin_object), Some(expected_version)) = (
            args.first().and_then(Value::as_int),
            args.get(1).and_then(Value::as_int),
            args.get(2).and_then(Value::as_int),
        ) else {
            warn!("Malformed collect_coin from {}", sender);
            return;
        };
        let tank_object = tank_object as ObjectId;
        let coin_object = coin_object as ObjectId;

        if self.registry.owner_of(tank_object) != Some(sender) {
            warn!(
                "Rejecting collect_coin from {}: not the owner of object {}",
                sender, tank_object
            );
            return;
        }
        if self.kinds.get(&coin_object) != Some(&ObjectKind::Coin) {
            debug!("collect_coin from {} names unknown coin {}", sender, coin_object);
            return;
        }

        let collected = self
            .store
            .read(coin_object, FIELD_COLLECTED)
            .and_then(|value| value.as_bool())
            .unwrap_or(true);
        let version = self.store.version(coin_object, FIELD_COLLECTED).unwrap_or(0);
        if collected || version != expected_version as u64 {
            debug!(
                "Superseded collect from {}: coin {} at version {} (claimed {})",
                sender, coin_object, version, expected_version
            );
            return;
        }

        let (Some(tank_position), Some(coin_position)) = (
            self.tank_position(tank_object),
            self.tank_position(coin_object),
        ) else {
            return;
        };
        if tank_position.distance(coin_position) > COIN_PICKUP_RADIUS + TANK_RADIUS {
            debug!("collect_coin from {} out of range", sender);
            return;
        }

        let coin_value = self
            .store
            .read(coin_object, FIELD_COIN_VALUE)
            .and_then(|value| value.as_int())
            .unwrap_or(COIN_VALUE);
        let wallet = self
            .store
            .read(tank_object, FIELD_COINS)
            .and_then(|value| value.as_int())
            .unwrap_or(0);

        self.write_authority(coin_object, FIELD_COLLECTED, Value::Bool(true));
        self.write_authority(tank_object, FIELD_COINS, Value::Int(wallet + coin_value));

        // Respawn elsewhere; the version bumps invalidate in-flight claims.
        self.write_authority(
            coin_object,
            FIELD_POSITION,
            Value::Vector(random_coin_position()),
        );
        self.write_authority(coin_object, FIELD_COLLECTED, Value::Bool(false));

        info!(
            "Connection {} collected coin {} ({} total)",
            sender,
            coin_object,
            wallet + coin_value
        );
    }

    fn write_authority(&mut self, object_id: ObjectId, field_id: FieldId, value: Value) {
        if let Err(err) = self
            .store
            .write(object_id, field_id, value, AUTHORITY_ID, &self.registry)
        {
            debug!("Authority write to {}/{} failed: {}", object_id, field_id, err);
        }
    }

    /// Clamped health mutation. The die transition fires exactly once;
    /// damage after death is ignored. `is_dead` stays derived from the
    /// health value and is never replicated on its own.
    pub fn apply_damage(&mut self, target: ObjectId, amount: i32, outbox: &mut Outbox) {
        let Some(tank) = self.tanks.values().find(|tank| tank.object_id == target) else {
            return;
        };
        if tank.dead {
            return;
        }

        let current = self
            .store
            .read(target, FIELD_HEALTH)
            .and_then(|value| value.as_int())
            .unwrap_or(0);
        let health = (current - amount).clamp(0, MAX_HEALTH);
        if health == current {
            return;
        }
        self.write_authority(target, FIELD_HEALTH, Value::Int(health));

        if health == 0 {
            if let Some(tank) = self.tanks.values_mut().find(|tank| tank.object_id == target) {
                tank.dead = true;
            }
            info!("Tank {} destroyed", target);
            outbox.broadcast(CALL_PLAYER_DIED, vec![Value::Int(target as i32)], None);
        }
    }

    /// One bounded simulation step: advances projectiles, resolves contact
    /// damage and expiry. No I/O, no unbounded loops.
    pub fn tick(&mut self, dt: f32, outbox: &mut Outbox) {
        self.clock += dt as f64;

        let tanks: Vec<(ConnectionId, ObjectId, Vec2)> = self
            .tanks
            .iter()
            .filter(|(_, tank)| !tank.dead)
            .filter_map(|(owner, tank)| {
                self.tank_position(tank.object_id)
                    .map(|position| (*owner, tank.object_id, position))
            })
            .collect();

        let mut hits: Vec<(ObjectId, ObjectId)> = Vec::new();
        let mut expired: Vec<ObjectId> = Vec::new();

        for (object_id, projectile) in self.projectiles.iter_mut() {
            projectile.position += projectile.velocity * dt;
            projectile.remaining -= dt;

            let out_of_bounds = projectile.position.x < 0.0
                || projectile.position.y < 0.0
                || projectile.position.x > ARENA_WIDTH
                || projectile.position.y > ARENA_HEIGHT;
            if projectile.remaining <= 0.0 || out_of_bounds {
                expired.push(*object_id);
                continue;
            }

            let contact = tanks.iter().find(|(owner, _, position)| {
                // No self fire.
                *owner != projectile.shooter
                    && position.distance(projectile.position) < TANK_RADIUS + PROJECTILE_RADIUS
            });
            if let Some((_, tank_object, _)) = contact {
                hits.push((*object_id, *tank_object));
            }
        }

        for (projectile, tank_object) in hits {
            self.apply_damage(tank_object, PROJECTILE_DAMAGE, outbox);
            self.despawn(projectile);
        }
        for object_id in expired {
            self.despawn(object_id);
        }
    }

    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn tank_object(&self, connection: ConnectionId) -> Option<ObjectId> {
        self.tanks.get(&connection).map(|tank| tank.object_id)
    }

    pub fn is_dead(&self, connection: ConnectionId) -> bool {
        self.tanks.get(&connection).map(|tank| tank.dead).unwrap_or(false)
    }

    pub fn coin_objects(&self) -> &[ObjectId] {
        &self.coins
    }

    pub fn projectile_count(&self) -> usize {
        self.projectiles.len()
    }

    /// Collected-field version a claimant must name to win the coin.
    pub fn coin_guard_version(&self, coin_object: ObjectId) -> u64 {
        self.store.version(coin_object, FIELD_COLLECTED).unwrap_or(0)
    }

    /// Queues the change records for a list of authoritative writes made in
    /// tests; production code drains the store through the network layer.
    pub fn drain_changes(&mut self) -> Vec<FieldChange> {
        self.store.drain_outbound()
    }
}

fn random_coin_position() -> Vec2 {
    let mut rng = rand::thread_rng();
    Vec2::new(
        rng.gen_range(COIN_MARGIN..ARENA_WIDTH - COIN_MARGIN),
        rng.gen_range(COIN_MARGIN..ARENA_HEIGHT - COIN_MARGIN),
    )
}
