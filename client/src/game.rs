//! Player controller: input to intents, with the local echo.
//!
//! Every action follows the same shape. The controller applies a cosmetic
//! prediction to the replica so the player sees the result immediately,
//! and emits the matching intent (an owner field write or a remote call)
//! for the authority to validate. A rejected intent simply never comes
//! back, and the authoritative stream corrects the prediction.

use crate::input::InputEvent;
use crate::replica::Replica;
use shared::{
    ObjectId, Outbox, Packet, Value, Vec2, ARENA_HEIGHT, ARENA_WIDTH, CALL_COLLECT_COIN,
    CALL_PRIMARY_FIRE, COIN_PICKUP_RADIUS, FIELD_COLLECTED, FIELD_HEALTH, FIELD_POSITION,
    FIELD_ROTATION, FIELD_TURRET, FIRE_RATE, MOVEMENT_SPEED, PROJECTILE_RADIUS,
    PROJECTILE_SPEED, TANK_RADIUS, TURNING_RATE,
};

#[derive(Default)]
pub struct PlayerController {
    move_input: Vec2,
    aim_point: Option<Vec2>,
    fire_held: bool,
    fire_cooldown: f32,
}

impl PlayerController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_event(&mut self, event: InputEvent) {
        match event {
            InputEvent::Move(direction) => self.move_input = direction,
            InputEvent::Aim(point) => self.aim_point = Some(point),
            InputEvent::Fire(held) => self.fire_held = held,
        }
    }

    /// One local tick: moves and aims the owned tank, fires and claims
    /// coins. Returns the owner field writes to send; calls are queued on
    /// the outbox.
    pub fn tick(&mut self, dt: f32, replica: &mut Replica, outbox: &mut Outbox) -> Vec<Packet> {
        self.fire_cooldown = (self.fire_cooldown - dt).max(0.0);
        replica.tick_dummies(dt);

        let mut packets = Vec::new();
        let Some(tank) = replica.my_tank() else {
            return packets;
        };

        // A destroyed tank stops acting; the wreck stays on the field.
        let health = replica
            .store
            .read(tank, FIELD_HEALTH)
            .and_then(|value| value.as_int())
            .unwrap_or(0);
        if health <= 0 {
            return packets;
        }

        let Some(mut position) = replica.position_of(tank) else {
            return packets;
        };
        let mut rotation = replica
            .store
            .read(tank, FIELD_ROTATION)
            .and_then(|value| value.as_float())
            .unwrap_or(0.0);

        if self.move_input != Vec2::ZERO {
            rotation -= self.move_input.x * TURNING_RATE * dt;
            let heading = Vec2::from_degrees(rotation);
            position = (position + heading * (self.move_input.y * MOVEMENT_SPEED * dt)).clamped(
                TANK_RADIUS,
                TANK_RADIUS,
                ARENA_WIDTH - TANK_RADIUS,
                ARENA_HEIGHT - TANK_RADIUS,
            );

            replica.store.predict(tank, FIELD_POSITION, Value::Vector(position));
            replica.store.predict(tank, FIELD_ROTATION, Value::Float(rotation));
            packets.push(Packet::FieldWrite {
                object_id: tank,
                field_id: FIELD_POSITION,
                value: Value::Vector(position),
            });
            packets.push(Packet::FieldWrite {
                object_id: tank,
                field_id: FIELD_ROTATION,
                value: Value::Float(rotation),
            });
        }

        let turret = match self.aim_point {
            Some(aim) if aim != position => (aim - position).angle_degrees(),
            _ => rotation,
        };
        let stored_turret = replica
            .store
            .read(tank, FIELD_TURRET)
            .and_then(|value| value.as_float())
            .unwrap_or(0.0);
        if (turret - stored_turret).abs() > 0.01 {
            replica.store.predict(tank, FIELD_TURRET, Value::Float(turret));
            packets.push(Packet::FieldWrite {
                object_id: tank,
                field_id: FIELD_TURRET,
                value: Value::Float(turret),
            });
        }

        if self.fire_held && self.fire_cooldown <= 0.0 {
            self.fire_cooldown = 1.0 / FIRE_RATE;
            self.fire(tank, position, turret, replica, outbox);
        }

        self.claim_overlapped_coins(tank, position, replica, outbox);
        packets
    }

    /// Local tracer now, authoritative projectile when the call lands.
    fn fire(
        &mut self,
        tank: ObjectId,
        position: Vec2,
        turret: f32,
        replica: &mut Replica,
        outbox: &mut Outbox,
    ) {
        let direction = Vec2::from_degrees(turret);
        let muzzle = position + direction * (TANK_RADIUS + PROJECTILE_RADIUS);

        replica.spawn_dummy(muzzle, direction * PROJECTILE_SPEED);
        outbox.call_authority(
            CALL_PRIMARY_FIRE,
            vec![
                Value::Int(tank as i32),
                Value::Vector(muzzle),
                Value::Vector(direction),
            ],
        );
    }

    /// Claims every uncollected coin under the tank, naming the guard
    /// version so a racing claim by another player supersedes this one.
    /// The predicted pickup hides the coin immediately; if the claim
    /// loses, the authoritative respawn restores it elsewhere.
    fn claim_overlapped_coins(
        &mut self,
        tank: ObjectId,
        position: Vec2,
        replica: &mut Replica,
        outbox: &mut Outbox,
    ) {
        for coin in replica.coin_objects() {
            let collected = replica
                .store
                .read(coin, FIELD_COLLECTED)
                .and_then(|value| value.as_bool())
                .unwrap_or(true);
            if collected {
                continue;
            }
            let Some(coin_position) = replica.position_of(coin) else {
                continue;
            };
            if position.distance(coin_position) > COIN_PICKUP_RADIUS + TANK_RADIUS {
                continue;
            }

            let guard = replica.store.version(coin, FIELD_COLLECTED).unwrap_or(0);
            replica.store.predict(coin, FIELD_COLLECTED, Value::Bool(true));
            outbox.call_authority(
                CALL_COLLECT_COIN,
                vec![
                    Value::Int(tank as i32),
                    Value::Int(coin as i32),
                    Value::Int(guard as i32),
                ],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{
        CallTarget, ConnectionId, FieldChange, ObjectKind, SpawnRecord, MAX_HEALTH,
    };

    const ME: ConnectionId = 1;
    const TANK: ObjectId = 10;
    const COIN: ObjectId = 20;

    fn field(object_id: ObjectId, field_id: shared::FieldId, value: Value) -> FieldChange {
        FieldChange {
            object_id,
            field_id,
            version: 0,
            value,
        }
    }

    fn replica_with_tank() -> Replica {
        let mut replica = Replica::new();
        replica.set_connection_id(ME);
        replica.apply_spawn(SpawnRecord {
            object_id: TANK,
            kind: ObjectKind::Tank,
            owner: Some(ME),
            fields: vec![
                field(TANK, FIELD_POSITION, Value::Vector(Vec2::new(400.0, 300.0))),
                field(TANK, FIELD_ROTATION, Value::Float(0.0)),
                field(TANK, FIELD_TURRET, Value::Float(0.0)),
                field(TANK, FIELD_HEALTH, Value::Int(MAX_HEALTH)),
            ],
        });
        replica
    }

    fn spawn_coin(replica: &mut Replica, position: Vec2) {
        replica.apply_spawn(SpawnRecord {
            object_id: COIN,
            kind: ObjectKind::Coin,
            owner: None,
            fields: vec![
                field(COIN, FIELD_POSITION, Value::Vector(position)),
                field(COIN, FIELD_COLLECTED, Value::Bool(false)),
            ],
        });
    }

    #[test]
    fn test_forward_drive_predicts_and_emits_writes() {
        let mut replica = replica_with_tank();
        let mut controller = PlayerController::new();
        let mut outbox = Outbox::default();

        controller.handle_event(InputEvent::Move(Vec2::new(0.0, 1.0)));
        let packets = controller.tick(0.5, &mut replica, &mut outbox);

        // Heading 0 degrees is +Y; half a second of drive.
        let position = replica.position_of(TANK).unwrap();
        assert_approx_eq!(position.x, 400.0, 1e-3);
        assert_approx_eq!(position.y, 300.0 + MOVEMENT_SPEED * 0.5, 1e-3);

        // Prediction mints no version.
        assert_eq!(replica.store.version(TANK, FIELD_POSITION), Some(0));

        let wrote_position = packets.iter().any(|packet| {
            matches!(packet, Packet::FieldWrite { field_id, .. } if *field_id == FIELD_POSITION)
        });
        assert!(wrote_position);
    }

    #[test]
    fn test_turning_changes_rotation() {
        let mut replica = replica_with_tank();
        let mut controller = PlayerController::new();
        let mut outbox = Outbox::default();

        controller.handle_event(InputEvent::Move(Vec2::new(1.0, 0.0)));
        controller.tick(0.5, &mut replica, &mut outbox);

        let rotation = replica
            .store
            .read(TANK, FIELD_ROTATION)
            .and_then(|value| value.as_float())
            .unwrap();
        assert_approx_eq!(rotation, -TURNING_RATE * 0.5, 1e-3);
    }

    #[test]
    fn test_movement_clamped_to_arena() {
        let mut replica = replica_with_tank();
        let mut controller = PlayerController::new();
        let mut outbox = Outbox::default();

        controller.handle_event(InputEvent::Move(Vec2::new(0.0, 1.0)));
        for _ in 0..600 {
            controller.tick(0.1, &mut replica, &mut outbox);
        }

        let position = replica.position_of(TANK).unwrap();
        assert!(position.y <= ARENA_HEIGHT - TANK_RADIUS + 1e-3);
    }

    #[test]
    fn test_fire_spawns_tracer_and_queues_call() {
        let mut replica = replica_with_tank();
        let mut controller = PlayerController::new();
        let mut outbox = Outbox::default();

        controller.handle_event(InputEvent::Fire(true));
        controller.tick(1.0 / 60.0, &mut replica, &mut outbox);

        assert_eq!(replica.dummies().len(), 1);
        let calls = outbox.drain();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, CALL_PRIMARY_FIRE);
        assert_eq!(calls[0].target, CallTarget::Authority);
        assert_eq!(calls[0].args[0], Value::Int(TANK as i32));
    }

    #[test]
    fn test_fire_respects_local_cooldown() {
        let mut replica = replica_with_tank();
        let mut controller = PlayerController::new();
        let mut outbox = Outbox::default();

        controller.handle_event(InputEvent::Fire(true));
        for _ in 0..6 {
            controller.tick(1.0 / 60.0, &mut replica, &mut outbox);
        }

        // Six frames at 60 Hz is 0.1s, under the cooldown: one shot.
        assert_eq!(outbox.drain().len(), 1);
    }

    #[test]
    fn test_coin_overlap_claims_with_guard_version() {
        let mut replica = replica_with_tank();
        spawn_coin(&mut replica, Vec2::new(400.0, 300.0));
        let mut controller = PlayerController::new();
        let mut outbox = Outbox::default();

        controller.tick(1.0 / 60.0, &mut replica, &mut outbox);

        let calls = outbox.drain();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, CALL_COLLECT_COIN);
        assert_eq!(
            calls[0].args,
            vec![Value::Int(TANK as i32), Value::Int(COIN as i32), Value::Int(0)]
        );

        // The predicted pickup hides the coin, so no duplicate claim.
        controller.tick(1.0 / 60.0, &mut replica, &mut outbox);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_distant_coin_not_claimed() {
        let mut replica = replica_with_tank();
        spawn_coin(&mut replica, Vec2::new(100.0, 100.0));
        let mut controller = PlayerController::new();
        let mut outbox = Outbox::default();

        controller.tick(1.0 / 60.0, &mut replica, &mut outbox);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_dead_tank_ignores_input() {
        let mut replica = replica_with_tank();
        replica.apply_change(&FieldChange {
            object_id: TANK,
            field_id: FIELD_HEALTH,
            version: 1,
            value: Value::Int(0),
        });
        let mut controller = PlayerController::new();
        let mut outbox = Outbox::default();

        controller.handle_event(InputEvent::Move(Vec2::new(0.0, 1.0)));
        controller.handle_event(InputEvent::Fire(true));
        let packets = controller.tick(0.5, &mut replica, &mut outbox);

        assert!(packets.is_empty());
        assert!(outbox.is_empty());
        assert_eq!(replica.position_of(TANK), Some(Vec2::new(400.0, 300.0)));
    }

    #[test]
    fn test_aim_tracks_turret() {
        let mut replica = replica_with_tank();
        let mut controller = PlayerController::new();
        let mut outbox = Outbox::default();

        // Aim straight up from the tank.
        controller.handle_event(InputEvent::Aim(Vec2::new(400.0, 500.0)));
        let packets = controller.tick(1.0 / 60.0, &mut replica, &mut outbox);

        let turret = replica
            .store
            .read(TANK, FIELD_TURRET)
            .and_then(|value| value.as_float())
            .unwrap();
        assert_approx_eq!(turret, 0.0, 1e-3);
        // Turret already at 0, so no redundant write.
        assert!(packets.is_empty());

        // Aim to the left: +90 degrees counter-clockwise.
        controller.handle_event(InputEvent::Aim(Vec2::new(300.0, 300.0)));
        controller.tick(1.0 / 60.0, &mut replica, &mut outbox);
        let turret = replica
            .store
            .read(TANK, FIELD_TURRET)
            .and_then(|value| value.as_float())
            .unwrap();
        assert_approx_eq!(turret, 90.0, 1e-3);
    }
}
