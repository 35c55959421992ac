//! Wire types exchanged between the authority and its participants.
//!
//! Everything here is bincode-serialized over the assumed reliable, ordered
//! transport. The two load-bearing shapes are `{name, args, sender}` for
//! remote calls and `{object_id, field_id, version, value}` for replicated
//! field changes; the rest is connection lifecycle framing.

use crate::math::Vec2;
use crate::{ConnectionId, FieldId, ObjectId};
use serde::{Deserialize, Serialize};

/// A typed replicated value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i32),
    Float(f32),
    Vector(Vec2),
    Bool(bool),
}

impl Value {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<Vec2> {
        match self {
            Value::Vector(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Tank,
    Projectile,
    Coin,
}

/// One accepted state transition of a replicated field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub object_id: ObjectId,
    pub field_id: FieldId,
    pub version: u64,
    pub value: Value,
}

/// Spawn notification carrying the object's current field values, so a
/// late-joining observer receives a snapshot rather than a diff history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRecord {
    pub object_id: ObjectId,
    pub kind: ObjectKind,
    pub owner: Option<ConnectionId>,
    pub fields: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    // Connection lifecycle
    Connect {
        client_version: u32,
    },
    Connected {
        connection_id: ConnectionId,
    },
    Heartbeat {
        timestamp: u64,
    },
    Disconnect,
    Disconnected {
        reason: String,
    },

    // Replication
    Snapshot {
        spawns: Vec<SpawnRecord>,
    },
    Spawn(SpawnRecord),
    Despawn {
        object_id: ObjectId,
    },
    /// Owner-writable intent, participant to authority. The authority mints
    /// the version on acceptance.
    FieldWrite {
        object_id: ObjectId,
        field_id: FieldId,
        value: Value,
    },
    /// Accepted change, authority to observers.
    FieldChange(FieldChange),

    /// Directed remote call. For client-to-authority calls the sender field
    /// is ignored and replaced with the connection id the packet arrived on.
    Call {
        name: String,
        args: Vec<Value>,
        sender: ConnectionId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use bincode::{deserialize, serialize};

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Int(7).as_int(), Some(7));
        assert_eq!(Value::Int(7).as_float(), None);
        assert_eq!(Value::Float(1.5).as_float(), Some(1.5));
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(
            Value::Vector(Vec2::new(1.0, 2.0)).as_vector(),
            Some(Vec2::new(1.0, 2.0))
        );
        assert_eq!(Value::Vector(Vec2::ZERO).as_bool(), None);
    }

    #[test]
    fn test_call_packet_roundtrip() {
        let packet = Packet::Call {
            name: "primary_fire".to_string(),
            args: vec![
                Value::Int(3),
                Value::Vector(Vec2::new(100.0, 200.0)),
                Value::Vector(Vec2::new(0.0, 1.0)),
            ],
            sender: 2,
        };

        let bytes = serialize(&packet).unwrap();
        let decoded: Packet = deserialize(&bytes).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_spawn_record_roundtrip() {
        let record = SpawnRecord {
            object_id: 9,
            kind: ObjectKind::Coin,
            owner: None,
            fields: vec![FieldChange {
                object_id: 9,
                field_id: crate::FIELD_COLLECTED,
                version: 0,
                value: Value::Bool(false),
            }],
        };

        let bytes = serialize(&Packet::Spawn(record.clone())).unwrap();
        match deserialize::<Packet>(&bytes).unwrap() {
            Packet::Spawn(decoded) => assert_eq!(decoded, record),
            other => panic!("wrong packet after roundtrip: {:?}", other),
        }
    }
}
