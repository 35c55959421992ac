//! Replicated value store.
//!
//! Fields live on objects and are written only by the authority, or by the
//! owning connection when the field is owner-writable. Every accepted write
//! bumps a monotonic per-field version and queues a change record for
//! observers; observers apply incoming changes in version order and discard
//! anything at or below the version they already hold, which makes delivery
//! idempotent under duplication and reordering.
//!
//! Change subscriptions fire exactly once per accepted transition, after the
//! new value is stored, so reactive consumers (health bars, wallet counters)
//! always read back the value they were notified about.

use crate::error::ReplicationError;
use crate::registry::Registry;
use crate::wire::{FieldChange, Value};
use crate::{ConnectionId, FieldId, ObjectId};
use log::debug;
use std::collections::{HashMap, VecDeque};

pub type SubscriptionId = u32;

type ChangeCallback = Box<dyn FnMut(&Value, &Value)>;

#[derive(Debug)]
struct FieldSlot {
    value: Value,
    version: u64,
    owner_writable: bool,
}

#[derive(Default)]
pub struct ValueStore {
    fields: HashMap<(ObjectId, FieldId), FieldSlot>,
    outbound: VecDeque<FieldChange>,
    subscribers: HashMap<(ObjectId, FieldId), Vec<(SubscriptionId, ChangeCallback)>>,
    next_subscription: SubscriptionId,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a field on an object. Initial values are carried by spawn
    /// records, not the change queue.
    pub fn define(
        &mut self,
        object_id: ObjectId,
        field_id: FieldId,
        initial: Value,
        owner_writable: bool,
    ) {
        self.fields.insert(
            (object_id, field_id),
            FieldSlot {
                value: initial,
                version: 0,
                owner_writable,
            },
        );
    }

    /// Drops all fields and subscriptions of a despawned object.
    pub fn remove_object(&mut self, object_id: ObjectId) {
        self.fields.retain(|(obj, _), _| *obj != object_id);
        self.subscribers.retain(|(obj, _), _| *obj != object_id);
    }

    /// Authoritative write path. Accepts the write if the writer is the
    /// authority, or the object's owner on an owner-writable field. Returns
    /// the newly minted version on acceptance.
    pub fn write(
        &mut self,
        object_id: ObjectId,
        field_id: FieldId,
        value: Value,
        writer: ConnectionId,
        registry: &Registry,
    ) -> Result<u64, ReplicationError> {
        let slot = self
            .fields
            .get_mut(&(object_id, field_id))
            .ok_or(ReplicationError::UnknownObject(object_id))?;

        let permitted = registry.is_authority(writer)
            || (slot.owner_writable && registry.owner_of(object_id) == Some(writer));
        if !permitted {
            return Err(ReplicationError::PermissionDenied(writer));
        }

        let old = slot.value;
        slot.value = value;
        slot.version += 1;
        let version = slot.version;

        self.outbound.push_back(FieldChange {
            object_id,
            field_id,
            version,
            value,
        });
        self.notify(object_id, field_id, old, value);
        Ok(version)
    }

    /// Latest locally-applied value: authoritative on the authority,
    /// last-received on observers.
    pub fn read(&self, object_id: ObjectId, field_id: FieldId) -> Option<Value> {
        self.fields.get(&(object_id, field_id)).map(|s| s.value)
    }

    pub fn version(&self, object_id: ObjectId, field_id: FieldId) -> Option<u64> {
        self.fields.get(&(object_id, field_id)).map(|s| s.version)
    }

    /// Observer path: applies an authoritative change unless it is stale.
    /// A change at or below the stored version is discarded, which protects
    /// against duplicate and out-of-order delivery.
    pub fn apply_remote(&mut self, change: &FieldChange) -> Result<(), ReplicationError> {
        let slot = self
            .fields
            .get_mut(&(change.object_id, change.field_id))
            .ok_or(ReplicationError::UnknownObject(change.object_id))?;

        if change.version <= slot.version {
            return Err(ReplicationError::StaleVersion {
                object_id: change.object_id,
                field_id: change.field_id,
                received: change.version,
                current: slot.version,
            });
        }

        let old = slot.value;
        slot.value = change.value;
        slot.version = change.version;
        self.notify(change.object_id, change.field_id, old, change.value);
        Ok(())
    }

    /// Owner-local cosmetic echo: updates the value and fires change
    /// notifications without minting a version. The authority remains the
    /// only version source, so the authoritative stream later applies
    /// normally over a prediction.
    pub fn predict(&mut self, object_id: ObjectId, field_id: FieldId, value: Value) -> bool {
        let Some(slot) = self.fields.get_mut(&(object_id, field_id)) else {
            debug!("Prediction for unknown field {}/{}", object_id, field_id);
            return false;
        };
        let old = slot.value;
        slot.value = value;
        self.notify(object_id, field_id, old, value);
        true
    }

    /// Registers a change callback fired after-store with (old, new).
    pub fn subscribe(
        &mut self,
        object_id: ObjectId,
        field_id: FieldId,
        callback: impl FnMut(&Value, &Value) + 'static,
    ) -> SubscriptionId {
        self.next_subscription += 1;
        let id = self.next_subscription;
        self.subscribers
            .entry((object_id, field_id))
            .or_default()
            .push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        let mut removed = false;
        for subs in self.subscribers.values_mut() {
            let before = subs.len();
            subs.retain(|(id, _)| *id != subscription);
            removed |= subs.len() != before;
        }
        removed
    }

    /// Current values of an object's fields, for join-time snapshots.
    pub fn snapshot_object(&self, object_id: ObjectId) -> Vec<FieldChange> {
        let mut fields: Vec<FieldChange> = self
            .fields
            .iter()
            .filter(|((obj, _), _)| *obj == object_id)
            .map(|((_, field_id), slot)| FieldChange {
                object_id,
                field_id: *field_id,
                version: slot.version,
                value: slot.value,
            })
            .collect();
        fields.sort_by_key(|change| change.field_id);
        fields
    }

    /// Drains the queue of accepted changes awaiting delivery to observers.
    pub fn drain_outbound(&mut self) -> Vec<FieldChange> {
        self.outbound.drain(..).collect()
    }

    fn notify(&mut self, object_id: ObjectId, field_id: FieldId, old: Value, new: Value) {
        if let Some(subs) = self.subscribers.get_mut(&(object_id, field_id)) {
            for (_, callback) in subs.iter_mut() {
                callback(&old, &new);
            }
        }
    }
}
