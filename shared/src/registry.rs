//! Identity and ownership registry.
//!
//! Maps connections to roles and objects to owning connections. Exactly one
//! connection per simulation instance holds the authority role; every
//! permission decision in the store and the action handlers is answered here
//! rather than by ad-hoc flags scattered through gameplay code.

use crate::error::ReplicationError;
use crate::{ConnectionId, ObjectId};
use log::warn;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Authority,
    Participant,
}

#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, Role>,
    authority: Option<ConnectionId>,
    /// Key presence means the object exists; `None` means unowned
    /// (authority-only).
    owners: HashMap<ObjectId, Option<ConnectionId>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection. Returns false if the id is already taken or a
    /// second authority is offered.
    pub fn register_connection(&mut self, id: ConnectionId, role: Role) -> bool {
        if self.connections.contains_key(&id) {
            return false;
        }
        if role == Role::Authority {
            if self.authority.is_some() {
                warn!("Rejecting second authority registration from {}", id);
                return false;
            }
            self.authority = Some(id);
        }
        self.connections.insert(id, role);
        true
    }

    /// Removes a connection and returns the objects it exclusively owned,
    /// which the caller must despawn.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Vec<ObjectId> {
        if self.connections.remove(&id).is_none() {
            return Vec::new();
        }
        if self.authority == Some(id) {
            self.authority = None;
        }
        self.objects_owned_by(id)
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn is_authority(&self, id: ConnectionId) -> bool {
        self.authority == Some(id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn spawn_object(&mut self, object_id: ObjectId, owner: Option<ConnectionId>) {
        self.owners.insert(object_id, owner);
    }

    pub fn despawn_object(&mut self, object_id: ObjectId) -> bool {
        self.owners.remove(&object_id).is_some()
    }

    pub fn contains_object(&self, object_id: ObjectId) -> bool {
        self.owners.contains_key(&object_id)
    }

    /// Owning connection of an object, `None` for unowned or unknown objects.
    pub fn owner_of(&self, object_id: ObjectId) -> Option<ConnectionId> {
        self.owners.get(&object_id).copied().flatten()
    }

    pub fn objects_owned_by(&self, id: ConnectionId) -> Vec<ObjectId> {
        self.owners
            .iter()
            .filter(|(_, owner)| **owner == Some(id))
            .map(|(object_id, _)| *object_id)
            .collect()
    }

    /// Reassigns ownership. Only the authority may call this; assigning a
    /// nonexistent object is reported as `UnknownObject` and changes nothing.
    pub fn assign_ownership(
        &mut self,
        object_id: ObjectId,
        new_owner: ConnectionId,
        caller: ConnectionId,
    ) -> Result<(), ReplicationError> {
        if !self.is_authority(caller) {
            return Err(ReplicationError::PermissionDenied(caller));
        }
        match self.owners.get_mut(&object_id) {
            Some(owner) => {
                *owner = Some(new_owner);
                Ok(())
            }
            None => Err(ReplicationError::UnknownObject(object_id)),
        }
    }
}
