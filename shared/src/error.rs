//! Error taxonomy for the replication core.
//!
//! Every variant here is absorbed at the boundary nearest its cause: a
//! misbehaving participant gets its request dropped (optionally logged), the
//! simulation never terminates on any of these, and other connections are
//! never desynchronized by them.

use crate::{ConnectionId, FieldId, ObjectId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    /// A non-authority attempted an authoritative mutation, or a non-owner
    /// attempted an owner-only one.
    #[error("connection {0} lacks permission for this mutation")]
    PermissionDenied(ConnectionId),

    /// Stale or malformed object reference.
    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    /// No handler registered under this call name.
    #[error("no handler registered for call '{0}'")]
    UnknownCall(String),

    /// A replicated update superseded by a newer version; discarded, not an
    /// error to the sender.
    #[error("stale version {received} for object {object_id} field {field_id} (have {current})")]
    StaleVersion {
        object_id: ObjectId,
        field_id: FieldId,
        received: u64,
        current: u64,
    },

    /// Terminal per-connection condition; triggers lifecycle cleanup.
    #[error("connection {0} lost")]
    ConnectionLost(ConnectionId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ReplicationError::PermissionDenied(7);
        assert!(err.to_string().contains("connection 7"));

        let err = ReplicationError::StaleVersion {
            object_id: 3,
            field_id: 1,
            received: 4,
            current: 9,
        };
        assert!(err.to_string().contains("stale version 4"));
        assert!(err.to_string().contains("have 9"));
    }
}
