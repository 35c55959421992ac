//! Connection lifecycle and per-sender command queuing.
//!
//! Tracks every established session: identity assignment on join, address
//! routing for responses, heartbeat freshness and timeout cleanup. Inbound
//! remote calls and owner field writes are buffered per connection in
//! arrival order, which gives the per-sender ordering guarantee the action
//! pipeline relies on; interleaving across senders is unspecified.

use log::info;
use shared::{ConnectionId, FieldId, ObjectId, Value};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// A queued request from a participant, processed in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Call {
        name: String,
        args: Vec<Value>,
    },
    FieldWrite {
        object_id: ObjectId,
        field_id: FieldId,
        value: Value,
    },
}

/// An established session with a participant.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub last_seen: Instant,
    inbound: VecDeque<ClientCommand>,
}

impl Connection {
    pub fn new(id: ConnectionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            inbound: VecDeque::new(),
        }
    }

    pub fn push_command(&mut self, command: ClientCommand) {
        self.last_seen = Instant::now();
        self.inbound.push_back(command);
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Roster of connected participants with capacity enforcement.
pub struct ConnectionManager {
    connections: HashMap<ConnectionId, Connection>,
    next_connection_id: ConnectionId,
    max_connections: usize,
}

impl ConnectionManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            // Id 0 is the authority itself.
            next_connection_id: 1,
            max_connections,
        }
    }

    /// Admits a new connection, or returns None at capacity.
    pub fn add_connection(&mut self, addr: SocketAddr) -> Option<ConnectionId> {
        if self.connections.len() >= self.max_connections {
            return None;
        }

        let id = self.next_connection_id;
        self.next_connection_id += 1;

        info!("Connection {} established from {}", id, addr);
        self.connections.insert(id, Connection::new(id, addr));
        Some(id)
    }

    /// Frees a connection's identity slot. Pending commands are discarded;
    /// a disconnect mid-action simply means the action never happens.
    pub fn remove_connection(&mut self, id: ConnectionId) -> bool {
        if let Some(connection) = self.connections.remove(&id) {
            info!("Connection {} from {} closed", connection.id, connection.addr);
            true
        } else {
            false
        }
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|(_, connection)| connection.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Refreshes heartbeat freshness for a connection.
    pub fn touch(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.last_seen = Instant::now();
        }
    }

    pub fn push_command(&mut self, id: ConnectionId, command: ClientCommand) -> bool {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.push_command(command);
            true
        } else {
            false
        }
    }

    /// Drains every connection's queue, preserving arrival order per sender.
    /// No ordering is promised across different senders.
    pub fn drain_commands(&mut self) -> Vec<(ConnectionId, ClientCommand)> {
        let mut drained = Vec::new();
        for (id, connection) in self.connections.iter_mut() {
            while let Some(command) = connection.inbound.pop_front() {
                drained.push((*id, command));
            }
        }
        drained
    }

    /// Removes and returns connections that stopped sending packets.
    pub fn check_timeouts(&mut self) -> Vec<ConnectionId> {
        let timed_out: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, connection)| connection.is_timed_out(CONNECTION_TIMEOUT))
            .map(|(id, _)| *id)
            .collect();

        for id in &timed_out {
            self.remove_connection(*id);
        }
        timed_out
    }

    pub fn addrs(&self) -> Vec<(ConnectionId, SocketAddr)> {
        self.connections
            .iter()
            .map(|(id, connection)| (*id, connection.addr))
            .collect()
    }

    pub fn addr_of(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&id).map(|connection| connection.addr)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
