//! Remote call channel.
//!
//! Named, directed procedure invocation: observers call the authority
//! ("server call"), the authority calls all observers ("broadcast call"),
//! optionally excluding one connection so a cosmetic effect is not echoed
//! back to its originator. Handlers are registered by exact name and receive
//! the caller's connection id, so they can check ownership before mutating
//! state. Calls are never deduplicated; handlers own idempotence.
//!
//! Delivery ordering per sender is the transport's and the session queue's
//! job; this module only dispatches in the order it is handed calls.

use crate::error::ReplicationError;
use crate::wire::Value;
use crate::ConnectionId;
use log::warn;
use std::collections::{HashMap, VecDeque};

type CallHandler<C> = Box<dyn FnMut(&mut C, &mut Outbox, &[Value], ConnectionId)>;

#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// Deliver to the authority only.
    Authority,
    /// Deliver to every connection except the excluded one.
    Broadcast { exclude: Option<ConnectionId> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCall {
    pub name: String,
    pub args: Vec<Value>,
    pub target: CallTarget,
}

/// Outbound side of the channel, handed to handlers so they can emit calls
/// while a dispatch is in flight.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<OutboundCall>,
}

impl Outbox {
    pub fn call_authority(&mut self, name: &str, args: Vec<Value>) {
        self.queue.push_back(OutboundCall {
            name: name.to_string(),
            args,
            target: CallTarget::Authority,
        });
    }

    pub fn broadcast(&mut self, name: &str, args: Vec<Value>, exclude: Option<ConnectionId>) {
        self.queue.push_back(OutboundCall {
            name: name.to_string(),
            args,
            target: CallTarget::Broadcast { exclude },
        });
    }

    pub fn drain(&mut self) -> Vec<OutboundCall> {
        self.queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Dispatch table over a context `C` (the authoritative world on the server,
/// the replica on observers).
pub struct CallChannel<C> {
    handlers: HashMap<String, CallHandler<C>>,
    pub outbox: Outbox,
}

impl<C> Default for CallChannel<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            outbox: Outbox::default(),
        }
    }
}

impl<C> CallChannel<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        handler: impl FnMut(&mut C, &mut Outbox, &[Value], ConnectionId) + 'static,
    ) {
        self.handlers.insert(name.to_string(), Box::new(handler));
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Invokes the handler registered under `name`. An unregistered name is
    /// dropped with a logged `UnknownCall`, never fatal.
    pub fn dispatch(
        &mut self,
        ctx: &mut C,
        name: &str,
        args: &[Value],
        sender: ConnectionId,
    ) -> Result<(), ReplicationError> {
        // Take the handler out so it can reach the outbox without aliasing.
        let Some(mut handler) = self.handlers.remove(name) else {
            warn!("Dropping call '{}' from {}: no handler", name, sender);
            return Err(ReplicationError::UnknownCall(name.to_string()));
        };
        handler(ctx, &mut self.outbox, args, sender);
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }
}
