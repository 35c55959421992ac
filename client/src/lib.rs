//! # Participant Client Library
//!
//! The observer side of the tank arena game. The client never decides
//! anything: it mirrors the authority's objects and fields in a local
//! replica, plays cosmetic echoes for its own actions so they feel
//! instant, and sends intents (owner field writes and remote calls) that
//! only become real when the authority accepts them.
//!
//! ## Module organization
//!
//! ### Replica Module (`replica`)
//! Mirror of the authoritative object set. Applies spawn records, despawns
//! and versioned field changes, discarding stale deliveries; also hosts the
//! purely visual dummy projectiles.
//!
//! ### Game Module (`game`)
//! Turns input into movement writes, turret aim, fire calls and coin
//! claims, playing the local echo for each before the authority confirms.
//!
//! ### Input Module (`input`)
//! Input event model with a scripted source for bots and tests.
//!
//! ### Network Module (`network`)
//! UDP connection management: connect handshake, heartbeats, the receive
//! loop and the fixed-rate local tick.

pub mod game;
pub mod input;
pub mod network;
pub mod replica;
