//! # Authority Server Library
//!
//! The authority process for the tank arena game. This crate owns the
//! canonical simulation: every replicated field write, every remote call and
//! every spawn/despawn decision happens here, and observers merely mirror
//! the results.
//!
//! ## Module organization
//!
//! ### Session Module (`session`)
//! Connection lifecycle: join and identity assignment, per-sender FIFO
//! command queues, heartbeat tracking and timeout cleanup.
//!
//! ### World Module (`world`)
//! The authoritative simulation — tanks, projectiles and respawning coins —
//! built on the shared replication core. Registers the action handlers
//! (`primary_fire`, `collect_coin`) that validate ownership, cooldowns and
//! guard conditions before mutating replicated state.
//!
//! ### Network Module (`network`)
//! UDP socket management and the tick loop: spawned receiver/sender/timeout
//! tasks feed a `tokio::select!` main loop that drains command queues in
//! per-sender arrival order, steps the world and flushes accepted changes
//! and broadcast calls to every observer.
//!
//! ## Error policy
//!
//! A misbehaving participant must not crash the simulation. Permission
//! failures, unknown objects and unknown calls are logged and dropped at the
//! boundary nearest their cause; the only user-visible effect is that the
//! offending connection's action does not happen.

pub mod network;
pub mod session;
pub mod world;
