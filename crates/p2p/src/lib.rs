//! Peer-to-peer gossip engine: wire-framing is in `gossip-wire`, this crate
//! owns the reactor, the protocol state machine, and the client-facing
//! handle used to drive it from outside its own thread.
pub mod client;
pub mod common;
pub mod fsm;
pub mod net;

pub use client::{spawn, Client, ClientHandle, P2PConfig};
pub use fsm::handler::{Command, Config, DisconnectReason, StateMachine};
pub use net::reactor::{Limits, Reactor};
