//! Events forwarded from the state machine to whatever observes the engine
//! from outside (logging, metrics, a `client::Handle` subscriber).
use std::fmt;
use std::net::SocketAddr;

use bitcoin::hashes::sha256d;

use crate::fsm::handler::DisconnectReason;

#[derive(Debug, Clone)]
pub enum AddressEvent {
    Received { count: usize, source: SocketAddr },
    Imported(usize),
}

#[derive(Debug, Clone)]
pub enum PeerEvent {
    Connecting(SocketAddr),
    Connected(SocketAddr),
    HandshakeComplete(SocketAddr),
    Disconnected(SocketAddr, String),
}

#[derive(Debug, Clone)]
pub enum InventoryEvent {
    BlockAnnounced { peer: SocketAddr, hash: sha256d::Hash },
    TxAnnounced { peer: SocketAddr, hash: sha256d::Hash },
    GetBlocksServed { peer: SocketAddr, count: usize },
    QueueOverflow { peer: SocketAddr },
}

#[derive(Debug, Clone)]
pub enum PingEvent {
    Sent(SocketAddr, u64),
    TimedOut(SocketAddr),
}

#[derive(Debug, Clone)]
pub enum Event {
    Ready,
    Address(AddressEvent),
    Peer(PeerEvent),
    Inventory(InventoryEvent),
    Ping(PingEvent),
    Banned { addr: SocketAddr, reason: DisconnectReason },
}

impl From<AddressEvent> for Event {
    fn from(e: AddressEvent) -> Self {
        Event::Address(e)
    }
}

impl From<PeerEvent> for Event {
    fn from(e: PeerEvent) -> Self {
        Event::Peer(e)
    }
}

impl From<InventoryEvent> for Event {
    fn from(e: InventoryEvent) -> Self {
        Event::Inventory(e)
    }
}

impl From<PingEvent> for Event {
    fn from(e: PingEvent) -> Self {
        Event::Ping(e)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
