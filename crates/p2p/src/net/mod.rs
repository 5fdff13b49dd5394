//! Reactor-facing networking types: the instruction set a connection's
//! state machine emits, and the source kinds the poll loop dispatches on.
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

pub mod error;
pub mod reactor;
pub mod socket;
pub mod time;

pub use reactor::Reactor;
pub use time::{LocalDuration, LocalTime};

use gossip_wire::NetworkMessage;

/// A registered source of poll events. Wraps the peer's address so the
/// reactor can route a readiness event back to its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Peer(SocketAddr),
    Listener,
}

/// Direction in which a connection was established.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Link {
    Inbound,
    Outbound,
}

impl Link {
    pub fn is_outbound(&self) -> bool {
        *self == Link::Outbound
    }

    pub fn is_inbound(&self) -> bool {
        *self == Link::Inbound
    }
}

/// One instruction emitted by a connection's state machine for the reactor
/// to carry out. The state machine never touches a socket directly; it only
/// produces a stream of these.
#[derive(Debug)]
pub enum Io<D> {
    /// Bytes are queued and ready to be sent to a peer.
    Write(SocketAddr, NetworkMessage),
    /// Dial this address.
    Connect(SocketAddr),
    /// Drop the connection to this peer, for the given reason.
    Disconnect(SocketAddr, D),
    /// Ask for a wakeup after the given delay.
    SetTimer(LocalDuration),
    /// An event for the owning application to observe.
    Event(crate::fsm::event::Event),
}

/// Why a connection was dropped.
#[derive(Debug, Clone)]
pub enum Disconnect<T> {
    /// The outbound dial itself failed; the connection was never live.
    DialError(Arc<io::Error>),
    /// An established connection failed at the transport layer.
    ConnectionError(Arc<io::Error>),
    /// The protocol state machine decided to drop the peer.
    StateMachine(T),
    /// The peer violated the DoS policy and is banned.
    PeerBanned,
}

impl<T> Disconnect<T> {
    pub fn is_dial_err(&self) -> bool {
        matches!(self, Self::DialError(_))
    }

    pub fn is_banned(&self) -> bool {
        matches!(self, Self::PeerBanned)
    }

    pub fn is_connection_err(&self) -> bool {
        matches!(self, Self::ConnectionError(_))
    }

    /// Transient failures (dial/IO errors) do not by themselves imply
    /// misbehavior and should not count against a persistent peer's ban
    /// score.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DialError(_) | Self::ConnectionError(_))
    }
}

impl<T: fmt::Display> fmt::Display for Disconnect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DialError(err) => write!(f, "dial error: {}", err),
            Self::ConnectionError(err) => write!(f, "connection error: {}", err),
            Self::StateMachine(reason) => write!(f, "{}", reason),
            Self::PeerBanned => write!(f, "peer was banned"),
        }
    }
}
