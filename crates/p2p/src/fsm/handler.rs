//! The top-level state machine: owns every sub-manager, implements
//! [`crate::net::reactor::StateMachine`], and holds the dispatch table that
//! routes each inbound command to the manager responsible for it.
use std::collections::HashSet;
use std::net;
use std::net::SocketAddr;
use std::sync::Arc;

use bitcoin::network::constants::ServiceFlags;
use gossip_wire::NetworkMessage;
use tracing::{debug, trace};

use crate::common::peer::Store;
use crate::common::time::Clock;
use crate::fsm::addrmgr::AddressManager;
use crate::fsm::event::Event;
use crate::fsm::invmgr::{BlockChain, InventoryManager, TransactionsToSend};
use crate::fsm::output::{Outbox, OutIo};
use crate::fsm::peermgr::{self, PeerManager};
use crate::net::time::LocalTime;
use crate::net::{Disconnect, Link};

/// A peer is identified by its socket address; there is no separate session
/// handle, since this protocol allows at most one connection per address.
pub type PeerId = SocketAddr;

/// Why a connection was dropped by the protocol itself (as opposed to a
/// transport-level error, which is [`crate::net::Disconnect::ConnectionError`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    PeerMisbehaving(&'static str),
    PeerProtocolVersion(u32),
    PeerServices(ServiceFlags),
    PeerMagic,
    PeerTimeout(&'static str),
    PeerDropped,
    SelfConnection,
    ConnectionLimit,
    DecodeError,
    Command,
    PeerBanned,
    Other(&'static str),
}

impl DisconnectReason {
    /// Timeouts and the connection-limit are expected churn, not abuse; they
    /// don't count against a persistent peer's reconnection backoff or imply
    /// a ban.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionLimit | Self::PeerTimeout(_))
    }

    pub fn is_bannable(&self) -> bool {
        matches!(
            self,
            Self::PeerMisbehaving(_)
                | Self::PeerProtocolVersion(_)
                | Self::PeerServices(_)
                | Self::PeerMagic
                | Self::SelfConnection
                | Self::DecodeError
                | Self::PeerBanned
        )
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerMisbehaving(msg) => write!(f, "peer misbehaving: {}", msg),
            Self::PeerProtocolVersion(v) => write!(f, "peer protocol version too old: {}", v),
            Self::PeerServices(s) => write!(f, "peer doesn't have required services: {:?}", s),
            Self::PeerMagic => write!(f, "peer magic mismatch"),
            Self::PeerTimeout(s) => write!(f, "peer timed out: {}", s),
            Self::PeerDropped => write!(f, "peer dropped"),
            Self::SelfConnection => write!(f, "self connection"),
            Self::ConnectionLimit => write!(f, "too many connections"),
            Self::DecodeError => write!(f, "message decode error"),
            Self::Command => write!(f, "peer requested disconnect"),
            Self::PeerBanned => write!(f, "peer was banned"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

impl From<DisconnectReason> for Disconnect<DisconnectReason> {
    fn from(reason: DisconnectReason) -> Self {
        if reason.is_bannable() {
            Disconnect::PeerBanned
        } else {
            Disconnect::StateMachine(reason)
        }
    }
}

/// Addresses and user agents exempt from the usual service/version checks,
/// e.g. for a trusted local monitoring peer.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    pub addr: HashSet<net::IpAddr>,
    pub user_agent: HashSet<String>,
}

impl Whitelist {
    pub fn contains(&self, ip: &net::IpAddr, user_agent: &str) -> bool {
        self.addr.contains(ip) || self.user_agent.contains(user_agent)
    }
}

/// A thin, cloneable handle to a connection's address, ref-counted so a
/// manager can hold onto a peer's identity past disconnection without
/// keeping its buffers alive.
#[derive(Debug, Clone)]
pub struct Socket {
    pub addr: SocketAddr,
    refs: Arc<()>,
}

impl Socket {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, refs: Arc::new(()) }
    }
}

impl PartialEq for Socket {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Socket {}

/// Top-level protocol configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub magic: gossip_wire::Magic,
    pub protocol_version: u32,
    pub services: ServiceFlags,
    pub required_services: ServiceFlags,
    pub user_agent: &'static str,
    pub whitelist: Whitelist,
    pub persistent: Vec<net::SocketAddr>,
    pub target_outbound_peers: usize,
    pub max_inbound_peers: usize,
    pub default_tcp_port: u16,
    pub server: bool,
}

impl Config {
    fn peermgr(&self) -> peermgr::Config {
        peermgr::Config {
            protocol_version: self.protocol_version,
            whitelist: self.whitelist.clone(),
            services: self.services,
            persistent: self.persistent.clone(),
            required_services: self.required_services,
            target_outbound_peers: self.target_outbound_peers,
            max_inbound_peers: self.max_inbound_peers,
            retry_min_wait: peermgr::IDLE_TIMEOUT,
            retry_max_wait: crate::net::time::LocalDuration::from_mins(60),
            user_agent: self.user_agent,
            default_tcp_port: self.default_tcp_port,
            server: self.server,
        }
    }
}

/// Commands accepted from outside the reactor thread (via `client::Handle`).
#[derive(Debug)]
pub enum Command {
    GetPeers,
    Connect(net::SocketAddr),
    Disconnect(net::SocketAddr),
    ImportAddresses(Vec<net::SocketAddr>),
    SendInv { hash: bitcoin::hashes::sha256d::Hash, is_block: bool },
    BanPeer(net::SocketAddr),
}

/// Everything the engine needs, wired together. Generic over the address
/// store and clock so tests can swap in an in-memory `HashMap` and a fake
/// clock; the node binary fixes these to the real implementations.
pub struct StateMachine<P, C> {
    #[allow(dead_code)]
    config: Config,
    addrmgr: AddressManager<P, C>,
    peermgr: PeerManager<C>,
    invmgr: InventoryManager<C>,
    clock: C,
    outbox: Outbox,
}

impl<P, C> Iterator for StateMachine<P, C> {
    type Item = OutIo;

    fn next(&mut self) -> Option<Self::Item> {
        self.addrmgr
            .next()
            .or_else(|| self.peermgr.next())
            .or_else(|| self.invmgr.next())
            .or_else(|| self.outbox.next())
    }
}

impl<P: Store, C: Clock> StateMachine<P, C> {
    pub fn new(
        config: Config,
        peers: P,
        clock: C,
        rng: fastrand::Rng,
        chain: Box<dyn BlockChain>,
        mempool: Box<dyn TransactionsToSend>,
    ) -> Self {
        let peermgr_config = config.peermgr();
        Self {
            addrmgr: AddressManager::new(rng.clone(), peers, clock.clone()),
            peermgr: PeerManager::new(peermgr_config, rng, clock.clone()),
            invmgr: InventoryManager::new(clock.clone(), chain, mempool),
            config,
            clock,
            outbox: Outbox::new(),
        }
    }

    pub fn command(&mut self, cmd: Command) {
        match cmd {
            Command::GetPeers => {
                for peer in self.peermgr.peers().collect::<Vec<_>>() {
                    self.outbox.event(Event::Peer(crate::fsm::event::PeerEvent::Connected(peer.addr)));
                }
            }
            Command::Connect(addr) => {
                self.peermgr.connect(&addr);
            }
            Command::Disconnect(addr) => {
                self.peermgr.disconnect(addr, DisconnectReason::Command);
            }
            Command::ImportAddresses(addrs) => {
                let n = addrs.len();
                let entries = addrs
                    .into_iter()
                    .map(|a| (LocalTime::now().as_secs() as u32, gossip_wire::Address::new(&a, ServiceFlags::NONE)));
                self.addrmgr.insert(entries, crate::common::peer::Source::Imported);
                self.outbox.event(Event::Address(crate::fsm::event::AddressEvent::Imported(n)));
            }
            Command::SendInv { hash, is_block } => {
                self.invmgr.announce(hash, is_block, &self.peermgr.peers().map(|p| p.addr).collect::<Vec<_>>(), None);
            }
            Command::BanPeer(addr) => {
                self.peermgr.disconnect(addr, DisconnectReason::PeerBanned);
            }
        }
    }

}

impl<P: Store, C: Clock> crate::net::reactor::StateMachine for StateMachine<P, C> {
    type DisconnectReason = DisconnectReason;

    fn initialize(&mut self, _time: LocalTime) {
        self.addrmgr.initialize();
        self.peermgr.initialize(&mut self.addrmgr);
    }

    /// §4.4 dispatch table.
    fn message_received(&mut self, addr: &SocketAddr, message: NetworkMessage) {
        if self.addrmgr.is_banned(addr) {
            self.peermgr.disconnect(*addr, DisconnectReason::PeerBanned);
            return;
        }
        self.peermgr.touch(addr);

        match message {
            NetworkMessage::Version(version) => {
                self.peermgr.received_version(addr, version, &mut self.addrmgr);
            }
            NetworkMessage::Verack => {
                if let Some((info, conn)) = self.peermgr.received_verack(addr) {
                    self.addrmgr.peer_negotiated(addr, info.services);
                    self.invmgr.peer_negotiated(*addr, info.services, info.relay);
                    debug!(target: "p2p", "{}: handshake complete ({:?})", addr, conn.link);
                }
            }
            NetworkMessage::Inv(inventory) => {
                self.invmgr.received_inv(*addr, inventory);
            }
            NetworkMessage::GetData(inventory) => {
                self.invmgr.received_getdata(*addr, inventory);
            }
            NetworkMessage::GetBlocks(msg) => {
                self.invmgr.received_getblocks(*addr, msg);
            }
            NetworkMessage::Addr(addrs) => {
                self.addrmgr.received_addr(*addr, addrs);
            }
            NetworkMessage::GetAddr => {
                self.peermgr.send_addr(*addr);
            }
            NetworkMessage::Ping(nonce) => {
                self.outbox.pong(*addr, nonce);
            }
            NetworkMessage::Pong(_) => {}
            NetworkMessage::Block(raw) => {
                self.invmgr.received_block(*addr, raw);
            }
            NetworkMessage::Tx(_) => {
                // Unexpected in this core: no transaction relay, so an
                // unsolicited `tx` is treated as a protocol violation.
                self.peermgr.disconnect(*addr, DisconnectReason::PeerMisbehaving("unsolicited tx"));
            }
            NetworkMessage::Alert(_) => {
                trace!(target: "p2p", "{}: ignoring alert", addr);
            }
            NetworkMessage::Unknown { command, .. } => {
                trace!(target: "p2p", "{}: ignoring unknown command {:?}", addr, command);
            }
        }
    }

    fn attempted(&mut self, addr: &SocketAddr) {
        self.addrmgr.peer_attempted(addr);
        self.peermgr.peer_attempted(addr);
    }

    fn connected(&mut self, addr: SocketAddr, local_addr: &SocketAddr, link: Link) {
        self.addrmgr.peer_connected(&addr);
        self.peermgr.peer_connected(addr, *local_addr, link);
    }

    fn disconnected(&mut self, addr: &SocketAddr, reason: Disconnect<DisconnectReason>) {
        self.addrmgr.peer_disconnected(addr, reason.clone());
        self.peermgr.peer_disconnected(addr, &mut self.addrmgr, reason);
        self.invmgr.peer_disconnected(addr);
    }

    fn tick(&mut self, _local_time: LocalTime) {}

    /// §4.9 Tick procedure, driven by the periodic idle timer rather than
    /// every reactor loop iteration.
    fn timer_expired(&mut self) {
        self.peermgr.received_wake(&mut self.addrmgr);

        let now = self.clock.local_time();
        let negotiated: Vec<_> = self.peermgr.peers().map(|p| p.addr).collect();

        for addr in &negotiated {
            if self.peermgr.due_get_addr(addr, now) {
                self.peermgr.sent_get_addr(addr);
            }
        }
        if self.peermgr.due_send_addr(now) {
            for addr in &negotiated {
                self.peermgr.send_addr(*addr);
            }
        }
        self.invmgr.received_tick(now, &negotiated);
    }
}

impl<P, C> std::fmt::Debug for StateMachine<P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    use bitcoin::hashes::Hash as _;
    use bitcoin::BlockHash;
    use gossip_wire::{Address, VersionMessage};

    use crate::common::peer::KnownAddress;
    use crate::fsm::event::{AddressEvent, PeerEvent};
    use crate::fsm::invmgr::{BlockChain, TransactionsToSend};
    use crate::net::reactor::StateMachine as Reactor;

    #[derive(Clone)]
    struct TestClock(LocalTime);
    impl Clock for TestClock {
        fn local_time(&self) -> LocalTime {
            self.0
        }
    }

    struct NullChain;
    impl BlockChain for NullChain {
        fn tip(&self) -> BlockHash {
            BlockHash::all_zeros()
        }
        fn contains(&self, _hash: &BlockHash) -> bool {
            false
        }
        fn get_block(&self, _hash: &BlockHash) -> Option<Vec<u8>> {
            None
        }
        fn descendants(&self, _from: &BlockHash, _stop: &BlockHash, _remaining: usize) -> Vec<BlockHash> {
            Vec::new()
        }
        fn locator_at_depth(&self, _depth: u32) -> BlockHash {
            BlockHash::all_zeros()
        }
        fn minutes_since_last_block(&self) -> Option<u32> {
            None
        }
        fn block_data_needed(&self) -> Option<BlockHash> {
            None
        }
    }

    struct NullMempool;
    impl TransactionsToSend for NullMempool {
        fn get(&self, _hash: &bitcoin::hashes::sha256d::Hash) -> Option<Vec<u8>> {
            None
        }
    }

    fn machine() -> StateMachine<StdHashMap<SocketAddr, KnownAddress>, TestClock> {
        let config = Config {
            magic: gossip_wire::Magic::from_bytes([0xf9, 0xbe, 0xb4, 0xd9]),
            protocol_version: 70016,
            services: ServiceFlags::NETWORK,
            required_services: ServiceFlags::NONE,
            user_agent: "/test:0.1.0/",
            whitelist: Whitelist::default(),
            persistent: Vec::new(),
            target_outbound_peers: 8,
            max_inbound_peers: 8,
            default_tcp_port: 8333,
            server: false,
        };
        let mut m = StateMachine::new(
            config,
            StdHashMap::new(),
            TestClock(LocalTime::from_secs(1_600_000_000)),
            fastrand::Rng::with_seed(1),
            Box::new(NullChain),
            Box::new(NullMempool),
        );
        Reactor::initialize(&mut m, LocalTime::from_secs(1_600_000_000));
        m
    }

    fn drain<P: Store, C: Clock>(m: &mut StateMachine<P, C>) -> Vec<OutIo> {
        std::iter::from_fn(|| m.next()).collect()
    }

    #[test]
    fn unsolicited_tx_disconnects_peer() {
        let mut m = machine();
        let addr: SocketAddr = "18.1.2.3:8333".parse().unwrap();

        Reactor::connected(&mut m, addr, &"0.0.0.0:8333".parse().unwrap(), Link::Inbound);
        drain(&mut m);

        Reactor::message_received(&mut m, &addr, NetworkMessage::Tx(vec![0u8; 4]));
        let out = drain(&mut m);
        assert!(out.iter().any(|io| matches!(
            io,
            crate::net::Io::Disconnect(a, crate::net::Disconnect::StateMachine(DisconnectReason::PeerMisbehaving("unsolicited tx"))) if *a == addr
        )));
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let mut m = machine();
        let addr: SocketAddr = "18.1.2.3:8333".parse().unwrap();

        Reactor::connected(&mut m, addr, &"0.0.0.0:8333".parse().unwrap(), Link::Inbound);
        drain(&mut m);

        Reactor::message_received(&mut m, &addr, NetworkMessage::Ping(7));
        let out = drain(&mut m);
        assert!(out.iter().any(|io| matches!(
            io,
            crate::net::Io::Write(a, NetworkMessage::Pong(7)) if *a == addr
        )));
    }

    #[test]
    fn import_addresses_command_emits_imported_event() {
        let mut m = machine();
        let addr: SocketAddr = "18.1.2.3:8333".parse().unwrap();

        m.command(Command::ImportAddresses(vec![addr]));
        let out = drain(&mut m);
        assert!(out.iter().any(|io| matches!(
            io,
            crate::net::Io::Event(Event::Address(AddressEvent::Imported(1)))
        )));
    }

    #[test]
    fn get_peers_command_reports_negotiated_peers() {
        let mut m = machine();
        let addr: SocketAddr = "18.1.2.3:8333".parse().unwrap();
        let local: SocketAddr = "0.0.0.0:8333".parse().unwrap();

        Reactor::connected(&mut m, addr, &local, Link::Inbound);
        drain(&mut m);
        Reactor::message_received(
            &mut m,
            &addr,
            NetworkMessage::Version(VersionMessage {
                version: 70016,
                services: ServiceFlags::NETWORK,
                timestamp: 1_600_000_000,
                receiver: Address::new(&local, ServiceFlags::NONE),
                sender: Address::new(&addr, ServiceFlags::NETWORK),
                nonce: 99,
                user_agent: "/peer:0.1.0/".to_owned(),
                start_height: 0,
                relay: false,
            }),
        );
        drain(&mut m);
        Reactor::message_received(&mut m, &addr, NetworkMessage::Verack);
        drain(&mut m);

        m.command(Command::GetPeers);
        let out = drain(&mut m);
        assert!(out.iter().any(|io| matches!(
            io,
            crate::net::Io::Event(Event::Peer(PeerEvent::Connected(a))) if *a == addr
        )));
    }
}

