//! Connection admission, the handshake state machine, and the `addr`/`getaddr`
//! responder (which works off the live registry rather than the learned
//! address book — see `send_addr`).
use std::collections::{HashMap, HashSet};
use std::net;
use std::net::SocketAddr;

use bitcoin::network::constants::ServiceFlags;
use gossip_wire::{Address, VersionMessage};

use crate::common::peer::AddressSource;
use crate::common::time::Clock;
use crate::fsm::addrmgr::is_local;
use crate::fsm::event::{Event, PeerEvent};
use crate::fsm::handler::{DisconnectReason, PeerId, Socket, Whitelist};
use crate::fsm::output::Outbox;
use crate::net::{Disconnect as NetDisconnect, Link, LocalDuration, LocalTime};

/// Time to wait for a `verack` before disconnecting.
pub const HANDSHAKE_TIMEOUT: LocalDuration = LocalDuration::from_secs(12);
/// Time to wait for a dial to complete.
pub const CONNECTION_TIMEOUT: LocalDuration = LocalDuration::from_secs(6);
/// Time between maintenance passes.
pub const IDLE_TIMEOUT: LocalDuration = LocalDuration::from_mins(1);
/// How long a READY peer can go without sending us anything before we
/// consider it stale and disconnect it.
pub const NO_DATA_TIMEOUT: LocalDuration = LocalDuration::from_mins(2);
/// Target number of concurrent outbound peer connections.
pub const TARGET_OUTBOUND_PEERS: usize = 8;
/// Maximum number of inbound peer connections.
pub const MAX_INBOUND_PEERS: usize = 8;
/// `AskAddrsEvery`: how often we ask an outbound peer for more addresses.
pub const ASK_ADDRS_EVERY: LocalDuration = LocalDuration::from_mins(5);
/// `SendAddrsEvery`: how often a `server` node re-announces itself unprompted.
pub const SEND_ADDRS_EVERY: LocalDuration = LocalDuration::from_mins(15);

type TimeOffset = i64;

/// Peer manager configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub protocol_version: u32,
    pub whitelist: Whitelist,
    pub services: ServiceFlags,
    pub persistent: Vec<net::SocketAddr>,
    pub required_services: ServiceFlags,
    pub target_outbound_peers: usize,
    pub max_inbound_peers: usize,
    pub retry_max_wait: LocalDuration,
    pub retry_min_wait: LocalDuration,
    pub user_agent: &'static str,
    /// `DefaultTcpPort`, substituted into learned external addresses.
    pub default_tcp_port: u16,
    /// Whether we actively announce our own address (`server` flag).
    pub server: bool,
}

/// Handshake progress of a peer that has at least sent us a `version`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum HandshakeState {
    /// We've processed the peer's `version` and replied; waiting on `verack`.
    VersionRcvd { since: LocalTime },
    /// `verack` received. READY.
    Ready { since: LocalTime },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub socket: Socket,
    pub local_addr: net::SocketAddr,
    pub link: Link,
    pub since: LocalTime,
}

#[derive(Debug, Clone)]
enum Peer {
    Connecting { time: LocalTime },
    /// Connected but haven't received their `version` yet.
    Connected { conn: Connection },
    Negotiating { conn: Connection, info: PeerInfo },
}

#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub services: ServiceFlags,
    pub user_agent: String,
    pub time_offset: TimeOffset,
    pub relay: bool,
    pub version: u32,
    pub persistent: bool,
    nonce: u64,
    state: HandshakeState,
    next_get_addr: Option<LocalTime>,
    /// Last time we received any message from this peer, including the
    /// handshake itself. Used by [`PeerManager::received_wake`] to evict
    /// peers that have gone quiet after negotiating.
    last_active: LocalTime,
}

impl PeerInfo {
    pub fn is_negotiated(&self) -> bool {
        matches!(self.state, HandshakeState::Ready { .. })
    }
}

#[derive(Debug, Clone)]
pub struct FullPeer {
    pub addr: net::SocketAddr,
    pub local_addr: net::SocketAddr,
    pub link: Link,
    pub since: LocalTime,
    pub services: ServiceFlags,
    pub user_agent: String,
    pub relay: bool,
}

/// Manages peer connections, the handshake, and outbound target maintenance.
#[derive(Debug)]
pub struct PeerManager<C> {
    pub config: Config,
    last_idle: Option<LocalTime>,
    peers_storage: HashMap<SocketAddr, Peer>,
    disconnected: HashMap<net::SocketAddr, (Option<LocalTime>, usize)>,
    /// Learned from the first peer's `version::receiver`, first-writer-wins,
    /// port overridden to `default_tcp_port` (§3 `my_external_addr`).
    my_external_addr: Option<net::SocketAddr>,
    next_addr_sent: Option<LocalTime>,
    /// Nonces we put in our own `version` messages, so we can recognize and
    /// drop a loop-back connection to ourselves.
    sent_nonces: HashSet<u64>,
    outbox: Outbox,
    rng: fastrand::Rng,
    clock: C,
}

impl<C: Clock> Iterator for PeerManager<C> {
    type Item = crate::fsm::output::OutIo;

    fn next(&mut self) -> Option<Self::Item> {
        self.outbox.next()
    }
}

impl<C: Clock> PeerManager<C> {
    pub fn new(config: Config, rng: fastrand::Rng, clock: C) -> Self {
        Self {
            config,
            last_idle: None,
            peers_storage: HashMap::new(),
            disconnected: HashMap::new(),
            my_external_addr: None,
            next_addr_sent: None,
            sent_nonces: HashSet::new(),
            outbox: Outbox::new(),
            rng,
            clock,
        }
    }

    pub fn initialize<A: AddressSource>(&mut self, addrs: &mut A) {
        let persistent = self.config.persistent.clone();
        for addr in persistent {
            self.connect(&addr);
        }
        if self.config.server {
            self.next_addr_sent = Some(self.clock.local_time());
        }
        self.outbox.set_timer(IDLE_TIMEOUT);
        self.maintain_connections(addrs);
    }

    pub fn my_external_addr(&self) -> Option<net::SocketAddr> {
        self.my_external_addr
    }

    pub fn whitelist(&mut self, addr: net::SocketAddr) -> bool {
        self.config.whitelist.addr.insert(addr.ip())
    }

    pub fn is_inbound(&self, addr: &PeerId) -> bool {
        self.peers_storage
            .get(addr)
            .map(|p| matches!(p, Peer::Connected { conn } if conn.link.is_inbound())
                || matches!(p, Peer::Negotiating { conn, .. } if conn.link.is_inbound()))
            .unwrap_or(false)
    }

    pub fn is_connecting(&self, addr: &PeerId) -> bool {
        matches!(self.peers_storage.get(addr), Some(Peer::Connecting { .. }))
    }

    pub fn is_connected(&self, addr: &PeerId) -> bool {
        matches!(self.peers_storage.get(addr), Some(Peer::Connected { .. } | Peer::Negotiating { .. }))
    }

    pub fn is_disconnected(&self, addr: &PeerId) -> bool {
        !self.is_connected(addr) && !self.is_connecting(addr)
    }

    /// Fully negotiated (READY) peers.
    pub fn peers(&self) -> impl Iterator<Item = FullPeer> + '_ {
        self.peers_storage.values().filter_map(|p| match p {
            Peer::Negotiating { conn, info } if info.is_negotiated() => Some(FullPeer {
                addr: conn.socket.addr,
                local_addr: conn.local_addr,
                link: conn.link,
                since: conn.since,
                services: info.services,
                user_agent: info.user_agent.clone(),
                relay: info.relay,
            }),
            _ => None,
        })
    }

    pub fn connecting(&self) -> impl Iterator<Item = &PeerId> {
        self.peers_storage.iter().filter(|(_, p)| matches!(p, Peer::Connecting { .. })).map(|(a, _)| a)
    }

    fn negotiated_count(&self, link: Link) -> usize {
        self.peers().filter(|p| p.link == link).count()
    }

    pub fn connect(&mut self, addr: &PeerId) {
        if self.is_connected(addr) || self.is_connecting(addr) {
            return;
        }
        let time = self.clock.local_time();
        self.peers_storage.insert(*addr, Peer::Connecting { time });
        self.outbox.connect(*addr);
    }

    pub fn disconnect(&mut self, addr: PeerId, reason: DisconnectReason) {
        if self.is_connected(&addr) {
            self.outbox.disconnect(addr, reason);
        }
    }

    pub fn peer_attempted(&mut self, _addr: &net::SocketAddr) {}

    /// Called on TCP connect/accept, before any protocol bytes are exchanged.
    pub fn peer_connected(&mut self, addr: SocketAddr, local_addr: SocketAddr, link: Link) {
        let since = self.clock.local_time();

        self.peers_storage.insert(
            addr,
            Peer::Connected { conn: Connection { socket: Socket::new(addr), local_addr, link, since } },
        );
        self.disconnected.remove(&addr);

        if link.is_inbound() && self.negotiated_count(Link::Inbound) >= self.config.max_inbound_peers {
            self.outbox.disconnect(addr, DisconnectReason::ConnectionLimit);
            return;
        }
        if link.is_outbound() {
            let nonce = self.rng.u64(..);
            self.sent_nonces.insert(nonce);
            self.outbox.version(addr, self.version(addr, local_addr, nonce));
        }
        self.outbox.set_timer(HANDSHAKE_TIMEOUT);
        self.outbox.event(Event::Peer(PeerEvent::Connected(addr)));
    }

    /// §4.3: parse `version`, record node info, reply `verack`; if inbound
    /// and we haven't sent ours yet, also send `version` now.
    pub fn received_version<A: AddressSource>(&mut self, addr: &PeerId, msg: VersionMessage, addrs: &mut A) {
        let now = self.clock.local_time();
        let trusted = self.config.whitelist.contains(&addr.ip(), &msg.user_agent) || is_local(&addr.ip());

        let Some(Peer::Connected { conn }) = self.peers_storage.get(addr).cloned() else {
            return;
        };

        if self.sent_nonces.remove(&msg.nonce) {
            self.outbox.disconnect(*addr, DisconnectReason::SelfConnection);
            return;
        }
        if msg.version < self.config.protocol_version {
            self.outbox.disconnect(*addr, DisconnectReason::PeerProtocolVersion(msg.version));
            return;
        }
        if conn.link.is_outbound() && !msg.services.has(self.config.required_services) && !trusted {
            self.outbox.disconnect(*addr, DisconnectReason::PeerServices(msg.services));
            return;
        }
        if conn.link.is_outbound() && self.negotiated_count(Link::Outbound) >= self.config.target_outbound_peers
        {
            self.outbox.disconnect(*addr, DisconnectReason::ConnectionLimit);
            return;
        }

        // §3 `my_external_addr`: first-writer-wins, port overridden.
        if self.my_external_addr.is_none() {
            if let Ok(recv) = msg.receiver.socket_addr() {
                self.my_external_addr = Some(SocketAddr::new(recv.ip(), self.config.default_tcp_port));
            }
        }
        if let Ok(recv) = msg.receiver.socket_addr() {
            addrs.record_local_address(recv);
        }

        self.outbox.event(Event::Peer(PeerEvent::Connecting(*addr)));

        if conn.link.is_inbound() {
            let nonce = self.rng.u64(..);
            self.sent_nonces.insert(nonce);
            self.outbox.version(*addr, self.version(*addr, conn.local_addr, nonce));
        }
        self.outbox.verack(*addr);
        self.outbox.set_timer(HANDSHAKE_TIMEOUT);

        let persistent = self.config.persistent.contains(&conn.socket.addr);
        self.peers_storage.insert(
            *addr,
            Peer::Negotiating {
                conn,
                info: PeerInfo {
                    services: msg.services,
                    user_agent: msg.user_agent,
                    time_offset: msg.timestamp,
                    relay: msg.relay,
                    version: u32::min(self.config.protocol_version, msg.version),
                    persistent,
                    nonce: msg.nonce,
                    state: HandshakeState::VersionRcvd { since: now },
                    next_get_addr: None,
                    last_active: now,
                },
            },
        );
    }

    /// §4.3: `verack` → READY.
    pub fn received_verack(&mut self, addr: &PeerId) -> Option<(PeerInfo, Connection)> {
        if let Some(Peer::Negotiating { conn, info }) = self.peers_storage.get_mut(addr) {
            if let HandshakeState::VersionRcvd { .. } = info.state {
                let now = self.clock.local_time();
                info.state = HandshakeState::Ready { since: now };
                info.next_get_addr = Some(now + LocalDuration::from_secs(10));

                self.outbox.event(Event::Peer(PeerEvent::HandshakeComplete(*addr)));
                return Some((info.clone(), conn.clone()));
            }
        }
        None
    }

    /// §4.8 `SendAddr`: iterate the *live registry*, not the learned address
    /// book — every currently connected peer's address, plus our own
    /// external address if we're a server.
    pub fn send_addr(&mut self, to: SocketAddr) {
        let mut entries: Vec<(u32, Address)> = self
            .peers()
            .filter(|p| p.addr != to)
            .map(|p| (LocalTime::now().as_secs() as u32, Address::new(&p.addr, p.services)))
            .collect();

        if self.config.server {
            if let Some(ext) = self.my_external_addr {
                entries.push((LocalTime::now().as_secs() as u32, Address::new(&ext, self.config.services)));
            }
        }
        self.outbox.addr(to, entries);

        if self.config.server {
            self.next_addr_sent = Some(self.clock.local_time() + SEND_ADDRS_EVERY);
        }
    }

    /// Records that we just received a message from `addr`, resetting its
    /// no-data timeout. No-op for peers that haven't reached `Negotiating`.
    pub fn touch(&mut self, addr: &PeerId) {
        if let Some(Peer::Negotiating { info, .. }) = self.peers_storage.get_mut(addr) {
            info.last_active = self.clock.local_time();
        }
    }

    pub fn due_get_addr(&self, addr: &PeerId, now: LocalTime) -> bool {
        matches!(
            self.peers_storage.get(addr),
            Some(Peer::Negotiating { info, .. }) if info.is_negotiated() && info.next_get_addr.map_or(false, |t| now >= t)
        )
    }

    pub fn sent_get_addr(&mut self, addr: &PeerId) {
        let now = self.clock.local_time();
        if let Some(Peer::Negotiating { info, .. }) = self.peers_storage.get_mut(addr) {
            info.next_get_addr = Some(now + ASK_ADDRS_EVERY);
        }
        self.outbox.get_addr(*addr);
    }

    pub fn due_send_addr(&self, now: LocalTime) -> bool {
        self.config.server && self.next_addr_sent.map_or(false, |t| now >= t)
    }

    pub fn peer_disconnected<A: AddressSource>(&mut self, addr: &SocketAddr, addrs: &mut A, reason: NetDisconnect<DisconnectReason>) {
        let local_time = self.clock.local_time();

        if self.is_connected(addr) {
            self.outbox.event(Event::Peer(PeerEvent::Disconnected(*addr, reason.to_string())));
        }
        self.peers_storage.remove(addr);

        if self.config.persistent.contains(addr) {
            let (retry_at, attempts) = self.disconnected.entry(*addr).or_default();
            let delay = LocalDuration::from_secs(2u64.saturating_pow(*attempts as u32))
                .clamp(self.config.retry_min_wait, self.config.retry_max_wait);
            *retry_at = Some(local_time + delay);
            *attempts += 1;
            self.outbox.set_timer(delay);
        } else {
            self.maintain_connections(addrs);
        }
    }

    pub fn received_wake<A: AddressSource>(&mut self, addrs: &mut A) {
        let local_time = self.clock.local_time();
        let mut timed_out = Vec::new();

        for (addr, p) in self.peers_storage.iter() {
            match p {
                Peer::Connecting { time } if local_time - *time >= CONNECTION_TIMEOUT => {
                    timed_out.push(*addr);
                }
                Peer::Connected { conn } if local_time - conn.since >= HANDSHAKE_TIMEOUT => {
                    timed_out.push(*addr);
                }
                Peer::Negotiating { info: PeerInfo { state: HandshakeState::VersionRcvd { since }, .. }, .. }
                    if local_time - *since >= HANDSHAKE_TIMEOUT =>
                {
                    timed_out.push((*addr, "handshake"));
                }
                Peer::Negotiating { info, .. }
                    if info.is_negotiated() && local_time - info.last_active >= NO_DATA_TIMEOUT =>
                {
                    timed_out.push((*addr, "no data"));
                }
                _ => {}
            }
        }
        for (addr, reason) in timed_out {
            self.outbox.disconnect(addr, DisconnectReason::PeerTimeout(reason));
        }

        let mut reconnect = Vec::new();
        for (addr, (retry_at, _)) in &mut self.disconnected {
            if let Some(t) = retry_at {
                if *t <= local_time {
                    *retry_at = None;
                    reconnect.push(*addr);
                }
            }
        }
        for addr in reconnect {
            self.connect(&addr);
        }

        if local_time - self.last_idle.unwrap_or_default() >= IDLE_TIMEOUT {
            self.maintain_connections(addrs);
            self.outbox.set_timer(IDLE_TIMEOUT);
            self.last_idle = Some(local_time);
        }
    }

    fn version(&self, addr: net::SocketAddr, local_addr: net::SocketAddr, nonce: u64) -> VersionMessage {
        VersionMessage {
            version: self.config.protocol_version,
            services: self.config.services,
            timestamp: LocalTime::now().as_secs() as i64,
            receiver: Address::new(&addr, ServiceFlags::NONE),
            sender: Address::new(&local_addr, self.config.services),
            nonce,
            user_agent: self.config.user_agent.to_owned(),
            start_height: 0,
            relay: false,
        }
    }

    /// How many additional outbound connections to open right now.
    fn delta(&self) -> usize {
        let negotiated = self.negotiated_count(Link::Outbound);
        let connecting = self.connecting().count();
        let connected = self.peers_storage.values().filter(|p| matches!(p, Peer::Connected { conn } if conn.link.is_outbound())).count();
        let target = self.config.target_outbound_peers;
        let total = negotiated + connecting + connected;

        if total >= target {
            return 0;
        }
        target - total
    }

    fn maintain_connections<A: AddressSource>(&mut self, addrs: &mut A) {
        let delta = self.delta();
        let mut connecting = std::collections::HashSet::new();

        while connecting.len() < delta {
            let Some((addr, source)) = addrs
                .sample(self.config.required_services)
                .or_else(|| addrs.sample(ServiceFlags::NONE))
            else {
                break;
            };
            let Ok(sockaddr) = addr.socket_addr() else { continue };
            if self.is_connected(&sockaddr) || self.is_connecting(&sockaddr) || connecting.contains(&sockaddr) {
                continue;
            }
            self.connect(&sockaddr);
            connecting.insert(sockaddr);
            self.outbox.event(Event::Peer(PeerEvent::Connecting(sockaddr)));
            let _ = source;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    use crate::common::peer::KnownAddress;
    use crate::fsm::addrmgr::AddressManager;
    use crate::net::time::LocalTime;
    use crate::net::Io;

    #[derive(Clone)]
    struct TestClock(std::cell::Cell<LocalTime>);
    impl Clock for TestClock {
        fn local_time(&self) -> LocalTime {
            self.0.get()
        }
    }

    fn config() -> Config {
        Config {
            protocol_version: 70016,
            whitelist: Whitelist::default(),
            services: ServiceFlags::NETWORK,
            persistent: Vec::new(),
            required_services: ServiceFlags::NONE,
            target_outbound_peers: TARGET_OUTBOUND_PEERS,
            max_inbound_peers: 1,
            retry_max_wait: LocalDuration::from_mins(60),
            retry_min_wait: IDLE_TIMEOUT,
            user_agent: "/test:0.1.0/",
            default_tcp_port: 8333,
            server: false,
        }
    }

    fn addrs(clock: TestClock) -> AddressManager<StdHashMap<SocketAddr, KnownAddress>, TestClock> {
        let mut mgr = AddressManager::new(fastrand::Rng::with_seed(1), StdHashMap::new(), clock);
        mgr.initialize();
        mgr
    }

    fn version_msg(nonce: u64, addr: SocketAddr) -> VersionMessage {
        VersionMessage {
            version: 70016,
            services: ServiceFlags::NETWORK,
            timestamp: 1_600_000_000,
            receiver: Address::new(&addr, ServiceFlags::NONE),
            sender: Address::new(&addr, ServiceFlags::NETWORK),
            nonce,
            user_agent: "/peer:0.1.0/".to_owned(),
            start_height: 0,
            relay: false,
        }
    }

    fn drain<C: Clock>(mgr: &mut PeerManager<C>) -> Vec<crate::fsm::output::OutIo> {
        std::iter::from_fn(|| mgr.next()).collect()
    }

    #[test]
    fn inbound_connection_over_limit_is_disconnected() {
        let clock = TestClock(std::cell::Cell::new(LocalTime::from_secs(1_600_000_000)));
        let mut mgr = PeerManager::new(config(), fastrand::Rng::with_seed(1), clock.clone());
        let a: SocketAddr = "18.1.2.3:8333".parse().unwrap();
        let b: SocketAddr = "18.1.2.4:8333".parse().unwrap();
        let local: SocketAddr = "0.0.0.0:8333".parse().unwrap();
        let mut store = addrs(clock);

        // First inbound peer negotiates fully, filling the one-peer limit.
        mgr.peer_connected(a, local, Link::Inbound);
        drain(&mut mgr);
        mgr.received_version(&a, version_msg(1, local), &mut store);
        drain(&mut mgr);
        mgr.received_verack(&a);
        drain(&mut mgr);

        // A second inbound connection is rejected outright at admission time.
        mgr.peer_connected(b, local, Link::Inbound);
        let out = drain(&mut mgr);
        assert!(out.iter().any(|io| matches!(
            io,
            Io::Disconnect(addr, NetDisconnect::StateMachine(DisconnectReason::ConnectionLimit)) if *addr == b
        )));
    }

    #[test]
    fn handshake_completes_on_verack() {
        let clock = TestClock(std::cell::Cell::new(LocalTime::from_secs(1_600_000_000)));
        let mut mgr = PeerManager::new(config(), fastrand::Rng::with_seed(1), clock.clone());
        let peer: SocketAddr = "18.1.2.3:8333".parse().unwrap();
        let local: SocketAddr = "0.0.0.0:8333".parse().unwrap();
        let mut store = addrs(clock);

        mgr.peer_connected(peer, local, Link::Inbound);
        drain(&mut mgr);

        mgr.received_version(&peer, version_msg(42, local), &mut store);
        drain(&mut mgr);
        assert!(!mgr.peers().any(|p| p.addr == peer));

        let negotiated = mgr.received_verack(&peer);
        assert!(negotiated.is_some());
        assert!(mgr.peers().any(|p| p.addr == peer));
    }

    #[test]
    fn handshake_timeout_disconnects_stalled_peer() {
        let clock = TestClock(std::cell::Cell::new(LocalTime::from_secs(1_600_000_000)));
        let mut mgr = PeerManager::new(config(), fastrand::Rng::with_seed(1), clock.clone());
        let peer: SocketAddr = "18.1.2.3:8333".parse().unwrap();
        let local: SocketAddr = "0.0.0.0:8333".parse().unwrap();
        let mut store = addrs(clock.clone());

        mgr.peer_connected(peer, local, Link::Inbound);
        drain(&mut mgr);

        clock.0.set(clock.0.get() + HANDSHAKE_TIMEOUT + LocalDuration::from_secs(1));
        mgr.received_wake(&mut store);
        let out = drain(&mut mgr);
        assert!(out.iter().any(|io| matches!(
            io,
            Io::Disconnect(addr, NetDisconnect::StateMachine(DisconnectReason::PeerTimeout("handshake"))) if *addr == peer
        )));
    }

    #[test]
    fn quiet_negotiated_peer_is_disconnected_on_no_data_timeout() {
        let clock = TestClock(std::cell::Cell::new(LocalTime::from_secs(1_600_000_000)));
        let mut mgr = PeerManager::new(config(), fastrand::Rng::with_seed(1), clock.clone());
        let peer: SocketAddr = "18.1.2.3:8333".parse().unwrap();
        let local: SocketAddr = "0.0.0.0:8333".parse().unwrap();
        let mut store = addrs(clock.clone());

        mgr.peer_connected(peer, local, Link::Inbound);
        drain(&mut mgr);
        mgr.received_version(&peer, version_msg(42, local), &mut store);
        drain(&mut mgr);
        mgr.received_verack(&peer);
        drain(&mut mgr);

        clock.0.set(clock.0.get() + NO_DATA_TIMEOUT + LocalDuration::from_secs(1));
        mgr.received_wake(&mut store);
        let out = drain(&mut mgr);
        assert!(out.iter().any(|io| matches!(
            io,
            Io::Disconnect(addr, NetDisconnect::StateMachine(DisconnectReason::PeerTimeout("no data"))) if *addr == peer
        )));
    }

    #[test]
    fn touch_resets_no_data_timeout() {
        let clock = TestClock(std::cell::Cell::new(LocalTime::from_secs(1_600_000_000)));
        let mut mgr = PeerManager::new(config(), fastrand::Rng::with_seed(1), clock.clone());
        let peer: SocketAddr = "18.1.2.3:8333".parse().unwrap();
        let local: SocketAddr = "0.0.0.0:8333".parse().unwrap();
        let mut store = addrs(clock.clone());

        mgr.peer_connected(peer, local, Link::Inbound);
        drain(&mut mgr);
        mgr.received_version(&peer, version_msg(42, local), &mut store);
        drain(&mut mgr);
        mgr.received_verack(&peer);
        drain(&mut mgr);

        clock.0.set(clock.0.get() + NO_DATA_TIMEOUT - LocalDuration::from_secs(1));
        mgr.touch(&peer);

        clock.0.set(clock.0.get() + LocalDuration::from_secs(2));
        mgr.received_wake(&mut store);
        let out = drain(&mut mgr);
        assert!(!out.iter().any(|io| matches!(io, Io::Disconnect(addr, _) if *addr == peer)));
    }
}
