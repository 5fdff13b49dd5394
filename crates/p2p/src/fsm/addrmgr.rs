//! Learns candidate peer addresses from incoming `addr` messages and samples
//! them for outbound dialing. Address-range bucketing keeps an attacker who
//! controls many addresses in one /16 from dominating the sample.
use std::collections::{HashMap, HashSet};
use std::net;
use std::net::SocketAddr;

use tracing::trace;

use bitcoin::network::address::Address;
use bitcoin::network::constants::ServiceFlags;

use crate::common::peer::{AddressSource, KnownAddress, Source, Store};
use crate::common::time::Clock;
use crate::fsm::event::{AddressEvent, Event};
use crate::fsm::output::Outbox;
use crate::net::time::{LocalDuration, LocalTime};
use crate::net::{Disconnect, Io};

/// How long before a sampled address can be returned again.
pub const SAMPLE_TIMEOUT: LocalDuration = LocalDuration::from_mins(3);
/// Maximum number of addresses accepted in a single `addr` message.
const MAX_ADDR_ADDRESSES: usize = 1000;
/// Maximum number of addresses kept per /16 (v4) or /32 (v6) range.
const MAX_RANGE_SIZE: usize = 256;

/// Iterator over sampled addresses.
pub struct Iter<F>(F);

impl<F> Iterator for Iter<F>
where
    F: FnMut() -> Option<(Address, Source)>,
{
    type Item = (Address, Source);

    fn next(&mut self) -> Option<Self::Item> {
        (self.0)()
    }
}

/// Manages known peer addresses, independent of which ones are currently
/// connected (that's [`crate::fsm::peermgr::PeerManager`]'s job).
#[derive(Debug)]
pub struct AddressManager<P, C> {
    peers: P,
    bans: HashSet<net::IpAddr>,
    address_ranges: HashMap<u8, HashSet<SocketAddr>>,
    connected: HashSet<SocketAddr>,
    local_addrs: HashSet<net::SocketAddr>,
    last_idle: Option<LocalTime>,
    outbox: Outbox,
    rng: fastrand::Rng,
    clock: C,
}

impl<P, C> Iterator for AddressManager<P, C> {
    type Item = Io<crate::fsm::handler::DisconnectReason>;

    fn next(&mut self) -> Option<Self::Item> {
        self.outbox.next()
    }
}

impl<P: Store, C: Clock> AddressManager<P, C> {
    pub fn new(rng: fastrand::Rng, peers: P, clock: C) -> Self {
        let addrs = peers.iter().map(|(addr, _)| *addr).collect::<Vec<_>>();
        let mut mgr = Self {
            peers,
            bans: HashSet::new(),
            address_ranges: HashMap::new(),
            connected: HashSet::new(),
            local_addrs: HashSet::new(),
            last_idle: None,
            outbox: Outbox::new(),
            rng,
            clock,
        };
        for addr in addrs.iter() {
            mgr.populate_address_ranges(addr);
        }
        mgr
    }

    pub fn initialize(&mut self) {
        self.last_idle = Some(self.clock.local_time());
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty() || self.address_ranges.is_empty()
    }

    pub fn is_banned(&self, addr: &SocketAddr) -> bool {
        self.bans.contains(&addr.ip())
    }

    pub fn record_local_address(&mut self, addr: net::SocketAddr) {
        self.local_addrs.insert(addr);
    }

    /// Called when a peer sends us an `addr` message: the dispatcher's
    /// `ParseAddr` step.
    pub fn received_addr(&mut self, peer: net::SocketAddr, addrs: Vec<(u32, Address)>) {
        if addrs.is_empty() || addrs.len() > MAX_ADDR_ADDRESSES {
            trace!(target: "p2p", "{}: ignoring addr message with {} entries", peer, addrs.len());
            return;
        }
        let source = Source::Peer(peer);
        self.outbox
            .event(Event::Address(AddressEvent::Received { count: addrs.len(), source: peer }));
        self.insert(addrs, source);
    }

    pub fn insert(&mut self, addrs: impl IntoIterator<Item = (u32, Address)>, source: Source) {
        let time = self.last_idle.unwrap_or_default();
        for (last_active, addr) in addrs {
            if last_active == 0 {
                continue;
            }
            if LocalTime::from_secs(last_active as u64) > time + LocalDuration::from_mins(60) {
                continue;
            }
            let Ok(socket_addr) = addr.socket_addr() else { continue };

            if self.bans.contains(&socket_addr.ip()) || self.local_addrs.contains(&socket_addr) {
                continue;
            }
            if !self.peers.insert(&socket_addr, KnownAddress::new(addr.clone(), source, None)) {
                continue;
            }
            self.populate_address_ranges(&socket_addr);
        }
    }

    pub fn sample(&mut self, services: ServiceFlags) -> Option<(Address, Source)> {
        self.sample_with(|ka: &KnownAddress| ka.addr.services.has(services))
    }

    pub fn sample_with(&mut self, predicate: impl Fn(&KnownAddress) -> bool) -> Option<(Address, Source)> {
        if self.is_empty() {
            return None;
        }
        let time = self.last_idle.unwrap_or_default();
        let mut ranges: Vec<_> = self.address_ranges.values().collect();
        self.rng.shuffle(&mut ranges);

        for range in ranges.drain(..) {
            let mut ips: Vec<_> = range.iter().collect();
            self.rng.shuffle(&mut ips);

            for ip in ips.drain(..) {
                let ka = self.peers.get_mut(ip).expect("address must exist");
                if ka.last_attempt.is_some() && ka.last_success.is_none() {
                    continue;
                }
                if time - ka.last_sampled.unwrap_or_default() < SAMPLE_TIMEOUT {
                    continue;
                }
                if self.connected.contains(ip) {
                    continue;
                }
                if !predicate(ka) {
                    continue;
                }
                ka.last_sampled = Some(time);
                return Some((ka.addr.clone(), ka.source));
            }
        }
        None
    }

    pub fn iter(&mut self, services: ServiceFlags) -> impl Iterator<Item = (Address, Source)> + '_ {
        Iter(move || self.sample(services))
    }

    pub fn peer_attempted(&mut self, addr: &SocketAddr) {
        let time = self.clock.local_time();
        if let Some(ka) = self.peers.get_mut(addr) {
            ka.last_attempt = Some(time);
        }
    }

    pub fn peer_connected(&mut self, addr: &SocketAddr) {
        self.insert(
            vec![(LocalTime::now().as_secs() as u32, Address::new(addr, ServiceFlags::NONE))],
            Source::Peer(*addr),
        );
        self.populate_address_ranges(addr);
        self.connected.insert(*addr);
    }

    pub fn peer_active(&mut self, addr: SocketAddr) {
        let time = self.clock.local_time();
        if let Some(ka) = self.peers.get_mut(&addr) {
            ka.last_active = Some(time);
        }
    }

    pub fn peer_negotiated(&mut self, addr: &SocketAddr, services: ServiceFlags) {
        let time = self.clock.local_time();
        if let Some(ka) = self.peers.get_mut(addr) {
            ka.last_success = Some(time);
            ka.last_active = Some(time);
            ka.addr.services = services;
        }
    }

    pub fn peer_disconnected(
        &mut self,
        addr: &SocketAddr,
        reason: Disconnect<crate::fsm::handler::DisconnectReason>,
    ) {
        if self.connected.remove(addr) {
            if let Disconnect::StateMachine(r) = reason {
                if !r.is_transient() {
                    self.ban(addr);
                }
            } else if reason.is_dial_err() || reason.is_banned() {
                self.ban(addr);
            }
        }
    }

    fn populate_address_ranges(&mut self, addr: &SocketAddr) -> u8 {
        let key = addr_key(&addr.ip());
        let range = self.address_ranges.entry(key).or_default();

        if range.len() == MAX_RANGE_SIZE {
            let ix = self.rng.usize(..range.len());
            let victim = range.iter().cloned().nth(ix).expect("the range is not empty");
            range.remove(&victim);
            self.peers.remove(&victim);
        }
        range.insert(*addr);
        key
    }

    fn ban(&mut self, addr: &SocketAddr) -> bool {
        let key = addr_key(&addr.ip());
        if let Some(range) = self.address_ranges.get_mut(&key) {
            range.remove(addr);
            self.peers.remove(addr);
            self.bans.insert(addr.ip());
            if range.is_empty() {
                self.address_ranges.remove(&key);
            }
            return true;
        }
        false
    }
}

impl<P: Store, C: Clock> AddressSource for AddressManager<P, C> {
    fn sample(&mut self, services: ServiceFlags) -> Option<(Address, Source)> {
        AddressManager::sample(self, services)
    }

    fn sample_with(&mut self, predicate: impl Fn(&KnownAddress) -> bool) -> Option<(Address, Source)> {
        AddressManager::sample_with(self, predicate)
    }

    fn record_local_address(&mut self, addr: net::SocketAddr) {
        AddressManager::record_local_address(self, addr)
    }

    fn is_connected(&mut self, addr: net::SocketAddr) -> bool {
        self.local_addrs.contains(&addr)
            || self.peers.get(&addr).is_some()
            || self.connected.contains(&addr)
    }

    fn iter(&mut self, services: ServiceFlags) -> Box<dyn Iterator<Item = (Address, Source)> + '_> {
        Box::new(AddressManager::iter(self, services))
    }

    fn insert(&mut self, addrs: impl IntoIterator<Item = (u32, Address)>, source: Source) {
        AddressManager::insert(self, addrs, source)
    }
}

/// Whether an IP is locally routable (used to whitelist handshake checks).
pub fn is_local(addr: &net::IpAddr) -> bool {
    match addr {
        net::IpAddr::V4(addr) => {
            addr.is_private() || addr.is_loopback() || addr.is_link_local() || addr.is_unspecified()
        }
        net::IpAddr::V6(_) => false,
    }
}

/// 8-bit key grouping addresses by /16 (v4) or first 32 bits (v6), used to
/// bucket the address ranges for diverse sampling.
pub fn addr_key(ip: &net::IpAddr) -> u8 {
    match ip {
        net::IpAddr::V4(ip) => {
            let octets: [u8; 4] = ip.octets();
            let bits: u16 = (octets[0] as u16) << 8 | octets[1] as u16;
            (bits % u8::MAX as u16) as u8
        }
        net::IpAddr::V6(ip) => {
            let segments: [u16; 8] = ip.segments();
            let bits: u32 = (segments[0] as u32) << 16 | segments[1] as u32;
            (bits % u8::MAX as u32) as u8
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use crate::net::time::LocalTime;

    #[derive(Clone)]
    struct TestClock(LocalTime);
    impl Clock for TestClock {
        fn local_time(&self) -> LocalTime {
            self.0
        }
    }

    fn mgr() -> AddressManager<StdHashMap<SocketAddr, KnownAddress>, TestClock> {
        let mut mgr = AddressManager::new(
            fastrand::Rng::with_seed(1),
            StdHashMap::new(),
            TestClock(LocalTime::from_secs(1_600_000_000)),
        );
        mgr.initialize();
        mgr
    }

    #[test]
    fn inserts_and_samples_addresses() {
        let mut mgr = mgr();
        let addr: SocketAddr = "18.1.2.3:8333".parse().unwrap();
        mgr.insert(
            vec![(1_600_000_000, Address::new(&addr, ServiceFlags::NETWORK))],
            Source::Imported,
        );
        assert_eq!(mgr.len(), 1);
        let sampled = mgr.sample(ServiceFlags::NETWORK);
        assert!(sampled.is_some());
    }

    #[test]
    fn rejects_oversized_addr_messages() {
        let mut mgr = mgr();
        let addrs = (0..2000)
            .map(|i| {
                let addr: SocketAddr = format!("1.2.{}.{}:8333", i / 256, i % 256).parse().unwrap();
                (1_600_000_000, Address::new(&addr, ServiceFlags::NONE))
            })
            .collect();
        mgr.received_addr("9.9.9.9:1".parse().unwrap(), addrs);
        assert_eq!(mgr.len(), 0);
    }

    #[test]
    fn banned_address_is_not_sampled_again() {
        let mut mgr = mgr();
        let addr: SocketAddr = "18.1.2.3:8333".parse().unwrap();
        mgr.insert(vec![(1_600_000_000, Address::new(&addr, ServiceFlags::NONE))], Source::Imported);
        mgr.connected.insert(addr);
        mgr.peer_disconnected(&addr, Disconnect::PeerBanned);
        assert!(mgr.is_banned(&addr));
        assert_eq!(mgr.len(), 0);
    }
}
