//! Shared peer-address bookkeeping types, used by the address manager.
use std::net;
use std::net::SocketAddr;

use bitcoin::network::{address::Address, constants::ServiceFlags};

use crate::net::time::LocalTime;

/// Peer address store.
pub trait Store {
    fn get(&self, addr: &SocketAddr) -> Option<&KnownAddress>;
    fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut KnownAddress>;

    /// Insert a *new* address. Returns `false` if it was already known.
    fn insert(&mut self, addr: &SocketAddr, ka: KnownAddress) -> bool;
    fn remove(&mut self, addr: &SocketAddr) -> Option<KnownAddress>;
    fn iter<'a>(&'a self) -> Box<dyn Iterator<Item = (&SocketAddr, &KnownAddress)> + 'a>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);
}

impl Store for std::collections::HashMap<SocketAddr, KnownAddress> {
    fn get(&self, ip: &SocketAddr) -> Option<&KnownAddress> {
        self.get(ip)
    }

    fn get_mut(&mut self, ip: &SocketAddr) -> Option<&mut KnownAddress> {
        self.get_mut(ip)
    }

    fn insert(&mut self, addr: &SocketAddr, ka: KnownAddress) -> bool {
        use std::collections::hash_map::Entry;

        match self.entry(*addr) {
            Entry::Vacant(v) => {
                v.insert(ka);
            }
            Entry::Occupied(_) => return false,
        }
        true
    }

    fn remove(&mut self, addr: &SocketAddr) -> Option<KnownAddress> {
        self.remove(addr)
    }

    fn iter<'a>(&'a self) -> Box<dyn Iterator<Item = (&SocketAddr, &KnownAddress)> + 'a> {
        Box::new(self.iter())
    }

    fn len(&self) -> usize {
        self.len()
    }

    fn clear(&mut self) {
        self.clear()
    }
}

/// Where an address came from. There is no DNS-seed source here: this
/// network has no seeders, so every address is either learned from a peer
/// or imported directly by whoever is running the node.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Source {
    Peer(net::SocketAddr),
    Imported,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Peer(addr) => write!(f, "{}", addr),
            Self::Imported => write!(f, "imported"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownAddress {
    pub addr: Address,
    pub source: Source,
    pub last_success: Option<LocalTime>,
    pub last_sampled: Option<LocalTime>,
    pub last_attempt: Option<LocalTime>,
    pub last_active: Option<LocalTime>,
}

impl KnownAddress {
    pub fn new(addr: Address, source: Source, last_active: Option<LocalTime>) -> Self {
        Self {
            addr,
            source,
            last_success: None,
            last_attempt: None,
            last_sampled: None,
            last_active,
        }
    }
}

/// Source of peer addresses, as seen by whatever wants to sample one (the
/// peer manager, dialing out for new connections).
pub trait AddressSource {
    fn sample(&mut self, services: ServiceFlags) -> Option<(Address, Source)>;
    fn sample_with(&mut self, predicate: impl Fn(&KnownAddress) -> bool) -> Option<(Address, Source)>;
    fn record_local_address(&mut self, addr: net::SocketAddr);
    fn is_connected(&mut self, addr: net::SocketAddr) -> bool;
    fn iter(&mut self, services: ServiceFlags) -> Box<dyn Iterator<Item = (Address, Source)> + '_>;
    fn insert(&mut self, addrs: impl IntoIterator<Item = (u32, Address)>, source: Source);
}
