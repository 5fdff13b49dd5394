//! Block/transaction announcement, the `getblocks`/`getdata` responders, and
//! the pacing that decides when a fresh `getblocks` probe is due.
//!
//! The chain and mempool are external collaborators, referenced here only by
//! interface ([`BlockChain`], [`TransactionsToSend`]) so this crate doesn't
//! need to know how blocks are stored or validated.
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use bitcoin::hashes::{sha256d, Hash as _};
use bitcoin::BlockHash;
use gossip_wire::{GetBlocksMessage, InvType, Inventory};
use tracing::trace;

use crate::common::time::Clock;
use crate::fsm::event::{Event, InventoryEvent};
use crate::fsm::output::Outbox;
use crate::net::time::{LocalDuration, LocalTime};

/// Cap on a single peer's outbound inv queue (§4.5).
pub const MAX_PENDING_INVS: usize = 500;
/// Cap on a `getblocks` subtree walk (§4.6).
pub const MAX_GETBLOCKS_RESULTS: usize = 500;
/// Soft cap on bytes queued for send before `getdata` stops filling (§4.7).
pub const GETDATA_SOFT_CAP: usize = 32 * 1024;
/// Minimum spacing between unprompted `getblocks` probes (§4.10).
pub const NEW_BLOCKS_ASK_DURATION: LocalDuration = LocalDuration::from_secs(30);
/// Ceiling on the locator's walk-back depth (§4.10).
pub const MAX_GETBLOCKS_DEPTH: u32 = 400;
/// Depth used before any block has ever been received (§4.10).
pub const DEFAULT_GETBLOCKS_DEPTH: u32 = 144;

pub type Height = u64;

/// The external chain/block-index collaborator. Implemented by whatever owns
/// block storage and validation; this crate only calls through the trait.
pub trait BlockChain: Send {
    fn tip(&self) -> BlockHash;
    fn contains(&self, hash: &BlockHash) -> bool;
    fn get_block(&self, hash: &BlockHash) -> Option<Vec<u8>>;
    /// DFS walk of `from`'s descendants, stopping at `stop` or `remaining`
    /// entries, whichever comes first.
    fn descendants(&self, from: &BlockHash, stop: &BlockHash, remaining: usize) -> Vec<BlockHash>;
    /// Hash `depth` parents back from the current tip, for use as a
    /// single-entry `getblocks` locator.
    fn locator_at_depth(&self, depth: u32) -> BlockHash;
    /// Minutes since the last block was received, for `blocksNeeded` pacing.
    fn minutes_since_last_block(&self) -> Option<u32>;
    /// A block hash the chain still needs, if any (`blockDataNeeded`).
    fn block_data_needed(&self) -> Option<BlockHash>;
}

/// The external mempool/relay-queue collaborator backing `getdata` for
/// `type==1` (tx) requests.
pub trait TransactionsToSend: Send {
    fn get(&self, hash: &sha256d::Hash) -> Option<Vec<u8>>;
}

#[derive(Debug, Clone, Default)]
struct PeerState {
    pending: VecDeque<Inventory>,
    last_blocks_from: Option<BlockHash>,
    last_getblocks_at: Option<LocalTime>,
    relay: bool,
}

pub struct InventoryManager<C> {
    peers: HashMap<SocketAddr, PeerState>,
    chain: Box<dyn BlockChain>,
    mempool: Box<dyn TransactionsToSend>,
    outbox: Outbox,
    clock: C,
}

impl<C: Clock> Iterator for InventoryManager<C> {
    type Item = crate::fsm::output::OutIo;

    fn next(&mut self) -> Option<Self::Item> {
        self.outbox.next()
    }
}

impl<C: Clock> InventoryManager<C> {
    pub fn new(clock: C, chain: Box<dyn BlockChain>, mempool: Box<dyn TransactionsToSend>) -> Self {
        Self { peers: HashMap::new(), chain, mempool, outbox: Outbox::new(), clock }
    }

    pub fn peer_negotiated(&mut self, addr: SocketAddr, _services: bitcoin::network::constants::ServiceFlags, relay: bool) {
        self.peers.insert(addr, PeerState { relay, ..PeerState::default() });
    }

    pub fn peer_disconnected(&mut self, addr: &SocketAddr) {
        self.peers.remove(addr);
    }

    pub fn is_connected(&self, addr: &SocketAddr) -> bool {
        self.peers.contains_key(addr)
    }

    /// §4.5 `ProcessInv`: only block (type 2) entries are acted on; length
    /// mismatches are logged and the message is still processed best-effort.
    /// Notify-only: the caller decides, once the block is actually validated,
    /// whether and how to fan it back out via [`Self::announce`].
    pub fn received_inv(&mut self, peer: SocketAddr, inventory: Vec<Inventory>) {
        for item in &inventory {
            match item.inv_type {
                InvType::Block => self.outbox.event(Event::Inventory(InventoryEvent::BlockAnnounced { peer, hash: item.hash })),
                InvType::Tx => {}
                InvType::Unknown(t) => trace!(target: "p2p", "{}: unexpected inv type {}", peer, t),
            }
        }
    }

    /// §4.5 `NetSendInv`: fan out to every given peer, skipping `except` (the
    /// peer the announcement came from, if any) so it never gets its own
    /// inventory echoed back, capping each peer's queue and dropping (with a
    /// counted event) past it.
    pub fn announce(&mut self, hash: sha256d::Hash, is_block: bool, all_negotiated: &[SocketAddr], except: Option<SocketAddr>) {
        let item = if is_block { Inventory::block(hash) } else { Inventory::tx(hash) };
        for addr in all_negotiated {
            if Some(*addr) == except {
                continue;
            }
            let Some(state) = self.peers.get_mut(addr) else { continue };
            if !is_block && !state.relay {
                continue;
            }
            if state.pending.len() >= MAX_PENDING_INVS {
                self.outbox.event(Event::Inventory(InventoryEvent::QueueOverflow { peer: *addr }));
                continue;
            }
            state.pending.push_back(item);
        }
    }

    /// §4.6 `getblocks` responder: walk each locator's subtree in order,
    /// stopping at `stop_hash` or once 500 hashes have been collected.
    pub fn received_getblocks(&mut self, peer: SocketAddr, msg: GetBlocksMessage) {
        let mut found = Vec::new();
        let mut seen = std::collections::HashSet::new();

        'locators: for locator in &msg.locator_hashes {
            if !self.chain.contains(locator) {
                continue;
            }
            let remaining = MAX_GETBLOCKS_RESULTS - found.len();
            if remaining == 0 {
                break;
            }
            for hash in self.chain.descendants(locator, &msg.stop_hash, remaining) {
                if seen.insert(hash) {
                    found.push(hash);
                }
                if found.len() >= MAX_GETBLOCKS_RESULTS || hash == msg.stop_hash {
                    break 'locators;
                }
            }
        }

        if !found.is_empty() {
            let count = found.len();
            let inventory = found.into_iter().map(Inventory::block).collect();
            self.outbox.inv(peer, inventory);
            self.outbox.event(Event::Inventory(InventoryEvent::GetBlocksServed { peer, count }));
        }
    }

    /// §4.7 `getdata` responder, soft-capped at 32 KiB of queued sends.
    pub fn received_getdata(&mut self, peer: SocketAddr, inventory: Vec<Inventory>) {
        let mut queued_bytes = 0usize;

        for item in inventory {
            if queued_bytes >= GETDATA_SOFT_CAP {
                break;
            }
            match item.inv_type {
                InvType::Block => {
                    if let Some(raw) = self.chain.get_block(&item.hash) {
                        queued_bytes += raw.len();
                        self.outbox.block(peer, raw);
                    }
                }
                InvType::Tx => {
                    if let Some(raw) = self.mempool.get(&item.hash) {
                        queued_bytes += raw.len();
                        self.outbox.tx(peer, raw);
                    }
                }
                InvType::Unknown(t) => {
                    trace!(target: "p2p", "{}: getdata for unsupported type {}", peer, t);
                }
            }
        }
    }

    /// Incoming `block`: forward to the chain's validator as an event; the
    /// actual validation and storage lives outside this crate.
    pub fn received_block(&mut self, peer: SocketAddr, raw: Vec<u8>) {
        if let Ok(block) = bitcoin::consensus::deserialize::<bitcoin::Block>(&raw) {
            let hash: sha256d::Hash = *block.block_hash();
            self.outbox.event(Event::Inventory(InventoryEvent::BlockAnnounced { peer, hash }));
        }
    }

    /// §4.9 steps 4-6, and §4.10's pacing, run once per negotiated peer on
    /// every Tick.
    pub fn received_tick(&mut self, now: LocalTime, negotiated: &[SocketAddr]) {
        for addr in negotiated {
            self.tick_peer(*addr, now);
        }
    }

    fn tick_peer(&mut self, addr: SocketAddr, now: LocalTime) {
        let drained = {
            let Some(state) = self.peers.get_mut(&addr) else { return };
            if state.pending.is_empty() {
                None
            } else {
                Some(state.pending.drain(..).collect::<Vec<_>>())
            }
        };
        if let Some(inventory) = drained {
            self.outbox.inv(addr, inventory);
            return;
        }

        if let Some(hash) = self.chain.block_data_needed() {
            self.outbox.get_data(addr, vec![Inventory::block(hash)]);
            return;
        }

        if self.blocks_needed(&addr, now) {
            self.send_getblocks(addr, now);
        }
    }

    fn blocks_needed(&self, addr: &SocketAddr, now: LocalTime) -> bool {
        let Some(state) = self.peers.get(addr) else { return false };
        let tip = self.chain.tip();

        if state.last_blocks_from != Some(tip) {
            return true;
        }
        match state.last_getblocks_at {
            None => true,
            Some(last) => now - last >= NEW_BLOCKS_ASK_DURATION,
        }
    }

    fn send_getblocks(&mut self, addr: SocketAddr, now: LocalTime) {
        let depth = self
            .chain
            .minutes_since_last_block()
            .map(|mins| mins.min(MAX_GETBLOCKS_DEPTH))
            .unwrap_or(DEFAULT_GETBLOCKS_DEPTH);
        let locator = self.chain.locator_at_depth(depth);
        let tip = self.chain.tip();

        self.outbox.get_blocks(
            addr,
            GetBlocksMessage::new(crate::common::network::PROTOCOL_VERSION, vec![locator], BlockHash::all_zeros()),
        );

        if let Some(state) = self.peers.get_mut(&addr) {
            state.last_blocks_from = Some(tip);
            state.last_getblocks_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::time::LocalTime;
    use std::sync::Mutex;

    #[derive(Clone)]
    struct TestClock(LocalTime);
    impl Clock for TestClock {
        fn local_time(&self) -> LocalTime {
            self.0
        }
    }

    struct EmptyChain(Mutex<Vec<BlockHash>>);
    impl BlockChain for EmptyChain {
        fn tip(&self) -> BlockHash {
            BlockHash::all_zeros()
        }
        fn contains(&self, _hash: &BlockHash) -> bool {
            true
        }
        fn get_block(&self, _hash: &BlockHash) -> Option<Vec<u8>> {
            None
        }
        fn descendants(&self, _from: &BlockHash, _stop: &BlockHash, remaining: usize) -> Vec<BlockHash> {
            self.0.lock().unwrap().iter().take(remaining).cloned().collect()
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

    struct EmptyMempool;
    impl TransactionsToSend for EmptyMempool {
        fn get(&self, _hash: &sha256d::Hash) -> Option<Vec<u8>> {
            None
        }
    }

    fn mgr(hashes: Vec<BlockHash>) -> InventoryManager<TestClock> {
        InventoryManager::new(
            TestClock(LocalTime::from_secs(1_600_000_000)),
            Box::new(EmptyChain(Mutex::new(hashes))),
            Box::new(EmptyMempool),
        )
    }

    #[test]
    fn getblocks_walk_is_capped_at_500() {
        let hashes: Vec<BlockHash> = (0..600u8)
            .map(|i| {
                let mut bytes = [0u8; 32];
                bytes[0] = i;
                BlockHash::from_slice(&bytes).unwrap()
            })
            .collect();
        let mut mgr = mgr(hashes);
        let addr: SocketAddr = "1.2.3.4:8333".parse().unwrap();
        mgr.received_getblocks(
            addr,
            GetBlocksMessage::new(0, vec![BlockHash::all_zeros()], BlockHash::all_zeros()),
        );
        let out = mgr.next();
        match out {
            Some(crate::net::Io::Write(_, gossip_wire::NetworkMessage::Inv(inv))) => {
                assert_eq!(inv.len(), MAX_GETBLOCKS_RESULTS);
            }
            other => panic!("expected an inv message, got {:?}", other),
        }
    }

    #[test]
    fn pending_invs_drop_past_cap() {
        let mut mgr = mgr(vec![]);
        let addr: SocketAddr = "1.2.3.4:8333".parse().unwrap();
        mgr.peer_negotiated(addr, bitcoin::network::constants::ServiceFlags::NETWORK, true);

        for i in 0..(MAX_PENDING_INVS + 10) {
            let mut bytes = [0u8; 32];
            bytes[0] = (i % 256) as u8;
            bytes[1] = (i / 256) as u8;
            let hash = sha256d::Hash::from_slice(&bytes).unwrap();
            mgr.announce(hash, true, &[addr], None);
        }
        assert_eq!(mgr.peers.get(&addr).unwrap().pending.len(), MAX_PENDING_INVS);
    }

    #[test]
    fn received_inv_only_emits_an_event_and_never_fans_out() {
        let mut mgr = mgr(vec![]);
        let sender: SocketAddr = "1.2.3.4:8333".parse().unwrap();
        let other: SocketAddr = "5.6.7.8:8333".parse().unwrap();
        mgr.peer_negotiated(sender, bitcoin::network::constants::ServiceFlags::NETWORK, true);
        mgr.peer_negotiated(other, bitcoin::network::constants::ServiceFlags::NETWORK, true);

        let hash = sha256d::Hash::from_slice(&[7u8; 32]).unwrap();
        mgr.received_inv(sender, vec![Inventory::block(hash)]);

        assert!(mgr.peers.get(&sender).unwrap().pending.is_empty());
        assert!(mgr.peers.get(&other).unwrap().pending.is_empty());
        match mgr.next() {
            Some(crate::net::Io::Event(Event::Inventory(InventoryEvent::BlockAnnounced { peer, hash: h }))) => {
                assert_eq!(peer, sender);
                assert_eq!(h, hash);
            }
            other => panic!("expected a BlockAnnounced event, got {:?}", other),
        }
        assert!(mgr.next().is_none());
    }

    #[test]
    fn announce_never_echoes_back_to_the_excepted_peer() {
        let mut mgr = mgr(vec![]);
        let sender: SocketAddr = "1.2.3.4:8333".parse().unwrap();
        let other: SocketAddr = "5.6.7.8:8333".parse().unwrap();
        mgr.peer_negotiated(sender, bitcoin::network::constants::ServiceFlags::NETWORK, true);
        mgr.peer_negotiated(other, bitcoin::network::constants::ServiceFlags::NETWORK, true);

        let hash = sha256d::Hash::from_slice(&[9u8; 32]).unwrap();
        mgr.announce(hash, true, &[sender, other], Some(sender));

        assert!(mgr.peers.get(&sender).unwrap().pending.is_empty());
        assert_eq!(mgr.peers.get(&other).unwrap().pending.len(), 1);
    }
}
