//! Minimal stand-ins for the block validator and mempool the engine treats
//! as external collaborators (see `gossip_p2p::fsm::invmgr`). Neither is in
//! scope for this binary: a real deployment wires in its own chain index and
//! transaction pool here instead.
use bitcoin::hashes::Hash as _;
use bitcoin::hashes::sha256d;
use bitcoin::BlockHash;

use gossip_p2p::fsm::invmgr::{BlockChain, TransactionsToSend};

/// A chain with nothing in it: never has a block to serve, never asks for one.
pub struct EmptyChain;

impl BlockChain for EmptyChain {
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

/// A mempool with nothing in it: every `getdata` for a transaction misses.
pub struct EmptyMempool;

impl TransactionsToSend for EmptyMempool {
    fn get(&self, _hash: &sha256d::Hash) -> Option<Vec<u8>> {
        None
    }
}
