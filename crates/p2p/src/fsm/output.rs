//! The single channel through which the state machine talks back to the
//! reactor. Sub-managers never touch a socket; they push onto an `Outbox`,
//! which the [`crate::net::reactor::Reactor`] drains every tick via the
//! machine's `Iterator` implementation.
use std::collections::VecDeque;
use std::net::SocketAddr;

use gossip_wire::{Address, GetBlocksMessage, Inventory, NetworkMessage, VersionMessage};

use crate::fsm::event::Event;
use crate::fsm::handler::DisconnectReason;
use crate::net::time::LocalDuration;
use crate::net::{Disconnect, Io};

pub type OutIo = Io<DisconnectReason>;

#[derive(Debug, Default)]
pub struct Outbox {
    out: VecDeque<OutIo>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, io: OutIo) {
        self.out.push_back(io);
    }

    pub fn message(&mut self, addr: SocketAddr, message: NetworkMessage) {
        self.push(Io::Write(addr, message));
    }

    pub fn event(&mut self, event: impl Into<Event>) {
        self.push(Io::Event(event.into()));
    }

    pub fn connect(&mut self, addr: SocketAddr) {
        self.push(Io::Connect(addr));
    }

    pub fn disconnect(&mut self, addr: SocketAddr, reason: DisconnectReason) {
        let disconnect = if reason.is_bannable() {
            Disconnect::PeerBanned
        } else {
            Disconnect::StateMachine(reason)
        };
        self.push(Io::Disconnect(addr, disconnect));
    }

    pub fn set_timer(&mut self, delay: LocalDuration) {
        self.push(Io::SetTimer(delay));
    }

    // -- wire message helpers, one per command in the dispatch table --

    pub fn version(&mut self, addr: SocketAddr, version: VersionMessage) {
        self.message(addr, NetworkMessage::Version(version));
    }

    pub fn verack(&mut self, addr: SocketAddr) {
        self.message(addr, NetworkMessage::Verack);
    }

    pub fn inv(&mut self, addr: SocketAddr, inventory: Vec<Inventory>) {
        self.message(addr, NetworkMessage::Inv(inventory));
    }

    pub fn get_data(&mut self, addr: SocketAddr, inventory: Vec<Inventory>) {
        self.message(addr, NetworkMessage::GetData(inventory));
    }

    pub fn get_blocks(&mut self, addr: SocketAddr, msg: GetBlocksMessage) {
        self.message(addr, NetworkMessage::GetBlocks(msg));
    }

    pub fn get_addr(&mut self, addr: SocketAddr) {
        self.message(addr, NetworkMessage::GetAddr);
    }

    pub fn addr(&mut self, addr: SocketAddr, addresses: Vec<(u32, Address)>) {
        self.message(addr, NetworkMessage::Addr(addresses));
    }

    pub fn ping(&mut self, addr: SocketAddr, nonce: u64) {
        self.message(addr, NetworkMessage::Ping(nonce));
    }

    pub fn pong(&mut self, addr: SocketAddr, nonce: u64) {
        self.message(addr, NetworkMessage::Pong(nonce));
    }

    pub fn block(&mut self, addr: SocketAddr, raw: Vec<u8>) {
        self.message(addr, NetworkMessage::Block(raw));
    }

    pub fn tx(&mut self, addr: SocketAddr, raw: Vec<u8>) {
        self.message(addr, NetworkMessage::Tx(raw));
    }
}

impl Iterator for Outbox {
    type Item = OutIo;

    fn next(&mut self) -> Option<Self::Item> {
        self.out.pop_front()
    }
}
