//! Wraps the protocol state machine so its `Event`s are also siphoned out to
//! a client-facing channel, without changing anything the reactor sees.
use std::net::SocketAddr;

use tracing::trace;

use crate::common::peer::Store;
use crate::common::time::Clock;
use crate::fsm::event::Event;
use crate::fsm::handler::{self, Command};
use crate::net::reactor::StateMachine as Reactor;
use crate::net::time::LocalTime;
use crate::net::{Disconnect, Io, Link};

pub struct Service<P, C> {
    machine: handler::StateMachine<P, C>,
    events: flume::Sender<Event>,
}

impl<P, C> Service<P, C> {
    pub fn new(machine: handler::StateMachine<P, C>, events: flume::Sender<Event>) -> Self {
        Self { machine, events }
    }
}

impl<P: Store, C: Clock> Service<P, C> {
    pub fn command(&mut self, cmd: Command) {
        self.machine.command(cmd)
    }
}

impl<P: Store, C: Clock> Reactor for Service<P, C> {
    type DisconnectReason = handler::DisconnectReason;

    fn initialize(&mut self, time: LocalTime) {
        self.machine.initialize(time);
    }

    fn message_received(&mut self, addr: &SocketAddr, message: gossip_wire::NetworkMessage) {
        self.machine.message_received(addr, message);
    }

    fn attempted(&mut self, addr: &SocketAddr) {
        self.machine.attempted(addr);
    }

    fn connected(&mut self, addr: SocketAddr, local_addr: &SocketAddr, link: Link) {
        self.machine.connected(addr, local_addr, link);
    }

    fn disconnected(&mut self, addr: &SocketAddr, reason: Disconnect<handler::DisconnectReason>) {
        self.machine.disconnected(addr, reason);
    }

    fn tick(&mut self, local_time: LocalTime) {
        self.machine.tick(local_time);
    }

    fn timer_expired(&mut self) {
        self.machine.timer_expired();
    }
}

impl<P, C> Iterator for Service<P, C> {
    type Item = Io<handler::DisconnectReason>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.machine.next()? {
            Io::Event(event) => {
                if self.events.try_send(event.clone()).is_err() {
                    trace!(target: "p2p", "dropping event, no listener: {}", event);
                }
                Some(Io::Event(event))
            }
            other => Some(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;
    use std::net::SocketAddr;

    use bitcoin::hashes::Hash as _;
    use bitcoin::network::constants::ServiceFlags;
    use bitcoin::BlockHash;

    use crate::common::peer::KnownAddress;
    use crate::fsm::handler::{Config, Whitelist};
    use crate::fsm::invmgr::{BlockChain, TransactionsToSend};
    use crate::net::time::LocalTime;

    use super::*;

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

    fn service() -> Service<StdHashMap<SocketAddr, KnownAddress>, TestClock> {
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
        let machine = handler::StateMachine::new(
            config,
            StdHashMap::new(),
            TestClock(LocalTime::from_secs(1_600_000_000)),
            fastrand::Rng::with_seed(1),
            Box::new(NullChain),
            Box::new(NullMempool),
        );
        let (tx, _rx) = flume::unbounded();
        Service::new(machine, tx)
    }

    #[test]
    fn events_are_siphoned_and_still_yielded() {
        let mut svc = service();
        let (tx, rx) = flume::unbounded();
        svc.events = tx;

        svc.command(Command::ImportAddresses(vec!["18.1.2.3:8333".parse().unwrap()]));

        let yielded: Vec<_> = std::iter::from_fn(|| svc.next()).collect();
        assert!(yielded.iter().any(|io| matches!(io, Io::Event(Event::Address(_)))));
        assert!(rx.try_recv().is_ok());
    }
}
