//! Owns the reactor thread and hands callers a [`ClientHandle`] to drive it.
//!
//! The reactor loop is synchronous (see [`crate::net::reactor`]); there is
//! no waker to interrupt a poll wait from another thread, so queued
//! commands are drained once per loop iteration instead, bounded by the
//! reactor's own `WAIT_TIMEOUT`.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use flume as chan;

use crate::client::error::Error;
use crate::client::handle;
use crate::client::service::Service;
use crate::common::peer::Store;
use crate::common::time::Clock;
use crate::fsm::event::Event;
use crate::fsm::handler::{self, Command};
use crate::fsm::invmgr::{BlockChain, TransactionsToSend};
use crate::net::reactor::{Limits, Reactor, StateMachine as _};
use crate::net::time::LocalTime;

/// Bridges user-facing configuration to the engine's internal [`handler::Config`].
#[derive(Debug, Clone)]
pub struct P2PConfig {
    pub magic: gossip_wire::Magic,
    pub listen: SocketAddr,
    pub limits: Limits,
    pub protocol: handler::Config,
}

/// A cloneable handle backed by an unbounded channel into the reactor thread.
#[derive(Clone)]
pub struct ClientHandle {
    commands: chan::Sender<Command>,
    events: chan::Receiver<Event>,
}

#[async_trait]
impl handle::Handle for ClientHandle {
    async fn command(&self, cmd: Command) -> Result<(), handle::Error> {
        self.commands.send_async(cmd).await?;
        Ok(())
    }

    fn events(&self) -> chan::Receiver<Event> {
        self.events.clone()
    }
}

/// A not-yet-running client: the reactor and its state machine, ready to be
/// handed to [`Client::run`] (directly, or via `thread::spawn`).
pub struct Client<P, C> {
    listen: SocketAddr,
    magic: gossip_wire::Magic,
    limits: Limits,
    commands: chan::Receiver<Command>,
    service: Service<P, C>,
}

impl<P: Store, C: Clock> Client<P, C> {
    pub fn new(
        config: P2PConfig,
        peers: P,
        clock: C,
        rng: fastrand::Rng,
        chain: Box<dyn BlockChain>,
        mempool: Box<dyn TransactionsToSend>,
    ) -> (Self, ClientHandle) {
        let (commands_tx, commands_rx) = chan::unbounded::<Command>();
        let (events_tx, events_rx) = chan::unbounded::<Event>();

        let machine = handler::StateMachine::new(config.protocol, peers, clock, rng, chain, mempool);
        let service = Service::new(machine, events_tx);

        let handle = ClientHandle { commands: commands_tx, events: events_rx };
        let client = Client {
            listen: config.listen,
            magic: config.magic,
            limits: config.limits,
            commands: commands_rx,
            service,
        };

        (client, handle)
    }

    /// Bind the listening socket, then run the engine until `stop` is set.
    /// Blocks the calling thread; see [`spawn`] to run this in the background.
    pub fn run(mut self, stop: Arc<AtomicBool>) -> Result<(), Error> {
        let mut reactor = Reactor::new(self.magic, self.limits);
        reactor.listen(self.listen)?;

        self.service.initialize(LocalTime::now());

        while !stop.load(Ordering::Relaxed) {
            while let Ok(cmd) = self.commands.try_recv() {
                self.service.command(cmd);
            }
            reactor.tick(&mut self.service)?;
        }
        Ok(())
    }
}

/// Spawn a [`Client`] on a dedicated OS thread and return its handle plus a
/// flag the caller can set to request shutdown.
pub fn spawn<P, C>(
    config: P2PConfig,
    peers: P,
    clock: C,
    rng: fastrand::Rng,
    chain: Box<dyn BlockChain>,
    mempool: Box<dyn TransactionsToSend>,
) -> (ClientHandle, Arc<AtomicBool>, thread::JoinHandle<Result<(), Error>>)
where
    P: Store + Send + 'static,
    C: Clock + Send + 'static,
{
    let (client, handle) = Client::new(config, peers, clock, rng, chain, mempool);
    let stop = Arc::new(AtomicBool::new(false));
    let worker = {
        let stop = stop.clone();
        thread::Builder::new()
            .name("gossip-p2p".into())
            .spawn(move || client.run(stop))
            .expect("spawning the reactor thread")
    };

    (handle, stop, worker)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;

    use bitcoin::hashes::Hash as _;
    use bitcoin::network::constants::ServiceFlags;
    use bitcoin::BlockHash;

    use crate::client::handle::Handle;
    use crate::common::peer::KnownAddress;
    use crate::fsm::handler::Whitelist;
    use crate::fsm::invmgr::{BlockChain, TransactionsToSend};
    use crate::net::reactor::Limits;
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

    fn client() -> (Client<StdHashMap<SocketAddr, KnownAddress>, TestClock>, ClientHandle) {
        let config = P2PConfig {
            magic: gossip_wire::Magic::from_bytes([0xf9, 0xbe, 0xb4, 0xd9]),
            listen: "127.0.0.1:0".parse().unwrap(),
            limits: Limits { max_inbound: 8, max_outbound: 8 },
            protocol: handler::Config {
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
            },
        };
        Client::new(
            config,
            StdHashMap::new(),
            TestClock(LocalTime::from_secs(1_600_000_000)),
            fastrand::Rng::with_seed(1),
            Box::new(NullChain),
            Box::new(NullMempool),
        )
    }

    #[tokio::test]
    async fn handle_command_reaches_the_client_side_channel() {
        let (client, handle) = client();

        handle.connect("18.1.2.3:8333".parse().unwrap()).await.unwrap();

        let cmd = client.commands.try_recv().expect("command should be queued");
        assert!(matches!(cmd, Command::Connect(addr) if addr == "18.1.2.3:8333".parse().unwrap()));
    }
}
