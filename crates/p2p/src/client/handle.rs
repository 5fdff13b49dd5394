//! The handle applications hold to drive the engine from outside its own
//! thread: send a [`Command`], or subscribe to the [`Event`] stream.
use std::net::SocketAddr;

use async_trait::async_trait;
use bitcoin::hashes::sha256d;
use flume as chan;
use thiserror::Error;

use crate::fsm::event::Event;
use crate::fsm::handler::Command;

/// An error resulting from a handle method.
#[derive(Error, Debug)]
pub enum Error {
    /// The command channel disconnected.
    #[error("command channel disconnected")]
    Disconnected,
    /// The command could not be delivered.
    #[error("command failed")]
    Command,
}

impl<T> From<chan::SendError<T>> for Error {
    fn from(_: chan::SendError<T>) -> Self {
        Self::Disconnected
    }
}

impl From<chan::RecvError> for Error {
    fn from(_: chan::RecvError) -> Self {
        Self::Disconnected
    }
}

/// A handle for communicating with a running engine. The reactor itself is
/// synchronous and single-threaded; this trait is the async-friendly façade
/// applications hold onto, backed by a channel into that thread.
#[async_trait]
pub trait Handle: Sized + Send + Sync + Clone {
    /// Send a command to the engine.
    async fn command(&self, cmd: Command) -> Result<(), Error>;

    /// Ask the registry to dial an address.
    async fn connect(&self, addr: SocketAddr) -> Result<(), Error> {
        self.command(Command::Connect(addr)).await
    }

    /// Drop a peer connection.
    async fn disconnect(&self, addr: SocketAddr) -> Result<(), Error> {
        self.command(Command::Disconnect(addr)).await
    }

    /// Request a `PeerEvent::Connected` event per currently-negotiated peer.
    async fn get_peers(&self) -> Result<(), Error> {
        self.command(Command::GetPeers).await
    }

    /// Seed the address book with externally-supplied addresses.
    async fn import_addresses(&self, addrs: Vec<SocketAddr>) -> Result<(), Error> {
        self.command(Command::ImportAddresses(addrs)).await
    }

    /// Announce an inventory item to every negotiated peer.
    async fn send_inv(&self, hash: sha256d::Hash, is_block: bool) -> Result<(), Error> {
        self.command(Command::SendInv { hash, is_block }).await
    }

    /// Ban and drop a peer.
    async fn ban_peer(&self, addr: SocketAddr) -> Result<(), Error> {
        self.command(Command::BanPeer(addr)).await
    }

    /// Subscribe to the engine's event stream. Cloning the handle does not
    /// fork the stream; every clone observes the same events.
    fn events(&self) -> chan::Receiver<Event>;
}

#[cfg(any(test, feature = "mocks"))]
mockall::mock! {
    pub Handle {}

    impl Clone for Handle {
        fn clone(&self) -> Self;
    }

    #[async_trait]
    impl Handle for Handle {
        async fn command(&self, cmd: Command) -> Result<(), Error>;
        fn events(&self) -> chan::Receiver<Event>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_mock() {
        let mut _mock = MockHandle::new();
    }

    #[tokio::test]
    async fn connect_delegates_to_command() {
        let addr: SocketAddr = "18.1.2.3:8333".parse().unwrap();
        let mut mock = MockHandle::new();
        mock.expect_command()
            .withf(move |cmd| matches!(cmd, Command::Connect(a) if *a == addr))
            .times(1)
            .returning(|_| Ok(()));

        mock.connect(addr).await.unwrap();
    }

    #[tokio::test]
    async fn ban_peer_delegates_to_command() {
        let addr: SocketAddr = "18.1.2.3:8333".parse().unwrap();
        let mut mock = MockHandle::new();
        mock.expect_command()
            .withf(move |cmd| matches!(cmd, Command::BanPeer(a) if *a == addr))
            .times(1)
            .returning(|_| Ok(()));

        mock.ban_peer(addr).await.unwrap();
    }
}
