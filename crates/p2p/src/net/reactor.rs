//! Single-threaded, poll-based reactor.
//!
//! One thread owns every socket. Readiness events from `popol` are
//! translated into calls on a [`StateMachine`]; the `Io` instructions it
//! emits in response are carried out here. No peer's state is ever touched
//! from another thread, so there is no synchronization inside a connection's
//! own buffers — only the bounded registry view exposed to callers needs a
//! lock, and that lives on the handler side, not here.
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{self, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, error, trace};

use crate::net::error::Error;
use crate::net::socket::{Socket, ReadError};
use crate::net::time::TimeoutManager;
use crate::net::{Disconnect, Io, Link, LocalDuration, LocalTime, Source};

/// Maximum amount of time to wait for I/O before driving a `Tick` anyway.
const WAIT_TIMEOUT: LocalDuration = LocalDuration::from_secs(1);

/// Per-direction connection admission caps (defaults mirror the spec's
/// `MaxInCons`/`MaxOutCons`).
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_inbound: usize,
    pub max_outbound: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_inbound: 8,
            max_outbound: 8,
        }
    }
}

/// A connection's protocol magic plus its queued/decoded-byte socket.
struct Peer {
    socket: Socket,
    link: Link,
}

/// A handler drivable by the reactor: translates readiness and timer events
/// into protocol actions, and emits `Io` instructions in response.
pub trait StateMachine: Iterator<Item = Io<Self::DisconnectReason>> {
    type DisconnectReason: std::fmt::Debug + std::fmt::Display + Into<Disconnect<Self::DisconnectReason>>;

    fn initialize(&mut self, _time: LocalTime) {}
    fn message_received(&mut self, addr: &SocketAddr, message: gossip_wire::NetworkMessage);
    fn attempted(&mut self, addr: &SocketAddr);
    fn connected(&mut self, addr: SocketAddr, local_addr: &SocketAddr, link: Link);
    fn disconnected(&mut self, addr: &SocketAddr, reason: Disconnect<Self::DisconnectReason>);
    fn tick(&mut self, local_time: LocalTime);
    fn timer_expired(&mut self);
}

pub struct Reactor {
    magic: gossip_wire::Magic,
    limits: Limits,
    peers: HashMap<SocketAddr, Peer>,
    connecting: HashSet<SocketAddr>,
    sources: popol::Sources<Source>,
    timeouts: TimeoutManager<()>,
    listener: Option<TcpListener>,
    in_active: usize,
    out_active: usize,
}

impl Reactor {
    pub fn new(magic: gossip_wire::Magic, limits: Limits) -> Self {
        Reactor {
            magic,
            limits,
            peers: HashMap::new(),
            connecting: HashSet::new(),
            sources: popol::Sources::new(),
            timeouts: TimeoutManager::new(LocalDuration::from_secs(1)),
            listener: None,
            in_active: 0,
            out_active: 0,
        }
    }

    pub fn in_active(&self) -> usize {
        self.in_active
    }

    pub fn out_active(&self) -> usize {
        self.out_active
    }

    /// Bind the listening socket and register it with the poller.
    pub fn listen(&mut self, addr: SocketAddr) -> Result<SocketAddr, Error> {
        let listener = listen(addr)?;
        let local_addr = listener.local_addr()?;
        self.sources.register(Source::Listener, &listener, popol::interest::READ);
        self.listener = Some(listener);
        debug!(target: "net", "listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Run one iteration of the event loop: wait for readiness or a timer,
    /// dispatch to `handler`, then drain and execute its `Io` output.
    pub fn tick<H>(&mut self, handler: &mut H) -> Result<(), Error>
    where
        H: StateMachine,
        H::DisconnectReason: Send + Sync,
    {
        let mut events = Vec::with_capacity(32);
        let result = self.sources.wait_timeout(&mut events, WAIT_TIMEOUT.into());
        let now: LocalTime = SystemTime::now().into();

        handler.tick(now);

        match result {
            Ok(_) => self.handle_events(events, handler),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                let mut woken = Vec::new();
                self.timeouts.wake(now, &mut woken);
                if !woken.is_empty() {
                    handler.timer_expired();
                }
            }
            Err(err) => return Err(err.into()),
        }

        self.process(handler, now);
        Ok(())
    }

    fn handle_events<H>(&mut self, events: Vec<popol::Event<Source>>, handler: &mut H)
    where
        H: StateMachine,
    {
        for event in events {
            match event.key {
                Source::Listener => self.handle_listener(handler),
                Source::Peer(addr) => {
                    if event.is_readable() {
                        self.handle_readable(addr, handler);
                    }
                    if event.is_writable() {
                        self.handle_writable(addr, handler);
                    }
                }
            }
        }
    }

    fn handle_listener<H: StateMachine>(&mut self, handler: &mut H) {
        let Some(listener) = &self.listener else { return };
        loop {
            let (conn, addr) = match listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(target: "net", "accept error: {}", e);
                    break;
                }
            };

            if self.in_active >= self.limits.max_inbound {
                trace!(target: "net", "{}: rejecting inbound connection, at cap", addr);
                drop(conn);
                continue;
            }
            if conn.set_nonblocking(true).is_err() {
                continue;
            }
            let local_addr = match conn.local_addr() {
                Ok(a) => a,
                Err(_) => continue,
            };

            self.register_peer(addr, conn, Link::Inbound);
            self.in_active += 1;
            handler.connected(addr, &local_addr, Link::Inbound);
        }
    }

    fn register_peer(&mut self, addr: SocketAddr, stream: TcpStream, link: Link) {
        self.sources.register(Source::Peer(addr), &stream, popol::interest::ALL);
        self.peers.insert(
            addr,
            Peer {
                socket: Socket::new(stream, self.magic),
                link,
            },
        );
    }

    fn handle_readable<H: StateMachine>(&mut self, addr: SocketAddr, handler: &mut H) {
        let Some(peer) = self.peers.get_mut(&addr) else { return };
        match peer.socket.read() {
            Ok(messages) => {
                for raw in messages {
                    handler.message_received(&addr, raw.payload);
                }
            }
            Err(ReadError::Eof) => {
                self.disconnect(addr, Disconnect::ConnectionError(Arc::new(io::Error::from(
                    io::ErrorKind::ConnectionReset,
                ))), handler);
            }
            Err(ReadError::Io(e)) => {
                self.disconnect(addr, Disconnect::ConnectionError(Arc::new(e)), handler);
            }
            Err(ReadError::Frame(e)) => {
                trace!(target: "net", "{}: frame error: {}", addr, e);
                if e.is_bannable() {
                    self.disconnect(addr, Disconnect::PeerBanned, handler);
                } else {
                    self.disconnect(
                        addr,
                        Disconnect::ConnectionError(Arc::new(io::Error::new(
                            io::ErrorKind::InvalidData,
                            e.to_string(),
                        ))),
                        handler,
                    );
                }
            }
        }
    }

    fn handle_writable<H: StateMachine>(&mut self, addr: SocketAddr, handler: &mut H) {
        let was_connecting = self.connecting.remove(&addr);
        let Some(peer) = self.peers.get_mut(&addr) else { return };

        if was_connecting {
            if let Ok(local_addr) = peer.socket.inner.local_addr() {
                let link = peer.link;
                handler.connected(addr, &local_addr, link);
            }
        }

        match peer.socket.flush(crate::net::socket::FLUSH_PER_TICK) {
            Ok(_) => {
                if peer.socket.pending_bytes() == 0 {
                    if let Some(source) = self.sources.get_mut(&Source::Peer(addr)) {
                        source.unset(popol::interest::WRITE);
                    }
                }
            }
            Err(e) => {
                self.disconnect(addr, Disconnect::ConnectionError(Arc::new(e)), handler);
            }
        }
    }

    fn disconnect<H, D>(&mut self, addr: SocketAddr, reason: Disconnect<D>, handler: &mut H)
    where
        H: StateMachine<DisconnectReason = D>,
    {
        if let Some(peer) = self.peers.remove(&addr) {
            match peer.link {
                Link::Inbound => self.in_active = self.in_active.saturating_sub(1),
                Link::Outbound => self.out_active = self.out_active.saturating_sub(1),
            }
        }
        self.connecting.remove(&addr);
        self.sources.unregister(&Source::Peer(addr));
        handler.disconnected(&addr, reason);
    }

    /// Drain and execute every `Io` instruction the handler produced.
    fn process<H>(&mut self, handler: &mut H, now: LocalTime)
    where
        H: StateMachine,
    {
        while let Some(out) = handler.next() {
            match out {
                Io::Write(addr, message) => {
                    if let Some(peer) = self.peers.get_mut(&addr) {
                        if !peer.socket.queue(self.magic, &message) {
                            trace!(target: "net", "{}: send buffer full, dropping {}", addr, message.cmd());
                            continue;
                        }
                        if let Some(source) = self.sources.get_mut(&Source::Peer(addr)) {
                            source.set(popol::interest::WRITE);
                        }
                    }
                }
                Io::Connect(addr) => self.handle_connect(addr, handler),
                Io::Disconnect(addr, reason) => self.disconnect(addr, reason, handler),
                Io::SetTimer(timeout) => {
                    self.timeouts.register((), now + timeout);
                }
                Io::Event(event) => {
                    trace!(target: "net", "event: {:?}", event);
                }
            }
        }
    }

    fn handle_connect<H: StateMachine>(&mut self, addr: SocketAddr, handler: &mut H) {
        if self.out_active >= self.limits.max_outbound {
            trace!(target: "net", "{}: refusing outbound dial, at cap", addr);
            return;
        }
        match dial(&addr) {
            Ok(stream) => {
                self.register_peer(addr, stream, Link::Outbound);
                self.connecting.insert(addr);
                self.out_active += 1;
                handler.attempted(&addr);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => {
                error!(target: "net", "{}: dial error: {}", addr, err);
                handler.disconnected(&addr, Disconnect::DialError(Arc::new(err)));
            }
        }
    }
}

/// Non-blocking connect, IPv4-only per the spec's listening-socket scope.
fn dial(addr: &SocketAddr) -> Result<net::TcpStream, io::Error> {
    use socket2::{Domain, Socket as Socket2, Type};

    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let sock = Socket2::new(domain, Type::STREAM, None)?;
    sock.set_nonblocking(true)?;

    match sock.connect(&(*addr).into()) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) if e.raw_os_error() == Some(libc::EALREADY) => {
            return Err(io::Error::from(io::ErrorKind::AlreadyExists))
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(e),
    }
    Ok(sock.into())
}

fn listen<A: net::ToSocketAddrs>(addr: A) -> Result<net::TcpListener, Error> {
    let sock = net::TcpListener::bind(addr)?;
    sock.set_nonblocking(true)?;
    Ok(sock)
}
