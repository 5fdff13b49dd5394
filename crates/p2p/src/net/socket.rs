//! Per-connection buffered socket: a resumable frame decoder on the read
//! side, and a capped write queue with a flush cursor on the write side.
use std::io::{self, Read, Write};
use std::net::TcpStream;

use gossip_wire::{encode_frame, Decoder, Magic, NetworkMessage, RawNetworkMessage};

/// Hard cap on buffered-but-unsent bytes. Exceeding it refuses the write
/// outright rather than growing the buffer unbounded.
pub const MAX_SEND_BUFFER: usize = 1024 * 1024;

/// Soft cap used by responder handlers (`getdata`, `getblocks`, `addr`) as a
/// coarse fairness gate: once this many bytes are queued, stop enqueueing
/// more work for this peer on this pass.
pub const SOFT_SEND_BUFFER: usize = 32 * 1024;

/// Bytes flushed to the socket per `Tick`, so one busy peer can't starve the
/// others sharing the reactor's attention.
pub const FLUSH_PER_TICK: usize = 4096;

/// Read chunk size per readiness event.
const READ_CHUNK: usize = 64 * 1024;

pub struct Socket {
    pub inner: TcpStream,
    decoder: Decoder,
    send_buf: Vec<u8>,
    sofar: usize,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl Socket {
    pub fn new(inner: TcpStream, magic: Magic) -> Self {
        Socket {
            inner,
            decoder: Decoder::new(magic),
            send_buf: Vec::new(),
            sofar: 0,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Read whatever is available without blocking and decode every
    /// complete frame it yields. A read returning `WouldBlock` is not an
    /// error: the caller advances to `Tick` exactly as if a short read
    /// deadline had expired.
    pub fn read(&mut self) -> Result<Vec<RawNetworkMessage>, ReadError> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut messages = Vec::new();

        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(ReadError::Eof),
                Ok(n) => {
                    self.bytes_received += n as u64;
                    let mut slice = &chunk[..n];
                    while !slice.is_empty() {
                        match self.decoder.decode_next(&mut slice) {
                            Ok(Some(msg)) => messages.push(msg),
                            Ok(None) => break,
                            Err(e) => return Err(ReadError::Frame(e)),
                        }
                    }
                    if n < chunk.len() {
                        return Ok(messages);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(messages),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ReadError::Io(e)),
            }
        }
    }

    /// Queue a message for sending. Refuses (returning `false`) rather than
    /// exceeding the hard cap; the caller logs the drop.
    pub fn queue(&mut self, magic: Magic, message: &NetworkMessage) -> bool {
        let frame = encode_frame(magic, message);
        if self.pending_bytes() + frame.len() > MAX_SEND_BUFFER {
            return false;
        }
        self.send_buf.extend_from_slice(&frame);
        true
    }

    /// Bytes currently queued but not yet written to the socket.
    pub fn pending_bytes(&self) -> usize {
        self.send_buf.len() - self.sofar
    }

    pub fn is_send_buffer_above_soft_cap(&self) -> bool {
        self.pending_bytes() >= SOFT_SEND_BUFFER
    }

    /// Flush up to `max_bytes` from the front of the send buffer. Returns the
    /// number of bytes actually written (0 if the buffer was empty or the
    /// socket would block).
    pub fn flush(&mut self, max_bytes: usize) -> io::Result<usize> {
        if self.pending_bytes() == 0 {
            return Ok(0);
        }
        let end = (self.sofar + max_bytes).min(self.send_buf.len());
        match self.inner.write(&self.send_buf[self.sofar..end]) {
            Ok(0) => Ok(0),
            Ok(n) => {
                self.sofar += n;
                self.bytes_sent += n as u64;
                if self.sofar == self.send_buf.len() {
                    self.send_buf.clear();
                    self.sofar = 0;
                }
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug)]
pub enum ReadError {
    /// The peer closed the connection.
    Eof,
    Io(io::Error),
    Frame(gossip_wire::FrameError),
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::Eof => write!(f, "connection closed by peer"),
            ReadError::Io(e) => write!(f, "{}", e),
            ReadError::Frame(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ReadError {}
