use std::io;

use bitcoin::consensus::encode::{self, CheckedData};
use bitcoin::consensus::{Decodable, Encodable};
use bitcoin::hashes::sha256d;
use bitcoin::network::address::Address;
use bitcoin::network::message::CommandString;
use bitcoin::network::message_network::VersionMessage;
use bitcoin::BlockHash;

/// Sanity cap on a declared payload length, independent of the checksum.
/// Frames that claim more than this are rejected before the payload is read.
pub const MAX_PAYLOAD_SIZE: u32 = 32 * 1024 * 1024;

/// Inventory item kind, as carried in `inv`/`getdata` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvType {
    Tx,
    Block,
    Unknown(u32),
}

impl From<u32> for InvType {
    fn from(v: u32) -> Self {
        match v {
            1 => InvType::Tx,
            2 => InvType::Block,
            other => InvType::Unknown(other),
        }
    }
}

impl From<InvType> for u32 {
    fn from(t: InvType) -> Self {
        match t {
            InvType::Tx => 1,
            InvType::Block => 2,
            InvType::Unknown(v) => v,
        }
    }
}

/// A single `{type, hash}` inventory record, 36 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Inventory {
    pub inv_type: InvType,
    pub hash: sha256d::Hash,
}

impl Inventory {
    pub fn block(hash: sha256d::Hash) -> Self {
        Inventory {
            inv_type: InvType::Block,
            hash,
        }
    }

    pub fn tx(hash: sha256d::Hash) -> Self {
        Inventory {
            inv_type: InvType::Tx,
            hash,
        }
    }
}

impl Encodable for Inventory {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;
        len += u32::from(self.inv_type).consensus_encode(w)?;
        len += self.hash.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for Inventory {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        let inv_type = u32::consensus_decode(r)?.into();
        let hash = Decodable::consensus_decode(r)?;
        Ok(Inventory { inv_type, hash })
    }
}

/// Payload of `getblocks`: a locator of block hashes the sender already has,
/// plus a hash at which the responder should stop walking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlocksMessage {
    pub version: u32,
    pub locator_hashes: Vec<BlockHash>,
    pub stop_hash: BlockHash,
}

impl GetBlocksMessage {
    pub fn new(version: u32, locator_hashes: Vec<BlockHash>, stop_hash: BlockHash) -> Self {
        GetBlocksMessage {
            version,
            locator_hashes,
            stop_hash,
        }
    }
}

impl Encodable for GetBlocksMessage {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;
        len += self.version.consensus_encode(w)?;
        len += self.locator_hashes.consensus_encode(w)?;
        len += self.stop_hash.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for GetBlocksMessage {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(GetBlocksMessage {
            version: Decodable::consensus_decode(r)?,
            locator_hashes: Decodable::consensus_decode(r)?,
            stop_hash: Decodable::consensus_decode(r)?,
        })
    }
}

/// A decoded, dispatch-ready wire message. Variants mirror the command table
/// of the dispatcher; anything else is carried as `Unknown` and logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMessage {
    Version(VersionMessage),
    Verack,
    Inv(Vec<Inventory>),
    GetData(Vec<Inventory>),
    GetBlocks(GetBlocksMessage),
    GetAddr,
    Addr(Vec<(u32, Address)>),
    Block(Vec<u8>),
    Tx(Vec<u8>),
    Ping(u64),
    Pong(u64),
    Alert(Vec<u8>),
    Unknown { command: CommandString, payload: Vec<u8> },
}

impl NetworkMessage {
    pub fn cmd(&self) -> &'static str {
        match self {
            NetworkMessage::Version(_) => "version",
            NetworkMessage::Verack => "verack",
            NetworkMessage::Inv(_) => "inv",
            NetworkMessage::GetData(_) => "getdata",
            NetworkMessage::GetBlocks(_) => "getblocks",
            NetworkMessage::GetAddr => "getaddr",
            NetworkMessage::Addr(_) => "addr",
            NetworkMessage::Block(_) => "block",
            NetworkMessage::Tx(_) => "tx",
            NetworkMessage::Ping(_) => "ping",
            NetworkMessage::Pong(_) => "pong",
            NetworkMessage::Alert(_) => "alert",
            NetworkMessage::Unknown { .. } => "unknown",
        }
    }

    pub fn command(&self) -> CommandString {
        match self {
            NetworkMessage::Unknown { command, .. } => command.clone(),
            other => CommandString::try_from_static(other.cmd()).expect("cmd returns valid commands"),
        }
    }

    /// Serialize just the payload, independent of the envelope. Used by the
    /// framing codec, which owns magic/command/length/checksum itself.
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            NetworkMessage::Version(m) => serialize_payload(m),
            NetworkMessage::Inv(v) => serialize_payload(v),
            NetworkMessage::GetData(v) => serialize_payload(v),
            NetworkMessage::GetBlocks(m) => serialize_payload(m),
            NetworkMessage::Addr(v) => serialize_payload(v),
            NetworkMessage::Ping(n) => serialize_payload(n),
            NetworkMessage::Pong(n) => serialize_payload(n),
            NetworkMessage::Block(raw) | NetworkMessage::Tx(raw) | NetworkMessage::Alert(raw) => {
                raw.clone()
            }
            NetworkMessage::Unknown { payload, .. } => payload.clone(),
            NetworkMessage::Verack | NetworkMessage::GetAddr => vec![],
        }
    }

    /// Parse a payload given the already-validated command string. Shared by
    /// the resumable frame decoder and the in-memory `Decodable` impl below.
    pub fn decode_payload(command: &str, raw: Vec<u8>) -> Result<NetworkMessage, encode::Error> {
        let mut cursor = io::Cursor::new(raw.clone());
        Ok(match command {
            "version" => NetworkMessage::Version(Decodable::consensus_decode(&mut cursor)?),
            "verack" => NetworkMessage::Verack,
            "inv" => NetworkMessage::Inv(Decodable::consensus_decode(&mut cursor)?),
            "getdata" => NetworkMessage::GetData(Decodable::consensus_decode(&mut cursor)?),
            "getblocks" => NetworkMessage::GetBlocks(Decodable::consensus_decode(&mut cursor)?),
            "getaddr" => NetworkMessage::GetAddr,
            "addr" => NetworkMessage::Addr(Decodable::consensus_decode(&mut cursor)?),
            "block" => NetworkMessage::Block(raw),
            "tx" => NetworkMessage::Tx(raw),
            "ping" => NetworkMessage::Ping(Decodable::consensus_decode(&mut cursor)?),
            "pong" => NetworkMessage::Pong(Decodable::consensus_decode(&mut cursor)?),
            "alert" => NetworkMessage::Alert(raw),
            other => NetworkMessage::Unknown {
                command: CommandString::try_from(other.to_string())
                    .unwrap_or_else(|_| CommandString::try_from_static("unknown").unwrap()),
                payload: raw,
            },
        })
    }
}

/// The full envelope: magic plus a decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNetworkMessage {
    pub magic: bitcoin::network::constants::Magic,
    pub payload: NetworkMessage,
}

impl RawNetworkMessage {
    pub fn command(&self) -> CommandString {
        self.payload.command()
    }
}

fn serialize_payload<T: Encodable + ?Sized>(data: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    let len = data
        .consensus_encode(&mut buf)
        .expect("in-memory writers don't error");
    debug_assert_eq!(len, buf.len());
    buf
}

impl Encodable for RawNetworkMessage {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;
        len += self.magic.consensus_encode(w)?;
        len += self.command().consensus_encode(w)?;
        len += CheckedData(self.payload.encode_payload()).consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for RawNetworkMessage {
    fn consensus_decode_from_finite_reader<R: io::Read + ?Sized>(
        r: &mut R,
    ) -> Result<Self, encode::Error> {
        let magic = Decodable::consensus_decode(r)?;
        let cmd = CommandString::consensus_decode(r)?;
        let raw_payload = CheckedData::consensus_decode(r)?.0;
        let payload = NetworkMessage::decode_payload(&cmd.to_string(), raw_payload)?;
        Ok(RawNetworkMessage { magic, payload })
    }

    #[inline]
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Self::consensus_decode_from_finite_reader(r.take(MAX_PAYLOAD_SIZE as u64).by_ref())
    }
}
