//! Wire types and framing codec for the gossip network: the envelope
//! `{magic, command, length, checksum, payload}`, the command set the
//! dispatcher understands, and a resumable decoder that tolerates partial
//! reads without losing sync.

pub mod error;
pub mod framing;
pub mod message;

pub use bitcoin::network::address::Address;
pub use bitcoin::network::constants::Magic;
pub use bitcoin::network::message::CommandString;
pub use bitcoin::network::message_network::VersionMessage;
pub use bitcoin::{hashes::sha256d, BlockHash};

pub use error::FrameError;
pub use framing::{encode_frame, Decoder};
pub use message::{GetBlocksMessage, InvType, Inventory, NetworkMessage, RawNetworkMessage, MAX_PAYLOAD_SIZE};

/// Compact-size ("varint") length prefix used throughout the protocol:
/// 0xFD/0xFE/0xFF extend the following bytes to u16/u32/u64. `bitcoin`'s
/// `VarInt` already implements this exactly; re-exported so callers don't
/// need to depend on `bitcoin` directly for it.
pub use bitcoin::VarInt;
