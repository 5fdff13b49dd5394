use bitcoin::hashes::{sha256d, Hash};
use bitcoin::network::constants::Magic;

use crate::error::FrameError;
use crate::message::{NetworkMessage, RawNetworkMessage, MAX_PAYLOAD_SIZE};

const HEADER_LEN: usize = 24;

enum State {
    Header { buf: [u8; HEADER_LEN], filled: usize },
    Payload {
        command: [u8; 12],
        checksum: [u8; 4],
        buf: Vec<u8>,
        filled: u32,
    },
}

/// Resumable decoder for the magic-framed, length-prefixed, checksummed
/// envelope. Feed it bytes as they arrive off the socket; it yields at most
/// one complete message per call and otherwise reports `NeedMore` without
/// losing any partial state.
pub struct Decoder {
    magic: Magic,
    state: State,
}

impl Decoder {
    pub fn new(magic: Magic) -> Self {
        Decoder {
            magic,
            state: State::Header {
                buf: [0u8; HEADER_LEN],
                filled: 0,
            },
        }
    }

    /// Consume as much of `input` as is needed to produce the next message,
    /// advancing the slice past whatever bytes were used. Returns `Ok(None)`
    /// (NeedMore) if `input` ran out before a full frame was assembled.
    pub fn decode_next(
        &mut self,
        input: &mut &[u8],
    ) -> Result<Option<RawNetworkMessage>, FrameError> {
        loop {
            match &mut self.state {
                State::Header { buf, filled } => {
                    let need = HEADER_LEN - *filled;
                    let take = need.min(input.len());
                    buf[*filled..*filled + take].copy_from_slice(&input[..take]);
                    *input = &input[take..];
                    *filled += take;

                    if *filled < 4 {
                        return Ok(None);
                    }
                    if self.magic != Magic::from_bytes([buf[0], buf[1], buf[2], buf[3]]) {
                        return Err(FrameError::OutOfSync);
                    }
                    if *filled < HEADER_LEN {
                        return Ok(None);
                    }

                    let mut command = [0u8; 12];
                    command.copy_from_slice(&buf[4..16]);
                    let length = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]);
                    let mut checksum = [0u8; 4];
                    checksum.copy_from_slice(&buf[20..24]);

                    if length > MAX_PAYLOAD_SIZE {
                        return Err(FrameError::OversizedFrame {
                            len: length,
                            cap: MAX_PAYLOAD_SIZE,
                        });
                    }

                    self.state = State::Payload {
                        command,
                        checksum,
                        buf: vec![0u8; length as usize],
                        filled: 0,
                    };
                }
                State::Payload {
                    command,
                    checksum,
                    buf,
                    filled,
                } => {
                    let remaining = buf.len() - *filled as usize;
                    let take = remaining.min(input.len());
                    buf[*filled as usize..*filled as usize + take]
                        .copy_from_slice(&input[..take]);
                    *input = &input[take..];
                    *filled += take as u32;

                    if (*filled as usize) < buf.len() {
                        return Ok(None);
                    }

                    let actual = double_sha256_first4(buf);
                    if actual != *checksum {
                        return Err(FrameError::BadChecksum);
                    }

                    let cmd_str = command_string(command);
                    let payload = NetworkMessage::decode_payload(&cmd_str, buf.clone())?;
                    let message = RawNetworkMessage {
                        magic: self.magic,
                        payload,
                    };

                    self.state = State::Header {
                        buf: [0u8; HEADER_LEN],
                        filled: 0,
                    };
                    return Ok(Some(message));
                }
            }
        }
    }
}

fn double_sha256_first4(data: &[u8]) -> [u8; 4] {
    let hash = sha256d::Hash::hash(data);
    let bytes = hash.into_inner();
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

fn command_string(raw: &[u8; 12]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Encode a command/payload pair into a complete wire frame.
pub fn encode_frame(magic: Magic, message: &NetworkMessage) -> Vec<u8> {
    let command = message.cmd();
    let payload = message.encode_payload();

    let mut command_bytes = [0u8; 12];
    command_bytes[..command.len()].copy_from_slice(command.as_bytes());

    let checksum = double_sha256_first4(&payload);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&magic.to_bytes());
    out.extend_from_slice(&command_bytes);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&checksum);
    out.extend_from_slice(&payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Inventory;
    use bitcoin::hashes::sha256d::Hash as Sha256dHash;

    fn magic() -> Magic {
        Magic::from_bytes([0xf9, 0xbe, 0xb4, 0xd9])
    }

    #[test]
    fn round_trips_a_simple_message() {
        let msg = NetworkMessage::Ping(42);
        let frame = encode_frame(magic(), &msg);

        let mut decoder = Decoder::new(magic());
        let mut slice = frame.as_slice();
        let decoded = decoder.decode_next(&mut slice).unwrap().unwrap();
        assert_eq!(decoded.payload, msg);
        assert!(slice.is_empty());
    }

    #[test]
    fn tolerates_byte_at_a_time_feeding() {
        let inv = vec![Inventory::block(Sha256dHash::all_zeros())];
        let msg = NetworkMessage::Inv(inv);
        let frame = encode_frame(magic(), &msg);

        let mut decoder = Decoder::new(magic());
        let mut produced = None;
        for i in 0..frame.len() {
            let mut one_byte = &frame[i..i + 1];
            let out = decoder.decode_next(&mut one_byte).unwrap();
            if i + 1 < frame.len() {
                assert!(out.is_none(), "should need more before the last byte");
            } else {
                produced = out;
            }
        }
        assert_eq!(produced.unwrap().payload, msg);
    }

    #[test]
    fn rejects_bad_magic() {
        let msg = NetworkMessage::Verack;
        let mut frame = encode_frame(magic(), &msg);
        frame[0] ^= 0xff;

        let mut decoder = Decoder::new(magic());
        let mut slice = frame.as_slice();
        let err = decoder.decode_next(&mut slice).unwrap_err();
        assert!(matches!(err, FrameError::OutOfSync));
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let msg = NetworkMessage::Ping(7);
        let mut frame = encode_frame(magic(), &msg);
        let last = frame.len() - 1;
        frame[last] ^= 0xff;

        let mut decoder = Decoder::new(magic());
        let mut slice = frame.as_slice();
        let err = decoder.decode_next(&mut slice).unwrap_err();
        assert!(matches!(err, FrameError::BadChecksum));
        assert!(err.is_bannable());
    }

    #[test]
    fn rejects_oversized_declared_length() {
        let mut header = Vec::new();
        header.extend_from_slice(&magic().to_bytes());
        header.extend_from_slice(b"ping\0\0\0\0\0\0\0\0");
        header.extend_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_le_bytes());
        header.extend_from_slice(&[0u8; 4]);

        let mut decoder = Decoder::new(magic());
        let mut slice = header.as_slice();
        let err = decoder.decode_next(&mut slice).unwrap_err();
        assert!(matches!(err, FrameError::OversizedFrame { .. }));
    }
}
