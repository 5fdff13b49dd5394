use std::fmt;

/// Faults surfaced by the framing codec. These are distinct from ordinary
/// I/O errors: each one tells the caller whether the connection is merely
/// done for (`OutOfSync`) or should additionally be banned.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The first four bytes of a frame did not match the network magic.
    /// Fatal for the connection, but not itself grounds for a ban: a stale
    /// or misconfigured client can trigger this honestly.
    #[error("magic mismatch: frame out of sync")]
    OutOfSync,

    /// The payload's double-SHA256 checksum did not match the declared
    /// checksum. Fatal, and the peer is flagged for banning.
    #[error("checksum mismatch")]
    BadChecksum,

    /// The declared payload length exceeds the sanity cap.
    #[error("oversized frame: declared length {len} exceeds cap {cap}")]
    OversizedFrame { len: u32, cap: u32 },

    /// The payload decoded past the checksum stage but failed to parse into
    /// a known command's fields (e.g. a truncated `version` payload).
    #[error("payload decode error: {0}")]
    Decode(#[from] bitcoin::consensus::encode::Error),
}

impl FrameError {
    /// Whether this fault warrants telling the peer database to ban the
    /// remote address, per the DoS policy.
    pub fn is_bannable(&self) -> bool {
        matches!(
            self,
            FrameError::BadChecksum | FrameError::OversizedFrame { .. } | FrameError::Decode(_)
        )
    }
}

impl fmt::Display for crate::message::NetworkMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cmd())
    }
}
