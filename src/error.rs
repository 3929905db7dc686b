use crate::directory::GrantRef;

/// A packet that could not be decoded. Always connection-fatal.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet length {0}, expected 64")]
    BadLength(usize),

    #[error("unknown operation code {0}")]
    UnknownOperation(u8),

    #[error("unknown PCM format code {0}")]
    UnknownFormat(u8),

    #[error("channel count {0} out of range")]
    BadChannelCount(u8),

    #[error("id {0} out of range for the configured id width")]
    IdOutOfRange(u16),
}

#[derive(thiserror::Error, Debug)]
pub enum SndError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Transient backpressure: the request ring has no free slot (or the id
    /// space is exhausted). Retry after the peer drains.
    #[error("ring full")]
    RingFull,

    /// Producer/consumer index invariant violated. Connection-fatal.
    #[error("ring overrun: consumer {cons} producer {prod} capacity {capacity}")]
    RingOverrun { prod: u32, cons: u32, capacity: u32 },

    /// A response matched no pending request, or a request completed twice.
    /// The correlator state can no longer be trusted. Connection-fatal.
    #[error("protocol violation: {reason} (id {id})")]
    ProtocolViolation { id: u16, reason: &'static str },

    /// A buffer-directory entry could not be mapped. Surfaced as an Error
    /// status on the request it belongs to; the connection survives.
    #[error("dangling grant reference {0}")]
    DanglingReference(GrantRef),

    /// Directory chain exceeded the hop bound, i.e. it loops or is malformed.
    #[error("buffer directory chain exceeded {0} pages")]
    DirectoryLoop(usize),

    /// Operation invalid for the stream's current lifecycle phase. Rejected
    /// locally, before any packet is built.
    #[error("stream {stream}: operation invalid in state {state}")]
    InvalidState { stream: u8, state: &'static str },

    /// Read on a playback stream or write on a capture stream.
    #[error("stream {stream}: operation does not match stream direction")]
    WrongDirection { stream: u8 },

    /// Open parameters outside the stream's negotiated envelope. Rejected
    /// locally, like other caller errors.
    #[error("stream {stream}: open parameters outside the negotiated envelope")]
    OutsideEnvelope { stream: u8 },

    /// The host audio device reported a failure; surfaced to the peer as an
    /// Error status, never as a dead connection.
    #[error("device error: {0}")]
    Device(String),

    /// The connection saw a fatal fault earlier; all further ops fail fast.
    #[error("connection failed")]
    ConnectionFailed,

    #[error("negotiation error: {0}")]
    Negotiation(String),
}

impl SndError {
    /// Whether this error must tear down the connection (as opposed to being
    /// retried or surfaced as a per-request failure).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SndError::Decode(_)
                | SndError::RingOverrun { .. }
                | SndError::ProtocolViolation { .. }
                | SndError::ConnectionFailed
        )
    }
}

pub type Result<T> = std::result::Result<T, SndError>;
