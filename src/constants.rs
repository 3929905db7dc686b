/// Size of every request and response packet on the ring, in bytes.
pub const PACKET_SIZE: usize = 64;

/// Size of a shared page, in bytes.
pub const PAGE_SIZE: usize = 4096;

// Operation codes.
pub const OP_OPEN: u8 = 0;
pub const OP_CLOSE: u8 = 1;
pub const OP_READ: u8 = 2;
pub const OP_WRITE: u8 = 3;
pub const OP_SET_VOLUME: u8 = 4;
pub const OP_GET_VOLUME: u8 = 5;
pub const OP_MUTE: u8 = 6;
pub const OP_UNMUTE: u8 = 7;

// Response status codes.
pub const RSP_OKAY: i8 = 0;
pub const RSP_ERROR: i8 = -1;

/// Maximum number of page references carried inline in a read/write packet.
/// Buffers needing more pages go through a directory chain instead.
pub const MAX_INLINE_GREFS: usize = 10;

/// Number of volume slots in a shared volume page, one per channel.
pub const VOLUME_CHANNELS_MAX: usize = 128;

/// Maximum channel count a stream may be opened with.
pub const PCM_CHANNELS_MAX: u8 = 128;

/// Upper bound on directory pages walked while resolving a buffer, guarding
/// against a malformed or adversarial `next` cycle.
pub const DIRECTORY_MAX_HOPS: usize = 4096;

/// Grant references fitting in one directory page after the next/count header.
pub const GREFS_PER_DIRECTORY_PAGE: usize = (PAGE_SIZE - 8) / 4;

/// Default slot count per ring direction.
pub const DEFAULT_RING_CAPACITY: u32 = 32;

// Negotiation key names and field values.
pub const FIELD_RING_REF: &str = "ring-ref";
pub const FIELD_EVT_CHNL: &str = "event-channel";
pub const FIELD_STREAM_INDEX: &str = "index";
pub const FIELD_TYPE: &str = "type";
pub const FIELD_CHANNELS_MIN: &str = "channels-min";
pub const FIELD_CHANNELS_MAX: &str = "channels-max";
pub const FIELD_SAMPLE_RATES: &str = "sample-rates";
pub const FIELD_SAMPLE_FORMATS: &str = "sample-formats";
pub const FIELD_BUFFER_SIZE: &str = "buffer-size";

pub const LIST_SEPARATOR: &str = ";";

pub const STREAM_TYPE_PLAYBACK: &str = "p";
pub const STREAM_TYPE_CAPTURE: &str = "c";
