//! Wire codec: bit-exact encode/decode of the fixed 64-byte request and
//! response packets, and of the shared volume page.
//!
//! All integers are little-endian. Reserved bytes are written as zero and
//! ignored on decode, so packets from a peer with a newer revision that only
//! adds fields in the padding still decode.

use bytes::{Buf, BufMut};

use crate::constants::*;
use crate::directory::GrantRef;
use crate::error::DecodeError;
use crate::format::PcmFormat;

/// One ring slot.
pub type Slot = [u8; PACKET_SIZE];

/// Width of the correlation id on the wire.
///
/// The protocol has been revised with differing id field widths; the width is
/// fixed per connection, not per packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdWidth {
    U8,
    #[default]
    U16,
}

impl IdWidth {
    pub fn max_id(self) -> u16 {
        match self {
            IdWidth::U8 => u8::MAX as u16,
            IdWidth::U16 => u16::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Open,
    Close,
    Read,
    Write,
    SetVolume,
    GetVolume,
    Mute,
    Unmute,
}

impl Operation {
    pub fn from_wire(code: u8) -> Result<Self, DecodeError> {
        Ok(match code {
            OP_OPEN => Operation::Open,
            OP_CLOSE => Operation::Close,
            OP_READ => Operation::Read,
            OP_WRITE => Operation::Write,
            OP_SET_VOLUME => Operation::SetVolume,
            OP_GET_VOLUME => Operation::GetVolume,
            OP_MUTE => Operation::Mute,
            OP_UNMUTE => Operation::Unmute,
            other => return Err(DecodeError::UnknownOperation(other)),
        })
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Operation::Open => OP_OPEN,
            Operation::Close => OP_CLOSE,
            Operation::Read => OP_READ,
            Operation::Write => OP_WRITE,
            Operation::SetVolume => OP_SET_VOLUME,
            Operation::GetVolume => OP_GET_VOLUME,
            Operation::Mute => OP_MUTE,
            Operation::Unmute => OP_UNMUTE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Okay,
    Error,
}

impl Status {
    pub fn from_wire(code: i8) -> Self {
        if code == RSP_OKAY {
            Status::Okay
        } else {
            Status::Error
        }
    }

    pub fn to_wire(self) -> i8 {
        match self {
            Status::Okay => RSP_OKAY,
            Status::Error => RSP_ERROR,
        }
    }
}

/// Page references carried by a read/write request.
///
/// The count of meaningful references is derived from the request `length`:
/// a buffer of n = ceil(length / PAGE_SIZE) pages is carried as n inline data
/// references when n <= MAX_INLINE_GREFS, and as a single reference to the
/// head of a directory chain otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferRefs {
    Inline(Vec<GrantRef>),
    Directory(GrantRef),
}

/// Number of data pages needed for a buffer of `length` bytes.
pub fn pages_for(length: u32) -> usize {
    (length as usize).div_ceil(PAGE_SIZE)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Open {
        pcm_format: PcmFormat,
        pcm_channels: u8,
        pcm_rate: u32,
    },
    Close,
    Read {
        length: u32,
        refs: BufferRefs,
    },
    Write {
        length: u32,
        refs: BufferRefs,
    },
    SetVolume {
        gref: GrantRef,
    },
    GetVolume {
        gref: GrantRef,
    },
    Mute,
    Unmute,
}

impl RequestBody {
    pub fn operation(&self) -> Operation {
        match self {
            RequestBody::Open { .. } => Operation::Open,
            RequestBody::Close => Operation::Close,
            RequestBody::Read { .. } => Operation::Read,
            RequestBody::Write { .. } => Operation::Write,
            RequestBody::SetVolume { .. } => Operation::SetVolume,
            RequestBody::GetVolume { .. } => Operation::GetVolume,
            RequestBody::Mute => Operation::Mute,
            RequestBody::Unmute => Operation::Unmute,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: u16,
    pub stream_idx: u8,
    pub body: RequestBody,
}

impl Request {
    pub fn operation(&self) -> Operation {
        self.body.operation()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub id: u16,
    pub operation: Operation,
    pub stream_idx: u8,
    pub status: Status,
}

/// Packet codec for one connection. Holds the negotiated id width.
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    pub id_width: IdWidth,
}

impl Codec {
    pub fn new(id_width: IdWidth) -> Self {
        Self { id_width }
    }

    fn put_id(&self, buf: &mut &mut [u8], id: u16) -> Result<(), DecodeError> {
        if id > self.id_width.max_id() {
            return Err(DecodeError::IdOutOfRange(id));
        }
        match self.id_width {
            IdWidth::U8 => {
                buf.put_u8(id as u8);
                buf.put_u8(0);
            }
            IdWidth::U16 => buf.put_u16_le(id),
        }
        Ok(())
    }

    fn get_id(&self, buf: &mut &[u8]) -> u16 {
        match self.id_width {
            IdWidth::U8 => {
                let id = buf.get_u8() as u16;
                buf.advance(1);
                id
            }
            IdWidth::U16 => buf.get_u16_le(),
        }
    }

    pub fn encode_request(&self, req: &Request) -> Result<Slot, DecodeError> {
        let mut slot: Slot = [0; PACKET_SIZE];
        let mut buf = &mut slot[..];

        self.put_id(&mut buf, req.id)?;
        buf.put_u8(req.operation().to_wire());
        buf.put_u8(req.stream_idx);

        match &req.body {
            RequestBody::Open {
                pcm_format,
                pcm_channels,
                pcm_rate,
            } => {
                buf.put_u32_le(*pcm_rate);
                buf.put_u8(pcm_format.to_wire());
                buf.put_u8(*pcm_channels);
            }
            RequestBody::Read { length, refs } | RequestBody::Write { length, refs } => {
                buf.put_u32_le(*length);
                match refs {
                    BufferRefs::Inline(grefs) => {
                        debug_assert!(grefs.len() <= MAX_INLINE_GREFS);
                        debug_assert_eq!(grefs.len(), pages_for(*length));
                        for gref in grefs {
                            buf.put_u32_le(*gref);
                        }
                    }
                    BufferRefs::Directory(head) => {
                        debug_assert!(pages_for(*length) > MAX_INLINE_GREFS);
                        buf.put_u32_le(*head);
                    }
                }
            }
            RequestBody::SetVolume { gref } | RequestBody::GetVolume { gref } => {
                buf.put_u32_le(*gref);
            }
            RequestBody::Close | RequestBody::Mute | RequestBody::Unmute => {}
        }

        Ok(slot)
    }

    pub fn decode_request(&self, bytes: &[u8]) -> Result<Request, DecodeError> {
        if bytes.len() != PACKET_SIZE {
            return Err(DecodeError::BadLength(bytes.len()));
        }
        let mut buf = bytes;

        let id = self.get_id(&mut buf);
        let operation = Operation::from_wire(buf.get_u8())?;
        let stream_idx = buf.get_u8();

        let body = match operation {
            Operation::Open => {
                let pcm_rate = buf.get_u32_le();
                let pcm_format = PcmFormat::from_wire(buf.get_u8())?;
                let pcm_channels = buf.get_u8();
                if pcm_channels == 0 || pcm_channels > PCM_CHANNELS_MAX {
                    return Err(DecodeError::BadChannelCount(pcm_channels));
                }
                RequestBody::Open {
                    pcm_format,
                    pcm_channels,
                    pcm_rate,
                }
            }
            Operation::Read | Operation::Write => {
                let length = buf.get_u32_le();
                let pages = pages_for(length);
                let refs = if pages <= MAX_INLINE_GREFS {
                    let mut grefs = Vec::with_capacity(pages);
                    for _ in 0..pages {
                        grefs.push(buf.get_u32_le());
                    }
                    BufferRefs::Inline(grefs)
                } else {
                    BufferRefs::Directory(buf.get_u32_le())
                };
                if operation == Operation::Read {
                    RequestBody::Read { length, refs }
                } else {
                    RequestBody::Write { length, refs }
                }
            }
            Operation::SetVolume => RequestBody::SetVolume {
                gref: buf.get_u32_le(),
            },
            Operation::GetVolume => RequestBody::GetVolume {
                gref: buf.get_u32_le(),
            },
            Operation::Close => RequestBody::Close,
            Operation::Mute => RequestBody::Mute,
            Operation::Unmute => RequestBody::Unmute,
        };

        Ok(Request {
            id,
            stream_idx,
            body,
        })
    }

    pub fn encode_response(&self, rsp: &Response) -> Result<Slot, DecodeError> {
        let mut slot: Slot = [0; PACKET_SIZE];
        let mut buf = &mut slot[..];

        self.put_id(&mut buf, rsp.id)?;
        buf.put_u8(rsp.operation.to_wire());
        buf.put_u8(rsp.stream_idx);
        buf.put_i8(rsp.status.to_wire());

        Ok(slot)
    }

    pub fn decode_response(&self, bytes: &[u8]) -> Result<Response, DecodeError> {
        if bytes.len() != PACKET_SIZE {
            return Err(DecodeError::BadLength(bytes.len()));
        }
        let mut buf = bytes;

        let id = self.get_id(&mut buf);
        let operation = Operation::from_wire(buf.get_u8())?;
        let stream_idx = buf.get_u8();
        let status = Status::from_wire(buf.get_i8());

        Ok(Response {
            id,
            operation,
            stream_idx,
            status,
        })
    }
}

/// Writes per-channel gains into a shared volume page.
///
/// Gains are signed, in steps of 0.001 dB, 0 meaning 0 dB. Slots past the
/// channel count are zeroed.
pub fn encode_volume_page(gains: &[i32], page: &mut [u8]) {
    debug_assert!(gains.len() <= VOLUME_CHANNELS_MAX);
    debug_assert!(page.len() >= VOLUME_CHANNELS_MAX * 4);
    let mut buf = &mut page[..];
    for i in 0..VOLUME_CHANNELS_MAX {
        buf.put_i32_le(gains.get(i).copied().unwrap_or(0));
    }
}

/// Reads the first `channels` gains from a shared volume page.
pub fn decode_volume_page(page: &[u8], channels: usize) -> Vec<i32> {
    debug_assert!(channels <= VOLUME_CHANNELS_MAX);
    let mut buf = page;
    (0..channels).map(|_| buf.get_i32_le()).collect()
}
