//! vsnd: paravirtualized PCM audio transport over a shared packet ring.
//!
//! A guest-side frontend and a host-side backend exchange fixed 64-byte
//! request/response packets over a single shared ring, signaled through an
//! out-of-band event channel, to implement remote PCM open/close/read/write
//! and volume control. Bulk audio data never crosses the packet ring: it is
//! passed by reference through shared pages, with a page-directory chain for
//! buffers too large to describe inline.
//!
//! The crate covers the packet protocol and its state discipline. Endpoint
//! discovery, the real page-sharing primitive and the host audio device are
//! external capabilities, consumed through the traits in [`directory`],
//! [`backend`] and [`negotiation`].
#![warn(
    missing_debug_implementations,
    redundant_lifetimes,
    non_local_definitions,
    unsafe_code
)]

pub mod backend;
pub mod constants;
pub mod correlator;
pub mod directory;
pub mod error;
pub mod format;
pub mod frontend;
pub mod negotiation;
pub mod packet;
pub mod ring;
pub mod stream;

pub use backend::{DeviceError, PcmDevice, SndBackend};
pub use correlator::{Correlator, PendingHandle};
pub use directory::{describe, resolve, DescribedBuffer, DirectoryLayout, GrantRef, PageStore};
pub use error::{DecodeError, Result, SndError};
pub use format::PcmFormat;
pub use frontend::SndFrontend;
pub use negotiation::{FaultHandler, HandshakePhase, StreamConfig, TransportParams};
pub use packet::{Codec, IdWidth, Operation, Request, RequestBody, Response, Status};
pub use ring::{event_channel_pair, EventChannel, Ring};
pub use stream::{OpenParams, Stream, StreamDirection, StreamPhase};
