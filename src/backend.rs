//! Backend connection: drains requests from the ring, executes them against
//! the host audio device and the shared pages, and enqueues responses.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::constants::PAGE_SIZE;
use crate::directory::{self, DirectoryLayout, PageMapper, PageWriter};
use crate::error::{Result, SndError};
use crate::negotiation::StreamConfig;
use crate::packet::{
    decode_volume_page, encode_volume_page, pages_for, BufferRefs, Codec, Request, RequestBody,
    Response, Status,
};
use crate::ring::{EventChannel, Ring};
use crate::stream::{OpenParams, Stream};

/// Failure reported by the host audio device. Becomes an Error status on the
/// request being serviced.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{0}")]
pub struct DeviceError(pub String);

/// The host audio capability the backend mediates.
pub trait PcmDevice: Send {
    fn open(&mut self, stream_idx: u8, params: OpenParams) -> std::result::Result<(), DeviceError>;
    fn close(&mut self, stream_idx: u8) -> std::result::Result<(), DeviceError>;
    fn write(&mut self, stream_idx: u8, data: &[u8]) -> std::result::Result<(), DeviceError>;
    fn read(&mut self, stream_idx: u8, data: &mut [u8]) -> std::result::Result<(), DeviceError>;
    fn set_volume(&mut self, stream_idx: u8, gains: &[i32]) -> std::result::Result<(), DeviceError>;
    fn get_volume(&mut self, stream_idx: u8) -> std::result::Result<Vec<i32>, DeviceError>;
    fn mute(&mut self, stream_idx: u8) -> std::result::Result<(), DeviceError>;
    fn unmute(&mut self, stream_idx: u8) -> std::result::Result<(), DeviceError>;
}

#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    pub requests_rx: u64,
    pub responses_tx: u64,
    pub notifications_tx: u64,
    pub request_errors: u64,
}

/// The host side of a connection.
pub struct SndBackend<D, M> {
    codec: Codec,
    ring: Arc<Mutex<Ring>>,
    evt: EventChannel,
    device: D,
    pages: M,
    layout: DirectoryLayout,
    streams: HashMap<u8, Stream>,
    stats: BackendStats,
}

impl<D, M> std::fmt::Debug for SndBackend<D, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SndBackend")
            .field("streams", &self.streams.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl<D, M> SndBackend<D, M>
where
    D: PcmDevice,
    M: PageMapper + PageWriter + Send,
{
    pub fn new(
        ring: Arc<Mutex<Ring>>,
        evt: EventChannel,
        codec: Codec,
        streams: &[StreamConfig],
        device: D,
        pages: M,
    ) -> Self {
        let streams = streams
            .iter()
            .map(|cfg| (cfg.index, Stream::new(cfg.index, cfg.direction)))
            .collect();
        Self {
            codec,
            ring,
            evt,
            device,
            pages,
            layout: DirectoryLayout::default(),
            streams,
            stats: BackendStats::default(),
        }
    }

    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    /// Drains and services every available request, then signals the peer if
    /// its hold-off threshold was crossed. Safe to call speculatively.
    ///
    /// Errors are connection-fatal (undecodable request, corrupt indices);
    /// per-request failures become Error-status responses instead.
    pub async fn process_available(&mut self) -> Result<usize> {
        let ring_arc = Arc::clone(&self.ring);
        let mut ring = ring_arc.lock().await;
        let mut handled = 0;

        loop {
            let slots = ring.req.dequeue_available()?;
            for slot in &slots {
                let request = self.codec.decode_request(slot)?;
                let status = self.execute(&request);
                if status == Status::Error {
                    self.stats.request_errors += 1;
                }
                let response = Response {
                    id: request.id,
                    operation: request.operation(),
                    stream_idx: request.stream_idx,
                    status,
                };
                let encoded = self.codec.encode_response(&response)?;
                if !ring.rsp.try_enqueue(&encoded)? {
                    // Both directions share one capacity, so responses can
                    // never outnumber in-flight requests; a full response
                    // ring means the indices are corrupt.
                    return Err(SndError::RingOverrun {
                        prod: ring.rsp.prod(),
                        cons: ring.rsp.cons(),
                        capacity: ring.rsp.capacity(),
                    });
                }
                handled += 1;
            }
            self.stats.requests_rx += slots.len() as u64;
            self.stats.responses_tx += slots.len() as u64;
            // Re-arm the request hold-off; loop again if requests raced in.
            if !ring.req.final_check() {
                break;
            }
        }

        if handled > 0 && ring.rsp.should_notify_peer() {
            self.stats.notifications_tx += 1;
            self.evt.signal.notify_one();
        }
        Ok(handled)
    }

    /// Services notifications until a fatal fault.
    pub async fn run(mut self) -> Result<()> {
        loop {
            if let Err(e) = self.process_available().await {
                log::error!("backend: fatal transport fault: {e}");
                return Err(e);
            }
            let wait = self.evt.wait.clone();
            wait.notified().await;
        }
    }

    fn execute(&mut self, request: &Request) -> Status {
        let op = request.operation();

        match self.streams.get(&request.stream_idx) {
            Some(stream) => {
                if let Err(e) = stream.check_submit(op) {
                    log::warn!("backend: rejecting {op:?}: {e}");
                    return Status::Error;
                }
            }
            None => {
                log::warn!("backend: request for unconfigured stream {}", request.stream_idx);
                return Status::Error;
            }
        }

        let mut open_params = None;
        let result = match &request.body {
            RequestBody::Open {
                pcm_format,
                pcm_channels,
                pcm_rate,
            } => {
                let params = OpenParams {
                    format: *pcm_format,
                    channels: *pcm_channels,
                    rate: *pcm_rate,
                };
                open_params = Some(params);
                self.device
                    .open(request.stream_idx, params)
                    .map_err(SndError::from)
            }
            RequestBody::Close => self
                .device
                .close(request.stream_idx)
                .map_err(SndError::from),
            RequestBody::Write { length, refs } => self.do_write(request.stream_idx, *length, refs),
            RequestBody::Read { length, refs } => self.do_read(request.stream_idx, *length, refs),
            RequestBody::SetVolume { gref } => self.do_set_volume(request.stream_idx, *gref),
            RequestBody::GetVolume { gref } => self.do_get_volume(request.stream_idx, *gref),
            RequestBody::Mute => self.device.mute(request.stream_idx).map_err(SndError::from),
            RequestBody::Unmute => self
                .device
                .unmute(request.stream_idx)
                .map_err(SndError::from),
        };

        let status = match result {
            Ok(()) => Status::Okay,
            Err(e) => {
                log::warn!("backend: {op:?} on stream {} failed: {e}", request.stream_idx);
                Status::Error
            }
        };

        if let Some(stream) = self.streams.get_mut(&request.stream_idx) {
            stream.note_submitted(op, request.id, open_params);
            stream.note_completed(op, request.id, status);
        }
        status
    }

    fn channels_of(&self, stream_idx: u8) -> Result<usize> {
        self.streams
            .get(&stream_idx)
            .and_then(|s| s.params())
            .map(|p| p.channels as usize)
            .ok_or_else(|| SndError::Device("stream has no open parameters".into()))
    }

    fn do_write(&mut self, stream_idx: u8, length: u32, refs: &BufferRefs) -> Result<()> {
        let n_pages = pages_for(length);
        // The mapped views are dropped (unmapped) before the response is
        // enqueued: they live only inside this call.
        let pages = directory::resolve(refs, n_pages, &mut self.pages, self.layout)?;
        let mut data = Vec::with_capacity(length as usize);
        let mut remaining = length as usize;
        for page in &pages {
            let take = remaining.min(page.len());
            data.extend_from_slice(&page[..take]);
            remaining -= take;
        }
        self.device.write(stream_idx, &data)?;
        Ok(())
    }

    fn do_read(&mut self, stream_idx: u8, length: u32, refs: &BufferRefs) -> Result<()> {
        let n_pages = pages_for(length);
        let grefs = directory::resolve_refs(refs, n_pages, &mut self.pages, self.layout)?;
        let mut data = vec![0u8; length as usize];
        self.device.read(stream_idx, &mut data)?;
        for (gref, chunk) in grefs.iter().zip(data.chunks(PAGE_SIZE)) {
            if !self.pages.write_into(*gref, 0, chunk) {
                return Err(SndError::DanglingReference(*gref));
            }
        }
        Ok(())
    }

    fn do_set_volume(&mut self, stream_idx: u8, gref: u32) -> Result<()> {
        let channels = self.channels_of(stream_idx)?;
        let page = self
            .pages
            .map_page(gref)
            .ok_or(SndError::DanglingReference(gref))?;
        let gains = decode_volume_page(&page, channels);
        drop(page);
        self.device.set_volume(stream_idx, &gains)?;
        Ok(())
    }

    fn do_get_volume(&mut self, stream_idx: u8, gref: u32) -> Result<()> {
        let channels = self.channels_of(stream_idx)?;
        let mut gains = self.device.get_volume(stream_idx)?;
        gains.truncate(channels);
        let mut page = vec![0u8; PAGE_SIZE];
        encode_volume_page(&gains, &mut page);
        if !self.pages.write_into(gref, 0, &page) {
            return Err(SndError::DanglingReference(gref));
        }
        Ok(())
    }
}

impl From<DeviceError> for SndError {
    fn from(e: DeviceError) -> Self {
        SndError::Device(e.0)
    }
}
