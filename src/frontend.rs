//! Frontend connection: ties the ring, correlator and stream sessions
//! together behind async stream operations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex, Notify};

use crate::correlator::Correlator;
use crate::directory::{DescribedBuffer, GrantRef};
use crate::error::{Result, SndError};
use crate::format::PcmFormat;
use crate::negotiation::{FaultHandler, StreamConfig, StreamEnvelope};
use crate::packet::{Codec, RequestBody, Status};
use crate::ring::{EventChannel, Ring};
use crate::stream::{OpenParams, Stream};

#[derive(Debug, Clone, Default)]
pub struct FrontendStats {
    pub requests_tx: u64,
    pub responses_rx: u64,
    pub notifications_tx: u64,
    pub ring_full_retries: u64,
}

struct StreamSlot {
    stream: Stream,
    envelope: StreamEnvelope,
}

struct Inner {
    codec: Codec,
    ring: Arc<Mutex<Ring>>,
    correlator: Mutex<Correlator<oneshot::Sender<Status>>>,
    streams: Mutex<HashMap<u8, StreamSlot>>,
    evt: EventChannel,
    /// Signaled after each completion poll so submitters blocked on a full
    /// ring re-check for space.
    drained: Notify,
    failed: AtomicBool,
    fault: Arc<dyn FaultHandler>,
    stats: Mutex<FrontendStats>,
}

/// The guest side of a connection.
#[derive(Clone)]
pub struct SndFrontend {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SndFrontend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SndFrontend")
            .field("failed", &self.inner.failed.load(Ordering::Relaxed))
            .finish()
    }
}

impl SndFrontend {
    pub fn new(
        ring: Arc<Mutex<Ring>>,
        evt: EventChannel,
        codec: Codec,
        streams: &[StreamConfig],
        fault: Arc<dyn FaultHandler>,
    ) -> Self {
        let streams = streams
            .iter()
            .map(|cfg| {
                (
                    cfg.index,
                    StreamSlot {
                        stream: Stream::new(cfg.index, cfg.direction),
                        envelope: cfg.envelope.clone(),
                    },
                )
            })
            .collect();
        Self {
            inner: Arc::new(Inner {
                correlator: Mutex::new(Correlator::new(codec)),
                codec,
                ring,
                streams: Mutex::new(streams),
                evt,
                drained: Notify::new(),
                failed: AtomicBool::new(false),
                fault,
                stats: Mutex::new(FrontendStats::default()),
            }),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.inner.failed.load(Ordering::Acquire)
    }

    pub async fn stats(&self) -> FrontendStats {
        self.inner.stats.lock().await.clone()
    }

    /// Marks the connection dead, wakes every waiter, and reports the fault
    /// to the negotiation layer.
    async fn fail(&self, error: SndError) -> SndError {
        log::error!("frontend: fatal transport fault: {error}");
        self.inner.failed.store(true, Ordering::Release);
        // Dropping the pending senders wakes every waiting caller with a
        // connection failure.
        {
            let codec = self.inner.codec;
            let mut cor = self.inner.correlator.lock().await;
            *cor = Correlator::new(codec);
        }
        self.inner.drained.notify_waiters();
        self.inner.fault.on_fault(&error);
        error
    }

    fn check_not_failed(&self) -> Result<()> {
        if self.is_failed() {
            return Err(SndError::ConnectionFailed);
        }
        Ok(())
    }

    /// Drains available responses, updates stream sessions and wakes the
    /// callers they complete. Safe to call speculatively; a no-op when
    /// nothing is pending.
    pub async fn poll_completions(&self) -> Result<usize> {
        self.check_not_failed()?;

        let polled = {
            let ring_arc = Arc::clone(&self.inner.ring);
            let mut ring = ring_arc.lock().await;
            let mut cor = self.inner.correlator.lock().await;
            let mut done = Vec::new();
            loop {
                match cor.poll_completions(&mut ring.rsp) {
                    Ok(batch) => done.extend(batch),
                    Err(e) => {
                        drop(cor);
                        drop(ring);
                        return Err(self.fail(e).await);
                    }
                }
                // Re-arm the hold-off; loop again if responses raced in.
                if !ring.rsp.final_check() {
                    break;
                }
            }
            done
        };

        let n = polled.len();
        if n > 0 {
            let mut streams = self.inner.streams.lock().await;
            for (handle, tx, response) in polled {
                if let Some(slot) = streams.get_mut(&response.stream_idx) {
                    slot.stream
                        .note_completed(response.operation, handle.0, response.status);
                }
                let _ = tx.send(response.status);
            }
            self.inner.stats.lock().await.responses_rx += n as u64;
        }
        self.inner.drained.notify_waiters();
        Ok(n)
    }

    async fn submit_and_wait(
        &self,
        stream_idx: u8,
        body: RequestBody,
        params: Option<OpenParams>,
    ) -> Result<Status> {
        let op = body.operation();

        loop {
            self.check_not_failed()?;
            // Register for the drain signal before attempting the enqueue so
            // a completion poll between a Full result and the await below
            // cannot be lost.
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            let submitted = {
                let ring_arc = Arc::clone(&self.inner.ring);
                let mut ring = ring_arc.lock().await;
                let mut cor = self.inner.correlator.lock().await;
                let mut streams = self.inner.streams.lock().await;

                // Validation and enqueue share one critical section, and the
                // validation reruns on every retry: a stream that left the
                // required state while this task waited for the locks or for
                // ring space must not reach the wire.
                let slot = streams.get_mut(&stream_idx).ok_or(SndError::InvalidState {
                    stream: stream_idx,
                    state: "unconfigured",
                })?;
                slot.stream.check_submit(op)?;
                if let Some(p) = params {
                    if !slot.envelope.permits(p.format, p.channels, p.rate) {
                        return Err(SndError::OutsideEnvelope { stream: stream_idx });
                    }
                }

                let (tx, rx) = oneshot::channel();
                match cor.submit(&mut ring.req, stream_idx, body.clone(), tx) {
                    Ok(handle) => {
                        slot.stream.note_submitted(op, handle.0, params);
                        Some((rx, ring.req.should_notify_peer()))
                    }
                    Err(SndError::RingFull) => None,
                    Err(e) => {
                        drop(streams);
                        drop(cor);
                        drop(ring);
                        return Err(self.fail(e).await);
                    }
                }
            };

            match submitted {
                Some((rx, notify)) => {
                    {
                        let mut stats = self.inner.stats.lock().await;
                        stats.requests_tx += 1;
                        if notify {
                            stats.notifications_tx += 1;
                        }
                    }
                    if notify {
                        self.inner.evt.signal.notify_one();
                    }
                    return match rx.await {
                        Ok(status) => Ok(status),
                        Err(_) => Err(SndError::ConnectionFailed),
                    };
                }
                None => {
                    // Backpressure, not an error: wait for the peer to drain
                    // and retry. Requires a running event loop (or another
                    // poller) to make progress.
                    log::debug!("frontend: ring full, stream {stream_idx} waiting");
                    self.inner.stats.lock().await.ring_full_retries += 1;
                    drained.await;
                }
            }
        }
    }

    pub async fn open(
        &self,
        stream_idx: u8,
        format: PcmFormat,
        channels: u8,
        rate: u32,
    ) -> Result<Status> {
        let params = OpenParams {
            format,
            channels,
            rate,
        };
        self.submit_and_wait(
            stream_idx,
            RequestBody::Open {
                pcm_format: format,
                pcm_channels: channels,
                pcm_rate: rate,
            },
            Some(params),
        )
        .await
    }

    pub async fn close(&self, stream_idx: u8) -> Result<Status> {
        self.submit_and_wait(stream_idx, RequestBody::Close, None)
            .await
    }

    /// Plays back `buf.length` bytes from the described buffer.
    pub async fn write(&self, stream_idx: u8, buf: &DescribedBuffer) -> Result<Status> {
        self.submit_and_wait(
            stream_idx,
            RequestBody::Write {
                length: buf.length,
                refs: buf.packet_refs(),
            },
            None,
        )
        .await
    }

    /// Captures `buf.length` bytes into the described buffer.
    pub async fn read(&self, stream_idx: u8, buf: &DescribedBuffer) -> Result<Status> {
        self.submit_and_wait(
            stream_idx,
            RequestBody::Read {
                length: buf.length,
                refs: buf.packet_refs(),
            },
            None,
        )
        .await
    }

    /// `gref` references a volume page already filled by the caller.
    pub async fn set_volume(&self, stream_idx: u8, gref: GrantRef) -> Result<Status> {
        self.submit_and_wait(stream_idx, RequestBody::SetVolume { gref }, None)
            .await
    }

    /// On success the peer has written the gains into the page at `gref`.
    pub async fn get_volume(&self, stream_idx: u8, gref: GrantRef) -> Result<Status> {
        self.submit_and_wait(stream_idx, RequestBody::GetVolume { gref }, None)
            .await
    }

    pub async fn mute(&self, stream_idx: u8) -> Result<Status> {
        self.submit_and_wait(stream_idx, RequestBody::Mute, None).await
    }

    pub async fn unmute(&self, stream_idx: u8) -> Result<Status> {
        self.submit_and_wait(stream_idx, RequestBody::Unmute, None)
            .await
    }

    /// Services peer notifications until the connection fails.
    pub fn spawn_event_loop(&self) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::task::spawn(async move {
            loop {
                if this.poll_completions().await.is_err() {
                    break;
                }
                this.inner.evt.wait.notified().await;
            }
        })
    }
}
