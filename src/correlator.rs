//! Request/response correlation: id allocation, in-flight tracking, and
//! matching responses back to their submissions.

use std::collections::HashMap;

use crate::error::{Result, SndError};
use crate::packet::{Codec, Request, RequestBody, Response};
use crate::ring::Direction;

/// Ticket for a submitted request, keyed by its correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingHandle(pub u16);

#[derive(Debug)]
struct Pending<T> {
    operation: crate::packet::Operation,
    stream_idx: u8,
    token: T,
}

/// Tracks in-flight requests for one ring instance.
///
/// `T` is an opaque per-request token returned with the completion; the
/// connection layer uses a oneshot sender, tests use plain values.
#[derive(Debug)]
pub struct Correlator<T> {
    codec: Codec,
    pending: HashMap<u16, Pending<T>>,
    next_id: u16,
}

impl<T> Correlator<T> {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            pending: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, handle: PendingHandle) -> bool {
        self.pending.contains_key(&handle.0)
    }

    /// Allocates an id unused among in-flight requests. Ids are reused only
    /// after their previous user completed.
    fn alloc_id(&mut self) -> Result<u16> {
        let max = self.codec.id_width.max_id();
        if self.pending.len() > max as usize {
            // Every id is in flight; same backpressure contract as a full ring.
            return Err(SndError::RingFull);
        }
        loop {
            let id = self.next_id;
            self.next_id = if self.next_id >= max { 0 } else { self.next_id + 1 };
            if !self.pending.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    /// Builds and enqueues a request packet. `RingFull` when the ring
    /// rejects the slot; the id is not consumed in that case.
    pub fn submit(
        &mut self,
        req_ring: &mut Direction,
        stream_idx: u8,
        body: RequestBody,
        token: T,
    ) -> Result<PendingHandle> {
        let id = self.alloc_id()?;
        let operation = body.operation();
        let request = Request {
            id,
            stream_idx,
            body,
        };
        let slot = self.codec.encode_request(&request)?;
        if !req_ring.try_enqueue(&slot)? {
            return Err(SndError::RingFull);
        }
        self.pending.insert(
            id,
            Pending {
                operation,
                stream_idx,
                token,
            },
        );
        Ok(PendingHandle(id))
    }

    /// Drains available response slots and matches each to its submission.
    ///
    /// A response whose `(id, operation, stream_idx)` triple matches no
    /// pending request is a protocol violation and fatal: a duplicate
    /// completion lands here too, since the first completion retires the id.
    pub fn poll_completions(
        &mut self,
        rsp_ring: &mut Direction,
    ) -> Result<Vec<(PendingHandle, T, Response)>> {
        let mut completed = Vec::new();
        for slot in rsp_ring.dequeue_available()? {
            let response = self.codec.decode_response(&slot)?;
            let pending = self.pending.remove(&response.id).ok_or({
                SndError::ProtocolViolation {
                    id: response.id,
                    reason: "response matches no pending request",
                }
            })?;
            if pending.operation != response.operation || pending.stream_idx != response.stream_idx
            {
                return Err(SndError::ProtocolViolation {
                    id: response.id,
                    reason: "response triple does not match submission",
                });
            }
            completed.push((PendingHandle(response.id), pending.token, response));
        }
        Ok(completed)
    }
}
