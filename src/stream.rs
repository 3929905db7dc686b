//! Per-stream session state: open/close lifecycle and local validation of
//! operations before any packet is built.

use std::collections::HashSet;

use crate::error::{Result, SndError};
use crate::format::PcmFormat;
use crate::packet::{Operation, Status};

/// Data direction a stream was negotiated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Playback,
    Capture,
    Both,
}

impl StreamDirection {
    pub fn allows(self, op: Operation) -> bool {
        match op {
            Operation::Write => matches!(self, StreamDirection::Playback | StreamDirection::Both),
            Operation::Read => matches!(self, StreamDirection::Capture | StreamDirection::Both),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Closed,
    Opening,
    Open,
    Closing,
}

impl StreamPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamPhase::Closed => "closed",
            StreamPhase::Opening => "opening",
            StreamPhase::Open => "open",
            StreamPhase::Closing => "closing",
        }
    }
}

/// Parameters a stream was opened with, kept while it is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenParams {
    pub format: PcmFormat,
    pub channels: u8,
    pub rate: u32,
}

/// One logical PCM stream of the connection.
#[derive(Debug)]
pub struct Stream {
    pub index: u8,
    pub direction: StreamDirection,
    phase: StreamPhase,
    params: Option<OpenParams>,
    in_flight: HashSet<u16>,
}

impl Stream {
    pub fn new(index: u8, direction: StreamDirection) -> Self {
        Self {
            index,
            direction,
            phase: StreamPhase::Closed,
            params: None,
            in_flight: HashSet::new(),
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn params(&self) -> Option<OpenParams> {
        self.params
    }

    pub fn in_flight_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.in_flight.iter().copied()
    }

    fn invalid(&self) -> SndError {
        SndError::InvalidState {
            stream: self.index,
            state: self.phase.as_str(),
        }
    }

    /// Validates an operation against the current phase and direction.
    /// Errors here are caller errors; no packet is ever built from them.
    pub fn check_submit(&self, op: Operation) -> Result<()> {
        match op {
            Operation::Open => {
                if self.phase != StreamPhase::Closed {
                    return Err(self.invalid());
                }
            }
            Operation::Close => {
                if self.phase != StreamPhase::Open {
                    return Err(self.invalid());
                }
            }
            _ => {
                if self.phase != StreamPhase::Open {
                    return Err(self.invalid());
                }
                if !self.direction.allows(op) {
                    return Err(SndError::WrongDirection { stream: self.index });
                }
            }
        }
        Ok(())
    }

    /// Records a submitted request and applies the phase transition its
    /// operation implies.
    pub fn note_submitted(&mut self, op: Operation, id: u16, params: Option<OpenParams>) {
        self.in_flight.insert(id);
        match op {
            Operation::Open => {
                self.phase = StreamPhase::Opening;
                self.params = params;
            }
            Operation::Close => self.phase = StreamPhase::Closing,
            _ => {}
        }
    }

    /// Applies a completion. Open failure rolls the stream back to Closed;
    /// Close reaches Closed regardless of its status and drops the stream's
    /// resources.
    pub fn note_completed(&mut self, op: Operation, id: u16, status: Status) {
        self.in_flight.remove(&id);
        match op {
            Operation::Open => {
                self.phase = if status == Status::Okay {
                    StreamPhase::Open
                } else {
                    self.params = None;
                    StreamPhase::Closed
                };
            }
            Operation::Close => {
                self.phase = StreamPhase::Closed;
                self.params = None;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_params() -> OpenParams {
        OpenParams {
            format: PcmFormat::S16Le,
            channels: 2,
            rate: 44100,
        }
    }

    fn opened(direction: StreamDirection) -> Stream {
        let mut s = Stream::new(0, direction);
        s.check_submit(Operation::Open).unwrap();
        s.note_submitted(Operation::Open, 1, Some(open_params()));
        s.note_completed(Operation::Open, 1, Status::Okay);
        s
    }

    #[test]
    fn lifecycle_open_close() {
        let mut s = Stream::new(0, StreamDirection::Playback);
        assert_eq!(s.phase(), StreamPhase::Closed);

        s.note_submitted(Operation::Open, 1, Some(open_params()));
        assert_eq!(s.phase(), StreamPhase::Opening);
        // No I/O while the open is still in flight.
        assert!(s.check_submit(Operation::Write).is_err());

        s.note_completed(Operation::Open, 1, Status::Okay);
        assert_eq!(s.phase(), StreamPhase::Open);
        assert_eq!(s.params(), Some(open_params()));

        s.check_submit(Operation::Close).unwrap();
        s.note_submitted(Operation::Close, 2, None);
        assert_eq!(s.phase(), StreamPhase::Closing);
        s.note_completed(Operation::Close, 2, Status::Okay);
        assert_eq!(s.phase(), StreamPhase::Closed);
        assert_eq!(s.params(), None);
    }

    #[test]
    fn failed_open_returns_to_closed() {
        let mut s = Stream::new(0, StreamDirection::Capture);
        s.note_submitted(Operation::Open, 1, Some(open_params()));
        s.note_completed(Operation::Open, 1, Status::Error);
        assert_eq!(s.phase(), StreamPhase::Closed);
        assert_eq!(s.params(), None);
        // Reopening is allowed.
        s.check_submit(Operation::Open).unwrap();
    }

    #[test]
    fn failed_close_still_reaches_closed() {
        let mut s = opened(StreamDirection::Playback);
        s.note_submitted(Operation::Close, 2, None);
        s.note_completed(Operation::Close, 2, Status::Error);
        assert_eq!(s.phase(), StreamPhase::Closed);
    }

    #[test]
    fn ops_rejected_unless_open() {
        let s = Stream::new(1, StreamDirection::Playback);
        for op in [
            Operation::Write,
            Operation::GetVolume,
            Operation::SetVolume,
            Operation::Mute,
            Operation::Unmute,
        ] {
            assert!(matches!(
                s.check_submit(op),
                Err(SndError::InvalidState { stream: 1, .. })
            ));
        }
    }

    #[test]
    fn direction_is_enforced_locally() {
        let s = opened(StreamDirection::Playback);
        s.check_submit(Operation::Write).unwrap();
        assert!(matches!(
            s.check_submit(Operation::Read),
            Err(SndError::WrongDirection { stream: 0 })
        ));

        let s = opened(StreamDirection::Capture);
        s.check_submit(Operation::Read).unwrap();
        assert!(s.check_submit(Operation::Write).is_err());

        let s = opened(StreamDirection::Both);
        s.check_submit(Operation::Read).unwrap();
        s.check_submit(Operation::Write).unwrap();
    }

    #[test]
    fn double_open_and_double_close_rejected() {
        let mut s = opened(StreamDirection::Playback);
        assert!(s.check_submit(Operation::Open).is_err());
        s.note_submitted(Operation::Close, 5, None);
        assert!(s.check_submit(Operation::Close).is_err());
    }
}
