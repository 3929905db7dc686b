//! Connection negotiation shim: the key-value handshake that publishes the
//! ring location, notification identifier and stream topology before the
//! transport may be used.
//!
//! This is an interface boundary. The real bus lives outside this crate;
//! the consumer feeds published key-value pairs in and drives the four-phase
//! handshake. The core calls back only to report a fatal transport fault.

use std::collections::HashMap;
use std::str::FromStr;

use crate::constants::*;
use crate::directory::GrantRef;
use crate::error::{Result, SndError};
use crate::format::PcmFormat;
use crate::stream::StreamDirection;

/// Four-phase handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Initialising,
    InitWait,
    Initialised,
    Connected,
}

impl HandshakePhase {
    /// Legal forward transitions of the handshake.
    pub fn can_advance_to(self, next: HandshakePhase) -> bool {
        use HandshakePhase::*;
        matches!(
            (self, next),
            (Initialising, InitWait) | (InitWait, Initialised) | (Initialised, Connected)
        )
    }
}

/// Negotiated envelope a stream's open parameters are checked against.
#[derive(Debug, Clone, Default)]
pub struct StreamEnvelope {
    pub channels_min: Option<u8>,
    pub channels_max: Option<u8>,
    pub sample_rates: Vec<u32>,
    pub sample_formats: Vec<PcmFormat>,
}

impl StreamEnvelope {
    /// Empty lists and bounds mean "no constraint" (the peer's defaults
    /// apply).
    pub fn permits(&self, format: PcmFormat, channels: u8, rate: u32) -> bool {
        if let Some(min) = self.channels_min {
            if channels < min {
                return false;
            }
        }
        if let Some(max) = self.channels_max {
            if channels > max {
                return false;
            }
        }
        if !self.sample_rates.is_empty() && !self.sample_rates.contains(&rate) {
            return false;
        }
        if !self.sample_formats.is_empty() && !self.sample_formats.contains(&format) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub index: u8,
    pub direction: StreamDirection,
    pub envelope: StreamEnvelope,
}

/// Everything the core needs from a completed handshake.
#[derive(Debug, Clone)]
pub struct TransportParams {
    pub ring_ref: GrantRef,
    pub event_channel: u32,
    pub streams: Vec<StreamConfig>,
}

/// Hook the core uses to report a connection-fatal transport fault, so the
/// bus layer can tear down or renegotiate.
pub trait FaultHandler: Send + Sync {
    fn on_fault(&self, error: &SndError);
}

/// A fault handler that only logs. Useful default for tests and tools.
#[derive(Debug, Default)]
pub struct LogFaultHandler;

impl FaultHandler for LogFaultHandler {
    fn on_fault(&self, error: &SndError) {
        log::error!("transport fault: {error}");
    }
}

fn parse_key<T: FromStr>(keys: &HashMap<String, String>, key: &str) -> Result<T> {
    let value = keys
        .get(key)
        .ok_or_else(|| SndError::Negotiation(format!("missing key {key}")))?;
    value
        .parse()
        .map_err(|_| SndError::Negotiation(format!("bad value for {key}: {value}")))
}

fn parse_opt<T: FromStr>(keys: &HashMap<String, String>, key: &str) -> Result<Option<T>> {
    match keys.get(key) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| SndError::Negotiation(format!("bad value for {key}: {value}"))),
    }
}

/// Parses a semicolon-separated list, e.g. "44100;48000".
pub fn parse_list<T: FromStr>(value: &str) -> Result<Vec<T>> {
    value
        .split(LIST_SEPARATOR)
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            tok.parse()
                .map_err(|_| SndError::Negotiation(format!("bad list entry: {tok}")))
        })
        .collect()
}

fn parse_direction(value: &str) -> Result<StreamDirection> {
    match value {
        STREAM_TYPE_PLAYBACK => Ok(StreamDirection::Playback),
        STREAM_TYPE_CAPTURE => Ok(StreamDirection::Capture),
        other => Err(SndError::Negotiation(format!("bad stream type: {other}"))),
    }
}

/// Parses one stream's published key-value nodes into its config.
pub fn parse_stream_config(keys: &HashMap<String, String>) -> Result<StreamConfig> {
    let index: u8 = parse_key(keys, FIELD_STREAM_INDEX)?;
    let direction = parse_direction(
        keys.get(FIELD_TYPE)
            .ok_or_else(|| SndError::Negotiation(format!("missing key {FIELD_TYPE}")))?,
    )?;

    let envelope = StreamEnvelope {
        channels_min: parse_opt(keys, FIELD_CHANNELS_MIN)?,
        channels_max: parse_opt(keys, FIELD_CHANNELS_MAX)?,
        sample_rates: match keys.get(FIELD_SAMPLE_RATES) {
            Some(v) => parse_list(v)?,
            None => Vec::new(),
        },
        sample_formats: match keys.get(FIELD_SAMPLE_FORMATS) {
            Some(v) => parse_list(v)?,
            None => Vec::new(),
        },
    };

    Ok(StreamConfig {
        index,
        direction,
        envelope,
    })
}

/// Parses the transport-level nodes plus every stream's nodes.
pub fn parse_transport_params(
    transport_keys: &HashMap<String, String>,
    stream_keys: &[HashMap<String, String>],
) -> Result<TransportParams> {
    let ring_ref: GrantRef = parse_key(transport_keys, FIELD_RING_REF)?;
    let event_channel: u32 = parse_key(transport_keys, FIELD_EVT_CHNL)?;
    let streams = stream_keys
        .iter()
        .map(parse_stream_config)
        .collect::<Result<Vec<_>>>()?;
    Ok(TransportParams {
        ring_ref,
        event_channel,
        streams,
    })
}
