use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, SwarmError};
use crate::protocol::{Announcement, Call, Frame};

/// Canonical bytes of a call.
///
/// `serde_json::Map` is ordered by key, so object keys inside args and
/// kwargs come out sorted and the encoding is stable across processes.
pub fn encode_call(call: &Call) -> Vec<u8> {
    // A Call holds only strings and JSON values keyed by strings.
    serde_json::to_vec(call).expect("call is always serializable")
}

pub fn decode_call(bytes: &[u8]) -> Result<Call> {
    decode(bytes, "call")
}

pub fn encode_announcement(announcement: &Announcement) -> Result<Bytes> {
    encode(announcement)
}

pub fn decode_announcement(bytes: &[u8]) -> Result<Announcement> {
    decode(bytes, "announcement")
}

pub fn encode_frame(frame: &Frame) -> Result<Bytes> {
    encode(frame)
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    decode(bytes, "frame")
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| SwarmError::Internal(format!("encode failed: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| SwarmError::protocol(format!("malformed {what}: {e}"), bytes))
}
