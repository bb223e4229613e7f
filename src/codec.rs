//! Line frame codec
//!
//! One `ChatMessage` per compact JSON object:
//! `{"sender":"alice","text":"hi","timestamp":"2025-01-02T03:04:05.678Z"}`.
//! The encoded frame never contains a newline; the session appends the
//! delimiter.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::message::ChatMessage;

#[derive(Serialize)]
struct WireFrameRef<'a> {
    sender: &'a str,
    text: &'a str,
    timestamp: String,
}

#[derive(Deserialize)]
struct WireFrame {
    sender: String,
    text: String,
    timestamp: String,
}

/// Encode a message into a single frame (without the trailing `\n`)
pub fn encode(message: &ChatMessage) -> Result<String, CodecError> {
    let frame = WireFrameRef {
        sender: message.sender(),
        text: message.text(),
        timestamp: format_timestamp(message.timestamp()),
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Decode a single frame into a message
pub fn decode(payload: &[u8]) -> Result<ChatMessage, CodecError> {
    let frame: WireFrame = serde_json::from_slice(payload)
        .map_err(|e| CodecError::MalformedMessage(e.to_string()))?;

    if frame.sender.is_empty() {
        return Err(CodecError::MalformedMessage("empty sender".to_string()));
    }
    if frame.text.is_empty() {
        return Err(CodecError::MalformedMessage("empty text".to_string()));
    }

    let timestamp = parse_timestamp(&frame.timestamp).ok_or_else(|| {
        CodecError::MalformedMessage(format!("invalid timestamp '{}'", frame.timestamp))
    })?;

    Ok(ChatMessage::with_timestamp(frame.sender, frame.text, timestamp))
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// ISO-8601 with offset, normalized to UTC. A timestamp without an offset
/// is taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
