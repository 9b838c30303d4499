//! Session record codec.
//!
//! Records are stored as JSON objects. Decoding is tolerant per field: an
//! unreadable field is logged and replaced by its fallback while every other
//! field is kept. Only a document that is not a JSON object is rejected.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::{AgentResponse, SessionRecord, TaskStatus};

/// Codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed record: {0}")]
    Malformed(String),
    #[error("Encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Serialize a record.
///
/// # Errors
/// Returns error if the embedded result payloads cannot be serialized.
pub fn encode(record: &SessionRecord) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(record)?)
}

/// Deserialize a record stored under `session:{user_id}:{session_id}`.
///
/// Identifiers missing from the document fall back to the addressed ones and
/// a missing `ttl` falls back to `default_ttl`.
///
/// # Errors
/// Returns `CodecError::Malformed` if the bytes are not a JSON object.
pub fn decode(
    bytes: &[u8],
    user_id: &str,
    session_id: &str,
    default_ttl: u64,
) -> Result<SessionRecord, CodecError> {
    let doc: Value =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let Value::Object(mut doc) = doc else {
        return Err(CodecError::Malformed(format!(
            "record for session {session_id} is not an object"
        )));
    };

    let status = match doc.remove("status") {
        Some(Value::String(raw)) => TaskStatus::parse(&raw).unwrap_or_else(|| {
            tracing::warn!(session_id, status = %raw, "Unknown stored status, treating as error");
            TaskStatus::Error
        }),
        other => {
            tracing::warn!(session_id, ?other, "Unreadable stored status, treating as error");
            TaskStatus::Error
        }
    };

    Ok(SessionRecord {
        session_id: string_field(&mut doc, "session_id", session_id)
            .unwrap_or_else(|| session_id.to_owned()),
        user_id: string_field(&mut doc, "user_id", session_id)
            .unwrap_or_else(|| user_id.to_owned()),
        task_id: string_field(&mut doc, "task_id", session_id),
        status,
        last_query: string_field(&mut doc, "last_query", session_id),
        last_response: response_field(&mut doc, session_id),
        last_updated: timestamp_field(&mut doc, session_id),
        ttl: doc
            .remove("ttl")
            .and_then(|v| v.as_u64())
            .unwrap_or(default_ttl),
    })
}

fn string_field(doc: &mut Map<String, Value>, name: &str, session_id: &str) -> Option<String> {
    match doc.remove(name)? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => {
            tracing::warn!(session_id, field = name, value = %other, "Dropping non-string field");
            None
        }
    }
}

fn response_field(doc: &mut Map<String, Value>, session_id: &str) -> Option<AgentResponse> {
    match doc.remove("last_response")? {
        Value::Null => None,
        raw => match serde_json::from_value(raw) {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::warn!(session_id, "Failed to decode last_response: {e}");
                None
            }
        },
    }
}

fn timestamp_field(doc: &mut Map<String, Value>, session_id: &str) -> Option<f64> {
    match doc.remove("last_updated")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().or_else(|| {
            tracing::debug!(session_id, value = %s, "Non-numeric last_updated");
            None
        }),
        _ => None,
    }
}
