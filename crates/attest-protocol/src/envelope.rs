//! Signed-message blocks.
//!
//! A block is `(signed-message:<base64>)` embedded anywhere in free text. The
//! base64 payload (standard alphabet, whitespace tolerated) decodes to a JSON
//! envelope:
//!
//! ```json
//! { "signed_message": <string | object>,
//!   "authors": [ { "address": "...", "pubkey": "<b64>", "signature": "<b64>" } ] }
//! ```

use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub address: String,
    pub pubkey: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub signed_message: Value,
    pub authors: Vec<Author>,
}

fn block_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(signed-message:\s*([A-Za-z0-9+/=\s]+?)\s*\)").ok())
        .as_ref()
}

/// Base64 payload of the first signed-message block in `text`.
pub fn extract_signed_block(text: &str) -> Option<String> {
    block_regex()?
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<String>())
        .filter(|s| !s.is_empty())
}

pub fn decode_envelope(payload: &str) -> Result<SignedEnvelope, ProtocolError> {
    let bytes = BASE64
        .decode(payload)
        .map_err(|e| ProtocolError::InvalidFormat(format!("signed-message is not base64: {e}")))?;
    serde_json::from_slice::<SignedEnvelope>(&bytes).map_err(|e| {
        ProtocolError::InvalidFormat(format!("malformed signed-message envelope: {e}"))
    })
}

pub fn encode_envelope(envelope: &SignedEnvelope) -> String {
    // Value/String fields only; serialization cannot fail.
    let json = serde_json::to_vec(envelope).unwrap_or_default();
    BASE64.encode(json)
}

pub fn format_signed_block(envelope: &SignedEnvelope) -> String {
    format!("(signed-message:{})", encode_envelope(envelope))
}

/// Bytes covered by each author's signature: the canonical (key-sorted,
/// compact) JSON of `signed_message`.
pub fn signing_bytes(signed_message: &Value) -> Vec<u8> {
    serde_json::to_vec(&sorted(signed_message)).unwrap_or_default()
}

fn sorted(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .map(|k| (k.clone(), sorted(&map[k.as_str()])))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}
