//! Signal codec
//!
//! A signal is one half of the offer/answer negotiation. On the wire it is
//! the JSON form `{"type": "offer", "sdp": "..."}` wrapped in multibase
//! base58btc, which only uses URL-safe characters and can go straight into
//! a query string.

use multibase::Base;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description exchanged during signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub sdp: String,
}

impl SignalMessage {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Encode a signal for embedding in a URL or response body
pub fn encode(signal: &SignalMessage) -> Result<String, TransportError> {
    let json =
        serde_json::to_vec(signal).map_err(|e| TransportError::MalformedSignal(e.to_string()))?;
    Ok(multibase::encode(Base::Base58Btc, json))
}

/// Decode a signal produced by [`encode`]
///
/// Any multibase prefix is accepted, not just base58btc.
pub fn decode(encoded: &str) -> Result<SignalMessage, TransportError> {
    let (_base, json) = multibase::decode(encoded.trim())
        .map_err(|e| TransportError::MalformedSignal(format!("bad encoding: {}", e)))?;
    serde_json::from_slice(&json)
        .map_err(|e| TransportError::MalformedSignal(format!("bad payload: {}", e)))
}
