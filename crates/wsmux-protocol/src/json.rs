//! JSON payload helpers (feature `json`).
//!
//! Payloads are opaque bytes to the codecs; applications that speak JSON
//! use these two functions at the edges.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Serializes a value into payload bytes.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(value).map_err(ProtocolError::Encode)
}

/// Deserializes payload bytes into a value.
pub fn from_payload<T: DeserializeOwned>(
    payload: &[u8],
) -> Result<T, ProtocolError> {
    serde_json::from_slice(payload).map_err(ProtocolError::Decode)
}
