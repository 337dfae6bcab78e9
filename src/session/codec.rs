//! Serialization of session value maps into the opaque blobs a storage
//! backend persists.
//!
//! Both encodings are self-describing, so a stored record can be decoded
//! without any schema beyond the map itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::CodecError;

/// Session values keyed by name
pub type SessionValues = BTreeMap<String, serde_json::Value>;

/// Encoding used for persisted session values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSerializer {
    /// Compact binary encoding (CBOR)
    #[default]
    Cbor,
    Json,
}

impl ValueSerializer {
    /// Encode a value map to bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the map cannot be represented in the chosen encoding
    pub fn encode(self, values: &SessionValues) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Cbor => {
                let mut buf = Vec::new();
                ciborium::into_writer(values, &mut buf)
                    .map_err(|e| CodecError::Encode(e.to_string()))?;
                Ok(buf)
            }
            Self::Json => serde_json::to_vec(values).map_err(|e| CodecError::Encode(e.to_string())),
        }
    }

    /// Decode bytes produced by [`ValueSerializer::encode`]
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a complete, well formed map
    pub fn decode(self, bytes: &[u8]) -> Result<SessionValues, CodecError> {
        match self {
            Self::Cbor => {
                ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
            }
            Self::Json => {
                serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
            }
        }
    }
}
