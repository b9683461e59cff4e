//! Versioned JSON envelope for records kept in the store
//!
//! Records are written as `{"v":1,"data":{...}}`. Anything that fails to decode
//! (unknown version, malformed JSON, wrong shape) is treated as absent: a partial
//! view of a record is never returned.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::StoreError;

/// Current on-store record schema version
pub const RECORD_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeOut<'a, T> {
    v: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    v: u32,
    data: serde_json::Value,
}

/// Encode a record with the current schema version
pub fn encode_record<T: Serialize>(record: &T) -> Result<String, StoreError> {
    serde_json::to_string(&EnvelopeOut {
        v: RECORD_VERSION,
        data: record,
    })
    .map_err(|e| StoreError::Encoding(e.to_string()))
}

/// Decode a stored record, `None` if it is malformed or from another version
pub fn decode_record<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    let envelope: EnvelopeIn = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(key = %key, error = %e, "Ignoring malformed record");
            return None;
        }
    };

    if envelope.v != RECORD_VERSION {
        warn!(
            key = %key,
            version = envelope.v,
            expected = RECORD_VERSION,
            "Ignoring record with unsupported schema version"
        );
        return None;
    }

    match serde_json::from_value(envelope.data) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(key = %key, error = %e, "Ignoring record with invalid payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        id: String,
        load: u32,
    }

    #[test]
    fn test_encode_wraps_in_envelope() {
        let raw = encode_record(&Sample {
            id: "a".to_string(),
            load: 3,
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["v"], 1);
        assert_eq!(value["data"]["load"], 3);
    }

    #[test]
    fn test_decode_valid_record() {
        let decoded: Option<Sample> =
            decode_record("k", r#"{"v":1,"data":{"id":"a","load":7}}"#);
        assert_eq!(
            decoded,
            Some(Sample {
                id: "a".to_string(),
                load: 7
            })
        );
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let decoded: Option<Sample> =
            decode_record("k", r#"{"v":2,"data":{"id":"a","load":7}}"#);
        assert!(decoded.is_none());
    }

    #[test]
    fn test_decode_rejects_partial_payload() {
        let decoded: Option<Sample> = decode_record("k", r#"{"v":1,"data":{"id":"a"}}"#);
        assert!(decoded.is_none());

        let decoded: Option<Sample> = decode_record("k", "not json");
        assert!(decoded.is_none());

        // Unversioned legacy blob
        let decoded: Option<Sample> = decode_record("k", r#"{"id":"a","load":7}"#);
        assert!(decoded.is_none());
    }
}
