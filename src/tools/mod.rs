//! Tool handlers — thin typed mappers over the upstream mediator
//!
//! Each tool takes an explicit argument record (deserialized by the dispatch
//! layer) and returns a JSON object with snake_case fields. Collection
//! responses are pagination-normalised: upstream `@odata.nextLink` becomes an
//! opaque `next_cursor`.

pub mod calendar;
pub mod drive;
pub mod mail;
pub mod platform;

use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::{Error, Result};

/// Decode a base64 payload, bounding the decoded size.
///
/// # Errors
///
/// Returns `VALIDATION_ERROR` (400) for invalid base64 and (413) when the
/// decoded payload exceeds `max_bytes`.
pub fn decode_base64_payload(payload: &str, max_bytes: usize) -> Result<Vec<u8>> {
    let raw = STANDARD
        .decode(payload)
        .map_err(|_| Error::validation("Invalid base64 payload"))?;
    if raw.len() > max_bytes {
        return Err(Error::payload_too_large("Payload too large"));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn decode_accepts_payloads_within_bound() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"hello");
        assert_eq!(decode_base64_payload(&encoded, 10).unwrap(), b"hello");
    }

    #[test]
    fn decode_rejects_oversized_payloads_with_413() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([0u8; 64]);
        let err = decode_base64_payload(&encoded, 63).unwrap_err();
        assert_eq!(err.status(), 413);
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn decode_rejects_invalid_base64_with_400() {
        let err = decode_base64_payload("not base64!!!", 1024).unwrap_err();
        assert_eq!(err.status(), 400);
    }
}
