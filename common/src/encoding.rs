//! Canonical binary encoding for cacheable chain data (spec.md §9,
//! "Cross-process cache coherence"): a versioned header plus a `bincode`
//! body, so a persistent KV backend can be read and written by independent
//! processes regardless of which one runs the prefetch workers.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Bump whenever a cached datum's `bincode` layout changes incompatibly.
pub const CURRENT_VERSION: u8 = 1;

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("buffer too short to contain a header")]
    TooShort,
    #[error("unsupported encoding version {0}")]
    UnsupportedVersion(u8),
    #[error("datum kind mismatch: expected {expected}, got {actual}")]
    KindMismatch { expected: u8, actual: u8 },
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

/// Encodes `value` as `{version: u8}{kind: u8}{bincode body}`.
pub fn encode<T: Serialize>(kind: u8, value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::with_capacity(64);
    buf.push(CURRENT_VERSION);
    buf.push(kind);
    bincode::serialize_into(&mut buf, value)?;
    Ok(buf)
}

/// Decodes a buffer produced by [`encode`], checking the kind tag matches.
pub fn decode<T: DeserializeOwned>(expected_kind: u8, buf: &[u8]) -> Result<T, EncodingError> {
    if buf.len() < 2 {
        return Err(EncodingError::TooShort);
    }
    let version = buf[0];
    if version != CURRENT_VERSION {
        return Err(EncodingError::UnsupportedVersion(version));
    }
    let kind = buf[1];
    if kind != expected_kind {
        return Err(EncodingError::KindMismatch {
            expected: expected_kind,
            actual: kind,
        });
    }
    Ok(bincode::deserialize(&buf[2..])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn round_trips() {
        let s = Sample {
            a: 7,
            b: "hi".into(),
        };
        let buf = encode(3, &s).unwrap();
        let back: Sample = decode(3, &buf).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn rejects_wrong_kind() {
        let buf = encode(3, &Sample { a: 1, b: "x".into() }).unwrap();
        let result: Result<Sample, _> = decode(4, &buf);
        assert!(matches!(result, Err(EncodingError::KindMismatch { .. })));
    }

    #[test]
    fn rejects_short_buffer() {
        let result: Result<Sample, _> = decode(3, &[1]);
        assert!(matches!(result, Err(EncodingError::TooShort)));
    }
}
