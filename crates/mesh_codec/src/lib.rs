//! # Mesh Codec
//!
//! CBOR externalization for mesh change records.
//!
//! Change records travel between mesh bases (and to disk) in their
//! externalized form: identifiers, primitive timestamps and object
//! snapshots. Live object references are a cache and never reach this
//! crate. Anything that implements `serde::Serialize` can be written.
//!
//! Two layers are provided:
//!
//! - [`to_cbor`] / [`from_cbor`] encode a bare value
//! - [`to_envelope`] / [`from_envelope`] wrap the value with the format
//!   version, so readers can reject records written by a newer layout
//!
//! ## Usage
//!
//! ```
//! use mesh_codec::{from_cbor, to_cbor};
//!
//! let bytes = to_cbor(&vec!["a".to_string(), "b".to_string()]).unwrap();
//! let decoded: Vec<String> = from_cbor(&bytes).unwrap();
//! assert_eq!(decoded, vec!["a".to_string(), "b".to_string()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;

pub use error::{CodecError, CodecResult};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Format version written by [`to_envelope`].
pub const FORMAT_VERSION: u16 = 1;

/// Encodes a value to CBOR bytes.
pub fn to_cbor<T>(value: &T) -> CodecResult<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| CodecError::encoding_failed(format!("{e:?}")))?;
    Ok(buf)
}

/// Decodes a value from CBOR bytes.
pub fn from_cbor<T>(bytes: &[u8]) -> CodecResult<T>
where
    T: DeserializeOwned,
{
    if bytes.is_empty() {
        return Err(CodecError::UnexpectedEof);
    }
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(format!("{e:?}")))
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u16,
    payload: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    version: u16,
    payload: T,
}

/// Encodes a value inside a versioned envelope.
pub fn to_envelope<T>(value: &T) -> CodecResult<Vec<u8>>
where
    T: Serialize,
{
    to_cbor(&EnvelopeRef {
        version: FORMAT_VERSION,
        payload: value,
    })
}

/// Decodes a value written by [`to_envelope`].
///
/// # Errors
///
/// Returns [`CodecError::UnsupportedVersion`] if the envelope was written
/// with a different format version.
pub fn from_envelope<T>(bytes: &[u8]) -> CodecResult<T>
where
    T: DeserializeOwned,
{
    let envelope: Envelope<T> = from_cbor(bytes)?;
    if envelope.version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: envelope.version,
            expected: FORMAT_VERSION,
        });
    }
    Ok(envelope.payload)
}

/// Trait for types that can be encoded to CBOR.
pub trait Encode {
    /// Encode this value to CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: String,
        time: u64,
        tags: Vec<String>,
        props: BTreeMap<String, i64>,
    }

    fn sample() -> Record {
        let mut props = BTreeMap::new();
        props.insert("weight".to_string(), 12);
        Record {
            id: "obj-1".into(),
            time: 1_700_000_000_000,
            tags: vec!["a".into(), "b".into()],
            props,
        }
    }

    #[test]
    fn roundtrip_struct() {
        let record = sample();
        let bytes = to_cbor(&record).unwrap();
        let decoded: Record = from_cbor(&bytes).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn empty_input_is_eof() {
        let result: CodecResult<Record> = from_cbor(&[]);
        assert_eq!(result.unwrap_err(), CodecError::UnexpectedEof);
    }

    #[test]
    fn garbage_input_fails() {
        let result: CodecResult<Record> = from_cbor(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }

    #[test]
    fn envelope_roundtrip() {
        let record = sample();
        let bytes = to_envelope(&record).unwrap();
        let decoded: Record = from_envelope(&bytes).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn envelope_rejects_other_version() {
        #[derive(Serialize)]
        struct Future<'a> {
            version: u16,
            payload: &'a Record,
        }
        let record = sample();
        let bytes = to_cbor(&Future {
            version: FORMAT_VERSION + 1,
            payload: &record,
        })
        .unwrap();

        let result: CodecResult<Record> = from_envelope(&bytes);
        assert!(matches!(
            result,
            Err(CodecError::UnsupportedVersion { found, .. }) if found == FORMAT_VERSION + 1
        ));
    }

    proptest! {
        #[test]
        fn arbitrary_strings_survive(items in prop::collection::vec(".{0,16}", 0..8)) {
            let bytes = to_cbor(&items).unwrap();
            let decoded: Vec<String> = from_cbor(&bytes).unwrap();
            prop_assert_eq!(items, decoded);
        }
    }
}
