//! Self-describing record encoding
//!
//! Every value persisted in the store is encoded with MessagePack
//! (`rmp-serde`) in "named struct" mode, so a record written by a newer
//! schema can be read by an older one: fields the reader doesn't recognize
//! land in `Todo::extra` via `#[serde(flatten)]` instead of being rejected
//! or silently truncated.

use jari_core::{JariError, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Encode a value as a self-describing MessagePack record.
///
/// Uses named-field (map) encoding rather than positional-field (array)
/// encoding so that added/removed/reordered fields round-trip safely.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut serializer = rmp_serde::Serializer::new(&mut buf).with_struct_map();
    value
        .serialize(&mut serializer)
        .map_err(|e| JariError::StorageCorrupt(format!("encode failed: {e}")))?;
    Ok(buf)
}

/// Decode a value previously written by `encode`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes)
        .map_err(|e| JariError::StorageCorrupt(format!("decode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        a: u32,
        b: String,
        #[serde(default, flatten)]
        extra: BTreeMap<String, rmpv::Value>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SampleV2 {
        a: u32,
        b: String,
        c: bool,
        #[serde(default, flatten)]
        extra: BTreeMap<String, rmpv::Value>,
    }

    #[test]
    fn roundtrips() {
        let s = Sample {
            a: 1,
            b: "hi".into(),
            extra: BTreeMap::new(),
        };
        let bytes = encode(&s).unwrap();
        let back: Sample = decode(&bytes).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn unknown_fields_are_preserved_through_extra() {
        let newer = SampleV2 {
            a: 1,
            b: "hi".into(),
            c: true,
            extra: BTreeMap::new(),
        };
        let bytes = encode(&newer).unwrap();

        // An older schema without `c` still decodes, capturing `c` in `extra`.
        let older: Sample = decode(&bytes).unwrap();
        assert_eq!(older.a, 1);
        assert_eq!(older.b, "hi");
        assert_eq!(older.extra.get("c"), Some(&rmpv::Value::Boolean(true)));

        // Re-encoding the older view and decoding as the newer schema
        // recovers the field the older reader never understood.
        let re_encoded = encode(&older).unwrap();
        let recovered: SampleV2 = decode(&re_encoded).unwrap();
        assert_eq!(recovered, newer);
    }
}
