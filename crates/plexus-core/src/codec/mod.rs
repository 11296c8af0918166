//! Serialization codecs.
//!
//! Two symmetric codecs share one contract: [`BinaryCodec`] produces compact
//! length-prefixed byte packs and is used for every transport payload;
//! [`JsonCodec`] produces human-readable text for debugging and snapshots.
//! For any serde-serializable value `x` and either codec,
//! `decode(encode(x)) == x`.
//!
//! Polymorphic application payloads (runtime-tagged variants) live in
//! [`registry`].

pub mod registry;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

pub use registry::{
    register_payload, DynPayload, LightPayload, TypeRegistry,
};

/// Common contract of the two codecs.
pub trait Codec {
    /// Serialize `value` into a fresh byte pack.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Deserialize a value from `bytes`.
    ///
    /// A failure here, when `bytes` came off the wire, invalidates global
    /// state and is fatal at the receiver.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Compact binary codec (bincode). Fixed-size primitives, length-prefixed
/// composites. This is the wire codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Textual codec (JSON), symmetric to [`BinaryCodec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};
    use crate::id::DistributedId;

    fn roundtrip<C: Codec>(codec: C) {
        let id = DistributedId::new(2, 40);
        let node = Node::new(id, String::from("payload"), 3.5);
        let bytes = codec.encode(&node).unwrap();
        let back: Node<String> = codec.decode(&bytes).unwrap();
        assert_eq!(back.id(), id);
        assert_eq!(back.data(), "payload");
        assert_eq!(back.weight(), 3.5);

        let edge = Edge::new(
            DistributedId::new(0, 1),
            id,
            DistributedId::new(1, 7),
            4,
            0.25,
        );
        let bytes = codec.encode(&edge).unwrap();
        let back: Edge = codec.decode(&bytes).unwrap();
        assert_eq!(back.id(), edge.id());
        assert_eq!(back.layer(), 4);
        assert_eq!(back.target(), DistributedId::new(1, 7));
    }

    #[test]
    fn test_binary_roundtrip() {
        roundtrip(BinaryCodec);
    }

    #[test]
    fn test_json_roundtrip() {
        roundtrip(JsonCodec);
    }

    #[test]
    fn test_decode_failure_is_reported() {
        let err = BinaryCodec.decode::<DistributedId>(&[1]).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));

        let err = JsonCodec.decode::<DistributedId>(b"not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
