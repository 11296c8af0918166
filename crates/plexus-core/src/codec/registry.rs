//! Polymorphic payload registry.
//!
//! Applications that store heterogeneous payloads (one node carries an agent
//! of one concrete type, the next node another) serialize them through a
//! process-wide table mapping a registered numeric type tag to the concrete
//! codec functions. The registry is populated once at startup, before any
//! communication happens.
//!
//! Two encodings are provided:
//! - [`DynPayload`] — the full variant: type tag + serialized payload bytes.
//! - [`LightPayload`] — type tag + identity only, used when the transport
//!   already carries the full data elsewhere.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::{BinaryCodec, Codec};
use crate::error::CodecError;
use crate::id::DistributedId;

/// Full polymorphic encoding: registered type tag + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynPayload {
    tag: u32,
    bytes: Vec<u8>,
}

impl DynPayload {
    /// The registered type tag of the wrapped payload.
    pub fn tag(&self) -> u32 {
        self.tag
    }
}

/// Light polymorphic encoding: registered type tag + identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightPayload {
    tag: u32,
    id: DistributedId,
}

impl LightPayload {
    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn id(&self) -> DistributedId {
        self.id
    }
}

struct RegistryEntry {
    type_id: TypeId,
    type_name: &'static str,
    decode_any: fn(&[u8]) -> Result<Box<dyn Any + Send>, CodecError>,
}

fn decode_any_of<T>(bytes: &[u8]) -> Result<Box<dyn Any + Send>, CodecError>
where
    T: DeserializeOwned + Any + Send,
{
    Ok(Box::new(BinaryCodec.decode::<T>(bytes)?))
}

/// Table of registered payload types.
///
/// A process-wide instance is available through [`register_payload`] and the
/// free pack/unpack functions; independent instances can be built for tests.
#[derive(Default)]
pub struct TypeRegistry {
    by_tag: HashMap<u32, RegistryEntry>,
    by_type: HashMap<TypeId, u32>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `tag`.
    ///
    /// Fails with [`CodecError::DuplicateTypeId`] when the tag is taken.
    /// Registering the same type twice under different tags is also refused.
    pub fn register<T>(&mut self, tag: u32) -> Result<(), CodecError>
    where
        T: Serialize + DeserializeOwned + Any + Send,
    {
        if self.by_tag.contains_key(&tag) {
            return Err(CodecError::DuplicateTypeId(tag));
        }
        let type_id = TypeId::of::<T>();
        if self.by_type.contains_key(&type_id) {
            return Err(CodecError::DuplicateTypeId(tag));
        }
        self.by_tag.insert(
            tag,
            RegistryEntry {
                type_id,
                type_name: std::any::type_name::<T>(),
                decode_any: decode_any_of::<T>,
            },
        );
        self.by_type.insert(type_id, tag);
        Ok(())
    }

    /// Tag registered for `T`, if any.
    pub fn tag_of<T: Any>(&self) -> Option<u32> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Encode `value` as a tagged payload.
    pub fn pack<T>(&self, value: &T) -> Result<DynPayload, CodecError>
    where
        T: Serialize + Any,
    {
        let tag = self
            .tag_of::<T>()
            .ok_or(CodecError::UnregisteredType(std::any::type_name::<T>()))?;
        Ok(DynPayload {
            tag,
            bytes: BinaryCodec.encode(value)?,
        })
    }

    /// Encode the identity of `value`'s type plus `id` as a light payload.
    pub fn pack_light<T: Any>(&self, id: DistributedId) -> Result<LightPayload, CodecError> {
        let tag = self
            .tag_of::<T>()
            .ok_or(CodecError::UnregisteredType(std::any::type_name::<T>()))?;
        Ok(LightPayload { tag, id })
    }

    /// Decode a tagged payload into the concrete type `T`.
    ///
    /// Fails with [`CodecError::BadTypeId`] for an unknown tag and
    /// [`CodecError::BadType`] when the tag maps to a different type.
    pub fn unpack<T>(&self, payload: &DynPayload) -> Result<T, CodecError>
    where
        T: DeserializeOwned + Any,
    {
        let entry = self
            .by_tag
            .get(&payload.tag)
            .ok_or(CodecError::BadTypeId(payload.tag))?;
        if entry.type_id != TypeId::of::<T>() {
            return Err(CodecError::BadType {
                tag: payload.tag,
                expected: std::any::type_name::<T>(),
            });
        }
        BinaryCodec.decode(&payload.bytes)
    }

    /// Decode a tagged payload into a type-erased box.
    pub fn unpack_any(&self, payload: &DynPayload) -> Result<Box<dyn Any + Send>, CodecError> {
        let entry = self
            .by_tag
            .get(&payload.tag)
            .ok_or(CodecError::BadTypeId(payload.tag))?;
        (entry.decode_any)(&payload.bytes)
    }

    /// Name of the type registered under `tag`, for diagnostics.
    pub fn type_name(&self, tag: u32) -> Option<&'static str> {
        self.by_tag.get(&tag).map(|e| e.type_name)
    }
}

static REGISTRY: Lazy<RwLock<TypeRegistry>> = Lazy::new(|| RwLock::new(TypeRegistry::new()));

/// Register `T` under `tag` in the process-wide registry.
///
/// Called at startup, before any payload crosses the wire.
pub fn register_payload<T>(tag: u32) -> Result<(), CodecError>
where
    T: Serialize + DeserializeOwned + Any + Send,
{
    REGISTRY
        .write()
        .expect("payload registry poisoned")
        .register::<T>(tag)
}

/// Encode `value` through the process-wide registry.
pub fn pack_payload<T>(value: &T) -> Result<DynPayload, CodecError>
where
    T: Serialize + Any,
{
    REGISTRY.read().expect("payload registry poisoned").pack(value)
}

/// Decode a payload through the process-wide registry.
pub fn unpack_payload<T>(payload: &DynPayload) -> Result<T, CodecError>
where
    T: DeserializeOwned + Any,
{
    REGISTRY
        .read()
        .expect("payload registry poisoned")
        .unpack(payload)
}

/// Encode a light payload for `T` through the process-wide registry.
pub fn pack_light_payload<T: Any>(id: DistributedId) -> Result<LightPayload, CodecError> {
    REGISTRY
        .read()
        .expect("payload registry poisoned")
        .pack_light::<T>(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Prey {
        energy: f32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Predator {
        hunger: u32,
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let mut registry = TypeRegistry::new();
        registry.register::<Prey>(1).unwrap();
        registry.register::<Predator>(2).unwrap();

        let prey = Prey { energy: 0.5 };
        let packed = registry.pack(&prey).unwrap();
        assert_eq!(packed.tag(), 1);
        assert_eq!(registry.unpack::<Prey>(&packed).unwrap(), prey);
    }

    #[test]
    fn test_duplicate_tag_refused() {
        let mut registry = TypeRegistry::new();
        registry.register::<Prey>(1).unwrap();
        assert_eq!(
            registry.register::<Predator>(1).unwrap_err(),
            CodecError::DuplicateTypeId(1)
        );
    }

    #[test]
    fn test_unknown_tag_is_bad_type_id() {
        let mut registry = TypeRegistry::new();
        registry.register::<Prey>(1).unwrap();
        let packed = registry.pack(&Prey { energy: 1.0 }).unwrap();

        let empty = TypeRegistry::new();
        assert_eq!(
            empty.unpack::<Prey>(&packed).unwrap_err(),
            CodecError::BadTypeId(1)
        );
    }

    #[test]
    fn test_wrong_concrete_type_is_bad_type() {
        let mut registry = TypeRegistry::new();
        registry.register::<Prey>(1).unwrap();
        registry.register::<Predator>(2).unwrap();
        let packed = registry.pack(&Prey { energy: 1.0 }).unwrap();

        assert!(matches!(
            registry.unpack::<Predator>(&packed).unwrap_err(),
            CodecError::BadType { tag: 1, .. }
        ));
    }

    #[test]
    fn test_unpack_any() {
        let mut registry = TypeRegistry::new();
        registry.register::<Predator>(7).unwrap();
        let packed = registry.pack(&Predator { hunger: 3 }).unwrap();

        let boxed = registry.unpack_any(&packed).unwrap();
        let predator = boxed.downcast::<Predator>().unwrap();
        assert_eq!(predator.hunger, 3);
    }

    #[test]
    fn test_light_payload_carries_identity_only() {
        let mut registry = TypeRegistry::new();
        registry.register::<Prey>(1).unwrap();

        let id = DistributedId::new(3, 12);
        let light = registry.pack_light::<Prey>(id).unwrap();
        assert_eq!(light.tag(), 1);
        assert_eq!(light.id(), id);
    }

    #[test]
    fn test_unregistered_type_refused() {
        let registry = TypeRegistry::new();
        assert!(matches!(
            registry.pack(&Prey { energy: 0.0 }).unwrap_err(),
            CodecError::UnregisteredType(_)
        ));
    }
}
