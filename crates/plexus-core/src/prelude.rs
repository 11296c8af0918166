//! Convenience re-exports for downstream crates and applications.

pub use crate::codec::{BinaryCodec, Codec, DynPayload, JsonCodec, LightPayload};
pub use crate::error::{CodecError, CommError, GraphError, PlexusError, Result};
pub use crate::graph::{Edge, Graph, GraphData, LocationState, Node};
pub use crate::id::{DistributedId, IdProvider, LayerId, Rank};
