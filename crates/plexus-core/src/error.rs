//! Error types for Plexus operations.

use crate::id::{DistributedId, Rank};
use thiserror::Error;

/// Result type for Plexus operations.
pub type Result<T> = std::result::Result<T, PlexusError>;

/// Top-level error for the framework.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlexusError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Comm(#[from] CommError),
}

/// Errors local to one process, surfaced to the caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {0} not found")]
    NodeNotFound(DistributedId),

    #[error("edge {0} not found")]
    EdgeNotFound(DistributedId),

    #[error("node {0} already present")]
    DuplicateNode(DistributedId),

    #[error("edge {0} already present")]
    DuplicateEdge(DistributedId),

    #[error("edge {0} is not local to this process")]
    EdgeNotLocal(DistributedId),
}

/// Serialization errors.
///
/// `BadTypeId` and `BadType` invalidate global state when raised while
/// decoding a message: the receiver treats them as fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("serialization failed: {0}")]
    Encode(String),

    #[error("deserialization failed: {0}")]
    Decode(String),

    #[error("unknown payload type tag {0}")]
    BadTypeId(u32),

    #[error("payload with tag {tag} is not a {expected}")]
    BadType { tag: u32, expected: &'static str },

    #[error("payload type tag {0} registered twice")]
    DuplicateTypeId(u32),

    #[error("payload type {0} is not registered")]
    UnregisteredType(&'static str),
}

/// Communication errors. Not recovered: an error here aborts the process
/// (the rank's run closure propagates it out).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommError {
    #[error("peer {0} disconnected")]
    Disconnected(Rank),

    #[error("malformed message from rank {peer}, tag {tag:#x}: {reason}")]
    Malformed { peer: Rank, tag: u32, reason: String },

    #[error("rank {0} is outside the communicator")]
    InvalidRank(Rank),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphError::NodeNotFound(DistributedId::new(1, 4));
        assert_eq!(format!("{}", err), "node 1:4 not found");

        let err = CodecError::BadTypeId(9);
        assert_eq!(format!("{}", err), "unknown payload type tag 9");
    }

    #[test]
    fn test_umbrella_conversion() {
        let err: PlexusError = GraphError::EdgeNotFound(DistributedId::new(0, 1)).into();
        assert!(matches!(err, PlexusError::Graph(_)));
    }
}
