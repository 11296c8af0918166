//! # Plexus Core
//!
//! Core building blocks shared by every Plexus crate:
//!
//! - **Distributed identifiers** — `(origin rank, sequence)` pairs that are
//!   globally unique without any coordination, because each process only
//!   mints sequences for its own rank.
//! - **Graph model** — nodes and multi-layer directed edges carrying a
//!   `Local`/`Distant` state, plus the in-process [`Graph`](graph::Graph)
//!   with insert/erase callbacks that the distributed layer builds on.
//! - **Codecs** — two symmetric serialization codecs (binary and textual)
//!   with the same contract, and a process-wide registry for polymorphic
//!   payloads identified by numeric type tags.
//! - **Errors** — structured error types shared across the framework.
//!
//! ## Quick Start
//!
//! ```rust
//! use plexus_core::prelude::*;
//!
//! let mut graph: Graph<i32> = Graph::new(0);
//! let a = graph.mint_node_id();
//! graph.insert_node(Node::new(a, 7, 1.0)).unwrap();
//! assert_eq!(*graph.node(a).unwrap().data(), 7);
//! ```

pub mod codec;
pub mod error;
pub mod graph;
pub mod id;
pub mod prelude;

pub use codec::{BinaryCodec, Codec, JsonCodec};
pub use error::{CodecError, CommError, GraphError, PlexusError, Result};
pub use graph::{Edge, Graph, GraphData, LocationState, Node};
pub use id::{DistributedId, IdProvider, LayerId, Rank};
