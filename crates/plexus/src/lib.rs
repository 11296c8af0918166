//! # Plexus
//!
//! A distributed graph substrate for parallel agent-based and graph-based
//! simulation. A directed, multi-layer, weighted graph is partitioned
//! across the ranks of a communicator; nodes and edges migrate between
//! ranks to balance load, and the consistency of data accessed across rank
//! boundaries is maintained by a pluggable synchronization mode:
//!
//! - **none** — purely local, cross-rank edges dropped at distribution;
//! - **ghost** — boundary replicas refreshed in bulk at barriers;
//! - **hard** — per-access RPC with per-node read/write locks and a
//!   distributed termination algorithm.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::rc::Rc;
//! use plexus::prelude::*;
//!
//! // Two ranks, each thread is one process of the simulation.
//! LocalCluster::run(2, |comm| {
//!     let comm: Rc<dyn Communicator> = Rc::new(comm);
//!     let mut graph: DistributedGraph<i32> = DistributedGraph::ghost(comm.clone());
//!
//!     let mut partition = PartitionMap::new();
//!     if comm.rank() == 0 {
//!         let a = graph.build_node(1).unwrap();
//!         let b = graph.build_node(2).unwrap();
//!         graph.link(a, b, 0).unwrap();
//!         partition.insert(a, 0);
//!         partition.insert(b, 1);
//!     }
//!     graph.distribute(partition).unwrap();
//!     assert_eq!(graph.locations().local_nodes().len(), 1);
//! });
//! ```

pub mod balancing;
pub mod graph;
pub mod sync;

pub mod prelude;

pub use balancing::{LoadBalancing, PartitionMap, PartitionMode};
pub use graph::analysis;
pub use graph::events::{SetDistantContext, SetLocalContext};
pub use graph::location::LocationManager;
pub use graph::{DistributedGraph, GraphCore};
pub use sync::ghost::GhostMode;
pub use sync::hard::HardSyncMode;
pub use sync::none::NoSyncMode;
pub use sync::SyncMode;
