//! Convenience re-exports for applications.

pub use plexus_comm::local::{ClusterConfig, LocalCluster, LocalComm};
pub use plexus_comm::{all_reduce, Communicator, TypedComm};
pub use plexus_core::prelude::*;

pub use crate::balancing::{LoadBalancing, PartitionMap, PartitionMode};
pub use crate::graph::analysis;
pub use crate::graph::events::{SetDistantContext, SetLocalContext};
pub use crate::graph::{DistributedGraph, GraphCore};
pub use crate::sync::SyncMode;
