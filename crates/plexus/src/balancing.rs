//! Load-balancing boundary.
//!
//! The partitioner itself is an external collaborator: the framework only
//! consumes the [`PartitionMap`] it produces. Implementations receive a
//! read-only view of the local partition (node weights, adjacency, location
//! sets, and the communicator for any collective they need) and return the
//! destination rank of each node they want to move.

use std::collections::HashMap;

use plexus_core::graph::GraphData;
use plexus_core::id::{DistributedId, Rank};

use crate::graph::GraphCore;

/// Destination rank of each node for the next distribution pass.
///
/// Entries for nodes that are not local to the calling process are ignored.
pub type PartitionMap = HashMap<DistributedId, Rank>;

/// Which balancing algorithm variant a partitioner should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMode {
    /// Build a partition from scratch.
    Partition,
    /// Improve the current partition, favoring low migration volume.
    Repartition,
}

/// External load-balancing algorithm.
pub trait LoadBalancing<T: GraphData> {
    /// Produce the next partition of the local nodes.
    ///
    /// Called inside a global barrier: implementations are free to perform
    /// collective communication through the core's communicator.
    fn balance(&mut self, core: &GraphCore<T>, mode: PartitionMode) -> PartitionMap;
}
