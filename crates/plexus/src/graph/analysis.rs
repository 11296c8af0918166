//! Distributed graph analysis.
//!
//! Collective measures over the whole distributed graph. Every function
//! here is synchronous: it cannot return before being initiated by all
//! processes of the communicator.

use std::collections::{BTreeSet, HashMap};

use plexus_comm::{all_reduce, TypedComm};
use plexus_core::error::PlexusError;
use plexus_core::graph::{GraphData, LocationState};
use plexus_core::id::{DistributedId, LayerId, Rank};

use crate::graph::DistributedGraph;

/// Total number of nodes in the distributed graph.
pub fn node_count<T: GraphData>(graph: &DistributedGraph<T>) -> Result<usize, PlexusError> {
    let counter: TypedComm<u64> = TypedComm::new(graph.communicator());
    let local = graph.locations().local_nodes().len() as u64;
    Ok(all_reduce(&counter, local, |a, b| a + b)? as usize)
}

/// Total number of edges in the distributed graph.
///
/// Each edge is counted on the rank owning its source node, so edges
/// crossing a process boundary are counted exactly once.
pub fn edge_count<T: GraphData>(graph: &DistributedGraph<T>) -> Result<usize, PlexusError> {
    let mut local = 0u64;
    for id in graph.locations().local_nodes() {
        local += graph.local_graph().node(*id)?.all_outgoing().count() as u64;
    }
    let counter: TypedComm<u64> = TypedComm::new(graph.communicator());
    Ok(all_reduce(&counter, local, |a, b| a + b)? as usize)
}

/// Outgoing neighbor ids of every distant node visible on this process,
/// on one layer.
///
/// The distribution process only preserves edges with at least one local
/// endpoint, so the neighborhood of a distant node is not locally known;
/// this collective asks each owner for it.
pub fn distant_nodes_outgoing_neighbors<T: GraphData>(
    graph: &DistributedGraph<T>,
    layer: LayerId,
) -> Result<HashMap<DistributedId, Vec<DistributedId>>, PlexusError> {
    let request_comm: TypedComm<DistributedId> = TypedComm::new(graph.communicator());
    let reply_comm: TypedComm<(DistributedId, Vec<DistributedId>)> =
        TypedComm::new(graph.communicator());

    let mut requests: HashMap<Rank, Vec<DistributedId>> = HashMap::new();
    for id in graph.locations().distant_nodes() {
        let location = graph.local_graph().node(*id)?.location();
        requests.entry(location).or_default().push(*id);
    }
    let incoming = request_comm.exchange(requests)?;

    let mut replies: HashMap<Rank, Vec<(DistributedId, Vec<DistributedId>)>> = HashMap::new();
    for (asker, ids) in incoming {
        for id in ids {
            let mut neighbors = Vec::new();
            for edge in graph.local_graph().outgoing_edges(id, layer)? {
                neighbors.push(edge.target());
            }
            replies.entry(asker).or_default().push((id, neighbors));
        }
    }
    let incoming_replies = reply_comm.exchange(replies)?;

    let mut neighbors = HashMap::new();
    for entries in incoming_replies.into_values() {
        for (id, list) in entries {
            neighbors.insert(id, list);
        }
    }
    Ok(neighbors)
}

/// Watts–Strogatz local clustering coefficient of the graph on one layer,
/// averaged over all nodes.
///
/// For each node, the proportion of existing edges between its neighbors
/// (incoming and outgoing, self-edges excluded). A complete graph yields
/// 1.0; an empty layer yields 0.0. The amount of imported data is
/// proportional to the count of distant nodes, which keeps the measure
/// scalable.
pub fn clustering_coefficient<T: GraphData>(
    graph: &DistributedGraph<T>,
    layer: LayerId,
) -> Result<f64, PlexusError> {
    let distant_neighbors = distant_nodes_outgoing_neighbors(graph, layer)?;

    let mut local_sum = 0f64;
    for id in graph.locations().local_nodes() {
        let node = graph.local_graph().node(*id)?;

        let mut neighbors: BTreeSet<DistributedId> = BTreeSet::new();
        for edge in graph.local_graph().incoming_edges(*id, layer)? {
            neighbors.insert(edge.source());
        }
        for edge in graph.local_graph().outgoing_edges(*id, layer)? {
            neighbors.insert(edge.target());
        }
        neighbors.remove(&node.id());

        // Count edges between neighbors. Only outgoing edges of each
        // neighbor are considered, so every edge is counted exactly once.
        let mut links = 0usize;
        for neighbor_id in &neighbors {
            let neighbor = graph.local_graph().node(*neighbor_id)?;
            if neighbor.state() == LocationState::Local {
                for edge in graph.local_graph().outgoing_edges(*neighbor_id, layer)? {
                    let target = edge.target();
                    if target != *id && neighbors.contains(&target) {
                        links += 1;
                    }
                }
            } else if let Some(list) = distant_neighbors.get(neighbor_id) {
                for target in list {
                    if target != id && neighbors.contains(target) {
                        links += 1;
                    }
                }
            }
        }
        let k = neighbors.len();
        if k > 1 {
            local_sum += links as f64 / (k * (k - 1)) as f64;
        }
    }

    let double_comm: TypedComm<f64> = TypedComm::new(graph.communicator());
    let count_comm: TypedComm<u64> = TypedComm::new(graph.communicator());
    let total = all_reduce(&double_comm, local_sum, |a, b| a + b)?;
    let nodes = all_reduce(
        &count_comm,
        graph.locations().local_nodes().len() as u64,
        |a, b| a + b,
    )?;
    if nodes > 0 {
        Ok(total / nodes as f64)
    } else {
        Ok(0.0)
    }
}
