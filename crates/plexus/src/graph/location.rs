//! Node location management.
//!
//! Each process tracks three disjoint id sets (local nodes, distant nodes,
//! nodes turned local since the last update) plus, for every id whose origin
//! is this process, the last known owner rank. After
//! [`LocationManager::update_locations`] returns, the `location` field of
//! every node referenced on this process is accurate, and the managed map of
//! each origin is authoritative for all processes.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use plexus_comm::{Communicator, TypedComm};
use plexus_core::error::{CommError, PlexusError};
use plexus_core::graph::{Graph, LocationState, Node};
use plexus_core::id::{DistributedId, Rank};

/// Per-process registry of where every referenced node currently lives.
pub struct LocationManager {
    rank: Rank,
    local_nodes: BTreeSet<DistributedId>,
    distant_nodes: BTreeSet<DistributedId>,
    new_local_nodes: BTreeSet<DistributedId>,
    managed: HashMap<DistributedId, Rank>,
    id_comm: TypedComm<DistributedId>,
    location_comm: TypedComm<(DistributedId, Rank)>,
}

impl LocationManager {
    pub fn new(comm: Rc<dyn Communicator>) -> Self {
        Self {
            rank: comm.rank(),
            local_nodes: BTreeSet::new(),
            distant_nodes: BTreeSet::new(),
            new_local_nodes: BTreeSet::new(),
            managed: HashMap::new(),
            id_comm: TypedComm::new(comm.clone()),
            location_comm: TypedComm::new(comm),
        }
    }

    /// Ids of the nodes this process owns.
    pub fn local_nodes(&self) -> &BTreeSet<DistributedId> {
        &self.local_nodes
    }

    /// Ids of the distant replicas held on this process.
    pub fn distant_nodes(&self) -> &BTreeSet<DistributedId> {
        &self.distant_nodes
    }

    /// Record that this process is the origin of `id`, currently owned by
    /// `rank`.
    pub fn add_managed(&mut self, id: DistributedId, rank: Rank) {
        self.managed.insert(id, rank);
    }

    /// Drop the managed entry of `id`.
    pub fn remove_managed(&mut self, id: DistributedId) {
        self.managed.remove(&id);
    }

    /// Last known owner of a node whose origin is this process.
    pub fn managed_location(&self, id: DistributedId) -> Option<Rank> {
        self.managed.get(&id).copied()
    }

    /// Mark `node` as owned by this process.
    pub fn set_local<T>(&mut self, node: &mut Node<T>) {
        node.set_location(self.rank);
        node.set_state(LocationState::Local);
        let id = node.id();
        self.distant_nodes.remove(&id);
        self.local_nodes.insert(id);
        self.new_local_nodes.insert(id);
    }

    /// Mark `node` as a replica of a node owned elsewhere.
    pub fn set_distant<T>(&mut self, node: &mut Node<T>) {
        node.set_state(LocationState::Distant);
        let id = node.id();
        self.local_nodes.remove(&id);
        self.new_local_nodes.remove(&id);
        self.distant_nodes.insert(id);
    }

    /// Forget `id` entirely (the node left this process).
    pub fn remove(&mut self, id: DistributedId) {
        self.local_nodes.remove(&id);
        self.distant_nodes.remove(&id);
        self.new_local_nodes.remove(&id);
    }

    /// Two-phase collective location update.
    ///
    /// 1. Every process tells the origin of each node that just became
    ///    local here that this process now owns it; origins update their
    ///    managed map.
    /// 2. Every process asks origins for the current location of each
    ///    distant node it holds; the answers refresh the `location` field
    ///    of the local replicas.
    ///
    /// Runs at every synchronization barrier that may have moved nodes.
    pub fn update_locations<T>(&mut self, graph: &mut Graph<T>) -> Result<(), PlexusError> {
        tracing::debug!(rank = self.rank, "updating node locations");

        // Phase 1: push updated locations to origins.
        let mut exported_updates: HashMap<Rank, Vec<DistributedId>> = HashMap::new();
        for id in &self.new_local_nodes {
            if id.origin() == self.rank {
                self.managed.insert(*id, self.rank);
            } else {
                exported_updates.entry(id.origin()).or_default().push(*id);
            }
        }
        let imported_updates = self.id_comm.exchange(exported_updates)?;
        for (owner, ids) in imported_updates {
            for id in ids {
                self.managed.insert(id, owner);
            }
        }

        // Distant nodes originating here are already answered by the local
        // managed map.
        for id in &self.distant_nodes {
            if id.origin() == self.rank {
                let location = self.managed.get(id).copied().ok_or(CommError::Malformed {
                    peer: self.rank,
                    tag: 0,
                    reason: format!("distant node {id} unknown to its origin"),
                })?;
                graph.node_mut(*id)?.set_location(location);
            }
        }

        // Phase 2: ask origins for the location of every other distant node.
        let mut requests: HashMap<Rank, Vec<DistributedId>> = HashMap::new();
        for id in &self.distant_nodes {
            if id.origin() != self.rank {
                requests.entry(id.origin()).or_default().push(*id);
            }
        }
        let imported_requests = self.id_comm.exchange(requests)?;

        let mut replies: HashMap<Rank, Vec<(DistributedId, Rank)>> = HashMap::new();
        for (asker, ids) in imported_requests {
            for id in ids {
                let location = self.managed.get(&id).copied().ok_or(CommError::Malformed {
                    peer: asker,
                    tag: 0,
                    reason: format!("location of unmanaged node {id} requested"),
                })?;
                replies.entry(asker).or_default().push((id, location));
            }
        }
        let imported_replies = self.location_comm.exchange(replies)?;
        for (_, locations) in imported_replies {
            for (id, location) in locations {
                graph.node_mut(id)?.set_location(location);
            }
        }

        self.new_local_nodes.clear();
        tracing::debug!(rank = self.rank, "node locations updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_comm::local::LocalCluster;

    #[test]
    fn test_state_sets_are_disjoint() {
        LocalCluster::run(1, |comm| {
            let comm: Rc<dyn Communicator> = Rc::new(comm);
            let mut manager = LocationManager::new(comm);
            let mut node = Node::new(DistributedId::new(0, 0), 1u32, 1.0);

            manager.set_local(&mut node);
            assert!(manager.local_nodes().contains(&node.id()));
            assert!(!manager.distant_nodes().contains(&node.id()));

            manager.set_distant(&mut node);
            assert!(!manager.local_nodes().contains(&node.id()));
            assert!(manager.distant_nodes().contains(&node.id()));
            assert_eq!(node.state(), LocationState::Distant);

            manager.remove(node.id());
            assert!(manager.distant_nodes().is_empty());
        });
    }

    #[test]
    fn test_update_locations_two_ranks() {
        // Rank 0 is the origin of one node which rank 1 now owns; rank 0
        // keeps a replica and must learn the new location from its own
        // managed map.
        LocalCluster::run(2, |comm| {
            let rank = comm.rank();
            let comm: Rc<dyn Communicator> = Rc::new(comm);
            let mut manager = LocationManager::new(comm);
            let mut graph: Graph<u32> = Graph::new(rank);
            let id = DistributedId::new(0, 0);

            let mut node = Node::new(id, 7, 1.0);
            if rank == 0 {
                manager.add_managed(id, 0);
                node.set_state(LocationState::Distant);
                graph.insert_node(node).unwrap();
                manager.set_distant(graph.node_mut(id).unwrap());
            } else {
                graph.insert_node(node).unwrap();
                manager.set_local(graph.node_mut(id).unwrap());
            }

            manager.update_locations(&mut graph).unwrap();

            if rank == 0 {
                assert_eq!(manager.managed_location(id), Some(1));
                assert_eq!(graph.node(id).unwrap().location(), 1);
            } else {
                assert_eq!(graph.node(id).unwrap().location(), 1);
                assert_eq!(graph.node(id).unwrap().state(), LocationState::Local);
            }
        });
    }
}
