//! Ghost synchronization mode.
//!
//! Boundary nodes are kept as distant replicas ("ghosts") whose data is
//! refreshed in bulk at each synchronization barrier. Reads and writes on a
//! ghost are local: reads may observe stale data, and **writes to a ghost
//! are lost at the next synchronization**, overwritten by the owner's copy.
//!
//! Link, unlink and removal operations involving remote processes are
//! buffered and committed at the barrier with grouped exchanges, in this
//! order: links, unlinks, removal requests, deferred removals (which emit a
//! second unlink wave). Link commits always complete before the data
//! refresh, so newly linked edges observe consistent endpoint data.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

use plexus_comm::{Communicator, TypedComm};
use plexus_core::error::PlexusError;
use plexus_core::graph::{Edge, GraphData, LocationState};
use plexus_core::id::{DistributedId, Rank};

use crate::graph::migration::{edge_pack, import_edge, EdgePack, NodeUpdate};
use crate::graph::GraphCore;
use crate::sync::SyncMode;

/// Buffers link/unlink/removal operations and commits them at the barrier.
pub struct GhostSyncLinker<T: GraphData> {
    edge_comm: TypedComm<EdgePack<T>>,
    id_comm: TypedComm<DistributedId>,
    /// Edges linked since the last barrier, keyed by edge id. An unlink of
    /// a buffered edge id erases the buffered entry.
    link_buffer: BTreeSet<DistributedId>,
    /// Edge ids to erase on the ranks holding the other representation.
    unlink_buffer: HashMap<Rank, Vec<DistributedId>>,
    /// Local nodes whose removal is deferred to the barrier.
    local_removals: BTreeSet<DistributedId>,
    /// Removal requests addressed to the owners of distant nodes.
    distant_removals: HashMap<Rank, Vec<DistributedId>>,
}

impl<T: GraphData> GhostSyncLinker<T> {
    fn new(comm: Rc<dyn Communicator>) -> Self {
        Self {
            edge_comm: TypedComm::new(comm.clone()),
            id_comm: TypedComm::new(comm),
            link_buffer: BTreeSet::new(),
            unlink_buffer: HashMap::new(),
            local_removals: BTreeSet::new(),
            distant_removals: HashMap::new(),
        }
    }

    fn buffer_link(&mut self, core: &GraphCore<T>, edge: DistributedId) -> Result<(), PlexusError> {
        if core.graph().edge(edge)?.state() == LocationState::Distant {
            self.link_buffer.insert(edge);
        }
        Ok(())
    }

    fn buffer_unlink(
        &mut self,
        core: &GraphCore<T>,
        edge_id: DistributedId,
    ) -> Result<(), PlexusError> {
        // An unlink before the buffered link was flushed cancels the link;
        // the exported unlink is then ignored remotely (idempotence).
        self.link_buffer.remove(&edge_id);
        let edge = core.graph().edge(edge_id)?;
        for endpoint in [edge.source(), edge.target()] {
            let node = core.graph().node(endpoint)?;
            if node.state() == LocationState::Distant {
                self.unlink_buffer
                    .entry(node.location())
                    .or_default()
                    .push(edge_id);
            }
        }
        Ok(())
    }

    fn buffer_removal(
        &mut self,
        core: &GraphCore<T>,
        node: DistributedId,
    ) -> Result<(), PlexusError> {
        let target = core.graph().node(node)?;
        match target.state() {
            LocationState::Local => {
                self.local_removals.insert(node);
            }
            LocationState::Distant => {
                self.distant_removals
                    .entry(target.location())
                    .or_default()
                    .push(node);
            }
        }
        Ok(())
    }

    /// Commit every buffered operation. Collective.
    fn synchronize(&mut self, core: &mut GraphCore<T>) -> Result<(), PlexusError> {
        tracing::debug!(
            rank = core.rank(),
            links = self.link_buffer.len(),
            unlinks = self.unlink_buffer.values().map(Vec::len).sum::<usize>(),
            "committing buffered graph operations"
        );

        // Links first: grouped by the ranks holding an endpoint.
        let mut link_exports: HashMap<Rank, Vec<EdgePack<T>>> = HashMap::new();
        let mut ghost_edges: Vec<DistributedId> = Vec::new();
        for edge_id in std::mem::take(&mut self.link_buffer) {
            // The edge may have been erased since it was buffered.
            let edge = match core.graph().edge(edge_id) {
                Ok(edge) => edge,
                Err(_) => continue,
            };
            let pack = edge_pack(core, edge, &BTreeMap::new())?;
            let source = core.graph().node(edge.source())?;
            let target = core.graph().node(edge.target())?;
            let mut destinations = BTreeSet::new();
            if source.state() == LocationState::Distant {
                destinations.insert(source.location());
            }
            if target.state() == LocationState::Distant {
                destinations.insert(target.location());
            }
            if source.state() == LocationState::Distant
                && target.state() == LocationState::Distant
            {
                // An edge between two ghosts only exists on the owners'
                // ranks once committed; the local copy goes away below.
                ghost_edges.push(edge_id);
            }
            for destination in destinations {
                link_exports
                    .entry(destination)
                    .or_default()
                    .push(pack.clone());
            }
        }
        let imported_links = self.edge_comm.exchange(link_exports)?;
        for packs in imported_links.into_values() {
            for pack in packs {
                import_edge(core, pack)?;
            }
        }
        for edge_id in ghost_edges {
            if core.graph().contains_edge(edge_id) {
                core.erase_edge_and_cleanup(edge_id)?;
            }
        }

        // Unlinks. A duplicate or unknown edge id is silently ignored.
        let imported_unlinks = self.id_comm.exchange(std::mem::take(&mut self.unlink_buffer))?;
        for ids in imported_unlinks.into_values() {
            for edge_id in ids {
                if core.graph().contains_edge(edge_id) {
                    core.erase_edge_and_cleanup(edge_id)?;
                }
            }
        }

        // Removal requests travel to the owners, which queue them with
        // their own deferred removals.
        let imported_removals =
            self.id_comm.exchange(std::mem::take(&mut self.distant_removals))?;
        let mut removals = std::mem::take(&mut self.local_removals);
        for ids in imported_removals.into_values() {
            removals.extend(ids);
        }

        // Deferred removals: tear down incident edges (notifying the ranks
        // holding the other representation through a second unlink wave),
        // then erase the node.
        let mut unlink_wave: HashMap<Rank, Vec<DistributedId>> = HashMap::new();
        for node_id in removals {
            if !core.graph().contains_node(node_id) {
                continue;
            }
            for edge_id in core.graph().node(node_id)?.incident_edges() {
                if !core.graph().contains_edge(edge_id) {
                    continue;
                }
                let edge = core.graph().edge(edge_id)?;
                let (source, target) = (edge.source(), edge.target());
                for endpoint in [source, target] {
                    let node = core.graph().node(endpoint)?;
                    if node.state() == LocationState::Distant {
                        unlink_wave
                            .entry(node.location())
                            .or_default()
                            .push(edge_id);
                    }
                }
                core.erase_edge_and_cleanup(edge_id)?;
            }
            if core.graph().contains_node(node_id) {
                core.erase_node_full(node_id)?;
            }
        }
        let imported_wave = self.id_comm.exchange(unlink_wave)?;
        for ids in imported_wave.into_values() {
            for edge_id in ids {
                if core.graph().contains_edge(edge_id) {
                    core.erase_edge_and_cleanup(edge_id)?;
                }
            }
        }
        Ok(())
    }
}

/// Bulk refresh of ghost replicas at the barrier.
pub struct GhostDataSync<T: GraphData> {
    id_comm: TypedComm<DistributedId>,
    update_comm: TypedComm<NodeUpdate<T>>,
}

impl<T: GraphData> GhostDataSync<T> {
    fn new(comm: Rc<dyn Communicator>) -> Self {
        Self {
            id_comm: TypedComm::new(comm.clone()),
            update_comm: TypedComm::new(comm),
        }
    }

    /// One request per distant node to its owner; owners reply with data
    /// and weight; replicas update in place. Collective.
    fn synchronize(
        &mut self,
        core: &mut GraphCore<T>,
        subset: Option<&BTreeSet<DistributedId>>,
    ) -> Result<(), PlexusError> {
        let mut requests: HashMap<Rank, Vec<DistributedId>> = HashMap::new();
        for id in core.locations().distant_nodes() {
            if subset.map_or(true, |subset| subset.contains(id)) {
                let location = core.graph().node(*id)?.location();
                requests.entry(location).or_default().push(*id);
            }
        }
        let incoming = self.id_comm.exchange(requests)?;

        let mut replies: HashMap<Rank, Vec<NodeUpdate<T>>> = HashMap::new();
        for (asker, ids) in incoming {
            for id in ids {
                // A request for a node this process does not own is a
                // protocol violation; the lookup error aborts.
                let node = core.graph().node(id)?;
                replies.entry(asker).or_default().push(NodeUpdate {
                    id,
                    weight: node.weight(),
                    data: node.data().clone(),
                });
            }
        }
        let updates = self.update_comm.exchange(replies)?;
        for updates in updates.into_values() {
            for update in updates {
                let node = core.graph_mut().node_mut(update.id)?;
                node.set_data(update.data);
                node.set_weight(update.weight);
            }
        }
        Ok(())
    }
}

/// Synchronization mode keeping bulk-refreshed ghost replicas of boundary
/// nodes.
pub struct GhostMode<T: GraphData> {
    linker: GhostSyncLinker<T>,
    data: GhostDataSync<T>,
}

impl<T: GraphData> GhostMode<T> {
    pub fn new(comm: Rc<dyn Communicator>) -> Self {
        Self {
            linker: GhostSyncLinker::new(comm.clone()),
            data: GhostDataSync::new(comm),
        }
    }
}

impl<T: GraphData> SyncMode<T> for GhostMode<T> {
    fn name(&self) -> &'static str {
        "ghost"
    }

    fn init_link(&mut self, _core: &mut GraphCore<T>, _edge: &Edge) -> Result<(), PlexusError> {
        Ok(())
    }

    fn notify_linked(
        &mut self,
        core: &mut GraphCore<T>,
        edge: DistributedId,
    ) -> Result<(), PlexusError> {
        self.linker.buffer_link(core, edge)
    }

    fn init_unlink(
        &mut self,
        core: &mut GraphCore<T>,
        edge: DistributedId,
    ) -> Result<(), PlexusError> {
        self.linker.buffer_unlink(core, edge)
    }

    fn notify_unlinked(
        &mut self,
        _core: &mut GraphCore<T>,
        _edge: &Edge,
    ) -> Result<(), PlexusError> {
        Ok(())
    }

    fn remove_node(
        &mut self,
        core: &mut GraphCore<T>,
        node: DistributedId,
    ) -> Result<(), PlexusError> {
        self.linker.buffer_removal(core, node)
    }

    fn synchronize_links(&mut self, core: &mut GraphCore<T>) -> Result<(), PlexusError> {
        self.linker.synchronize(core)
    }

    fn synchronize_data(
        &mut self,
        core: &mut GraphCore<T>,
        subset: Option<&BTreeSet<DistributedId>>,
    ) -> Result<(), PlexusError> {
        self.data.synchronize(core, subset)
    }

    fn read(&mut self, core: &mut GraphCore<T>, node: DistributedId) -> Result<T, PlexusError> {
        // Ghost reads are local; freshness is whatever the last barrier
        // delivered.
        Ok(core.graph().node(node)?.data().clone())
    }

    fn release_read(
        &mut self,
        _core: &mut GraphCore<T>,
        _node: DistributedId,
    ) -> Result<(), PlexusError> {
        Ok(())
    }

    fn acquire(&mut self, core: &mut GraphCore<T>, node: DistributedId) -> Result<T, PlexusError> {
        Ok(core.graph().node(node)?.data().clone())
    }

    fn release_acquire(
        &mut self,
        core: &mut GraphCore<T>,
        node: DistributedId,
        data: T,
    ) -> Result<(), PlexusError> {
        // On a ghost this is a local write, overwritten at the next
        // synchronization.
        core.graph_mut().node_mut(node)?.set_data(data);
        Ok(())
    }

    fn lock(&mut self, _core: &mut GraphCore<T>, _node: DistributedId) -> Result<(), PlexusError> {
        Ok(())
    }

    fn unlock(
        &mut self,
        _core: &mut GraphCore<T>,
        _node: DistributedId,
    ) -> Result<(), PlexusError> {
        Ok(())
    }

    fn lock_shared(
        &mut self,
        _core: &mut GraphCore<T>,
        _node: DistributedId,
    ) -> Result<(), PlexusError> {
        Ok(())
    }

    fn unlock_shared(
        &mut self,
        _core: &mut GraphCore<T>,
        _node: DistributedId,
    ) -> Result<(), PlexusError> {
        Ok(())
    }
}
