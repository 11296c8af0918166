//! The distributed graph.
//!
//! [`DistributedGraph`] is the facade applications drive: it owns the local
//! partition of the global graph (a [`GraphCore`]) and dispatches every
//! lifecycle operation through the active synchronization mode. Lifecycle
//! operations on purely local data mutate state immediately; operations
//! touching distant nodes are escalated to the mode, which either buffers
//! them until the next barrier (ghost), forwards them on the fly (hard
//! sync), or ignores them (no sync).

pub mod analysis;
pub mod events;
pub mod location;
pub(crate) mod migration;

use std::collections::BTreeSet;
use std::rc::Rc;

use plexus_comm::Communicator;
use plexus_core::error::{GraphError, PlexusError};
use plexus_core::graph::{Edge, Graph, GraphData, LocationState, Node};
use plexus_core::id::{DistributedId, LayerId, Rank};

use crate::balancing::{LoadBalancing, PartitionMap, PartitionMode};
use crate::sync::hard::enums::Epoch;
use crate::sync::hard::HardSyncMode;
use crate::sync::ghost::GhostMode;
use crate::sync::none::NoSyncMode;
use crate::sync::SyncMode;

use events::{SetDistantContext, SetLocalContext};
use location::LocationManager;

type SetLocalCallback<T> = Box<dyn FnMut(&Node<T>, SetLocalContext)>;
type SetDistantCallback<T> = Box<dyn FnMut(&Node<T>, SetDistantContext)>;

/// Local partition state: base graph, location manager, lifecycle
/// callbacks and the unsynchronized-node buffer.
///
/// Sync modes and migration operate on the core while the mode object
/// itself is borrowed separately by the facade.
pub struct GraphCore<T> {
    comm: Rc<dyn Communicator>,
    graph: Graph<T>,
    locations: LocationManager,
    set_local_callbacks: Vec<SetLocalCallback<T>>,
    set_distant_callbacks: Vec<SetDistantCallback<T>>,
    unsync_nodes: BTreeSet<DistributedId>,
}

impl<T: GraphData> GraphCore<T> {
    pub(crate) fn new(comm: Rc<dyn Communicator>) -> Self {
        let rank = comm.rank();
        Self {
            graph: Graph::new(rank),
            locations: LocationManager::new(comm.clone()),
            comm,
            set_local_callbacks: Vec::new(),
            set_distant_callbacks: Vec::new(),
            unsync_nodes: BTreeSet::new(),
        }
    }

    pub fn rank(&self) -> Rank {
        self.comm.rank()
    }

    pub fn size(&self) -> u32 {
        self.comm.size()
    }

    pub fn comm(&self) -> Rc<dyn Communicator> {
        self.comm.clone()
    }

    pub fn graph(&self) -> &Graph<T> {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph<T> {
        &mut self.graph
    }

    pub fn locations(&self) -> &LocationManager {
        &self.locations
    }

    /// Nodes turned distant since the last data synchronization.
    pub fn unsynchronized_nodes(&self) -> &BTreeSet<DistributedId> {
        &self.unsync_nodes
    }

    pub(crate) fn mark_unsynchronized(&mut self, id: DistributedId) {
        self.unsync_nodes.insert(id);
    }

    pub(crate) fn clear_unsynchronized(&mut self) {
        self.unsync_nodes.clear();
    }

    pub(crate) fn remove_unsynchronized(&mut self, ids: &BTreeSet<DistributedId>) {
        for id in ids {
            self.unsync_nodes.remove(id);
        }
    }

    pub(crate) fn add_on_set_local(&mut self, cb: impl FnMut(&Node<T>, SetLocalContext) + 'static) {
        self.set_local_callbacks.push(Box::new(cb));
    }

    pub(crate) fn add_on_set_distant(
        &mut self,
        cb: impl FnMut(&Node<T>, SetDistantContext) + 'static,
    ) {
        self.set_distant_callbacks.push(Box::new(cb));
    }

    /// Mark a node local, recompute incident edge states and fire the
    /// registered callbacks.
    pub(crate) fn set_local(
        &mut self,
        id: DistributedId,
        context: SetLocalContext,
    ) -> Result<(), GraphError> {
        {
            let node = self.graph.node_mut(id)?;
            self.locations.set_local(node);
        }
        self.refresh_incident_edge_states(id)?;
        self.fire_set_local(id, context);
        Ok(())
    }

    /// Mark a node distant (optionally repositioning it), flip incident
    /// edges distant and fire the registered callbacks.
    pub(crate) fn set_distant(
        &mut self,
        id: DistributedId,
        location: Option<Rank>,
        context: SetDistantContext,
    ) -> Result<(), GraphError> {
        {
            let node = self.graph.node_mut(id)?;
            self.locations.set_distant(node);
            if let Some(location) = location {
                node.set_location(location);
            }
        }
        // A distant endpoint makes every incident edge distant.
        for edge_id in self.graph.node(id)?.incident_edges() {
            self.graph.edge_mut(edge_id)?.set_state(LocationState::Distant);
        }
        self.fire_set_distant(id, context);
        Ok(())
    }

    fn refresh_incident_edge_states(&mut self, id: DistributedId) -> Result<(), GraphError> {
        for edge_id in self.graph.node(id)?.incident_edges() {
            let edge = self.graph.edge(edge_id)?;
            let source_local =
                self.graph.node(edge.source())?.state() == LocationState::Local;
            let target_local =
                self.graph.node(edge.target())?.state() == LocationState::Local;
            let state = if source_local && target_local {
                LocationState::Local
            } else {
                LocationState::Distant
            };
            self.graph.edge_mut(edge_id)?.set_state(state);
        }
        Ok(())
    }

    fn fire_set_local(&mut self, id: DistributedId, context: SetLocalContext) {
        let mut callbacks = std::mem::take(&mut self.set_local_callbacks);
        if let Ok(node) = self.graph.node(id) {
            for cb in &mut callbacks {
                cb(node, context);
            }
        }
        self.set_local_callbacks = callbacks;
    }

    fn fire_set_distant(&mut self, id: DistributedId, context: SetDistantContext) {
        let mut callbacks = std::mem::take(&mut self.set_distant_callbacks);
        if let Ok(node) = self.graph.node(id) {
            for cb in &mut callbacks {
                cb(node, context);
            }
        }
        self.set_distant_callbacks = callbacks;
    }

    /// Instantiate a fresh distant replica, typically as the endpoint of an
    /// imported edge.
    pub(crate) fn create_distant_node(
        &mut self,
        id: DistributedId,
        data: T,
        weight: f32,
        location: Rank,
    ) -> Result<(), GraphError> {
        self.graph
            .insert_node(Node::new_distant(id, data, weight, location))?;
        {
            let node = self.graph.node_mut(id)?;
            self.locations.set_distant(node);
        }
        self.unsync_nodes.insert(id);
        self.fire_set_distant(id, SetDistantContext::ImportNewDistant);
        Ok(())
    }

    /// Erase an edge, then erase any distant endpoint left with no
    /// incident edge (an orphaned replica serves no purpose).
    pub(crate) fn erase_edge_and_cleanup(
        &mut self,
        id: DistributedId,
    ) -> Result<Edge, GraphError> {
        let edge = self.graph.erase_edge(id)?;
        self.cleanup_orphan(edge.source())?;
        if edge.target() != edge.source() {
            self.cleanup_orphan(edge.target())?;
        }
        Ok(edge)
    }

    fn cleanup_orphan(&mut self, id: DistributedId) -> Result<(), GraphError> {
        if let Ok(node) = self.graph.node(id) {
            if node.state() == LocationState::Distant && node.is_orphan() {
                tracing::trace!(rank = self.rank(), node = %id, "clearing orphaned replica");
                self.erase_node_full(id)?;
            }
        }
        Ok(())
    }

    /// Erase a node with all bookkeeping: incident edges first (with orphan
    /// cleanup on the opposite endpoints), then the node, the location sets
    /// and, when this process is the origin, the managed entry.
    pub(crate) fn erase_node_full(&mut self, id: DistributedId) -> Result<Node<T>, GraphError> {
        let incident = self.graph.node(id)?.incident_edges();
        for edge_id in incident {
            if !self.graph.contains_edge(edge_id) {
                continue;
            }
            let edge = self.graph.erase_edge(edge_id)?;
            let other = edge.opposite(id);
            if other != id {
                self.cleanup_orphan(other)?;
            }
        }
        let node = self.graph.erase_node(id)?;
        self.locations.remove(id);
        if id.origin() == self.rank() {
            self.locations.remove_managed(id);
        }
        self.unsync_nodes.remove(&id);
        Ok(node)
    }

    /// Run the collective two-phase location update.
    pub(crate) fn update_locations(&mut self) -> Result<(), PlexusError> {
        let Self {
            graph, locations, ..
        } = self;
        locations.update_locations(graph)
    }
}

/// The local partition of a graph distributed across all ranks of a
/// communicator.
pub struct DistributedGraph<T: GraphData> {
    core: GraphCore<T>,
    sync: Box<dyn SyncMode<T>>,
    balanced_once: bool,
}

impl<T: GraphData> DistributedGraph<T> {
    /// A graph with no synchronization: purely local, cross-process edges
    /// are dropped at distribution time.
    pub fn unsynchronized(comm: Rc<dyn Communicator>) -> Self {
        let core = GraphCore::new(comm);
        Self {
            core,
            sync: Box::new(NoSyncMode::new()),
            balanced_once: false,
        }
    }

    /// A graph keeping boundary nodes as ghost replicas, bulk-refreshed at
    /// each synchronization barrier.
    pub fn ghost(comm: Rc<dyn Communicator>) -> Self {
        let core = GraphCore::new(comm.clone());
        Self {
            core,
            sync: Box::new(GhostMode::new(comm)),
            balanced_once: false,
        }
    }

    /// A graph with per-access consistency: every operation on a distant
    /// node is a synchronous RPC to its owner.
    pub fn hard(comm: Rc<dyn Communicator>) -> Self {
        let core = GraphCore::new(comm.clone());
        Self {
            core,
            sync: Box::new(HardSyncMode::new(comm)),
            balanced_once: false,
        }
    }

    /// Plug in a custom synchronization mode.
    pub fn with_mode(comm: Rc<dyn Communicator>, sync: Box<dyn SyncMode<T>>) -> Self {
        Self {
            core: GraphCore::new(comm),
            sync,
            balanced_once: false,
        }
    }

    pub fn rank(&self) -> Rank {
        self.core.rank()
    }

    pub fn size(&self) -> u32 {
        self.core.size()
    }

    pub fn communicator(&self) -> Rc<dyn Communicator> {
        self.core.comm()
    }

    /// Read-only view of the local partition.
    pub fn local_graph(&self) -> &Graph<T> {
        self.core.graph()
    }

    pub fn locations(&self) -> &LocationManager {
        self.core.locations()
    }

    pub fn core(&self) -> &GraphCore<T> {
        &self.core
    }

    /// Name of the active synchronization mode.
    pub fn sync_mode(&self) -> &'static str {
        self.sync.name()
    }

    /// Current epoch of the hard-sync servers, if the mode has one.
    pub fn sync_epoch(&self) -> Option<Epoch> {
        self.sync.epoch()
    }

    /// Outstanding non-blocking sends held by the mode's servers.
    pub fn sync_pending_sends(&self) -> usize {
        self.sync.pending_sends()
    }

    // ------------------------------------------------------------------
    // Node lifecycle
    // ------------------------------------------------------------------

    /// Build a local node with weight 1.
    pub fn build_node(&mut self, data: T) -> Result<DistributedId, PlexusError> {
        self.build_weighted_node(data, 1.0)
    }

    /// Build a local node.
    pub fn build_weighted_node(
        &mut self,
        data: T,
        weight: f32,
    ) -> Result<DistributedId, PlexusError> {
        let id = self.core.graph_mut().mint_node_id();
        self.core.graph_mut().insert_node(Node::new(id, data, weight))?;
        self.core.locations.add_managed(id, self.core.rank());
        self.core.set_local(id, SetLocalContext::BuildLocal)?;
        tracing::trace!(rank = self.rank(), node = %id, "built node");
        Ok(id)
    }

    /// Insert a distant replica built by a migration pass or a custom
    /// graph builder. The node's `location` field must point at the owner.
    pub fn insert_distant(&mut self, mut node: Node<T>) -> Result<DistributedId, PlexusError> {
        node.set_state(LocationState::Distant);
        let id = node.id();
        let location = node.location();
        self.core.graph_mut().insert_node(node)?;
        {
            let node = self.core.graph.node_mut(id)?;
            self.core.locations.set_distant(node);
            node.set_location(location);
        }
        self.core.mark_unsynchronized(id);
        self.core.fire_set_distant(id, SetDistantContext::Unspecified);
        Ok(id)
    }

    /// Remove a node from the global graph.
    ///
    /// With both endpoints local the mode registers a deferred removal;
    /// with distant edges or a distant target the removal is propagated
    /// according to the mode.
    pub fn remove_node(&mut self, id: DistributedId) -> Result<(), PlexusError> {
        self.sync.remove_node(&mut self.core, id)
    }

    // ------------------------------------------------------------------
    // Edge lifecycle
    // ------------------------------------------------------------------

    /// Link `source` to `target` on `layer` with weight 1.
    pub fn link(
        &mut self,
        source: DistributedId,
        target: DistributedId,
        layer: LayerId,
    ) -> Result<DistributedId, PlexusError> {
        let source_state = self.core.graph().node(source)?.state();
        let target_state = self.core.graph().node(target)?.state();

        let id = self.core.graph_mut().mint_edge_id();
        let mut edge = Edge::new(id, source, target, layer, 1.0);
        if source_state == LocationState::Distant || target_state == LocationState::Distant {
            edge.set_state(LocationState::Distant);
        }

        self.sync.init_link(&mut self.core, &edge)?;
        self.core.graph_mut().insert_edge(edge)?;
        self.sync.notify_linked(&mut self.core, id)?;
        Ok(id)
    }

    /// Remove an edge from the global graph.
    pub fn unlink(&mut self, edge: DistributedId) -> Result<(), PlexusError> {
        // The mode sees the edge before the local erase so it can route the
        // removal to the ranks holding the other representations.
        self.sync.init_unlink(&mut self.core, edge)?;
        let erased = self.core.erase_edge_and_cleanup(edge)?;
        self.sync.notify_unlinked(&mut self.core, &erased)?;
        Ok(())
    }

    /// Move a local edge to another layer.
    pub fn switch_layer(
        &mut self,
        edge: DistributedId,
        new_layer: LayerId,
    ) -> Result<(), PlexusError> {
        if self.core.graph().edge(edge)?.state() != LocationState::Local {
            return Err(GraphError::EdgeNotLocal(edge).into());
        }
        self.core.graph_mut().switch_layer(edge, new_layer)?;
        Ok(())
    }

    /// Set the load-balancing weight of a node held on this process.
    pub fn set_node_weight(&mut self, id: DistributedId, weight: f32) -> Result<(), PlexusError> {
        self.core.graph_mut().node_mut(id)?.set_weight(weight);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Data access
    // ------------------------------------------------------------------

    /// Read the data of any node visible on this process.
    ///
    /// Local nodes are read directly. Distant nodes follow the mode: the
    /// ghost replica value (possibly stale) in ghost mode, a synchronous
    /// round trip to the owner in hard-sync mode.
    pub fn read(&mut self, id: DistributedId) -> Result<T, PlexusError> {
        let data = self.sync.read(&mut self.core, id)?;
        self.sync.release_read(&mut self.core, id)?;
        Ok(data)
    }

    /// Exclusively update a node's data.
    ///
    /// Writes to ghost replicas are local and overwritten at the next
    /// synchronization; hard-sync mode holds the owner-side lock for the
    /// duration of the update.
    pub fn write(
        &mut self,
        id: DistributedId,
        update: impl FnOnce(&mut T),
    ) -> Result<(), PlexusError> {
        let mut data = self.sync.acquire(&mut self.core, id)?;
        update(&mut data);
        self.sync.release_acquire(&mut self.core, id, data)
    }

    /// Acquire a node's data exclusively. Must be paired with
    /// [`release_acquire`](Self::release_acquire).
    pub fn acquire(&mut self, id: DistributedId) -> Result<T, PlexusError> {
        self.sync.acquire(&mut self.core, id)
    }

    /// Release an exclusive acquisition, publishing the updated data.
    pub fn release_acquire(&mut self, id: DistributedId, data: T) -> Result<(), PlexusError> {
        self.sync.release_acquire(&mut self.core, id, data)
    }

    pub fn lock(&mut self, id: DistributedId) -> Result<(), PlexusError> {
        self.sync.lock(&mut self.core, id)
    }

    pub fn unlock(&mut self, id: DistributedId) -> Result<(), PlexusError> {
        self.sync.unlock(&mut self.core, id)
    }

    pub fn lock_shared(&mut self, id: DistributedId) -> Result<(), PlexusError> {
        self.sync.lock_shared(&mut self.core, id)
    }

    pub fn unlock_shared(&mut self, id: DistributedId) -> Result<(), PlexusError> {
        self.sync.unlock_shared(&mut self.core, id)
    }

    // ------------------------------------------------------------------
    // Synchronization and distribution
    // ------------------------------------------------------------------

    /// Global synchronization barrier: flush pending link/unlink/removal
    /// operations, then refresh replicated data, then clear the
    /// unsynchronized-node buffer.
    pub fn synchronize(&mut self) -> Result<(), PlexusError> {
        tracing::debug!(rank = self.rank(), mode = self.sync.name(), "synchronize");
        self.sync.synchronize_links(&mut self.core)?;
        self.sync.synchronize_data(&mut self.core, None)?;
        self.core.clear_unsynchronized();
        Ok(())
    }

    /// Partial synchronization of a node subset. Link flushing can be
    /// skipped when only data freshness matters.
    pub fn synchronize_partial(
        &mut self,
        nodes: &BTreeSet<DistributedId>,
        sync_links: bool,
    ) -> Result<(), PlexusError> {
        if sync_links {
            self.sync.synchronize_links(&mut self.core)?;
        }
        self.sync.synchronize_data(&mut self.core, Some(nodes))?;
        self.core.remove_unsynchronized(nodes);
        Ok(())
    }

    /// Nodes turned distant since the last data synchronization.
    pub fn unsynchronized_nodes(&self) -> &BTreeSet<DistributedId> {
        self.core.unsynchronized_nodes()
    }

    /// Redistribute the graph according to an explicit partition.
    /// Collective: every rank must call it.
    pub fn distribute(&mut self, partition: PartitionMap) -> Result<(), PlexusError> {
        migration::distribute(&mut self.core, self.sync.as_mut(), partition)?;
        self.core.clear_unsynchronized();
        Ok(())
    }

    /// Rebalance with the supplied partitioner. The first call runs a full
    /// partitioning, later calls run repartitionings.
    pub fn balance(&mut self, balancer: &mut dyn LoadBalancing<T>) -> Result<(), PlexusError> {
        let mode = if self.balanced_once {
            PartitionMode::Repartition
        } else {
            PartitionMode::Partition
        };
        self.balance_mode(balancer, mode)
    }

    /// Rebalance with an explicit partition mode. Acts as a global barrier.
    pub fn balance_mode(
        &mut self,
        balancer: &mut dyn LoadBalancing<T>,
        mode: PartitionMode,
    ) -> Result<(), PlexusError> {
        self.core.comm().barrier().map_err(PlexusError::from)?;
        let partition = balancer.balance(&self.core, mode);
        self.balanced_once = true;
        self.distribute(partition)
    }

    // ------------------------------------------------------------------
    // Callbacks and id cursors
    // ------------------------------------------------------------------

    /// Register a callback fired whenever a node is set local.
    pub fn add_on_set_local(&mut self, cb: impl FnMut(&Node<T>, SetLocalContext) + 'static) {
        self.core.add_on_set_local(cb);
    }

    /// Register a callback fired whenever a node is set distant.
    pub fn add_on_set_distant(&mut self, cb: impl FnMut(&Node<T>, SetDistantContext) + 'static) {
        self.core.add_on_set_distant(cb);
    }

    pub fn node_id_cursor(&self) -> u64 {
        self.core.graph().node_id_cursor()
    }

    pub fn set_node_id_cursor(&mut self, seq: u64) {
        self.core.graph_mut().set_node_id_cursor(seq);
    }

    pub fn edge_id_cursor(&self) -> u64 {
        self.core.graph().edge_id_cursor()
    }

    pub fn set_edge_id_cursor(&mut self, seq: u64) {
        self.core.graph_mut().set_edge_id_cursor(seq);
    }
}
