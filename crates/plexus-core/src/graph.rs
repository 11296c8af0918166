//! In-process multi-layer directed graph.
//!
//! This module holds the process-local part of the data model: [`Node`],
//! [`Edge`] and the [`Graph`] container. Adjacency is id-keyed: nodes store
//! edge ids grouped by layer, edges store their endpoint node ids, and every
//! traversal resolves through the graph maps. Distant replicas are plain
//! nodes flagged [`LocationState::Distant`], so a replica can never own
//! another replica and no reference cycle can form.

use std::collections::{BTreeMap, HashMap};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::id::{DistributedId, IdProvider, LayerId, Rank};

/// Bounds required from application payloads stored in graph nodes.
///
/// `Default` provides the placeholder value of a freshly instantiated
/// distant replica before its first data synchronization.
pub trait GraphData: Clone + Default + Serialize + DeserializeOwned + 'static {}

impl<T> GraphData for T where T: Clone + Default + Serialize + DeserializeOwned + 'static {}

/// Where an object lives relative to the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationState {
    /// Owned by this process.
    Local,
    /// Replica of an object owned by another process.
    Distant,
}

/// A graph node.
///
/// Carries the application payload, a load-balancing weight, the
/// [`LocationState`] and the last known owner rank, plus per-layer ordered
/// adjacency (edge ids, insertion order preserved).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node<T> {
    id: DistributedId,
    data: T,
    weight: f32,
    state: LocationState,
    location: Rank,
    incoming: BTreeMap<LayerId, Vec<DistributedId>>,
    outgoing: BTreeMap<LayerId, Vec<DistributedId>>,
}

impl<T> Node<T> {
    /// Create a node owned by the current process.
    ///
    /// The location is initialized to the id origin; the distributed layer
    /// overwrites it when the node is registered.
    pub fn new(id: DistributedId, data: T, weight: f32) -> Self {
        Self {
            id,
            data,
            weight,
            state: LocationState::Local,
            location: id.origin(),
            incoming: BTreeMap::new(),
            outgoing: BTreeMap::new(),
        }
    }

    /// Create a distant replica of a node owned by `location`.
    pub fn new_distant(id: DistributedId, data: T, weight: f32, location: Rank) -> Self {
        let mut node = Self::new(id, data, weight);
        node.state = LocationState::Distant;
        node.location = location;
        node
    }

    pub fn id(&self) -> DistributedId {
        self.id
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    pub fn set_data(&mut self, data: T) {
        self.data = data;
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: f32) {
        self.weight = weight;
    }

    pub fn state(&self) -> LocationState {
        self.state
    }

    pub fn set_state(&mut self, state: LocationState) {
        self.state = state;
    }

    /// Rank currently owning this node. Only meaningful for distant nodes
    /// after the last location update; equal to the current rank for local
    /// nodes.
    pub fn location(&self) -> Rank {
        self.location
    }

    pub fn set_location(&mut self, location: Rank) {
        self.location = location;
    }

    /// Ids of the outgoing edges on `layer`, in insertion order.
    pub fn outgoing(&self, layer: LayerId) -> &[DistributedId] {
        self.outgoing.get(&layer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ids of the incoming edges on `layer`, in insertion order.
    pub fn incoming(&self, layer: LayerId) -> &[DistributedId] {
        self.incoming.get(&layer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Outgoing edge ids across all layers.
    pub fn all_outgoing(&self) -> impl Iterator<Item = DistributedId> + '_ {
        self.outgoing.values().flatten().copied()
    }

    /// Incoming edge ids across all layers.
    pub fn all_incoming(&self) -> impl Iterator<Item = DistributedId> + '_ {
        self.incoming.values().flatten().copied()
    }

    /// Ids of every incident edge, outgoing first.
    pub fn incident_edges(&self) -> Vec<DistributedId> {
        let mut ids: Vec<_> = self.all_outgoing().collect();
        ids.extend(self.all_incoming());
        ids.dedup();
        ids
    }

    /// True when no edge is attached on any layer.
    pub fn is_orphan(&self) -> bool {
        self.outgoing.values().all(Vec::is_empty) && self.incoming.values().all(Vec::is_empty)
    }

    fn attach_outgoing(&mut self, layer: LayerId, edge: DistributedId) {
        self.outgoing.entry(layer).or_default().push(edge);
    }

    fn attach_incoming(&mut self, layer: LayerId, edge: DistributedId) {
        self.incoming.entry(layer).or_default().push(edge);
    }

    fn detach(&mut self, layer: LayerId, edge: DistributedId) {
        if let Some(list) = self.outgoing.get_mut(&layer) {
            list.retain(|e| *e != edge);
        }
        if let Some(list) = self.incoming.get_mut(&layer) {
            list.retain(|e| *e != edge);
        }
    }
}

/// A directed edge on one layer of the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    id: DistributedId,
    layer: LayerId,
    weight: f32,
    state: LocationState,
    source: DistributedId,
    target: DistributedId,
}

impl Edge {
    pub fn new(
        id: DistributedId,
        source: DistributedId,
        target: DistributedId,
        layer: LayerId,
        weight: f32,
    ) -> Self {
        Self {
            id,
            layer,
            weight,
            state: LocationState::Local,
            source,
            target,
        }
    }

    pub fn id(&self) -> DistributedId {
        self.id
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: f32) {
        self.weight = weight;
    }

    pub fn state(&self) -> LocationState {
        self.state
    }

    pub fn set_state(&mut self, state: LocationState) {
        self.state = state;
    }

    pub fn source(&self) -> DistributedId {
        self.source
    }

    pub fn target(&self) -> DistributedId {
        self.target
    }

    /// The endpoint opposite to `node`.
    pub fn opposite(&self, node: DistributedId) -> DistributedId {
        if self.source == node {
            self.target
        } else {
            self.source
        }
    }
}

type NodeCallback<T> = Box<dyn FnMut(&Node<T>)>;
type EdgeCallback = Box<dyn FnMut(&Edge)>;

/// In-process multi-layer directed graph with insert/erase callbacks.
///
/// Erasing a node cascades over its adjacent edges; [`clear`](Graph::clear)
/// erases edges first, then nodes. Ids are minted from two monotonic
/// per-process cursors that can be read and repositioned.
pub struct Graph<T> {
    nodes: HashMap<DistributedId, Node<T>>,
    edges: HashMap<DistributedId, Edge>,
    node_ids: IdProvider,
    edge_ids: IdProvider,
    insert_node_callbacks: Vec<NodeCallback<T>>,
    erase_node_callbacks: Vec<NodeCallback<T>>,
    insert_edge_callbacks: Vec<EdgeCallback>,
    erase_edge_callbacks: Vec<EdgeCallback>,
}

impl<T> Graph<T> {
    /// Create an empty graph minting ids for origin rank `rank`.
    pub fn new(rank: Rank) -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            node_ids: IdProvider::new(rank),
            edge_ids: IdProvider::new(rank),
            insert_node_callbacks: Vec::new(),
            erase_node_callbacks: Vec::new(),
            insert_edge_callbacks: Vec::new(),
            erase_edge_callbacks: Vec::new(),
        }
    }

    /// Mint a fresh node id for this process.
    pub fn mint_node_id(&mut self) -> DistributedId {
        self.node_ids.mint()
    }

    /// Mint a fresh edge id for this process.
    pub fn mint_edge_id(&mut self) -> DistributedId {
        self.edge_ids.mint()
    }

    /// Next node sequence number this process will mint.
    pub fn node_id_cursor(&self) -> u64 {
        self.node_ids.cursor()
    }

    /// Next edge sequence number this process will mint.
    pub fn edge_id_cursor(&self) -> u64 {
        self.edge_ids.cursor()
    }

    /// Reposition the node id cursor. Used by graph builders for
    /// deterministic id allocation.
    pub fn set_node_id_cursor(&mut self, seq: u64) {
        self.node_ids.set_cursor(seq);
    }

    /// Reposition the edge id cursor.
    pub fn set_edge_id_cursor(&mut self, seq: u64) {
        self.edge_ids.set_cursor(seq);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_node(&self, id: DistributedId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn contains_edge(&self, id: DistributedId) -> bool {
        self.edges.contains_key(&id)
    }

    pub fn node(&self, id: DistributedId) -> Result<&Node<T>, GraphError> {
        self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))
    }

    pub fn node_mut(&mut self, id: DistributedId) -> Result<&mut Node<T>, GraphError> {
        self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))
    }

    pub fn edge(&self, id: DistributedId) -> Result<&Edge, GraphError> {
        self.edges.get(&id).ok_or(GraphError::EdgeNotFound(id))
    }

    pub fn edge_mut(&mut self, id: DistributedId) -> Result<&mut Edge, GraphError> {
        self.edges.get_mut(&id).ok_or(GraphError::EdgeNotFound(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node<T>> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = DistributedId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn edge_ids(&self) -> impl Iterator<Item = DistributedId> + '_ {
        self.edges.keys().copied()
    }

    /// Insert a node. Fails on duplicate id.
    pub fn insert_node(&mut self, node: Node<T>) -> Result<DistributedId, GraphError> {
        let id = node.id();
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        self.nodes.insert(id, node);
        let mut callbacks = std::mem::take(&mut self.insert_node_callbacks);
        for cb in &mut callbacks {
            cb(&self.nodes[&id]);
        }
        self.insert_node_callbacks = callbacks;
        Ok(id)
    }

    /// Insert an edge and attach it to both endpoint adjacency lists.
    ///
    /// Both endpoints must already be present.
    pub fn insert_edge(&mut self, edge: Edge) -> Result<DistributedId, GraphError> {
        let id = edge.id();
        if self.edges.contains_key(&id) {
            return Err(GraphError::DuplicateEdge(id));
        }
        let layer = edge.layer();
        let (source, target) = (edge.source(), edge.target());
        if !self.nodes.contains_key(&target) {
            return Err(GraphError::NodeNotFound(target));
        }
        self.nodes
            .get_mut(&source)
            .ok_or(GraphError::NodeNotFound(source))?
            .attach_outgoing(layer, id);
        self.nodes
            .get_mut(&target)
            .ok_or(GraphError::NodeNotFound(target))?
            .attach_incoming(layer, id);
        self.edges.insert(id, edge);
        let mut callbacks = std::mem::take(&mut self.insert_edge_callbacks);
        for cb in &mut callbacks {
            cb(&self.edges[&id]);
        }
        self.insert_edge_callbacks = callbacks;
        Ok(id)
    }

    /// Erase an edge, detaching it from both endpoints.
    pub fn erase_edge(&mut self, id: DistributedId) -> Result<Edge, GraphError> {
        let edge = self.edges.remove(&id).ok_or(GraphError::EdgeNotFound(id))?;
        if let Some(source) = self.nodes.get_mut(&edge.source()) {
            source.detach(edge.layer(), id);
        }
        if let Some(target) = self.nodes.get_mut(&edge.target()) {
            target.detach(edge.layer(), id);
        }
        let mut callbacks = std::mem::take(&mut self.erase_edge_callbacks);
        for cb in &mut callbacks {
            cb(&edge);
        }
        self.erase_edge_callbacks = callbacks;
        Ok(edge)
    }

    /// Erase a node. Adjacent edges are erased first.
    pub fn erase_node(&mut self, id: DistributedId) -> Result<Node<T>, GraphError> {
        let incident = self.node(id)?.incident_edges();
        for edge_id in incident {
            // An edge can appear in both lists of a self-loop.
            if self.edges.contains_key(&edge_id) {
                self.erase_edge(edge_id)?;
            }
        }
        let node = self.nodes.remove(&id).ok_or(GraphError::NodeNotFound(id))?;
        let mut callbacks = std::mem::take(&mut self.erase_node_callbacks);
        for cb in &mut callbacks {
            cb(&node);
        }
        self.erase_node_callbacks = callbacks;
        Ok(node)
    }

    /// Move a local edge to another layer, preserving endpoint adjacency.
    pub fn switch_layer(&mut self, id: DistributedId, new_layer: LayerId) -> Result<(), GraphError> {
        let edge = self.edges.get(&id).ok_or(GraphError::EdgeNotFound(id))?;
        let (old_layer, source, target) = (edge.layer(), edge.source(), edge.target());
        if old_layer == new_layer {
            return Ok(());
        }
        if let Some(node) = self.nodes.get_mut(&source) {
            node.detach(old_layer, id);
            node.attach_outgoing(new_layer, id);
        }
        if let Some(node) = self.nodes.get_mut(&target) {
            node.detach(old_layer, id);
            node.attach_incoming(new_layer, id);
        }
        self.edges
            .get_mut(&id)
            .ok_or(GraphError::EdgeNotFound(id))?
            .layer = new_layer;
        Ok(())
    }

    /// Resolve the outgoing edges of `node` on `layer`.
    pub fn outgoing_edges(
        &self,
        node: DistributedId,
        layer: LayerId,
    ) -> Result<Vec<&Edge>, GraphError> {
        Ok(self
            .node(node)?
            .outgoing(layer)
            .iter()
            .filter_map(|id| self.edges.get(id))
            .collect())
    }

    /// Resolve the incoming edges of `node` on `layer`.
    pub fn incoming_edges(
        &self,
        node: DistributedId,
        layer: LayerId,
    ) -> Result<Vec<&Edge>, GraphError> {
        Ok(self
            .node(node)?
            .incoming(layer)
            .iter()
            .filter_map(|id| self.edges.get(id))
            .collect())
    }

    /// Erase everything: edges first, then nodes, firing erase callbacks.
    pub fn clear(&mut self) {
        let edge_ids: Vec<_> = self.edges.keys().copied().collect();
        for id in edge_ids {
            let _ = self.erase_edge(id);
        }
        let node_ids: Vec<_> = self.nodes.keys().copied().collect();
        for id in node_ids {
            let _ = self.erase_node(id);
        }
    }

    /// Register a callback fired after each node insertion.
    pub fn on_insert_node(&mut self, cb: impl FnMut(&Node<T>) + 'static) {
        self.insert_node_callbacks.push(Box::new(cb));
    }

    /// Register a callback fired after each node erasure.
    pub fn on_erase_node(&mut self, cb: impl FnMut(&Node<T>) + 'static) {
        self.erase_node_callbacks.push(Box::new(cb));
    }

    /// Register a callback fired after each edge insertion.
    pub fn on_insert_edge(&mut self, cb: impl FnMut(&Edge) + 'static) {
        self.insert_edge_callbacks.push(Box::new(cb));
    }

    /// Register a callback fired after each edge erasure.
    pub fn on_erase_edge(&mut self, cb: impl FnMut(&Edge) + 'static) {
        self.erase_edge_callbacks.push(Box::new(cb));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn build_pair(graph: &mut Graph<u32>) -> (DistributedId, DistributedId) {
        let a = graph.mint_node_id();
        let b = graph.mint_node_id();
        graph.insert_node(Node::new(a, 1, 1.0)).unwrap();
        graph.insert_node(Node::new(b, 2, 1.0)).unwrap();
        (a, b)
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut graph: Graph<u32> = Graph::new(0);
        let (a, b) = build_pair(&mut graph);
        let e = graph.mint_edge_id();
        graph.insert_edge(Edge::new(e, a, b, 0, 1.0)).unwrap();

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edge(e).unwrap().source(), a);
        assert_eq!(graph.node(a).unwrap().outgoing(0), &[e]);
        assert_eq!(graph.node(b).unwrap().incoming(0), &[e]);
    }

    #[test]
    fn test_lookup_miss() {
        let graph: Graph<u32> = Graph::new(0);
        let id = DistributedId::new(0, 99);
        assert_eq!(graph.node(id).unwrap_err(), GraphError::NodeNotFound(id));
        assert_eq!(graph.edge(id).unwrap_err(), GraphError::EdgeNotFound(id));
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut graph: Graph<u32> = Graph::new(0);
        let (a, _) = build_pair(&mut graph);
        assert_eq!(
            graph.insert_node(Node::new(a, 9, 1.0)).unwrap_err(),
            GraphError::DuplicateNode(a)
        );
    }

    #[test]
    fn test_erase_node_cascades_edges() {
        let mut graph: Graph<u32> = Graph::new(0);
        let (a, b) = build_pair(&mut graph);
        let e1 = graph.mint_edge_id();
        let e2 = graph.mint_edge_id();
        graph.insert_edge(Edge::new(e1, a, b, 0, 1.0)).unwrap();
        graph.insert_edge(Edge::new(e2, b, a, 1, 1.0)).unwrap();

        graph.erase_node(a).unwrap();

        assert_eq!(graph.edge_count(), 0);
        assert!(graph.node(b).unwrap().is_orphan());
    }

    #[test]
    fn test_layer_adjacency_keeps_insertion_order() {
        let mut graph: Graph<u32> = Graph::new(0);
        let (a, b) = build_pair(&mut graph);
        let c = graph.mint_node_id();
        graph.insert_node(Node::new(c, 3, 1.0)).unwrap();

        let e1 = graph.mint_edge_id();
        let e2 = graph.mint_edge_id();
        let e3 = graph.mint_edge_id();
        graph.insert_edge(Edge::new(e1, a, b, 7, 1.0)).unwrap();
        graph.insert_edge(Edge::new(e2, a, c, 7, 1.0)).unwrap();
        graph.insert_edge(Edge::new(e3, a, b, 2, 1.0)).unwrap();

        assert_eq!(graph.node(a).unwrap().outgoing(7), &[e1, e2]);
        assert_eq!(graph.node(a).unwrap().outgoing(2), &[e3]);
        assert!(graph.node(a).unwrap().outgoing(5).is_empty());
    }

    #[test]
    fn test_switch_layer() {
        let mut graph: Graph<u32> = Graph::new(0);
        let (a, b) = build_pair(&mut graph);
        let e = graph.mint_edge_id();
        graph.insert_edge(Edge::new(e, a, b, 0, 1.0)).unwrap();

        graph.switch_layer(e, 3).unwrap();

        assert_eq!(graph.edge(e).unwrap().layer(), 3);
        assert!(graph.node(a).unwrap().outgoing(0).is_empty());
        assert_eq!(graph.node(a).unwrap().outgoing(3), &[e]);
        assert_eq!(graph.node(b).unwrap().incoming(3), &[e]);
    }

    #[test]
    fn test_callbacks_fire() {
        let mut graph: Graph<u32> = Graph::new(0);
        let inserted = Rc::new(Cell::new(0));
        let erased = Rc::new(Cell::new(0));
        let (i, e) = (inserted.clone(), erased.clone());
        graph.on_insert_node(move |_| i.set(i.get() + 1));
        graph.on_erase_edge(move |_| e.set(e.get() + 1));

        let (a, b) = build_pair(&mut graph);
        let edge = graph.mint_edge_id();
        graph.insert_edge(Edge::new(edge, a, b, 0, 1.0)).unwrap();
        graph.erase_node(a).unwrap();

        assert_eq!(inserted.get(), 2);
        assert_eq!(erased.get(), 1);
    }

    #[test]
    fn test_clear_erases_edges_then_nodes() {
        let mut graph: Graph<u32> = Graph::new(0);
        let order: Rc<std::cell::RefCell<Vec<&'static str>>> = Rc::default();
        let (o1, o2) = (order.clone(), order.clone());
        graph.on_erase_edge(move |_| o1.borrow_mut().push("edge"));
        graph.on_erase_node(move |_| o2.borrow_mut().push("node"));

        let (a, b) = build_pair(&mut graph);
        let e = graph.mint_edge_id();
        graph.insert_edge(Edge::new(e, a, b, 0, 1.0)).unwrap();
        graph.clear();

        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(order.borrow()[0], "edge");
        assert!(order.borrow()[1..].iter().all(|kind| *kind == "node"));
    }
}
