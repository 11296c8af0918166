//! Migration protocol.
//!
//! Repartition-time movement of nodes and edges between processes, plus the
//! edge pack import shared with the synchronization modes (an edge arriving
//! through a ghost-mode link exchange or a hard-sync LINK request is imported
//! exactly like an edge arriving through a distribution pass).

use std::collections::{BTreeMap, HashMap, HashSet};

use plexus_comm::TypedComm;
use plexus_core::error::PlexusError;
use plexus_core::graph::{Edge, GraphData, LocationState, Node};
use plexus_core::id::{DistributedId, LayerId, Rank};
use serde::{Deserialize, Serialize};

use crate::balancing::PartitionMap;
use crate::graph::events::{SetDistantContext, SetLocalContext};
use crate::graph::GraphCore;
use crate::sync::SyncMode;

/// Serialized node, as moved by a distribution pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NodePack<T> {
    pub id: DistributedId,
    pub weight: f32,
    pub data: T,
}

/// Serialized edge endpoint. Carries enough to instantiate a fresh distant
/// replica on the receiving side when the endpoint is unknown there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EndpointPack<T> {
    pub id: DistributedId,
    pub location: Rank,
    pub weight: f32,
    pub data: T,
}

/// Serialized edge, as moved by a distribution pass or a link commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EdgePack<T> {
    pub id: DistributedId,
    pub layer: LayerId,
    pub weight: f32,
    pub source: EndpointPack<T>,
    pub target: EndpointPack<T>,
}

/// Owner-side data refresh reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NodeUpdate<T> {
    pub id: DistributedId,
    pub weight: f32,
    pub data: T,
}

/// Build the wire representation of an edge.
///
/// `future_locations` overrides endpoint locations for nodes that are being
/// exported by the same pass, so the importer points straight at the next
/// owner.
pub(crate) fn edge_pack<T: GraphData>(
    core: &GraphCore<T>,
    edge: &Edge,
    future_locations: &BTreeMap<DistributedId, Rank>,
) -> Result<EdgePack<T>, PlexusError> {
    let endpoint = |id: DistributedId| -> Result<EndpointPack<T>, PlexusError> {
        let node = core.graph().node(id)?;
        let location = future_locations
            .get(&id)
            .copied()
            .unwrap_or_else(|| match node.state() {
                LocationState::Local => core.rank(),
                LocationState::Distant => node.location(),
            });
        Ok(EndpointPack {
            id,
            location,
            weight: node.weight(),
            data: node.data().clone(),
        })
    };
    Ok(EdgePack {
        id: edge.id(),
        layer: edge.layer(),
        weight: edge.weight(),
        source: endpoint(edge.source())?,
        target: endpoint(edge.target())?,
    })
}

/// Import an edge pack.
///
/// A duplicate arrival (the edge id is already present) is silently
/// ignored. Unknown endpoints are instantiated as fresh distant replicas.
pub(crate) fn import_edge<T: GraphData>(
    core: &mut GraphCore<T>,
    pack: EdgePack<T>,
) -> Result<(), PlexusError> {
    if core.graph().contains_edge(pack.id) {
        return Ok(());
    }
    for endpoint in [&pack.source, &pack.target] {
        if !core.graph().contains_node(endpoint.id) {
            core.create_distant_node(
                endpoint.id,
                endpoint.data.clone(),
                endpoint.weight,
                endpoint.location,
            )?;
        }
    }
    let source_local = core.graph().node(pack.source.id)?.state() == LocationState::Local;
    let target_local = core.graph().node(pack.target.id)?.state() == LocationState::Local;

    let mut edge = Edge::new(pack.id, pack.source.id, pack.target.id, pack.layer, pack.weight);
    if !(source_local && target_local) {
        edge.set_state(LocationState::Distant);
    }
    core.graph_mut().insert_edge(edge)?;
    Ok(())
}

/// Redistribute the graph according to `partition`. Collective.
pub(crate) fn distribute<T: GraphData>(
    core: &mut GraphCore<T>,
    sync: &mut dyn SyncMode<T>,
    partition: PartitionMap,
) -> Result<(), PlexusError> {
    // Commit pending link/unlink operations first, so the edge set moved
    // below is the committed one.
    sync.synchronize_links(core)?;

    let rank = core.rank();

    // Export list: local nodes assigned elsewhere. Partition entries for
    // non-local nodes are ignored.
    let exports: BTreeMap<DistributedId, Rank> = partition
        .into_iter()
        .filter(|(id, dest)| {
            *dest != rank
                && core
                    .graph()
                    .node(*id)
                    .map(|node| node.state() == LocationState::Local)
                    .unwrap_or(false)
        })
        .collect();
    tracing::debug!(rank, exported = exports.len(), "distributing graph");

    // Serialize exported nodes and their incident edges. Edges between two
    // co-exported nodes are packed once per destination.
    let mut node_packs: HashMap<Rank, Vec<NodePack<T>>> = HashMap::new();
    let mut edge_packs: HashMap<Rank, Vec<EdgePack<T>>> = HashMap::new();
    let mut seen: HashSet<(DistributedId, Rank)> = HashSet::new();
    for (id, dest) in &exports {
        let node = core.graph().node(*id)?;
        node_packs.entry(*dest).or_default().push(NodePack {
            id: *id,
            weight: node.weight(),
            data: node.data().clone(),
        });
        for edge_id in node.incident_edges() {
            if seen.insert((edge_id, *dest)) {
                let edge = core.graph().edge(edge_id)?;
                edge_packs
                    .entry(*dest)
                    .or_default()
                    .push(edge_pack(core, edge, &exports)?);
            }
        }
    }

    // Collective hand-off.
    let node_comm: TypedComm<NodePack<T>> = TypedComm::new(core.comm());
    let edge_comm: TypedComm<EdgePack<T>> = TypedComm::new(core.comm());
    let imported_nodes = node_comm.exchange(node_packs)?;
    let imported_edges = edge_comm.exchange(edge_packs)?;

    // Import nodes. An existing distant replica is upgraded in place, which
    // keeps its adjacency valid for the edge reattachment below.
    for packs in imported_nodes.into_values() {
        for pack in packs {
            if core.graph().contains_node(pack.id) {
                let was_distant = {
                    let node = core.graph_mut().node_mut(pack.id)?;
                    let was_distant = node.state() == LocationState::Distant;
                    node.set_data(pack.data);
                    node.set_weight(pack.weight);
                    was_distant
                };
                if was_distant {
                    core.set_local(pack.id, SetLocalContext::ImportExistingLocal)?;
                }
            } else {
                core.graph_mut()
                    .insert_node(Node::new(pack.id, pack.data, pack.weight))?;
                core.set_local(pack.id, SetLocalContext::ImportNewLocal)?;
            }
        }
    }

    // Reattach edges. Duplicates are dropped by id equality inside
    // `import_edge`.
    for packs in imported_edges.into_values() {
        for pack in packs {
            import_edge(core, pack)?;
        }
    }

    // Export side: downgrade exported nodes to distant replicas pointing at
    // their destination.
    for (id, dest) in &exports {
        if core.graph().contains_node(*id) {
            core.set_distant(*id, Some(*dest), SetDistantContext::ExportDistant)?;
        }
    }
    // Edges now joining two distant nodes must not be represented here;
    // erasing them also clears replicas they orphan, including exported
    // nodes with no remaining local neighbor.
    for id in exports.keys() {
        let incident = match core.graph().node(*id) {
            Ok(node) => node.incident_edges(),
            Err(_) => continue,
        };
        for edge_id in incident {
            let both_distant = {
                let edge = match core.graph().edge(edge_id) {
                    Ok(edge) => edge,
                    Err(_) => continue,
                };
                core.graph().node(edge.source())?.state() == LocationState::Distant
                    && core.graph().node(edge.target())?.state() == LocationState::Distant
            };
            if both_distant {
                core.erase_edge_and_cleanup(edge_id)?;
            }
        }
    }
    // Exported nodes that had no edge at all never hit the orphan cleanup.
    for id in exports.keys() {
        if core.graph().contains_node(*id) && core.graph().node(*id)?.is_orphan() {
            core.erase_node_full(*id)?;
        }
    }
    // Kept replicas of exported nodes are stale until the next data sync.
    for id in exports.keys() {
        if core.graph().contains_node(*id) {
            core.mark_unsynchronized(*id);
        }
    }

    core.update_locations()?;

    sync.finalize_distribution(core)?;
    sync.synchronize_links(core)?;
    sync.synchronize_data(core, None)?;
    tracing::debug!(
        rank,
        nodes = core.graph().node_count(),
        edges = core.graph().edge_count(),
        "distribution complete"
    );
    Ok(())
}
