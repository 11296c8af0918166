//! No-synchronization mode.
//!
//! The graph behaves as a purely local one. No data travels between
//! processes outside of distribution passes, and after a distribution pass
//! every edge whose endpoints landed on different processes is silently
//! dropped on both sides, together with the replicas it referenced.
//! Connectivity across the boundary is lost by design; only
//! embarrassingly-partitioned workloads should run under this mode.

use std::collections::BTreeSet;

use plexus_core::error::PlexusError;
use plexus_core::graph::{Edge, GraphData, LocationState};
use plexus_core::id::DistributedId;

use crate::graph::GraphCore;
use crate::sync::SyncMode;

/// Trivial sync linker: every hook is a no-op.
#[derive(Debug, Default)]
pub struct NoSyncLinker;

/// Trivial data sync: no traffic.
#[derive(Debug, Default)]
pub struct NoDataSync;

/// Purely local synchronization mode.
#[derive(Debug, Default)]
pub struct NoSyncMode {
    _linker: NoSyncLinker,
    _data: NoDataSync,
}

impl NoSyncMode {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: GraphData> SyncMode<T> for NoSyncMode {
    fn name(&self) -> &'static str {
        "none"
    }

    fn init_link(&mut self, _core: &mut GraphCore<T>, _edge: &Edge) -> Result<(), PlexusError> {
        Ok(())
    }

    fn notify_linked(
        &mut self,
        _core: &mut GraphCore<T>,
        _edge: DistributedId,
    ) -> Result<(), PlexusError> {
        Ok(())
    }

    fn init_unlink(
        &mut self,
        _core: &mut GraphCore<T>,
        _edge: DistributedId,
    ) -> Result<(), PlexusError> {
        Ok(())
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
        core.erase_node_full(node)?;
        Ok(())
    }

    fn synchronize_links(&mut self, _core: &mut GraphCore<T>) -> Result<(), PlexusError> {
        Ok(())
    }

    fn synchronize_data(
        &mut self,
        _core: &mut GraphCore<T>,
        _subset: Option<&BTreeSet<DistributedId>>,
    ) -> Result<(), PlexusError> {
        Ok(())
    }

    fn finalize_distribution(&mut self, core: &mut GraphCore<T>) -> Result<(), PlexusError> {
        let distant_edges: Vec<DistributedId> = core
            .graph()
            .edges()
            .filter(|edge| edge.state() == LocationState::Distant)
            .map(Edge::id)
            .collect();
        for edge in distant_edges {
            core.erase_edge_and_cleanup(edge)?;
        }
        let replicas: Vec<DistributedId> =
            core.locations().distant_nodes().iter().copied().collect();
        for node in replicas {
            if core.graph().contains_node(node) {
                core.erase_node_full(node)?;
            }
        }
        Ok(())
    }

    fn read(&mut self, core: &mut GraphCore<T>, node: DistributedId) -> Result<T, PlexusError> {
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
