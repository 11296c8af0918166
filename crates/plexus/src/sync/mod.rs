//! Synchronization modes.
//!
//! A [`SyncMode`] decides what happens when a lifecycle operation or a data
//! access touches a node owned by another process. Three interchangeable
//! regimes are provided under one API:
//!
//! - [`none::NoSyncMode`] — purely local graph. Edges crossing a process
//!   boundary are dropped at distribution time; connectivity is lost by
//!   design. For embarrassingly-partitioned workloads.
//! - [`ghost::GhostMode`] — boundary nodes are kept as distant replicas
//!   ("ghosts") refreshed in bulk at each synchronization barrier; link and
//!   unlink operations are buffered and committed at the barrier.
//! - [`hard::HardSyncMode`] — per-access consistency: every read, write,
//!   lock and linking operation on a distant node is a synchronous RPC to
//!   its owner, with per-node read/write locks and a distributed
//!   termination algorithm driving the barrier.
//!
//! Each mode is organized around two collaborators, following the common
//! plug-in boundary: a *sync linker* handling link/unlink/removal
//! propagation, and a *data sync* handling replicated data freshness. The
//! trait below is the facade's single entry point to both.

pub mod ghost;
pub mod hard;
pub mod none;

use std::collections::BTreeSet;

use plexus_core::error::PlexusError;
use plexus_core::graph::{Edge, GraphData};
use plexus_core::id::DistributedId;

use crate::graph::GraphCore;
use hard::enums::Epoch;

/// Pluggable synchronization regime of a distributed graph.
pub trait SyncMode<T: GraphData> {
    /// Mode name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Hook called before a freshly built edge is inserted locally.
    fn init_link(&mut self, core: &mut GraphCore<T>, edge: &Edge) -> Result<(), PlexusError>;

    /// Hook called after a freshly built edge was inserted locally.
    fn notify_linked(
        &mut self,
        core: &mut GraphCore<T>,
        edge: DistributedId,
    ) -> Result<(), PlexusError>;

    /// Hook called before an edge is erased locally; the edge is still
    /// present so the mode can route the removal.
    fn init_unlink(
        &mut self,
        core: &mut GraphCore<T>,
        edge: DistributedId,
    ) -> Result<(), PlexusError>;

    /// Hook called after an edge was erased locally.
    fn notify_unlinked(
        &mut self,
        core: &mut GraphCore<T>,
        edge: &Edge,
    ) -> Result<(), PlexusError>;

    /// Remove a node from the global graph, propagating as the mode
    /// requires.
    fn remove_node(
        &mut self,
        core: &mut GraphCore<T>,
        node: DistributedId,
    ) -> Result<(), PlexusError>;

    /// Flush buffered link/unlink/removal operations. Collective.
    fn synchronize_links(&mut self, core: &mut GraphCore<T>) -> Result<(), PlexusError>;

    /// Refresh replicated data, either for every distant node or for a
    /// subset. Collective.
    fn synchronize_data(
        &mut self,
        core: &mut GraphCore<T>,
        subset: Option<&BTreeSet<DistributedId>>,
    ) -> Result<(), PlexusError>;

    /// Hook called at the end of a distribution pass, before the closing
    /// synchronization.
    fn finalize_distribution(&mut self, core: &mut GraphCore<T>) -> Result<(), PlexusError> {
        let _ = core;
        Ok(())
    }

    /// Read a node's data under the mode's consistency regime.
    fn read(&mut self, core: &mut GraphCore<T>, node: DistributedId) -> Result<T, PlexusError>;

    /// Release a read taken with [`read`](SyncMode::read).
    fn release_read(
        &mut self,
        core: &mut GraphCore<T>,
        node: DistributedId,
    ) -> Result<(), PlexusError>;

    /// Exclusively acquire a node's data.
    fn acquire(&mut self, core: &mut GraphCore<T>, node: DistributedId) -> Result<T, PlexusError>;

    /// Release an exclusive acquisition, publishing updated data.
    fn release_acquire(
        &mut self,
        core: &mut GraphCore<T>,
        node: DistributedId,
        data: T,
    ) -> Result<(), PlexusError>;

    /// Take a node's exclusive lock without reading.
    fn lock(&mut self, core: &mut GraphCore<T>, node: DistributedId) -> Result<(), PlexusError>;

    /// Release a node's exclusive lock.
    fn unlock(&mut self, core: &mut GraphCore<T>, node: DistributedId) -> Result<(), PlexusError>;

    /// Take a node's shared lock.
    fn lock_shared(
        &mut self,
        core: &mut GraphCore<T>,
        node: DistributedId,
    ) -> Result<(), PlexusError>;

    /// Release a node's shared lock.
    fn unlock_shared(
        &mut self,
        core: &mut GraphCore<T>,
        node: DistributedId,
    ) -> Result<(), PlexusError>;

    /// Current server epoch, for modes that have one.
    fn epoch(&self) -> Option<Epoch> {
        None
    }

    /// Outstanding non-blocking sends held by the mode's servers.
    fn pending_sends(&self) -> usize {
        0
    }
}
