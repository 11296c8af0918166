//! Client-side RPCs of the hard synchronization protocol.
//!
//! Every call sends an epoch-tagged request to the owner of the target
//! node and, when a reply is expected, blocks until it arrives. While
//! blocked the client pumps the local server pack, so a local operation
//! stuck on a remote owner still answers remote requests on this process's
//! own nodes (cooperative deadlock avoidance).

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use plexus_comm::{Communicator, TypedComm};
use plexus_core::error::PlexusError;
use plexus_core::graph::{GraphData, LocationState};
use plexus_core::id::{DistributedId, Rank};

use crate::graph::migration::{edge_pack, EdgePack};
use crate::graph::GraphCore;

use super::enums::Tag;
use super::server_pack::ServerPack;
use super::{DataResponse, DataUpdate};

/// Outbound per-node mutex RPCs.
pub(crate) struct MutexClient<T: GraphData> {
    id_comm: TypedComm<DistributedId>,
    data_comm: TypedComm<DataResponse<T>>,
    update_comm: TypedComm<DataUpdate<T>>,
}

impl<T: GraphData> MutexClient<T> {
    pub(crate) fn new(comm: Rc<dyn Communicator>) -> Self {
        Self {
            id_comm: TypedComm::new(comm.clone()),
            data_comm: TypedComm::new(comm.clone()),
            update_comm: TypedComm::new(comm),
        }
    }

    /// READ the node from its owner; the reply refreshes the local replica.
    pub(crate) fn read(
        &self,
        pack: &mut ServerPack<T>,
        core: &mut GraphCore<T>,
        id: DistributedId,
        location: Rank,
    ) -> Result<T, PlexusError> {
        tracing::debug!(node = %id, location, "reading remote node");
        pack.mark_black();
        let request = self.id_comm.issend(&id, location, pack.request_tag(Tag::Read))?;
        pack.wait_send(request, core)?;

        let status = pack.wait_response(location, Tag::ReadResponse, core)?;
        let (response, _) = self.data_comm.recv(status.source, status.tag)?;
        let node = core.graph_mut().node_mut(id)?;
        node.set_data(response.data.clone());
        node.set_weight(response.weight);
        Ok(response.data)
    }

    /// Release a remote READ (shared unlock on the owner).
    pub(crate) fn release_read(
        &self,
        pack: &mut ServerPack<T>,
        core: &mut GraphCore<T>,
        id: DistributedId,
        location: Rank,
    ) -> Result<(), PlexusError> {
        pack.mark_black();
        let request =
            self.id_comm
                .issend(&id, location, pack.request_tag(Tag::UnlockShared))?;
        pack.wait_send(request, core)
    }

    /// ACQUIRE the node exclusively from its owner.
    pub(crate) fn acquire(
        &self,
        pack: &mut ServerPack<T>,
        core: &mut GraphCore<T>,
        id: DistributedId,
        location: Rank,
    ) -> Result<T, PlexusError> {
        tracing::debug!(node = %id, location, "acquiring remote node");
        pack.mark_black();
        let request = self.id_comm.issend(&id, location, pack.request_tag(Tag::Acquire))?;
        pack.wait_send(request, core)?;

        let status = pack.wait_response(location, Tag::AcquireResponse, core)?;
        let (response, _) = self.data_comm.recv(status.source, status.tag)?;
        let node = core.graph_mut().node_mut(id)?;
        node.set_data(response.data.clone());
        node.set_weight(response.weight);
        Ok(response.data)
    }

    /// Give an acquired node back to its owner with the updated payload.
    pub(crate) fn release_acquire(
        &self,
        pack: &mut ServerPack<T>,
        core: &mut GraphCore<T>,
        id: DistributedId,
        data: T,
        location: Rank,
    ) -> Result<(), PlexusError> {
        tracing::debug!(node = %id, location, "releasing acquired remote node");
        core.graph_mut().node_mut(id)?.set_data(data.clone());
        pack.mark_black();
        let update = DataUpdate { node: id, data };
        let request =
            self.update_comm
                .issend(&update, location, pack.request_tag(Tag::ReleaseAcquire))?;
        pack.wait_send(request, core)
    }

    pub(crate) fn lock(
        &self,
        pack: &mut ServerPack<T>,
        core: &mut GraphCore<T>,
        id: DistributedId,
        location: Rank,
    ) -> Result<(), PlexusError> {
        pack.mark_black();
        let request = self.id_comm.issend(&id, location, pack.request_tag(Tag::Lock))?;
        pack.wait_send(request, core)?;
        let status = pack.wait_response(location, Tag::LockResponse, core)?;
        pack.comm().recv(status.source, status.tag)?;
        Ok(())
    }

    pub(crate) fn unlock(
        &self,
        pack: &mut ServerPack<T>,
        core: &mut GraphCore<T>,
        id: DistributedId,
        location: Rank,
    ) -> Result<(), PlexusError> {
        pack.mark_black();
        let request = self.id_comm.issend(&id, location, pack.request_tag(Tag::Unlock))?;
        pack.wait_send(request, core)
    }

    pub(crate) fn lock_shared(
        &self,
        pack: &mut ServerPack<T>,
        core: &mut GraphCore<T>,
        id: DistributedId,
        location: Rank,
    ) -> Result<(), PlexusError> {
        pack.mark_black();
        let request =
            self.id_comm
                .issend(&id, location, pack.request_tag(Tag::LockShared))?;
        pack.wait_send(request, core)?;
        let status = pack.wait_response(location, Tag::LockSharedResponse, core)?;
        pack.comm().recv(status.source, status.tag)?;
        Ok(())
    }

    pub(crate) fn unlock_shared(
        &self,
        pack: &mut ServerPack<T>,
        core: &mut GraphCore<T>,
        id: DistributedId,
        location: Rank,
    ) -> Result<(), PlexusError> {
        pack.mark_black();
        let request =
            self.id_comm
                .issend(&id, location, pack.request_tag(Tag::UnlockShared))?;
        pack.wait_send(request, core)
    }
}

/// Outbound link/unlink/removal RPCs, committed on the fly.
pub(crate) struct LinkClient<T: GraphData> {
    edge_comm: TypedComm<EdgePack<T>>,
    id_comm: TypedComm<DistributedId>,
}

impl<T: GraphData> LinkClient<T> {
    pub(crate) fn new(comm: Rc<dyn Communicator>) -> Self {
        Self {
            edge_comm: TypedComm::new(comm.clone()),
            id_comm: TypedComm::new(comm),
        }
    }

    /// Locations of the distant endpoints of an edge, deduplicated.
    fn distant_locations(
        core: &GraphCore<T>,
        edge: DistributedId,
    ) -> Result<BTreeSet<Rank>, PlexusError> {
        let edge = core.graph().edge(edge)?;
        let mut locations = BTreeSet::new();
        for endpoint in [edge.source(), edge.target()] {
            let node = core.graph().node(endpoint)?;
            if node.state() == LocationState::Distant {
                locations.insert(node.location());
            }
        }
        Ok(locations)
    }

    /// Send a freshly built distant edge to the ranks hosting its distant
    /// endpoints.
    pub(crate) fn link(
        &self,
        pack: &mut ServerPack<T>,
        core: &mut GraphCore<T>,
        edge: DistributedId,
    ) -> Result<(), PlexusError> {
        if core.graph().edge(edge)?.state() != LocationState::Distant {
            return Ok(());
        }
        let message = {
            let edge_ref = core.graph().edge(edge)?;
            edge_pack(core, edge_ref, &BTreeMap::new())?
        };
        let mut requests = Vec::new();
        for location in Self::distant_locations(core, edge)? {
            pack.mark_black();
            requests.push(self.edge_comm.issend(
                &message,
                location,
                pack.request_tag(Tag::Link),
            )?);
        }
        for request in requests {
            pack.wait_send(request, core)?;
        }
        Ok(())
    }

    /// Send an unlink for an edge to the ranks hosting its distant
    /// endpoints. The edge must still be present locally.
    pub(crate) fn unlink(
        &self,
        pack: &mut ServerPack<T>,
        core: &mut GraphCore<T>,
        edge: DistributedId,
    ) -> Result<(), PlexusError> {
        if core.graph().edge(edge)?.state() != LocationState::Distant {
            return Ok(());
        }
        let mut requests = Vec::new();
        for location in Self::distant_locations(core, edge)? {
            pack.mark_black();
            requests.push(self.id_comm.issend(&edge, location, pack.request_tag(Tag::Unlink))?);
        }
        for request in requests {
            pack.wait_send(request, core)?;
        }
        Ok(())
    }

    /// Ask the owner of a distant node to remove it from the global graph.
    pub(crate) fn remove_node(
        &self,
        pack: &mut ServerPack<T>,
        core: &mut GraphCore<T>,
        node: DistributedId,
        location: Rank,
    ) -> Result<(), PlexusError> {
        pack.mark_black();
        let request =
            self.id_comm
                .issend(&node, location, pack.request_tag(Tag::RemoveNode))?;
        pack.wait_send(request, core)
    }
}
