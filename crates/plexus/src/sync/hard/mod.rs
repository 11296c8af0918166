//! Hard synchronization mode.
//!
//! The strongest regime: accessed data is always up to date and concurrent
//! access is managed globally. Every node carries a read/write mutex hosted
//! on its owner; every read, write, lock and linking operation on a distant
//! node is a synchronous epoch-tagged RPC. Outbound requests go through
//! [`client::MutexClient`]/[`client::LinkClient`], inbound ones through the
//! servers multiplexed in [`server_pack::ServerPack`]. Link, unlink and
//! node-removal operations are committed on the fly.
//!
//! While any client call waits for a reply it pumps the local server pack,
//! so a process blocked on a remote owner keeps answering requests on its
//! own nodes. The synchronization barrier runs the four-color
//! [`termination::Termination`] algorithm, after which the epoch toggles
//! and every outstanding non-blocking send is drained.

pub mod enums;
pub mod mutex;

pub(crate) mod client;
pub(crate) mod server;
pub(crate) mod server_pack;
pub(crate) mod termination;

use std::collections::BTreeSet;
use std::rc::Rc;

use plexus_comm::Communicator;
use plexus_core::error::PlexusError;
use plexus_core::graph::{Edge, GraphData, LocationState};
use plexus_core::id::DistributedId;
use serde::{Deserialize, Serialize};

use crate::graph::GraphCore;
use crate::sync::SyncMode;

use client::{LinkClient, MutexClient};
use enums::{Epoch, MutexRequestKind};
use mutex::{MutexRequest, RequestSource};
use server_pack::ServerPack;
use termination::Termination;

/// Reply to a READ or ACQUIRE request: serialized data plus weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DataResponse<T> {
    pub data: T,
    pub weight: f32,
}

/// Payload of a RELEASE_ACQUIRE request: the updated data going back to
/// the owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DataUpdate<T> {
    pub node: DistributedId,
    pub data: T,
}

/// Per-access synchronization mode.
pub struct HardSyncMode<T: GraphData> {
    mutex_client: MutexClient<T>,
    link_client: LinkClient<T>,
    pack: ServerPack<T>,
    termination: Termination,
    /// Edges linked locally between two distant nodes: they only exist on
    /// the owners' ranks once committed, so the local copy is erased at the
    /// next barrier.
    ghost_edges: BTreeSet<DistributedId>,
}

impl<T: GraphData> HardSyncMode<T> {
    pub fn new(comm: Rc<dyn Communicator>) -> Self {
        Self {
            mutex_client: MutexClient::new(comm.clone()),
            link_client: LinkClient::new(comm.clone()),
            pack: ServerPack::new(comm.clone()),
            termination: Termination::new(comm),
            ghost_edges: BTreeSet::new(),
        }
    }

    fn state_and_location(
        core: &GraphCore<T>,
        node: DistributedId,
    ) -> Result<(LocationState, u32), PlexusError> {
        let node = core.graph().node(node)?;
        Ok((node.state(), node.location()))
    }

    /// Run the termination barrier, then drain pending sends.
    fn terminate(&mut self, core: &mut GraphCore<T>) -> Result<(), PlexusError> {
        self.termination.terminate(&mut self.pack, core)?;
        self.pack.drain_pending()
    }
}

impl<T: GraphData> SyncMode<T> for HardSyncMode<T> {
    fn name(&self) -> &'static str {
        "hard"
    }

    fn init_link(&mut self, _core: &mut GraphCore<T>, _edge: &Edge) -> Result<(), PlexusError> {
        Ok(())
    }

    fn notify_linked(
        &mut self,
        core: &mut GraphCore<T>,
        edge: DistributedId,
    ) -> Result<(), PlexusError> {
        self.link_client.link(&mut self.pack, core, edge)?;
        let edge_ref = core.graph().edge(edge)?;
        let source_distant =
            core.graph().node(edge_ref.source())?.state() == LocationState::Distant;
        let target_distant =
            core.graph().node(edge_ref.target())?.state() == LocationState::Distant;
        if source_distant && target_distant {
            self.ghost_edges.insert(edge);
        }
        Ok(())
    }

    fn init_unlink(
        &mut self,
        core: &mut GraphCore<T>,
        edge: DistributedId,
    ) -> Result<(), PlexusError> {
        self.link_client.unlink(&mut self.pack, core, edge)?;
        self.ghost_edges.remove(&edge);
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
        let (state, location) = Self::state_and_location(core, node)?;
        match state {
            // Committed on the fly: tear down locally, notifying the ranks
            // holding the other representation of each incident edge.
            LocationState::Local => self.pack.remove_hosted_node(core, node),
            LocationState::Distant => {
                self.link_client
                    .remove_node(&mut self.pack, core, node, location)
            }
        }
    }

    fn synchronize_links(&mut self, core: &mut GraphCore<T>) -> Result<(), PlexusError> {
        for edge in std::mem::take(&mut self.ghost_edges) {
            if core.graph().contains_edge(edge) {
                core.erase_edge_and_cleanup(edge)?;
            }
        }
        self.terminate(core)
    }

    fn synchronize_data(
        &mut self,
        core: &mut GraphCore<T>,
        _subset: Option<&BTreeSet<DistributedId>>,
    ) -> Result<(), PlexusError> {
        // Data is kept consistent per access; the barrier only has to
        // reach global quiescence. The subset is irrelevant here.
        self.terminate(core)
    }

    fn finalize_distribution(&mut self, core: &mut GraphCore<T>) -> Result<(), PlexusError> {
        self.pack.prune_mutexes(core);
        Ok(())
    }

    fn read(&mut self, core: &mut GraphCore<T>, node: DistributedId) -> Result<T, PlexusError> {
        let (state, location) = Self::state_and_location(core, node)?;
        match state {
            LocationState::Local => {
                if self.pack.mutex(node).locked() {
                    let request =
                        MutexRequest::new(node, RequestSource::Local, MutexRequestKind::Read);
                    self.pack.mutex(node).push_request(request);
                    self.pack.wait_local(request, core)?;
                }
                self.pack.mutex(node).lock_shared();
                Ok(core.graph().node(node)?.data().clone())
            }
            LocationState::Distant => self.mutex_client.read(&mut self.pack, core, node, location),
        }
    }

    fn release_read(
        &mut self,
        core: &mut GraphCore<T>,
        node: DistributedId,
    ) -> Result<(), PlexusError> {
        let (state, location) = Self::state_and_location(core, node)?;
        match state {
            LocationState::Local => {
                self.pack.mutex(node).unlock_shared();
                if self.pack.mutex(node).shared_count() == 0 {
                    self.pack.notify(node, core)?;
                }
                Ok(())
            }
            LocationState::Distant => {
                self.mutex_client
                    .release_read(&mut self.pack, core, node, location)
            }
        }
    }

    fn acquire(&mut self, core: &mut GraphCore<T>, node: DistributedId) -> Result<T, PlexusError> {
        let (state, location) = Self::state_and_location(core, node)?;
        match state {
            LocationState::Local => {
                let busy = {
                    let mutex = self.pack.mutex(node);
                    mutex.locked() || mutex.shared_count() > 0
                };
                if busy {
                    let request =
                        MutexRequest::new(node, RequestSource::Local, MutexRequestKind::Acquire);
                    self.pack.mutex(node).push_request(request);
                    self.pack.wait_local(request, core)?;
                }
                self.pack.mutex(node).lock();
                Ok(core.graph().node(node)?.data().clone())
            }
            LocationState::Distant => {
                self.mutex_client
                    .acquire(&mut self.pack, core, node, location)
            }
        }
    }

    fn release_acquire(
        &mut self,
        core: &mut GraphCore<T>,
        node: DistributedId,
        data: T,
    ) -> Result<(), PlexusError> {
        let (state, location) = Self::state_and_location(core, node)?;
        match state {
            LocationState::Local => {
                self.pack.mutex(node).unlock();
                core.graph_mut().node_mut(node)?.set_data(data);
                self.pack.notify(node, core)
            }
            LocationState::Distant => {
                self.mutex_client
                    .release_acquire(&mut self.pack, core, node, data, location)
            }
        }
    }

    fn lock(&mut self, core: &mut GraphCore<T>, node: DistributedId) -> Result<(), PlexusError> {
        let (state, location) = Self::state_and_location(core, node)?;
        match state {
            LocationState::Local => {
                let busy = {
                    let mutex = self.pack.mutex(node);
                    mutex.locked() || mutex.shared_count() > 0
                };
                if busy {
                    let request =
                        MutexRequest::new(node, RequestSource::Local, MutexRequestKind::Lock);
                    self.pack.mutex(node).push_request(request);
                    self.pack.wait_local(request, core)?;
                }
                self.pack.mutex(node).lock();
                Ok(())
            }
            LocationState::Distant => self.mutex_client.lock(&mut self.pack, core, node, location),
        }
    }

    fn unlock(&mut self, core: &mut GraphCore<T>, node: DistributedId) -> Result<(), PlexusError> {
        let (state, location) = Self::state_and_location(core, node)?;
        match state {
            LocationState::Local => {
                self.pack.mutex(node).unlock();
                self.pack.notify(node, core)
            }
            LocationState::Distant => {
                self.mutex_client.unlock(&mut self.pack, core, node, location)
            }
        }
    }

    fn lock_shared(
        &mut self,
        core: &mut GraphCore<T>,
        node: DistributedId,
    ) -> Result<(), PlexusError> {
        let (state, location) = Self::state_and_location(core, node)?;
        match state {
            LocationState::Local => {
                if self.pack.mutex(node).locked() {
                    let request = MutexRequest::new(
                        node,
                        RequestSource::Local,
                        MutexRequestKind::LockShared,
                    );
                    self.pack.mutex(node).push_request(request);
                    self.pack.wait_local(request, core)?;
                }
                self.pack.mutex(node).lock_shared();
                Ok(())
            }
            LocationState::Distant => {
                self.mutex_client
                    .lock_shared(&mut self.pack, core, node, location)
            }
        }
    }

    fn unlock_shared(
        &mut self,
        core: &mut GraphCore<T>,
        node: DistributedId,
    ) -> Result<(), PlexusError> {
        let (state, location) = Self::state_and_location(core, node)?;
        match state {
            LocationState::Local => {
                self.pack.mutex(node).unlock_shared();
                if self.pack.mutex(node).shared_count() == 0 {
                    self.pack.notify(node, core)?;
                }
                Ok(())
            }
            LocationState::Distant => {
                self.mutex_client
                    .unlock_shared(&mut self.pack, core, node, location)
            }
        }
    }

    fn epoch(&self) -> Option<Epoch> {
        Some(self.pack.epoch())
    }

    fn pending_sends(&self) -> usize {
        self.pack.pending_len()
    }
}
