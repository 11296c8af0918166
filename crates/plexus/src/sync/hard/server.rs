//! Owner-side request handlers.
//!
//! [`MutexServer`] services the per-node lock state machine; [`LinkServer`]
//! applies on-the-fly link, unlink and node-removal requests. Both are
//! multiplexed by the server pack, which hands them a [`ServerCtx`] carrying
//! the epoch, the termination color and the pending-send list shared by the
//! whole pack.
//!
//! Every response is a non-blocking send: the request handle goes into the
//! pending list and is drained at the next termination barrier, and the
//! send flips the process color black so the termination algorithm sees the
//! activity.

use std::collections::HashMap;
use std::rc::Rc;

use plexus_comm::{Communicator, SendRequest, TypedComm};
use plexus_core::error::PlexusError;
use plexus_core::graph::{GraphData, LocationState};
use plexus_core::id::{DistributedId, Rank};

use crate::graph::migration::{import_edge, EdgePack};
use crate::graph::GraphCore;

use super::enums::{tagged, Color, Epoch, MutexRequestKind, Tag};
use super::mutex::{HardSyncMutex, MutexRequest, RequestSource};
use super::{DataResponse, DataUpdate};

/// Shared server-side state threaded through every handler call.
pub(crate) struct ServerCtx<'a> {
    pub comm: &'a Rc<dyn Communicator>,
    pub epoch: Epoch,
    pub color: &'a mut Color,
    pub pending: &'a mut Vec<SendRequest>,
}

impl ServerCtx<'_> {
    fn mark_black(&mut self) {
        *self.color = Color::Black;
    }

    fn push_pending(&mut self, request: SendRequest) {
        self.pending.push(request);
    }
}

/// Owner-side mutex state machine for every node hosted on this process.
pub(crate) struct MutexServer<T: GraphData> {
    mutexes: HashMap<DistributedId, HardSyncMutex>,
    id_comm: TypedComm<DistributedId>,
    data_comm: TypedComm<DataResponse<T>>,
    update_comm: TypedComm<DataUpdate<T>>,
}

impl<T: GraphData> MutexServer<T> {
    pub(crate) fn new(comm: Rc<dyn Communicator>) -> Self {
        Self {
            mutexes: HashMap::new(),
            id_comm: TypedComm::new(comm.clone()),
            data_comm: TypedComm::new(comm.clone()),
            update_comm: TypedComm::new(comm),
        }
    }

    /// Lock state of `node`, created on first use.
    pub(crate) fn mutex(&mut self, node: DistributedId) -> &mut HardSyncMutex {
        self.mutexes.entry(node).or_default()
    }

    /// Drop the lock state of a node leaving this process.
    pub(crate) fn remove(&mut self, node: DistributedId) {
        if let Some(mutex) = self.mutexes.remove(&node) {
            debug_assert!(
                mutex.queues_empty(),
                "mutex of {node} removed with queued requests"
            );
        }
    }

    /// Drop the lock state of every node that is no longer local.
    pub(crate) fn prune(&mut self, core: &GraphCore<T>) {
        self.mutexes
            .retain(|id, _| core.locations().local_nodes().contains(id));
    }

    /// One reception cycle: at most one request of each kind is received
    /// and handled.
    ///
    /// Returns `(handled, satisfied)`: whether any message was consumed,
    /// and — when `waited` is set — whether draining a release satisfied
    /// that blocked local request.
    pub(crate) fn handle_incoming(
        &mut self,
        ctx: &mut ServerCtx<'_>,
        core: &mut GraphCore<T>,
        waited: Option<&MutexRequest>,
    ) -> Result<(bool, bool), PlexusError> {
        let mut handled = false;

        // Read / acquire / lock / shared-lock requests.
        if let Some(status) = ctx.comm.iprobe(None, tagged(ctx.epoch, Tag::Read))? {
            let (id, _) = self.id_comm.recv(status.source, status.tag)?;
            tracing::trace!(node = %id, source = status.source, "read request");
            self.handle_read(ctx, core, id, status.source)?;
            handled = true;
        }
        if let Some(status) = ctx.comm.iprobe(None, tagged(ctx.epoch, Tag::Acquire))? {
            let (id, _) = self.id_comm.recv(status.source, status.tag)?;
            tracing::trace!(node = %id, source = status.source, "acquire request");
            self.handle_acquire(ctx, core, id, status.source)?;
            handled = true;
        }
        if let Some(status) = ctx.comm.iprobe(None, tagged(ctx.epoch, Tag::Lock))? {
            let (id, _) = self.id_comm.recv(status.source, status.tag)?;
            tracing::trace!(node = %id, source = status.source, "lock request");
            self.handle_lock(ctx, id, status.source)?;
            handled = true;
        }
        if let Some(status) = ctx.comm.iprobe(None, tagged(ctx.epoch, Tag::LockShared))? {
            let (id, _) = self.id_comm.recv(status.source, status.tag)?;
            tracing::trace!(node = %id, source = status.source, "shared lock request");
            self.handle_lock_shared(ctx, id, status.source)?;
            handled = true;
        }

        // Releases. Each may unblock queued requests, including the local
        // one the caller waits for.
        if let Some(status) = ctx.comm.iprobe(None, tagged(ctx.epoch, Tag::ReleaseAcquire))? {
            let (update, _) = self.update_comm.recv(status.source, status.tag)?;
            tracing::trace!(node = %update.node, source = status.source, "release acquire");
            if self.handle_release_acquire(ctx, core, update, waited)? {
                return Ok((true, true));
            }
            handled = true;
        }
        if let Some(status) = ctx.comm.iprobe(None, tagged(ctx.epoch, Tag::Unlock))? {
            let (id, _) = self.id_comm.recv(status.source, status.tag)?;
            tracing::trace!(node = %id, source = status.source, "unlock");
            if self.handle_unlock(ctx, core, id, waited)? {
                return Ok((true, true));
            }
            handled = true;
        }
        if let Some(status) = ctx.comm.iprobe(None, tagged(ctx.epoch, Tag::UnlockShared))? {
            let (id, _) = self.id_comm.recv(status.source, status.tag)?;
            tracing::trace!(node = %id, source = status.source, "shared unlock");
            if self.handle_unlock_shared(ctx, core, id, waited)? {
                return Ok((true, true));
            }
            handled = true;
        }
        Ok((handled, false))
    }

    fn handle_read(
        &mut self,
        ctx: &mut ServerCtx<'_>,
        core: &mut GraphCore<T>,
        id: DistributedId,
        source: Rank,
    ) -> Result<(), PlexusError> {
        if self.mutex(id).locked() {
            self.mutex(id).push_request(MutexRequest::new(
                id,
                RequestSource::Remote(source),
                MutexRequestKind::Read,
            ));
        } else {
            self.respond_to_read(ctx, core, id, source)?;
        }
        Ok(())
    }

    fn respond_to_read(
        &mut self,
        ctx: &mut ServerCtx<'_>,
        core: &mut GraphCore<T>,
        id: DistributedId,
        source: Rank,
    ) -> Result<(), PlexusError> {
        self.mutex(id).lock_shared();
        let node = core.graph().node(id)?;
        let response = DataResponse {
            data: node.data().clone(),
            weight: node.weight(),
        };
        let request =
            self.data_comm
                .issend(&response, source, tagged(ctx.epoch, Tag::ReadResponse))?;
        ctx.push_pending(request);
        ctx.mark_black();
        Ok(())
    }

    fn handle_acquire(
        &mut self,
        ctx: &mut ServerCtx<'_>,
        core: &mut GraphCore<T>,
        id: DistributedId,
        source: Rank,
    ) -> Result<(), PlexusError> {
        let mutex = self.mutex(id);
        if mutex.locked() || mutex.shared_count() > 0 {
            mutex.push_request(MutexRequest::new(
                id,
                RequestSource::Remote(source),
                MutexRequestKind::Acquire,
            ));
        } else {
            self.respond_to_acquire(ctx, core, id, source)?;
        }
        Ok(())
    }

    fn respond_to_acquire(
        &mut self,
        ctx: &mut ServerCtx<'_>,
        core: &mut GraphCore<T>,
        id: DistributedId,
        source: Rank,
    ) -> Result<(), PlexusError> {
        self.mutex(id).lock();
        let node = core.graph().node(id)?;
        let response = DataResponse {
            data: node.data().clone(),
            weight: node.weight(),
        };
        let request =
            self.data_comm
                .issend(&response, source, tagged(ctx.epoch, Tag::AcquireResponse))?;
        ctx.push_pending(request);
        ctx.mark_black();
        Ok(())
    }

    fn handle_lock(
        &mut self,
        ctx: &mut ServerCtx<'_>,
        id: DistributedId,
        source: Rank,
    ) -> Result<(), PlexusError> {
        let mutex = self.mutex(id);
        if mutex.locked() || mutex.shared_count() > 0 {
            mutex.push_request(MutexRequest::new(
                id,
                RequestSource::Remote(source),
                MutexRequestKind::Lock,
            ));
        } else {
            self.respond_to_lock(ctx, id, source)?;
        }
        Ok(())
    }

    fn respond_to_lock(
        &mut self,
        ctx: &mut ServerCtx<'_>,
        id: DistributedId,
        source: Rank,
    ) -> Result<(), PlexusError> {
        self.mutex(id).lock();
        let request = ctx
            .comm
            .issend(source, tagged(ctx.epoch, Tag::LockResponse), &[])?;
        ctx.push_pending(request);
        ctx.mark_black();
        Ok(())
    }

    fn handle_lock_shared(
        &mut self,
        ctx: &mut ServerCtx<'_>,
        id: DistributedId,
        source: Rank,
    ) -> Result<(), PlexusError> {
        if self.mutex(id).locked() {
            self.mutex(id).push_request(MutexRequest::new(
                id,
                RequestSource::Remote(source),
                MutexRequestKind::LockShared,
            ));
        } else {
            self.respond_to_lock_shared(ctx, id, source)?;
        }
        Ok(())
    }

    fn respond_to_lock_shared(
        &mut self,
        ctx: &mut ServerCtx<'_>,
        id: DistributedId,
        source: Rank,
    ) -> Result<(), PlexusError> {
        self.mutex(id).lock_shared();
        let request =
            ctx.comm
                .issend(source, tagged(ctx.epoch, Tag::LockSharedResponse), &[])?;
        ctx.push_pending(request);
        ctx.mark_black();
        Ok(())
    }

    fn handle_release_acquire(
        &mut self,
        ctx: &mut ServerCtx<'_>,
        core: &mut GraphCore<T>,
        update: DataUpdate<T>,
        waited: Option<&MutexRequest>,
    ) -> Result<bool, PlexusError> {
        self.mutex(update.node).unlock();
        core.graph_mut().node_mut(update.node)?.set_data(update.data);
        self.respond_to_requests(ctx, core, update.node, waited)
    }

    fn handle_unlock(
        &mut self,
        ctx: &mut ServerCtx<'_>,
        core: &mut GraphCore<T>,
        id: DistributedId,
        waited: Option<&MutexRequest>,
    ) -> Result<bool, PlexusError> {
        self.mutex(id).unlock();
        self.respond_to_requests(ctx, core, id, waited)
    }

    fn handle_unlock_shared(
        &mut self,
        ctx: &mut ServerCtx<'_>,
        core: &mut GraphCore<T>,
        id: DistributedId,
        waited: Option<&MutexRequest>,
    ) -> Result<bool, PlexusError> {
        self.mutex(id).unlock_shared();
        self.respond_to_requests(ctx, core, id, waited)
    }

    /// Drain the servable queued requests of `node`.
    ///
    /// Returns `true` when the drain dequeued the `waited` local request:
    /// the blocked local call site resumes and applies its own lock state
    /// transition.
    pub(crate) fn respond_to_requests(
        &mut self,
        ctx: &mut ServerCtx<'_>,
        core: &mut GraphCore<T>,
        node: DistributedId,
        waited: Option<&MutexRequest>,
    ) -> Result<bool, PlexusError> {
        let requests = self.mutex(node).requests_to_process();
        let mut satisfied = false;
        for request in requests {
            match request.source {
                RequestSource::Remote(source) => match request.kind {
                    MutexRequestKind::Read => self.respond_to_read(ctx, core, node, source)?,
                    MutexRequestKind::Acquire => {
                        self.respond_to_acquire(ctx, core, node, source)?
                    }
                    MutexRequestKind::Lock => self.respond_to_lock(ctx, node, source)?,
                    MutexRequestKind::LockShared => {
                        self.respond_to_lock_shared(ctx, node, source)?
                    }
                },
                RequestSource::Local => {
                    if waited == Some(&request) {
                        satisfied = true;
                    } else {
                        tracing::warn!(node = %node, "dequeued an unexpected local request");
                    }
                }
            }
        }
        Ok(satisfied)
    }
}

/// Owner-side handler of on-the-fly link, unlink and node removal.
pub(crate) struct LinkServer<T: GraphData> {
    edge_comm: TypedComm<EdgePack<T>>,
    id_comm: TypedComm<DistributedId>,
}

impl<T: GraphData> LinkServer<T> {
    pub(crate) fn new(comm: Rc<dyn Communicator>) -> Self {
        Self {
            edge_comm: TypedComm::new(comm.clone()),
            id_comm: TypedComm::new(comm),
        }
    }

    /// One reception cycle: at most one link, one unlink and one removal.
    ///
    /// Returns whether any message was consumed.
    pub(crate) fn handle_incoming(
        &mut self,
        ctx: &mut ServerCtx<'_>,
        core: &mut GraphCore<T>,
        mutex_server: &mut MutexServer<T>,
    ) -> Result<bool, PlexusError> {
        let mut handled = false;
        if let Some(status) = ctx.comm.iprobe(None, tagged(ctx.epoch, Tag::Link))? {
            let (pack, _) = self.edge_comm.recv(status.source, status.tag)?;
            tracing::trace!(edge = %pack.id, source = status.source, "link request");
            import_edge(core, pack)?;
            handled = true;
        }
        if let Some(status) = ctx.comm.iprobe(None, tagged(ctx.epoch, Tag::Unlink))? {
            let (id, _) = self.id_comm.recv(status.source, status.tag)?;
            tracing::trace!(edge = %id, source = status.source, "unlink request");
            // Duplicate arrivals are silently ignored.
            if core.graph().contains_edge(id) {
                core.erase_edge_and_cleanup(id)?;
            }
            handled = true;
        }
        if let Some(status) = ctx.comm.iprobe(None, tagged(ctx.epoch, Tag::RemoveNode))? {
            let (id, _) = self.id_comm.recv(status.source, status.tag)?;
            tracing::trace!(node = %id, source = status.source, "remove node request");
            self.remove_local_node(ctx, core, mutex_server, id)?;
            handled = true;
        }
        Ok(handled)
    }

    /// Tear a hosted node down: unlink every incident edge (notifying the
    /// ranks holding the other representation), then erase the node.
    pub(crate) fn remove_local_node(
        &mut self,
        ctx: &mut ServerCtx<'_>,
        core: &mut GraphCore<T>,
        mutex_server: &mut MutexServer<T>,
        id: DistributedId,
    ) -> Result<(), PlexusError> {
        if !core.graph().contains_node(id) {
            return Ok(());
        }
        for edge_id in core.graph().node(id)?.incident_edges() {
            if !core.graph().contains_edge(edge_id) {
                continue;
            }
            let (source, target) = {
                let edge = core.graph().edge(edge_id)?;
                (edge.source(), edge.target())
            };
            for endpoint in [source, target] {
                let node = core.graph().node(endpoint)?;
                if node.state() == LocationState::Distant {
                    let location = node.location();
                    let request = self.id_comm.issend(
                        &edge_id,
                        location,
                        tagged(ctx.epoch, Tag::Unlink),
                    )?;
                    ctx.push_pending(request);
                    ctx.mark_black();
                }
            }
            core.erase_edge_and_cleanup(edge_id)?;
        }
        if core.graph().contains_node(id) {
            core.erase_node_full(id)?;
        }
        mutex_server.remove(id);
        Ok(())
    }
}
