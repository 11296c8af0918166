//! Multiplexed mutex and link servers.
//!
//! The server pack drives both owner-side servers as one unit: a single
//! reception cycle services both, the epoch and the termination color are
//! shared, and the pending non-blocking sends of both are drained together
//! at every termination barrier so the buffers can be freed.

use std::rc::Rc;

use plexus_comm::{Communicator, SendRequest, Status};
use plexus_core::error::PlexusError;
use plexus_core::graph::GraphData;
use plexus_core::id::{DistributedId, Rank};

use crate::graph::GraphCore;

use super::enums::{tagged, Color, Epoch, Tag};
use super::mutex::{HardSyncMutex, MutexRequest};
use super::server::{LinkServer, MutexServer, ServerCtx};

pub(crate) struct ServerPack<T: GraphData> {
    comm: Rc<dyn Communicator>,
    epoch: Epoch,
    color: Color,
    pending: Vec<SendRequest>,
    mutex_server: MutexServer<T>,
    link_server: LinkServer<T>,
}

impl<T: GraphData> ServerPack<T> {
    pub(crate) fn new(comm: Rc<dyn Communicator>) -> Self {
        Self {
            mutex_server: MutexServer::new(comm.clone()),
            link_server: LinkServer::new(comm.clone()),
            comm,
            epoch: Epoch::Even,
            color: Color::White,
            pending: Vec::new(),
        }
    }

    pub(crate) fn comm(&self) -> Rc<dyn Communicator> {
        self.comm.clone()
    }

    pub(crate) fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub(crate) fn toggle_epoch(&mut self) {
        self.epoch = self.epoch.toggle();
    }

    /// Epoch-qualified tag for an outbound request.
    pub(crate) fn request_tag(&self, tag: Tag) -> u32 {
        tagged(self.epoch, tag)
    }

    pub(crate) fn color(&self) -> Color {
        self.color
    }

    pub(crate) fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    /// Record protocol activity: any RPC send paints this process black.
    pub(crate) fn mark_black(&mut self) {
        self.color = Color::Black;
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Lock state of a hosted node.
    pub(crate) fn mutex(&mut self, node: DistributedId) -> &mut HardSyncMutex {
        self.mutex_server.mutex(node)
    }

    /// Drop lock state of nodes that stopped being local (after a
    /// distribution pass).
    pub(crate) fn prune_mutexes(&mut self, core: &GraphCore<T>) {
        self.mutex_server.prune(core);
    }

    /// One reception cycle over both servers. Returns whether any message
    /// was consumed.
    pub(crate) fn handle_incoming(&mut self, core: &mut GraphCore<T>) -> Result<bool, PlexusError> {
        let Self {
            comm,
            epoch,
            color,
            pending,
            mutex_server,
            link_server,
        } = self;
        let mut ctx = ServerCtx {
            comm,
            epoch: *epoch,
            color,
            pending,
        };
        let (mutex_handled, _) = mutex_server.handle_incoming(&mut ctx, core, None)?;
        let link_handled = link_server.handle_incoming(&mut ctx, core, mutex_server)?;
        Ok(mutex_handled || link_handled)
    }

    /// Consume every message currently available, over as many reception
    /// cycles as it takes. Used right before an epoch toggle so no message
    /// of the closing round is left behind.
    pub(crate) fn drain_incoming(&mut self, core: &mut GraphCore<T>) -> Result<(), PlexusError> {
        while self.handle_incoming(core)? {}
        Ok(())
    }

    /// Serve requests until the blocked local `request` is dequeued.
    pub(crate) fn wait_local(
        &mut self,
        request: MutexRequest,
        core: &mut GraphCore<T>,
    ) -> Result<(), PlexusError> {
        tracing::debug!(node = %request.node, "waiting on local mutex request");
        loop {
            let Self {
                comm,
                epoch,
                color,
                pending,
                mutex_server,
                link_server,
            } = self;
            let mut ctx = ServerCtx {
                comm,
                epoch: *epoch,
                color,
                pending,
            };
            let (_, satisfied) = mutex_server.handle_incoming(&mut ctx, core, Some(&request))?;
            link_server.handle_incoming(&mut ctx, core, mutex_server)?;
            if satisfied {
                return Ok(());
            }
        }
    }

    /// Drain the servable queue of a node after a local release.
    pub(crate) fn notify(
        &mut self,
        node: DistributedId,
        core: &mut GraphCore<T>,
    ) -> Result<(), PlexusError> {
        let Self {
            comm,
            epoch,
            color,
            pending,
            mutex_server,
            ..
        } = self;
        let mut ctx = ServerCtx {
            comm,
            epoch: *epoch,
            color,
            pending,
        };
        mutex_server.respond_to_requests(&mut ctx, core, node, None)?;
        Ok(())
    }

    /// Tear down a node hosted on this process, notifying the ranks that
    /// hold the other representation of each incident edge.
    pub(crate) fn remove_hosted_node(
        &mut self,
        core: &mut GraphCore<T>,
        node: DistributedId,
    ) -> Result<(), PlexusError> {
        let Self {
            comm,
            epoch,
            color,
            pending,
            mutex_server,
            link_server,
        } = self;
        let mut ctx = ServerCtx {
            comm,
            epoch: *epoch,
            color,
            pending,
        };
        link_server.remove_local_node(&mut ctx, core, mutex_server, node)
    }

    /// Complete an outbound send while answering incoming requests, so two
    /// processes sending to each other cannot deadlock.
    pub(crate) fn wait_send(
        &mut self,
        request: SendRequest,
        core: &mut GraphCore<T>,
    ) -> Result<(), PlexusError> {
        let mut request = request;
        while !self.comm.test(&mut request)? {
            self.handle_incoming(core)?;
        }
        Ok(())
    }

    /// Wait for an epoch-tagged response from `source` while answering
    /// incoming requests.
    pub(crate) fn wait_response(
        &mut self,
        source: Rank,
        tag: Tag,
        core: &mut GraphCore<T>,
    ) -> Result<Status, PlexusError> {
        loop {
            if let Some(status) = self.comm.iprobe(Some(source), self.request_tag(tag))? {
                return Ok(status);
            }
            self.handle_incoming(core)?;
        }
    }

    /// Complete every outstanding non-blocking send so buffers can be
    /// freed. Called after each termination round.
    pub(crate) fn drain_pending(&mut self) -> Result<(), PlexusError> {
        let mut pending = std::mem::take(&mut self.pending);
        self.comm.wait_all(&mut pending)?;
        Ok(())
    }
}
