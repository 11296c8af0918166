//! Per-node read/write lock state, hosted on the node's owner.
//!
//! Requests that cannot be served immediately are queued: shared requests
//! (READ, LOCK_SHARED) and exclusive requests (ACQUIRE, LOCK) in separate
//! queues. [`HardSyncMutex::requests_to_process`] drains them with a
//! readers-first discipline bounded by two rules: a batch stops at a local
//! request (the local operation proceeds last), and no exclusive request is
//! granted while shared locks are held. Under any finite request stream no
//! writer is overtaken indefinitely.

use std::collections::VecDeque;

use plexus_core::id::{DistributedId, Rank};

use super::enums::MutexRequestKind;

/// Where a queued request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSource {
    /// The blocked local call site of this process.
    Local,
    /// A remote client.
    Remote(Rank),
}

/// One queued mutex request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexRequest {
    pub node: DistributedId,
    pub source: RequestSource,
    pub kind: MutexRequestKind,
}

impl MutexRequest {
    pub fn new(node: DistributedId, source: RequestSource, kind: MutexRequestKind) -> Self {
        Self { node, source, kind }
    }
}

/// Lock state of one node.
///
/// Invariant: never locked exclusively while shared locks are held.
#[derive(Debug, Default)]
pub struct HardSyncMutex {
    locked: bool,
    shared: u32,
    lock_requests: VecDeque<MutexRequest>,
    shared_requests: VecDeque<MutexRequest>,
}

impl HardSyncMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn shared_count(&self) -> u32 {
        self.shared
    }

    pub fn lock(&mut self) {
        debug_assert!(self.shared == 0, "exclusive lock while shared locks held");
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn lock_shared(&mut self) {
        debug_assert!(!self.locked, "shared lock while exclusively locked");
        self.shared += 1;
    }

    pub fn unlock_shared(&mut self) {
        debug_assert!(self.shared > 0, "unbalanced shared unlock");
        self.shared = self.shared.saturating_sub(1);
    }

    /// Queue a request that could not be served immediately.
    pub fn push_request(&mut self, request: MutexRequest) {
        match request.kind {
            MutexRequestKind::Read | MutexRequestKind::LockShared => {
                self.shared_requests.push_back(request)
            }
            MutexRequestKind::Lock | MutexRequestKind::Acquire => {
                self.lock_requests.push_back(request)
            }
        }
    }

    /// True when neither queue holds a request.
    pub fn queues_empty(&self) -> bool {
        self.lock_requests.is_empty() && self.shared_requests.is_empty()
    }

    /// Dequeue the batch of requests that can be served now.
    ///
    /// Nothing is served while the node is exclusively locked. Otherwise
    /// shared requests drain first; a local shared request ends the batch
    /// (the blocked local operation resumes last). One exclusive request is
    /// appended only when no shared request was drained and no shared lock
    /// is held.
    pub fn requests_to_process(&mut self) -> VecDeque<MutexRequest> {
        let mut batch = VecDeque::new();
        if self.locked {
            return batch;
        }
        while let Some(request) = self.shared_requests.pop_front() {
            let local = request.source == RequestSource::Local;
            batch.push_back(request);
            if local {
                return batch;
            }
        }
        if batch.is_empty() && self.shared == 0 {
            if let Some(request) = self.lock_requests.pop_front() {
                batch.push_back(request);
            }
        }
        batch
    }
}
