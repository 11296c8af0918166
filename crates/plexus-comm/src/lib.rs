//! # Plexus Comm
//!
//! Communication substrate for the distributed graph: typed point-to-point
//! and collective messaging with non-blocking probe/test/wait primitives.
//!
//! The [`Communicator`] trait captures the message-passing contract every
//! transport must honor, most importantly **pairwise FIFO** per
//! `(source, destination, tag)` triple. [`LocalCluster`](local::LocalCluster)
//! is the in-process transport: it runs N ranks as threads connected by
//! unbounded channels, which is how every multi-rank test in the workspace
//! executes.
//!
//! Communication errors are not recovered. A [`CommError`] propagates out of
//! the rank's run closure and aborts that rank.
//!
//! ```rust
//! use plexus_comm::local::LocalCluster;
//! use plexus_comm::Communicator;
//!
//! let echoed = LocalCluster::run(2, |comm| {
//!     if comm.rank() == 0 {
//!         comm.send(1, 7, b"ping").unwrap();
//!         0
//!     } else {
//!         let (bytes, status) = comm.recv(0, 7).unwrap();
//!         assert_eq!(status.source, 0);
//!         bytes.len()
//!     }
//! });
//! assert_eq!(echoed, vec![0, 4]);
//! ```

pub mod local;
pub mod typed;

use std::collections::HashMap;

use plexus_core::error::CommError;
use plexus_core::id::Rank;

pub use local::{ClusterConfig, LocalCluster, LocalComm};
pub use typed::{all_reduce, TypedComm};

/// Delivery metadata returned by probe and receive operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Rank the message came from.
    pub source: Rank,
    /// Tag the message was sent with.
    pub tag: u32,
    /// Payload size in bytes.
    pub len: usize,
}

/// Handle on an outstanding non-blocking synchronous send.
///
/// The request completes only once the receiver has matched the message
/// with a receive — not when the transport buffered it. The termination
/// algorithm of the hard synchronization mode relies on this: a process
/// that passed a send wait knows its message was consumed, so no message
/// can linger undetected across an epoch toggle. Callers keep the handle
/// in a pending list and drain it with [`Communicator::wait_all`] at the
/// next barrier so buffers can be freed.
#[derive(Debug)]
pub struct SendRequest {
    consumed: Option<std::sync::Arc<std::sync::atomic::AtomicBool>>,
}

impl SendRequest {
    /// A request that completed at send time (nothing to track).
    pub fn completed() -> Self {
        Self { consumed: None }
    }

    /// A request completing when `consumed` is raised by the receiver.
    pub fn pending(consumed: std::sync::Arc<std::sync::atomic::AtomicBool>) -> Self {
        Self {
            consumed: Some(consumed),
        }
    }

    /// True once the receiver matched the message.
    pub fn is_completed(&self) -> bool {
        self.consumed
            .as_ref()
            .map_or(true, |flag| flag.load(std::sync::atomic::Ordering::Acquire))
    }
}

/// Message-passing contract between the ranks of one simulation.
///
/// Guarantees required from implementations:
/// - pairwise FIFO per `(source, destination, tag)`;
/// - collectives are invoked in the same order by every rank and match by
///   program order;
/// - [`barrier`](Communicator::barrier) returns only once every rank
///   entered it. There are no timeouts: a missing participant deadlocks by
///   design.
pub trait Communicator {
    /// Rank of the calling process.
    fn rank(&self) -> Rank;

    /// Number of processes in the communicator.
    fn size(&self) -> u32;

    /// Blocking typed send.
    fn send(&self, dest: Rank, tag: u32, bytes: &[u8]) -> Result<(), CommError>;

    /// Non-blocking send. The returned request must be completed through
    /// [`test`](Communicator::test), [`wait`](Communicator::wait) or
    /// [`wait_all`](Communicator::wait_all) before the next barrier.
    fn issend(&self, dest: Rank, tag: u32, bytes: &[u8]) -> Result<SendRequest, CommError>;

    /// Poll an outstanding send for completion.
    fn test(&self, request: &mut SendRequest) -> Result<bool, CommError>;

    /// Block until an outstanding send completes.
    fn wait(&self, request: &mut SendRequest) -> Result<(), CommError>;

    /// Drain a list of outstanding sends.
    fn wait_all(&self, requests: &mut Vec<SendRequest>) -> Result<(), CommError> {
        for mut request in requests.drain(..) {
            self.wait(&mut request)?;
        }
        Ok(())
    }

    /// Non-blocking probe for a matching incoming message.
    ///
    /// `source = None` matches any source (scanned in rank order).
    fn iprobe(&self, source: Option<Rank>, tag: u32) -> Result<Option<Status>, CommError>;

    /// Blocking probe.
    fn probe(&self, source: Option<Rank>, tag: u32) -> Result<Status, CommError>;

    /// Blocking receive of the next message matching `(source, tag)`.
    fn recv(&self, source: Rank, tag: u32) -> Result<(Vec<u8>, Status), CommError>;

    /// Sparse all-to-all: every rank contributes a `rank -> bytes` map and
    /// receives the symmetric map of what every rank addressed to it.
    /// Missing entries mean "nothing for that rank"; empty payloads are not
    /// reported on the receive side.
    fn all_to_all(
        &self,
        outgoing: HashMap<Rank, Vec<u8>>,
    ) -> Result<HashMap<Rank, Vec<u8>>, CommError>;

    /// Gather every rank's payload at `root`. Non-root ranks get an empty
    /// vector; the root gets one entry per rank, indexed by rank.
    fn gather(&self, bytes: &[u8], root: Rank) -> Result<Vec<Vec<u8>>, CommError>;

    /// Gather every rank's payload everywhere, indexed by rank.
    fn all_gather(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, CommError>;

    /// Broadcast `root`'s payload to every rank.
    fn broadcast(&self, bytes: Vec<u8>, root: Rank) -> Result<Vec<u8>, CommError>;

    /// Collective barrier.
    fn barrier(&self) -> Result<(), CommError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_request_completion() {
        let request = SendRequest::completed();
        assert!(request.is_completed());
    }
}
