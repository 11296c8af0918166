//! In-process cluster transport.
//!
//! Runs N ranks as threads of one process, connected pairwise by unbounded
//! channels. One channel per `(source, destination)` pair plus per-source
//! stash queues on the receive side give exactly the ordering the
//! [`Communicator`] contract requires: pairwise FIFO per
//! `(source, destination, tag)`.
//!
//! Blocking sends complete eagerly (the channel buffers the payload).
//! Non-blocking sends are synchronous: the [`SendRequest`] completes only
//! once the receiver matched the message with a receive, which the
//! hard-sync termination algorithm depends on. Callers waiting on such a
//! request must keep servicing their own incoming messages, exactly like
//! the cooperative polling the protocol prescribes.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use plexus_core::error::CommError;
use plexus_core::id::Rank;

use crate::{Communicator, SendRequest, Status};

// Reserved tags for the collectives, outside the range protocol tags use.
const TAG_ALL_TO_ALL: u32 = 0x4000_0001;
const TAG_GATHER: u32 = 0x4000_0002;
const TAG_ALL_GATHER: u32 = 0x4000_0003;
const TAG_BCAST: u32 = 0x4000_0004;

/// Transport tuning knobs.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Yield the thread between polls of a blocking wait. Keeps busy-wait
    /// loops from starving sibling ranks on oversubscribed machines.
    pub spin_yield: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { spin_yield: true }
    }
}

struct Envelope {
    tag: u32,
    payload: Vec<u8>,
    /// Raised when the receiver matches this message with a receive;
    /// completes the sender's synchronous send request.
    consumed: Option<Arc<AtomicBool>>,
}

/// One rank's endpoint of a [`LocalCluster`].
///
/// Not `Sync`: each rank thread owns its endpoint, matching the
/// one-single-threaded-process-per-rank execution model.
pub struct LocalComm {
    rank: Rank,
    size: u32,
    senders: Vec<Sender<Envelope>>,
    receivers: Vec<Receiver<Envelope>>,
    stash: RefCell<Vec<VecDeque<Envelope>>>,
    barrier: Arc<Barrier>,
    config: ClusterConfig,
}

impl LocalComm {
    fn check_rank(&self, rank: Rank) -> Result<(), CommError> {
        if rank >= self.size {
            return Err(CommError::InvalidRank(rank));
        }
        Ok(())
    }

    /// Pull every already-delivered envelope from `source` into the stash.
    fn drain_channel(&self, source: Rank) -> Result<(), CommError> {
        let mut stash = self.stash.borrow_mut();
        loop {
            match self.receivers[source as usize].try_recv() {
                Ok(envelope) => stash[source as usize].push_back(envelope),
                Err(TryRecvError::Empty) => return Ok(()),
                // A closed channel with a drained stash simply has no more
                // messages; blocking calls report the disconnect instead.
                Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    fn stashed_status(&self, source: Rank, tag: u32) -> Option<Status> {
        let stash = self.stash.borrow();
        stash[source as usize]
            .iter()
            .find(|envelope| envelope.tag == tag)
            .map(|envelope| Status {
                source,
                tag,
                len: envelope.payload.len(),
            })
    }

    fn take_stashed(&self, source: Rank, tag: u32) -> Option<Vec<u8>> {
        let mut stash = self.stash.borrow_mut();
        let queue = &mut stash[source as usize];
        let position = queue.iter().position(|envelope| envelope.tag == tag)?;
        let envelope = queue.remove(position)?;
        if let Some(consumed) = &envelope.consumed {
            consumed.store(true, Ordering::Release);
        }
        Some(envelope.payload)
    }

    fn spin(&self) {
        if self.config.spin_yield {
            std::thread::yield_now();
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn send(&self, dest: Rank, tag: u32, bytes: &[u8]) -> Result<(), CommError> {
        self.check_rank(dest)?;
        tracing::trace!(rank = self.rank, dest, tag, len = bytes.len(), "send");
        self.senders[dest as usize]
            .send(Envelope {
                tag,
                payload: bytes.to_vec(),
                consumed: None,
            })
            .map_err(|_| CommError::Disconnected(dest))
    }

    fn issend(&self, dest: Rank, tag: u32, bytes: &[u8]) -> Result<SendRequest, CommError> {
        self.check_rank(dest)?;
        tracing::trace!(rank = self.rank, dest, tag, len = bytes.len(), "issend");
        let consumed = Arc::new(AtomicBool::new(false));
        self.senders[dest as usize]
            .send(Envelope {
                tag,
                payload: bytes.to_vec(),
                consumed: Some(consumed.clone()),
            })
            .map_err(|_| CommError::Disconnected(dest))?;
        Ok(SendRequest::pending(consumed))
    }

    fn test(&self, request: &mut SendRequest) -> Result<bool, CommError> {
        Ok(request.is_completed())
    }

    fn wait(&self, request: &mut SendRequest) -> Result<(), CommError> {
        while !self.test(request)? {
            self.spin();
        }
        Ok(())
    }

    fn iprobe(&self, source: Option<Rank>, tag: u32) -> Result<Option<Status>, CommError> {
        let candidates: Vec<Rank> = match source {
            Some(rank) => {
                self.check_rank(rank)?;
                vec![rank]
            }
            None => (0..self.size).collect(),
        };
        for rank in candidates {
            self.drain_channel(rank)?;
            if let Some(status) = self.stashed_status(rank, tag) {
                return Ok(Some(status));
            }
        }
        Ok(None)
    }

    fn probe(&self, source: Option<Rank>, tag: u32) -> Result<Status, CommError> {
        loop {
            if let Some(status) = self.iprobe(source, tag)? {
                return Ok(status);
            }
            self.spin();
        }
    }

    fn recv(&self, source: Rank, tag: u32) -> Result<(Vec<u8>, Status), CommError> {
        self.check_rank(source)?;
        loop {
            self.drain_channel(source)?;
            if let Some(payload) = self.take_stashed(source, tag) {
                let status = Status {
                    source,
                    tag,
                    len: payload.len(),
                };
                tracing::trace!(rank = self.rank, source, tag, len = status.len, "recv");
                return Ok((payload, status));
            }
            // Nothing stashed: block on the channel, stash whatever arrives
            // and re-check the tag.
            match self.receivers[source as usize].recv() {
                Ok(envelope) => self.stash.borrow_mut()[source as usize].push_back(envelope),
                Err(_) => return Err(CommError::Disconnected(source)),
            }
        }
    }

    fn all_to_all(
        &self,
        mut outgoing: HashMap<Rank, Vec<u8>>,
    ) -> Result<HashMap<Rank, Vec<u8>>, CommError> {
        let mut incoming = HashMap::new();
        for dest in 0..self.size {
            let bytes = outgoing.remove(&dest).unwrap_or_default();
            if dest == self.rank {
                if !bytes.is_empty() {
                    incoming.insert(dest, bytes);
                }
            } else {
                self.send(dest, TAG_ALL_TO_ALL, &bytes)?;
            }
        }
        for source in 0..self.size {
            if source == self.rank {
                continue;
            }
            let (bytes, _) = self.recv(source, TAG_ALL_TO_ALL)?;
            if !bytes.is_empty() {
                incoming.insert(source, bytes);
            }
        }
        Ok(incoming)
    }

    fn gather(&self, bytes: &[u8], root: Rank) -> Result<Vec<Vec<u8>>, CommError> {
        self.check_rank(root)?;
        if self.rank != root {
            self.send(root, TAG_GATHER, bytes)?;
            return Ok(Vec::new());
        }
        let mut gathered = Vec::with_capacity(self.size as usize);
        for source in 0..self.size {
            if source == self.rank {
                gathered.push(bytes.to_vec());
            } else {
                gathered.push(self.recv(source, TAG_GATHER)?.0);
            }
        }
        Ok(gathered)
    }

    fn all_gather(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, CommError> {
        for dest in 0..self.size {
            if dest != self.rank {
                self.send(dest, TAG_ALL_GATHER, bytes)?;
            }
        }
        let mut gathered = Vec::with_capacity(self.size as usize);
        for source in 0..self.size {
            if source == self.rank {
                gathered.push(bytes.to_vec());
            } else {
                gathered.push(self.recv(source, TAG_ALL_GATHER)?.0);
            }
        }
        Ok(gathered)
    }

    fn broadcast(&self, bytes: Vec<u8>, root: Rank) -> Result<Vec<u8>, CommError> {
        self.check_rank(root)?;
        if self.rank == root {
            for dest in 0..self.size {
                if dest != root {
                    self.send(dest, TAG_BCAST, &bytes)?;
                }
            }
            Ok(bytes)
        } else {
            Ok(self.recv(root, TAG_BCAST)?.0)
        }
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.barrier.wait();
        Ok(())
    }
}

/// Builder and runner for an in-process cluster of rank threads.
pub struct LocalCluster;

impl LocalCluster {
    /// Build the endpoints of a `size`-rank cluster.
    ///
    /// Mostly useful for tests that drive endpoints directly; simulations
    /// use [`run`](LocalCluster::run).
    pub fn endpoints(size: u32, config: ClusterConfig) -> Vec<LocalComm> {
        assert!(size > 0, "a cluster needs at least one rank");
        // senders[src][dst] sends from src to dst; receivers[dst][src] is
        // the matching endpoint.
        let mut senders: Vec<Vec<Sender<Envelope>>> = (0..size).map(|_| Vec::new()).collect();
        let mut receivers: Vec<Vec<Receiver<Envelope>>> = (0..size).map(|_| Vec::new()).collect();
        for source in 0..size {
            for dest in 0..size {
                let (tx, rx) = unbounded();
                senders[source as usize].push(tx);
                receivers[dest as usize].push(rx);
            }
        }
        let barrier = Arc::new(Barrier::new(size as usize));

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| LocalComm {
                rank: rank as Rank,
                size,
                senders,
                receivers,
                stash: RefCell::new((0..size).map(|_| VecDeque::new()).collect()),
                barrier: barrier.clone(),
                config: config.clone(),
            })
            .collect()
    }

    /// Run the same SPMD closure on `size` rank threads and collect the
    /// per-rank results, indexed by rank.
    ///
    /// A panic on any rank propagates and fails the run.
    pub fn run<F, R>(size: u32, f: F) -> Vec<R>
    where
        F: Fn(LocalComm) -> R + Send + Sync,
        R: Send,
    {
        Self::run_with_config(size, ClusterConfig::default(), f)
    }

    /// [`run`](LocalCluster::run) with explicit transport configuration.
    pub fn run_with_config<F, R>(size: u32, config: ClusterConfig, f: F) -> Vec<R>
    where
        F: Fn(LocalComm) -> R + Send + Sync,
        R: Send,
    {
        let endpoints = Self::endpoints(size, config);
        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairwise_fifo_per_tag() {
        LocalCluster::run(2, |comm| {
            if comm.rank() == 0 {
                comm.send(1, 1, b"first").unwrap();
                comm.send(1, 2, b"other tag").unwrap();
                comm.send(1, 1, b"second").unwrap();
            } else {
                // Same-tag messages arrive in send order even when another
                // tag interleaves.
                let (first, _) = comm.recv(0, 1).unwrap();
                let (second, _) = comm.recv(0, 1).unwrap();
                let (other, _) = comm.recv(0, 2).unwrap();
                assert_eq!(first, b"first");
                assert_eq!(second, b"second");
                assert_eq!(other, b"other tag");
            }
        });
    }

    #[test]
    fn test_iprobe_reports_without_consuming() {
        LocalCluster::run(2, |comm| {
            if comm.rank() == 0 {
                comm.send(1, 9, b"abc").unwrap();
            } else {
                let status = comm.probe(Some(0), 9).unwrap();
                assert_eq!(status.len, 3);
                // Probing again still sees the message.
                assert!(comm.iprobe(Some(0), 9).unwrap().is_some());
                let (bytes, _) = comm.recv(0, 9).unwrap();
                assert_eq!(bytes, b"abc");
                assert!(comm.iprobe(Some(0), 9).unwrap().is_none());
            }
        });
    }

    #[test]
    fn test_iprobe_any_source() {
        LocalCluster::run(3, |comm| {
            if comm.rank() == 1 {
                comm.send(0, 4, b"from 1").unwrap();
            }
            if comm.rank() == 0 {
                let status = comm.probe(None, 4).unwrap();
                assert_eq!(status.source, 1);
                let (bytes, _) = comm.recv(status.source, status.tag).unwrap();
                assert_eq!(bytes, b"from 1");
            }
            comm.barrier().unwrap();
        });
    }

    #[test]
    fn test_all_to_all_sparse() {
        LocalCluster::run(3, |comm| {
            let rank = comm.rank();
            let mut outgoing = HashMap::new();
            // Everyone sends one byte to the next rank only.
            outgoing.insert((rank + 1) % 3, vec![rank as u8]);
            let incoming = comm.all_to_all(outgoing).unwrap();

            let prev = (rank + 2) % 3;
            assert_eq!(incoming.len(), 1);
            assert_eq!(incoming[&prev], vec![prev as u8]);
        });
    }

    #[test]
    fn test_gather_and_all_gather() {
        LocalCluster::run(3, |comm| {
            let rank = comm.rank();
            let gathered = comm.gather(&[rank as u8], 0).unwrap();
            if rank == 0 {
                assert_eq!(gathered, vec![vec![0], vec![1], vec![2]]);
            } else {
                assert!(gathered.is_empty());
            }

            let everywhere = comm.all_gather(&[rank as u8]).unwrap();
            assert_eq!(everywhere, vec![vec![0], vec![1], vec![2]]);
        });
    }

    #[test]
    fn test_broadcast() {
        LocalCluster::run(3, |comm| {
            let bytes = if comm.rank() == 1 {
                b"seed".to_vec()
            } else {
                Vec::new()
            };
            let received = comm.broadcast(bytes, 1).unwrap();
            assert_eq!(received, b"seed");
        });
    }

    #[test]
    fn test_send_to_invalid_rank() {
        LocalCluster::run(1, |comm| {
            assert_eq!(
                comm.send(5, 0, b"x").unwrap_err(),
                CommError::InvalidRank(5)
            );
        });
    }

    #[test]
    fn test_self_send() {
        LocalCluster::run(1, |comm| {
            comm.send(0, 3, b"loop").unwrap();
            let (bytes, _) = comm.recv(0, 3).unwrap();
            assert_eq!(bytes, b"loop");
        });
    }

    #[test]
    fn test_issend_completes_on_consumption() {
        LocalCluster::run(2, |comm| {
            if comm.rank() == 0 {
                let mut request = comm.issend(1, 6, b"sync").unwrap();
                // Rank 1 has not received yet: it is blocked in the
                // barrier below.
                assert!(!comm.test(&mut request).unwrap());
                comm.barrier().unwrap();
                comm.wait(&mut request).unwrap();
            } else {
                comm.barrier().unwrap();
                let (bytes, _) = comm.recv(0, 6).unwrap();
                assert_eq!(bytes, b"sync");
            }
        });
    }
}
