//! Typed layer over a [`Communicator`].
//!
//! A [`TypedComm<T>`] sends and receives values of one serde-serializable
//! type through the binary wire codec. The sparse typed
//! [`exchange`](TypedComm::exchange) is the workhorse of the location
//! manager and of every migration pass. A decode failure on the receive
//! side invalidates global state and is reported as a fatal
//! [`CommError::Malformed`].

use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

use plexus_core::codec::{BinaryCodec, Codec};
use plexus_core::error::CommError;
use plexus_core::id::Rank;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Communicator, SendRequest, Status};

/// Typed point-to-point and collective messaging for one payload type.
pub struct TypedComm<T> {
    comm: Rc<dyn Communicator>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedComm<T> {
    fn clone(&self) -> Self {
        Self {
            comm: self.comm.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> TypedComm<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(comm: Rc<dyn Communicator>) -> Self {
        Self {
            comm,
            _payload: PhantomData,
        }
    }

    pub fn rank(&self) -> Rank {
        self.comm.rank()
    }

    pub fn size(&self) -> u32 {
        self.comm.size()
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, CommError> {
        BinaryCodec.encode(value).map_err(|e| CommError::Malformed {
            peer: self.comm.rank(),
            tag: 0,
            reason: e.to_string(),
        })
    }

    fn decode<U: DeserializeOwned>(
        &self,
        bytes: &[u8],
        source: Rank,
        tag: u32,
    ) -> Result<U, CommError> {
        BinaryCodec.decode(bytes).map_err(|e| CommError::Malformed {
            peer: source,
            tag,
            reason: e.to_string(),
        })
    }

    /// Blocking typed send.
    pub fn send(&self, value: &T, dest: Rank, tag: u32) -> Result<(), CommError> {
        let bytes = self.encode(value)?;
        self.comm.send(dest, tag, &bytes)
    }

    /// Non-blocking typed send.
    pub fn issend(&self, value: &T, dest: Rank, tag: u32) -> Result<SendRequest, CommError> {
        let bytes = self.encode(value)?;
        self.comm.issend(dest, tag, &bytes)
    }

    /// Blocking typed receive.
    pub fn recv(&self, source: Rank, tag: u32) -> Result<(T, Status), CommError> {
        let (bytes, status) = self.comm.recv(source, tag)?;
        Ok((self.decode(&bytes, status.source, status.tag)?, status))
    }

    /// Sparse typed all-to-all: send each rank its list of values, receive
    /// the symmetric map. Ranks absent from the result sent nothing.
    pub fn exchange(
        &self,
        outgoing: HashMap<Rank, Vec<T>>,
    ) -> Result<HashMap<Rank, Vec<T>>, CommError> {
        let mut encoded = HashMap::with_capacity(outgoing.len());
        for (rank, values) in &outgoing {
            encoded.insert(
                *rank,
                BinaryCodec.encode(values).map_err(|e| CommError::Malformed {
                    peer: self.comm.rank(),
                    tag: 0,
                    reason: e.to_string(),
                })?,
            );
        }
        let incoming = self.comm.all_to_all(encoded)?;
        let mut decoded = HashMap::with_capacity(incoming.len());
        for (rank, bytes) in incoming {
            decoded.insert(rank, self.decode::<Vec<T>>(&bytes, rank, 0)?);
        }
        Ok(decoded)
    }

    /// Typed gather at `root`; non-root ranks get an empty vector.
    pub fn gather(&self, value: &T, root: Rank) -> Result<Vec<T>, CommError> {
        let bytes = self.encode(value)?;
        let gathered = self.comm.gather(&bytes, root)?;
        gathered
            .iter()
            .enumerate()
            .map(|(rank, bytes)| self.decode(bytes, rank as Rank, 0))
            .collect()
    }

    /// Typed all-gather, indexed by rank.
    pub fn all_gather(&self, value: &T) -> Result<Vec<T>, CommError> {
        let bytes = self.encode(value)?;
        let gathered = self.comm.all_gather(&bytes)?;
        gathered
            .iter()
            .enumerate()
            .map(|(rank, bytes)| self.decode(bytes, rank as Rank, 0))
            .collect()
    }

    /// Typed broadcast. Only the root's `value` is consulted.
    pub fn broadcast(&self, value: Option<&T>, root: Rank) -> Result<T, CommError> {
        let bytes = if self.comm.rank() == root {
            let value = value.ok_or(CommError::Malformed {
                peer: root,
                tag: 0,
                reason: "broadcast root provided no value".into(),
            })?;
            self.encode(value)?
        } else {
            Vec::new()
        };
        let received = self.comm.broadcast(bytes, root)?;
        self.decode(&received, root, 0)
    }
}

/// Reduce a per-rank value to one global value visible on every rank,
/// layered on an all-gather plus a local fold.
pub fn all_reduce<T, F>(typed: &TypedComm<T>, local: T, fold: F) -> Result<T, CommError>
where
    T: Serialize + DeserializeOwned,
    F: Fn(T, T) -> T,
{
    let mut gathered = typed.all_gather(&local)?.into_iter();
    match gathered.next() {
        Some(first) => Ok(gathered.fold(first, fold)),
        None => Ok(local),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalCluster;
    use plexus_core::id::DistributedId;

    #[test]
    fn test_typed_roundtrip() {
        LocalCluster::run(2, |comm| {
            let comm: Rc<dyn Communicator> = Rc::new(comm);
            let typed: TypedComm<DistributedId> = TypedComm::new(comm.clone());
            if comm.rank() == 0 {
                typed.send(&DistributedId::new(0, 42), 1, 5).unwrap();
            } else {
                let (id, status) = typed.recv(0, 5).unwrap();
                assert_eq!(id, DistributedId::new(0, 42));
                assert_eq!(status.source, 0);
            }
        });
    }

    #[test]
    fn test_exchange() {
        LocalCluster::run(3, |comm| {
            let rank = comm.rank();
            let comm: Rc<dyn Communicator> = Rc::new(comm);
            let typed: TypedComm<u64> = TypedComm::new(comm);

            // Each rank sends `rank * 10 + dest` to every other rank.
            let mut outgoing: HashMap<Rank, Vec<u64>> = HashMap::new();
            for dest in 0..3 {
                if dest != rank {
                    outgoing.insert(dest, vec![(rank * 10 + dest) as u64]);
                }
            }
            let incoming = typed.exchange(outgoing).unwrap();

            assert_eq!(incoming.len(), 2);
            for (source, values) in incoming {
                assert_eq!(values, vec![(source * 10 + rank) as u64]);
            }
        });
    }

    #[test]
    fn test_all_reduce_sum() {
        let totals = LocalCluster::run(4, |comm| {
            let rank = comm.rank();
            let comm: Rc<dyn Communicator> = Rc::new(comm);
            let typed: TypedComm<u64> = TypedComm::new(comm);
            all_reduce(&typed, rank as u64, |a, b| a + b).unwrap()
        });
        assert_eq!(totals, vec![6, 6, 6, 6]);
    }

    #[test]
    fn test_typed_broadcast() {
        LocalCluster::run(3, |comm| {
            let rank = comm.rank();
            let comm: Rc<dyn Communicator> = Rc::new(comm);
            let typed: TypedComm<String> = TypedComm::new(comm);
            let value = (rank == 2).then(|| "from root".to_string());
            let received = typed.broadcast(value.as_ref(), 2).unwrap();
            assert_eq!(received, "from root");
        });
    }
}
