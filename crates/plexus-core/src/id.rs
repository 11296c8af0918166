//! Distributed identifiers.
//!
//! Every node and edge of the distributed graph is identified by a
//! [`DistributedId`]: an `(origin rank, sequence)` pair. Each process mints
//! sequences only for its own rank, which makes the pair globally unique
//! without any cross-process coordination. The id is stable for the whole
//! life of the object it identifies, even when the object migrates to
//! another process.

use serde::{Deserialize, Serialize};

/// Rank of a process inside the cluster.
pub type Rank = u32;

/// Identifier of a graph layer.
///
/// Layers partition the edges of a node into independent ordered adjacency
/// lists, so that distinct relation kinds can coexist in one graph.
pub type LayerId = i32;

/// Globally unique identifier minted by a single origin process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DistributedId {
    origin: Rank,
    seq: u64,
}

impl DistributedId {
    /// Create an identifier from its raw parts.
    pub fn new(origin: Rank, seq: u64) -> Self {
        Self { origin, seq }
    }

    /// The rank of the process that minted this id.
    pub fn origin(&self) -> Rank {
        self.origin
    }

    /// The per-origin sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl std::fmt::Display for DistributedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.origin, self.seq)
    }
}

/// Mints consecutive [`DistributedId`]s for a single origin rank.
///
/// The cursor can be read and repositioned, which graph builders use for
/// deterministic id allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdProvider {
    origin: Rank,
    next: u64,
}

impl IdProvider {
    /// Create a provider minting ids for `origin`, starting at sequence 0.
    pub fn new(origin: Rank) -> Self {
        Self { origin, next: 0 }
    }

    /// The origin rank of every id this provider mints.
    pub fn origin(&self) -> Rank {
        self.origin
    }

    /// Mint the next id.
    pub fn mint(&mut self) -> DistributedId {
        let id = DistributedId::new(self.origin, self.next);
        self.next += 1;
        id
    }

    /// The sequence number the next [`mint`](Self::mint) call will use.
    pub fn cursor(&self) -> u64 {
        self.next
    }

    /// Reposition the cursor.
    pub fn set_cursor(&mut self, seq: u64) {
        self.next = seq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_ordering() {
        let a = DistributedId::new(0, 5);
        let b = DistributedId::new(1, 0);
        let c = DistributedId::new(1, 3);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a, DistributedId::new(0, 5));
    }

    #[test]
    fn test_id_display() {
        assert_eq!(format!("{}", DistributedId::new(2, 17)), "2:17");
    }

    #[test]
    fn test_provider_mints_consecutive_ids() {
        let mut ids = IdProvider::new(3);
        assert_eq!(ids.mint(), DistributedId::new(3, 0));
        assert_eq!(ids.mint(), DistributedId::new(3, 1));
        assert_eq!(ids.cursor(), 2);
    }

    #[test]
    fn test_provider_cursor_reposition() {
        let mut ids = IdProvider::new(0);
        ids.set_cursor(100);
        assert_eq!(ids.mint(), DistributedId::new(0, 100));
    }

    #[test]
    fn test_providers_on_distinct_ranks_never_collide() {
        let mut p0 = IdProvider::new(0);
        let mut p1 = IdProvider::new(1);
        for _ in 0..10 {
            assert_ne!(p0.mint(), p1.mint());
        }
    }
}
