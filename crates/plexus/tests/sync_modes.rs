//! Behavior of the three synchronization modes.

use std::collections::BTreeSet;
use std::rc::Rc;

use plexus::prelude::*;
use plexus::sync::hard::enums::Epoch;

fn node_id(origin: Rank, seq: u64) -> DistributedId {
    DistributedId::new(origin, seq)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Ghost-mode data refresh: a replica reads its placeholder before the
/// first barrier, the owner's value after it, and follows later updates.
#[test]
fn test_ghost_data_refresh() {
    LocalCluster::run(2, |comm| {
        let rank = comm.rank();
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<i64> = DistributedGraph::ghost(comm);

        let a = node_id(0, 0);
        if rank == 0 {
            graph.build_node(7).unwrap();
        } else {
            graph.insert_distant(Node::new_distant(a, 0, 1.0, 0)).unwrap();
            // Placeholder value until the first synchronization.
            assert_eq!(graph.read(a).unwrap(), 0);
        }

        graph.synchronize().unwrap();
        assert_eq!(graph.read(a).unwrap(), 7);

        if rank == 0 {
            graph.write(a, |data| *data = 9).unwrap();
        }
        graph.synchronize().unwrap();
        assert_eq!(graph.read(a).unwrap(), 9);
    });
}

/// Writes to a ghost are local and lost at the next synchronization.
#[test]
fn test_ghost_writes_are_overwritten() {
    LocalCluster::run(2, |comm| {
        let rank = comm.rank();
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<i64> = DistributedGraph::ghost(comm);

        let a = node_id(0, 0);
        if rank == 0 {
            graph.build_node(7).unwrap();
        } else {
            graph.insert_distant(Node::new_distant(a, 0, 1.0, 0)).unwrap();
        }
        graph.synchronize().unwrap();

        if rank == 1 {
            graph.write(a, |data| *data = 99).unwrap();
            assert_eq!(graph.read(a).unwrap(), 99);
        }
        graph.synchronize().unwrap();

        // The owner never saw the ghost write.
        assert_eq!(graph.read(a).unwrap(), 7);
    });
}

/// In no-sync mode, a distribution drops edges whose endpoints landed on
/// different processes, on both sides.
#[test]
fn test_no_sync_drops_cross_process_edges() {
    LocalCluster::run(2, |comm| {
        let rank = comm.rank();
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<i64> = DistributedGraph::unsynchronized(comm);

        if rank == 0 {
            let a = graph.build_node(1).unwrap();
            let b = graph.build_node(2).unwrap();
            graph.link(a, b, 0).unwrap();
        }
        let partition: PartitionMap = [(node_id(0, 0), 0), (node_id(0, 1), 1)]
            .into_iter()
            .collect();
        graph.distribute(partition).unwrap();

        assert_eq!(graph.locations().local_nodes().len(), 1);
        assert_eq!(graph.local_graph().edge_count(), 0);
        assert!(graph.locations().distant_nodes().is_empty());
    });
}

/// Hard-sync serialization: two remote writers increment the same node;
/// the owner observes both increments whatever the interleaving.
#[test]
fn test_hard_sync_serializes_remote_writers() {
    init_tracing();
    LocalCluster::run(3, |comm| {
        let rank = comm.rank();
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<i64> = DistributedGraph::hard(comm);

        let a = node_id(0, 0);
        if rank == 0 {
            graph.build_node(0).unwrap();
        } else {
            graph.insert_distant(Node::new_distant(a, 0, 1.0, 0)).unwrap();
            let value = graph.acquire(a).unwrap();
            graph.release_acquire(a, value + 1).unwrap();
        }
        graph.synchronize().unwrap();

        if rank == 0 {
            assert_eq!(graph.read(a).unwrap(), 2);
        }
        // Both termination rounds completed: epoch back to even, no
        // outstanding send anywhere.
        assert_eq!(graph.sync_epoch(), Some(Epoch::Even));
        assert_eq!(graph.sync_pending_sends(), 0);
    });
}

/// Hard-sync reads always observe the owner's current value.
#[test]
fn test_hard_sync_read_is_fresh() {
    LocalCluster::run(2, |comm| {
        let rank = comm.rank();
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<i64> = DistributedGraph::hard(comm);

        let a = node_id(0, 0);
        if rank == 0 {
            graph.build_node(41).unwrap();
            // Stay responsive while rank 1 reads, then join the barrier.
            graph.synchronize().unwrap();
        } else {
            graph.insert_distant(Node::new_distant(a, 0, 1.0, 0)).unwrap();
            let value = graph.read(a).unwrap();
            assert_eq!(value, 41);
            graph.synchronize().unwrap();
        }
    });
}

/// Hard-sync on-the-fly link: the edge appears on the owner of the remote
/// endpoint before the barrier returns.
#[test]
fn test_hard_sync_link_commits_on_the_fly() {
    LocalCluster::run(2, |comm| {
        let rank = comm.rank();
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<i64> = DistributedGraph::hard(comm);

        let a = node_id(0, 0);
        let b = node_id(1, 0);
        if rank == 0 {
            graph.build_node(1).unwrap();
            graph.insert_distant(Node::new_distant(b, 0, 1.0, 1)).unwrap();
            graph.link(a, b, 2).unwrap();
        } else {
            graph.build_node(2).unwrap();
        }
        graph.synchronize().unwrap();

        let edge = DistributedId::new(0, 0);
        let held = graph.local_graph().edge(edge).unwrap();
        assert_eq!(held.source(), a);
        assert_eq!(held.target(), b);
        assert_eq!(held.layer(), 2);
        assert_eq!(held.state(), LocationState::Distant);
        if rank == 1 {
            // The link import instantiated a replica of the source.
            assert!(graph.locations().distant_nodes().contains(&a));
        }
    });
}

/// Termination under a burst of cross-process acquires: a single data-sync
/// barrier completes, toggles the epoch everywhere and leaves no
/// outstanding send.
#[test]
fn test_termination_under_burst() {
    init_tracing();
    const P: u32 = 4;
    LocalCluster::run(P, |comm| {
        let rank = comm.rank();
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<i64> = DistributedGraph::hard(comm);

        let a = node_id(0, 0);
        if rank == 0 {
            graph.build_node(0).unwrap();
        } else {
            graph.insert_distant(Node::new_distant(a, 0, 1.0, 0)).unwrap();
            for _ in 0..5 {
                let value = graph.acquire(a).unwrap();
                graph.release_acquire(a, value + 1).unwrap();
            }
        }

        // One termination round only.
        graph.synchronize_partial(&BTreeSet::new(), false).unwrap();
        assert_eq!(graph.sync_epoch(), Some(Epoch::Odd));
        assert_eq!(graph.sync_pending_sends(), 0);

        if rank == 0 {
            assert_eq!(graph.read(a).unwrap(), 15);
        }

        // The servers stay live for the next round.
        graph.synchronize_partial(&BTreeSet::new(), false).unwrap();
        assert_eq!(graph.sync_epoch(), Some(Epoch::Even));
    });
}

/// Hard-sync removal of a distant node propagates to the owner and back.
#[test]
fn test_hard_sync_remove_distant_node() {
    LocalCluster::run(2, |comm| {
        let rank = comm.rank();
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<i64> = DistributedGraph::hard(comm);

        let a = node_id(0, 0);
        if rank == 0 {
            graph.build_node(3).unwrap();
            graph.synchronize().unwrap();
        } else {
            graph.insert_distant(Node::new_distant(a, 0, 1.0, 0)).unwrap();
            graph.remove_node(a).unwrap();
            graph.synchronize().unwrap();
        }

        if rank == 0 {
            assert!(!graph.local_graph().contains_node(a));
            assert!(graph.locations().local_nodes().is_empty());
        }
    });
}
