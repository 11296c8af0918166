//! Distribution and lifecycle scenarios over an in-process cluster.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use plexus::analysis;
use plexus::prelude::*;

fn node_id(origin: Rank, seq: u64) -> DistributedId {
    DistributedId::new(origin, seq)
}

/// Ring of size P: built on rank 0, distributed one node per rank. Each
/// rank ends with one local node, one outgoing and one incoming distant
/// edge.
#[test]
fn test_ring_distribution() {
    const P: u32 = 4;
    LocalCluster::run(P, |comm| {
        let rank = comm.rank();
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<u64> = DistributedGraph::ghost(comm);

        if rank == 0 {
            let nodes: Vec<_> = (0..P as u64)
                .map(|i| graph.build_node(i).unwrap())
                .collect();
            for i in 0..P as usize {
                graph.link(nodes[i], nodes[(i + 1) % P as usize], 0).unwrap();
            }
        }
        let partition: PartitionMap = (0..P as u64)
            .map(|i| (node_id(0, i), i as Rank))
            .collect();
        graph.distribute(partition).unwrap();

        // One local node per rank, the one assigned to it.
        let local: Vec<_> = graph.locations().local_nodes().iter().copied().collect();
        assert_eq!(local, vec![node_id(0, rank as u64)]);
        assert_eq!(graph.read(local[0]).unwrap(), rank as u64);

        // One outgoing and one incoming edge, both distant.
        let node = graph.local_graph().node(local[0]).unwrap();
        assert_eq!(node.outgoing(0).len(), 1);
        assert_eq!(node.incoming(0).len(), 1);
        for edge in graph.local_graph().edges() {
            assert_eq!(edge.state(), LocationState::Distant);
        }
        assert_eq!(graph.local_graph().edge_count(), 2);
        assert_eq!(graph.locations().distant_nodes().len(), 2);

        // Every distant replica points at its actual owner.
        for id in graph.locations().distant_nodes() {
            assert_eq!(
                graph.local_graph().node(*id).unwrap().location(),
                id.seq() as Rank
            );
        }

        assert_eq!(analysis::node_count(&graph).unwrap(), P as usize);
        assert_eq!(analysis::edge_count(&graph).unwrap(), P as usize);
    });
}

/// Distributing a partition then its inverse restores the initial
/// ownership.
#[test]
fn test_distribute_inverse_restores_ownership() {
    LocalCluster::run(2, |comm| {
        let rank = comm.rank();
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<u64> = DistributedGraph::ghost(comm);

        if rank == 0 {
            let a = graph.build_node(10).unwrap();
            let b = graph.build_node(20).unwrap();
            graph.link(a, b, 0).unwrap();
        }
        let a = node_id(0, 0);
        let b = node_id(0, 1);

        graph
            .distribute([(a, 0), (b, 1)].into_iter().collect())
            .unwrap();
        if rank == 0 {
            assert_eq!(
                graph.locations().local_nodes().iter().copied().collect::<Vec<_>>(),
                vec![a]
            );
        } else {
            assert_eq!(
                graph.locations().local_nodes().iter().copied().collect::<Vec<_>>(),
                vec![b]
            );
        }

        graph
            .distribute([(a, 0), (b, 0)].into_iter().collect())
            .unwrap();
        if rank == 0 {
            assert_eq!(graph.locations().local_nodes().len(), 2);
            assert_eq!(graph.read(a).unwrap(), 10);
            assert_eq!(graph.read(b).unwrap(), 20);
            let edge = graph.local_graph().edge(DistributedId::new(0, 0)).unwrap();
            assert_eq!(edge.state(), LocationState::Local);
        } else {
            assert_eq!(graph.local_graph().node_count(), 0);
            assert_eq!(graph.local_graph().edge_count(), 0);
        }
    });
}

/// Both holders of a cross-process edge unlink it in the same round: the
/// duplicate unlink arrival is silently ignored.
#[test]
fn test_concurrent_unlink_is_idempotent() {
    LocalCluster::run(2, |comm| {
        let rank = comm.rank();
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<u64> = DistributedGraph::ghost(comm);

        let a = node_id(0, 0);
        let b = node_id(1, 0);
        if rank == 0 {
            graph.build_node(1).unwrap();
            graph.insert_distant(Node::new_distant(b, 0, 1.0, 1)).unwrap();
            graph.link(a, b, 0).unwrap();
        } else {
            graph.build_node(2).unwrap();
        }
        graph.synchronize().unwrap();

        let edge = DistributedId::new(0, 0);
        assert!(graph.local_graph().contains_edge(edge));

        // Both sides unlink the same edge before the barrier.
        graph.unlink(edge).unwrap();
        graph.synchronize().unwrap();

        assert!(!graph.local_graph().contains_edge(edge));
        // The orphaned replicas went away with the edge.
        assert!(graph.locations().distant_nodes().is_empty());
        assert_eq!(graph.locations().local_nodes().len(), 1);
    });
}

/// Ghost-mode removal of a distant node: the owner tears it down at the
/// barrier and the fallout unlinks reach every holder.
#[test]
fn test_remove_distant_node() {
    LocalCluster::run(2, |comm| {
        let rank = comm.rank();
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<u64> = DistributedGraph::ghost(comm);

        let a = node_id(0, 0);
        if rank == 0 {
            graph.build_node(7).unwrap();
        } else {
            graph.insert_distant(Node::new_distant(a, 0, 1.0, 0)).unwrap();
            let b = graph.build_node(8).unwrap();
            graph.link(b, a, 0).unwrap();
        }
        graph.synchronize().unwrap();
        if rank == 0 {
            // The committed link created a replica of b here.
            assert_eq!(graph.locations().distant_nodes().len(), 1);
        }

        if rank == 1 {
            graph.remove_node(a).unwrap();
        }
        graph.synchronize().unwrap();

        assert!(!graph.local_graph().contains_node(a));
        assert_eq!(graph.local_graph().edge_count(), 0);
        if rank == 1 {
            assert_eq!(graph.locations().local_nodes().len(), 1);
        } else {
            assert_eq!(graph.locations().local_nodes().len(), 0);
        }
    });
}

/// Lifecycle callbacks observe the documented contexts during build and
/// distribution.
#[test]
fn test_set_local_and_set_distant_contexts() {
    LocalCluster::run(2, |comm| {
        let rank = comm.rank();
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<u64> = DistributedGraph::ghost(comm);

        let local_events: Rc<RefCell<Vec<(DistributedId, SetLocalContext)>>> = Rc::default();
        let distant_events: Rc<RefCell<Vec<(DistributedId, SetDistantContext)>>> = Rc::default();
        let (locals, distants) = (local_events.clone(), distant_events.clone());
        graph.add_on_set_local(move |node, context| {
            locals.borrow_mut().push((node.id(), context));
        });
        graph.add_on_set_distant(move |node, context| {
            distants.borrow_mut().push((node.id(), context));
        });

        if rank == 0 {
            let a = graph.build_node(1).unwrap();
            let b = graph.build_node(2).unwrap();
            graph.link(a, b, 0).unwrap();
        }
        let a = node_id(0, 0);
        let b = node_id(0, 1);
        graph
            .distribute([(a, 0), (b, 1)].into_iter().collect())
            .unwrap();

        if rank == 0 {
            let locals = local_events.borrow();
            assert!(locals.contains(&(a, SetLocalContext::BuildLocal)));
            assert!(locals.contains(&(b, SetLocalContext::BuildLocal)));
            let distants = distant_events.borrow();
            assert!(distants.contains(&(b, SetDistantContext::ExportDistant)));
        } else {
            let locals = local_events.borrow();
            assert!(locals.contains(&(b, SetLocalContext::ImportNewLocal)));
            let distants = distant_events.borrow();
            assert!(distants.contains(&(a, SetDistantContext::ImportNewDistant)));
        }
    });
}

/// `switch_layer` moves local edges and refuses distant ones.
#[test]
fn test_switch_layer() {
    LocalCluster::run(1, |comm| {
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<u64> = DistributedGraph::ghost(comm);

        let a = graph.build_node(1).unwrap();
        let b = graph.build_node(2).unwrap();
        let local_edge = graph.link(a, b, 0).unwrap();
        graph.switch_layer(local_edge, 3).unwrap();
        assert_eq!(graph.local_graph().edge(local_edge).unwrap().layer(), 3);
        assert_eq!(graph.local_graph().node(a).unwrap().outgoing(3).len(), 1);

        // A distant edge cannot switch layers.
        let ghost = graph
            .insert_distant(Node::new_distant(node_id(0, 99), 0, 1.0, 0))
            .unwrap();
        let distant_edge = graph.link(a, ghost, 0).unwrap();
        assert!(matches!(
            graph.switch_layer(distant_edge, 5),
            Err(PlexusError::Graph(GraphError::EdgeNotLocal(_)))
        ));
    });
}

/// After a synchronize, the unsynchronized-node buffer is empty; a partial
/// synchronize only clears the synced subset.
#[test]
fn test_unsynchronized_nodes_buffer() {
    LocalCluster::run(2, |comm| {
        let rank = comm.rank();
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<u64> = DistributedGraph::ghost(comm);

        let a = node_id(0, 0);
        let b = node_id(0, 1);
        if rank == 0 {
            graph.build_node(5).unwrap();
            graph.build_node(6).unwrap();
        } else {
            graph.insert_distant(Node::new_distant(a, 0, 1.0, 0)).unwrap();
            graph.insert_distant(Node::new_distant(b, 0, 1.0, 0)).unwrap();
            assert_eq!(graph.unsynchronized_nodes().len(), 2);
        }

        let subset: BTreeSet<_> = [a].into_iter().collect();
        graph.synchronize_partial(&subset, true).unwrap();
        if rank == 1 {
            assert_eq!(graph.read(a).unwrap(), 5);
            // `b` was not refreshed and is still pending.
            assert_eq!(graph.read(b).unwrap(), 0);
            assert!(graph.unsynchronized_nodes().contains(&b));
            assert!(!graph.unsynchronized_nodes().contains(&a));
        }

        graph.synchronize().unwrap();
        assert!(graph.unsynchronized_nodes().is_empty());
        if rank == 1 {
            assert_eq!(graph.read(b).unwrap(), 6);
        }
    });
}
