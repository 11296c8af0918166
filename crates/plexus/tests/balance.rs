//! Load-balancing boundary: the framework consumes partitions produced by
//! an external balancer.

use std::rc::Rc;

use plexus::analysis;
use plexus::balancing::{LoadBalancing, PartitionMap, PartitionMode};
use plexus::graph::GraphCore;
use plexus::prelude::*;

/// Test balancer: gathers every node's weight, spreads heavy nodes
/// round-robin over the ranks and leaves light nodes where they are.
/// Deterministic on every rank because it works from the same gathered
/// view.
struct SpreadHeavyBalancer;

impl LoadBalancing<i64> for SpreadHeavyBalancer {
    fn balance(&mut self, core: &GraphCore<i64>, _mode: PartitionMode) -> PartitionMap {
        let gather: TypedComm<Vec<(DistributedId, f32)>> = TypedComm::new(core.comm());
        let local: Vec<(DistributedId, f32)> = core
            .locations()
            .local_nodes()
            .iter()
            .map(|id| (*id, core.graph().node(*id).unwrap().weight()))
            .collect();
        let everyone = gather.all_gather(&local).unwrap();

        let mut partition = PartitionMap::new();
        let mut next_heavy_rank = 0;
        for (owner, nodes) in everyone.iter().enumerate() {
            for (id, weight) in nodes {
                if *weight > 2.0 {
                    partition.insert(*id, next_heavy_rank % core.size());
                    next_heavy_rank += 1;
                } else {
                    partition.insert(*id, owner as Rank);
                }
            }
        }
        partition
    }
}

fn complete_graph(graph: &mut DistributedGraph<i64>, nodes: u64, layer: LayerId) {
    let ids: Vec<_> = (0..nodes)
        .map(|i| graph.build_node(i as i64).unwrap())
        .collect();
    for source in 0..nodes as usize {
        for target in 0..nodes as usize {
            if source != target {
                graph.link(ids[source], ids[target], layer).unwrap();
            }
        }
    }
}

/// Two heavy nodes starting on the same rank end up on different ranks
/// after a balance, and the global edge count is unchanged.
#[test]
fn test_balance_spreads_heavy_nodes() {
    LocalCluster::run(2, |comm| {
        let rank = comm.rank();
        let comm: Rc<dyn Communicator> = Rc::new(comm);
        let mut graph: DistributedGraph<i64> = DistributedGraph::ghost(comm);

        if rank == 0 {
            complete_graph(&mut graph, 4, 0);
        }
        // Skewed start: rank 0 owns three nodes, two of them heavy.
        let partition: PartitionMap = [
            (DistributedId::new(0, 0), 0),
            (DistributedId::new(0, 1), 0),
            (DistributedId::new(0, 2), 0),
            (DistributedId::new(0, 3), 1),
        ]
        .into_iter()
        .collect();
        graph.distribute(partition).unwrap();

        if rank == 0 {
            graph.set_node_weight(DistributedId::new(0, 0), 3.0).unwrap();
            graph.set_node_weight(DistributedId::new(0, 2), 3.0).unwrap();
        }
        let edges_before = analysis::edge_count(&graph).unwrap();
        assert_eq!(edges_before, 12);

        graph.balance(&mut SpreadHeavyBalancer).unwrap();

        let heavy_here = graph
            .locations()
            .local_nodes()
            .iter()
            .filter(|id| graph.local_graph().node(**id).unwrap().weight() > 2.0)
            .count();
        assert_eq!(heavy_here, 1);

        assert_eq!(analysis::edge_count(&graph).unwrap(), edges_before);
        assert_eq!(analysis::node_count(&graph).unwrap(), 4);
    });
}
