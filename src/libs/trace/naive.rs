use crate::libs::graph::AlignmentGraph;

/// Left-justified trace: position j of every subalignment lands in the
/// j-th cluster. The baseline every real trace method should beat.
pub fn naive_clustering(graph: &mut AlignmentGraph) {
    log::info!("Building a naive left-justified clustering..");
    let width = graph.subalignment_lengths.iter().copied().max().unwrap_or(0);

    let mut clusters = vec![Vec::new(); width];
    for sub in 0..graph.k() {
        for pos in 0..graph.subalignment_lengths[sub] {
            clusters[pos].push(graph.node(sub, pos));
        }
    }
    graph.clusters = clusters;
}

/// One singleton cluster per column, abandoning all homology joins.
pub fn atomized_clustering(graph: &mut AlignmentGraph) {
    log::info!("Building a fully atomized clustering..");
    graph.clusters = (0..graph.size()).map(|n| vec![n]).collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::trace::assert_complete_trace;

    #[test]
    fn naive_width_is_longest_subalignment() {
        let mut graph = AlignmentGraph::new(&[3, 5, 2]);
        naive_clustering(&mut graph);
        assert_eq!(graph.clusters.len(), 5);
        assert_eq!(graph.clusters[0].len(), 3);
        assert_eq!(graph.clusters[4].len(), 1);
        assert_complete_trace(&graph);
    }

    #[test]
    fn atomized_is_all_singletons() {
        let mut graph = AlignmentGraph::new(&[2, 2]);
        atomized_clustering(&mut graph);
        assert_eq!(graph.clusters.len(), 4);
        assert_complete_trace(&graph);
    }
}
