use fxhash::{FxHashMap, FxHashSet};

use crate::libs::graph::AlignmentGraph;

/// Removes clusters whose sorted node set already appeared.
pub fn purge_duplicate_clusters(graph: &mut AlignmentGraph) {
    let mut seen: FxHashSet<Vec<usize>> = FxHashSet::default();
    let mut unique = Vec::new();
    for cluster in graph.clusters.drain(..) {
        let mut key = cluster.clone();
        key.sort_unstable();
        if seen.insert(key) {
            unique.push(cluster);
        }
    }
    graph.clusters = unique;
}

/// Resolves clustering violations: a cluster claiming two columns of the
/// same subalignment, or a column claimed by two clusters. Offending
/// nodes are evicted in ascending order of their internal support, the
/// edge weight to same-cluster nodes from other subalignments, so the
/// best-connected claimant wins. Clusters shrinking to a single node are
/// dropped.
pub fn purge_cluster_violations(graph: &mut AlignmentGraph) {
    // (cluster, subalignment) -> nodes the cluster claims there
    let mut redundant_cols: FxHashMap<(usize, usize), Vec<(usize, usize)>> = FxHashMap::default();
    // node -> clusters claiming it
    let mut redundant_rows: FxHashMap<usize, Vec<(usize, usize)>> = FxHashMap::default();
    let mut element_scores: FxHashMap<(usize, usize), i64> = FxHashMap::default();

    for (a, cluster) in graph.clusters.iter().enumerate() {
        for &b in cluster {
            let (bsub, _) = graph.sub_pos(b);
            redundant_cols.entry((a, bsub)).or_default().push((a, b));
            redundant_rows.entry(b).or_default().push((a, b));

            let mut score = 0;
            for &c in cluster {
                let (csub, _) = graph.sub_pos(c);
                if csub != bsub {
                    score += graph.weight(b, c);
                }
            }
            element_scores.insert((a, b), score);
        }
    }

    let mut ordered: Vec<(usize, usize)> = element_scores.keys().copied().collect();
    ordered.sort_unstable();
    ordered.sort_by_key(|key| element_scores[key]);

    for (a, b) in ordered {
        let (bsub, _) = graph.sub_pos(b);
        let col_conflict = redundant_cols[&(a, bsub)].len() > 1;
        let row_conflict = redundant_rows[&b].len() > 1;
        if col_conflict || row_conflict {
            if let Some(pos) = graph.clusters[a].iter().position(|&x| x == b) {
                graph.clusters[a].remove(pos);
            }
            if let Some(claims) = redundant_cols.get_mut(&(a, bsub)) {
                claims.retain(|&e| e != (a, b));
            }
            if let Some(claims) = redundant_rows.get_mut(&b) {
                claims.retain(|&e| e != (a, b));
            }
        }
    }

    graph.clusters.retain(|cluster| cluster.len() > 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_2x3() -> AlignmentGraph {
        AlignmentGraph::new(&[3, 3])
    }

    #[test]
    fn duplicates_are_purged_regardless_of_order() {
        let mut graph = graph_2x3();
        graph.clusters = vec![vec![0, 3], vec![3, 0], vec![1, 4]];
        purge_duplicate_clusters(&mut graph);
        assert_eq!(graph.clusters, vec![vec![0, 3], vec![1, 4]]);
    }

    #[test]
    fn weaker_claimant_loses_shared_column() {
        // nodes 0..3 are subalignment 0, nodes 3..6 are subalignment 1;
        // node 3 is claimed by both clusters, with more support in the first
        let mut graph = graph_2x3();
        graph.accumulate(0, 3, 10);
        graph.accumulate(3, 0, 10);
        graph.accumulate(1, 3, 2);
        graph.accumulate(3, 1, 2);
        graph.accumulate(1, 4, 6);
        graph.accumulate(4, 1, 6);

        graph.clusters = vec![vec![0, 3], vec![1, 3, 4]];
        purge_cluster_violations(&mut graph);
        assert_eq!(graph.clusters, vec![vec![0, 3], vec![1, 4]]);
    }

    #[test]
    fn double_claim_within_one_cluster_keeps_best() {
        // cluster holds two columns of subalignment 1; node 4 is better
        // supported than node 5
        let mut graph = graph_2x3();
        graph.accumulate(0, 4, 8);
        graph.accumulate(4, 0, 8);
        graph.accumulate(0, 5, 1);
        graph.accumulate(5, 0, 1);

        graph.clusters = vec![vec![0, 4, 5]];
        purge_cluster_violations(&mut graph);
        assert_eq!(graph.clusters, vec![vec![0, 4]]);
    }
}
