use fxhash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use crate::libs::graph::AlignmentGraph;

/// Region-growing clustering in the manner of Kruskal's algorithm:
/// every column starts as its own cluster and the heaviest edges merge
/// clusters first. With `enforce_trace` the merge is refused whenever it
/// would put two clusters on both sides of each other in some
/// subalignment, so the result stays orderable.
pub fn rg_cluster(
    graph: &AlignmentGraph,
    lower_bound: &[usize],
    upper_bound: &[usize],
    enforce_trace: bool,
) -> Vec<Vec<usize>> {
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    // cluster -> sub -> highest node id it holds there
    let mut cluster_pos: FxHashMap<usize, FxHashMap<usize, usize>> = FxHashMap::default();
    // cluster -> sub -> (previous, next) cluster along that subalignment
    let mut cluster_pointers: FxHashMap<usize, FxHashMap<usize, (Option<usize>, Option<usize>)>> =
        FxHashMap::default();
    let mut node_clusters: FxHashMap<usize, usize> = FxHashMap::default();
    let mut weight_map: Vec<FxHashMap<usize, i64>> = Vec::new();
    let mut absorbed: FxHashSet<usize> = FxHashSet::default();
    let mut cant_connects: FxHashSet<(usize, usize)> = FxHashSet::default();

    for (s, (&lower, &upper)) in lower_bound.iter().zip(upper_bound).enumerate() {
        for a in lower..upper {
            clusters.push(vec![a]);
            let idx = clusters.len() - 1;
            node_clusters.insert(a, idx);
            weight_map.push(FxHashMap::default());
            cluster_pos.insert(idx, [(s, a)].into_iter().collect());
            // initial cluster ids coincide with node ids
            let prev = if idx > lower { Some(idx - 1) } else { None };
            let next = if idx < upper - 1 { Some(idx + 1) } else { None };
            cluster_pointers.insert(idx, [(s, (prev, next))].into_iter().collect());
        }
    }

    let mut heap = build_heap(
        graph,
        &node_clusters,
        &mut weight_map,
        lower_bound,
        upper_bound,
    );
    log::info!("Built a heap of size {}..", heap.len());

    while let Some((_value, Reverse(a), Reverse(b))) = heap.pop() {
        let (i, j) = (node_clusters[&a], node_clusters[&b]);
        let pair = order_pair(i, j);
        if i == j || cant_connects.contains(&pair) {
            continue;
        }

        if !check_connect(graph, i, j, &clusters, &cluster_pos, enforce_trace) {
            cant_connects.insert(pair);
            continue;
        }

        absorbed.insert(j);
        let absorbed_nodes = std::mem::take(&mut clusters[j]);
        for &e in &absorbed_nodes {
            node_clusters.insert(e, i);
            clusters[i].push(e);
            let (esub, _) = graph.sub_pos(e);
            cluster_pos.entry(i).or_default().insert(esub, e);
        }

        if enforce_trace {
            let j_pointers: Vec<(usize, (Option<usize>, Option<usize>))> = cluster_pointers
                .get(&j)
                .map(|m| m.iter().map(|(&s, &p)| (s, p)).collect())
                .unwrap_or_default();
            for (s, (prev, next)) in j_pointers {
                if let Some(prev) = prev {
                    if let Some(entry) = cluster_pointers.get_mut(&prev).and_then(|m| m.get_mut(&s))
                    {
                        entry.1 = Some(i);
                    }
                }
                if let Some(next) = next {
                    if let Some(entry) = cluster_pointers.get_mut(&next).and_then(|m| m.get_mut(&s))
                    {
                        entry.0 = Some(i);
                    }
                }
                cluster_pointers.entry(i).or_default().insert(s, (prev, next));
            }

            update_merge_pointers(graph, i, &cluster_pointers, &clusters, &mut cluster_pos);
        }

        let j_weights: Vec<(usize, i64)> = weight_map[j].iter().map(|(&n, &w)| (n, w)).collect();
        for (n, w) in j_weights {
            if absorbed.contains(&n) {
                continue;
            }
            let merged = weight_map[i].get(&n).copied().unwrap_or(0) + w;
            weight_map[i].insert(n, merged);
            weight_map[n].insert(i, merged);
            heap.push((merged, Reverse(clusters[i][0]), Reverse(clusters[n][0])));
        }
    }

    let mut result: Vec<Vec<usize>> = if enforce_trace {
        order_clusters(graph, &clusters, &node_clusters, lower_bound, upper_bound)
    } else {
        clusters.into_iter().filter(|c| !c.is_empty()).collect()
    };
    for cluster in result.iter_mut() {
        cluster.sort_unstable();
    }

    result
}

fn build_heap(
    graph: &AlignmentGraph,
    node_clusters: &FxHashMap<usize, usize>,
    weight_map: &mut [FxHashMap<usize, i64>],
    lower_bound: &[usize],
    upper_bound: &[usize],
) -> BinaryHeap<(i64, Reverse<usize>, Reverse<usize>)> {
    let mut heap = BinaryHeap::new();
    for (&lower, &upper) in lower_bound.iter().zip(upper_bound) {
        for a in lower..upper {
            let (asub, _) = graph.sub_pos(a);
            let i = node_clusters[&a];
            for (&b, &value) in &graph.matrix[a] {
                let (bsub, _) = graph.sub_pos(b);
                if b <= a || asub == bsub || b < lower_bound[bsub] || b >= upper_bound[bsub] {
                    continue;
                }
                let j = node_clusters[&b];
                weight_map[j].insert(i, value);
                weight_map[i].insert(j, value);
                heap.push((value, Reverse(a), Reverse(b)));
            }
        }
    }

    heap
}

/// A merge is legal when the clusters share no subalignment and, for a
/// trace, neither sits at or before the other in any subalignment they
/// jointly span.
fn check_connect(
    graph: &AlignmentGraph,
    i: usize,
    j: usize,
    clusters: &[Vec<usize>],
    cluster_pos: &FxHashMap<usize, FxHashMap<usize, usize>>,
    enforce_trace: bool,
) -> bool {
    let ci: FxHashSet<usize> = clusters[i].iter().map(|&a| graph.sub_pos(a).0).collect();
    let cj: FxHashSet<usize> = clusters[j].iter().map(|&a| graph.sub_pos(a).0).collect();
    if ci.iter().any(|s| cj.contains(s)) {
        return false;
    }
    if !enforce_trace {
        return true;
    }

    for s in &ci {
        if let Some(&pj) = cluster_pos[&j].get(s) {
            if pj <= cluster_pos[&i][s] {
                return false;
            }
        }
    }
    for s in &cj {
        if let Some(&pi) = cluster_pos[&i].get(s) {
            if pi <= cluster_pos[&j][s] {
                return false;
            }
        }
    }

    true
}

/// After merging into cluster `i`, pushes its new positions backwards
/// through the cluster order so every predecessor knows the furthest
/// position it must stay behind.
fn update_merge_pointers(
    graph: &AlignmentGraph,
    i: usize,
    cluster_pointers: &FxHashMap<usize, FxHashMap<usize, (Option<usize>, Option<usize>)>>,
    clusters: &[Vec<usize>],
    cluster_pos: &mut FxHashMap<usize, FxHashMap<usize, usize>>,
) {
    let subsets: Vec<usize> = clusters[i].iter().map(|&a| graph.sub_pos(a).0).collect();

    for s in subsets {
        let target = cluster_pos[&i][&s];
        let mut queue = VecDeque::from([i]);
        let mut visited: FxHashSet<usize> = FxHashSet::default();
        visited.insert(i);

        while let Some(cur) = queue.pop_front() {
            let known = cluster_pos[&cur].get(&s).copied();
            if cur == i || known.is_none() || known.is_some_and(|p| p > target) {
                cluster_pos.entry(cur).or_default().insert(s, target);

                if let Some(pointers) = cluster_pointers.get(&cur) {
                    for (_, &(prev, _)) in pointers.iter() {
                        if let Some(prev) = prev {
                            if visited.insert(prev) {
                                queue.push_back(prev);
                            }
                        }
                    }
                }
            }
        }
    }
}

fn order_clusters(
    graph: &AlignmentGraph,
    clusters: &[Vec<usize>],
    node_clusters: &FxHashMap<usize, usize>,
    lower_bound: &[usize],
    upper_bound: &[usize],
) -> Vec<Vec<usize>> {
    let mut ordered = Vec::new();
    let mut frontier = lower_bound.to_vec();

    loop {
        let mut found_good = false;
        for j in 0..lower_bound.len() {
            let idx = frontier[j];
            if idx >= upper_bound[j] {
                continue;
            }
            let i = node_clusters[&idx];
            let good = clusters[i].iter().all(|&b| {
                let (bsub, _) = graph.sub_pos(b);
                b <= frontier[bsub]
            });
            if good {
                ordered.push(clusters[i].clone());
                for &b in &clusters[i] {
                    let (bsub, _) = graph.sub_pos(b);
                    frontier[bsub] = b + 1;
                }
                found_good = true;
                break;
            }
        }
        if !found_good {
            break;
        }
    }

    ordered
}

fn order_pair(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::trace::assert_complete_trace;

    #[test]
    fn heavier_edge_wins_a_crossing() {
        let mut graph = AlignmentGraph::new(&[2, 2]);
        graph.accumulate(0, 3, 5);
        graph.accumulate(3, 0, 5);
        graph.accumulate(1, 2, 1);
        graph.accumulate(2, 1, 1);

        let (lower, upper) = (graph.lower_bound(), graph.upper_bound());
        graph.clusters = rg_cluster(&graph, &lower, &upper, true);
        assert_complete_trace(&graph);
        assert!(graph.clusters.contains(&vec![0, 3]));
        assert!(!graph.clusters.contains(&vec![1, 2]));
    }

    #[test]
    fn merges_chain_across_three_subalignments() {
        let mut graph = AlignmentGraph::new(&[1, 1, 1]);
        graph.accumulate(0, 1, 2);
        graph.accumulate(1, 0, 2);
        graph.accumulate(1, 2, 3);
        graph.accumulate(2, 1, 3);

        let (lower, upper) = (graph.lower_bound(), graph.upper_bound());
        graph.clusters = rg_cluster(&graph, &lower, &upper, true);
        assert_eq!(graph.clusters, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn single_subalignment_keeps_identity_order() {
        // support inside one subalignment never merges its own columns
        let mut graph = AlignmentGraph::new(&[4]);
        graph.accumulate(0, 1, 3);
        graph.accumulate(1, 0, 3);
        graph.accumulate(2, 2, 2);

        let (lower, upper) = (graph.lower_bound(), graph.upper_bound());
        graph.clusters = rg_cluster(&graph, &lower, &upper, true);
        assert_complete_trace(&graph);
        let identity: Vec<Vec<usize>> = (0..4).map(|n| vec![n]).collect();
        assert_eq!(graph.clusters, identity);
        assert_eq!(graph.clustering_cost(&graph.clusters), 0);
    }

    #[test]
    fn unordered_clustering_still_respects_subalignment_exclusivity() {
        let mut graph = AlignmentGraph::new(&[2, 2]);
        graph.accumulate(0, 2, 4);
        graph.accumulate(2, 0, 4);
        graph.accumulate(1, 2, 3);
        graph.accumulate(2, 1, 3);

        let (lower, upper) = (graph.lower_bound(), graph.upper_bound());
        let clusters = rg_cluster(&graph, &lower, &upper, false);
        for cluster in &clusters {
            let mut subs: Vec<usize> = cluster.iter().map(|&a| graph.sub_pos(a).0).collect();
            subs.sort_unstable();
            subs.dedup();
            assert_eq!(subs.len(), cluster.len());
        }
    }
}
