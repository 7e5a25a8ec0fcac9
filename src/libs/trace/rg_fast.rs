use fxhash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::libs::graph::AlignmentGraph;

/// Scalable region-growing: recursively split the node ranges with a
/// coarse cut set, growing one region per column of the widest
/// subalignment, until every interval is trivial. Cuts are monotone by
/// construction, so the resulting clusters always form a valid trace.
pub fn rg_fast_trace(graph: &mut AlignmentGraph) {
    log::info!("Finding graph trace with fast region-growing search..");
    let (lower, upper) = (graph.lower_bound(), graph.upper_bound());
    let cuts = rg_fast_cluster(graph, &lower, &upper);
    graph.clusters = cuts_to_clusters(&cuts);
}

pub fn rg_fast_cluster(
    graph: &AlignmentGraph,
    lower_bound: &[usize],
    upper_bound: &[usize],
) -> Vec<Vec<usize>> {
    let initial_cuts = initial_split(graph, lower_bound, upper_bound);
    if initial_cuts.len() == 2 {
        return initial_cuts;
    }

    let mut cuts = Vec::new();
    for i in 0..initial_cuts.len() - 1 {
        let interval_cuts = rg_fast_cluster(graph, &initial_cuts[i], &initial_cuts[i + 1]);
        cuts.extend(interval_cuts[..interval_cuts.len() - 1].to_vec());
    }
    cuts.push(upper_bound.to_vec());

    cuts
}

/// One cluster per consecutive pair of cuts, holding every node between
/// them. Empty intervals are dropped.
pub fn cuts_to_clusters(cuts: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut clusters = Vec::new();
    for i in 0..cuts.len().saturating_sub(1) {
        let mut cluster = Vec::new();
        for j in 0..cuts[i].len() {
            cluster.extend(cuts[i][j]..cuts[i + 1][j]);
        }
        if !cluster.is_empty() {
            clusters.push(cluster);
        }
    }

    clusters
}

fn initial_split(
    graph: &AlignmentGraph,
    lower_bound: &[usize],
    upper_bound: &[usize],
) -> Vec<Vec<usize>> {
    let k = lower_bound.len();
    let base_idx = (0..k)
        .max_by_key(|&i| upper_bound[i] - lower_bound[i])
        .unwrap_or(0);
    let base_length = upper_bound[base_idx] - lower_bound[base_idx];
    if base_length < 2 {
        return vec![lower_bound.to_vec(), upper_bound.to_vec()];
    }

    let clusters = initial_split_expansion(graph, lower_bound, upper_bound, base_idx, base_length);

    clusters_to_cuts(graph, lower_bound, upper_bound, &clusters)
}

/// Seeds one region per column of the base subalignment and grows each
/// region by its heaviest incident edges, keeping regions interval-
/// disjoint through a shared bounds structure.
fn initial_split_expansion(
    graph: &AlignmentGraph,
    lower_bound: &[usize],
    upper_bound: &[usize],
    base_idx: usize,
    base_length: usize,
) -> Vec<Vec<usize>> {
    let k = lower_bound.len();
    let mut clusters: Vec<Vec<usize>> = (0..base_length)
        .map(|i| vec![lower_bound[base_idx] + i])
        .collect();
    // (region, sub) -> the node claimed there
    let mut idx_sets: FxHashMap<(usize, usize), usize> = (0..base_length)
        .map(|i| ((i, base_idx), lower_bound[base_idx] + i))
        .collect();
    let mut used_nodes: FxHashSet<usize> = FxHashSet::default();
    let mut weight_map: FxHashMap<(usize, usize), i64> = FxHashMap::default();

    let mut bounds = BoundsMap::new(base_length);
    for i in 0..k {
        let span = (lower_bound[i] as i64 - 1, upper_bound[i] as i64);
        bounds.map.insert((0, i), span);
        bounds.map.insert((base_length - 1, i), span);
    }

    let mut heap: BinaryHeap<(i64, Reverse<(usize, usize, usize)>)> = BinaryHeap::new();
    for node in lower_bound[base_idx]..upper_bound[base_idx] {
        for (&nbr, &value) in &graph.matrix[node] {
            let (i, _) = graph.sub_pos(nbr);
            if nbr < lower_bound[i] || nbr >= upper_bound[i] {
                continue;
            }
            let idx = node - lower_bound[base_idx];
            if idx_sets.contains_key(&(idx, i)) {
                continue;
            }
            heap.push((value, Reverse((node, nbr, idx))));
            weight_map.insert((idx, nbr), value);
        }
    }

    while let Some((_value, Reverse((_a, b, idx)))) = heap.pop() {
        if used_nodes.contains(&b) {
            continue;
        }
        let (bsub, _) = graph.sub_pos(b);
        if idx_sets.contains_key(&(idx, bsub)) {
            continue;
        }
        let (lower, upper) = bounds.get(idx, bsub);
        if !(b as i64 > lower && (b as i64) < upper) {
            continue;
        }

        bounds.add(idx, b, bsub);
        clusters[idx].push(b);
        idx_sets.insert((idx, bsub), b);
        used_nodes.insert(b);

        for (&nbr, &value) in &graph.matrix[b] {
            let (i, _) = graph.sub_pos(nbr);
            if idx_sets.contains_key(&(idx, i)) {
                continue;
            }
            let (lower, upper) = bounds.get(idx, i);
            if used_nodes.contains(&nbr) || nbr as i64 <= lower || nbr as i64 >= upper {
                continue;
            }

            let weight = value + weight_map.get(&(idx, nbr)).copied().unwrap_or(0);
            weight_map.insert((idx, nbr), weight);
            heap.push((weight, Reverse((b, nbr, idx))));
        }
    }

    clusters
}

/// Interval bounds for every (region, subalignment) pair, stored
/// sparsely along the binary midpoint decomposition of the region range.
/// A missing region inherits the span between its nearest recorded
/// neighbors.
struct BoundsMap {
    map: FxHashMap<(usize, usize), (i64, i64)>,
    base_length: usize,
}

impl BoundsMap {
    fn new(base_length: usize) -> Self {
        Self {
            map: FxHashMap::default(),
            base_length,
        }
    }

    fn get(&self, idx: usize, asub: usize) -> (i64, i64) {
        let (mut a, mut b) = (0, self.base_length - 1);
        if idx == a {
            return self.map[&(a, asub)];
        }
        if idx == b {
            return self.map[&(b, asub)];
        }

        let mut midpoint = (a + b) / 2;
        while self.map.contains_key(&(midpoint, asub)) {
            if idx == midpoint {
                return self.map[&(midpoint, asub)];
            } else if idx > midpoint {
                a = midpoint;
            } else {
                b = midpoint;
            }
            midpoint = (a + b) / 2;
        }
        let (la, _) = self.map[&(a, asub)];
        let (_, ub) = self.map[&(b, asub)];
        (la, ub)
    }

    fn add(&mut self, idx: usize, node: usize, asub: usize) {
        let (mut a, mut b) = (0, self.base_length - 1);
        let node = node as i64;

        loop {
            let (la, ua) = self.map[&(a, asub)];
            let (lb, ub) = self.map[&(b, asub)];
            if idx == a {
                self.map.insert((a, asub), (node, node));
                return;
            } else if node < ua {
                self.map.insert((a, asub), (la, node));
            }

            if idx == b {
                self.map.insert((b, asub), (node, node));
                return;
            } else if node > lb {
                self.map.insert((b, asub), (node, ub));
            }

            let midpoint = (a + b) / 2;
            if idx == midpoint {
                self.map.insert((midpoint, asub), (node, node));
                return;
            } else if !self.map.contains_key(&(midpoint, asub)) {
                self.map.insert((midpoint, asub), (la, ub));
            }

            if idx > midpoint {
                a = midpoint;
            } else {
                b = midpoint;
            }
        }
    }
}

fn clusters_to_cuts(
    graph: &AlignmentGraph,
    lower_bound: &[usize],
    upper_bound: &[usize],
    clusters: &[Vec<usize>],
) -> Vec<Vec<usize>> {
    let mut cuts = vec![lower_bound.to_vec()];
    let mut cut = lower_bound.to_vec();
    for (i, cluster) in clusters.iter().enumerate() {
        if i == 0 {
            continue;
        }
        for &a in cluster {
            let (asub, _) = graph.sub_pos(a);
            cut[asub] = cut[asub].max(a);
        }
        cuts.push(cut.clone());
    }
    cuts.push(upper_bound.to_vec());

    cuts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::trace::assert_complete_trace;

    #[test]
    fn cuts_to_clusters_covers_intervals() {
        let cuts = vec![vec![0, 3], vec![1, 4], vec![2, 6]];
        let clusters = cuts_to_clusters(&cuts);
        assert_eq!(clusters, vec![vec![0, 3], vec![1, 4, 5]]);
    }

    #[test]
    fn aligned_diagonal_yields_valid_trace() {
        let mut graph = AlignmentGraph::new(&[3, 3]);
        for i in 0..3 {
            graph.accumulate(i, i + 3, 4);
            graph.accumulate(i + 3, i, 4);
        }
        rg_fast_trace(&mut graph);
        assert_complete_trace(&graph);
    }

    #[test]
    fn edgeless_graph_terminates_with_full_coverage() {
        let mut graph = AlignmentGraph::new(&[3, 2]);
        rg_fast_trace(&mut graph);
        assert_complete_trace(&graph);
    }
}
