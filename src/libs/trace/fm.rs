use fxhash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::libs::graph::AlignmentGraph;

/// Fiduccia-Mattheyses trace: recursively bisect the node ranges along
/// the cut with the lowest crossing weight, sliding cut positions one
/// subalignment at a time with a prefix-gain heap. Slower and usually
/// worse than the cluster-break search, kept for comparison runs.
pub fn fm_trace(graph: &mut AlignmentGraph) {
    log::info!("Finding graph trace with FM algorithm..");
    if graph.clusters.is_empty() {
        graph.build_node_edges();
    } else {
        graph.build_node_edges_from_clusters();
    }

    let (lower, upper) = (graph.lower_bound(), graph.upper_bound());
    let (clusters, _cost, _cuts) = fm_partition(graph, &lower, &upper);
    graph.clusters = clusters.into_iter().filter(|c| !c.is_empty()).collect();
}

fn fm_partition(
    graph: &AlignmentGraph,
    lower_bound: &[usize],
    upper_bound: &[usize],
) -> (Vec<Vec<usize>>, i64, Vec<Vec<usize>>) {
    let k = lower_bound.len();

    let mut finished = true;
    let mut cluster = Vec::new();
    for i in 0..k {
        if upper_bound[i] - lower_bound[i] > 1 {
            finished = false;
            break;
        } else if upper_bound[i] - lower_bound[i] == 1 {
            cluster.push(lower_bound[i]);
        }
    }
    if finished {
        return (vec![cluster], 0, Vec::new());
    }

    let starting_cut: Vec<usize> = (0..k)
        .map(|i| (lower_bound[i] + upper_bound[i]) / 2)
        .collect();
    let (best_cut, best_cut_cost) = fm_find_best_cut(graph, lower_bound, upper_bound, starting_cut);

    let (lower_clusters, lower_cost, lower_cuts) = fm_partition(graph, lower_bound, &best_cut);
    let (upper_clusters, upper_cost, upper_cuts) = fm_partition(graph, &best_cut, upper_bound);

    let mut clusters = lower_clusters;
    clusters.extend(upper_clusters);
    let mut cuts = lower_cuts;
    cuts.push(best_cut);
    cuts.extend(upper_cuts);

    (clusters, best_cut_cost + lower_cost + upper_cost, cuts)
}

fn fm_find_best_cut(
    graph: &AlignmentGraph,
    lower_bound: &[usize],
    upper_bound: &[usize],
    starting_cut: Vec<usize>,
) -> (Vec<usize>, i64) {
    let k = lower_bound.len();
    let mut best_cut = starting_cut;
    let (mut best_cut_gains, mut best_cut_cost) =
        populate_gains(graph, lower_bound, upper_bound, &best_cut);

    let mut old_best_cut: Option<Vec<usize>> = None;
    while Some(&best_cut) != old_best_cut.as_ref() {
        if best_cut_cost == 0 {
            break;
        }

        old_best_cut = Some(best_cut.clone());
        let mut cut_cost = best_cut_cost;
        let mut cut = best_cut.clone();
        let mut gains = best_cut_gains.clone();
        let mut heap: BinaryHeap<Reverse<(i64, usize, u64)>> = BinaryHeap::new();
        let mut heap_gains: FxHashMap<usize, i64> = FxHashMap::default();
        let mut heap_gains_versions: FxHashMap<usize, u64> = FxHashMap::default();
        let mut locked: FxHashSet<usize> = FxHashSet::default();
        let mut lower_update_bound = cut.clone();
        let mut upper_update_bound = cut.clone();

        loop {
            let (new_lower, new_upper) = find_new_bounds(lower_bound, upper_bound, &cut);
            let update_list =
                heap_gain_update_list(k, &new_lower, &new_upper, &lower_update_bound, &upper_update_bound);
            update_heap_gain_list(
                &cut,
                &update_list,
                &gains,
                &mut heap_gains,
                &mut heap_gains_versions,
                &mut heap,
                &locked,
            );

            let mut found: Option<(i64, usize)> = None;
            let mut reinsert = Vec::new();
            while let Some(Reverse((neg_gain, node, version))) = heap.pop() {
                if locked.contains(&node) || heap_gains_versions.get(&node) != Some(&version) {
                    continue;
                }
                let (asub, _) = graph.sub_pos(node);
                if node < new_lower[asub] || node >= new_upper[asub] {
                    reinsert.push(Reverse((neg_gain, node, version)));
                    continue;
                }
                found = Some((-neg_gain, node));
                break;
            }

            let (gain, node) = match found {
                Some(pair) => pair,
                None => break,
            };
            for item in reinsert {
                heap.push(item);
            }

            locked.insert(node);
            let (asub, _) = graph.sub_pos(node);
            let moved_nodes: Vec<usize> = if node >= cut[asub] {
                let moved = (cut[asub]..=node).collect();
                cut[asub] = node + 1;
                moved
            } else {
                let moved = (node..cut[asub]).collect();
                cut[asub] = node;
                moved
            };

            update_gains(
                graph,
                lower_bound,
                upper_bound,
                &cut,
                &mut gains,
                &moved_nodes,
                &mut lower_update_bound,
                &mut upper_update_bound,
            );

            cut_cost -= gain;
            if cut_cost < best_cut_cost {
                best_cut = cut.clone();
                best_cut_gains = gains.clone();
                best_cut_cost = cut_cost;
            }
        }
    }

    log::debug!("Found FM partition {}", graph.cut_string(&best_cut));
    log::debug!("    Partition cost: {}", best_cut_cost);

    (best_cut, best_cut_cost)
}

/// Per node, the cut-cost delta of moving it across the cut; positive
/// gain means the cut gets cheaper.
fn populate_gains(
    graph: &AlignmentGraph,
    lower_bound: &[usize],
    upper_bound: &[usize],
    cut: &[usize],
) -> (FxHashMap<usize, i64>, i64) {
    let k = lower_bound.len();
    let mut gains = FxHashMap::default();
    let mut cut_cost = 0;

    for j in 0..k {
        for node in lower_bound[j]..upper_bound[j] {
            let mut gain = 0;
            for i in 0..k {
                for &(nbr, value) in &graph.node_edges[node][i] {
                    if nbr < lower_bound[i] {
                        continue;
                    }
                    if nbr >= upper_bound[i] {
                        break;
                    }
                    if (nbr < cut[i] && node < cut[j]) || (nbr >= cut[i] && node >= cut[j]) {
                        gain -= value;
                    } else {
                        gain += value;
                        cut_cost += value;
                    }
                }
            }
            gains.insert(node, gain);
        }
    }

    (gains, cut_cost / 2)
}

/// Window around the current cut in which moves keep the two sides
/// roughly balanced and both strictly narrower than the whole portion.
fn find_new_bounds(
    lower_bound: &[usize],
    upper_bound: &[usize],
    cut: &[usize],
) -> (Vec<usize>, Vec<usize>) {
    let k = lower_bound.len();
    let lower_size: i64 = (0..k).map(|i| (cut[i] - lower_bound[i]) as i64).sum();
    let upper_size: i64 = (0..k).map(|i| (upper_bound[i] - cut[i]) as i64).sum();
    let portion_width = (0..k)
        .map(|i| (upper_bound[i] - lower_bound[i]) as i64)
        .max()
        .unwrap_or(0);

    let limit = (k as i64).min(lower_size + upper_size - 1);
    let lower_margin = (lower_size - upper_size + limit) / 2;
    let upper_margin = (upper_size - lower_size + limit) / 2;

    let new_lower: Vec<usize> = (0..k)
        .map(|i| {
            (cut[i] as i64 - lower_margin)
                .max(lower_bound[i] as i64)
                .max(upper_bound[i] as i64 - portion_width + 1) as usize
        })
        .collect();
    let new_upper: Vec<usize> = (0..k)
        .map(|i| {
            (cut[i] as i64 + upper_margin)
                .min(upper_bound[i] as i64)
                .min(lower_bound[i] as i64 + portion_width - 1)
                .max(new_lower[i] as i64) as usize
        })
        .collect();

    (new_lower, new_upper)
}

#[allow(clippy::too_many_arguments)]
fn update_gains(
    graph: &AlignmentGraph,
    lower_bound: &[usize],
    upper_bound: &[usize],
    cut: &[usize],
    gains: &mut FxHashMap<usize, i64>,
    moved_nodes: &[usize],
    lower_update_bound: &mut [usize],
    upper_update_bound: &mut [usize],
) {
    let k = lower_bound.len();

    for &node in moved_nodes {
        if let Some(gain) = gains.get_mut(&node) {
            *gain = -*gain;
        }
        let (asub, _) = graph.sub_pos(node);
        lower_update_bound[asub] = cut[asub];
        upper_update_bound[asub] = cut[asub];

        for i in 0..k {
            for &(nbr, value) in &graph.node_edges[node][i] {
                if nbr < lower_bound[i] {
                    continue;
                }
                if nbr >= upper_bound[i] {
                    break;
                }
                let same_side =
                    (nbr < cut[i] && node < cut[asub]) || (nbr >= cut[i] && node >= cut[asub]);
                if let Some(gain) = gains.get_mut(&nbr) {
                    *gain += if same_side { -2 * value } else { 2 * value };
                }

                if nbr < cut[i] {
                    lower_update_bound[i] = lower_update_bound[i].max(nbr + 1);
                } else {
                    upper_update_bound[i] = upper_update_bound[i].min(nbr);
                }
            }
        }
    }
}

/// Nodes whose prefix gains became stale, ordered outward from the cut
/// so prefix sums can chain off the previous entry.
fn heap_gain_update_list(
    k: usize,
    new_lower: &[usize],
    new_upper: &[usize],
    lower_update_bound: &[usize],
    upper_update_bound: &[usize],
) -> Vec<Vec<usize>> {
    let mut update_list = vec![Vec::new(); k];
    for i in 0..k {
        for j in (new_lower[i]..lower_update_bound[i]).rev() {
            update_list[i].push(j);
        }
        for j in upper_update_bound[i]..new_upper[i] {
            update_list[i].push(j);
        }
    }

    update_list
}

fn update_heap_gain_list(
    cut: &[usize],
    update_list: &[Vec<usize>],
    gains: &FxHashMap<usize, i64>,
    heap_gains: &mut FxHashMap<usize, i64>,
    heap_gains_versions: &mut FxHashMap<usize, u64>,
    heap: &mut BinaryHeap<Reverse<(i64, usize, u64)>>,
    locked: &FxHashSet<usize>,
) {
    for (i, nodes) in update_list.iter().enumerate() {
        for &j in nodes {
            let version = heap_gains_versions.entry(j).or_insert(0);
            *version += 1;
            let version = *version;

            let gain = gains.get(&j).copied().unwrap_or(0);
            let prefix = if j > cut[i] {
                heap_gains.get(&(j - 1)).copied().unwrap_or(0) + gain
            } else if j == cut[i] || j + 1 == cut[i] {
                gain
            } else {
                heap_gains.get(&(j + 1)).copied().unwrap_or(0) + gain
            };
            heap_gains.insert(j, prefix);

            if !locked.contains(&j) {
                heap.push(Reverse((-prefix, j, version)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::trace::assert_complete_trace;

    #[test]
    fn diagonal_alignment_costs_nothing() {
        let mut graph = AlignmentGraph::new(&[2, 2]);
        graph.accumulate(0, 2, 4);
        graph.accumulate(2, 0, 4);
        graph.accumulate(1, 3, 4);
        graph.accumulate(3, 1, 4);
        fm_trace(&mut graph);
        assert_complete_trace(&graph);
        assert_eq!(graph.clustering_cost(&graph.clusters), 0);
    }

    #[test]
    fn edgeless_graph_partitions_cleanly() {
        let mut graph = AlignmentGraph::new(&[2, 3]);
        fm_trace(&mut graph);
        assert_complete_trace(&graph);
    }

    #[test]
    fn crossing_edges_yield_valid_trace() {
        let mut graph = AlignmentGraph::new(&[2, 2]);
        graph.accumulate(0, 3, 5);
        graph.accumulate(3, 0, 5);
        graph.accumulate(1, 2, 1);
        graph.accumulate(2, 1, 1);
        fm_trace(&mut graph);
        assert_complete_trace(&graph);
        // never worse than cutting everything
        assert!(graph.clustering_cost(&graph.clusters) <= 6);
    }
}
