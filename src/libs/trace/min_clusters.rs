use fxhash::{FxHashMap, FxHashSet};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::rc::Rc;

use crate::libs::graph::AlignmentGraph;

/// Resolves clusters into a trace with an A*-style search over cluster
/// breaks, minimizing the number of clusters broken apart. Each search
/// state is a set of per-subalignment queue positions plus the breaks
/// taken so far; conflicted frontier clusters spawn one successor per
/// side of the break.
///
/// When the heap outgrows `heap_limit` the search restarts from the last
/// frontier with a raised aggression factor, eventually falling back to
/// a fully greedy descent.
pub fn min_clusters_search(graph: &mut AlignmentGraph, heap_limit: usize) {
    log::info!("Finding graph trace with minimum clusters heuristic search..");
    let k = graph.k();
    let clusters: Vec<Rc<Vec<usize>>> = graph.clusters.iter().cloned().map(Rc::new).collect();

    // per subalignment: (cluster, position), sorted by position
    let mut subset_clusters: Vec<Vec<(usize, usize)>> = vec![Vec::new(); k];
    let mut total_pairs: i64 = 0;
    for (a, cluster) in clusters.iter().enumerate() {
        for &b in cluster.iter() {
            let (bsub, bpos) = graph.sub_pos(b);
            subset_clusters[bsub].push((a, bpos));
        }
        let len = cluster.len() as i64;
        total_pairs += len * (len - 1) / 2;
    }
    // (cluster, subalignment) -> index into that subalignment's queue
    let mut cluster_positions: FxHashMap<(usize, usize), usize> = FxHashMap::default();
    for (asub, entries) in subset_clusters.iter_mut().enumerate() {
        entries.sort_unstable_by_key(|c| c.1);
        for (i, &(a, _)) in entries.iter().enumerate() {
            cluster_positions.insert((a, asub), i);
        }
    }

    let search = Search {
        graph,
        clusters: &clusters,
        subset_clusters: &subset_clusters,
        cluster_positions: &cluster_positions,
    };

    let mut heap: BinaryHeap<Reverse<State>> = BinaryHeap::new();
    let mut visited: FxHashSet<Vec<usize>> = FxHashSet::default();
    let mut max_frontier: Vec<isize> = vec![-1; k];
    let mut aggression = 1.0f64;
    let mut greedy = false;
    let mut counter: u64 = 0;

    let mut start = State {
        heuristic: (0.0, 0, 0, 0),
        num_ordered: 0,
        num_left: clusters.len() as i64,
        pairs_left: total_pairs,
        counter,
        queue_idxs: vec![0; k],
        cluster_breaks: FxHashMap::default(),
        maximal_cut: vec![-1; k],
        new_breaks: Vec::new(),
        safe_frontier: true,
    };
    search.develop_state(&mut start, aggression, greedy, 0);
    let mut last_frontier_state = start.clone();
    let mut final_breaks = start.cluster_breaks.clone();
    heap.push(Reverse(start));

    while !heap.is_empty() {
        let mut heap_cleared = false;
        if heap.len() > heap_limit {
            log::info!(
                "Heap limit {} reached.. Truncating heap to last frontier",
                heap_limit
            );
            if aggression == 1.0 {
                aggression = 1.2;
                log::info!("Increasing aggression to {}..", aggression);
            } else if aggression < 8.0 {
                aggression = aggression.trunc() * 2.0;
                log::info!("Increasing aggression to {}..", aggression);
            } else {
                log::info!("Setting search strategy to fully greedy..");
                greedy = true;
                aggression = 1.0;
            }

            heap.clear();
            visited.clear();
            let mut restart = last_frontier_state.clone();
            search.develop_state(&mut restart, aggression, greedy, 0);
            heap.push(Reverse(restart));
            heap_cleared = true;
        }

        let state = match heap.pop() {
            Some(Reverse(state)) => state,
            None => break,
        };
        final_breaks = state.cluster_breaks.clone();

        if state.new_breaks.is_empty() {
            break;
        }
        if !visited.insert(state.queue_idxs.clone()) {
            continue;
        }

        let new_sub_frontier = (0..k).all(|asub| state.queue_idxs[asub] as isize > max_frontier[asub]);
        if new_sub_frontier {
            max_frontier = state.queue_idxs.iter().map(|&v| v as isize).collect();
            log::debug!("Reached new search frontier {:?}", max_frontier);
            last_frontier_state = state.clone();
            greedy = false;
        }

        if state.safe_frontier && !heap_cleared {
            log::debug!(
                "Safe frontier reached.. dumping {} from heap and resetting aggression..",
                heap.len()
            );
            last_frontier_state = state.clone();
            heap.clear();
            visited.clear();
            aggression = 1.0;
            greedy = false;
        }

        let mut next_states = Vec::new();
        for br in &state.new_breaks {
            let g = br.good.len() as i64;
            let b = br.bad.len() as i64;
            let pairs_diff = g * (g - 1) / 2 + b * (b - 1) / 2 - (g + b) * (g + b - 1) / 2;

            counter += 1;
            let mut next = State {
                heuristic: (0.0, 0, 0, 0),
                num_ordered: state.num_ordered,
                num_left: state.num_left + 1,
                pairs_left: state.pairs_left + pairs_diff,
                counter,
                queue_idxs: state.queue_idxs.clone(),
                cluster_breaks: state.cluster_breaks.clone(),
                maximal_cut: state.maximal_cut.clone(),
                new_breaks: Vec::new(),
                safe_frontier: false,
            };
            for side in [&br.good, &br.bad] {
                for &bnode in side.iter() {
                    let (bsub, _) = search.graph.sub_pos(bnode);
                    next.cluster_breaks.insert((br.cluster, bsub), side.clone());
                    let pos = cluster_positions[&(br.cluster, bsub)] as isize;
                    next.maximal_cut[bsub] = next.maximal_cut[bsub].max(pos);
                }
            }
            search.develop_state(&mut next, aggression, greedy, br.crossed.len());
            next_states.push(next);
        }

        if greedy {
            if let Some(best) = next_states.into_iter().min() {
                heap.push(Reverse(best));
            }
        } else {
            for next in next_states {
                heap.push(Reverse(next));
            }
        }
    }

    graph.clusters = order_broken_clusters(
        graph,
        &clusters,
        &subset_clusters,
        &cluster_positions,
        &final_breaks,
    );
}

/// Final sweep: emit clusters (or their broken sides) in the unique
/// frontier-consistent order the chosen breaks admit.
fn order_broken_clusters(
    graph: &AlignmentGraph,
    clusters: &[Rc<Vec<usize>>],
    subset_clusters: &[Vec<(usize, usize)>],
    cluster_positions: &FxHashMap<(usize, usize), usize>,
    cluster_breaks: &FxHashMap<(usize, usize), Rc<Vec<usize>>>,
) -> Vec<Vec<usize>> {
    let k = subset_clusters.len();
    let mut queue_idxs = vec![0usize; k];
    let mut ordered = Vec::new();

    let mut found_good = true;
    while found_good {
        found_good = false;
        for asub in 0..k {
            let idx = queue_idxs[asub];
            if idx == subset_clusters[asub].len() {
                continue;
            }
            let (a, _) = subset_clusters[asub][idx];
            let cluster = cluster_breaks
                .get(&(a, asub))
                .cloned()
                .unwrap_or_else(|| clusters[a].clone());

            let good = cluster.iter().all(|&b| {
                let (bsub, _) = graph.sub_pos(b);
                cluster_positions[&(a, bsub)] == queue_idxs[bsub]
            });
            if good {
                ordered.push(cluster.as_ref().clone());
                for &b in cluster.iter() {
                    let (bsub, _) = graph.sub_pos(b);
                    queue_idxs[bsub] = cluster_positions[&(a, bsub)] + 1;
                }
                found_good = true;
                break;
            }
        }
    }

    ordered
}

struct Search<'a> {
    graph: &'a AlignmentGraph,
    clusters: &'a [Rc<Vec<usize>>],
    subset_clusters: &'a [Vec<(usize, usize)>],
    cluster_positions: &'a FxHashMap<(usize, usize), usize>,
}

impl Search<'_> {
    /// Advances the state's queues past every conflict-free frontier
    /// cluster, then records the remaining frontier conflicts as
    /// candidate breaks and scores the state.
    fn develop_state(&self, state: &mut State, aggression: f64, greedy: bool, crossed: usize) {
        let mut found_good = true;
        while found_good {
            found_good = false;
            state.new_breaks.clear();
            let mut visited: FxHashSet<(usize, usize)> = FxHashSet::default();
            state.safe_frontier = true;

            for asub in 0..self.subset_clusters.len() {
                let idx = state.queue_idxs[asub];
                if idx as isize <= state.maximal_cut[asub] {
                    state.safe_frontier = false;
                }
                if idx == self.subset_clusters[asub].len() {
                    continue;
                }
                let (a, _) = self.subset_clusters[asub][idx];
                if visited.contains(&(a, asub)) {
                    continue;
                }
                let cluster = self.cluster(state, a, asub);

                let mut good = Vec::new();
                let mut bad = Vec::new();
                for &b in cluster.iter() {
                    let (bsub, _) = self.graph.sub_pos(b);
                    visited.insert((a, bsub));
                    if self.cluster_positions[&(a, bsub)] == state.queue_idxs[bsub] {
                        good.push(b);
                    } else {
                        bad.push(b);
                    }
                }

                if bad.is_empty() {
                    for &b in cluster.iter() {
                        let (bsub, _) = self.graph.sub_pos(b);
                        state.queue_idxs[bsub] = self.cluster_positions[&(a, bsub)] + 1;
                    }
                    state.num_ordered += 1;
                    state.num_left -= 1;
                    found_good = true;
                    break;
                } else {
                    state.new_breaks.push(Break {
                        cluster: a,
                        good: Rc::new(good),
                        bad: Rc::new(bad),
                        crossed: FxHashSet::default(),
                    });
                }
            }
        }

        // greedy mode keeps one successor per step; count the clusters
        // each break would force apart later to break ties sensibly
        if greedy {
            let mut crossings: Vec<FxHashSet<usize>> = Vec::with_capacity(state.new_breaks.len());
            for br in &state.new_breaks {
                let a = br.cluster;
                let good_sub: FxHashSet<usize> = br
                    .good
                    .iter()
                    .map(|&b| self.graph.sub_pos(b).0)
                    .collect();

                let mut crossed_clusters = FxHashSet::default();
                for &b in br.bad.iter() {
                    let (bsub, _) = self.graph.sub_pos(b);
                    for i in state.queue_idxs[bsub]..self.cluster_positions[&(a, bsub)] {
                        let (c, _) = self.subset_clusters[bsub][i];
                        let other = self.cluster(state, c, bsub);
                        for &csite in other.iter() {
                            let (csub, _) = self.graph.sub_pos(csite);
                            if good_sub.contains(&csub)
                                && self.cluster_positions[&(c, csub)]
                                    > self.cluster_positions[&(a, csub)]
                            {
                                crossed_clusters.insert(c);
                                break;
                            }
                        }
                    }
                }
                crossings.push(crossed_clusters);
            }
            for (br, crossed_clusters) in state.new_breaks.iter_mut().zip(crossings) {
                br.crossed = crossed_clusters;
            }
        }

        let base = if state.safe_frontier || state.new_breaks.is_empty() {
            (state.num_left + state.num_ordered) as f64
        } else {
            aggression * state.num_left as f64 + state.num_ordered as f64
        };
        state.heuristic = (base, -state.num_ordered, -(crossed as i64), -state.pairs_left);
    }

    fn cluster(&self, state: &State, a: usize, asub: usize) -> Rc<Vec<usize>> {
        state
            .cluster_breaks
            .get(&(a, asub))
            .cloned()
            .unwrap_or_else(|| self.clusters[a].clone())
    }
}

#[derive(Clone)]
struct Break {
    cluster: usize,
    good: Rc<Vec<usize>>,
    bad: Rc<Vec<usize>>,
    crossed: FxHashSet<usize>,
}

#[derive(Clone)]
struct State {
    heuristic: (f64, i64, i64, i64),
    num_ordered: i64,
    num_left: i64,
    pairs_left: i64,
    counter: u64,
    /// Per subalignment, the queue index of the next unordered cluster.
    queue_idxs: Vec<usize>,
    /// (cluster, subalignment) -> the side of the break covering it.
    cluster_breaks: FxHashMap<(usize, usize), Rc<Vec<usize>>>,
    /// Highest queue index touched by any break so far.
    maximal_cut: Vec<isize>,
    new_breaks: Vec<Break>,
    safe_frontier: bool,
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.counter == other.counter
    }
}

impl Eq for State {}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        self.heuristic
            .0
            .total_cmp(&other.heuristic.0)
            .then(self.heuristic.1.cmp(&other.heuristic.1))
            .then(self.heuristic.2.cmp(&other.heuristic.2))
            .then(self.heuristic.3.cmp(&other.heuristic.3))
            .then(self.num_ordered.cmp(&other.num_ordered))
            .then(self.num_left.cmp(&other.num_left))
            .then(self.pairs_left.cmp(&other.pairs_left))
            .then(self.counter.cmp(&other.counter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::trace::assert_complete_trace;

    #[test]
    fn compatible_clusters_survive_intact() {
        let mut graph = AlignmentGraph::new(&[2, 2]);
        graph.clusters = vec![vec![0, 2], vec![1, 3]];
        min_clusters_search(&mut graph, 100);
        assert_eq!(graph.clusters, vec![vec![0, 2], vec![1, 3]]);
        assert_complete_trace(&graph);
    }

    #[test]
    fn crossing_clusters_are_broken_apart() {
        // cluster X joins (sub 0, pos 0) with (sub 1, pos 1), cluster Y
        // joins (sub 0, pos 1) with (sub 1, pos 0); no valid order keeps
        // both intact
        let mut graph = AlignmentGraph::new(&[2, 2]);
        graph.clusters = vec![vec![0, 3], vec![1, 2]];
        min_clusters_search(&mut graph, 100);

        let joined: usize = graph.clusters.iter().filter(|c| c.len() > 1).count();
        assert!(joined <= 1);
        assert_complete_trace(&graph);
    }

    #[test]
    fn three_way_conflict_terminates() {
        let mut graph = AlignmentGraph::new(&[2, 2, 2]);
        // pairwise crossings between all three subalignments
        graph.clusters = vec![vec![0, 3], vec![1, 2, 4], vec![5]];
        min_clusters_search(&mut graph, 100);
        assert_complete_trace(&graph);
    }
}
