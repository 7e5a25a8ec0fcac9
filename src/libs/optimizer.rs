use fxhash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::libs::config::Config;
use crate::libs::graph::AlignmentGraph;

/// Post-processes a trace by shuffling columns between clusters to
/// improve the total edge weight kept. Disabled by default; tends to be
/// slow for small gains, but can rescue a trace built by the cheaper
/// methods. Moves cascade: pulling a column into an earlier cluster
/// drags every same-subalignment column it would overtake into freshly
/// inserted clusters in between, so the trace stays valid.
pub fn optimize_trace(config: &Config, graph: &mut AlignmentGraph) {
    if !config.optimize {
        log::info!("Skipping optimization pass..");
        return;
    }

    log::info!("Optimization pass..");
    graph.add_singleton_clusters();
    graph.clusters = optimize_clusters(graph, graph.clusters.clone());
    log::info!(
        "Optimized the trace to {} clusters with a total cost of {}",
        graph.clusters.len(),
        graph.clustering_cost(&graph.clusters)
    );
}

pub fn optimize_clusters(graph: &AlignmentGraph, clusters: Vec<Vec<usize>>) -> Vec<Vec<usize>> {
    let mut best_clusters = clusters.clone();
    let mut best_cost = graph.clustering_cost(&clusters);
    log::info!("Starting optimization from initial cost of {}..", best_cost);

    let mut context = SearchContext::new(graph, clusters);

    let mut pass_num = 1;
    loop {
        log::info!("Starting optimization pass {}..", pass_num);
        let (new_clusters, gain) = optimization_pass(graph, best_clusters.clone(), &mut context);
        if gain > 0 {
            best_clusters = new_clusters;
            best_cost -= gain;
            log::info!(
                "New clustering with a cost of {} over {} clusters..",
                best_cost,
                best_clusters.len()
            );
        } else {
            break;
        }
        pass_num += 1;
    }
    log::info!(
        "Final optimized cost of {} over {} clusters..",
        best_cost,
        best_clusters.len()
    );

    for cluster in best_clusters.iter_mut() {
        cluster.sort_unstable();
    }
    best_clusters
}

/// One hill-climbing pass: keep taking the best positive move, allowing
/// bounded downhill steps, and remember the best clustering seen.
fn optimization_pass(
    graph: &AlignmentGraph,
    clusters: Vec<Vec<usize>>,
    context: &mut SearchContext,
) -> (Vec<Vec<usize>>, i64) {
    context.initialize_heap(graph);

    let mut best_gain = 0;
    let mut current_gain = 0;
    let mut best_clusters = clusters;

    loop {
        let next_move = context.next_cluster_move(graph);
        let (gain, element, src, dest, update_list) = match next_move {
            Some(m) => m,
            None => {
                if current_gain == best_gain {
                    best_clusters = context.ordered_clusters();
                }
                break;
            }
        };

        if gain < 0 && current_gain == best_gain {
            best_clusters = context.ordered_clusters();
            break;
        }

        current_gain += gain;
        if current_gain > best_gain {
            best_gain = current_gain;
            context.locked.clear();
        } else {
            context.locked.insert(element);
        }

        context.move_elements(graph, element, dest, &update_list);
        context.update_moves(graph, element, src, dest, &update_list);
    }

    (best_clusters, best_gain)
}

/// Mutable view of the clustering under optimization: clusters as sets
/// threaded on a doubly-linked order list, hierarchical order labels for
/// O(1) before/after tests, per-(column, cluster) edge weights, and a
/// move heap with lazy invalidation.
struct SearchContext {
    clusters: Vec<FxHashSet<usize>>,
    cluster_ll: Vec<(Option<usize>, Option<usize>)>,
    head: Option<usize>,
    cluster_orders: Vec<Vec<i64>>,
    element_clusters: Vec<usize>,
    cluster_subs: FxHashMap<(usize, usize), usize>,
    deleted: FxHashSet<usize>,

    /// (column, cluster) -> summed edge weight from the column into it.
    weights: FxHashMap<(usize, usize), i64>,
    /// Per subalignment, prefix sums of each column's weight into its own
    /// cluster, for range gain queries.
    gain_structure: Vec<Vec<i64>>,
    /// (column, destination) -> best gain currently on the heap.
    element_moves: FxHashMap<(usize, usize), Option<i64>>,
    heap: BinaryHeap<(i64, Reverse<usize>, Reverse<usize>)>,
    locked: FxHashSet<usize>,
}

impl SearchContext {
    fn new(graph: &AlignmentGraph, clusters: Vec<Vec<usize>>) -> Self {
        log::info!("Initializing search context data structures..");
        let count = clusters.len();
        let mut context = Self {
            clusters: clusters.iter().map(|c| c.iter().copied().collect()).collect(),
            cluster_ll: Vec::with_capacity(count),
            head: Some(0),
            cluster_orders: Vec::with_capacity(count),
            element_clusters: vec![0; graph.size()],
            cluster_subs: FxHashMap::default(),
            deleted: FxHashSet::default(),
            weights: FxHashMap::default(),
            gain_structure: Vec::new(),
            element_moves: FxHashMap::default(),
            heap: BinaryHeap::new(),
            locked: FxHashSet::default(),
        };

        for (i, cluster) in clusters.iter().enumerate() {
            context.cluster_orders.push(vec![i as i64]);
            let prev = if i > 0 { Some(i - 1) } else { None };
            let next = if i + 1 < count { Some(i + 1) } else { None };
            context.cluster_ll.push((prev, next));

            for &a in cluster {
                let (asub, _) = graph.sub_pos(a);
                context.element_clusters[a] = i;
                context.cluster_subs.insert((i, asub), a);
                let nbrs = neighbor_list(graph, a);
                context.update_neighbor_weights(None, Some(i), &nbrs);
            }
        }

        context
    }

    fn initialize_heap(&mut self, graph: &AlignmentGraph) {
        log::info!(
            "Working with {} clusters..",
            self.clusters.len() - self.deleted.len()
        );
        self.element_moves.clear();
        self.heap.clear();
        self.locked.clear();

        let k = graph.k();
        self.gain_structure = (0..k)
            .map(|i| vec![0; graph.subalignment_lengths[i]])
            .collect();
        for i in 0..k {
            for j in 0..graph.subalignment_lengths[i] {
                let node = graph.node(i, j);
                let weight = self
                    .weights
                    .get(&(node, self.element_clusters[node]))
                    .copied()
                    .unwrap_or(0);
                self.gain_structure[i][j] = if j == 0 {
                    weight
                } else {
                    weight + self.gain_structure[i][j - 1]
                };
            }
        }

        self.push_positive_moves(graph);
        log::info!("Starting with {} candidate moves..", self.heap.len());
    }

    /// Seeds the heap with every cross-cluster edge whose endpoints could
    /// profitably share a cluster, estimating the cascade cost from the
    /// prefix-sum structure.
    fn push_positive_moves(&mut self, graph: &AlignmentGraph) {
        let k = graph.k();
        let mut used: FxHashSet<(usize, usize)> = FxHashSet::default();

        // per subalignment: the last position at or before each cluster
        let mut cluster_sub_map: Vec<Vec<i64>> = vec![vec![-1; self.clusters.len()]; k];
        let mut walk = self.head;
        while let Some(i) = walk {
            let (prev, next) = self.cluster_ll[i];
            if let Some(prev) = prev {
                for row in cluster_sub_map.iter_mut() {
                    row[i] = row[prev];
                }
            }
            for &node in &self.clusters[i] {
                let (asub, apos) = graph.sub_pos(node);
                cluster_sub_map[asub][i] = apos as i64;
            }
            walk = next;
        }

        let mut walk = self.head;
        while let Some(i) = walk {
            let (_, next) = self.cluster_ll[i];

            for &node in &self.clusters[i] {
                let (asub, apos) = graph.sub_pos(node);
                for (&nbr, _) in &graph.matrix[node] {
                    let (bsub, bpos) = graph.sub_pos(nbr);
                    let j = self.element_clusters[nbr];
                    if asub == bsub || self.cluster_orders[j] <= self.cluster_orders[i] {
                        continue;
                    }

                    if used.insert((i, nbr)) {
                        let mut gain = self.weights.get(&(nbr, i)).copied().unwrap_or(0)
                            - self.gain_structure[bsub][bpos];
                        let bound = if self.cluster_subs.contains_key(&(i, bsub)) {
                            cluster_sub_map[bsub][i] - 1
                        } else {
                            cluster_sub_map[bsub][i]
                        };
                        if bound >= 0 {
                            gain += self.gain_structure[bsub][bound as usize];
                        }
                        if gain > 0
                            || (gain == 0 && self.clusters[i].len() >= self.clusters[j].len())
                        {
                            self.element_moves.insert((nbr, i), Some(gain));
                            self.heap.push((gain, Reverse(nbr), Reverse(i)));
                        }
                    }

                    if used.insert((j, node)) {
                        let mut gain = self.weights.get(&(node, j)).copied().unwrap_or(0)
                            - self.gain_structure[asub][cluster_sub_map[asub][j] as usize];
                        if apos > 0 {
                            gain += self.gain_structure[asub][apos - 1];
                        }
                        if gain > 0
                            || (gain == 0 && self.clusters[j].len() >= self.clusters[i].len())
                        {
                            self.element_moves.insert((node, j), Some(gain));
                            self.heap.push((gain, Reverse(node), Reverse(j)));
                        }
                    }
                }
            }
            walk = next;
        }
    }

    /// Pops heap entries until one survives re-validation: stale gains
    /// are recomputed and pushed back, non-improving moves dropped.
    fn next_cluster_move(
        &mut self,
        graph: &AlignmentGraph,
    ) -> Option<(i64, usize, usize, usize, Vec<usize>)> {
        while let Some((gain, Reverse(element), Reverse(dest))) = self.heap.pop() {
            let src = self.element_clusters[element];
            self.element_moves.insert((element, dest), None);

            if self.locked.contains(&element) || self.deleted.contains(&dest) {
                continue;
            }

            let simple_gain = self.gain_simple(element, dest);
            if simple_gain <= 0 {
                continue;
            }

            let update_list = self.element_update_list(graph, element, dest);
            let updated_gain = self.gain_correction_fast(simple_gain, &update_list);

            if updated_gain < gain {
                if updated_gain > 0 {
                    self.element_moves.insert((element, dest), Some(updated_gain));
                    self.heap.push((updated_gain, Reverse(element), Reverse(dest)));
                }
                continue;
            }

            return Some((updated_gain, element, src, dest, update_list));
        }

        None
    }

    fn gain_simple(&self, element: usize, dest: usize) -> i64 {
        self.weights.get(&(element, dest)).copied().unwrap_or(0)
            - self
                .weights
                .get(&(element, self.element_clusters[element]))
                .copied()
                .unwrap_or(0)
    }

    /// Subtracts the weight each dragged column loses, bailing out early
    /// once the move cannot pay for itself.
    fn gain_correction_fast(&self, mut gain: i64, update_list: &[usize]) -> i64 {
        for &item in update_list {
            gain -= self
                .weights
                .get(&(item, self.element_clusters[item]))
                .copied()
                .unwrap_or(0);
            if gain < 0 {
                return gain;
            }
        }
        gain
    }

    /// Same-subalignment columns sitting in clusters strictly between
    /// the element's cluster and the destination; they must be dragged
    /// along to preserve the trace order.
    fn element_update_list(&self, graph: &AlignmentGraph, element: usize, dest: usize) -> Vec<usize> {
        let (asub, _) = graph.sub_pos(element);
        let mut update_list = Vec::new();

        let mut cur = self.element_clusters[element];
        while cur != dest {
            let step = if self.cluster_orders[cur] < self.cluster_orders[dest] {
                self.cluster_ll[cur].1
            } else {
                self.cluster_ll[cur].0
            };
            cur = match step {
                Some(next) => next,
                None => break,
            };
            if let Some(&e) = self.cluster_subs.get(&(cur, asub)) {
                update_list.push(e);
            }
        }

        update_list
    }

    fn update_neighbor_weights(
        &mut self,
        src: Option<usize>,
        dest: Option<usize>,
        nbrs: &[(usize, i64)],
    ) {
        for &(nbr, value) in nbrs {
            if let Some(src) = src {
                *self.weights.entry((nbr, src)).or_insert(0) -= value;
            }
            if let Some(dest) = dest {
                *self.weights.entry((nbr, dest)).or_insert(0) += value;
            }
        }
    }

    fn pull_neighbor_moves(&mut self, graph: &AlignmentGraph, dest: usize, nbrs: &[(usize, i64)]) {
        if self.deleted.contains(&dest) {
            return;
        }
        for &(nbr, _) in nbrs {
            if self.locked.contains(&nbr) || self.element_clusters[nbr] == dest {
                continue;
            }

            let gain = self.gain_simple(nbr, dest);
            let known = self.element_moves.get(&(nbr, dest)).copied().flatten();
            if known.map_or(true, |g| gain > g) {
                let update_list = self.element_update_list(graph, nbr, dest);
                let gain = self.gain_correction_fast(gain, &update_list);
                if gain >= 0 && known.map_or(true, |g| gain > g) {
                    self.element_moves.insert((nbr, dest), Some(gain));
                    self.heap.push((gain, Reverse(nbr), Reverse(dest)));
                }
            }
        }
    }

    fn move_element(&mut self, graph: &AlignmentGraph, element: usize, src: usize, dest: usize) {
        let (asub, _) = graph.sub_pos(element);
        self.clusters[src].remove(&element);
        self.clusters[dest].insert(element);
        self.element_clusters[element] = dest;
        if self.cluster_subs.get(&(src, asub)) == Some(&element) {
            self.cluster_subs.remove(&(src, asub));
        }
        self.cluster_subs.insert((dest, asub), element);
        if self.clusters[src].is_empty() {
            self.delete_cluster(src);
        }
        let nbrs = neighbor_list(graph, element);
        self.update_neighbor_weights(Some(src), Some(dest), &nbrs);
    }

    fn move_elements(
        &mut self,
        graph: &AlignmentGraph,
        element: usize,
        dest: usize,
        update_list: &[usize],
    ) {
        let src = self.element_clusters[element];
        let mut cur = dest;
        self.move_element(graph, element, src, dest);

        let forward = self.cluster_orders[dest] > self.cluster_orders[src];
        for &node in update_list {
            let (prev, next) = self.cluster_ll[cur];
            let idx = if forward {
                self.insert_cluster(Some(cur), next)
            } else {
                self.insert_cluster(prev, Some(cur))
            };
            let node_src = self.element_clusters[node];
            self.move_element(graph, node, node_src, idx);
            cur = idx;
        }
    }

    fn update_moves(
        &mut self,
        graph: &AlignmentGraph,
        element: usize,
        _src: usize,
        dest: usize,
        update_list: &[usize],
    ) {
        let nbrs: Vec<(usize, i64)> = neighbor_list(graph, element)
            .into_iter()
            .filter(|&(n, _)| self.gain_simple(n, dest) >= 0)
            .collect();
        self.pull_neighbor_moves(graph, dest, &nbrs);

        for &node in update_list {
            let cluster = self.element_clusters[node];
            let nbrs: Vec<(usize, i64)> = neighbor_list(graph, node)
                .into_iter()
                .filter(|&(n, _)| self.gain_simple(n, cluster) >= 0)
                .collect();
            self.pull_neighbor_moves(graph, cluster, &nbrs);
        }
    }

    fn insert_cluster(&mut self, prev: Option<usize>, next: Option<usize>) -> usize {
        self.clusters.push(FxHashSet::default());
        let idx = self.clusters.len() - 1;
        self.cluster_orders.push(self.middle_order(prev, next));
        self.cluster_ll.push((prev, next));
        if let Some(prev) = prev {
            self.cluster_ll[prev].1 = Some(idx);
        }
        if let Some(next) = next {
            self.cluster_ll[next].0 = Some(idx);
        }
        if prev.is_none() {
            self.head = Some(idx);
        }

        idx
    }

    fn delete_cluster(&mut self, cluster: usize) {
        self.deleted.insert(cluster);
        let (prev, next) = self.cluster_ll[cluster];
        if let Some(prev) = prev {
            self.cluster_ll[prev].1 = next;
        }
        if let Some(next) = next {
            self.cluster_ll[next].0 = prev;
        }
        if prev.is_none() {
            self.head = next;
        }
    }

    /// An order label strictly between its neighbors, extending the
    /// label vector only when needed.
    fn middle_order(&self, prev: Option<usize>, next: Option<usize>) -> Vec<i64> {
        let oa: &[i64] = prev.map(|p| self.cluster_orders[p].as_slice()).unwrap_or(&[]);
        let ob: &[i64] = next.map(|n| self.cluster_orders[n].as_slice()).unwrap_or(&[]);

        let mut order = oa.to_vec();
        match ob.len().cmp(&oa.len()) {
            std::cmp::Ordering::Equal => order.push(0),
            std::cmp::Ordering::Less => {
                if let Some(last) = order.last_mut() {
                    *last += 1;
                }
            }
            std::cmp::Ordering::Greater => order.push(ob[oa.len()] - 1),
        }

        order
    }

    fn ordered_clusters(&self) -> Vec<Vec<usize>> {
        let mut ordered = Vec::new();
        let mut cur = self.head;
        while let Some(i) = cur {
            if !self.clusters[i].is_empty() {
                let mut cluster: Vec<usize> = self.clusters[i].iter().copied().collect();
                cluster.sort_unstable();
                ordered.push(cluster);
            }
            cur = self.cluster_ll[i].1;
        }

        ordered
    }
}

fn neighbor_list(graph: &AlignmentGraph, element: usize) -> Vec<(usize, i64)> {
    let (asub, _) = graph.sub_pos(element);
    graph.matrix[element]
        .iter()
        .filter(|(&nbr, _)| graph.sub_pos(nbr).0 != asub)
        .map(|(&nbr, &value)| (nbr, value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::trace::verify_order;

    #[test]
    fn split_diagonal_is_rejoined() {
        let mut graph = AlignmentGraph::new(&[2, 2]);
        graph.accumulate(0, 2, 4);
        graph.accumulate(2, 0, 4);
        graph.accumulate(1, 3, 4);
        graph.accumulate(3, 1, 4);

        // a needlessly split trace: 0 and 2 belong together
        let clusters = vec![vec![0], vec![2], vec![1, 3]];
        let optimized = optimize_clusters(&graph, clusters);
        assert!(optimized.contains(&vec![0, 2]));
        assert!(optimized.contains(&vec![1, 3]));
        assert_eq!(graph.clustering_cost(&optimized), 0);
    }

    #[test]
    fn optimization_never_breaks_trace_order() {
        let mut graph = AlignmentGraph::new(&[3, 3]);
        graph.accumulate(0, 4, 3);
        graph.accumulate(4, 0, 3);
        graph.accumulate(1, 5, 2);
        graph.accumulate(5, 1, 2);
        graph.accumulate(2, 3, 1);
        graph.accumulate(3, 2, 1);

        let clusters: Vec<Vec<usize>> = (0..graph.size()).map(|n| vec![n]).collect();
        let optimized = optimize_clusters(&graph, clusters);
        graph.clusters = optimized;
        verify_order(&graph).unwrap();
    }

    #[test]
    fn optimized_cost_never_increases() {
        let mut graph = AlignmentGraph::new(&[2, 2]);
        graph.accumulate(0, 3, 5);
        graph.accumulate(3, 0, 5);
        graph.accumulate(1, 2, 1);
        graph.accumulate(2, 1, 1);

        let clusters: Vec<Vec<usize>> = (0..graph.size()).map(|n| vec![n]).collect();
        let before = graph.clustering_cost(&clusters);
        let optimized = optimize_clusters(&graph, clusters);
        assert!(graph.clustering_cost(&optimized) <= before);
    }
}
