use fxhash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use crate::libs::graph::AlignmentGraph;

/// Minimum-weight trace by cycle elimination: a clustering violates the
/// trace invariant exactly when the mixed graph of homology edges and
/// column-order arcs has a cycle, so edges are removed until no cycle
/// remains. Greedy variant removes the lightest edge of each cycle
/// found; the heuristic variant searches over removal choices.

type Edge = (usize, usize);

fn edge(a: usize, b: usize) -> Edge {
    (a.min(b), a.max(b))
}

pub fn mwt_greedy_search(graph: &mut AlignmentGraph) -> anyhow::Result<()> {
    log::info!("Finding graph trace with MWT greedy search..");
    prepare_node_edges(graph);

    let mut ctx = MwtContext::new(&graph.lower_bound(), &graph.upper_bound());
    let mut state = MwtState::new(&ctx);
    let (clusters, _cost) = greedy_search(graph, &mut state, &mut ctx)?;
    graph.clusters = clusters;

    Ok(())
}

pub fn mwt_heuristic_search(graph: &mut AlignmentGraph, heap_limit: usize) -> anyhow::Result<()> {
    log::info!("Finding graph trace with MWT heuristic search..");
    prepare_node_edges(graph);

    let (clusters, _cost) = heuristic_search(graph, heap_limit)?;
    graph.clusters = clusters;

    Ok(())
}

fn prepare_node_edges(graph: &mut AlignmentGraph) {
    if graph.clusters.is_empty() {
        graph.build_node_edges();
    } else {
        graph.build_node_edges_from_clusters();
    }
}

fn heuristic_search(
    graph: &AlignmentGraph,
    heap_limit: usize,
) -> anyhow::Result<(Vec<Vec<usize>>, i64)> {
    let mut ctx = MwtContext::new(&graph.lower_bound(), &graph.upper_bound());
    let start = MwtState::new(&ctx);

    let mut heap: BinaryHeap<HeapItem> = BinaryHeap::new();
    let mut visited: FxHashSet<(Vec<usize>, Vec<Edge>)> = FxHashSet::default();
    let mut max_frontier_state = start.clone();
    heap.push(HeapItem::new(start));

    while !heap.is_empty() {
        if heap.len() > heap_limit {
            log::info!("Heap limit exceeded, clearing heap and moving to max frontier..");
            heap.clear();
            visited.clear();
            heap.push(HeapItem::new(max_frontier_state.clone()));
        }

        let mut state = match heap.pop() {
            Some(item) => item.state,
            None => break,
        };

        let mut new_max = false;
        let mut new_full = true;
        for i in 0..state.frontier.len() {
            match state.frontier[i].cmp(&ctx.max_frontier[i]) {
                Ordering::Greater => new_max = true,
                Ordering::Equal => new_full = false,
                Ordering::Less => {
                    new_max = false;
                    new_full = false;
                    break;
                }
            }
        }
        if new_max {
            ctx.max_frontier = state.frontier.clone();
            max_frontier_state = state.clone();
        }
        if new_full {
            // every other state is strictly behind, nothing to revisit
            heap.clear();
            visited.clear();
        }

        let percent = ctx.bound_percent(&state.frontier);
        if percent / 10 > ctx.percent_done / 10 {
            ctx.percent_done = percent;
            log::info!(
                "{}% done, {} cost, {} edges removed..",
                percent,
                state.cost,
                state.removed.len()
            );
            log::info!("Max frontier {}..", graph.cut_string(&ctx.max_frontier));
        }

        let moves = find_moves(graph, &mut state, &mut ctx, 1)?;
        if moves.is_empty() {
            state.frontier = ctx.lower_bound.clone();
            return match find_cycle_or_cluster(graph, &mut state, &ctx)? {
                CycleOrClusters::Clusters(ordered) => Ok((ordered, state.cost)),
                CycleOrClusters::Cycle(_) => {
                    anyhow::bail!("cycle left in graph after all moves exhausted")
                }
            };
        }

        for next in moves {
            let mut removed_key: Vec<Edge> = next.frontier_removed.iter().copied().collect();
            removed_key.sort_unstable();
            if visited.insert((next.frontier.clone(), removed_key)) {
                heap.push(HeapItem::new(next));
            }
        }
    }

    log::info!("Heap empty, resorting to greedy search..");
    let mut ctx = MwtContext::new(&graph.lower_bound(), &graph.upper_bound());
    let mut state = MwtState::new(&ctx);
    greedy_search(graph, &mut state, &mut ctx)
}

/// One search step: the edges of the next cycle found are the candidate
/// removals, each producing a successor state. Once enough edges have
/// been removed at the same frontier, greedy progress is forced first.
fn find_moves(
    graph: &AlignmentGraph,
    state: &mut MwtState,
    ctx: &mut MwtContext,
    frontier_search_depth: usize,
) -> anyhow::Result<Vec<MwtState>> {
    if state.frontier_removed.len() >= frontier_search_depth {
        find_greedy_progress(graph, state, ctx)?;
    }

    let old_frontier = state.frontier.clone();
    match find_cycle_or_cluster(graph, state, ctx)? {
        CycleOrClusters::Clusters(_) => Ok(Vec::new()),
        CycleOrClusters::Cycle(edges) => {
            let same_frontier = old_frontier == state.frontier;
            let mut moves = Vec::new();
            for e in edges {
                let mut next = state.clone();
                ctx.state_counter += 1;
                next.count = ctx.state_counter;
                next.removed.insert(e);
                next.cost += graph.weight(e.0, e.1);
                if same_frontier {
                    next.frontier_removed.insert(e);
                } else {
                    next.frontier_removed = FxHashSet::default();
                    next.frontier_removed.insert(e);
                }
                moves.push(next);
            }
            Ok(moves)
        }
    }
}

fn find_greedy_progress(
    graph: &AlignmentGraph,
    state: &mut MwtState,
    ctx: &mut MwtContext,
) -> anyhow::Result<()> {
    state.frontier_removed.clear();
    let old_frontier = state.frontier.clone();

    loop {
        let result = find_cycle_or_cluster(graph, state, ctx)?;
        if old_frontier != state.frontier {
            return Ok(());
        }
        match result {
            CycleOrClusters::Clusters(_) => return Ok(()),
            CycleOrClusters::Cycle(edges) => {
                let e = min_weight_edge(graph, &edges)?;
                state.removed.insert(e);
                state.cost += graph.weight(e.0, e.1);
            }
        }
    }
}

fn greedy_search(
    graph: &AlignmentGraph,
    state: &mut MwtState,
    ctx: &mut MwtContext,
) -> anyhow::Result<(Vec<Vec<usize>>, i64)> {
    loop {
        match find_cycle_or_cluster(graph, state, ctx)? {
            CycleOrClusters::Clusters(_) => break,
            CycleOrClusters::Cycle(edges) => {
                let percent = ctx.bound_percent(&state.frontier);
                if percent / 10 > ctx.percent_done / 10 {
                    ctx.max_frontier = state.frontier.clone();
                    ctx.percent_done = percent;
                    log::info!(
                        "{}% done, {} cost, {} edges removed..",
                        percent,
                        state.cost,
                        state.removed.len()
                    );
                    log::info!("Frontier {}..", graph.cut_string(&ctx.max_frontier));
                }

                let e = min_weight_edge(graph, &edges)?;
                state.removed.insert(e);
                state.cost += graph.weight(e.0, e.1);
            }
        }
    }

    state.frontier = ctx.lower_bound.clone();
    match find_cycle_or_cluster(graph, state, ctx)? {
        CycleOrClusters::Clusters(ordered) => Ok((ordered, state.cost)),
        CycleOrClusters::Cycle(_) => anyhow::bail!("cycle found after greedy search converged"),
    }
}

fn min_weight_edge(graph: &AlignmentGraph, edges: &[Edge]) -> anyhow::Result<Edge> {
    edges
        .iter()
        .copied()
        .min_by_key(|e| graph.weight(e.0, e.1))
        .ok_or_else(|| anyhow::anyhow!("cycle without removable edges"))
}

enum CycleOrClusters {
    Cycle(Vec<Edge>),
    Clusters(Vec<Vec<usize>>),
}

enum Found {
    Cycle(Vec<Edge>),
    Cluster(Vec<usize>),
}

/// Grows connected clusters ahead of the frontier. Returns either the
/// fully ordered cluster list (frontier exhausted) or the edge set of a
/// cycle blocking progress. Advances `state.frontier` past every cluster
/// it manages to order.
fn find_cycle_or_cluster(
    graph: &AlignmentGraph,
    state: &mut MwtState,
    ctx: &MwtContext,
) -> anyhow::Result<CycleOrClusters> {
    let k = graph.k();

    let mut cur_cluster: Option<usize> = None;
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut ordered: Vec<Vec<usize>> = Vec::new();
    // cluster -> (parent cluster, frontier node it grew from, blocking node)
    let mut back_pointers: FxHashMap<usize, (Option<usize>, usize, Option<usize>)> =
        FxHashMap::default();
    let mut node_clusters: FxHashMap<usize, usize> = FxHashMap::default();

    loop {
        let mut lower_node: Option<usize> = None;
        let mut upper_node: Option<usize> = None;

        match cur_cluster {
            None => {
                for i in 0..k {
                    if state.frontier[i] < ctx.upper_bound[i] {
                        lower_node = Some(state.frontier[i]);
                        break;
                    }
                }
                if lower_node.is_none() {
                    return Ok(CycleOrClusters::Clusters(ordered));
                }
            }
            Some(cur) => {
                for idx in 0..clusters[cur].len() {
                    let node = clusters[cur][idx];
                    let (asub, _) = graph.sub_pos(node);
                    if node > state.frontier[asub] {
                        lower_node = Some(state.frontier[asub]);
                        upper_node = Some(node);

                        if let Some(&other) = node_clusters.get(&state.frontier[asub]) {
                            // the blocked-on node sits in an already-found
                            // cluster: stitch the cycle together from the
                            // paths between cluster entry points
                            let mut path = Vec::new();
                            let mut walk = cur;
                            let mut start_node = node;
                            while walk != other {
                                let (prev, lower, upper) = back_pointers[&walk];
                                if let Some(segment) = find_path_bfs(
                                    graph,
                                    &state.frontier,
                                    &ctx.upper_bound,
                                    &state.removed,
                                    start_node,
                                    lower,
                                ) {
                                    path.extend(segment);
                                }
                                walk = match prev {
                                    Some(p) => p,
                                    None => break,
                                };
                                if let Some(u) = upper {
                                    start_node = u;
                                }
                            }
                            if let Some(segment) = find_path_bfs(
                                graph,
                                &state.frontier,
                                &ctx.upper_bound,
                                &state.removed,
                                start_node,
                                state.frontier[asub],
                            ) {
                                path.extend(segment);
                            }
                            path.sort_unstable();
                            path.dedup();
                            return Ok(CycleOrClusters::Cycle(path));
                        }
                    }
                }

                if lower_node.is_none() {
                    // nothing ahead of the frontier blocks this cluster
                    for idx in 0..clusters[cur].len() {
                        let (asub, _) = graph.sub_pos(clusters[cur][idx]);
                        state.frontier[asub] += 1;
                    }
                    clusters[cur].sort_unstable();
                    ordered.push(clusters[cur].clone());
                    cur_cluster = back_pointers.get(&cur).and_then(|bp| bp.0);
                    continue;
                }
            }
        }

        let start = lower_node.ok_or_else(|| anyhow::anyhow!("frontier scan found no node"))?;
        match find_cycle_or_cluster_from_node(graph, state, ctx, start) {
            Found::Cycle(edges) => return Ok(CycleOrClusters::Cycle(edges)),
            Found::Cluster(nodes) => {
                clusters.push(nodes);
                let idx = clusters.len() - 1;
                for &node in &clusters[idx] {
                    node_clusters.insert(node, idx);
                }
                back_pointers.insert(idx, (cur_cluster, start, upper_node));
                cur_cluster = Some(idx);
            }
        }
    }
}

/// Floods the connected component of `node` ahead of the frontier. Two
/// columns of the same subalignment in one component, or two live edges
/// into the same subalignment from one node, witness a cycle.
fn find_cycle_or_cluster_from_node(
    graph: &AlignmentGraph,
    state: &MwtState,
    ctx: &MwtContext,
    node: usize,
) -> Found {
    let k = graph.k();
    let (nsub, _) = graph.sub_pos(node);

    let mut stack = vec![node];
    let mut cluster_nodes: FxHashSet<usize> = FxHashSet::default();
    cluster_nodes.insert(node);
    let mut seq_positions: FxHashMap<usize, usize> = FxHashMap::default();
    seq_positions.insert(nsub, node);
    let mut back_pointers: FxHashMap<usize, usize> = FxHashMap::default();

    while let Some(cur) = stack.pop() {
        for j in 0..k {
            let mut sibling: Option<usize> = None;
            for &(nbr, _) in &graph.node_edges[cur][j] {
                if cluster_nodes.contains(&nbr)
                    || state.removed.contains(&edge(cur, nbr))
                    || nbr < state.frontier[j]
                    || nbr >= ctx.upper_bound[j]
                {
                    continue;
                }
                if let Some(sib) = sibling {
                    return Found::Cycle(vec![edge(sib, cur), edge(cur, nbr)]);
                }
                sibling = Some(nbr);

                cluster_nodes.insert(nbr);
                back_pointers.insert(nbr, cur);

                if let Some(&seen) = seq_positions.get(&j) {
                    // walk both nodes back to the root; the symmetric
                    // difference of the two walks is the cycle
                    let mut path: FxHashSet<Edge> = FxHashSet::default();
                    let mut c = nbr;
                    while let Some(&prev) = back_pointers.get(&c) {
                        path.insert(edge(c, prev));
                        c = prev;
                    }
                    let mut c = seen;
                    while let Some(&prev) = back_pointers.get(&c) {
                        let e = edge(c, prev);
                        if !path.remove(&e) {
                            path.insert(e);
                        }
                        c = prev;
                    }
                    return Found::Cycle(path.into_iter().collect());
                }

                seq_positions.insert(j, nbr);
                stack.push(nbr);
            }
        }
    }

    Found::Cluster(cluster_nodes.into_iter().collect())
}

fn find_path_bfs(
    graph: &AlignmentGraph,
    lower_bound: &[usize],
    upper_bound: &[usize],
    removed: &FxHashSet<Edge>,
    node_a: usize,
    node_b: usize,
) -> Option<Vec<Edge>> {
    let k = graph.k();
    let (asub, _) = graph.sub_pos(node_a);
    let (bsub, _) = graph.sub_pos(node_b);

    let mut queue: VecDeque<(usize, FxHashSet<usize>)> = VecDeque::new();
    let mut levels = FxHashSet::default();
    levels.insert(asub);
    queue.push_back((node_a, levels));
    let mut visited: FxHashSet<usize> = FxHashSet::default();
    visited.insert(node_a);
    let mut back_pointers: FxHashMap<usize, usize> = FxHashMap::default();

    while let Some((cur, levels)) = queue.pop_front() {
        for j in 0..k {
            if levels.contains(&j) && j != bsub {
                continue;
            }
            for &(nbr, _) in &graph.node_edges[cur][j] {
                if visited.contains(&nbr)
                    || removed.contains(&edge(cur, nbr))
                    || nbr < lower_bound[j]
                    || nbr >= upper_bound[j]
                {
                    continue;
                }
                visited.insert(nbr);
                back_pointers.insert(nbr, cur);

                let mut next_levels = levels.clone();
                next_levels.insert(j);
                queue.push_back((nbr, next_levels));

                if nbr == node_b {
                    let mut path = Vec::new();
                    let mut c = nbr;
                    while c != node_a {
                        let prev = back_pointers[&c];
                        path.push(edge(c, prev));
                        c = prev;
                    }
                    return Some(path);
                }
            }
        }
    }

    None
}

struct MwtContext {
    num_nodes: usize,
    percent_done: i64,
    max_frontier: Vec<usize>,
    lower_bound: Vec<usize>,
    upper_bound: Vec<usize>,
    state_counter: u64,
}

impl MwtContext {
    fn new(lower_bound: &[usize], upper_bound: &[usize]) -> Self {
        let num_nodes = lower_bound
            .iter()
            .zip(upper_bound)
            .map(|(&l, &u)| u - l)
            .sum();
        Self {
            num_nodes,
            percent_done: 0,
            max_frontier: lower_bound.to_vec(),
            lower_bound: lower_bound.to_vec(),
            upper_bound: upper_bound.to_vec(),
            state_counter: 0,
        }
    }

    fn bound_percent(&self, bound: &[usize]) -> i64 {
        if self.num_nodes == 0 {
            return 100;
        }
        let progress: usize = bound
            .iter()
            .zip(&self.lower_bound)
            .map(|(&b, &l)| b - l)
            .sum();
        (100 * progress / self.num_nodes) as i64
    }
}

#[derive(Clone)]
struct MwtState {
    frontier: Vec<usize>,
    removed: FxHashSet<Edge>,
    frontier_removed: FxHashSet<Edge>,
    cost: i64,
    count: u64,
}

impl MwtState {
    fn new(ctx: &MwtContext) -> Self {
        Self {
            frontier: ctx.lower_bound.clone(),
            removed: FxHashSet::default(),
            frontier_removed: FxHashSet::default(),
            cost: 0,
            count: 0,
        }
    }
}

struct HeapItem {
    state: MwtState,
}

impl HeapItem {
    fn new(state: MwtState) -> Self {
        Self { state }
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.state.cost == other.state.cost && self.state.count == other.state.count
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    // max-heap: smallest cost wins, newer states break ties
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .state
            .cost
            .cmp(&self.state.cost)
            .then(self.state.count.cmp(&other.state.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::trace::assert_complete_trace;

    fn crossing_graph() -> AlignmentGraph {
        // 0-3 (weight 5) crosses 1-2 (weight 1)
        let mut graph = AlignmentGraph::new(&[2, 2]);
        graph.accumulate(0, 3, 5);
        graph.accumulate(3, 0, 5);
        graph.accumulate(1, 2, 1);
        graph.accumulate(2, 1, 1);
        graph
    }

    #[test]
    fn greedy_removes_lighter_crossing_edge() {
        let mut graph = crossing_graph();
        mwt_greedy_search(&mut graph).unwrap();
        assert_complete_trace(&graph);
        assert!(graph.clusters.contains(&vec![0, 3]));
        assert!(!graph.clusters.contains(&vec![1, 2]));
    }

    #[test]
    fn heuristic_matches_greedy_on_small_conflict() {
        let mut graph = crossing_graph();
        mwt_heuristic_search(&mut graph, 100).unwrap();
        assert_complete_trace(&graph);
        assert!(graph.clusters.contains(&vec![0, 3]));
    }

    #[test]
    fn conflict_free_graph_keeps_all_edges() {
        let mut graph = AlignmentGraph::new(&[2, 2]);
        graph.accumulate(0, 2, 3);
        graph.accumulate(2, 0, 3);
        graph.accumulate(1, 3, 3);
        graph.accumulate(3, 1, 3);
        mwt_greedy_search(&mut graph).unwrap();
        assert_complete_trace(&graph);
        assert_eq!(graph.clusters, vec![vec![0, 2], vec![1, 3]]);
    }
}
