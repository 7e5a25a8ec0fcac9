use anyhow::Context;
use fxhash::{FxHashMap, FxHashSet};
use std::io::{BufRead, Write};

pub type Cluster = Vec<usize>;

/// Sparse weighted graph over subalignment columns.
///
/// Every column of every subalignment is one node. Subalignment `i`
/// occupies the contiguous id range
/// `[subset_matrix_idx[i], subset_matrix_idx[i] + subalignment_lengths[i])`,
/// so a node id decomposes bijectively into (subalignment, position).
/// Edge weights accumulate homology evidence from backbone alignments;
/// both directions of an edge are stored explicitly (MCL input format).
pub struct AlignmentGraph {
    pub subalignment_lengths: Vec<usize>,
    pub subset_matrix_idx: Vec<usize>,
    pub mat_sub_pos_map: Vec<(usize, usize)>,
    pub matrix: Vec<FxHashMap<usize, i64>>,

    pub clusters: Vec<Cluster>,
    pub insertions: FxHashSet<usize>,

    /// Per node, per subalignment: cross-subalignment neighbors sorted by id.
    pub node_edges: Vec<Vec<Vec<(usize, i64)>>>,
}

impl AlignmentGraph {
    pub fn new(subalignment_lengths: &[usize]) -> Self {
        let mut subset_matrix_idx = vec![0; subalignment_lengths.len()];
        for k in 1..subalignment_lengths.len() {
            subset_matrix_idx[k] = subset_matrix_idx[k - 1] + subalignment_lengths[k - 1];
        }
        let size: usize = subalignment_lengths.iter().sum();

        let mut mat_sub_pos_map = Vec::with_capacity(size);
        for (k, &len) in subalignment_lengths.iter().enumerate() {
            for j in 0..len {
                mat_sub_pos_map.push((k, j));
            }
        }

        Self {
            subalignment_lengths: subalignment_lengths.to_vec(),
            subset_matrix_idx,
            mat_sub_pos_map,
            matrix: vec![FxHashMap::default(); size],
            clusters: Vec::new(),
            insertions: FxHashSet::default(),
            node_edges: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.mat_sub_pos_map.len()
    }

    /// Number of subalignments.
    pub fn k(&self) -> usize {
        self.subalignment_lengths.len()
    }

    pub fn node(&self, sub: usize, pos: usize) -> usize {
        self.subset_matrix_idx[sub] + pos
    }

    pub fn sub_pos(&self, node: usize) -> (usize, usize) {
        self.mat_sub_pos_map[node]
    }

    pub fn lower_bound(&self) -> Vec<usize> {
        self.subset_matrix_idx.clone()
    }

    pub fn upper_bound(&self) -> Vec<usize> {
        (0..self.k())
            .map(|i| self.subset_matrix_idx[i] + self.subalignment_lengths[i])
            .collect()
    }

    pub fn weight(&self, a: usize, b: usize) -> i64 {
        self.matrix[a].get(&b).copied().unwrap_or(0)
    }

    pub fn accumulate(&mut self, a: usize, b: usize, delta: i64) {
        *self.matrix[a].entry(b).or_insert(0) += delta;
    }

    /// Renders a frontier/cut vector with positions relative to each
    /// subalignment's node range. Diagnostics only.
    pub fn cut_string(&self, cut: &[usize]) -> String {
        let relative: Vec<String> = cut
            .iter()
            .enumerate()
            .map(|(i, &value)| (value - self.subset_matrix_idx[i]).to_string())
            .collect();
        format!("[{}]", relative.join(", "))
    }

    pub fn write_graph(&self, path: &str) -> anyhow::Result<()> {
        crate::libs::io::atomic_write(path, |writer| {
            for (i, row) in self.matrix.iter().enumerate() {
                for (k, value) in row {
                    writer.write_fmt(format_args!("{} {} {}\n", i, k, value))?;
                }
            }
            Ok(())
        })?;
        log::info!("Wrote graph to {}", path);

        Ok(())
    }

    pub fn read_graph(&mut self, path: &str) -> anyhow::Result<()> {
        self.matrix = vec![FxHashMap::default(); self.size()];
        let reader = crate::reader(path);
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let parse = |t: Option<&str>| -> anyhow::Result<i64> {
                t.ok_or_else(|| anyhow::anyhow!("missing field"))?
                    .parse::<i64>()
                    .map_err(Into::into)
            };
            let (a, b, value) = (parse(tokens.next()), parse(tokens.next()), parse(tokens.next()));
            match (a, b, value) {
                (Ok(a), Ok(b), Ok(value)) => {
                    self.matrix[a as usize].insert(b as usize, value);
                }
                _ => anyhow::bail!("malformed edge at {}:{}: {}", path, lineno + 1, line),
            }
        }
        log::info!("Read graph from {}", path);

        Ok(())
    }

    pub fn write_clusters(&self, path: &str) -> anyhow::Result<()> {
        crate::libs::io::atomic_write(path, |writer| {
            for cluster in &self.clusters {
                let line: Vec<String> = cluster.iter().map(|n| n.to_string()).collect();
                writer.write_fmt(format_args!("{}\n", line.join(" ")))?;
            }
            Ok(())
        })?;
        log::info!("Wrote {} clusters to {}", self.clusters.len(), path);

        Ok(())
    }

    /// Reads a cluster file, dropping singleton lines. Singletons carry no
    /// cross-subalignment information and are regenerated later by
    /// [`add_singleton_clusters`](Self::add_singleton_clusters).
    pub fn read_clusters(&mut self, path: &str) -> anyhow::Result<()> {
        self.clusters = Vec::new();
        let reader = crate::reader(path);
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let cluster: Cluster = line
                .split_whitespace()
                .map(|t| {
                    t.parse::<usize>()
                        .with_context(|| format!("malformed cluster at {}:{}", path, lineno + 1))
                })
                .collect::<anyhow::Result<_>>()?;
            if cluster.len() > 1 {
                self.clusters.push(cluster);
            }
        }
        log::info!("Found {} clusters in {}", self.clusters.len(), path);

        Ok(())
    }

    /// Cross-subalignment adjacency, partitioned by neighbor subalignment
    /// and sorted by neighbor id. The trace algorithms want range scans.
    pub fn build_node_edges(&mut self) {
        log::info!("Preparing node edge data structure..");
        let k = self.k();
        let mut node_edges = vec![vec![Vec::new(); k]; self.size()];

        for a in 0..self.size() {
            let (asub, _) = self.mat_sub_pos_map[a];
            for (&b, &value) in &self.matrix[a] {
                let (bsub, _) = self.mat_sub_pos_map[b];
                if asub == bsub {
                    continue;
                }
                node_edges[a][bsub].push((b, value));
            }
            for edges in node_edges[a].iter_mut() {
                edges.sort_unstable_by_key(|pair| pair.0);
            }
        }
        self.node_edges = node_edges;
    }

    /// Like [`build_node_edges`](Self::build_node_edges), but keeps only
    /// edges within pre-existing clusters, simplifying the graph.
    pub fn build_node_edges_from_clusters(&mut self) {
        log::info!(
            "Using {} pre-existing clusters to simplify the alignment graph..",
            self.clusters.len()
        );
        let k = self.k();
        let mut node_edges = vec![vec![Vec::new(); k]; self.size()];

        for cluster in &self.clusters {
            for &a in cluster {
                let (asub, _) = self.mat_sub_pos_map[a];
                for &b in cluster {
                    let (bsub, _) = self.mat_sub_pos_map[b];
                    if asub == bsub {
                        continue;
                    }
                    if let Some(&value) = self.matrix[a].get(&b) {
                        node_edges[a][bsub].push((b, value));
                    }
                }
                for edges in node_edges[a].iter_mut() {
                    edges.sort_unstable_by_key(|pair| pair.0);
                }
            }
        }
        self.node_edges = node_edges;
    }

    /// Total weight of cross-subalignment edges cut by the clustering,
    /// counted once per unordered pair. Unclaimed nodes count as their own
    /// singleton clusters.
    pub fn clustering_cost(&self, clusters: &[Cluster]) -> i64 {
        let mut node_clusters = vec![usize::MAX; self.size()];
        for (n, cluster) in clusters.iter().enumerate() {
            for &a in cluster {
                node_clusters[a] = n;
            }
        }
        let mut counter = clusters.len();
        for a in 0..self.size() {
            if node_clusters[a] == usize::MAX {
                node_clusters[a] = counter;
                counter += 1;
            }
        }

        let mut cut_cost = 0;
        for a in 0..self.size() {
            let (asub, _) = self.mat_sub_pos_map[a];
            for (&b, &value) in &self.matrix[a] {
                let (bsub, _) = self.mat_sub_pos_map[b];
                if asub != bsub && node_clusters[a] != node_clusters[b] {
                    cut_cost += value;
                }
            }
        }

        cut_cost / 2
    }

    /// Interleaves explicit singleton clusters for every column the trace
    /// does not mention, preserving the trace order. Afterwards every node
    /// belongs to exactly one cluster.
    pub fn add_singleton_clusters(&mut self) {
        let mut new_clusters = Vec::new();
        let mut last_idx = self.subset_matrix_idx.clone();

        for cluster in &self.clusters {
            for &a in cluster {
                let (asub, _) = self.mat_sub_pos_map[a];
                for node in last_idx[asub]..a {
                    new_clusters.push(vec![node]);
                }
                last_idx[asub] = a + 1;
            }
            new_clusters.push(cluster.clone());
        }
        for i in 0..self.k() {
            for node in last_idx[i]..self.subset_matrix_idx[i] + self.subalignment_lengths[i] {
                new_clusters.push(vec![node]);
            }
        }

        self.clusters = new_clusters;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_3_4_2() -> AlignmentGraph {
        AlignmentGraph::new(&[3, 4, 2])
    }

    #[test]
    fn node_bijection_round_trip() {
        let graph = graph_3_4_2();
        assert_eq!(graph.size(), 9);
        for n in 0..graph.size() {
            let (s, p) = graph.sub_pos(n);
            assert_eq!(graph.node(s, p), n);
        }
        assert_eq!(graph.sub_pos(0), (0, 0));
        assert_eq!(graph.sub_pos(3), (1, 0));
        assert_eq!(graph.sub_pos(8), (2, 1));
    }

    #[test]
    fn matrix_symmetry() {
        let mut graph = graph_3_4_2();
        graph.accumulate(0, 3, 2);
        graph.accumulate(3, 0, 2);
        graph.accumulate(0, 3, 1);
        graph.accumulate(3, 0, 1);
        for a in 0..graph.size() {
            for (&b, &w) in &graph.matrix[a] {
                assert_eq!(graph.weight(b, a), w);
            }
        }
    }

    #[test]
    fn graph_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.txt").to_str().unwrap().to_string();

        let mut graph = graph_3_4_2();
        graph.accumulate(0, 3, 5);
        graph.accumulate(3, 0, 5);
        graph.accumulate(1, 7, 2);
        graph.accumulate(7, 1, 2);
        graph.write_graph(&path).unwrap();

        let mut back = graph_3_4_2();
        back.read_graph(&path).unwrap();
        assert_eq!(back.weight(0, 3), 5);
        assert_eq!(back.weight(3, 0), 5);
        assert_eq!(back.weight(7, 1), 2);
    }

    #[test]
    fn malformed_graph_line_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.txt");
        std::fs::write(&path, "0 3 5\n1 not_a_number 2\n").unwrap();

        let mut graph = graph_3_4_2();
        assert!(graph.read_graph(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn clustering_cost_counts_cut_pairs_once() {
        let mut graph = graph_3_4_2();
        // 0-3 together, 1-4 cut
        graph.accumulate(0, 3, 4);
        graph.accumulate(3, 0, 4);
        graph.accumulate(1, 4, 3);
        graph.accumulate(4, 1, 3);

        let clusters = vec![vec![0, 3], vec![1], vec![4]];
        assert_eq!(graph.clustering_cost(&clusters), 3);

        let merged = vec![vec![0, 3], vec![1, 4]];
        assert_eq!(graph.clustering_cost(&merged), 0);
    }

    #[test]
    fn singleton_completion_partitions_all_nodes() {
        let mut graph = graph_3_4_2();
        graph.clusters = vec![vec![1, 4], vec![2, 6, 8]];
        graph.add_singleton_clusters();

        let mut seen = vec![0usize; graph.size()];
        for cluster in &graph.clusters {
            for &n in cluster {
                seen[n] += 1;
            }
        }
        assert!(seen.iter().all(|&c| c == 1));

        // order within each subalignment is preserved
        let mut frontiers = vec![0usize; graph.k()];
        for cluster in &graph.clusters {
            for &n in cluster {
                let (s, p) = graph.sub_pos(n);
                assert!(p >= frontiers[s]);
                frontiers[s] = p + 1;
            }
        }
    }
}
