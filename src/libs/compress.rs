use anyhow::Context;
use fxhash::{FxHashMap, FxHashSet};
use itertools::Itertools;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::BufRead;

use crate::libs::config::Config;
use crate::libs::context::MergeContext;
use crate::libs::fasta;
use crate::libs::graph::AlignmentGraph;
use crate::libs::io;
use crate::libs::tasks::{Task, TaskRunner};

/// When the final alignment would blow past the cell budget, merges
/// lightly-populated trace clusters into their predecessors. Merged
/// columns become insertions: their letters survive in lowercase, but
/// they no longer assert homology.
pub fn compress_alignment(
    config: &Config,
    context: &MergeContext,
    graph: &mut AlignmentGraph,
    runner: &TaskRunner,
) -> anyhow::Result<()> {
    let num_cells = context.total_sequences() * graph.clusters.len();
    log::info!("Uncompressed alignment will have {} cells..", num_cells);
    if num_cells as f64 <= config.cell_budget() {
        return Ok(());
    }
    log::info!(
        "Alignment will be more than {} Gigs, compressing..",
        config.alignment_size_limit_gb
    );

    let (compressions, num_letters) = build_compressions(config, context, graph, runner)?;
    let start_cols = graph.clusters.len();
    let start_homs = count_homologies(&graph.clusters, &num_letters, &FxHashSet::default());

    let (clusters, insertions) = compress_clusters(
        context.total_sequences(),
        graph.clusters.clone(),
        &compressions,
        &num_letters,
        config.cell_budget(),
    );

    let end_cols = clusters.len();
    let end_homs = count_homologies(&clusters, &num_letters, &insertions);
    log::info!(
        "Uncompressed alignment has {} columns and {} homologous pairs..",
        start_cols,
        start_homs
    );
    log::info!(
        "Compressed alignment has {} columns and {} homologous pairs..",
        end_cols,
        end_homs
    );
    log::info!(
        "{}% columns and {}% homologous pairs lost..",
        100.0 * (start_cols - end_cols) as f64 / start_cols as f64,
        100.0 * (start_homs - end_homs) as f64 / start_homs.max(1) as f64
    );
    log::info!(
        "Compressed alignment will have {} cells..",
        context.total_sequences() * clusters.len()
    );

    graph.clusters = clusters;
    graph.insertions = insertions;

    Ok(())
}

/// Scans one subalignment column by column. Emits the letter count per
/// column and, per column, the set of predecessor columns it depends on:
/// the previous non-gap column of every sequence with a letter here.
pub fn compress_subalignment(subalignment: &str, output: &str) -> anyhow::Result<()> {
    let alignment = fasta::read_fasta(subalignment, false)?;
    let length = fasta::alignment_length(&alignment);
    let rows: Vec<&[u8]> = alignment.values().map(|seq| seq.as_bytes()).collect();

    let mut num_letters = vec![0usize; length];
    let mut compressions: Vec<Vec<usize>> = vec![Vec::new(); length];
    let mut last_idx = vec![-1i64; rows.len()];
    for i in 0..length {
        let mut dest: FxHashSet<usize> = FxHashSet::default();
        for (r, row) in rows.iter().enumerate() {
            if row[i] != b'-' {
                num_letters[i] += 1;
                if last_idx[r] >= 0 {
                    dest.insert(last_idx[r] as usize);
                }
                last_idx[r] = i as i64;
            }
        }
        let mut dest: Vec<usize> = dest.into_iter().collect();
        dest.sort_unstable();
        compressions[i] = dest;
    }

    io::atomic_write(output, |w| {
        writeln!(w, "{}", num_letters.iter().join(" "))?;
        for dest in &compressions {
            writeln!(w, "{}", dest.iter().join(" "))?;
        }
        Ok(())
    })
}

/// Runs the compression scans in parallel, one per subalignment, and
/// folds the results into node-indexed tables.
fn build_compressions(
    config: &Config,
    context: &MergeContext,
    graph: &AlignmentGraph,
    runner: &TaskRunner,
) -> anyhow::Result<(Vec<Vec<usize>>, Vec<usize>)> {
    let mut tasks = Vec::new();
    for path in &context.subalignment_paths {
        let output = config.path(&format!("compression_{}.txt", io::file_stem(path)));
        tasks.push(Task::CompressSubalignment {
            subalignment: path.clone(),
            output,
        });
    }

    let path_sub: FxHashMap<&str, usize> = context
        .subalignment_paths
        .iter()
        .enumerate()
        .map(|(i, p)| (p.as_str(), i))
        .collect();

    let mut compressions: Vec<Vec<usize>> = vec![Vec::new(); graph.size()];
    let mut num_letters = vec![0usize; graph.size()];
    runner.for_each_completed(tasks, |task| {
        if let Task::CompressSubalignment {
            subalignment,
            output,
        } = &task
        {
            let sub = path_sub[subalignment.as_str()];
            let reader = crate::reader(output);
            let mut lines = reader.lines();
            let counts = lines
                .next()
                .transpose()?
                .with_context(|| format!("empty compression file {}", output))?;
            for (i, token) in counts.split_whitespace().enumerate() {
                num_letters[graph.node(sub, i)] = token.parse()?;
            }
            for (i, line) in lines.enumerate() {
                let line = line?;
                compressions[graph.node(sub, i)] = line
                    .split_whitespace()
                    .map(|token| Ok(graph.node(sub, token.parse::<usize>()?)))
                    .collect::<anyhow::Result<Vec<usize>>>()?;
            }
        }
        Ok(())
    })?;

    Ok((compressions, num_letters))
}

/// Greedy cluster folding, lightest clusters first: a cluster may fold
/// into the nearest non-empty predecessor when none of its columns
/// depends on a column already sitting there, walking dependency chains
/// of earlier insertions out of the way where possible.
pub fn compress_clusters(
    total_sequences: usize,
    clusters: Vec<Vec<usize>>,
    compressions: &[Vec<usize>],
    num_letters: &[usize],
    threshold: f64,
) -> (Vec<Vec<usize>>, FxHashSet<usize>) {
    let start_count = clusters.len();
    let mut clusters: Vec<FxHashSet<usize>> =
        clusters.into_iter().map(|c| c.into_iter().collect()).collect();
    let mut insertions: FxHashSet<usize> = FxHashSet::default();
    let mut num_cells = (total_sequences * clusters.len()) as f64;

    let mut sub_idx_map = vec![0usize; compressions.len()];
    let mut letters_map = vec![0i64; clusters.len()];
    let mut heap: BinaryHeap<Reverse<(i64, usize)>> = BinaryHeap::new();
    let mut heap_set: FxHashSet<usize> = FxHashSet::default();

    let mut back_compressions: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
    for (a, aset) in compressions.iter().enumerate() {
        for &b in aset {
            back_compressions.entry(b).or_default().push(a);
        }
    }

    for (idx, cluster) in clusters.iter().enumerate() {
        for &b in cluster {
            letters_map[idx] += num_letters[b] as i64;
            sub_idx_map[b] = idx;
        }

        let mut dest = 0;
        'outer: for &b in cluster {
            for &cb in &compressions[b] {
                dest = dest.max(sub_idx_map[cb] + 1);
                if dest >= idx {
                    break 'outer;
                }
            }
        }
        if dest < idx {
            heap.push(Reverse((letters_map[idx], idx)));
            heap_set.insert(idx);
        }
    }

    while num_cells > threshold {
        let Some(Reverse((_letters, idx))) = heap.pop() else {
            break;
        };
        heap_set.remove(&idx);

        let mut dest = idx - 1;
        while clusters[dest].is_empty() {
            dest -= 1;
        }

        let mut members: Vec<usize> = clusters[idx].iter().copied().collect();
        members.sort_unstable();

        let mut movable = true;
        let mut dest_map: FxHashMap<usize, usize> = FxHashMap::default();
        'members: for &b in &members {
            let mut stack = vec![(b, dest)];
            while let Some((cur_node, cur_dest)) = stack.pop() {
                dest_map.insert(cur_node, cur_dest);

                for &cb in &compressions[cur_node] {
                    if sub_idx_map[cb] == cur_dest {
                        if !insertions.contains(&cb) || cur_dest == 0 {
                            movable = false;
                            break 'members;
                        }
                        // an earlier insertion can be displaced further back
                        let mut cd = cur_dest - 1;
                        while clusters[cd].is_empty() {
                            cd -= 1;
                        }
                        stack.push((cb, cd));
                    }
                }
            }
        }

        if !movable {
            continue;
        }

        num_cells -= total_sequences as f64;
        for &b in &members {
            insertions.insert(b);
            if let Some(nexts) = back_compressions.get(&b) {
                for &nxt in nexts {
                    let nbr = sub_idx_map[nxt];
                    if !clusters[nbr].is_empty() && heap_set.insert(nbr) {
                        heap.push(Reverse((letters_map[nbr], nbr)));
                    }
                }
            }
        }
        for (&b, &dest) in &dest_map {
            clusters[sub_idx_map[b]].remove(&b);
            clusters[dest].insert(b);
            sub_idx_map[b] = dest;
        }
    }

    let mut new_clusters: Vec<Vec<usize>> = clusters
        .into_iter()
        .filter(|c| !c.is_empty())
        .map(|c| {
            let mut cluster: Vec<usize> = c.into_iter().collect();
            cluster.sort_unstable();
            cluster
        })
        .collect();
    for cluster in new_clusters.iter_mut() {
        if cluster.len() == 1 {
            insertions.remove(&cluster[0]);
        }
    }

    log::info!(
        "Compressed from {} clusters to {} clusters..",
        start_count,
        new_clusters.len()
    );
    (new_clusters, insertions)
}

/// Homologous letter pairs asserted by a clustering, insertions excluded.
pub fn count_homologies(
    clusters: &[Vec<usize>],
    num_letters: &[usize],
    insertions: &FxHashSet<usize>,
) -> u64 {
    let mut homs = 0u64;
    for cluster in clusters {
        let letters: u64 = cluster
            .iter()
            .filter(|&&b| !insertions.contains(&b))
            .map(|&b| num_letters[b] as u64)
            .sum();
        if letters > 1 {
            homs += letters * (letters - 1) / 2;
        }
    }

    homs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subalignment_scan_records_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub.fa");
        std::fs::write(&sub, ">a\nAC-T\n>b\nA-GT\n").unwrap();
        let output = dir.path().join("compression_sub.txt");

        compress_subalignment(sub.to_str().unwrap(), output.to_str().unwrap()).unwrap();

        let content = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["2 1 1 2", "", "0", "0", "1 2"]);
    }

    #[test]
    fn light_cluster_folds_into_predecessor() {
        // one subalignment, a=AC--, b=--GT: column 2 opens a fresh
        // sequence, so it may slide left under pressure
        let compressions = vec![vec![], vec![0], vec![], vec![2]];
        let num_letters = vec![1, 1, 1, 1];
        let clusters = vec![vec![0], vec![1], vec![2], vec![3]];

        let (compressed, insertions) =
            compress_clusters(2, clusters, &compressions, &num_letters, 6.0);
        assert_eq!(compressed, vec![vec![0], vec![1, 2], vec![3]]);
        assert_eq!(insertions, [2].into_iter().collect());
    }

    #[test]
    fn generous_budget_leaves_clusters_alone() {
        let compressions = vec![vec![], vec![0], vec![], vec![2]];
        let num_letters = vec![1, 1, 1, 1];
        let clusters = vec![vec![0], vec![1], vec![2], vec![3]];

        let (compressed, insertions) =
            compress_clusters(2, clusters.clone(), &compressions, &num_letters, 100.0);
        assert_eq!(compressed, clusters);
        assert!(insertions.is_empty());
    }

    #[test]
    fn homology_count_skips_insertions() {
        let clusters = vec![vec![0, 2], vec![1, 3]];
        let num_letters = vec![2, 1, 3, 1];
        assert_eq!(count_homologies(&clusters, &num_letters, &FxHashSet::default()), 11);

        let insertions = [2].into_iter().collect();
        assert_eq!(count_homologies(&clusters, &num_letters, &insertions), 2);
    }
}
