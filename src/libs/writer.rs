use anyhow::Context;
use fxhash::FxHashSet;
use itertools::Itertools;
use std::io::{BufRead, Write};
use std::path::Path;

use crate::libs::compress;
use crate::libs::config::Config;
use crate::libs::context::MergeContext;
use crate::libs::fasta::{self, Alignment};
use crate::libs::graph::AlignmentGraph;
use crate::libs::io;
use crate::libs::tasks::{Task, TaskRunner};

/// Converts the final trace into an alignment on disk.
pub fn write_alignment(
    config: &Config,
    context: &MergeContext,
    graph: &mut AlignmentGraph,
    output: &str,
    runner: &TaskRunner,
) -> anyhow::Result<()> {
    graph.add_singleton_clusters();
    if config.constrain {
        compress::compress_alignment(config, context, graph, runner)?;
        write_unpacked_alignment(config, context, graph, output, runner)
    } else {
        write_unconstrained_alignment(context, graph, output)
    }
}

/// Projects the trace onto each subalignment in parallel, then
/// concatenates the induced alignments into the final file.
fn write_unpacked_alignment(
    config: &Config,
    context: &MergeContext,
    graph: &AlignmentGraph,
    output: &str,
    runner: &TaskRunner,
) -> anyhow::Result<()> {
    let k = graph.k();
    // per subalignment, per output column: the subalignment columns it holds
    let mut cluster_map: Vec<Vec<Vec<usize>>> = vec![vec![Vec::new(); graph.clusters.len()]; k];
    for (idx, cluster) in graph.clusters.iter().enumerate() {
        for &b in cluster {
            let (bsub, bpos) = graph.sub_pos(b);
            cluster_map[bsub][idx].push(bpos);
        }
    }

    let mut inserts: Vec<Vec<usize>> = vec![Vec::new(); k];
    let mut insertions: Vec<usize> = graph.insertions.iter().copied().collect();
    insertions.sort_unstable();
    for b in insertions {
        let (bsub, bpos) = graph.sub_pos(b);
        inserts[bsub].push(bpos);
    }

    log::info!("Assembling final alignment in {}", output);
    let mut tasks = Vec::new();
    let mut intermediates = Vec::new();
    for (bsub, path) in context.subalignment_paths.iter().enumerate() {
        let stem = io::file_stem(path);
        let columns = config.path(&format!("alignment_columns_{}.txt", stem));
        {
            let mut w = crate::writer(&columns);
            writeln!(w, "{}", inserts[bsub].iter().join(" "))?;
            for cluster in &cluster_map[bsub] {
                writeln!(w, "{}", cluster.iter().join(" "))?;
            }
            w.flush()?;
        }

        let induced = config.path(&format!("induced_{}.txt", stem));
        tasks.push(Task::InducedSubalignment {
            columns: columns.clone(),
            subalignment: path.clone(),
            output: induced.clone(),
        });
        intermediates.push((columns, induced));
    }
    runner.run_all(tasks)?;

    let temp_file = temp_sibling(output);
    if Path::new(&temp_file).exists() {
        std::fs::remove_file(&temp_file)?;
    }
    for (columns, induced) in &intermediates {
        let induced_align = fasta::read_fasta(induced, false)?;
        log::info!(
            "Appending induced alignment, {} sequences of length {}..",
            induced_align.len(),
            fasta::alignment_length(&induced_align)
        );
        fasta::write_fasta(&induced_align, &temp_file, true)?;

        std::fs::remove_file(columns)?;
        std::fs::remove_file(induced)?;
    }
    std::fs::rename(&temp_file, output)?;
    log::info!("Wrote final alignment to {}", output);

    Ok(())
}

/// Rebuilds one subalignment's rows against the merged columns. Each
/// output cell takes the letter of its claimed subalignment column;
/// insertion columns contribute lowercase letters.
pub fn build_induced_subalignment(
    columns: &str,
    subalignment: &str,
    output: &str,
) -> anyhow::Result<()> {
    let reader = crate::reader(columns);
    let mut lines = reader.lines();
    let insert_idxs: FxHashSet<usize> = lines
        .next()
        .transpose()?
        .with_context(|| format!("empty columns file {}", columns))?
        .split_whitespace()
        .map(|token| token.parse::<usize>())
        .collect::<Result<_, _>>()?;
    let mut align_columns: Vec<Vec<usize>> = Vec::new();
    for line in lines {
        let line = line?;
        align_columns.push(
            line.split_whitespace()
                .map(|token| token.parse::<usize>())
                .collect::<Result<_, _>>()?,
        );
    }

    let subset = fasta::read_fasta(subalignment, false)?;
    let mut induced: Vec<Vec<u8>> = vec![vec![b'-'; align_columns.len()]; subset.len()];
    for (idx, column) in align_columns.iter().enumerate() {
        for (r, row) in subset.values().enumerate() {
            let row = row.as_bytes();
            for &c in column {
                let letter = row[c];
                if letter == b'-' {
                    continue;
                }
                if induced[r][idx] != b'-' {
                    anyhow::bail!(
                        "two letters claim output column {} of {}",
                        idx,
                        subalignment
                    );
                }
                induced[r][idx] = if insert_idxs.contains(&c) {
                    letter.to_ascii_lowercase()
                } else {
                    letter
                };
            }
        }
    }

    io::atomic_write(output, |w| {
        for (name, row) in subset.keys().zip(&induced) {
            writeln!(w, ">{}", name)?;
            w.write_all(row)?;
            writeln!(w)?;
        }
        Ok(())
    })
}

/// Without the constraint, trace columns are filled straight from the
/// unaligned sequences: each subalignment stands for one sequence and
/// its columns dispense that sequence's letters in order.
fn write_unconstrained_alignment(
    context: &MergeContext,
    graph: &AlignmentGraph,
    output: &str,
) -> anyhow::Result<()> {
    let width = graph.clusters.len();
    let mut alignment = Alignment::new();
    for subalignment in &context.subalignments {
        for taxon in subalignment.keys() {
            alignment.insert(taxon.clone(), "-".repeat(width));
        }
    }

    let mut rows: Vec<Vec<u8>> = vec![vec![b'-'; width]; context.subalignments.len()];
    let mut cur_idxs = vec![0usize; context.subalignments.len()];
    for (idx, cluster) in graph.clusters.iter().enumerate() {
        for &b in cluster {
            let (bsub, _) = graph.sub_pos(b);
            let taxon = context.subalignments[bsub]
                .get_index(0)
                .map(|(name, _)| name)
                .context("empty subalignment")?;
            rows[bsub][idx] = context.unaligned[taxon].as_bytes()[cur_idxs[bsub]];
            cur_idxs[bsub] += 1;
        }
    }

    for (bsub, subalignment) in context.subalignments.iter().enumerate() {
        if let Some((taxon, _)) = subalignment.get_index(0) {
            alignment.insert(taxon.clone(), String::from_utf8(rows[bsub].clone())?);
        }
    }

    fasta::write_fasta(&alignment, output, false)?;
    log::info!("Wrote final alignment to {}", output);

    Ok(())
}

/// Gap-mask trimming: drops alignment columns that are almost entirely
/// gaps and records the kept/dropped pattern as a 0/1 mask file.
pub fn mask_alignment(
    input: &str,
    output: &str,
    mask_path: &str,
    portion: f64,
) -> anyhow::Result<()> {
    let alignment = fasta::read_fasta(input, false)?;
    let length = fasta::alignment_length(&alignment);
    let num_seq = alignment.len();

    let mut non_gaps = vec![0usize; length];
    for row in alignment.values() {
        for (i, &b) in row.as_bytes().iter().enumerate() {
            if b != b'-' {
                non_gaps[i] += 1;
            }
        }
    }

    let mask: Vec<bool> = non_gaps
        .iter()
        .map(|&c| c as f64 >= (1.0 - portion) * num_seq as f64)
        .collect();
    io::atomic_write(mask_path, |w| {
        let mask_string: String = mask.iter().map(|&m| if m { '1' } else { '0' }).collect();
        writeln!(w, "{}", mask_string)?;
        Ok(())
    })?;

    let kept = mask.iter().filter(|&&m| m).count();
    log::info!(
        "Keeping {} of {} columns with at most {}% gaps..",
        kept,
        length,
        portion * 100.0
    );

    let mut masked = Alignment::new();
    for (name, row) in &alignment {
        let trimmed: String = row
            .chars()
            .zip(&mask)
            .filter(|(_, &m)| m)
            .map(|(c, _)| c)
            .collect();
        masked.insert(name.clone(), trimmed);
    }
    fasta::write_fasta(&masked, output, false)?;
    log::info!("Wrote masked alignment to {}", output);

    Ok(())
}

fn temp_sibling(path: &str) -> String {
    let path = Path::new(path);
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    dir.join(format!("temp_{}", name)).to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::config::Config;

    fn write_file(dir: &Path, name: &str, content: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn induced_subalignment_identity_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let sub = write_file(dir.path(), "sub.fa", ">a\nAC-T\n>b\nA-GT\n");
        let columns = write_file(dir.path(), "cols.txt", "\n0\n1\n2\n3\n");
        let output = dir.path().join("induced.txt");

        build_induced_subalignment(&columns, &sub, output.to_str().unwrap()).unwrap();

        let induced = fasta::read_fasta(output.to_str().unwrap(), false).unwrap();
        assert_eq!(induced["a"], "AC-T");
        assert_eq!(induced["b"], "A-GT");
    }

    #[test]
    fn insertion_columns_come_out_lowercase() {
        let dir = tempfile::tempdir().unwrap();
        let sub = write_file(dir.path(), "sub.fa", ">a\nAC-T\n>b\nA-GT\n");
        let columns = write_file(dir.path(), "cols.txt", "2\n0\n1\n2\n3\n");
        let output = dir.path().join("induced.txt");

        build_induced_subalignment(&columns, &sub, output.to_str().unwrap()).unwrap();

        let induced = fasta::read_fasta(output.to_str().unwrap(), false).unwrap();
        assert_eq!(induced["a"], "AC-T");
        assert_eq!(induced["b"], "A-gT");
    }

    #[test]
    fn conflicting_letters_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sub = write_file(dir.path(), "sub.fa", ">a\nAC\n");
        let columns = write_file(dir.path(), "cols.txt", "\n0 1\n");
        let output = dir.path().join("induced.txt");

        let result = build_induced_subalignment(&columns, &sub, output.to_str().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn unpacked_alignment_concatenates_subalignments() {
        let dir = tempfile::tempdir().unwrap();
        let sub_1 = write_file(dir.path(), "sub_1.fa", ">a\nACGT\n>b\nAC-T\n");
        let sub_2 = write_file(dir.path(), "sub_2.fa", ">c\nACGT\n>d\nA-GT\n");
        let output = dir.path().join("merged.fa");

        let config = Config {
            work_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let context = MergeContext::load(&[sub_1, sub_2]).unwrap();
        let mut graph = AlignmentGraph::new(&[4, 4]);
        graph.clusters = vec![vec![0, 4], vec![1, 5], vec![2, 6], vec![3, 7]];

        let runner = TaskRunner::new(1);
        write_alignment(&config, &context, &mut graph, output.to_str().unwrap(), &runner)
            .unwrap();

        let merged = fasta::read_fasta(output.to_str().unwrap(), false).unwrap();
        assert_eq!(merged["a"], "ACGT");
        assert_eq!(merged["b"], "AC-T");
        assert_eq!(merged["c"], "ACGT");
        assert_eq!(merged["d"], "A-GT");
    }

    #[test]
    fn unconstrained_mode_spells_out_raw_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let sub_1 = write_file(dir.path(), "sub_1.fa", ">a\nACT\n");
        let sub_2 = write_file(dir.path(), "sub_2.fa", ">b\nAT\n");
        let output = dir.path().join("merged.fa");

        let config = Config {
            work_dir: dir.path().to_path_buf(),
            constrain: false,
            ..Default::default()
        };
        let context = MergeContext::load(&[sub_1, sub_2]).unwrap();
        let mut graph = AlignmentGraph::new(&[3, 2]);
        graph.clusters = vec![vec![0, 3], vec![1], vec![2, 4]];

        let runner = TaskRunner::new(1);
        write_alignment(&config, &context, &mut graph, output.to_str().unwrap(), &runner)
            .unwrap();

        let merged = fasta::read_fasta(output.to_str().unwrap(), false).unwrap();
        assert_eq!(merged["a"], "ACT");
        assert_eq!(merged["b"], "A-T");
    }

    #[test]
    fn gap_heavy_columns_are_masked_out() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_file(dir.path(), "aln.fa", ">a\nA-C\n>b\nA-G\n");
        let output = dir.path().join("masked.fa");
        let mask_path = dir.path().join("alignment_mask.txt");

        mask_alignment(
            &input,
            output.to_str().unwrap(),
            mask_path.to_str().unwrap(),
            0.99,
        )
        .unwrap();

        let mask = std::fs::read_to_string(&mask_path).unwrap();
        assert_eq!(mask.trim(), "101");
        let masked = fasta::read_fasta(output.to_str().unwrap(), false).unwrap();
        assert_eq!(masked["a"], "AC");
        assert_eq!(masked["b"], "AG");
    }
}
