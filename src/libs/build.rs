use fxhash::FxHashMap;
use rand::prelude::*;
use rayon::prelude::*;
use std::path::Path;
use std::sync::Mutex;

use crate::libs::config::{BackboneStrategy, Config};
use crate::libs::context::MergeContext;
use crate::libs::fasta::{self, Alignment};
use crate::libs::graph::AlignmentGraph;
use crate::libs::tasks::{Task, TaskRunner};

/// Builds the alignment graph from backbone alignments.
///
/// Backbone alignment tasks run in parallel through the task runner;
/// completed backbones are mapped back to graph nodes and fed to the
/// shared matrix behind one coarse lock. Accumulation is commutative, so
/// feeding order does not affect the result. An existing `graph.txt`
/// short-circuits the whole stage.
pub fn build_graph(
    config: &Config,
    context: &MergeContext,
    runner: &TaskRunner,
) -> anyhow::Result<AlignmentGraph> {
    let mut graph = AlignmentGraph::new(&context.subalignment_lengths);
    let graph_path = config.graph_path();

    if Path::new(&graph_path).exists() {
        log::info!("Found existing graph file {}", graph_path);
        graph.read_graph(&graph_path)?;
        return Ok(graph);
    }

    let backbones = assemble_backbones(config, context, runner)?;
    log::info!("Feeding {} backbones to the graph..", backbones.len());

    let sub_pos = &graph.mat_sub_pos_map;
    let offsets = &graph.subset_matrix_idx;
    let matrix_lock = Mutex::new(&mut graph.matrix);

    backbones.par_iter().try_for_each(|backbone| -> anyhow::Result<()> {
        let align_map = backbone_align_map(context, offsets, backbone)?;

        let mut matrix = matrix_lock.lock().unwrap();
        for column in &align_map {
            for (&a, &a_count) in column {
                for (&b, &b_count) in column {
                    if config.graph_build_restrict {
                        let (asub, apos) = sub_pos[a];
                        let (bsub, bpos) = sub_pos[b];
                        if asub == bsub && apos != bpos {
                            continue;
                        }
                    }
                    *matrix[a].entry(b).or_insert(0) += a_count * b_count;
                }
            }
        }
        Ok(())
    })?;

    graph.write_graph(&graph_path)?;
    Ok(graph)
}

/// Produces the full set of backbone alignments per the configured
/// strategy, HMM-extended where requested.
fn assemble_backbones(
    config: &Config,
    context: &MergeContext,
    runner: &TaskRunner,
) -> anyhow::Result<Vec<Alignment>> {
    let mut backbones = Vec::new();

    match &config.backbone_strategy {
        BackboneStrategy::Existing(paths) => {
            log::info!("Using {} user-defined backbone files..", paths.len());
            for path in paths {
                backbones.push(fasta::read_fasta(path, false)?);
            }
        }
        BackboneStrategy::Mafft { runs, size } => {
            log::info!("Using {} MAFFT backbones..", runs);
            backbones.extend(mafft_backbones(config, context, runner, *runs, *size)?);
        }
        BackboneStrategy::SubsetHmm => {
            log::info!(
                "Using {} HMM-extended subalignments as backbone files..",
                context.subalignment_paths.len()
            );
            for path in &context.subalignment_paths {
                let mut backbone = fasta::read_fasta(path, false)?;
                extend_backbone_with_hmm(config, context, runner, &mut backbone, path)?;
                backbones.push(backbone);
            }
        }
    }

    // Unconstrained output re-aligns subalignment columns, so the
    // subalignments themselves count as evidence too.
    if !config.constrain && config.backbone_strategy != BackboneStrategy::SubsetHmm {
        for path in &context.subalignment_paths {
            backbones.push(fasta::read_fasta(path, false)?);
        }
    }

    Ok(backbones)
}

fn mafft_backbones(
    config: &Config,
    context: &MergeContext,
    runner: &TaskRunner,
    runs: usize,
    size: usize,
) -> anyhow::Result<Vec<Alignment>> {
    let num_taxa = std::cmp::max(1, size / context.subalignments.len());

    let mut aligned_files = Vec::new();
    let mut tasks = Vec::new();
    for n in 0..runs {
        let unaligned_file = config.path(&format!("backbone_{}_unalign.txt", n + 1));
        let aligned_file = config.path(&format!("backbone_{}_mafft.txt", n + 1));

        if Path::new(&aligned_file).exists() {
            log::info!("Existing backbone file found: {}", aligned_file);
        } else {
            let sample = sample_backbone_taxa(context, num_taxa, config.seed + n as u64);
            fasta::write_fasta(&sample, &unaligned_file, false)?;
            tasks.push(Task::MafftBackbone {
                unaligned: unaligned_file,
                output: aligned_file.clone(),
                threads: 1,
            });
        }
        aligned_files.push(aligned_file);
    }
    runner.run_all(tasks)?;

    let mut backbones = Vec::new();
    for aligned_file in &aligned_files {
        let mut backbone = fasta::read_fasta(aligned_file, false)?;
        if config.graph_build_hmm_extend {
            extend_backbone_with_hmm(config, context, runner, &mut backbone, aligned_file)?;
        }
        backbones.push(backbone);
    }
    Ok(backbones)
}

/// Random backbone sampling: up to `num_taxa` taxa from every
/// subalignment, gap-stripped. Deterministic for a given seed.
fn sample_backbone_taxa(context: &MergeContext, num_taxa: usize, seed: u64) -> Alignment {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut backbone = Alignment::new();

    for subalignment in &context.subalignments {
        let mut taxa: Vec<&String> = subalignment.keys().collect();
        taxa.shuffle(&mut rng);
        for taxon in taxa.into_iter().take(num_taxa) {
            backbone.insert(taxon.clone(), context.unaligned[taxon].clone());
        }
    }
    backbone
}

/// Aligns every taxon missing from the backbone against a profile HMM of
/// the backbone, merging the Stockholm rows (insertion columns kept) back
/// into the backbone alignment.
fn extend_backbone_with_hmm(
    config: &Config,
    context: &MergeContext,
    runner: &TaskRunner,
    backbone: &mut Alignment,
    aligned_file: &str,
) -> anyhow::Result<()> {
    let base_name = Path::new(aligned_file)
        .file_name()
        .unwrap()
        .to_string_lossy()
        .to_string();
    let hmm_dir = config.work_dir.join(format!("hmm_{}", base_name));
    std::fs::create_dir_all(&hmm_dir)?;
    let hmm_dir = hmm_dir.to_string_lossy().to_string();

    let mut queries = Alignment::new();
    for (taxon, seq) in context.unaligned.iter() {
        if !backbone.contains_key(taxon) {
            queries.insert(taxon.clone(), seq.clone());
        }
    }
    if queries.is_empty() {
        return Ok(());
    }

    let hmm_path = format!("{}/hmm_model.txt", hmm_dir);
    runner.run_all(vec![Task::HmmBuild {
        alignment: aligned_file.to_string(),
        output: hmm_path.clone(),
    }])?;

    // hmmalign in chunks of 1000 queries
    const CHUNK_SIZE: usize = 1000;
    let taxa: Vec<String> = queries.keys().cloned().collect();
    let mut tasks = Vec::new();
    for (i, chunk) in taxa.chunks(CHUNK_SIZE).enumerate() {
        let input = format!("{}/queries_chunk_{}.txt", hmm_dir, i + 1);
        let output = format!("{}/queries_chunk_{}_aligned.txt", hmm_dir, i + 1);
        fasta::write_fasta_taxa(&queries, chunk, &input)?;
        tasks.push(Task::HmmAlign {
            hmm_model: hmm_path.clone(),
            queries: input,
            output,
        });
    }

    runner.for_each_completed(tasks, |task| {
        let extension = fasta::read_stockholm(task.output_file(), true)?;
        for (taxon, seq) in extension {
            backbone.insert(taxon, seq);
        }
        Ok(())
    })
}

/// Maps a backbone alignment's columns back to graph nodes.
///
/// For every taxon, a two-pointer scan pairs its gap-stripped sequence
/// with its subalignment row to find each residue's column node, then
/// walks the backbone row, counting residues per backbone match column.
/// Counts matter: HMM insertion columns can map several residues of one
/// taxon onto the same node.
fn backbone_align_map(
    context: &MergeContext,
    offsets: &[usize],
    backbone: &Alignment,
) -> anyhow::Result<Vec<FxHashMap<usize, i64>>> {
    let backbone_length = fasta::alignment_length(backbone);
    let mut align_map: Vec<FxHashMap<usize, i64>> = vec![FxHashMap::default(); backbone_length];

    for (taxon, backbone_row) in backbone {
        let subset_idx = match context.taxon_subalignment.get(taxon) {
            Some(&idx) => idx,
            None => anyhow::bail!("backbone taxon {} not found in any subalignment", taxon),
        };
        let subset_row = context.aligned_rows[taxon].as_bytes();
        let unaligned = context.unaligned[taxon].as_bytes();
        if unaligned.is_empty() {
            continue;
        }

        let mut pos_array = vec![0usize; unaligned.len()];
        let mut i = 0;
        for (n, &c) in subset_row.iter().enumerate() {
            if c == unaligned[i] {
                pos_array[i] = n;
                i += 1;
                if i == unaligned.len() {
                    break;
                }
            }
        }

        let mut i = 0;
        let mut n = 0;
        for &c in backbone_row.as_bytes() {
            if i == unaligned.len() {
                break;
            }
            if c == unaligned[i] {
                let node = offsets[subset_idx] + pos_array[i];
                *align_map[n].entry(node).or_insert(0) += 1;
            }
            if c.to_ascii_uppercase() == unaligned[i] {
                i += 1;
            }
            if c == c.to_ascii_uppercase() && c != b'.' {
                n += 1;
            }
        }
    }

    Ok(align_map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_lines(path: &std::path::Path, lines: &str) {
        std::fs::write(path, lines).unwrap();
    }

    fn two_subalignments(dir: &std::path::Path) -> Vec<String> {
        let sub1 = dir.join("sub_1.fa");
        let sub2 = dir.join("sub_2.fa");
        write_lines(&sub1, ">a\nAC-T\n>b\nA-GT\n");
        write_lines(&sub2, ">c\nACG\n>d\nA-G\n");
        vec![
            sub1.to_str().unwrap().to_string(),
            sub2.to_str().unwrap().to_string(),
        ]
    }

    #[test]
    fn align_map_follows_subalignment_columns() {
        let dir = tempfile::tempdir().unwrap();
        let paths = two_subalignments(dir.path());
        let context = MergeContext::load(&paths).unwrap();

        // backbone aligns a (sub 0) and c (sub 1); columns line up exactly
        let mut backbone = Alignment::new();
        backbone.insert("a".to_string(), "ACT".to_string());
        backbone.insert("c".to_string(), "ACG".to_string());

        let offsets = vec![0, 4];
        let map = backbone_align_map(&context, &offsets, &backbone).unwrap();
        assert_eq!(map.len(), 3);

        // a: ungapped residues at subalignment columns 0, 1, 3
        assert_eq!(map[0].get(&0), Some(&1));
        assert_eq!(map[1].get(&1), Some(&1));
        assert_eq!(map[2].get(&3), Some(&1));
        // c occupies nodes 4, 5, 6
        assert_eq!(map[0].get(&4), Some(&1));
        assert_eq!(map[1].get(&5), Some(&1));
        assert_eq!(map[2].get(&6), Some(&1));
    }

    #[test]
    fn feeding_backbone_accumulates_symmetric_weights() {
        let dir = tempfile::tempdir().unwrap();
        let paths = two_subalignments(dir.path());
        let context = MergeContext::load(&paths).unwrap();

        let mut backbone = Alignment::new();
        backbone.insert("a".to_string(), "ACT".to_string());
        backbone.insert("c".to_string(), "ACG".to_string());

        let backbone_file = dir.path().join("bb.fa");
        fasta::write_fasta(&backbone, backbone_file.to_str().unwrap(), false).unwrap();

        let config = Config {
            work_dir: dir.path().to_path_buf(),
            backbone_strategy: BackboneStrategy::Existing(vec![backbone_file
                .to_str()
                .unwrap()
                .to_string()]),
            ..Config::default()
        };
        let runner = TaskRunner::new(1);
        let graph = build_graph(&config, &context, &runner).unwrap();

        assert_eq!(graph.weight(0, 4), 1);
        assert_eq!(graph.weight(4, 0), 1);
        assert_eq!(graph.weight(1, 5), 1);
        assert_eq!(graph.weight(3, 6), 1);
        // graph file written for resume
        assert!(Path::new(&config.graph_path()).exists());
    }
}
