use clap::*;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    let cmd = Command::new("merge")
        .about("Merges subalignments into one alignment via graph clustering")
        .after_help(
            r###"
The full pipeline: build the alignment graph from backbone alignments,
cluster it, resolve the clusters into a trace, and write the merged
alignment. Every stage caches its output in the working directory, so an
interrupted run resumes where it stopped.

Input subalignments must be disjoint: no taxon may appear in more than
one file.

External tools used, depending on options:
* mafft    - random backbone alignments (the default strategy)
* mcl      - graph clustering (the default method)
* hmmbuild, hmmalign - backbone extension with --hmm-extend or --subset-hmm

Examples:
1. Merge with the defaults:
   gcmerge merge sub_1.fa sub_2.fa sub_3.fa -o merged.fa

2. Reuse precomputed backbones, skip MCL:
   gcmerge merge sub_*.fa --backbones bb_1.fa bb_2.fa --cluster none

3. Scalable settings for a large run:
   gcmerge merge sub_*.fa -t 16 --cluster rgfast --trace rgfast

"###,
        );

    super::pipeline_args(cmd)
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    super::run_pipeline(args, super::Stage::Write)
}
