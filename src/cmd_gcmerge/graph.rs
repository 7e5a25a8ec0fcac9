use clap::*;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    let cmd = Command::new("graph")
        .about("Builds the alignment graph from backbone alignments")
        .after_help(
            r###"
Builds backbone alignments per the configured strategy, maps their
columns onto subalignment columns and accumulates the support counts
into the alignment graph, written as `graph.txt` in the working
directory. A later `cluster`, `trace` or `write` run picks it up from
there.

Examples:
1. Default MAFFT backbones:
   gcmerge graph sub_1.fa sub_2.fa -d work

2. Subalignments as HMM-extended backbones:
   gcmerge graph sub_1.fa sub_2.fa -d work --subset-hmm

"###,
        );

    super::pipeline_args(cmd)
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    super::run_pipeline(args, super::Stage::Graph)
}
