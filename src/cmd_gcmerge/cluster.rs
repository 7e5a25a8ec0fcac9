use clap::*;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    let cmd = Command::new("cluster")
        .about("Clusters the alignment graph")
        .after_help(
            r###"
Clusters the alignment graph with MCL or one of the built-in
region-growing methods and caches the result as `clusters.txt` in the
working directory. The graph is built first if `graph.txt` is missing.

Examples:
1. MCL with a softer inflation:
   gcmerge cluster sub_1.fa sub_2.fa -d work --inflation 2.0

2. Built-in region growing, no external tools:
   gcmerge cluster sub_1.fa sub_2.fa -d work --cluster rg

"###,
        );

    super::pipeline_args(cmd)
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    super::run_pipeline(args, super::Stage::Cluster)
}
