use clap::*;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    let cmd = Command::new("trace")
        .about("Resolves graph clusters into a valid trace")
        .after_help(
            r###"
Repairs the clustering and resolves it into a trace: an ordered
partition of graph nodes where no cluster holds two columns of one
subalignment and the clusters are consistently orderable. The result is
cached as `trace.txt` in the working directory.

Trace methods:
* minclusters - search for the fewest clusters (the default)
* mwtgreedy, mwtsearch - maximum-weight trace by edge deletion
* fm          - recursive bisection
* rg, rgfast  - region growing, rgfast scales to huge graphs
* naive       - left-justified columns, no search

Example:
   gcmerge trace sub_1.fa sub_2.fa -d work --trace mwtgreedy --optimize

"###,
        );

    super::pipeline_args(cmd)
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    super::run_pipeline(args, super::Stage::Trace)
}
