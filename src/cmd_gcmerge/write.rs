use clap::*;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    let cmd = Command::new("write")
        .about("Renders the final alignment from a trace")
        .after_help(
            r###"
Turns the cached trace into the merged alignment. In the default
constrained mode every subalignment column is kept intact; when the
result would exceed the cell budget, lightly-populated columns are
folded into their neighbors as lowercase insertions first.

Example:
   gcmerge write sub_1.fa sub_2.fa -d work -o merged.fa

"###,
        );

    super::pipeline_args(cmd)
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    super::run_pipeline(args, super::Stage::Write)
}
