extern crate clap;
use clap::*;

mod cmd_gcmerge;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let app = Command::new("gcmerge")
        .version(crate_version!())
        .about("`gcmerge` - Graph-Clustering Merger for multiple sequence alignments")
        .propagate_version(true)
        .arg_required_else_help(true)
        .color(ColorChoice::Auto)
        .subcommand(cmd_gcmerge::merge::make_subcommand())
        .subcommand(cmd_gcmerge::graph::make_subcommand())
        .subcommand(cmd_gcmerge::cluster::make_subcommand())
        .subcommand(cmd_gcmerge::trace::make_subcommand())
        .subcommand(cmd_gcmerge::write::make_subcommand())
        .subcommand(cmd_gcmerge::mask::make_subcommand())
        .after_help(
            r###"Subcommand groups:

* Pipeline:
    * merge - Full pipeline: graph, cluster, trace, write

* Stages (resumable, share a working directory):
    * graph   - Build the alignment graph from backbones
    * cluster - Cluster the alignment graph
    * trace   - Resolve clusters into a valid trace
    * write   - Render the final alignment from a trace

* Utilities:
    * mask - Drop mostly-gap columns from an alignment

"###,
        );

    // Check which subcomamnd the user ran...
    match app.get_matches().subcommand() {
        Some(("merge", sub_matches)) => cmd_gcmerge::merge::execute(sub_matches),
        Some(("graph", sub_matches)) => cmd_gcmerge::graph::execute(sub_matches),
        Some(("cluster", sub_matches)) => cmd_gcmerge::cluster::execute(sub_matches),
        Some(("trace", sub_matches)) => cmd_gcmerge::trace::execute(sub_matches),
        Some(("write", sub_matches)) => cmd_gcmerge::write::execute(sub_matches),
        Some(("mask", sub_matches)) => cmd_gcmerge::mask::execute(sub_matches),
        _ => unreachable!(),
    }?;

    Ok(())
}
