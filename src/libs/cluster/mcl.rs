use std::path::Path;

use crate::libs::config::Config;
use crate::libs::external;
use crate::libs::graph::AlignmentGraph;

/// Clusters the alignment graph with MCL over the `--abc` edge list the
/// graph stage wrote. MCL emits one cluster per line, which is exactly
/// our cluster file format.
pub fn run_mcl_clustering(config: &Config, graph: &mut AlignmentGraph) -> anyhow::Result<()> {
    let graph_path = config.graph_path();
    if !Path::new(&graph_path).exists() {
        graph.write_graph(&graph_path)?;
    }

    let cluster_path = config.cluster_path();
    external::run_mcl(&graph_path, config.mcl_inflation, &cluster_path)?;
    graph.read_clusters(&cluster_path)?;

    Ok(())
}
