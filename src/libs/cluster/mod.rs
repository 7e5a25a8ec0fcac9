pub mod clean;
pub mod mcl;

use std::path::Path;

use crate::libs::config::{ClusterMethod, Config};
use crate::libs::graph::AlignmentGraph;
use crate::libs::trace::{rg, rg_fast};

/// Partitions graph nodes into candidate homology clusters. An existing
/// cluster file is reused instead of re-clustering.
pub fn cluster_graph(config: &Config, graph: &mut AlignmentGraph) -> anyhow::Result<()> {
    let cluster_path = config.cluster_path();

    if Path::new(&cluster_path).exists() {
        log::info!("Found existing cluster file {}", cluster_path);
        graph.read_clusters(&cluster_path)?;
        return Ok(());
    }

    match config.cluster_method {
        ClusterMethod::Mcl => {
            mcl::run_mcl_clustering(config, graph)?;
        }
        ClusterMethod::Rg => {
            log::info!("Building a region-growing graph clustering..");
            let (lower, upper) = (graph.lower_bound(), graph.upper_bound());
            graph.clusters = rg::rg_cluster(graph, &lower, &upper, false);
            graph.write_clusters(&cluster_path)?;
        }
        ClusterMethod::RgFast => {
            log::info!("Building a fast region-growing graph clustering..");
            let (lower, upper) = (graph.lower_bound(), graph.upper_bound());
            let cuts = rg_fast::rg_fast_cluster(graph, &lower, &upper);
            graph.clusters = rg_fast::cuts_to_clusters(&cuts);
            graph.write_clusters(&cluster_path)?;
        }
        ClusterMethod::None => {
            log::info!("Skipping graph clustering..");
        }
    }

    Ok(())
}
