pub mod fm;
pub mod min_clusters;
pub mod mwt;
pub mod naive;
pub mod rg;
pub mod rg_fast;

use std::path::Path;

use crate::libs::cluster::clean;
use crate::libs::config::{Config, TraceMethod};
use crate::libs::graph::AlignmentGraph;

/// Refines graph clusters into a trace, a clustering whose clusters can
/// be totally ordered without breaking any subalignment's column order.
/// Cluster violations are repaired first; an existing trace file is
/// reused as-is.
pub fn find_trace(config: &Config, graph: &mut AlignmentGraph) -> anyhow::Result<()> {
    let trace_path = config.trace_path();

    if Path::new(&trace_path).exists() {
        log::info!("Found existing trace file {}", trace_path);
        graph.read_clusters(&trace_path)?;
    } else {
        clean::purge_duplicate_clusters(graph);
        clean::purge_cluster_violations(graph);

        match config.trace_method {
            TraceMethod::MinClusters => {
                min_clusters::min_clusters_search(graph, config.search_heap_limit)
            }
            TraceMethod::MwtGreedy => mwt::mwt_greedy_search(graph)?,
            TraceMethod::MwtSearch => {
                mwt::mwt_heuristic_search(graph, config.search_heap_limit)?
            }
            TraceMethod::Fm => fm::fm_trace(graph),
            TraceMethod::Rg => {
                log::info!("Finding graph trace with region-growing search..");
                let (lower, upper) = (graph.lower_bound(), graph.upper_bound());
                graph.clusters = rg::rg_cluster(graph, &lower, &upper, true);
            }
            TraceMethod::RgFast => rg_fast::rg_fast_trace(graph),
            TraceMethod::Naive => naive::naive_clustering(graph),
        }

        graph.write_clusters(&trace_path)?;
    }

    verify_order(graph)?;
    log::info!(
        "Found a trace with {} clusters and a total cost of {}",
        graph.clusters.len(),
        graph.clustering_cost(&graph.clusters)
    );

    Ok(())
}

/// Checks the trace invariant: scanning clusters in order, each
/// subalignment's positions appear strictly left to right, at most one
/// per cluster.
pub fn verify_order(graph: &AlignmentGraph) -> anyhow::Result<()> {
    let mut frontier = vec![0usize; graph.k()];
    for (n, cluster) in graph.clusters.iter().enumerate() {
        let mut seen = vec![false; graph.k()];
        for &a in cluster {
            let (asub, apos) = graph.sub_pos(a);
            if seen[asub] {
                anyhow::bail!("cluster {} holds two columns of subalignment {}", n, asub);
            }
            seen[asub] = true;
            if apos < frontier[asub] {
                anyhow::bail!(
                    "cluster {} breaks column order of subalignment {} at position {}",
                    n,
                    asub,
                    apos
                );
            }
            frontier[asub] = apos + 1;
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) fn assert_complete_trace(graph: &AlignmentGraph) {
    verify_order(graph).unwrap();
    let mut seen = vec![0usize; graph.size()];
    for cluster in &graph.clusters {
        for &a in cluster {
            seen[a] += 1;
        }
    }
    assert!(seen.iter().all(|&c| c == 1), "trace must cover every column once");
}
