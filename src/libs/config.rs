use std::path::{Path, PathBuf};

/// How backbone alignments are obtained for graph construction.
#[derive(Debug, Clone, PartialEq)]
pub enum BackboneStrategy {
    /// Sample random taxa per subalignment, align each sample with MAFFT.
    Mafft { runs: usize, size: usize },
    /// Use each subalignment as a backbone, extending it with a profile
    /// HMM alignment of all other taxa.
    SubsetHmm,
    /// User-supplied backbone alignment files.
    Existing(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterMethod {
    Mcl,
    Rg,
    RgFast,
    /// Skip clustering; the trace method works on the raw graph.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMethod {
    MinClusters,
    MwtGreedy,
    MwtSearch,
    Fm,
    Rg,
    RgFast,
    Naive,
}

impl ClusterMethod {
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "mcl" => Self::Mcl,
            "rg" => Self::Rg,
            "rgfast" => Self::RgFast,
            "none" => Self::None,
            _ => anyhow::bail!("unknown cluster method: {}", s),
        })
    }
}

impl TraceMethod {
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "minclusters" => Self::MinClusters,
            "mwtgreedy" => Self::MwtGreedy,
            "mwtsearch" => Self::MwtSearch,
            "fm" => Self::Fm,
            "rg" => Self::Rg,
            "rgfast" => Self::RgFast,
            "naive" => Self::Naive,
            _ => anyhow::bail!("unknown trace method: {}", s),
        })
    }
}

/// Immutable run configuration, built once from the CLI and passed by
/// reference into each pipeline stage.
#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: PathBuf,
    pub threads: usize,

    pub backbone_strategy: BackboneStrategy,
    /// Skip same-subalignment pairs with differing positions when feeding
    /// backbones to the graph.
    pub graph_build_restrict: bool,
    pub graph_build_hmm_extend: bool,

    pub cluster_method: ClusterMethod,
    pub mcl_inflation: f64,

    pub trace_method: TraceMethod,
    pub search_heap_limit: usize,
    pub optimize: bool,

    /// Constrained output: subalignment columns are never re-aligned.
    pub constrain: bool,
    /// Cell budget for the final alignment, in billions of cells.
    pub alignment_size_limit_gb: f64,

    pub seed: u64,
}

impl Config {
    pub fn path(&self, name: &str) -> String {
        self.work_dir.join(name).to_string_lossy().to_string()
    }

    pub fn graph_path(&self) -> String {
        self.path("graph.txt")
    }

    pub fn cluster_path(&self) -> String {
        self.path("clusters.txt")
    }

    pub fn trace_path(&self) -> String {
        self.path("trace.txt")
    }

    pub fn cell_budget(&self) -> f64 {
        self.alignment_size_limit_gb * 1e9
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: Path::new(".").to_path_buf(),
            threads: 1,
            backbone_strategy: BackboneStrategy::Mafft { runs: 10, size: 200 },
            graph_build_restrict: false,
            graph_build_hmm_extend: false,
            cluster_method: ClusterMethod::Mcl,
            mcl_inflation: 4.0,
            trace_method: TraceMethod::MinClusters,
            search_heap_limit: 5_000,
            optimize: false,
            constrain: true,
            alignment_size_limit_gb: 100.0,
            seed: 42,
        }
    }
}
