//! Subcommand modules for the `gcmerge` binary.

use clap::*;

use gcmerge::libs::build;
use gcmerge::libs::cluster as graph_cluster;
use gcmerge::libs::config::{BackboneStrategy, ClusterMethod, Config, TraceMethod};
use gcmerge::libs::context::MergeContext;
use gcmerge::libs::optimizer;
use gcmerge::libs::tasks::TaskRunner;
use gcmerge::libs::trace as graph_trace;
use gcmerge::libs::writer;

pub mod cluster;
pub mod graph;
pub mod mask;
pub mod merge;
pub mod trace;
pub mod write;

/// How far down the pipeline a subcommand runs. Every stage caches its
/// result in the working directory, so later stages resume from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Graph,
    Cluster,
    Trace,
    Write,
}

/// The argument set shared by all pipeline subcommands.
pub fn pipeline_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("subalignments")
            .required(true)
            .num_args(1..)
            .index(1)
            .help("Input subalignment FASTA files"),
    )
    .arg(
        Arg::new("dir")
            .long("dir")
            .short('d')
            .num_args(1)
            .default_value("gcmerge_work")
            .help("Working directory for cached stage outputs"),
    )
    .arg(
        Arg::new("outfile")
            .long("outfile")
            .short('o')
            .num_args(1)
            .default_value("merged.fa")
            .help("Output alignment filename"),
    )
    .arg(
        Arg::new("threads")
            .long("threads")
            .short('t')
            .num_args(1)
            .default_value("1")
            .value_parser(value_parser!(usize))
            .help("Worker threads for tasks and graph building"),
    )
    .arg(
        Arg::new("backbones")
            .long("backbones")
            .num_args(1..)
            .help("Use these existing backbone alignments"),
    )
    .arg(
        Arg::new("subset_hmm")
            .long("subset-hmm")
            .action(ArgAction::SetTrue)
            .conflicts_with("backbones")
            .help("Use each subalignment as a backbone, HMM-extended with all other taxa"),
    )
    .arg(
        Arg::new("backbone_runs")
            .long("backbone-runs")
            .num_args(1)
            .default_value("10")
            .value_parser(value_parser!(usize))
            .help("Number of random MAFFT backbones"),
    )
    .arg(
        Arg::new("backbone_size")
            .long("backbone-size")
            .num_args(1)
            .default_value("200")
            .value_parser(value_parser!(usize))
            .help("Taxa sampled per subalignment for each MAFFT backbone"),
    )
    .arg(
        Arg::new("restrict")
            .long("restrict")
            .action(ArgAction::SetTrue)
            .help("Ignore backbone support between differing columns of one subalignment"),
    )
    .arg(
        Arg::new("hmm_extend")
            .long("hmm-extend")
            .action(ArgAction::SetTrue)
            .help("Extend each backbone with a profile HMM alignment of missing taxa"),
    )
    .arg(
        Arg::new("cluster")
            .long("cluster")
            .num_args(1)
            .default_value("mcl")
            .help("Clustering method: mcl, rg, rgfast or none"),
    )
    .arg(
        Arg::new("inflation")
            .long("inflation")
            .num_args(1)
            .default_value("4.0")
            .value_parser(value_parser!(f64))
            .help("MCL inflation factor"),
    )
    .arg(
        Arg::new("trace")
            .long("trace")
            .num_args(1)
            .default_value("minclusters")
            .help("Trace method: minclusters, mwtgreedy, mwtsearch, fm, rg, rgfast or naive"),
    )
    .arg(
        Arg::new("heap_limit")
            .long("heap-limit")
            .num_args(1)
            .default_value("5000")
            .value_parser(value_parser!(usize))
            .help("Search frontier size before falling back to aggressive modes"),
    )
    .arg(
        Arg::new("optimize")
            .long("optimize")
            .action(ArgAction::SetTrue)
            .help("Run the trace optimization passes"),
    )
    .arg(
        Arg::new("unconstrained")
            .long("unconstrained")
            .action(ArgAction::SetTrue)
            .help("Do not treat subalignment columns as fixed"),
    )
    .arg(
        Arg::new("size_limit")
            .long("size-limit")
            .num_args(1)
            .default_value("100")
            .value_parser(value_parser!(f64))
            .help("Final alignment size limit in billions of cells"),
    )
    .arg(
        Arg::new("seed")
            .long("seed")
            .num_args(1)
            .default_value("42")
            .value_parser(value_parser!(u64))
            .help("Seed for backbone taxon sampling"),
    )
}

pub fn config_from_args(args: &ArgMatches) -> anyhow::Result<Config> {
    let backbone_strategy = if let Some(backbones) = args.get_many::<String>("backbones") {
        BackboneStrategy::Existing(backbones.cloned().collect())
    } else if args.get_flag("subset_hmm") {
        BackboneStrategy::SubsetHmm
    } else {
        BackboneStrategy::Mafft {
            runs: *args.get_one::<usize>("backbone_runs").unwrap(),
            size: *args.get_one::<usize>("backbone_size").unwrap(),
        }
    };

    Ok(Config {
        work_dir: args.get_one::<String>("dir").unwrap().into(),
        threads: *args.get_one::<usize>("threads").unwrap(),
        backbone_strategy,
        graph_build_restrict: args.get_flag("restrict"),
        graph_build_hmm_extend: args.get_flag("hmm_extend"),
        cluster_method: ClusterMethod::from_str(args.get_one::<String>("cluster").unwrap())?,
        mcl_inflation: *args.get_one::<f64>("inflation").unwrap(),
        trace_method: TraceMethod::from_str(args.get_one::<String>("trace").unwrap())?,
        search_heap_limit: *args.get_one::<usize>("heap_limit").unwrap(),
        optimize: args.get_flag("optimize"),
        constrain: !args.get_flag("unconstrained"),
        alignment_size_limit_gb: *args.get_one::<f64>("size_limit").unwrap(),
        seed: *args.get_one::<u64>("seed").unwrap(),
    })
}

/// Runs the pipeline up to and including `stage`.
pub fn run_pipeline(args: &ArgMatches, stage: Stage) -> anyhow::Result<()> {
    let config = config_from_args(args)?;
    std::fs::create_dir_all(&config.work_dir)?;

    let subalignments: Vec<String> = args
        .get_many::<String>("subalignments")
        .unwrap()
        .cloned()
        .collect();
    let context = MergeContext::load(&subalignments)?;
    let runner = TaskRunner::new(config.threads);

    let mut graph = build::build_graph(&config, &context, &runner)?;
    if stage < Stage::Cluster {
        return Ok(());
    }

    graph_cluster::cluster_graph(&config, &mut graph)?;
    if stage < Stage::Trace {
        return Ok(());
    }

    graph_trace::find_trace(&config, &mut graph)?;
    optimizer::optimize_trace(&config, &mut graph);
    if stage < Stage::Write {
        return Ok(());
    }

    let output = args.get_one::<String>("outfile").unwrap();
    writer::write_alignment(&config, &context, &mut graph, output, &runner)
}
