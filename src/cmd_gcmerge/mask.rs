use clap::*;

use gcmerge::libs::writer;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("mask")
        .about("Drops mostly-gap columns from an alignment")
        .after_help(
            r###"
Writes a 0/1 column mask and the alignment with the masked columns
removed. A column is dropped when more than the given portion of its
cells are gaps.

Examples:
1. Trim columns that are more than 99% gaps:
   gcmerge mask merged.fa -o trimmed.fa

2. A stricter threshold, custom mask location:
   gcmerge mask merged.fa -o trimmed.fa --portion 0.8 --mask-file mask.txt

"###,
        )
        .arg(
            Arg::new("infile")
                .required(true)
                .num_args(1)
                .index(1)
                .help("Input alignment FASTA file"),
        )
        .arg(
            Arg::new("outfile")
                .long("outfile")
                .short('o')
                .num_args(1)
                .default_value("masked.fa")
                .help("Output alignment filename"),
        )
        .arg(
            Arg::new("mask_file")
                .long("mask-file")
                .num_args(1)
                .default_value("alignment_mask.txt")
                .help("Where to write the 0/1 column mask"),
        )
        .arg(
            Arg::new("portion")
                .long("portion")
                .num_args(1)
                .default_value("0.99")
                .value_parser(value_parser!(f64))
                .help("Maximum tolerated gap portion per column"),
        )
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    writer::mask_alignment(
        args.get_one::<String>("infile").unwrap(),
        args.get_one::<String>("outfile").unwrap(),
        args.get_one::<String>("mask_file").unwrap(),
        *args.get_one::<f64>("portion").unwrap(),
    )
}
