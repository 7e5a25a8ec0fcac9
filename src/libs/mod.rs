pub mod build;
pub mod cluster;
pub mod compress;
pub mod config;
pub mod context;
pub mod external;
pub mod fasta;
pub mod graph;
pub mod io;
pub mod optimizer;
pub mod tasks;
pub mod trace;
pub mod writer;
