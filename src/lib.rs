//! # gum
//!
//! `gum` divides polyploid genomes into subgenomes by clustering chromosomes
//! on the k-mer content of their LTR retrotransposons.
//!
//! For every k the pipeline counts k-mers per sequence, merges the counts into
//! an ordered store that pages to disk for large tables, densifies them into a
//! frequency matrix over all 5^k k-mers of {A,T,G,C,N} and clusters the rows
//! with Ward linkage, rendering the result as a dendrogram.
pub mod clustering;
pub mod config;
pub mod counting;
pub mod densify;
pub mod extract;
pub mod ingest;
pub mod kmer;
pub mod ltr;
pub mod plotting;
pub mod startup;
pub mod store;
pub mod workdir;
