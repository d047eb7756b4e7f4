use crate::counting::Counter;
use crate::densify::DEFAULT_MATRIX_LIMIT;
use crate::extract::{ExtractError, HeaderFilter, DEFAULT_EXCLUDE};
use crate::kmer::MAX_K;
use clap::Parser;
use std::path::PathBuf;

/// Default `--memory-limit`: 256 MiB
pub const DEFAULT_MEMORY_LIMIT: u64 = 256 * 1024 * 1024;

custom_error::custom_error! { pub ConfigError
    KmerOutOfRange{k: usize} = @{
        format!("k-mer length needs to be larger than zero and no more than {}, got {}", MAX_K, k)
    },
    ZeroThreads = "thread count needs to be larger than zero",
    LtrConflict = "--ltr-table and --no-ltr cannot be used together",
    Filter{source: ExtractError} = @{ format!("{}", source) },
}

/// GUM; the polyploid subgenome divider
#[derive(Parser, Debug, Clone)]
#[command(name = "gum", version, about = "GUM; the polyploid subgenome divider", long_about = None)]
pub struct Config {
    /// Genome FASTA
    #[arg(short, long)]
    pub genome: PathBuf,

    /// K-mer length; k-4, k-2 and k are analyzed
    #[arg(short, long = "kmer", default_value_t = 21)]
    pub k: usize,

    /// Worker threads (default: available CPUs)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Output directory for combined tables and dendrograms
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// LTR_FINDER_parallel script
    #[arg(long, default_value = "LTR_FINDER_parallel")]
    pub ltr_finder: PathBuf,

    /// Existing LTR table to use instead of running the finder
    #[arg(long, conflicts_with = "no_ltr")]
    pub ltr_table: Option<PathBuf>,

    /// Count k-mers over whole sequences instead of LTR intervals
    #[arg(long)]
    pub no_ltr: bool,

    /// External k-mer counter, called as `<counter> <k> <fasta>`
    #[arg(long)]
    pub counter: Option<PathBuf>,

    /// Keep only sequences whose id matches this regex
    #[arg(long)]
    pub include: Option<String>,

    /// Drop sequences whose id matches this regex (empty to keep all)
    #[arg(long, default_value = DEFAULT_EXCLUDE)]
    pub exclude: String,

    /// Estimated table size in bytes above which counts are paged to disk
    #[arg(long, default_value_t = DEFAULT_MEMORY_LIMIT)]
    pub memory_limit: u64,

    /// Largest dense frequency matrix, in bytes, a k may build
    #[arg(long, default_value_t = DEFAULT_MATRIX_LIMIT)]
    pub matrix_limit: u64,

    /// Parent directory of the run's scratch directory (default: system temp)
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Leave the scratch directory on disk
    #[arg(long)]
    pub keep_workdir: bool,

    /// Also analyze k+2 and k+4
    #[arg(long)]
    pub extended: bool,
}

impl Config {
    /// Every k of the run, in order: k-4, k-2, k, then k+2, k+4 if extended
    pub fn k_values(&self) -> Vec<usize> {
        let offsets: &[isize] = if self.extended {
            &[-4, -2, 0, 2, 4]
        } else {
            &[-4, -2, 0]
        };
        offsets
            .iter()
            .map(|&offset| self.k.saturating_add_signed(offset))
            .collect()
    }

    pub fn threads(&self) -> usize {
        self.threads.unwrap_or_else(rayon::current_num_threads)
    }

    pub fn counter(&self) -> Counter {
        match &self.counter {
            Some(program) => Counter::External(program.clone()),
            None => Counter::BuiltIn,
        }
    }

    pub fn header_filter(&self) -> Result<HeaderFilter, ConfigError> {
        let exclude = Some(self.exclude.as_str()).filter(|e| !e.is_empty());
        Ok(HeaderFilter::new(self.include.as_deref(), exclude)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(&k) = self.k_values().iter().find(|&&k| k == 0 || k > MAX_K) {
            return Err(ConfigError::KmerOutOfRange { k });
        }
        if self.threads == Some(0) {
            return Err(ConfigError::ZeroThreads);
        }
        if self.ltr_table.is_some() && self.no_ltr {
            return Err(ConfigError::LtrConflict);
        }
        self.header_filter()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(["gum"].iter().chain(args)).unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse(&["-g", "genome.fa"]);
        assert_eq!(config.k_values(), [17, 19, 21]);
        assert_eq!(config.output, PathBuf::from("."));
        assert_eq!(config.memory_limit, DEFAULT_MEMORY_LIMIT);
        assert_eq!(config.matrix_limit, DEFAULT_MATRIX_LIMIT);
        assert_eq!(config.counter(), Counter::BuiltIn);
        assert!(config.threads() >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn extended_adds_two_larger_k() {
        let config = parse(&["-g", "genome.fa", "-k", "11", "--extended"]);
        assert_eq!(config.k_values(), [7, 9, 11, 13, 15]);
    }

    #[test]
    fn k_range_is_checked_for_every_k() {
        let err = parse(&["-g", "genome.fa", "-k", "25", "--extended"])
            .validate()
            .unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"k-mer length needs to be larger than zero and no more than 27, got 29");
        assert!(parse(&["-g", "genome.fa", "-k", "5"]).validate().is_ok());
        assert!(matches!(
            parse(&["-g", "genome.fa", "-k", "4"]).validate(),
            Err(ConfigError::KmerOutOfRange { k: 0 })
        ));
    }

    #[test]
    fn bad_threads_and_patterns_are_rejected() {
        assert!(matches!(
            parse(&["-g", "genome.fa", "-t", "0"]).validate(),
            Err(ConfigError::ZeroThreads)
        ));
        assert!(matches!(
            parse(&["-g", "genome.fa", "--include", "chr("]).validate(),
            Err(ConfigError::Filter { .. })
        ));
    }

    #[test]
    fn ltr_sources_are_exclusive() {
        assert!(Config::try_parse_from(["gum", "-g", "x.fa", "--ltr-table", "t.scn", "--no-ltr"]).is_err());

        let mut config = parse(&["-g", "x.fa", "--ltr-table", "t.scn"]);
        config.no_ltr = true;
        assert!(matches!(config.validate(), Err(ConfigError::LtrConflict)));
    }

    #[test]
    fn empty_exclude_keeps_everything() {
        let config = parse(&["-g", "x.fa", "--exclude", ""]);
        assert!(config.header_filter().unwrap().keeps("scaffold_1"));
        let config = parse(&["-g", "x.fa"]);
        assert!(!config.header_filter().unwrap().keeps("scaffold_1"));
    }
}
