use crate::clustering::{hierarchical_clustering, ClusterError};
use crate::config::{Config, ConfigError};
use crate::counting::{count_all, CountError, Counter};
use crate::densify::{densify_within, DensifyError, FrequencyMatrix};
use crate::extract::{extract_splits, ExtractError, SplitFile};
use crate::ingest::{ingest, write_combined, IngestError, KmerCounts, SPLIT_DELIMITER};
use crate::kmer::CanonicalSpace;
use crate::ltr::{parse_intervals, run_finder, IntervalMap, LtrError};
use crate::plotting::{create_dendrogram, DendrogramArtifacts, PlotError};
use crate::store::{AnyStore, OrderedKeyValueStore, StoreBackend, StoreError};
use crate::workdir::WorkDir;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::{env, fs, io};

custom_error::custom_error! { pub PipelineError
    Config{source: ConfigError} = @{ format!("invalid configuration: {}", source) },
    Io{source: io::Error} = @{ format!("could not prepare directories: {}", source) },
    Ltr{source: LtrError} = @{ format!("LTR detection: {}", source) },
    Extract{source: ExtractError} = @{ format!("sequence extraction: {}", source) },
    Count{source: CountError} = @{ format!("k-mer counting: {}", source) },
    Store{source: StoreError} = @{ format!("k-mer store: {}", source) },
    Ingest{source: IngestError} = @{ format!("ingestion: {}", source) },
    Densify{source: DensifyError} = @{ format!("densification: {}", source) },
    Cluster{source: ClusterError} = @{ format!("clustering: {}", source) },
    Plot{source: PlotError} = @{ format!("plotting: {}", source) },
}

/// Outputs of one finished k
#[derive(Debug, Clone)]
pub struct KRun {
    pub k: usize,
    pub sequences: usize,
    pub backend: StoreBackend,
    pub combined: PathBuf,
    pub dendrogram: DendrogramArtifacts,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: Vec<KRun>,
    pub failed: Vec<(usize, PipelineError)>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// `K<k>.combine.json`
pub fn combined_file_name(k: usize) -> String {
    format!("K{}.combine.json", k)
}

/// Rough size of the zero-filled table for `sequences` rows: one
/// `(String, u64)` entry per canonical k-mer
pub fn estimate_table_bytes(sequences: usize, k: usize) -> u64 {
    let columns = CanonicalSpace::new(k).map(|s| s.len()).unwrap_or(usize::MAX) as u64;
    let entry = (k + std::mem::size_of::<String>() + std::mem::size_of::<u64>()) as u64;
    (sequences as u64).saturating_mul(columns).saturating_mul(entry)
}

/// Run complete analysis: LTR detection, extraction, then k-mer counting,
/// clustering, and plotting for every k
///
/// Fails as a whole only when a stage shared by all k fails. Failures of a
/// single k are logged and collected in the summary.
pub fn run(config: &Config) -> Result<RunSummary, PipelineError> {
    config.validate()?;
    fs::create_dir_all(&config.output)?;

    let parent = config.workdir.clone().unwrap_or_else(env::temp_dir);
    let workdir = WorkDir::create(&parent)?;
    info!("Working directory: {}", workdir.path().display());

    let result = run_in(config, &workdir);

    if config.keep_workdir {
        let kept = workdir.keep();
        info!("Keeping working directory {}", kept.display());
    } else if let Err(e) = workdir.close() {
        warn!("Could not remove working directory: {}", e);
    }

    result
}

fn run_in(config: &Config, workdir: &WorkDir) -> Result<RunSummary, PipelineError> {
    let filter = config.header_filter()?;
    let threads = config.threads();

    let intervals = load_intervals(config, workdir, threads)?;
    let splits = extract_splits(
        &config.genome,
        &filter,
        intervals.as_ref(),
        &workdir.subdir("splits")?,
    )?;

    let counter = config.counter();
    let mut summary = RunSummary::default();

    for k in config.k_values() {
        info!("Starting k-mer analysis for k={}", k);
        match run_k(config, workdir, &splits, &counter, threads, k) {
            Ok(done) => {
                info!("Finished k={}: {}", k, done.dendrogram.image.display());
                summary.completed.push(done);
            }
            Err(e) => {
                error!("k={} failed: {}", k, e);
                summary.failed.push((k, e));
            }
        }
    }

    Ok(summary)
}

fn load_intervals(
    config: &Config,
    workdir: &WorkDir,
    threads: usize,
) -> Result<Option<IntervalMap>, PipelineError> {
    if config.no_ltr {
        info!("Skipping LTR detection, counting whole sequences");
        return Ok(None);
    }

    let table = match &config.ltr_table {
        Some(table) => table.clone(),
        None => run_finder(&config.ltr_finder, &config.genome, threads, &workdir.subdir("ltr")?)?,
    };

    Ok(Some(parse_intervals(&table)?))
}

fn run_k(
    config: &Config,
    workdir: &WorkDir,
    splits: &[SplitFile],
    counter: &Counter,
    threads: usize,
    k: usize,
) -> Result<KRun, PipelineError> {
    let count_dir = workdir.subdir(&format!("k{}", k))?;
    let count_files = count_all(splits, k, &count_dir, counter, threads)?;

    let backend = StoreBackend::select(estimate_table_bytes(count_files.len(), k), config.memory_limit);
    info!("Using {} store for k={}", backend, k);

    let combined = config.output.join(combined_file_name(k));
    let mut store: AnyStore<KmerCounts> = AnyStore::open(backend, &count_dir)?;
    let staged = stage_matrix(&mut store, &count_files, k, &combined, config.matrix_limit);
    let closed = store.close();
    let (sequences, matrix) = staged?;
    closed?;

    let dendrogram = hierarchical_clustering(matrix)?;
    let artifacts = create_dendrogram(&dendrogram, &config.output)?;

    Ok(KRun {
        k,
        sequences,
        backend,
        combined,
        dendrogram: artifacts,
    })
}

/// Ingest, save the combined table, then densify
fn stage_matrix<S: OrderedKeyValueStore<KmerCounts>>(
    store: &mut S,
    count_files: &[PathBuf],
    k: usize,
    combined: &Path,
    matrix_limit: u64,
) -> Result<(usize, FrequencyMatrix), PipelineError> {
    let sequences = ingest(store, count_files, k, SPLIT_DELIMITER)?;

    write_combined(store, combined)?;
    info!("K-mer counts saved to: {}", combined.display());

    let matrix = densify_within(store, k, matrix_limit)?;
    Ok((sequences, matrix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const GENOME: &str = "\
>chr1A
AAAAAAAAAAAACCCCCCCCCCCCAAAAAAAAAAAA
>chr1B
AAAAAAAAAAAACCCCCCCCCCCCAAAAAAAAAAAT
>chr2A
GGGGGGGGGGGGTTTTTTTTTTTTGGGGGGGGGGGG
>scaffold_7
ACGTACGTACGT
";

    fn config(dir: &Path, extra: &[&str]) -> Config {
        let genome = dir.join("genome.fa");
        fs::write(&genome, GENOME).unwrap();
        let genome = genome.to_string_lossy().into_owned();
        let output = dir.join("out").to_string_lossy().into_owned();
        let workdir = dir.to_string_lossy().into_owned();

        let mut args: Vec<&str> = vec![
            "gum",
            "-g",
            genome.as_str(),
            "-o",
            output.as_str(),
            "--workdir",
            workdir.as_str(),
            "-k",
            "6",
            "-t",
            "2",
        ];
        args.extend_from_slice(extra);
        Config::try_parse_from(args).unwrap()
    }

    /// Per-k failures other than PNG rendering, which needs system fonts
    fn hard_failures(summary: &RunSummary) -> Vec<&(usize, PipelineError)> {
        summary
            .failed
            .iter()
            .filter(|(_, e)| !matches!(e, PipelineError::Plot { .. }))
            .collect()
    }

    #[test]
    fn whole_sequence_run_writes_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &["--no-ltr", "--memory-limit", "0"]);

        let summary = run(&config).unwrap();
        assert!(hard_failures(&summary).is_empty(), "{:?}", summary.failed);
        if let Some(done) = summary.completed.first() {
            assert_eq!(done.sequences, 3);
            assert_eq!(done.backend, StoreBackend::Disk);
            assert!(done.dendrogram.image.is_file());
        }

        let combined = crate::ingest::read_combined(&config.output.join("K2.combine.json")).unwrap();
        let ids: Vec<&str> = combined.keys().map(String::as_str).collect();
        assert_eq!(ids, ["chr1A", "chr1B", "chr2A"]);

        let newick = fs::read_to_string(config.output.join("2_analyzed.nwk")).unwrap();
        assert!(newick.trim_end().ends_with(';'));
        for id in ids {
            assert!(newick.contains(id));
        }

        let left: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("gum-"))
            .collect();
        assert!(left.is_empty(), "{:?}", left);
    }

    #[test]
    fn ltr_table_limits_counting_to_intervals() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("genome.fa.finder.combine.scn");
        fs::write(
            &table,
            "[ 1]\tchr1A\t1-12\n[ 2]\tchr1B\t1-12\n[ 3]\tchr2A\t13-24\n",
        )
        .unwrap();
        let table = table.to_string_lossy().into_owned();
        let config = config(dir.path(), &["--ltr-table", &table, "--keep-workdir"]);

        let summary = run(&config).unwrap();
        assert!(hard_failures(&summary).is_empty(), "{:?}", summary.failed);

        let combined = crate::ingest::read_combined(&config.output.join("K2.combine.json")).unwrap();
        assert_eq!(combined.len(), 3);
        assert_eq!(combined["chr1A"]["AA"], 11);
        assert_eq!(combined["chr1B"]["AA"], 11);
        assert_eq!(combined["chr2A"]["TT"], 11);

        // no logger is installed here, so keeping must not depend on logging
        let kept: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with("gum-"))
            .collect();
        assert_eq!(kept.len(), 1, "{:?}", kept);
        let kept = &kept[0];
        assert!(kept.join("splits").join("chr1A.split.fa").is_file());
        assert!(kept.join("k2").join("chr2A.split.k2.tsv").is_file());
    }

    #[test]
    fn failed_k_does_not_stop_the_others() {
        let dir = tempfile::tempdir().unwrap();
        // a single sequence cannot be clustered, for any k
        let config = config(
            dir.path(),
            &["--no-ltr", "--include", "^chr2A$"],
        );

        let summary = run(&config).unwrap();
        assert!(summary.completed.is_empty());
        let failed: Vec<usize> = summary.failed.iter().map(|(k, _)| *k).collect();
        assert_eq!(failed, [2, 4, 6]);
        assert!(matches!(
            summary.failed[0].1,
            PipelineError::Cluster { .. }
        ));
        // the combined tables are written before clustering
        for k in [2, 4, 6] {
            assert!(config.output.join(combined_file_name(k)).is_file());
        }
    }

    #[test]
    fn oversized_k_fails_alone() {
        let dir = tempfile::tempdir().unwrap();
        // 3 rows x 25 columns x 8 bytes fits for k=2, k=4 and k=6 do not
        let config = config(dir.path(), &["--no-ltr", "--matrix-limit", "1000"]);

        let summary = run(&config).unwrap();
        let failed: Vec<usize> = hard_failures(&summary).iter().map(|(k, _)| *k).collect();
        assert_eq!(failed, [4, 6]);
        for (_, e) in hard_failures(&summary) {
            assert!(matches!(
                e,
                PipelineError::Densify {
                    source: DensifyError::TooLarge { .. }
                }
            ));
        }
        assert!(config.output.join("2_analyzed.nwk").is_file());
        // the combined table is still saved for the skipped k
        assert!(config.output.join(combined_file_name(6)).is_file());
    }

    #[test]
    fn missing_ltr_finder_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no_finder.pl").to_string_lossy().into_owned();
        let config = config(dir.path(), &["--ltr-finder", &missing]);
        assert!(matches!(run(&config), Err(PipelineError::Ltr { .. })));
    }

    #[test]
    fn estimate_grows_with_k_and_rows() {
        assert!(estimate_table_bytes(2, 3) < estimate_table_bytes(2, 4));
        assert!(estimate_table_bytes(2, 3) < estimate_table_bytes(3, 3));
        assert_eq!(estimate_table_bytes(0, 21), 0);
    }
}
