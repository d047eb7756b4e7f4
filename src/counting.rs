use crate::extract::SplitFile;
use crate::ingest::SPLIT_DELIMITER;
use crate::kmer::Kmer;
use bio::io::fasta;
use dashmap::DashMap;
use fxhash::FxHasher;
use log::{debug, info};
use rayon::prelude::*;
use std::fs::File;
use std::hash::BuildHasherDefault;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

/// A custom `DashMap` w/ `FxHasher`, keyed by base-5 k-mer code
///
/// # Notes
/// Useful: [Using a Custom Hash Function in Rust](https://docs.rs/hashers/1.0.1/hashers/#using-a-custom-hash-function-in-rust)
type DashFx = DashMap<u64, u64, BuildHasherDefault<FxHasher>>;

custom_error::custom_error! { pub CountError
    Io{source: io::Error} = @{ format!("k-mer counting failed: {}", source) },
    Pool{source: rayon::ThreadPoolBuildError} = @{ format!("could not start counting threads: {}", source) },
    Launch{program: PathBuf, reason: String} = @{
        format!("could not start k-mer counter {}: {}", program.display(), reason)
    },
    ToolFailed{program: PathBuf, input: PathBuf, status: ExitStatus} = @{
        format!("k-mer counter {} exited with {} on {}", program.display(), status, input.display())
    },
}

/// How split files are turned into count files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Counter {
    BuiltIn,
    /// Called as `<program> <k> <split file>`, writing `<kmer>\t<count>` lines
    /// to stdout
    External(PathBuf),
}

/// `<id>.split.k<k>.tsv`
pub fn count_file_name(sequence_id: &str, k: usize) -> String {
    format!("{}{}.k{}.tsv", sequence_id, SPLIT_DELIMITER, k)
}

/// Count every split into `out_dir`, at most `threads` at a time. Returns the
/// count files in the order of `splits`.
pub fn count_all(
    splits: &[SplitFile],
    k: usize,
    out_dir: &Path,
    counter: &Counter,
    threads: usize,
) -> Result<Vec<PathBuf>, CountError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()?;
    info!(
        "Counting {}-mers in {} split files on {} threads",
        k,
        splits.len(),
        threads
    );

    pool.install(|| {
        splits
            .par_iter()
            .map(|split| -> Result<PathBuf, CountError> {
                let output = out_dir.join(count_file_name(&split.sequence_id, k));
                count_split(&split.path, k, &output, counter)?;
                Ok(output)
            })
            .collect()
    })
}

/// Count the k-mers of one split file into `output`
pub fn count_split(
    input: &Path,
    k: usize,
    output: &Path,
    counter: &Counter,
) -> Result<(), CountError> {
    match counter {
        Counter::BuiltIn => {
            let map = build_map(input, k)?;
            write_counts(&map, k, output)?;
            debug!("{}: {} distinct {}-mers", input.display(), map.len(), k);
            Ok(())
        }
        Counter::External(program) => run_external(program, input, k, output),
    }
}

fn run_external(program: &Path, input: &Path, k: usize, output: &Path) -> Result<(), CountError> {
    let stdout = File::create(output)?;
    let status = Command::new(program)
        .arg(k.to_string())
        .arg(input)
        .stdin(Stdio::null())
        .stdout(stdout)
        .status()
        .map_err(|e| CountError::Launch {
            program: program.to_path_buf(),
            reason: e.to_string(),
        })?;

    if !status.success() {
        return Err(CountError::ToolFailed {
            program: program.to_path_buf(),
            input: input.to_path_buf(),
            status,
        });
    }

    Ok(())
}

/// Reads sequences from fasta records in parallel using [`rayon`](https://docs.rs/rayon/),
/// using a customized [`dashmap`](https://docs.rs/dashmap/) with
/// [`FxHasher`](https://docs.rs/fxhash/0.2.1/fxhash/struct.FxHasher.html) to update in
/// parallel a hashmap of k-mer codes (keys) and their frequency in the data (values)
fn build_map(path: &Path, k: usize) -> Result<DashFx, CountError> {
    let map: DashFx = DashMap::with_hasher(BuildHasherDefault::<FxHasher>::default());

    fasta::Reader::new(File::open(path)?)
        .records()
        .par_bridge()
        .try_for_each(|r| -> io::Result<()> {
            let record = r?;
            let seq = record.seq().to_ascii_uppercase();

            process_seq(&seq, k, &map);
            Ok(())
        })?;

    Ok(map)
}

/// Skip windows containing a byte outside the alphabet, jumping past the
/// offending byte
fn process_seq(seq: &[u8], k: usize, kmer_map: &DashFx) {
    let mut i = 0;

    while i + k <= seq.len() {
        let sub = &seq[i..i + k];

        if let Ok(kmer) = Kmer::from_sub(sub) {
            *kmer_map.entry(kmer.encode()).or_insert(0) += 1;

            i += 1;
        } else {
            let invalid_byte_index = Kmer::find_invalid(sub);

            i += invalid_byte_index + 1;
        }
    }
}

/// Write `<kmer>\t<count>` lines in canonical order
fn write_counts(map: &DashFx, k: usize, output: &Path) -> io::Result<()> {
    let mut counts: Vec<(u64, u64)> = map.iter().map(|entry| (*entry.key(), *entry.value())).collect();
    counts.sort_unstable();

    let mut writer = BufWriter::new(File::create(output)?);
    for (code, count) in counts {
        writeln!(writer, "{}\t{}", Kmer::decode(code, k), count)?;
    }
    writer.flush()
}
