use crate::kmer::Kmer;
use crate::store::{OrderedKeyValueStore, StoreError, StoreKey};
use log::{debug, info};
use serde::ser::{SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Sparse k-mer counts of one sequence
pub type KmerCounts = BTreeMap<String, u64>;

/// File names carry the owning sequence id before this delimiter, e.g.
/// `chr1.split.fa` or `chr1.split.k21.tsv`
pub const SPLIT_DELIMITER: &str = ".split";

custom_error::custom_error! { pub IngestError
    Io{source: io::Error} = @{ format!("could not read count data: {}", source) },
    Store{source: StoreError} = @{ format!("{}", source) },
    Json{source: serde_json::Error} = @{ format!("combined k-mer table is not valid JSON: {}", source) },
    BadFileName{path: PathBuf} = @{
        format!("cannot derive a sequence id from file name {}", path.display())
    },
    Malformed{path: PathBuf, line: usize, reason: String} = @{
        format!("{}:{}: malformed count line: {}", path.display(), line, reason)
    },
    DuplicateSequence{sequence: String, path: PathBuf} = @{
        format!("sequence {} appears twice (again in {})", sequence, path.display())
    },
    NoCountFiles{dir: PathBuf, k: usize} = @{
        format!("no k={} count files found in {}", k, dir.display())
    },
}

/// Owning sequence id of a split or count file: the file name up to the first
/// `delimiter`
pub fn sequence_id_from_path(path: &Path, delimiter: &str) -> Result<String, IngestError> {
    let bad_name = || IngestError::BadFileName {
        path: path.to_path_buf(),
    };
    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(bad_name)?;

    match name.find(delimiter) {
        Some(pos) if pos > 0 => Ok(name[..pos].to_string()),
        _ => Err(bad_name()),
    }
}

/// Suffix of count files for one k, see [`crate::counting::count_file_name`]
pub fn count_file_suffix(k: usize) -> String {
    format!(".k{}.tsv", k)
}

/// Find the k-mer count files for `k` in `dir`, sorted by path
pub fn discover_count_files(dir: &Path, k: usize) -> Result<Vec<PathBuf>, IngestError> {
    let suffix = count_file_suffix(k);
    let mut count_files = Vec::new();

    for path in fs::read_dir(dir)? {
        let path = path?.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.ends_with(&suffix) {
                count_files.push(path);
            }
        }
    }

    if count_files.is_empty() {
        return Err(IngestError::NoCountFiles {
            dir: dir.to_path_buf(),
            k,
        });
    }
    count_files.sort();

    Ok(count_files)
}

/// Parse one `<kmer>\t<count>` line
fn parse_count_line(line: &str, k: usize) -> Result<(String, u64), String> {
    let fields: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
    if fields.len() != 2 {
        return Err(format!(
            "expected 2 tab-separated fields, found {}",
            fields.len()
        ));
    }

    let kmer = Kmer::parse(fields[0], k).map_err(|e| e.to_string())?;
    let count = fields[1]
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("count {:?} is not a non-negative integer", fields[1]))?;

    Ok((kmer.to_string(), count))
}

/// Read a count file. Any ill-formed line fails the whole file; repeated
/// k-mers are summed.
pub fn parse_count_file(path: &Path, k: usize) -> Result<KmerCounts, IngestError> {
    let reader = BufReader::new(File::open(path)?);
    let mut counts = KmerCounts::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |reason: String| IngestError::Malformed {
            path: path.to_path_buf(),
            line: idx + 1,
            reason,
        };

        let (kmer, count) = parse_count_line(&line, k).map_err(malformed)?;
        let slot = counts.entry(kmer).or_insert(0);
        *slot = slot
            .checked_add(count)
            .ok_or_else(|| malformed("count overflows u64".to_string()))?;
    }

    Ok(counts)
}

/// Merge count files into `store`, keyed by sequence id. Returns the number
/// of sequences ingested.
pub fn ingest<S: OrderedKeyValueStore<KmerCounts>>(
    store: &mut S,
    count_files: &[PathBuf],
    k: usize,
    delimiter: &str,
) -> Result<usize, IngestError> {
    for (idx, path) in count_files.iter().enumerate() {
        let sequence = sequence_id_from_path(path, delimiter)?;
        let key = StoreKey::from(sequence.as_str());
        if store.contains(&key) {
            return Err(IngestError::DuplicateSequence {
                sequence,
                path: path.clone(),
            });
        }

        info!(
            "Ingesting counts {}/{}: {}",
            idx + 1,
            count_files.len(),
            sequence
        );
        let counts = parse_count_file(path, k)?;
        debug!("{} has {} distinct {}-mers", sequence, counts.len(), k);
        store.set(key, counts)?;
    }

    Ok(count_files.len())
}

/// Stream the store, in key order, into a pretty JSON object of
/// sequence id -> {kmer: count}
pub fn write_combined<S: OrderedKeyValueStore<KmerCounts>>(
    store: &S,
    path: &Path,
) -> Result<(), IngestError> {
    let writer = BufWriter::new(File::create(path)?);
    let mut serializer = serde_json::Serializer::pretty(writer);

    let mut map = (&mut serializer).serialize_map(Some(store.len()))?;
    for item in store.items() {
        let (key, counts) = item?;
        map.serialize_entry(&key.to_string(), &counts)?;
    }
    map.end()?;
    serializer.into_inner().flush()?;

    Ok(())
}

pub fn read_combined(path: &Path) -> Result<BTreeMap<String, KmerCounts>, IngestError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
