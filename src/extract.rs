use crate::ingest::SPLIT_DELIMITER;
use crate::ltr::IntervalMap;
use bio::io::fasta;
use log::{debug, info, warn};
use regex::Regex;
use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Header patterns of non-chromosomal records excluded by default
pub const DEFAULT_EXCLUDE: &str = r"(?i)(scaffold|contig|unplaced|unloc|random|chrun)";

custom_error::custom_error! { pub ExtractError
    Io{source: io::Error} = @{ format!("could not extract sequences: {}", source) },
    Pattern{source: regex::Error} = @{ format!("invalid header pattern: {}", source) },
    BadSequenceId{id: String} = @{
        format!("sequence id {:?} cannot be used in a file name (no path separators or {:?})", id, SPLIT_DELIMITER)
    },
    DuplicateSequence{id: String} = @{ format!("sequence id {} appears twice in the genome", id) },
    NoSequences{path: PathBuf} = @{
        format!("no sequences left to analyze in {} after filtering", path.display())
    },
}

/// Per-sequence FASTA written for k-mer counting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitFile {
    pub sequence_id: String,
    pub path: PathBuf,
}

/// `<id>.split.fa`
pub fn split_file_name(sequence_id: &str) -> String {
    format!("{}{}.fa", sequence_id, SPLIT_DELIMITER)
}

/// Selects chromosome records by their FASTA id
#[derive(Debug, Clone)]
pub struct HeaderFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl HeaderFilter {
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self, ExtractError> {
        Ok(Self {
            include: include.map(Regex::new).transpose()?,
            exclude: exclude.map(Regex::new).transpose()?,
        })
    }

    pub fn keeps(&self, id: &str) -> bool {
        let included = self.include.as_ref().map_or(true, |re| re.is_match(id));
        let excluded = self.exclude.as_ref().map_or(false, |re| re.is_match(id));
        included && !excluded
    }
}

fn check_sequence_id(id: &str) -> Result<(), ExtractError> {
    if id.is_empty() || id.contains(SPLIT_DELIMITER) || id.contains(['/', '\\']) {
        return Err(ExtractError::BadSequenceId { id: id.to_string() });
    }
    Ok(())
}

/// Write one split file per kept genome record into `out_dir`.
///
/// With `intervals`, each split holds one record `<id>:<start>-<end>` per LTR
/// interval of that sequence, and sequences without intervals are skipped.
/// Without, each split holds the whole sequence.
pub fn extract_splits(
    genome: &Path,
    filter: &HeaderFilter,
    intervals: Option<&IntervalMap>,
    out_dir: &Path,
) -> Result<Vec<SplitFile>, ExtractError> {
    let reader = fasta::Reader::new(File::open(genome)?);
    let mut splits = Vec::new();
    let mut seen = HashSet::new();

    for record in reader.records() {
        let record = record?;
        let id = record.id();
        if !filter.keeps(id) {
            debug!("Excluding {} by header filter", id);
            continue;
        }
        check_sequence_id(id)?;
        if !seen.insert(id.to_string()) {
            return Err(ExtractError::DuplicateSequence { id: id.to_string() });
        }

        let seq = record.seq();
        let pieces: Vec<(String, &[u8])> = match intervals {
            None => vec![(id.to_string(), seq)],
            Some(intervals) => {
                let Some(list) = intervals.get(id) else {
                    debug!("No LTR intervals on {}", id);
                    continue;
                };
                list.iter()
                    .filter_map(|interval| {
                        if interval.end > seq.len() {
                            warn!(
                                "Skipping LTR {}:{}-{} past the sequence end ({})",
                                id,
                                interval.start,
                                interval.end,
                                seq.len()
                            );
                            return None;
                        }
                        let name = format!("{}:{}-{}", id, interval.start, interval.end);
                        Some((name, &seq[interval.start - 1..interval.end]))
                    })
                    .collect()
            }
        };
        if pieces.is_empty() {
            continue;
        }

        let path = out_dir.join(split_file_name(id));
        let mut writer = fasta::Writer::new(File::create(&path)?);
        for (name, piece) in &pieces {
            writer.write(name, None, piece)?;
        }
        writer.flush()?;

        debug!("Wrote {} records to {}", pieces.len(), path.display());
        splits.push(SplitFile {
            sequence_id: id.to_string(),
            path,
        });
    }

    if splits.is_empty() {
        return Err(ExtractError::NoSequences {
            path: genome.to_path_buf(),
        });
    }
    info!("Found {} split files", splits.len());

    Ok(splits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ltr::Interval;
    use std::fs;

    const GENOME: &str = ">chr1 first\nAAAACCCCGGGGTTTT\n>chr2\nACGTACGT\n>scaffold_9\nAAAA\n";

    fn genome(dir: &Path) -> PathBuf {
        let path = dir.join("genome.fa");
        fs::write(&path, GENOME).unwrap();
        path
    }

    #[test]
    fn filter_includes_and_excludes() {
        let filter = HeaderFilter::new(Some("^chr"), Some(DEFAULT_EXCLUDE)).unwrap();
        assert!(filter.keeps("chr1"));
        assert!(!filter.keeps("chrUn_0001"));
        assert!(!filter.keeps("Scaffold12"));
        assert!(!filter.keeps("LG1"));
        assert!(HeaderFilter::new(Some("("), None).is_err());
    }

    #[test]
    fn whole_sequences_without_intervals() {
        let dir = tempfile::tempdir().unwrap();
        let filter = HeaderFilter::new(None, Some(DEFAULT_EXCLUDE)).unwrap();
        let splits = extract_splits(&genome(dir.path()), &filter, None, dir.path()).unwrap();

        let ids: Vec<&str> = splits.iter().map(|s| s.sequence_id.as_str()).collect();
        assert_eq!(ids, ["chr1", "chr2"]);
        assert_eq!(splits[0].path, dir.path().join("chr1.split.fa"));
        let text = fs::read_to_string(&splits[1].path).unwrap();
        assert_eq!(text, ">chr2\nACGTACGT\n");
    }

    #[test]
    fn intervals_are_cut_one_based_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let filter = HeaderFilter::new(None, Some(DEFAULT_EXCLUDE)).unwrap();
        let mut intervals = IntervalMap::new();
        intervals.insert(
            "chr1".to_string(),
            vec![
                Interval { start: 1, end: 4 },
                Interval { start: 13, end: 16 },
                Interval { start: 15, end: 30 },
            ],
        );

        let splits =
            extract_splits(&genome(dir.path()), &filter, Some(&intervals), dir.path()).unwrap();
        assert_eq!(splits.len(), 1);
        let text = fs::read_to_string(&splits[0].path).unwrap();
        insta::assert_snapshot!(text, @r###"
        >chr1:1-4
        AAAA
        >chr1:13-16
        TTTT
        "###);
    }

    #[test]
    fn nothing_left_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let filter = HeaderFilter::new(Some("^nomatch$"), None).unwrap();
        assert!(matches!(
            extract_splits(&genome(dir.path()), &filter, None, dir.path()),
            Err(ExtractError::NoSequences { .. })
        ));
    }

    #[test]
    fn ids_must_be_file_name_safe() {
        assert!(check_sequence_id("chr1").is_ok());
        assert!(check_sequence_id("chr1.split").is_err());
        assert!(check_sequence_id("a/b").is_err());
    }
}
