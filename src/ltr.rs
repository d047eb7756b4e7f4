use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

custom_error::custom_error! { pub LtrError
    Io{source: io::Error} = @{ format!("could not read LTR intervals: {}", source) },
    Launch{program: PathBuf, reason: String} = @{
        format!("could not start LTR finder {}: {}", program.display(), reason)
    },
    ToolFailed{program: PathBuf, status: ExitStatus} = @{
        format!("LTR finder {} exited with {}", program.display(), status)
    },
    MissingOutput{path: PathBuf} = @{
        format!("LTR finder did not produce {}", path.display())
    },
}

/// A 1-based inclusive range on one sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval {
    pub start: usize,
    pub end: usize,
}

impl Interval {
    /// Number of bases covered
    pub fn span(&self) -> usize {
        self.end - self.start + 1
    }
}

/// LTR intervals grouped by sequence id
pub type IntervalMap = BTreeMap<String, Vec<Interval>>;

/// Run LTR_FINDER_parallel on `genome` inside `workdir` and return the path of
/// its combined table
pub fn run_finder(
    program: &Path,
    genome: &Path,
    threads: usize,
    workdir: &Path,
) -> Result<PathBuf, LtrError> {
    let genome = genome.canonicalize()?;
    let genome_name = genome
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    info!("Running LTR finder on {} with {} threads", genome.display(), threads);
    let status = Command::new("perl")
        .arg(program)
        .arg("-seq")
        .arg(&genome)
        .arg("-threads")
        .arg(threads.to_string())
        .current_dir(workdir)
        .status()
        .map_err(|e| LtrError::Launch {
            program: program.to_path_buf(),
            reason: e.to_string(),
        })?;

    if !status.success() {
        return Err(LtrError::ToolFailed {
            program: program.to_path_buf(),
            status,
        });
    }

    let table = workdir.join(format!("{}.finder.combine.scn", genome_name));
    if !table.is_file() {
        return Err(LtrError::MissingOutput { path: table });
    }

    Ok(table)
}

/// Parse one record: sequence id in field 2, `<start>-<end>` in field 3
pub fn parse_interval_line(line: &str) -> Option<(String, Interval)> {
    let mut fields = line.split('\t');
    let sequence = fields.nth(1)?.trim();
    let (start, end) = fields.next()?.trim().split_once('-')?;
    let start: usize = start.trim().parse().ok()?;
    let end: usize = end.trim().parse().ok()?;

    if sequence.is_empty() || start == 0 || start > end {
        return None;
    }

    Some((sequence.to_string(), Interval { start, end }))
}

/// Read an interval table. Comment and blank lines are ignored, malformed
/// lines are skipped.
pub fn parse_intervals(path: &Path) -> Result<IntervalMap, LtrError> {
    let reader = BufReader::new(File::open(path)?);
    let mut intervals = IntervalMap::new();
    let mut skipped = 0;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_interval_line(&line) {
            Some((sequence, interval)) => intervals.entry(sequence).or_default().push(interval),
            None => {
                debug!("Skipping malformed LTR record at line {}: {:?}", idx + 1, line);
                skipped += 1;
            }
        }
    }

    for list in intervals.values_mut() {
        list.sort();
    }
    if skipped > 0 {
        warn!("Skipped {} malformed LTR records in {}", skipped, path.display());
    }
    info!(
        "Loaded {} LTR intervals on {} sequences",
        intervals.values().map(Vec::len).sum::<usize>(),
        intervals.len()
    );

    Ok(intervals)
}
