//! Zero-filled, consistently ordered k-mer frequency matrices.
//!
//! Sparse per-sequence counts are padded with explicit zeros for every k-mer
//! of the [`CanonicalSpace`], checked for a uniform column count, and laid out
//! as an `ndarray` matrix whose rows follow the store's key order and whose
//! columns follow canonical k-mer order.
use crate::ingest::KmerCounts;
use crate::kmer::{CanonicalSpace, ValidityError};
use crate::store::{MemoryStore, OrderedKeyValueStore, StoreError, StoreKey};
use log::{debug, info};
use ndarray::{Array2, ArrayView1};
use std::collections::{BTreeMap, TryReserveError};

/// Default ceiling on the dense matrix size: 4 GiB
pub const DEFAULT_MATRIX_LIMIT: u64 = 4 * 1024 * 1024 * 1024;

custom_error::custom_error! { pub DensifyError
    Store{source: StoreError} = @{ format!("{}", source) },
    Space{source: ValidityError} = @{ format!("{}", source) },
    Shape{source: ndarray::ShapeError} = @{ format!("could not shape frequency matrix: {}", source) },
    Alloc{source: TryReserveError} = @{ format!("could not allocate frequency matrix: {}", source) },
    Empty = "no sequences to build a frequency matrix from",
    TooLarge{k: usize, rows: usize, bytes: Option<u64>, limit: u64} = @{
        match bytes {
            Some(bytes) => format!(
                "frequency matrix for {} sequences at k={} needs {} bytes, limit is {}",
                rows, k, bytes, limit
            ),
            None => format!(
                "frequency matrix for {} sequences at k={} exceeds the addressable size",
                rows, k
            ),
        }
    },
    Inconsistent{sequence: String, found: usize, expected: usize} = @{
        format!(
            "consistency check failed: sequence {} has {} k-mer entries, expected {}",
            sequence, found, expected
        )
    },
    ForeignKmer{sequence: String, kmer: String} = @{
        format!("sequence {} holds k-mer {:?} outside the canonical space", sequence, kmer)
    },
}

/// Dense k-mer count matrix. Row `i` holds the counts of `labels[i]`, column
/// `j` the count of the k-mer of rank `j` in the canonical space.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyMatrix {
    pub k: usize,
    pub data: Array2<f64>,
    pub labels: Vec<String>,
}

impl FrequencyMatrix {
    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn row(&self, label: &str) -> Option<ArrayView1<'_, f64>> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|i| self.data.row(i))
    }

    /// Count of `kmer` in sequence `label`
    pub fn count(&self, label: &str, kmer: &str) -> Option<f64> {
        let column = CanonicalSpace::new(self.k).ok()?.rank(kmer)?;
        self.row(label).map(|row| row[column])
    }
}

/// Bytes of the dense `f64` matrix for `rows` sequences, `None` on overflow
pub fn matrix_bytes(rows: usize, space: &CanonicalSpace) -> Option<u64> {
    let cells = u64::try_from(rows).ok()?.checked_mul(space.len() as u64)?;
    cells.checked_mul(std::mem::size_of::<f64>() as u64)
}

/// Fail before any zero is written if the matrix would outgrow `limit`
pub fn check_size(rows: usize, space: &CanonicalSpace, limit: u64) -> Result<u64, DensifyError> {
    match matrix_bytes(rows, space) {
        Some(bytes) if bytes <= limit => Ok(bytes),
        bytes => Err(DensifyError::TooLarge {
            k: space.k(),
            rows,
            bytes,
            limit,
        }),
    }
}

/// Insert a zero for every canonical k-mer a sequence has not observed.
///
/// Walks a snapshot of the keys and writes each padded mapping back into the
/// live store. Returns the number of zeros inserted.
pub fn zero_fill<S: OrderedKeyValueStore<KmerCounts>>(
    store: &mut S,
    space: &CanonicalSpace,
) -> Result<usize, DensifyError> {
    let snapshot = store.keys();
    let mut inserted = 0;

    for key in snapshot {
        let mut counts = store.get(&key)?;
        for kmer in space.iter() {
            if let std::collections::btree_map::Entry::Vacant(slot) = counts.entry(kmer) {
                slot.insert(0);
                inserted += 1;
            }
        }
        store.set(key, counts)?;
    }

    Ok(inserted)
}

/// Every sequence must hold exactly as many entries as the first one, and
/// that number must be the size of the canonical space. Returns the common
/// entry count.
pub fn check_consistency<S: OrderedKeyValueStore<KmerCounts>>(
    store: &S,
    space: &CanonicalSpace,
) -> Result<usize, DensifyError> {
    let mut reference: Option<usize> = None;

    for item in store.items() {
        let (key, counts) = item?;
        let expected = *reference.get_or_insert(counts.len());
        if counts.len() != expected || counts.len() != space.len() {
            return Err(DensifyError::Inconsistent {
                sequence: key.to_string(),
                found: counts.len(),
                expected: space.len(),
            });
        }
    }

    reference.ok_or(DensifyError::Empty)
}

/// Project each sequence's counts, sorted by canonical rank, into a matrix row
pub fn materialize<S: OrderedKeyValueStore<KmerCounts>>(
    store: &S,
    space: &CanonicalSpace,
) -> Result<FrequencyMatrix, DensifyError> {
    let n_rows = store.len();
    if n_rows == 0 {
        return Err(DensifyError::Empty);
    }

    let cells = n_rows
        .checked_mul(space.len())
        .ok_or(DensifyError::TooLarge {
            k: space.k(),
            rows: n_rows,
            bytes: None,
            limit: u64::MAX,
        })?;
    let mut data: Vec<f64> = Vec::new();
    data.try_reserve_exact(cells)?;
    let mut labels = Vec::with_capacity(n_rows);

    for item in store.items() {
        let (key, counts) = item?;
        let label = key.to_string();

        let mut entries = counts
            .iter()
            .map(|(kmer, count)| match space.rank(kmer) {
                Some(rank) => Ok((rank, *count)),
                None => Err(DensifyError::ForeignKmer {
                    sequence: label.clone(),
                    kmer: kmer.clone(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_unstable_by_key(|(rank, _)| *rank);

        data.extend(entries.into_iter().map(|(_, count)| count as f64));
        labels.push(label);
    }

    let data = Array2::from_shape_vec((n_rows, space.len()), data)?;
    Ok(FrequencyMatrix {
        k: space.k(),
        data,
        labels,
    })
}

/// Zero-fill, check and materialize the counts in `store` for `k`, within
/// [`DEFAULT_MATRIX_LIMIT`]
pub fn densify<S: OrderedKeyValueStore<KmerCounts>>(
    store: &mut S,
    k: usize,
) -> Result<FrequencyMatrix, DensifyError> {
    densify_within(store, k, DEFAULT_MATRIX_LIMIT)
}

/// [`densify`] with a ceiling of `limit` bytes on the dense matrix. The store
/// is left untouched when the matrix would be larger.
pub fn densify_within<S: OrderedKeyValueStore<KmerCounts>>(
    store: &mut S,
    k: usize,
    limit: u64,
) -> Result<FrequencyMatrix, DensifyError> {
    let space = CanonicalSpace::new(k)?;
    if store.is_empty() {
        return Err(DensifyError::Empty);
    }
    check_size(store.len(), &space, limit)?;
    info!(
        "Densifying {} sequences against {} canonical {}-mers",
        store.len(),
        space.len(),
        k
    );

    let inserted = zero_fill(store, &space)?;
    debug!("Inserted {} zero counts", inserted);
    check_consistency(store, &space)?;

    let matrix = materialize(store, &space)?;
    info!(
        "Data matrix shape: {} samples x {} features",
        matrix.nrows(),
        matrix.ncols()
    );

    Ok(matrix)
}

/// [`densify`] for an in-memory table such as a loaded combined artifact.
/// The input is left untouched.
pub fn densify_map(
    counts: &BTreeMap<String, KmerCounts>,
    k: usize,
) -> Result<FrequencyMatrix, DensifyError> {
    let mut store: MemoryStore<KmerCounts> = counts
        .iter()
        .map(|(sequence, counts)| (StoreKey::from(sequence.as_str()), counts.clone()))
        .collect();
    densify(&mut store, k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> BTreeMap<String, KmerCounts> {
        let mut data = BTreeMap::new();
        data.insert(
            "A1".to_string(),
            [("AAT", 1), ("AAA", 2), ("AAC", 4)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        );
        data.insert(
            "B2".to_string(),
            [("AAT", 2), ("AAC", 5)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        );
        data
    }

    #[test]
    fn end_to_end_scenario() {
        let matrix = densify_map(&scenario(), 3).unwrap();

        assert_eq!(matrix.data.dim(), (2, 125));
        assert_eq!(matrix.labels, ["A1", "B2"]);

        assert_eq!(matrix.count("A1", "AAT"), Some(1.0));
        assert_eq!(matrix.count("A1", "AAA"), Some(2.0));
        assert_eq!(matrix.count("A1", "AAC"), Some(4.0));
        assert_eq!(matrix.count("B2", "AAT"), Some(2.0));
        assert_eq!(matrix.count("B2", "AAC"), Some(5.0));
        assert_eq!(matrix.count("B2", "AAA"), Some(0.0));

        let a1 = matrix.row("A1").unwrap();
        assert_eq!(a1.iter().filter(|&&c| c == 0.0).count(), 122);
        assert_eq!(a1.sum(), 7.0);
        let b2 = matrix.row("B2").unwrap();
        assert_eq!(b2.iter().filter(|&&c| c == 0.0).count(), 123);
    }

    #[test]
    fn columns_follow_canonical_order() {
        let matrix = densify_map(&scenario(), 3).unwrap();
        // AAA, AAT, AAG, AAC are ranks 0..4
        assert_eq!(
            matrix.data.row(0).iter().take(4).copied().collect::<Vec<_>>(),
            [2.0, 1.0, 0.0, 4.0]
        );
        assert_eq!(
            matrix.data.row(1).iter().take(4).copied().collect::<Vec<_>>(),
            [0.0, 2.0, 0.0, 5.0]
        );
    }

    #[test]
    fn every_cell_is_observed_count_or_zero() {
        let input = scenario();
        let matrix = densify_map(&input, 3).unwrap();
        let space = CanonicalSpace::new(3).unwrap();

        for (i, label) in matrix.labels.iter().enumerate() {
            for (j, kmer) in space.iter().enumerate() {
                let expected = input[label].get(&kmer).copied().unwrap_or(0) as f64;
                assert_eq!(matrix.data[[i, j]], expected, "{} {}", label, kmer);
            }
        }
    }

    #[test]
    fn densify_is_idempotent() {
        let first = densify_map(&scenario(), 3).unwrap();
        let second = densify_map(&scenario(), 3).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn zero_fill_writes_back_into_store() {
        let mut store: MemoryStore<KmerCounts> = scenario()
            .into_iter()
            .map(|(k, v)| (StoreKey::from(k), v))
            .collect();
        let space = CanonicalSpace::new(2).unwrap();
        let inserted = zero_fill(&mut store, &space).unwrap();

        // three-letter k-mers stay, so each row overshoots the 2-mer space
        assert_eq!(inserted, 50);
        assert_eq!(store.get(&"B2".into()).unwrap().len(), 27);
        assert!(matches!(
            check_consistency(&store, &space),
            Err(DensifyError::Inconsistent { .. })
        ));
    }

    #[test]
    fn jagged_rows_are_fatal() {
        let space = CanonicalSpace::new(2).unwrap();
        let mut store: MemoryStore<KmerCounts> = MemoryStore::new();
        let full: KmerCounts = space.iter().map(|kmer| (kmer, 1)).collect();
        let mut short = full.clone();
        short.remove("NN");
        store.set("chr1".into(), full).unwrap();
        store.set("chr2".into(), short).unwrap();

        let err = check_consistency(&store, &space).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"consistency check failed: sequence chr2 has 24 k-mer entries, expected 25");
        assert!(materialize(&store, &space).is_err());
    }

    #[test]
    fn foreign_kmers_never_reach_the_matrix() {
        let mut data = scenario();
        data.get_mut("A1").unwrap().insert("AAX".to_string(), 9);
        assert!(matches!(
            densify_map(&data, 3),
            Err(DensifyError::Inconsistent { .. })
        ));
    }

    #[test]
    fn oversized_matrix_fails_before_zero_fill() {
        let mut store: MemoryStore<KmerCounts> = scenario()
            .into_iter()
            .map(|(k, v)| (StoreKey::from(k), v))
            .collect();

        let err = densify(&mut store, 17).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"frequency matrix for 2 sequences at k=17 needs 12207031250000 bytes, limit is 4294967296");
        // nothing was padded
        assert_eq!(store.get(&"A1".into()).unwrap().len(), 3);
        assert_eq!(store.get(&"B2".into()).unwrap().len(), 2);
    }

    #[test]
    fn limit_is_inclusive_and_overflow_is_too_large() {
        let space = CanonicalSpace::new(2).unwrap();
        assert_eq!(check_size(2, &space, 400).unwrap(), 400);
        assert!(matches!(
            check_size(2, &space, 399),
            Err(DensifyError::TooLarge { k: 2, rows: 2, bytes: Some(400), limit: 399 })
        ));

        let space = CanonicalSpace::new(27).unwrap();
        assert_eq!(matrix_bytes(usize::MAX, &space), None);
        assert!(matches!(
            check_size(usize::MAX, &space, u64::MAX),
            Err(DensifyError::TooLarge { bytes: None, .. })
        ));

        let mut store: MemoryStore<KmerCounts> = scenario()
            .into_iter()
            .map(|(k, v)| (StoreKey::from(k), v))
            .collect();
        assert!(matches!(
            densify_within(&mut store, 3, 125 * 8),
            Err(DensifyError::TooLarge { .. })
        ));
        assert_eq!(densify_within(&mut store, 3, 2 * 125 * 8).unwrap().nrows(), 2);
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            densify_map(&BTreeMap::new(), 3),
            Err(DensifyError::Empty)
        ));
    }
}
