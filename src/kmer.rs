use itertools::Itertools;
use std::fmt;

/// Nucleotide alphabet in canonical order. The position of a byte in this
/// array is its base-5 digit.
pub const ALPHABET: [u8; 5] = [b'A', b'T', b'G', b'C', b'N'];

/// Largest k whose base-5 codes still fit in a `u64`
pub const MAX_K: usize = 27;

custom_error::custom_error! { pub ValidityError
    InvalidByte{byte: u8} = @{ format!("not a valid nucleotide byte: {:?}", char::from(*byte)) },
    WrongLength{expected: usize, found: usize} = @{
        format!("k-mer has length {}, expected {}", found, expected)
    },
    ZeroLength = "k-mer length must be larger than zero",
    SpaceTooLarge{k: usize} = @{
        format!("k-mer space 5^{} does not fit in memory addressing (k must be at most {})", k, MAX_K)
    },
}

/// A single letter of the k-mer alphabet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nucleotide {
    A,
    T,
    G,
    C,
    N,
}

impl TryFrom<u8> for Nucleotide {
    type Error = ValidityError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'A' => Ok(Self::A),
            b'T' => Ok(Self::T),
            b'G' => Ok(Self::G),
            b'C' => Ok(Self::C),
            b'N' => Ok(Self::N),
            _ => Err(ValidityError::InvalidByte { byte: value }),
        }
    }
}

impl Nucleotide {
    pub fn digit(self) -> u64 {
        match self {
            Self::A => 0,
            Self::T => 1,
            Self::G => 2,
            Self::C => 3,
            Self::N => 4,
        }
    }

    fn from_digit(digit: u64) -> Self {
        match digit {
            0 => Self::A,
            1 => Self::T,
            2 => Self::G,
            3 => Self::C,
            _ => Self::N,
        }
    }

    fn into_u8(self) -> u8 {
        ALPHABET[self.digit() as usize]
    }
}

/// A valid k-mer over [`ALPHABET`]
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Kmer(pub Vec<u8>);

impl Kmer {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn add(&mut self, elem: Nucleotide) {
        self.0.push(elem.into_u8())
    }

    pub fn from_sub(sub: &[u8]) -> Result<Self, ValidityError> {
        sub.iter().map(|b| Nucleotide::try_from(*b)).collect()
    }

    /// Parse a k-mer string, requiring exactly `k` letters
    pub fn parse(text: &str, k: usize) -> Result<Self, ValidityError> {
        if text.len() != k {
            return Err(ValidityError::WrongLength {
                expected: k,
                found: text.len(),
            });
        }
        Self::from_sub(text.as_bytes())
    }

    /// Index of the last byte in `sub` outside the alphabet
    pub(crate) fn find_invalid(sub: &[u8]) -> usize {
        sub.iter()
            .rposition(|byte| Nucleotide::try_from(*byte).is_err())
            .unwrap_or(0)
    }

    /// Base-5 code, first letter most significant. Equal to the k-mer's rank
    /// in the canonical space.
    pub fn encode(&self) -> u64 {
        self.0.iter().fold(0, |code, byte| {
            let digit = Nucleotide::try_from(*byte).map(Nucleotide::digit).unwrap_or(4);
            code * 5 + digit
        })
    }

    pub fn decode(mut code: u64, k: usize) -> Self {
        let mut digits = vec![Nucleotide::A; k];
        for slot in digits.iter_mut().rev() {
            *slot = Nucleotide::from_digit(code % 5);
            code /= 5;
        }
        digits.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Nucleotide> for Kmer {
    fn from_iter<I: IntoIterator<Item = Nucleotide>>(iter: I) -> Self {
        let mut k = Self::new();

        for i in iter {
            k.add(i);
        }
        k
    }
}

impl fmt::Display for Kmer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|b| write!(f, "{}", char::from(*b)))
    }
}

/// The complete set of 5^k k-mers for one k, in canonical column order.
///
/// Canonical order is lexicographic over [`ALPHABET`] (A, T, G, C, N) with the
/// first position most significant, so the rank of a k-mer is its base-5
/// code. Every dense matrix row is laid out in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalSpace {
    k: usize,
    len: usize,
}

impl CanonicalSpace {
    pub fn new(k: usize) -> Result<Self, ValidityError> {
        if k == 0 {
            return Err(ValidityError::ZeroLength);
        }
        if k > MAX_K {
            return Err(ValidityError::SpaceTooLarge { k });
        }
        let len = ALPHABET
            .len()
            .checked_pow(k as u32)
            .ok_or(ValidityError::SpaceTooLarge { k })?;

        Ok(Self { k, len })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of k-mers in the space (5^k)
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Enumerate every k-mer in canonical order
    pub fn iter(&self) -> impl Iterator<Item = String> {
        (0..self.k)
            .map(|_| ALPHABET.into_iter())
            .multi_cartesian_product()
            .map(|bytes| bytes.into_iter().map(char::from).collect())
    }

    /// Column index of `kmer`, or `None` if it is not a member of this space
    pub fn rank(&self, kmer: &str) -> Option<usize> {
        Kmer::parse(kmer, self.k)
            .ok()
            .map(|kmer| kmer.encode() as usize)
    }

    pub fn kmer_at(&self, rank: usize) -> Option<String> {
        (rank < self.len).then(|| Kmer::decode(rank as u64, self.k).to_string())
    }
}
