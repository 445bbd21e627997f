//! Run-length encoding for binary pixel masks
//!
//! A mask is stored as `(start, length)` pairs of `u32`, one pair per
//! maximal run of set pixels in row-major index space. Runs are sorted by
//! start, never overlap and never touch (touching runs are merged), and a
//! length of zero never appears. The decoded size is always supplied by the
//! caller.

use crate::error::{BgKeyError, Result};
use serde::{Deserialize, Serialize};

/// Compressed binary mask
///
/// Serialized as a flat `[start, length, ...]` integer array. Deserializing
/// goes through [`RleMask::from_runs`], so malformed runs are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u32>", into = "Vec<u32>")]
pub struct RleMask {
    runs: Vec<[u32; 2]>,
}

impl TryFrom<Vec<u32>> for RleMask {
    type Error = BgKeyError;

    fn try_from(values: Vec<u32>) -> Result<Self> {
        Self::from_runs(values)
    }
}

impl From<RleMask> for Vec<u32> {
    fn from(mask: RleMask) -> Self {
        mask.as_slice().to_vec()
    }
}

impl RleMask {
    /// Mask with no set pixels
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Encode a binary mask with a single linear scan
    #[must_use]
    pub fn encode(mask: &[bool]) -> Self {
        let mut runs = Vec::new();
        let mut run_start: Option<usize> = None;

        for (index, &set) in mask.iter().enumerate() {
            match (set, run_start) {
                (true, None) => run_start = Some(index),
                (false, Some(start)) => {
                    runs.push([start as u32, (index - start) as u32]);
                    run_start = None;
                },
                _ => {},
            }
        }
        if let Some(start) = run_start {
            runs.push([start as u32, (mask.len() - start) as u32]);
        }

        Self { runs }
    }

    /// Decode into a mask of `size` pixels; runs past `size` are clipped
    #[must_use]
    pub fn decode(&self, size: usize) -> Vec<bool> {
        let mut mask = vec![false; size];
        for (start, length) in self.iter_runs() {
            let start = start as usize;
            if start >= size {
                break;
            }
            let end = (start + length as usize).min(size);
            mask[start..end].fill(true);
        }
        mask
    }

    /// Logical OR of two masks of the same decoded size
    ///
    /// Decodes both, ORs them and re-encodes. Merges only happen during region
    /// consolidation, so the simple approach is fine.
    #[must_use]
    pub fn merge(&self, other: &RleMask, size: usize) -> RleMask {
        let mut merged = self.decode(size);
        for (bit, other_bit) in merged.iter_mut().zip(other.decode(size)) {
            *bit |= other_bit;
        }
        RleMask::encode(&merged)
    }

    /// Number of set pixels, without decoding
    #[must_use]
    pub fn count_set_bits(&self) -> usize {
        self.iter_runs().map(|(_, length)| length as usize).sum()
    }

    /// Whether the pixel at `index` is set, by binary search over runs
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        let Ok(index) = u32::try_from(index) else {
            return false;
        };
        // First run whose start is beyond `index`; the candidate is the one before it
        let after = self.runs.partition_point(|&[start, _]| start <= index);
        let Some(&[start, length]) = after.checked_sub(1).and_then(|i| self.runs.get(i)) else {
            return false;
        };
        u64::from(index) < u64::from(start) + u64::from(length)
    }

    /// Number of runs
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Iterate over `(start, length)` pairs
    pub fn iter_runs(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.runs.iter().map(|&[start, length]| (start, length))
    }

    /// Flat `[start, length, start, length, ...]` view
    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        self.runs.as_flattened()
    }

    /// Serialize as little-endian `u32` pairs
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.as_slice().iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Parse little-endian `u32` pairs, validating run invariants
    ///
    /// Touching runs are coalesced; zero-length, unsorted or overlapping runs
    /// are rejected.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 8 != 0 {
            return Err(BgKeyError::invalid_mask(format!(
                "Byte length {} is not a whole number of (start, length) pairs",
                bytes.len()
            )));
        }

        let values: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Self::from_runs(values)
    }

    /// Build from flat `(start, length)` values, validating run invariants
    pub fn from_runs(values: Vec<u32>) -> Result<Self> {
        if values.len() % 2 != 0 {
            return Err(BgKeyError::invalid_mask("Odd number of run values"));
        }

        let mut runs: Vec<[u32; 2]> = Vec::with_capacity(values.len() / 2);
        let mut previous_end: Option<u64> = None;
        for pair in values.chunks_exact(2) {
            let (start, length) = (pair[0], pair[1]);
            if length == 0 {
                return Err(BgKeyError::invalid_mask(format!(
                    "Run at {} has zero length",
                    start
                )));
            }
            let end = u64::from(start) + u64::from(length);
            if end > u64::from(u32::MAX) {
                return Err(BgKeyError::invalid_mask(format!(
                    "Run at {} overflows the index space",
                    start
                )));
            }

            match previous_end {
                Some(prev) if u64::from(start) < prev => {
                    return Err(BgKeyError::invalid_mask(format!(
                        "Run at {} overlaps or precedes the previous run",
                        start
                    )));
                },
                Some(prev) if u64::from(start) == prev => {
                    if let Some(last) = runs.last_mut() {
                        last[1] += length;
                    }
                },
                _ => runs.push([start, length]),
            }
            previous_end = Some(end);
        }

        Ok(Self { runs })
    }
}
