//! Probabilistic admission filter guarding the read path.
//!
//! Sized from an expected-item count and target false-positive rate with the
//! standard formulas, and hashed with `k` independent seeds folded through a
//! MurmurHash3-style 32-bit finalizer. A miss here is authoritative and lets
//! `Engine::get` skip the MemTable, sparse index, and every segment entirely.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use bit_vec::BitVec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BloomError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("persisted bloom filter is inconsistent: expected {expected} bits, found {found}")]
    SizeMismatch { expected: usize, found: usize },
}

type Result<T> = std::result::Result<T, BloomError>;

/// On-disk record: a textual snapshot of everything needed to reconstruct
/// the filter without re-deriving its seeds.
#[derive(Serialize, Deserialize)]
struct BloomFile {
    expected_items: usize,
    false_positive_rate: f64,
    bit_array_length: usize,
    hash_function_count: usize,
    seeds: Vec<u32>,
    bits: Vec<bool>,
}

pub struct BloomFilter {
    bits: BitVec,
    seeds: Vec<u32>,
    expected_items: usize,
    false_positive_rate: f64,
}

impl BloomFilter {
    /// Sizes the filter with `m = ceil(-n * ln(p) / ln(2)^2)` bits and
    /// `k = ceil(m/n * ln(2))` hash functions.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let expected_items = expected_items.max(1);
        let false_positive_rate = false_positive_rate.clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON);

        let n = expected_items as f64;
        let m = (-n * false_positive_rate.ln() / std::f64::consts::LN_2.powi(2)).ceil() as usize;
        let m = m.max(8);
        let k = ((m as f64 / n) * std::f64::consts::LN_2).ceil() as usize;
        let k = k.max(1);

        Self {
            bits: BitVec::from_elem(m, false),
            seeds: generate_seeds(k),
            expected_items,
            false_positive_rate,
        }
    }

    pub fn bit_array_length(&self) -> usize {
        self.bits.len()
    }

    pub fn hash_function_count(&self) -> usize {
        self.seeds.len()
    }

    /// Fraction of bits currently set; an approximate fill level, not a
    /// false-positive-rate estimate.
    pub fn fill_ratio(&self) -> f64 {
        let set = self.bits.iter().filter(|b| *b).count();
        set as f64 / self.bits.len().max(1) as f64
    }

    pub fn add(&mut self, key: &str) {
        for idx in self.bit_indices(key) {
            self.bits.set(idx, true);
        }
    }

    /// `false` is authoritative: the key is absent from every live component.
    /// `true` merely licenses a slow-path lookup.
    pub fn might_contain(&self, key: &str) -> bool {
        self.bit_indices(key).all(|idx| self.bits.get(idx).unwrap_or(false))
    }

    fn bit_indices(&self, key: &str) -> impl Iterator<Item = usize> + '_ {
        let bytes = key.as_bytes();
        let m = self.bits.len() as u32;
        self.seeds
            .iter()
            .map(move |&seed| (murmur3_32(bytes, seed) % m) as usize)
    }

    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = BloomFile {
            expected_items: self.expected_items,
            false_positive_rate: self.false_positive_rate,
            bit_array_length: self.bits.len(),
            hash_function_count: self.seeds.len(),
            seeds: self.seeds.clone(),
            bits: self.bits.iter().collect(),
        };
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &file)?;
        Ok(())
    }

    /// Rejects a persisted record with missing or size-inconsistent fields
    /// rather than silently reconstructing an unsound filter.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let file: BloomFile = serde_json::from_reader(reader)?;

        if file.seeds.len() != file.hash_function_count || file.bits.len() != file.bit_array_length {
            return Err(BloomError::SizeMismatch {
                expected: file.bit_array_length,
                found: file.bits.len(),
            });
        }

        let mut bits = BitVec::from_elem(file.bit_array_length, false);
        for (idx, set) in file.bits.into_iter().enumerate() {
            bits.set(idx, set);
        }

        Ok(Self {
            bits,
            seeds: file.seeds,
            expected_items: file.expected_items,
            false_positive_rate: file.false_positive_rate,
        })
    }
}

/// Deterministic, reproducible seed generation so two processes that agree
/// on `k` agree on the same hash family.
fn generate_seeds(k: usize) -> Vec<u32> {
    let mut state: u32 = 0x9e3779b9;
    (0..k)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            state
        })
        .collect()
}

/// MurmurHash3 x86_32, minus incremental tail handling (each 4-byte chunk is
/// processed uniformly; a short final chunk is simply zero-padded by
/// `chunks`, which is equivalent for our fixed little-endian key bytes).
fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mut h = seed;
    for chunk in data.chunks(4) {
        let mut k: u32 = 0;
        for (i, &b) in chunk.iter().enumerate() {
            k |= (b as u32) << (8 * i);
        }
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);

        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    h ^= data.len() as u32;
    fmix32(h)
}

fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_false_negatives() {
        let mut bloom = BloomFilter::new(100, 0.01);
        for i in 0..100 {
            bloom.add(&format!("key-{i}"));
        }
        for i in 0..100 {
            assert!(bloom.might_contain(&format!("key-{i}")));
        }
    }

    #[test]
    fn absent_key_usually_reported_absent() {
        let mut bloom = BloomFilter::new(1000, 0.001);
        for i in 0..1000 {
            bloom.add(&format!("present-{i}"));
        }
        assert!(!bloom.might_contain("definitely-not-inserted"));
    }

    #[test]
    fn persists_and_reloads() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bloom.json");

        let mut bloom = BloomFilter::new(50, 0.01);
        bloom.add("hello");
        bloom.persist(&path)?;

        let reloaded = BloomFilter::load(&path)?;
        assert!(reloaded.might_contain("hello"));
        assert_eq!(reloaded.bit_array_length(), bloom.bit_array_length());
        assert_eq!(reloaded.hash_function_count(), bloom.hash_function_count());
        Ok(())
    }

    #[test]
    fn rejects_size_inconsistent_file() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{"expected_items":10,"false_positive_rate":0.01,"bit_array_length":10,"hash_function_count":2,"seeds":[1],"bits":[]}"#,
        )?;
        assert!(BloomFilter::load(&path).is_err());
        Ok(())
    }
}
