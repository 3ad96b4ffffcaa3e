//!
//! A rust implementation of a key-value store using [Log Structured Merge Trees](https://en.wikipedia.org/wiki/Log-structured_merge-tree#:~:text=In%20computer%20science%2C%20the%20log,%2C%20maintain%20key%2Dvalue%20pairs.)
//!
//!
//!
//! ## Example Usage
//!  ```
//! use lsm_engine::{LSMBuilder, CancellationToken};
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dir = tempfile::tempdir()?;
//!     let lsm = LSMBuilder::new()
//!         .persist_data(false)
//!         .segment_size(2)
//!         .inmemory_capacity(1)
//!         .sparse_offset(2)
//!         .base_path(dir.path())
//!         .build()?;
//!
//!     lsm.insert("k1".to_owned(), "v1".to_owned())?;
//!     lsm.insert("k2".to_owned(), "k2".to_owned())?;
//!     lsm.insert("k1".to_owned(), "v_1_1".to_owned())?;
//!     let value = lsm.get("k1", &CancellationToken::new())?;
//!     assert_eq!(value, Some("v_1_1".to_owned()));
//!     Ok(())
//! }
//! ```
//! ## Design
//!
//! `lsm_engine` is an embedded key-value store that uses LSM-trees, a sparse
//! in-memory index, and a probabilistic bloom filter to accelerate "key
//! absent" lookups. An optional [Write-Ahead log](https://en.wikipedia.org/wiki/Write-ahead_logging) (WAL) provides
//! recovery of writes that have not yet reached a segment.
//!
//! The basic architecture is illustrated below:
//!
//! ### Write
//! When a write comes in, the following happens
//! * The entry is appended to the WAL file, if one is configured.
//! * The key is added to the bloom filter.
//! * If the MemTable is at full capacity, its contents are flushed into a
//!   new segment file; if the segment count then reaches `merge_threshold`,
//!   all segments are merged into fewer, larger segments and the sparse
//!   index is rebuilt.
//! * The entry is inserted into the (now possibly empty) MemTable.
//!
//! ### Read
//! When a request for a read is made, the following happens:
//! * The bloom filter is checked first; a negative result is authoritative.
//! * The MemTable is checked next.
//! * Otherwise, the sparse in-memory index locates the closest sampled key
//!   at or below the target and its candidate segment offsets. The engine
//!   scans forward in each candidate segment, newest-first, until it finds
//!   the key, passes it, or exhausts the index, and only then falls back to
//!   scanning every segment from its start in descending-recency order.
//!
//! ### Delete
//! This is just a special case of insert, with the value being a special
//! tombstone sentinel.
//!
//! For more details with visual illustrations, check out [the author's blog post](https://navyazaveri.github.io/algorithms/2020/01/12/write-a-kv-store-from-scratch.html)
//!

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

#[macro_use]
extern crate lazy_static;

pub mod bloom;
pub mod cancel;
pub mod kv;
pub mod memtable;
pub mod merge;
pub mod segment;
pub mod sparse_index;
pub mod wal;

use bloom::BloomFilter;
use kv::Entry;
use memtable::Memtable;
use segment::{ScanResult, Segment};
use sparse_index::SparseIndex;
use wal::Wal;

pub use cancel::CancellationToken;

lazy_static! {
    /// A fixed, reproducible sentinel outside the user value space. Writers
    /// must never store a value equal to this; the engine treats it as
    /// "deleted" wherever it is read back.
    pub static ref TOMBSTONE: String = {
        let rng: StdRng = SeedableRng::seed_from_u64(20);
        rng.sample_iter(&Alphanumeric).take(20).collect::<String>()
    };
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Segment(#[from] segment::SegmentError),

    #[error(transparent)]
    Entry(#[from] kv::EntryError),

    #[error(transparent)]
    Wal(#[from] wal::WalError),

    #[error(transparent)]
    Bloom(#[from] bloom::BloomError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid key: {reason}")]
    Validation { reason: String },

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Full configuration surface (spec §6). `Default` matches §4.6's defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub max_in_memory_size: usize,
    pub sparse_offset: usize,
    pub segment_size: usize,
    pub merge_threshold: usize,
    pub persist_segments: bool,
    pub base_path: PathBuf,
    pub bloom_expected_items: usize,
    pub bloom_false_positive_rate: f64,
    pub wal_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_in_memory_size: 1000,
            sparse_offset: 300,
            segment_size: 50,
            merge_threshold: 3,
            persist_segments: true,
            base_path: PathBuf::from("sst_data"),
            bloom_expected_items: 10_000,
            bloom_false_positive_rate: 0.01,
            wal_path: None,
        }
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.segment_size < self.max_in_memory_size {
            return Err(Error::Validation {
                reason: format!(
                    "segment_size {} cannot be less than max_in_memory_size {}",
                    self.segment_size, self.max_in_memory_size
                ),
            });
        }
        if self.merge_threshold < 2 {
            return Err(Error::Validation {
                reason: format!("merge_threshold {} must be >= 2", self.merge_threshold),
            });
        }
        Ok(())
    }
}

/// Builder for [`Config`] plus the open call itself, mirroring the teacher's
/// original `LSMBuilder` surface and defaults.
pub struct LSMBuilder {
    config: Config,
}

impl Default for LSMBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LSMBuilder {
    pub fn new() -> LSMBuilder {
        LSMBuilder { config: Config::default() }
    }

    pub fn persist_data(mut self, persist: bool) -> Self {
        self.config.persist_segments = persist;
        self
    }

    pub fn segment_size(mut self, size: usize) -> Self {
        self.config.segment_size = size;
        self
    }

    pub fn sparse_offset(mut self, sparse_offset: usize) -> Self {
        self.config.sparse_offset = sparse_offset;
        self
    }

    pub fn inmemory_capacity(mut self, inmemory_capacity: usize) -> Self {
        self.config.max_in_memory_size = inmemory_capacity;
        self
    }

    pub fn merge_threshold(mut self, merge_threshold: usize) -> Self {
        self.config.merge_threshold = merge_threshold;
        self
    }

    pub fn base_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.base_path = path.as_ref().to_path_buf();
        self
    }

    pub fn bloom_expected_items(mut self, n: usize) -> Self {
        self.config.bloom_expected_items = n;
        self
    }

    pub fn bloom_false_positive_rate(mut self, p: f64) -> Self {
        self.config.bloom_false_positive_rate = p;
        self
    }

    pub fn wal_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.wal_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn build(self) -> Result<Engine> {
        Engine::open(self.config)
    }
}

/// Point-in-time counters surfaced for diagnostics and tests; reading them
/// never touches disk beyond what is already resident in memory.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub segment_count: usize,
    pub memtable_len: usize,
    pub bloom_fill_ratio: f64,
}

struct EngineInner {
    memtable: Memtable,
    segments: Vec<Segment>,
    sparse_index: SparseIndex,
    bloom: BloomFilter,
    wal: Option<Wal>,
    config: Config,
}

/// The public, thread-safe handle to a storage engine instance. Cloning an
/// `Engine` shares the same underlying state: all clones observe the same
/// MemTable, segment set, and bloom filter, serialized through one
/// `RwLock` (mutations take the write side, `get` takes only the read side).
#[derive(Clone)]
pub struct Engine {
    inner: Arc<RwLock<EngineInner>>,
}

impl Engine {
    /// Opens (creating if absent) the data directory named by
    /// `config.base_path`, loads every existing segment in filename order,
    /// rebuilds the sparse index, replays all keys into the bloom filter,
    /// and — if a WAL path is configured — replays it into the MemTable.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.base_path)?;

        let mut entries: Vec<_> = fs::read_dir(&config.base_path)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter_map(|path| segment::parse_timestamp(&path).map(|ts| (ts, path)))
            .collect();
        entries.sort_by_key(|(timestamp, _)| *timestamp);

        let mut segments = Vec::with_capacity(entries.len());
        for (_, path) in entries {
            segments.push(Segment::open(path)?);
        }

        let sparse_index = SparseIndex::rebuild(&segments, config.sparse_offset)?;

        let mut bloom = BloomFilter::new(config.bloom_expected_items, config.bloom_false_positive_rate);
        for segment in &segments {
            for entry in segment.entries()? {
                match entry {
                    Ok(entry) => bloom.add(&entry.key),
                    Err(err) => tracing::warn!(segment = %segment.path().display(), %err, "skipping corrupt line while repopulating bloom filter"),
                }
            }
        }

        let mut memtable = Memtable::new(config.max_in_memory_size);
        let wal = match &config.wal_path {
            Some(path) => {
                let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
                let wal = Wal::new(file);
                for entry in wal.read_from_start()? {
                    bloom.add(&entry.key);
                    memtable.insert(entry.key, entry.value);
                }
                Some(wal)
            }
            None => None,
        };

        tracing::info!(segments = segments.len(), base_path = %config.base_path.display(), "engine opened");

        Ok(Engine {
            inner: Arc::new(RwLock::new(EngineInner {
                memtable,
                segments,
                sparse_index,
                bloom,
                wal,
                config,
            })),
        })
    }

    pub fn insert(&self, key: String, value: String) -> Result<()> {
        self.insert_cancellable(key, value, &CancellationToken::new())
    }

    pub fn insert_cancellable(&self, key: String, value: String, cancel: &CancellationToken) -> Result<()> {
        validate_key(&key)?;
        let mut inner = self.inner.write().expect("engine lock poisoned");

        if let Some(wal) = inner.wal.as_mut() {
            wal.append(&Entry { key: key.clone(), value: value.clone() })?;
        }

        if inner.memtable.capacity_reached() && !inner.memtable.contains(&key) {
            flush(&mut inner)?;
            if inner.segments.len() >= inner.config.merge_threshold {
                compact(&mut inner, cancel)?;
            }
        }

        inner.bloom.add(&key);
        inner.memtable.insert(key, value);
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.insert(key.to_owned(), TOMBSTONE.clone())
    }

    pub fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        validate_key_for_read(key)?;
        let inner = self.inner.read().expect("engine lock poisoned");

        if !inner.bloom.might_contain(key) {
            return Ok(None);
        }

        if let Some(value) = inner.memtable.get(key) {
            return Ok(as_present(value));
        }

        if let Some((_, locators)) = inner.sparse_index.closest_le(key) {
            for locator in locators {
                cancel.check()?;
                let segment = &inner.segments[locator.segment_index];
                match segment.search_from(key, locator.offset, cancel)? {
                    ScanResult::Found(value) => return Ok(as_present(&value)),
                    ScanResult::KeyPassed | ScanResult::Eof => continue,
                }
            }
        }

        for segment in inner.segments.iter().rev() {
            cancel.check()?;
            if let ScanResult::Found(value) = segment.search_from_start(key, cancel)? {
                return Ok(as_present(&value));
            }
        }

        Ok(None)
    }

    pub fn contains(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        Ok(self.get(key, cancel)?.is_some())
    }

    /// Flushes the MemTable to a final segment (so its contents survive),
    /// then, unless `persist_segments` is false, leaves every segment file
    /// in place on disk.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write().expect("engine lock poisoned");
        if !inner.memtable.is_empty() {
            flush(&mut inner)?;
        }
        if !inner.config.persist_segments {
            for segment in inner.segments.drain(..) {
                segment.delete_file()?;
            }
            inner.sparse_index = SparseIndex::rebuild(&[], inner.config.sparse_offset)?;
        }
        tracing::info!("engine closed");
        Ok(())
    }

    pub fn stats(&self) -> Stats {
        let inner = self.inner.read().expect("engine lock poisoned");
        Stats {
            segment_count: inner.segments.len(),
            memtable_len: inner.memtable.len(),
            bloom_fill_ratio: inner.bloom.fill_ratio(),
        }
    }
}

fn as_present(value: &str) -> Option<String> {
    if value == TOMBSTONE.as_str() {
        None
    } else {
        Some(value.to_owned())
    }
}

/// Insert's contract: keys must be non-empty and not whitespace-only.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.trim().is_empty() {
        return Err(Error::Validation { reason: "key must be non-empty and not whitespace-only".to_owned() });
    }
    Ok(())
}

/// Read's narrower contract: only an empty key is rejected; a
/// whitespace-only key is simply absent.
fn validate_key_for_read(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::Validation { reason: "key must be non-empty".to_owned() });
    }
    Ok(())
}

fn flush(inner: &mut EngineInner) -> Result<()> {
    let mut segment = Segment::create(&inner.config.base_path)?;
    let entries = inner.memtable.len();
    for (key, value) in inner.memtable.drain() {
        segment.add_entry(Entry { key, value })?;
    }
    segment.close()?;
    tracing::info!(path = %segment.path().display(), entries, "flushed memtable to segment");
    inner.segments.push(segment);
    inner.sparse_index = SparseIndex::rebuild(&inner.segments, inner.config.sparse_offset)?;
    Ok(())
}

/// Full compaction: every live segment is merged into a smaller set, with
/// tombstones dropped since, by definition, no segment remains older than
/// this merge that could still need one as a shadow.
fn compact(inner: &mut EngineInner, cancel: &CancellationToken) -> Result<()> {
    let old_segments = std::mem::take(&mut inner.segments);
    let merged = merge::merge(
        &old_segments,
        &inner.config.base_path,
        inner.config.segment_size,
        Some(TOMBSTONE.as_str()),
        cancel,
    );

    let merged = match merged {
        Ok(merged) => merged,
        Err(err) => {
            inner.segments = old_segments;
            tracing::error!(%err, "merge aborted");
            return Err(err);
        }
    };

    for segment in &old_segments {
        segment.delete_file()?;
    }

    tracing::info!(segments_in = old_segments.len(), segments_out = merged.len(), "merge completed");
    inner.segments = merged;
    inner.sparse_index = SparseIndex::rebuild(&inner.segments, inner.config.sparse_offset)?;
    Ok(())
}
