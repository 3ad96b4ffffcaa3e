//! One immutable, key-sorted on-disk run. A segment's filename encodes the
//! creation timestamp used both to order segments on disk and to break ties
//! during merge; its contents are one JSON-encoded entry per line, written
//! in strictly non-decreasing key order.
//!
//! Segments never keep a reader handle open across calls: every read method
//! opens a fresh file handle, does its work, and lets it drop. This is what
//! makes concurrent `get`s safe to interleave with each other under a
//! shared read lock — there is no file-position state shared between
//! callers the way a single cached reader would have.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::kv::Entry;

pub type Timestamp = (u64, u64);

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("attempted to write key {current:?} after {previous:?}")]
    UnsortedEntries { previous: String, current: String },

    #[error("segment is not open for writing")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("corrupt entry in segment: {line:?}")]
    Corrupt {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, SegmentError>;

/// Outcome of scanning forward through a segment looking for one key.
pub enum ScanResult {
    Found(String),
    /// A key greater than the target was reached first: absent in this segment.
    KeyPassed,
    Eof,
}

static SEGMENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Monotonically non-decreasing (seconds, disambiguator) pair. The
/// disambiguator is a bare process-wide counter, not folded together with
/// sub-second nanoseconds — mixing scales there would let an
/// earlier-in-the-second call with large nanos outrank a later call with
/// small nanos, breaking the non-decreasing guarantee within one second.
fn next_timestamp() -> Timestamp {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seq = SEGMENT_SEQ.fetch_add(1, Ordering::SeqCst);
    (now.as_secs(), seq)
}

/// Matches `^\d+\.\d+\.txt$`; absence of the suffix yields timestamp 0.
pub fn parse_timestamp(path: &Path) -> Option<Timestamp> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".txt")?;
    let (secs, frac) = stem.split_once('.')?;
    if secs.is_empty() || frac.is_empty() {
        return None;
    }
    if !secs.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((secs.parse().ok()?, frac.parse().ok()?))
}

pub fn is_segment_file(path: &Path) -> bool {
    parse_timestamp(path).is_some()
}

pub struct Segment {
    path: PathBuf,
    timestamp: Timestamp,
    writer: Option<BufWriter<File>>,
    previous_key: Option<String>,
    entry_count: usize,
}

impl Segment {
    /// Allocates a fresh timestamp and opens a new, empty segment for
    /// appending under `base_path`.
    pub fn create(base_path: &Path) -> Result<Self> {
        fs::create_dir_all(base_path)?;
        let timestamp = next_timestamp();
        let path = base_path.join(format!("{}.{}.txt", timestamp.0, timestamp.1));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            timestamp,
            writer: Some(BufWriter::new(file)),
            previous_key: None,
            entry_count: 0,
        })
    }

    /// Opens an existing, frozen segment for reading. Its timestamp is
    /// extracted from the filename; no write handle is retained.
    pub fn open(path: PathBuf) -> Result<Self> {
        let timestamp = parse_timestamp(&path).unwrap_or((0, 0));
        Ok(Self {
            path,
            timestamp,
            writer: None,
            previous_key: None,
            entry_count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Appends one entry. Fatal if `entry.key` sorts before the previously
    /// written key.
    pub fn add_entry(&mut self, entry: Entry) -> Result<u64> {
        if let Some(previous) = &self.previous_key {
            if entry.key.as_str() < previous.as_str() {
                return Err(SegmentError::UnsortedEntries {
                    previous: previous.clone(),
                    current: entry.key,
                });
            }
        }

        let writer = self.writer.as_mut().ok_or(SegmentError::Closed)?;
        let offset = writer.stream_position()?;
        let line = serde_json::to_string(&entry).map_err(|source| SegmentError::Corrupt {
            line: format!("{entry:?}"),
            source,
        })?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;

        self.previous_key = Some(entry.key);
        self.entry_count += 1;
        Ok(offset)
    }

    /// Flushes buffered writes and releases the write handle. Guaranteed
    /// before a segment is added to the live set.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    pub fn delete_file(&self) -> Result<()> {
        fs::remove_file(&self.path)?;
        Ok(())
    }

    pub fn reader(&self) -> Result<SegmentReader> {
        SegmentReader::open(&self.path)
    }

    pub fn entries(&self) -> Result<EntryIter> {
        Ok(EntryIter {
            reader: self.reader()?,
            done: false,
        })
    }

    pub fn search_from(
        &self,
        key: &str,
        offset: u64,
        cancel: &CancellationToken,
    ) -> std::result::Result<ScanResult, crate::Error> {
        let mut reader = self.reader()?;
        reader.seek(offset)?;
        loop {
            cancel.check()?;
            match reader.read_entry()? {
                None => return Ok(ScanResult::Eof),
                Some(entry) if entry.key == key => return Ok(ScanResult::Found(entry.value)),
                Some(entry) if entry.key.as_str() > key => return Ok(ScanResult::KeyPassed),
                Some(_) => continue,
            }
        }
    }

    pub fn search_from_start(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<ScanResult, crate::Error> {
        self.search_from(key, 0, cancel)
    }
}

/// A scoped, stateful reader. Acquired for the duration of one sequential
/// scan or one iteration and released at the end of it (see the module-level
/// note on handle scoping) — never cached past the call that opened it.
pub struct SegmentReader {
    reader: BufReader<File>,
}

impl SegmentReader {
    fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
        })
    }

    pub fn position(&mut self) -> Result<u64> {
        Ok(self.reader.stream_position()?)
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn eof(&mut self) -> Result<bool> {
        Ok(self.reader.fill_buf()?.is_empty())
    }

    pub fn read_entry(&mut self) -> Result<Option<Entry>> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches('\n');
        let entry = serde_json::from_str(trimmed).map_err(|source| SegmentError::Corrupt {
            line: trimmed.to_string(),
            source,
        })?;
        Ok(Some(entry))
    }
}

pub struct EntryIter {
    reader: SegmentReader,
    done: bool,
}

impl Iterator for EntryIter {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_entries_in_order() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut segment = Segment::create(dir.path())?;
        segment.add_entry(Entry { key: "k1".into(), value: "v1".into() })?;
        segment.add_entry(Entry { key: "k2".into(), value: "v2".into() })?;
        segment.close()?;

        let values: Vec<_> = segment
            .entries()?
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.value)
            .collect();
        assert_eq!(values, vec!["v1".to_owned(), "v2".to_owned()]);
        Ok(())
    }

    #[test]
    fn rejects_unsorted_write() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut segment = Segment::create(dir.path())?;
        segment.add_entry(Entry { key: "k2".into(), value: "v2".into() })?;
        let result = segment.add_entry(Entry { key: "k1".into(), value: "v1".into() });
        assert!(matches!(result, Err(SegmentError::UnsortedEntries { .. })));
        Ok(())
    }

    #[test]
    fn search_from_offset() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut segment = Segment::create(dir.path())?;
        segment.add_entry(Entry { key: "k1".into(), value: "v1".into() })?;
        let offset2 = segment.add_entry(Entry { key: "k2".into(), value: "v2".into() })?;
        segment.add_entry(Entry { key: "k3".into(), value: "v3".into() })?;
        segment.close()?;

        let cancel = CancellationToken::new();
        match segment.search_from("k2", offset2, &cancel)? {
            ScanResult::Found(v) => assert_eq!(v, "v2"),
            _ => panic!("expected a hit"),
        }
        match segment.search_from("k1", offset2, &cancel)? {
            ScanResult::KeyPassed => {}
            _ => panic!("expected the scan to pass k1's position"),
        }
        Ok(())
    }

    #[test]
    fn filename_encodes_timestamp() {
        let path = PathBuf::from("/tmp/data/12345.6.txt");
        assert_eq!(parse_timestamp(&path), Some((12345, 6)));
        let path = PathBuf::from("/tmp/data/not-a-segment.txt");
        assert_eq!(parse_timestamp(&path), None);
    }
}
