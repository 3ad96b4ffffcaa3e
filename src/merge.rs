//! K-way merge of multiple key-sorted segments into a smaller, newly written
//! set of key-sorted segments.
//!
//! Ties are broken by the newest segment winning (Variant A from the read
//! path's own tie rule): entries are popped in ascending-key,
//! descending-timestamp order, the first pop for a key is emitted, and every
//! later pop for the same key is discarded as stale. Discarding a duplicate
//! still pulls that source's next entry into the heap — skipping this step
//! would silently strand the rest of that segment once its first collision
//! happened.

use std::cmp::Reverse;
use std::path::Path;

use binary_heap_plus::*;

use crate::cancel::CancellationToken;
use crate::kv::Entry;
use crate::segment::{EntryIter, Segment};
use crate::{Error, Result};

struct Source {
    iter: EntryIter,
    segment_index: usize,
}

struct HeapItem {
    key: String,
    timestamp: crate::segment::Timestamp,
    value: String,
    segment_index: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.timestamp == other.timestamp
    }
}
impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Ascending key; within a tied key, the newer timestamp sorts first
        // so it pops before older entries for the same key.
        self.key
            .cmp(&other.key)
            .then_with(|| Reverse(self.timestamp).cmp(&Reverse(other.timestamp)))
    }
}

/// Merges `segments` (oldest-first order does not matter; timestamps carried
/// on each entry decide precedence) into fresh segments under `output_dir`,
/// each capped at `segment_size` entries. When `purge_tombstones` is set
/// (pass this only when `segments` covers every live segment, i.e. a full
/// compaction), a TOMBSTONE value is dropped from the output entirely rather
/// than carried forward, since no older data could still need it to shadow.
///
/// On cancellation, every output segment written so far by this call is
/// deleted and `Error::Cancelled` is returned; the input segments are left
/// untouched either way — removing them is the caller's job once it has
/// safely swapped them out of the live set.
pub fn merge(
    segments: &[Segment],
    output_dir: &Path,
    segment_size: usize,
    purge_tombstones: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Vec<Segment>> {
    let mut sources: Vec<Source> = Vec::with_capacity(segments.len());
    for (segment_index, segment) in segments.iter().enumerate() {
        sources.push(Source {
            iter: segment.entries()?,
            segment_index,
        });
    }
    let timestamps: Vec<_> = segments.iter().map(Segment::timestamp).collect();

    let mut heap = BinaryHeap::<HeapItem, MinComparator>::new_min();
    for source in &mut sources {
        if let Some(item) = next_item(source, &timestamps)? {
            heap.push(item);
        }
    }

    let mut outputs: Vec<Segment> = Vec::new();
    let mut current = Segment::create(output_dir)?;
    let mut last_emitted_key: Option<String> = None;

    let result = (|| -> Result<()> {
        while let Some(item) = heap.pop() {
            cancel.check()?;

            let source = &mut sources[item.segment_index];
            if let Some(next) = next_item(source, &timestamps)? {
                heap.push(next);
            }

            if last_emitted_key.as_deref() == Some(item.key.as_str()) {
                continue;
            }
            last_emitted_key = Some(item.key.clone());

            if purge_tombstones == Some(item.value.as_str()) {
                continue;
            }

            if current.entry_count() >= segment_size {
                current.close()?;
                outputs.push(std::mem::replace(&mut current, Segment::create(output_dir)?));
            }
            current.add_entry(Entry { key: item.key, value: item.value })?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            current.close()?;
            if current.entry_count() > 0 {
                outputs.push(current);
            } else {
                current.delete_file()?;
            }
            Ok(outputs)
        }
        Err(err) => {
            let _ = current.close();
            let _ = current.delete_file();
            for segment in &outputs {
                let _ = segment.delete_file();
            }
            Err(err)
        }
    }
}

fn next_item(source: &mut Source, timestamps: &[crate::segment::Timestamp]) -> Result<Option<HeapItem>> {
    match source.iter.next() {
        None => Ok(None),
        Some(Ok(entry)) => Ok(Some(HeapItem {
            key: entry.key,
            timestamp: timestamps[source.segment_index],
            value: entry.value,
            segment_index: source.segment_index,
        })),
        Some(Err(err)) => Err(Error::from(err)),
    }
}
