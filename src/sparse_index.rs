//! In-memory map from sampled keys to {segment, byte-offset} locators.
//! Rebuilt in full (never mutated incrementally) whenever the segment set
//! changes, by walking every live segment in timestamp order and recording
//! a locator for every Nth entry under one counter shared across segments.

use std::collections::BTreeMap;
use std::ops::Bound::{Included, Unbounded};

use crate::segment::{Segment, SegmentError};
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Locator {
    pub offset: u64,
    pub segment_index: usize,
}

#[derive(Default)]
pub struct SparseIndex {
    index: BTreeMap<String, Vec<Locator>>,
}

impl SparseIndex {
    pub fn rebuild(segments: &[Segment], stride: usize) -> Result<Self> {
        let stride = stride.max(1);
        // Locator plus the owning segment's timestamp, kept only long
        // enough to sort each key's candidates newest-first.
        let mut staged: BTreeMap<String, Vec<(Locator, (u64, u64))>> = BTreeMap::new();
        let mut counter: usize = 0;

        for (segment_index, segment) in segments.iter().enumerate() {
            let mut reader = segment.reader()?;
            loop {
                let offset = reader.position()?;
                match reader.read_entry() {
                    Ok(Some(entry)) => {
                        if counter % stride == 0 {
                            staged.entry(entry.key).or_default().push((
                                Locator { offset, segment_index },
                                segment.timestamp(),
                            ));
                        }
                        counter += 1;
                    }
                    Ok(None) => break,
                    Err(SegmentError::Corrupt { line, source }) => {
                        tracing::warn!(segment = %segment.path().display(), %line, %source, "skipping corrupt line during sparse index rebuild");
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        let index = staged
            .into_iter()
            .map(|(key, mut candidates)| {
                // Newest segment first, then largest offset first, so a
                // reader checking a tied sampled key prefers recent data.
                candidates.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.offset.cmp(&a.0.offset)));
                (key, candidates.into_iter().map(|(locator, _)| locator).collect())
            })
            .collect();

        Ok(Self { index })
    }

    /// The greatest sampled key <= `key`, with its locators newest-first.
    pub fn closest_le(&self, key: &str) -> Option<(&str, &[Locator])> {
        self.index
            .range((Unbounded, Included(key.to_owned())))
            .next_back()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }
}
