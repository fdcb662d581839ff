//! Sample tables for progressive files.
//!
//! The builders turn the sample list accumulated by the remuxer into the
//! `stbl` children of a non-fragmented track:
//! - stts: sample durations, run-length encoded
//! - ctts: composition offsets, run-length encoded, omitted when all zero
//! - stsz: per-sample sizes
//! - stsc: samples per chunk, one chunk per added segment
//! - stco/co64: chunk offsets, 64-bit only when needed
//! - stss: sync samples, omitted when every sample is sync
//!
//! [`SampleTable`] goes the other way and resolves a progressive table
//! back into per-sample entries.

use crate::boxes::{
    Co64Box, CttsBox, CttsEntry, StblBox, StblChild, StcoBox, StscBox, StscEntry, StsdBox,
    StssBox, StszBox, SttsBox, SttsEntry,
};
use crate::{Error, Result};
use std::collections::HashSet;

/// One sample as accumulated by the remuxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemuxSample {
    pub size: u32,
    pub duration: u32,
    pub is_sync: bool,
    pub composition_offset: i32,
}

fn run_length<T: PartialEq + Copy>(values: impl IntoIterator<Item = T>) -> Vec<(u32, T)> {
    let mut runs: Vec<(u32, T)> = Vec::new();
    for value in values {
        match runs.last_mut() {
            Some((count, last)) if *last == value => *count += 1,
            _ => runs.push((1, value)),
        }
    }
    runs
}

/// Decoding time to sample.
pub fn build_stts(samples: &[RemuxSample]) -> SttsBox {
    SttsBox {
        entries: run_length(samples.iter().map(|s| s.duration))
            .into_iter()
            .map(|(sample_count, sample_delta)| SttsEntry {
                sample_count,
                sample_delta,
            })
            .collect(),
    }
}

/// Composition time to sample, or `None` when every offset is zero.
///
/// Version 1 (signed offsets) is used only when an offset is negative.
/// A fragment offset that was read from a version-0 `trun` as 2^31 or
/// more arrives here negative and is written as signed.
pub fn build_ctts(samples: &[RemuxSample]) -> Option<CttsBox> {
    if samples.iter().all(|s| s.composition_offset == 0) {
        return None;
    }
    let version = u8::from(samples.iter().any(|s| s.composition_offset < 0));
    Some(CttsBox {
        version,
        entries: run_length(samples.iter().map(|s| s.composition_offset))
            .into_iter()
            .map(|(sample_count, sample_offset)| CttsEntry {
                sample_count,
                sample_offset,
            })
            .collect(),
    })
}

/// Sample sizes, always listed per sample.
pub fn build_stsz(samples: &[RemuxSample]) -> StszBox {
    StszBox {
        sample_size: 0,
        sample_count: samples.len() as u32,
        entry_sizes: samples.iter().map(|s| s.size).collect(),
    }
}

/// Sample to chunk, from the number of samples in each chunk.
pub fn build_stsc(chunk_sample_counts: &[u32]) -> StscBox {
    let mut entries: Vec<StscEntry> = Vec::new();
    for (idx, &count) in chunk_sample_counts.iter().enumerate() {
        if entries.last().is_some_and(|e| e.samples_per_chunk == count) {
            continue;
        }
        entries.push(StscEntry {
            first_chunk: idx as u32 + 1,
            samples_per_chunk: count,
            sample_description_index: 1,
        });
    }
    StscBox { entries }
}

/// `stco` or `co64`, whichever the offsets need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOffsetTable {
    Stco(StcoBox),
    Co64(Co64Box),
}

impl From<ChunkOffsetTable> for StblChild {
    fn from(table: ChunkOffsetTable) -> Self {
        match table {
            ChunkOffsetTable::Stco(b) => StblChild::Stco(b),
            ChunkOffsetTable::Co64(b) => StblChild::Co64(b),
        }
    }
}

/// Chunk offsets. A single offset past `u32::MAX` switches the whole
/// table to `co64`.
pub fn build_chunk_offset_table(offsets: &[u64]) -> ChunkOffsetTable {
    if offsets.iter().any(|&o| o > u32::MAX as u64) {
        ChunkOffsetTable::Co64(Co64Box {
            offsets: offsets.to_vec(),
        })
    } else {
        ChunkOffsetTable::Stco(StcoBox {
            offsets: offsets.iter().map(|&o| o as u32).collect(),
        })
    }
}

/// Sync samples (1-based), or `None` when every sample is sync.
pub fn build_stss(samples: &[RemuxSample]) -> Option<StssBox> {
    if samples.iter().all(|s| s.is_sync) {
        return None;
    }
    Some(StssBox {
        sample_numbers: samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_sync)
            .map(|(i, _)| i as u32 + 1)
            .collect(),
    })
}

/// Assemble a complete progressive `stbl` in canonical child order.
pub fn build_stbl(
    stsd: StsdBox,
    samples: &[RemuxSample],
    chunk_sample_counts: &[u32],
    chunk_offsets: &[u64],
) -> StblBox {
    let mut children = vec![
        StblChild::Stsd(stsd),
        StblChild::Stts(build_stts(samples)),
    ];
    if let Some(ctts) = build_ctts(samples) {
        children.push(StblChild::Ctts(ctts));
    }
    children.push(StblChild::Stsz(build_stsz(samples)));
    children.push(StblChild::Stsc(build_stsc(chunk_sample_counts)));
    children.push(build_chunk_offset_table(chunk_offsets).into());
    if let Some(stss) = build_stss(samples) {
        children.push(StblChild::Stss(stss));
    }
    StblBox { children }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// A resolved sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEntry {
    /// Sample index (0-based).
    pub index: u32,
    /// File offset where sample data starts.
    pub offset: u64,
    pub size: u32,
    /// Decode timestamp in media timescale.
    pub dts: u64,
    pub duration: u32,
    pub cts_offset: i32,
    pub is_sync: bool,
}

impl SampleEntry {
    /// Presentation timestamp, clamped at zero.
    pub fn pts(&self) -> u64 {
        (self.dts as i64 + self.cts_offset as i64).max(0) as u64
    }
}

/// Per-sample view of a progressive sample table.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    pub samples: Vec<SampleEntry>,
}

impl SampleTable {
    /// Resolve the tables of `stbl`. Missing tables fall back to their
    /// defaults (no stss: all sync, no ctts: zero offsets).
    ///
    /// A uniform-size `stsz` claiming more than
    /// [`StszBox::MAX_UNIFORM_SAMPLES`] samples is rejected.
    pub fn from_stbl(stbl: &StblBox) -> Result<Self> {
        let Some(stsz) = stbl.stsz() else {
            return Ok(Self::default());
        };
        if stsz.sample_size == 0 {
            if stsz.entry_sizes.len() != stsz.sample_count as usize {
                return Err(Error::invalid_mp4(format!(
                    "stsz declares {} samples but lists {} sizes",
                    stsz.sample_count,
                    stsz.entry_sizes.len()
                )));
            }
        } else if stsz.sample_count > StszBox::MAX_UNIFORM_SAMPLES {
            return Err(Error::invalid_mp4(format!(
                "stsz declares {} samples of uniform size",
                stsz.sample_count
            )));
        }
        let sample_count = stsz.sample_count as usize;
        if sample_count == 0 {
            return Ok(Self::default());
        }

        let sizes: Vec<u32> = (0..sample_count)
            .map(|i| stsz.size_of(i).unwrap_or(0))
            .collect();
        let chunk_offsets = stbl.chunk_offsets();
        let chunks = resolve_sample_chunks(stbl.stsc(), chunk_offsets.len(), sample_count);
        let offsets = resolve_offsets(&chunks, &chunk_offsets, &sizes);
        let durations = resolve_durations(stbl.stts(), sample_count);
        let cts_offsets = resolve_cts_offsets(stbl.ctts(), sample_count);
        let sync: Option<HashSet<u32>> = stbl
            .stss()
            .map(|stss| stss.sample_numbers.iter().copied().collect());

        let mut dts = 0u64;
        let samples = (0..sample_count)
            .map(|i| {
                let entry = SampleEntry {
                    index: i as u32,
                    offset: offsets[i],
                    size: sizes[i],
                    dts,
                    duration: durations[i],
                    cts_offset: cts_offsets[i],
                    // stss uses 1-based indexing
                    is_sync: sync.as_ref().map_or(true, |s| s.contains(&(i as u32 + 1))),
                };
                dts += durations[i] as u64;
                entry
            })
            .collect();

        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&SampleEntry> {
        self.samples.get(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleEntry> {
        self.samples.iter()
    }

    /// Sum of sample durations.
    pub fn duration(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }

    pub fn total_size(&self) -> u64 {
        self.samples.iter().map(|s| s.size as u64).sum()
    }

    pub fn sync_indices(&self) -> Vec<u32> {
        self.samples
            .iter()
            .filter(|s| s.is_sync)
            .map(|s| s.index)
            .collect()
    }
}

fn resolve_sample_chunks(stsc: Option<&StscBox>, num_chunks: usize, sample_count: usize) -> Vec<usize> {
    let entries = stsc.map(|b| b.entries.as_slice()).unwrap_or_default();
    if entries.is_empty() {
        return vec![0; sample_count];
    }

    let mut result = Vec::with_capacity(sample_count);
    'outer: for (i, entry) in entries.iter().enumerate() {
        let next_first = entries
            .get(i + 1)
            .map_or(num_chunks + 1, |e| e.first_chunk as usize);
        for chunk in entry.first_chunk as usize..next_first {
            if chunk == 0 || chunk > num_chunks {
                break;
            }
            for _ in 0..entry.samples_per_chunk {
                if result.len() >= sample_count {
                    break 'outer;
                }
                result.push(chunk - 1);
            }
        }
    }

    let last = result.last().copied().unwrap_or(0);
    result.resize(sample_count, last);
    result
}

fn resolve_offsets(sample_chunks: &[usize], chunk_offsets: &[u64], sizes: &[u32]) -> Vec<u64> {
    let mut within_chunk = vec![0u64; chunk_offsets.len()];
    sample_chunks
        .iter()
        .zip(sizes)
        .map(|(&chunk, &size)| {
            let base = chunk_offsets.get(chunk).copied().unwrap_or(0);
            let Some(cursor) = within_chunk.get_mut(chunk) else {
                return base;
            };
            let offset = base.saturating_add(*cursor);
            *cursor = cursor.saturating_add(size as u64);
            offset
        })
        .collect()
}

fn resolve_durations(stts: Option<&SttsBox>, sample_count: usize) -> Vec<u32> {
    let mut durations = Vec::with_capacity(sample_count);
    for entry in stts.map(|b| b.entries.as_slice()).unwrap_or_default() {
        let take = (entry.sample_count as usize).min(sample_count - durations.len());
        durations.extend(std::iter::repeat(entry.sample_delta).take(take));
    }
    let last = durations.last().copied().unwrap_or(0);
    durations.resize(sample_count, last);
    durations
}

fn resolve_cts_offsets(ctts: Option<&CttsBox>, sample_count: usize) -> Vec<i32> {
    let mut offsets = Vec::with_capacity(sample_count);
    for entry in ctts.map(|b| b.entries.as_slice()).unwrap_or_default() {
        let take = (entry.sample_count as usize).min(sample_count - offsets.len());
        offsets.extend(std::iter::repeat(entry.sample_offset).take(take));
    }
    offsets.resize(sample_count, 0);
    offsets
}
