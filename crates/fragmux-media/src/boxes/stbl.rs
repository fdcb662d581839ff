//! Sample table container and its tables.
//!
//! - stts: sample durations (decoding time)
//! - ctts: composition time offsets (for B-frames)
//! - stss: sync sample table (keyframes)
//! - stsz: sample sizes
//! - stsc: sample-to-chunk mapping
//! - stco/co64: chunk offsets

use super::{decode_children, RawBox, StsdBox};
use crate::bmff::{write_full_box_header, BmffBox, ByteReader, EncodeChild, FourCc};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StblChild {
    Stsd(StsdBox),
    Stts(SttsBox),
    Ctts(CttsBox),
    Stsz(StszBox),
    Stsc(StscBox),
    Stco(StcoBox),
    Co64(Co64Box),
    Stss(StssBox),
    Raw(RawBox),
}

impl EncodeChild for StblChild {
    fn encode_child(&self, buf: &mut BytesMut) {
        match self {
            Self::Stsd(b) => b.encode(buf),
            Self::Stts(b) => b.encode(buf),
            Self::Ctts(b) => b.encode(buf),
            Self::Stsz(b) => b.encode(buf),
            Self::Stsc(b) => b.encode(buf),
            Self::Stco(b) => b.encode(buf),
            Self::Co64(b) => b.encode(buf),
            Self::Stss(b) => b.encode(buf),
            Self::Raw(b) => b.encode(buf),
        }
    }
}

/// Sample table container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StblBox {
    pub children: Vec<StblChild>,
}

macro_rules! find_child {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self) -> Option<&$ty> {
            self.children.iter().find_map(|c| match c {
                StblChild::$variant(b) => Some(b),
                _ => None,
            })
        }
    };
}

impl StblBox {
    find_child!(stsd, Stsd, StsdBox);
    find_child!(stts, Stts, SttsBox);
    find_child!(ctts, Ctts, CttsBox);
    find_child!(stsz, Stsz, StszBox);
    find_child!(stsc, Stsc, StscBox);
    find_child!(stco, Stco, StcoBox);
    find_child!(co64, Co64, Co64Box);
    find_child!(stss, Stss, StssBox);

    pub fn stsd_mut(&mut self) -> Option<&mut StsdBox> {
        self.children.iter_mut().find_map(|c| match c {
            StblChild::Stsd(b) => Some(b),
            _ => None,
        })
    }

    /// Chunk offsets from whichever of stco/co64 is present.
    pub fn chunk_offsets(&self) -> Vec<u64> {
        if let Some(co64) = self.co64() {
            co64.offsets.clone()
        } else if let Some(stco) = self.stco() {
            stco.offsets.iter().map(|&o| o as u64).collect()
        } else {
            Vec::new()
        }
    }
}

impl BmffBox for StblBox {
    const TYPE: FourCc = FourCc::STBL;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let children = decode_children!(payload, StblChild::Raw, {
            FourCc::STSD => StblChild::Stsd: StsdBox,
            FourCc::STTS => StblChild::Stts: SttsBox,
            FourCc::CTTS => StblChild::Ctts: CttsBox,
            FourCc::STSZ => StblChild::Stsz: StszBox,
            FourCc::STSC => StblChild::Stsc: StscBox,
            FourCc::STCO => StblChild::Stco: StcoBox,
            FourCc::CO64 => StblChild::Co64: Co64Box,
            FourCc::STSS => StblChild::Stss: StssBox,
        });
        Ok(Self { children })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        for child in &self.children {
            child.encode_child(buf);
        }
    }
}

// ---------------------------------------------------------------------------
// stts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// Decoding time to sample.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SttsBox {
    pub entries: Vec<SttsEntry>,
}

impl SttsBox {
    /// Expand the run-length table into one duration per sample.
    pub fn durations(&self) -> Vec<u32> {
        self.entries
            .iter()
            .flat_map(|e| std::iter::repeat(e.sample_delta).take(e.sample_count as usize))
            .collect()
    }

    pub fn sample_count(&self) -> u64 {
        self.entries.iter().map(|e| e.sample_count as u64).sum()
    }
}

impl BmffBox for SttsBox {
    const TYPE: FourCc = FourCc::STTS;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "stts");
        r.read_full_box_header()?;
        let count = r.read_u32()? as usize;
        r.ensure_records(count, 8)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(SttsEntry {
                sample_count: r.read_u32()?,
                sample_delta: r.read_u32()?,
            });
        }
        Ok(Self { entries })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, 0, 0);
        buf.put_u32(self.entries.len() as u32);
        for e in &self.entries {
            buf.put_u32(e.sample_count);
            buf.put_u32(e.sample_delta);
        }
    }
}

// ---------------------------------------------------------------------------
// ctts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CttsEntry {
    pub sample_count: u32,
    pub sample_offset: i32,
}

/// Composition time to sample. Offsets are read as signed in both
/// versions, like `trun` offsets, so version 0 cannot carry values of
/// 2^31 or more.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CttsBox {
    pub version: u8,
    pub entries: Vec<CttsEntry>,
}

impl CttsBox {
    pub fn offsets(&self) -> Vec<i32> {
        self.entries
            .iter()
            .flat_map(|e| std::iter::repeat(e.sample_offset).take(e.sample_count as usize))
            .collect()
    }
}

impl BmffBox for CttsBox {
    const TYPE: FourCc = FourCc::CTTS;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "ctts");
        let (version, _) = r.read_full_box_header()?;
        let count = r.read_u32()? as usize;
        r.ensure_records(count, 8)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let sample_count = r.read_u32()?;
            // v0 is unsigned on paper; the bit pattern is kept either way
            let sample_offset = r.read_i32()?;
            entries.push(CttsEntry {
                sample_count,
                sample_offset,
            });
        }
        Ok(Self { version, entries })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, self.version, 0);
        buf.put_u32(self.entries.len() as u32);
        for e in &self.entries {
            buf.put_u32(e.sample_count);
            buf.put_i32(e.sample_offset);
        }
    }
}

// ---------------------------------------------------------------------------
// stss
// ---------------------------------------------------------------------------

/// Sync samples, as 1-based sample numbers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StssBox {
    pub sample_numbers: Vec<u32>,
}

impl BmffBox for StssBox {
    const TYPE: FourCc = FourCc::STSS;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "stss");
        r.read_full_box_header()?;
        let count = r.read_u32()? as usize;
        r.ensure_records(count, 4)?;
        let mut sample_numbers = Vec::with_capacity(count);
        for _ in 0..count {
            sample_numbers.push(r.read_u32()?);
        }
        Ok(Self { sample_numbers })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, 0, 0);
        buf.put_u32(self.sample_numbers.len() as u32);
        for n in &self.sample_numbers {
            buf.put_u32(*n);
        }
    }
}

// ---------------------------------------------------------------------------
// stsz
// ---------------------------------------------------------------------------

/// Sample sizes. When `sample_size` is non-zero every sample has that
/// size and `entry_sizes` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StszBox {
    pub sample_size: u32,
    pub sample_count: u32,
    pub entry_sizes: Vec<u32>,
}

impl StszBox {
    /// Cap on `sample_count` when every sample shares one size, since
    /// such a table carries no per-sample bytes to bound it.
    pub const MAX_UNIFORM_SAMPLES: u32 = 1 << 24;

    /// Size of sample `index` (0-based).
    pub fn size_of(&self, index: usize) -> Option<u32> {
        if self.sample_size != 0 {
            (index < self.sample_count as usize).then_some(self.sample_size)
        } else {
            self.entry_sizes.get(index).copied()
        }
    }
}

impl BmffBox for StszBox {
    const TYPE: FourCc = FourCc::STSZ;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "stsz");
        r.read_full_box_header()?;
        let sample_size = r.read_u32()?;
        let sample_count = r.read_u32()?;
        if sample_size != 0 && sample_count > Self::MAX_UNIFORM_SAMPLES {
            return Err(Error::invalid_mp4(format!(
                "stsz declares {sample_count} samples of uniform size"
            )));
        }
        let entry_sizes = if sample_size == 0 {
            r.ensure_records(sample_count as usize, 4)?;
            let mut sizes = Vec::with_capacity(sample_count as usize);
            for _ in 0..sample_count {
                sizes.push(r.read_u32()?);
            }
            sizes
        } else {
            Vec::new()
        };
        Ok(Self {
            sample_size,
            sample_count,
            entry_sizes,
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, 0, 0);
        buf.put_u32(self.sample_size);
        buf.put_u32(self.sample_count);
        if self.sample_size == 0 {
            for size in &self.entry_sizes {
                buf.put_u32(*size);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// stsc
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StscEntry {
    /// 1-based.
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

/// Sample to chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StscBox {
    pub entries: Vec<StscEntry>,
}

impl BmffBox for StscBox {
    const TYPE: FourCc = FourCc::STSC;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "stsc");
        r.read_full_box_header()?;
        let count = r.read_u32()? as usize;
        r.ensure_records(count, 12)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(StscEntry {
                first_chunk: r.read_u32()?,
                samples_per_chunk: r.read_u32()?,
                sample_description_index: r.read_u32()?,
            });
        }
        Ok(Self { entries })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, 0, 0);
        buf.put_u32(self.entries.len() as u32);
        for e in &self.entries {
            buf.put_u32(e.first_chunk);
            buf.put_u32(e.samples_per_chunk);
            buf.put_u32(e.sample_description_index);
        }
    }
}

// ---------------------------------------------------------------------------
// stco / co64
// ---------------------------------------------------------------------------

/// Chunk offsets, 32-bit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StcoBox {
    pub offsets: Vec<u32>,
}

impl BmffBox for StcoBox {
    const TYPE: FourCc = FourCc::STCO;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "stco");
        r.read_full_box_header()?;
        let count = r.read_u32()? as usize;
        r.ensure_records(count, 4)?;
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(r.read_u32()?);
        }
        Ok(Self { offsets })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, 0, 0);
        buf.put_u32(self.offsets.len() as u32);
        for o in &self.offsets {
            buf.put_u32(*o);
        }
    }
}

/// Chunk offsets, 64-bit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Co64Box {
    pub offsets: Vec<u64>,
}

impl BmffBox for Co64Box {
    const TYPE: FourCc = FourCc::CO64;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "co64");
        r.read_full_box_header()?;
        let count = r.read_u32()? as usize;
        r.ensure_records(count, 8)?;
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(r.read_u64()?);
        }
        Ok(Self { offsets })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, 0, 0);
        buf.put_u32(self.offsets.len() as u32);
        for o in &self.offsets {
            buf.put_u64(*o);
        }
    }
}
