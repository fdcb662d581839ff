//! Movie fragment boxes: moof, mfhd, traf, tfhd, trun.
//!
//! `tfhd` and `trun` are flag-gated: each bit of the 24-bit flags word
//! controls whether one optional field is present, in a fixed order.
//! Decoding tests the bits in that order and encoding recomputes them from
//! which fields are set.

use super::{decode_children, PsshBox, RawBox, SencBox};
use crate::bmff::{write_full_box_header, BmffBox, ByteReader, EncodeChild, FourCc};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

// ---------------------------------------------------------------------------
// mfhd
// ---------------------------------------------------------------------------

/// Movie fragment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MfhdBox {
    pub sequence_number: u32,
}

impl BmffBox for MfhdBox {
    const TYPE: FourCc = FourCc::MFHD;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "mfhd");
        r.read_full_box_header()?;
        Ok(Self {
            sequence_number: r.read_u32()?,
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, 0, 0);
        buf.put_u32(self.sequence_number);
    }
}

// ---------------------------------------------------------------------------
// tfhd
// ---------------------------------------------------------------------------

/// Track fragment header: per-fragment sample defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TfhdBox {
    /// Only the non-presence bits (duration-is-empty, default-base-is-moof)
    /// are taken from here on encode.
    pub flags: u32,
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
}

impl TfhdBox {
    pub const BASE_DATA_OFFSET: u32 = 0x01;
    pub const SAMPLE_DESCRIPTION_INDEX: u32 = 0x02;
    pub const DEFAULT_SAMPLE_DURATION: u32 = 0x08;
    pub const DEFAULT_SAMPLE_SIZE: u32 = 0x10;
    pub const DEFAULT_SAMPLE_FLAGS: u32 = 0x20;
    pub const DURATION_IS_EMPTY: u32 = 0x01_0000;
    pub const DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;

    pub fn duration_is_empty(&self) -> bool {
        self.flags & Self::DURATION_IS_EMPTY != 0
    }

    pub fn default_base_is_moof(&self) -> bool {
        self.flags & Self::DEFAULT_BASE_IS_MOOF != 0
    }

    fn encoded_flags(&self) -> u32 {
        let mut flags = self.flags & (Self::DURATION_IS_EMPTY | Self::DEFAULT_BASE_IS_MOOF);
        for (present, bit) in [
            (self.base_data_offset.is_some(), Self::BASE_DATA_OFFSET),
            (self.sample_description_index.is_some(), Self::SAMPLE_DESCRIPTION_INDEX),
            (self.default_sample_duration.is_some(), Self::DEFAULT_SAMPLE_DURATION),
            (self.default_sample_size.is_some(), Self::DEFAULT_SAMPLE_SIZE),
            (self.default_sample_flags.is_some(), Self::DEFAULT_SAMPLE_FLAGS),
        ] {
            if present {
                flags |= bit;
            }
        }
        flags
    }
}

impl BmffBox for TfhdBox {
    const TYPE: FourCc = FourCc::TFHD;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "tfhd");
        let (_, flags) = r.read_full_box_header()?;
        let track_id = r.read_u32()?;

        // Field order is fixed; only consume what the flags announce
        let base_data_offset = if flags & Self::BASE_DATA_OFFSET != 0 {
            Some(r.read_u64()?)
        } else {
            None
        };
        let sample_description_index = if flags & Self::SAMPLE_DESCRIPTION_INDEX != 0 {
            Some(r.read_u32()?)
        } else {
            None
        };
        let default_sample_duration = if flags & Self::DEFAULT_SAMPLE_DURATION != 0 {
            Some(r.read_u32()?)
        } else {
            None
        };
        let default_sample_size = if flags & Self::DEFAULT_SAMPLE_SIZE != 0 {
            Some(r.read_u32()?)
        } else {
            None
        };
        let default_sample_flags = if flags & Self::DEFAULT_SAMPLE_FLAGS != 0 {
            Some(r.read_u32()?)
        } else {
            None
        };

        Ok(Self {
            flags,
            track_id,
            base_data_offset,
            sample_description_index,
            default_sample_duration,
            default_sample_size,
            default_sample_flags,
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, 0, self.encoded_flags());
        buf.put_u32(self.track_id);
        if let Some(v) = self.base_data_offset {
            buf.put_u64(v);
        }
        for v in [
            self.sample_description_index,
            self.default_sample_duration,
            self.default_sample_size,
            self.default_sample_flags,
        ]
        .into_iter()
        .flatten()
        {
            buf.put_u32(v);
        }
    }
}

// ---------------------------------------------------------------------------
// trun
// ---------------------------------------------------------------------------

/// One sample of a track run. Fields are present when the run's flags say
/// so, and then present for every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrunEntry {
    pub duration: Option<u32>,
    pub size: Option<u32>,
    pub flags: Option<u32>,
    /// Always read as a signed 32-bit value. Version 0 is unsigned on
    /// paper, but writers commonly put negative offsets there, so a
    /// version-0 value of 2^31 or more is taken as negative. Offsets that
    /// large cannot be expressed.
    pub composition_offset: Option<i32>,
}

/// Track fragment run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrunBox {
    pub version: u8,
    /// Per-entry field bits (0x100..0x800) are authoritative here; the
    /// data-offset and first-sample-flags bits follow the options below.
    pub flags: u32,
    /// Offset of the first sample relative to the base data offset.
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<u32>,
    pub entries: Vec<TrunEntry>,
}

impl TrunBox {
    pub const DATA_OFFSET: u32 = 0x001;
    pub const FIRST_SAMPLE_FLAGS: u32 = 0x004;
    pub const SAMPLE_DURATION: u32 = 0x100;
    pub const SAMPLE_SIZE: u32 = 0x200;
    pub const SAMPLE_FLAGS: u32 = 0x400;
    pub const SAMPLE_COMPOSITION_OFFSET: u32 = 0x800;

    /// Cap on runs whose entries are all defaulted and so take no bytes.
    const MAX_IMPLICIT_SAMPLES: usize = 1 << 20;

    const ENTRY_FIELDS: u32 = Self::SAMPLE_DURATION
        | Self::SAMPLE_SIZE
        | Self::SAMPLE_FLAGS
        | Self::SAMPLE_COMPOSITION_OFFSET;

    pub fn sample_count(&self) -> usize {
        self.entries.len()
    }

    fn encoded_flags(&self) -> u32 {
        let mut flags = self.flags & !(Self::DATA_OFFSET | Self::FIRST_SAMPLE_FLAGS);
        if self.data_offset.is_some() {
            flags |= Self::DATA_OFFSET;
        }
        if self.first_sample_flags.is_some() {
            flags |= Self::FIRST_SAMPLE_FLAGS;
        }
        flags
    }
}

impl BmffBox for TrunBox {
    const TYPE: FourCc = FourCc::TRUN;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "trun");
        let (version, flags) = r.read_full_box_header()?;
        let sample_count = r.read_u32()? as usize;

        let data_offset = if flags & Self::DATA_OFFSET != 0 {
            Some(r.read_i32()?)
        } else {
            None
        };
        let first_sample_flags = if flags & Self::FIRST_SAMPLE_FLAGS != 0 {
            Some(r.read_u32()?)
        } else {
            None
        };

        let entry_len = 4 * (flags & Self::ENTRY_FIELDS).count_ones() as usize;
        r.ensure_records(sample_count, entry_len)?;
        if entry_len == 0 && sample_count > Self::MAX_IMPLICIT_SAMPLES {
            return Err(Error::invalid_mp4(format!(
                "trun declares {sample_count} samples with no per-sample fields"
            )));
        }

        let mut entries = Vec::with_capacity(sample_count);
        for _ in 0..sample_count {
            let mut entry = TrunEntry::default();
            if flags & Self::SAMPLE_DURATION != 0 {
                entry.duration = Some(r.read_u32()?);
            }
            if flags & Self::SAMPLE_SIZE != 0 {
                entry.size = Some(r.read_u32()?);
            }
            if flags & Self::SAMPLE_FLAGS != 0 {
                entry.flags = Some(r.read_u32()?);
            }
            if flags & Self::SAMPLE_COMPOSITION_OFFSET != 0 {
                entry.composition_offset = Some(r.read_i32()?);
            }
            entries.push(entry);
        }

        Ok(Self {
            version,
            flags,
            data_offset,
            first_sample_flags,
            entries,
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        let flags = self.encoded_flags();
        write_full_box_header(buf, self.version, flags);
        buf.put_u32(self.entries.len() as u32);
        if let Some(offset) = self.data_offset {
            buf.put_i32(offset);
        }
        if let Some(first) = self.first_sample_flags {
            buf.put_u32(first);
        }
        for entry in &self.entries {
            if flags & Self::SAMPLE_DURATION != 0 {
                buf.put_u32(entry.duration.unwrap_or(0));
            }
            if flags & Self::SAMPLE_SIZE != 0 {
                buf.put_u32(entry.size.unwrap_or(0));
            }
            if flags & Self::SAMPLE_FLAGS != 0 {
                buf.put_u32(entry.flags.unwrap_or(0));
            }
            if flags & Self::SAMPLE_COMPOSITION_OFFSET != 0 {
                buf.put_i32(entry.composition_offset.unwrap_or(0));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// traf
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrafChild {
    Tfhd(TfhdBox),
    Trun(TrunBox),
    Senc(SencBox),
    Raw(RawBox),
}

impl EncodeChild for TrafChild {
    fn encode_child(&self, buf: &mut BytesMut) {
        match self {
            Self::Tfhd(b) => b.encode(buf),
            Self::Trun(b) => b.encode(buf),
            Self::Senc(b) => b.encode(buf),
            Self::Raw(b) => b.encode(buf),
        }
    }
}

/// Track fragment. The first child is always `tfhd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafBox {
    pub children: Vec<TrafChild>,
}

impl TrafBox {
    pub fn tfhd(&self) -> Option<&TfhdBox> {
        self.children.iter().find_map(|c| match c {
            TrafChild::Tfhd(b) => Some(b),
            _ => None,
        })
    }

    pub fn truns(&self) -> impl Iterator<Item = &TrunBox> {
        self.children.iter().filter_map(|c| match c {
            TrafChild::Trun(b) => Some(b),
            _ => None,
        })
    }

    pub fn senc(&self) -> Option<&SencBox> {
        self.children.iter().find_map(|c| match c {
            TrafChild::Senc(b) => Some(b),
            _ => None,
        })
    }

    pub fn track_id(&self) -> u32 {
        self.tfhd().map_or(0, |t| t.track_id)
    }

    /// Samples across all runs.
    pub fn sample_count(&self) -> usize {
        self.truns().map(TrunBox::sample_count).sum()
    }
}

impl BmffBox for TrafBox {
    const TYPE: FourCc = FourCc::TRAF;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let children = decode_children!(payload, TrafChild::Raw, {
            FourCc::TFHD => TrafChild::Tfhd: TfhdBox,
            FourCc::TRUN => TrafChild::Trun: TrunBox,
            FourCc::SENC => TrafChild::Senc: SencBox,
        });

        match children.first() {
            Some(TrafChild::Tfhd(_)) => Ok(Self { children }),
            Some(TrafChild::Raw(raw)) => Err(Error::UnexpectedBoxType {
                expected: FourCc::TFHD,
                found: raw.box_type,
            }),
            Some(TrafChild::Trun(_)) => Err(Error::UnexpectedBoxType {
                expected: FourCc::TFHD,
                found: FourCc::TRUN,
            }),
            Some(TrafChild::Senc(_)) => Err(Error::UnexpectedBoxType {
                expected: FourCc::TFHD,
                found: FourCc::SENC,
            }),
            None => Err(Error::MissingAtom("tfhd")),
        }
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        for child in &self.children {
            child.encode_child(buf);
        }
    }
}

// ---------------------------------------------------------------------------
// moof
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoofChild {
    Mfhd(MfhdBox),
    Traf(TrafBox),
    Pssh(PsshBox),
    Raw(RawBox),
}

impl EncodeChild for MoofChild {
    fn encode_child(&self, buf: &mut BytesMut) {
        match self {
            Self::Mfhd(b) => b.encode(buf),
            Self::Traf(b) => b.encode(buf),
            Self::Pssh(b) => b.encode(buf),
            Self::Raw(b) => b.encode(buf),
        }
    }
}

/// Movie fragment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MoofBox {
    pub children: Vec<MoofChild>,
}

impl MoofBox {
    pub fn mfhd(&self) -> Option<&MfhdBox> {
        self.children.iter().find_map(|c| match c {
            MoofChild::Mfhd(b) => Some(b),
            _ => None,
        })
    }

    pub fn sequence_number(&self) -> u32 {
        self.mfhd().map_or(0, |m| m.sequence_number)
    }

    pub fn trafs(&self) -> impl Iterator<Item = &TrafBox> {
        self.children.iter().filter_map(|c| match c {
            MoofChild::Traf(b) => Some(b),
            _ => None,
        })
    }
}

impl BmffBox for MoofBox {
    const TYPE: FourCc = FourCc::MOOF;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let children = decode_children!(payload, MoofChild::Raw, {
            FourCc::MFHD => MoofChild::Mfhd: MfhdBox,
            FourCc::TRAF => MoofChild::Traf: TrafBox,
            FourCc::PSSH => MoofChild::Pssh: PsshBox,
        });
        Ok(Self { children })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        for child in &self.children {
            child.encode_child(buf);
        }
    }
}
