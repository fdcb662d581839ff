//! Segment index.

use crate::bmff::{write_full_box_header, BmffBox, ByteReader, FourCc};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// One referenced subsegment (or nested `sidx`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SidxReference {
    /// Set when the reference points at another `sidx`.
    pub reference_type: bool,
    /// 31-bit size in bytes.
    pub referenced_size: u32,
    pub subsegment_duration: u32,
    pub starts_with_sap: bool,
    pub sap_type: u8,
    pub sap_delta_time: u32,
}

/// Segment index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidxBox {
    pub version: u8,
    pub flags: u32,
    pub reference_id: u32,
    pub timescale: u32,
    pub earliest_presentation_time: u64,
    /// Distance from the first byte after this box to the first
    /// referenced byte.
    pub first_offset: u64,
    pub references: Vec<SidxReference>,
}

impl SidxBox {
    /// Inclusive `[start, end]` byte ranges of the referenced material.
    ///
    /// `start_offset` is the absolute position of the first byte after
    /// the `sidx` box. Ranges that would run past `u64::MAX` are
    /// rejected.
    pub fn byte_ranges(&self, start_offset: u64) -> Result<Vec<(u64, u64)>> {
        let overflow = || Error::invalid_mp4("sidx byte range overflows u64");

        let mut next = Some(
            start_offset
                .checked_add(self.first_offset)
                .ok_or_else(overflow)?,
        );
        let mut ranges = Vec::with_capacity(self.references.len());
        for r in self.references.iter().filter(|r| r.referenced_size > 0) {
            let start = next.ok_or_else(overflow)?;
            let end = start
                .checked_add(r.referenced_size as u64 - 1)
                .ok_or_else(overflow)?;
            ranges.push((start, end));
            next = end.checked_add(1);
        }
        Ok(ranges)
    }

    /// Total duration of all references in timescale units.
    pub fn total_duration(&self) -> u64 {
        self.references
            .iter()
            .map(|r| r.subsegment_duration as u64)
            .sum()
    }
}

impl BmffBox for SidxBox {
    const TYPE: FourCc = FourCc::SIDX;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "sidx");
        let (version, flags) = r.read_full_box_header()?;
        let reference_id = r.read_u32()?;
        let timescale = r.read_u32()?;
        let earliest_presentation_time = r.read_versioned_u64(version)?;
        let first_offset = r.read_versioned_u64(version)?;
        r.skip(2)?; // reserved
        let count = r.read_u16()? as usize;
        r.ensure_records(count, 12)?;

        let mut references = Vec::with_capacity(count);
        for _ in 0..count {
            let word = r.read_u32()?;
            let subsegment_duration = r.read_u32()?;
            let sap = r.read_u32()?;
            references.push(SidxReference {
                reference_type: word >> 31 == 1,
                referenced_size: word & 0x7FFF_FFFF,
                subsegment_duration,
                starts_with_sap: sap >> 31 == 1,
                sap_type: ((sap >> 28) & 0x7) as u8,
                sap_delta_time: sap & 0x0FFF_FFFF,
            });
        }

        Ok(Self {
            version,
            flags,
            reference_id,
            timescale,
            earliest_presentation_time,
            first_offset,
            references,
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, self.version, self.flags);
        buf.put_u32(self.reference_id);
        buf.put_u32(self.timescale);
        if self.version == 0 {
            buf.put_u32(self.earliest_presentation_time as u32);
            buf.put_u32(self.first_offset as u32);
        } else {
            buf.put_u64(self.earliest_presentation_time);
            buf.put_u64(self.first_offset);
        }
        buf.put_u16(0);
        buf.put_u16(self.references.len() as u16);
        for r in &self.references {
            buf.put_u32(((r.reference_type as u32) << 31) | (r.referenced_size & 0x7FFF_FFFF));
            buf.put_u32(r.subsegment_duration);
            buf.put_u32(
                ((r.starts_with_sap as u32) << 31)
                    | (((r.sap_type & 0x7) as u32) << 28)
                    | (r.sap_delta_time & 0x0FFF_FFFF),
            );
        }
    }
}
