//! Low-level ISO BMFF primitives.
//!
//! Every box starts with a 4-byte big-endian size and a 4-byte type,
//! optionally followed by a 64-bit "largesize" (when size == 1) and a
//! 16-byte user type (when type == `uuid`). This module provides the
//! header codec, a bounds-checked field reader, container iteration, and
//! the [`BmffBox`] trait implemented by every typed box.

mod header;
mod reader;

pub use header::{iter_boxes, BoxHeader, BoxIter, BoxSlice};
pub use reader::ByteReader;

use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Four-character box or codec type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const STYP: Self = Self(*b"styp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MOOF: Self = Self(*b"moof");
    pub const MDAT: Self = Self(*b"mdat");
    pub const SIDX: Self = Self(*b"sidx");
    pub const PSSH: Self = Self(*b"pssh");
    pub const UUID: Self = Self(*b"uuid");
    pub const FREE: Self = Self(*b"free");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const MVEX: Self = Self(*b"mvex");
    pub const TREX: Self = Self(*b"trex");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const EDTS: Self = Self(*b"edts");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const CTTS: Self = Self(*b"ctts");
    pub const STSS: Self = Self(*b"stss");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const ENCA: Self = Self(*b"enca");
    pub const ENCV: Self = Self(*b"encv");
    pub const SINF: Self = Self(*b"sinf");
    pub const FRMA: Self = Self(*b"frma");
    pub const SCHM: Self = Self(*b"schm");
    pub const SCHI: Self = Self(*b"schi");
    pub const TENC: Self = Self(*b"tenc");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");
    pub const SENC: Self = Self(*b"senc");
    pub const SAIZ: Self = Self(*b"saiz");
    pub const SAIO: Self = Self(*b"saio");

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for FourCc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Debug for FourCc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FourCc({:?})", self.as_str())
    }
}

impl From<&[u8; 4]> for FourCc {
    fn from(bytes: &[u8; 4]) -> Self {
        Self(*bytes)
    }
}

/// A box with a typed payload codec.
///
/// Implementors describe only the payload; the header is produced here,
/// so sizes are always recomputed on encode.
pub trait BmffBox: Sized {
    /// The box type this codec handles.
    const TYPE: FourCc;

    /// Decode the payload (everything after the header).
    fn decode_payload(payload: &[u8]) -> Result<Self>;

    /// Append the payload (everything after the header) to `buf`.
    fn encode_payload(&self, buf: &mut BytesMut);

    /// Decode a complete box, header included.
    ///
    /// Bytes past the declared size are ignored.
    fn decode(data: &[u8]) -> Result<Self> {
        let header = BoxHeader::decode(data)?;
        if header.box_type != Self::TYPE {
            return Err(Error::UnexpectedBoxType {
                expected: Self::TYPE,
                found: header.box_type,
            });
        }
        Self::decode_payload(&data[header.header_len..header.size as usize])
    }

    /// Append the complete box to `buf`.
    fn encode(&self, buf: &mut BytesMut) {
        let mut payload = BytesMut::new();
        self.encode_payload(&mut payload);
        write_box(buf, Self::TYPE, &payload);
    }

    /// Encode the complete box into a fresh vector.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.to_vec()
    }
}

/// Write a complete box: header (compact or largesize) followed by `payload`.
pub fn write_box(buf: &mut BytesMut, box_type: FourCc, payload: &[u8]) {
    BoxHeader::write(buf, box_type, payload.len() as u64);
    buf.put_slice(payload);
}

/// Write the packed version (8 bits) and flags (24 bits) of a full box.
pub fn write_full_box_header(buf: &mut BytesMut, version: u8, flags: u32) {
    buf.put_u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
}

/// A child entry of a container box.
pub(crate) trait EncodeChild {
    fn encode_child(&self, buf: &mut BytesMut);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_display() {
        assert_eq!(FourCc::MOOV.to_string(), "moov");
        assert_eq!(FourCc(*b"\xff\xfe\x00\x01").as_str(), "????");
    }

    #[test]
    fn test_full_box_header() {
        let mut buf = BytesMut::new();
        write_full_box_header(&mut buf, 1, 0x0002_0001);
        assert_eq!(&buf[..], &[1, 0x02, 0x00, 0x01]);
    }
}
