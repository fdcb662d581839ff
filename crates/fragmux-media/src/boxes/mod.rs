//! Typed box model.
//!
//! Containers decode into closed child enums with a `Raw` arm that keeps
//! unrecognised boxes byte-for-byte, so anything the model does not
//! interpret still survives a decode/encode cycle.

/// Decode the boxes of a container payload into a child enum.
///
/// ```ignore
/// let children = decode_children!(payload, TrakChild::Raw, {
///     FourCc::TKHD => TrakChild::Tkhd: TkhdBox,
/// });
/// ```
macro_rules! decode_children {
    ($payload:expr, $raw:path, { $($code:pat => $variant:path : $ty:ty),* $(,)? }) => {{
        let mut children = Vec::new();
        for slice in $crate::bmff::iter_boxes($payload) {
            let slice = slice?;
            let child = match slice.box_type() {
                $($code => $variant(
                    <$ty as $crate::bmff::BmffBox>::decode_payload(slice.payload())?,
                ),)*
                _ => $raw($crate::boxes::RawBox::from_slice(&slice)),
            };
            children.push(child);
        }
        children
    }};
}
pub(crate) use decode_children;

mod mdat;
mod moof;
mod moov;
mod pssh;
mod raw;
mod senc;
mod sidx;
mod stbl;
mod stsd;

pub use mdat::MdatBox;
pub use moof::{MfhdBox, MoofBox, MoofChild, TfhdBox, TrafBox, TrafChild, TrunBox, TrunEntry};
pub use moov::{
    HandlerType, HdlrBox, HeaderTimes, MdhdBox, MdiaBox, MdiaChild, MinfBox, MinfChild, MoovBox,
    MoovChild, MvexBox, MvexChild, MvhdBox, TkhdBox, TrakBox, TrakChild, TrexBox,
};
pub use pssh::PsshBox;
pub use raw::RawBox;
pub use senc::{SencBox, SencSample, Subsample};
pub use sidx::{SidxBox, SidxReference};
pub use stbl::{
    Co64Box, CttsBox, CttsEntry, StblBox, StblChild, StcoBox, StscBox, StscEntry, StssBox,
    StszBox, SttsBox, SttsEntry,
};
pub use stsd::{
    EncryptedSampleEntry, EntryChild, FrmaBox, SampleEntry, SchiBox, SchiChild, SchmBox, SinfBox,
    SinfChild, StsdBox, TencBox,
};

use crate::bmff::{iter_boxes, BmffBox, BoxSlice, FourCc};
use crate::Result;
use bytes::BytesMut;

/// A top-level box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mp4Box {
    Moov(MoovBox),
    Moof(MoofBox),
    Mdat(MdatBox),
    Sidx(SidxBox),
    Pssh(PsshBox),
    Raw(RawBox),
}

impl Mp4Box {
    /// Decode one located top-level box.
    pub fn decode_slice(slice: &BoxSlice<'_>) -> Result<Self> {
        let payload = slice.payload();
        Ok(match slice.box_type() {
            FourCc::MOOV => Self::Moov(MoovBox::decode_payload(payload)?),
            FourCc::MOOF => Self::Moof(MoofBox::decode_payload(payload)?),
            FourCc::MDAT => Self::Mdat(MdatBox::decode_payload(payload)?),
            FourCc::SIDX => Self::Sidx(SidxBox::decode_payload(payload)?),
            FourCc::PSSH => Self::Pssh(PsshBox::decode_payload(payload)?),
            _ => Self::Raw(RawBox::from_slice(slice)),
        })
    }

    pub fn box_type(&self) -> FourCc {
        match self {
            Self::Moov(_) => FourCc::MOOV,
            Self::Moof(_) => FourCc::MOOF,
            Self::Mdat(_) => FourCc::MDAT,
            Self::Sidx(_) => FourCc::SIDX,
            Self::Pssh(_) => FourCc::PSSH,
            Self::Raw(b) => b.box_type,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Moov(b) => b.encode(buf),
            Self::Moof(b) => b.encode(buf),
            Self::Mdat(b) => b.encode(buf),
            Self::Sidx(b) => b.encode(buf),
            Self::Pssh(b) => b.encode(buf),
            Self::Raw(b) => b.encode(buf),
        }
    }
}

/// Parse every top-level box in `data`.
pub fn parse(data: &[u8]) -> Result<Vec<Mp4Box>> {
    iter_boxes(data)
        .map(|slice| Mp4Box::decode_slice(&slice?))
        .collect()
}

/// Serialize boxes back to back.
pub fn encode_boxes(boxes: &[Mp4Box]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for b in boxes {
        b.encode(&mut buf);
    }
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bmff::write_box;
    use crate::Error;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_dispatches_known_types() {
        let mut buf = BytesMut::new();
        write_box(&mut buf, FourCc::FTYP, b"isom\0\0\0\x01");
        write_box(&mut buf, FourCc::MDAT, &[1, 2, 3]);
        write_box(&mut buf, FourCc(*b"abcd"), &[9]);

        let boxes = parse(&buf).unwrap();
        assert_eq!(boxes.len(), 3);
        assert_matches!(&boxes[0], Mp4Box::Raw(r) if r.box_type == FourCc::FTYP);
        assert_matches!(&boxes[1], Mp4Box::Mdat(m) if m.data == [1, 2, 3]);
        assert_eq!(boxes[2].box_type(), FourCc(*b"abcd"));
        assert_eq!(encode_boxes(&boxes), buf.to_vec());
    }

    #[test]
    fn test_parse_rejects_oversized_box() {
        let mut data = vec![0, 0, 0, 64];
        data.extend_from_slice(b"free");
        data.extend_from_slice(&[0; 8]);
        assert_matches!(
            parse(&data),
            Err(Error::InvalidBoxSize { size: 64, available: 16, .. })
        );
    }

    #[test]
    fn test_parse_rejects_truncated_header() {
        assert_matches!(parse(&[0, 0, 0]), Err(Error::Truncated { .. }));
    }

    #[test]
    fn test_nested_unknown_children_survive() {
        let mut inner = BytesMut::new();
        write_box(&mut inner, FourCc(*b"udta"), &[0xDE, 0xAD]);
        let mut buf = BytesMut::new();
        write_box(&mut buf, FourCc::MOOV, &inner);

        let boxes = parse(&buf).unwrap();
        let Mp4Box::Moov(moov) = &boxes[0] else {
            panic!("expected moov");
        };
        assert_matches!(&moov.children[0], MoovChild::Raw(r) if r.payload() == [0xDE, 0xAD]);
        assert_eq!(encode_boxes(&boxes), buf.to_vec());
    }
}
