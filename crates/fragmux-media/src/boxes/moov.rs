//! Movie metadata boxes: moov, mvhd, mvex/trex, trak, tkhd, mdia, mdhd,
//! hdlr, minf.
//!
//! Header boxes model only the version-dependent timing fields; the fixed
//! fields that follow (rate, matrix, language, ...) are kept as opaque
//! trailing bytes so re-encoding preserves them exactly.

use super::{decode_children, PsshBox, RawBox, StblBox, StsdBox};
use crate::bmff::{write_full_box_header, BmffBox, ByteReader, EncodeChild, FourCc};
use crate::Result;
use bytes::{BufMut, BytesMut};

// ---------------------------------------------------------------------------
// Shared timing fields
// ---------------------------------------------------------------------------

/// Version-selected creation/modification/timescale/duration fields shared
/// by `mvhd` and `mdhd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderTimes {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
}

impl HeaderTimes {
    fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let (version, flags) = r.read_full_box_header()?;
        let creation_time = r.read_versioned_u64(version)?;
        let modification_time = r.read_versioned_u64(version)?;
        let timescale = r.read_u32()?;
        let duration = r.read_versioned_u64(version)?;
        Ok(Self {
            version,
            flags,
            creation_time,
            modification_time,
            timescale,
            duration,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, self.version, self.flags);
        if self.version == 0 {
            buf.put_u32(self.creation_time as u32);
            buf.put_u32(self.modification_time as u32);
            buf.put_u32(self.timescale);
            buf.put_u32(self.duration as u32);
        } else {
            buf.put_u64(self.creation_time);
            buf.put_u64(self.modification_time);
            buf.put_u32(self.timescale);
            buf.put_u64(self.duration);
        }
    }

    /// Set the duration, promoting to version 1 when it no longer fits in
    /// 32 bits. Never demotes.
    pub fn set_duration(&mut self, duration: u64) {
        if duration > u32::MAX as u64 {
            self.version = 1;
        }
        self.duration = duration;
    }
}

// ---------------------------------------------------------------------------
// mvhd / mdhd
// ---------------------------------------------------------------------------

/// Movie header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MvhdBox {
    pub times: HeaderTimes,
    /// rate, volume, matrix, pre_defined, next_track_ID.
    pub trailing: Vec<u8>,
}

impl MvhdBox {
    pub fn timescale(&self) -> u32 {
        self.times.timescale
    }

    pub fn duration(&self) -> u64 {
        self.times.duration
    }

    pub fn set_timescale(&mut self, timescale: u32) {
        self.times.timescale = timescale;
    }

    pub fn set_duration(&mut self, duration: u64) {
        self.times.set_duration(duration);
    }
}

impl BmffBox for MvhdBox {
    const TYPE: FourCc = FourCc::MVHD;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "mvhd");
        let times = HeaderTimes::decode(&mut r)?;
        Ok(Self {
            times,
            trailing: r.read_rest().to_vec(),
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        self.times.encode(buf);
        buf.put_slice(&self.trailing);
    }
}

/// Media header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdhdBox {
    pub times: HeaderTimes,
    /// language, pre_defined.
    pub trailing: Vec<u8>,
}

impl MdhdBox {
    pub fn timescale(&self) -> u32 {
        self.times.timescale
    }

    pub fn duration(&self) -> u64 {
        self.times.duration
    }

    pub fn set_duration(&mut self, duration: u64) {
        self.times.set_duration(duration);
    }
}

impl BmffBox for MdhdBox {
    const TYPE: FourCc = FourCc::MDHD;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "mdhd");
        let times = HeaderTimes::decode(&mut r)?;
        Ok(Self {
            times,
            trailing: r.read_rest().to_vec(),
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        self.times.encode(buf);
        buf.put_slice(&self.trailing);
    }
}

// ---------------------------------------------------------------------------
// tkhd
// ---------------------------------------------------------------------------

/// Track header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TkhdBox {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub track_id: u32,
    pub reserved: u32,
    pub duration: u64,
    /// layer, alternate_group, volume, matrix, width, height.
    pub trailing: Vec<u8>,
}

impl TkhdBox {
    /// Set the duration with the same one-way version promotion as
    /// [`HeaderTimes::set_duration`].
    pub fn set_duration(&mut self, duration: u64) {
        if duration > u32::MAX as u64 {
            self.version = 1;
        }
        self.duration = duration;
    }
}

impl BmffBox for TkhdBox {
    const TYPE: FourCc = FourCc::TKHD;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "tkhd");
        let (version, flags) = r.read_full_box_header()?;
        let creation_time = r.read_versioned_u64(version)?;
        let modification_time = r.read_versioned_u64(version)?;
        let track_id = r.read_u32()?;
        let reserved = r.read_u32()?;
        let duration = r.read_versioned_u64(version)?;
        Ok(Self {
            version,
            flags,
            creation_time,
            modification_time,
            track_id,
            reserved,
            duration,
            trailing: r.read_rest().to_vec(),
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, self.version, self.flags);
        if self.version == 0 {
            buf.put_u32(self.creation_time as u32);
            buf.put_u32(self.modification_time as u32);
            buf.put_u32(self.track_id);
            buf.put_u32(self.reserved);
            buf.put_u32(self.duration as u32);
        } else {
            buf.put_u64(self.creation_time);
            buf.put_u64(self.modification_time);
            buf.put_u32(self.track_id);
            buf.put_u32(self.reserved);
            buf.put_u64(self.duration);
        }
        buf.put_slice(&self.trailing);
    }
}

// ---------------------------------------------------------------------------
// hdlr
// ---------------------------------------------------------------------------

/// Handler type for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Video,
    Audio,
    Hint,
    Meta,
    Text,
    Subtitle,
    Unknown(FourCc),
}

impl HandlerType {
    pub fn from_fourcc(code: FourCc) -> Self {
        match &code.0 {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            b"hint" => Self::Hint,
            b"meta" => Self::Meta,
            b"text" => Self::Text,
            b"subt" => Self::Subtitle,
            _ => Self::Unknown(code),
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }
}

/// Handler reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdlrBox {
    pub version: u8,
    pub flags: u32,
    pub pre_defined: u32,
    pub handler_type: FourCc,
    /// reserved words and the null-terminated name.
    pub trailing: Vec<u8>,
}

impl HdlrBox {
    pub fn handler(&self) -> HandlerType {
        HandlerType::from_fourcc(self.handler_type)
    }
}

impl BmffBox for HdlrBox {
    const TYPE: FourCc = FourCc::HDLR;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "hdlr");
        let (version, flags) = r.read_full_box_header()?;
        let pre_defined = r.read_u32()?;
        let handler_type = FourCc(r.read_array()?);
        Ok(Self {
            version,
            flags,
            pre_defined,
            handler_type,
            trailing: r.read_rest().to_vec(),
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, self.version, self.flags);
        buf.put_u32(self.pre_defined);
        buf.put_slice(&self.handler_type.0);
        buf.put_slice(&self.trailing);
    }
}

// ---------------------------------------------------------------------------
// mvex / trex
// ---------------------------------------------------------------------------

/// Per-track fragment defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrexBox {
    pub version: u8,
    pub flags: u32,
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl BmffBox for TrexBox {
    const TYPE: FourCc = FourCc::TREX;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "trex");
        let (version, flags) = r.read_full_box_header()?;
        Ok(Self {
            version,
            flags,
            track_id: r.read_u32()?,
            default_sample_description_index: r.read_u32()?,
            default_sample_duration: r.read_u32()?,
            default_sample_size: r.read_u32()?,
            default_sample_flags: r.read_u32()?,
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, self.version, self.flags);
        buf.put_u32(self.track_id);
        buf.put_u32(self.default_sample_description_index);
        buf.put_u32(self.default_sample_duration);
        buf.put_u32(self.default_sample_size);
        buf.put_u32(self.default_sample_flags);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MvexChild {
    Trex(TrexBox),
    Raw(RawBox),
}

impl EncodeChild for MvexChild {
    fn encode_child(&self, buf: &mut BytesMut) {
        match self {
            Self::Trex(b) => b.encode(buf),
            Self::Raw(b) => b.encode(buf),
        }
    }
}

/// Movie extends: marks the movie as fragmented.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MvexBox {
    pub children: Vec<MvexChild>,
}

impl MvexBox {
    /// Fragment defaults for `track_id`, if declared.
    pub fn trex(&self, track_id: u32) -> Option<&TrexBox> {
        self.children.iter().find_map(|c| match c {
            MvexChild::Trex(t) if t.track_id == track_id => Some(t),
            _ => None,
        })
    }
}

impl BmffBox for MvexBox {
    const TYPE: FourCc = FourCc::MVEX;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let children = decode_children!(payload, MvexChild::Raw, {
            FourCc::TREX => MvexChild::Trex: TrexBox,
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
// minf / mdia / trak
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MinfChild {
    Stbl(StblBox),
    Raw(RawBox),
}

impl EncodeChild for MinfChild {
    fn encode_child(&self, buf: &mut BytesMut) {
        match self {
            Self::Stbl(b) => b.encode(buf),
            Self::Raw(b) => b.encode(buf),
        }
    }
}

/// Media information container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MinfBox {
    pub children: Vec<MinfChild>,
}

impl MinfBox {
    pub fn stbl(&self) -> Option<&StblBox> {
        self.children.iter().find_map(|c| match c {
            MinfChild::Stbl(b) => Some(b),
            _ => None,
        })
    }

    pub fn stbl_mut(&mut self) -> Option<&mut StblBox> {
        self.children.iter_mut().find_map(|c| match c {
            MinfChild::Stbl(b) => Some(b),
            _ => None,
        })
    }
}

impl BmffBox for MinfBox {
    const TYPE: FourCc = FourCc::MINF;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let children = decode_children!(payload, MinfChild::Raw, {
            FourCc::STBL => MinfChild::Stbl: StblBox,
        });
        Ok(Self { children })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        for child in &self.children {
            child.encode_child(buf);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MdiaChild {
    Mdhd(MdhdBox),
    Hdlr(HdlrBox),
    Minf(MinfBox),
    Raw(RawBox),
}

impl EncodeChild for MdiaChild {
    fn encode_child(&self, buf: &mut BytesMut) {
        match self {
            Self::Mdhd(b) => b.encode(buf),
            Self::Hdlr(b) => b.encode(buf),
            Self::Minf(b) => b.encode(buf),
            Self::Raw(b) => b.encode(buf),
        }
    }
}

/// Track media container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MdiaBox {
    pub children: Vec<MdiaChild>,
}

impl MdiaBox {
    pub fn mdhd(&self) -> Option<&MdhdBox> {
        self.children.iter().find_map(|c| match c {
            MdiaChild::Mdhd(b) => Some(b),
            _ => None,
        })
    }

    pub fn mdhd_mut(&mut self) -> Option<&mut MdhdBox> {
        self.children.iter_mut().find_map(|c| match c {
            MdiaChild::Mdhd(b) => Some(b),
            _ => None,
        })
    }

    pub fn hdlr(&self) -> Option<&HdlrBox> {
        self.children.iter().find_map(|c| match c {
            MdiaChild::Hdlr(b) => Some(b),
            _ => None,
        })
    }

    pub fn minf(&self) -> Option<&MinfBox> {
        self.children.iter().find_map(|c| match c {
            MdiaChild::Minf(b) => Some(b),
            _ => None,
        })
    }

    pub fn minf_mut(&mut self) -> Option<&mut MinfBox> {
        self.children.iter_mut().find_map(|c| match c {
            MdiaChild::Minf(b) => Some(b),
            _ => None,
        })
    }
}

impl BmffBox for MdiaBox {
    const TYPE: FourCc = FourCc::MDIA;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let children = decode_children!(payload, MdiaChild::Raw, {
            FourCc::MDHD => MdiaChild::Mdhd: MdhdBox,
            FourCc::HDLR => MdiaChild::Hdlr: HdlrBox,
            FourCc::MINF => MdiaChild::Minf: MinfBox,
        });
        Ok(Self { children })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        for child in &self.children {
            child.encode_child(buf);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrakChild {
    Tkhd(TkhdBox),
    Mdia(MdiaBox),
    Raw(RawBox),
}

impl EncodeChild for TrakChild {
    fn encode_child(&self, buf: &mut BytesMut) {
        match self {
            Self::Tkhd(b) => b.encode(buf),
            Self::Mdia(b) => b.encode(buf),
            Self::Raw(b) => b.encode(buf),
        }
    }
}

/// One track.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrakBox {
    pub children: Vec<TrakChild>,
}

impl TrakBox {
    pub fn tkhd(&self) -> Option<&TkhdBox> {
        self.children.iter().find_map(|c| match c {
            TrakChild::Tkhd(b) => Some(b),
            _ => None,
        })
    }

    pub fn tkhd_mut(&mut self) -> Option<&mut TkhdBox> {
        self.children.iter_mut().find_map(|c| match c {
            TrakChild::Tkhd(b) => Some(b),
            _ => None,
        })
    }

    pub fn mdia(&self) -> Option<&MdiaBox> {
        self.children.iter().find_map(|c| match c {
            TrakChild::Mdia(b) => Some(b),
            _ => None,
        })
    }

    pub fn mdia_mut(&mut self) -> Option<&mut MdiaBox> {
        self.children.iter_mut().find_map(|c| match c {
            TrakChild::Mdia(b) => Some(b),
            _ => None,
        })
    }

    /// Track ID from tkhd (0 if absent).
    pub fn track_id(&self) -> u32 {
        self.tkhd().map(|t| t.track_id).unwrap_or(0)
    }

    pub fn handler_type(&self) -> Option<HandlerType> {
        self.mdia()?.hdlr().map(HdlrBox::handler)
    }

    pub fn is_audio(&self) -> bool {
        self.handler_type().is_some_and(|h| h.is_audio())
    }

    pub fn is_video(&self) -> bool {
        self.handler_type().is_some_and(|h| h.is_video())
    }

    pub fn mdhd(&self) -> Option<&MdhdBox> {
        self.mdia()?.mdhd()
    }

    pub fn stbl(&self) -> Option<&StblBox> {
        self.mdia()?.minf()?.stbl()
    }

    pub fn stbl_mut(&mut self) -> Option<&mut StblBox> {
        self.mdia_mut()?.minf_mut()?.stbl_mut()
    }

    pub fn stsd(&self) -> Option<&StsdBox> {
        self.stbl()?.stsd()
    }

    /// Remove edit lists (`edts`). Returns how many were removed.
    pub fn remove_edit_lists(&mut self) -> usize {
        let before = self.children.len();
        self.children
            .retain(|c| !matches!(c, TrakChild::Raw(r) if r.box_type == FourCc::EDTS));
        before - self.children.len()
    }
}

impl BmffBox for TrakBox {
    const TYPE: FourCc = FourCc::TRAK;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let children = decode_children!(payload, TrakChild::Raw, {
            FourCc::TKHD => TrakChild::Tkhd: TkhdBox,
            FourCc::MDIA => TrakChild::Mdia: MdiaBox,
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
// moov
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoovChild {
    Mvhd(MvhdBox),
    Trak(TrakBox),
    Mvex(MvexBox),
    Pssh(PsshBox),
    Raw(RawBox),
}

impl EncodeChild for MoovChild {
    fn encode_child(&self, buf: &mut BytesMut) {
        match self {
            Self::Mvhd(b) => b.encode(buf),
            Self::Trak(b) => b.encode(buf),
            Self::Mvex(b) => b.encode(buf),
            Self::Pssh(b) => b.encode(buf),
            Self::Raw(b) => b.encode(buf),
        }
    }
}

/// Movie metadata container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MoovBox {
    pub children: Vec<MoovChild>,
}

impl MoovBox {
    pub fn mvhd(&self) -> Option<&MvhdBox> {
        self.children.iter().find_map(|c| match c {
            MoovChild::Mvhd(b) => Some(b),
            _ => None,
        })
    }

    pub fn mvhd_mut(&mut self) -> Option<&mut MvhdBox> {
        self.children.iter_mut().find_map(|c| match c {
            MoovChild::Mvhd(b) => Some(b),
            _ => None,
        })
    }

    pub fn mvex(&self) -> Option<&MvexBox> {
        self.children.iter().find_map(|c| match c {
            MoovChild::Mvex(b) => Some(b),
            _ => None,
        })
    }

    pub fn traks(&self) -> impl Iterator<Item = &TrakBox> {
        self.children.iter().filter_map(|c| match c {
            MoovChild::Trak(b) => Some(b),
            _ => None,
        })
    }

    pub fn traks_mut(&mut self) -> impl Iterator<Item = &mut TrakBox> {
        self.children.iter_mut().filter_map(|c| match c {
            MoovChild::Trak(b) => Some(b),
            _ => None,
        })
    }

    pub fn pssh_boxes(&self) -> impl Iterator<Item = &PsshBox> {
        self.children.iter().filter_map(|c| match c {
            MoovChild::Pssh(b) => Some(b),
            _ => None,
        })
    }

    /// The track with `track_id`, or the first track when `None`.
    pub fn trak(&self, track_id: Option<u32>) -> Option<&TrakBox> {
        match track_id {
            Some(id) => self.traks().find(|t| t.track_id() == id),
            None => self.traks().next(),
        }
    }

    pub fn trak_mut(&mut self, track_id: Option<u32>) -> Option<&mut TrakBox> {
        match track_id {
            Some(id) => self.traks_mut().find(|t| t.track_id() == id),
            None => self.traks_mut().next(),
        }
    }

    /// Drop the movie-extends box. Returns whether one was present.
    pub fn remove_mvex(&mut self) -> bool {
        let before = self.children.len();
        self.children.retain(|c| !matches!(c, MoovChild::Mvex(_)));
        before != self.children.len()
    }

    /// Drop all DRM system headers. Returns how many were removed.
    pub fn remove_pssh(&mut self) -> usize {
        let before = self.children.len();
        self.children.retain(|c| !matches!(c, MoovChild::Pssh(_)));
        before - self.children.len()
    }

    /// Keep only the track with `track_id`.
    pub fn retain_track(&mut self, track_id: u32) {
        self.children
            .retain(|c| !matches!(c, MoovChild::Trak(t) if t.track_id() != track_id));
    }
}

impl BmffBox for MoovBox {
    const TYPE: FourCc = FourCc::MOOV;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let children = decode_children!(payload, MoovChild::Raw, {
            FourCc::MVHD => MoovChild::Mvhd: MvhdBox,
            FourCc::TRAK => MoovChild::Trak: TrakBox,
            FourCc::MVEX => MoovChild::Mvex: MvexBox,
            FourCc::PSSH => MoovChild::Pssh: PsshBox,
        });
        Ok(Self { children })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        for child in &self.children {
            child.encode_child(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mvhd_v0_bytes() -> Vec<u8> {
        let mut payload = vec![0, 0, 0, 0]; // version 0, flags 0
        payload.extend_from_slice(&10u32.to_be_bytes()); // creation
        payload.extend_from_slice(&20u32.to_be_bytes()); // modification
        payload.extend_from_slice(&1000u32.to_be_bytes()); // timescale
        payload.extend_from_slice(&5000u32.to_be_bytes()); // duration
        payload.extend_from_slice(&[0xA5; 80]); // rate..next_track_ID
        let mut buf = BytesMut::new();
        crate::bmff::write_box(&mut buf, FourCc::MVHD, &payload);
        buf.to_vec()
    }

    #[test]
    fn test_mvhd_v0_roundtrip() {
        let bytes = mvhd_v0_bytes();
        let mvhd = MvhdBox::decode(&bytes).unwrap();
        assert_eq!(mvhd.times.version, 0);
        assert_eq!(mvhd.times.creation_time, 10);
        assert_eq!(mvhd.timescale(), 1000);
        assert_eq!(mvhd.duration(), 5000);
        assert_eq!(mvhd.trailing.len(), 80);
        assert_eq!(mvhd.to_bytes(), bytes);
    }

    #[test]
    fn test_mdhd_v1_roundtrip() {
        let mut payload = vec![1, 0, 0, 0];
        payload.extend_from_slice(&1u64.to_be_bytes());
        payload.extend_from_slice(&2u64.to_be_bytes());
        payload.extend_from_slice(&48000u32.to_be_bytes());
        payload.extend_from_slice(&0x1_0000_0000u64.to_be_bytes());
        payload.extend_from_slice(&[0x55, 0xC4, 0, 0]);
        let mut buf = BytesMut::new();
        crate::bmff::write_box(&mut buf, FourCc::MDHD, &payload);

        let mdhd = MdhdBox::decode(&buf).unwrap();
        assert_eq!(mdhd.times.version, 1);
        assert_eq!(mdhd.timescale(), 48000);
        assert_eq!(mdhd.duration(), 0x1_0000_0000);
        assert_eq!(mdhd.trailing, vec![0x55, 0xC4, 0, 0]);
        assert_eq!(mdhd.to_bytes(), buf.to_vec());
    }

    #[test]
    fn test_set_duration_promotes_version() {
        let mut mvhd = MvhdBox::decode(&mvhd_v0_bytes()).unwrap();
        let v0_len = mvhd.to_bytes().len();

        mvhd.set_duration(7000);
        assert_eq!(mvhd.times.version, 0);

        mvhd.set_duration(u32::MAX as u64 + 1);
        assert_eq!(mvhd.times.version, 1);
        let encoded = mvhd.to_bytes();
        // creation, modification and duration each widen by 4 bytes
        assert_eq!(encoded.len(), v0_len + 12);
        let reparsed = MvhdBox::decode(&encoded).unwrap();
        assert_eq!(reparsed.duration(), u32::MAX as u64 + 1);
        assert_eq!(reparsed.times.creation_time, 10);

        // No demotion once promoted
        mvhd.set_duration(1);
        assert_eq!(mvhd.times.version, 1);
    }

    #[test]
    fn test_tkhd_roundtrip_and_promotion() {
        let mut payload = vec![0, 0, 0, 7];
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&3u32.to_be_bytes()); // track_id
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&900u32.to_be_bytes());
        payload.extend_from_slice(&[0u8; 60]);
        let mut buf = BytesMut::new();
        crate::bmff::write_box(&mut buf, FourCc::TKHD, &payload);

        let mut tkhd = TkhdBox::decode(&buf).unwrap();
        assert_eq!(tkhd.track_id, 3);
        assert_eq!(tkhd.duration, 900);
        assert_eq!(tkhd.to_bytes(), buf.to_vec());

        tkhd.set_duration(u64::MAX);
        assert_eq!(tkhd.version, 1);
        assert_eq!(TkhdBox::decode(&tkhd.to_bytes()).unwrap().duration, u64::MAX);
    }

    #[test]
    fn test_handler_type_projection() {
        let hdlr = HdlrBox {
            version: 0,
            flags: 0,
            pre_defined: 0,
            handler_type: FourCc(*b"soun"),
            trailing: vec![0; 13],
        };
        let trak = TrakBox {
            children: vec![TrakChild::Mdia(MdiaBox {
                children: vec![MdiaChild::Hdlr(hdlr)],
            })],
        };
        assert!(trak.is_audio());
        assert!(!trak.is_video());
        assert_eq!(trak.handler_type(), Some(HandlerType::Audio));
        assert_eq!(
            HandlerType::from_fourcc(FourCc(*b"abcd")),
            HandlerType::Unknown(FourCc(*b"abcd"))
        );
    }

    #[test]
    fn test_remove_edit_lists() {
        let mut trak = TrakBox {
            children: vec![
                TrakChild::Raw(RawBox::new(FourCc::EDTS, &[])),
                TrakChild::Mdia(MdiaBox::default()),
            ],
        };
        assert_eq!(trak.remove_edit_lists(), 1);
        assert_eq!(trak.children.len(), 1);
        assert_eq!(trak.remove_edit_lists(), 0);
    }
}
