//! Sample description and the protection-scheme chain
//! (`enca`/`encv` → `sinf` → `frma`, `schm`, `schi` → `tenc`).

use super::{decode_children, RawBox};
use crate::bmff::{iter_boxes, write_full_box_header, BmffBox, ByteReader, EncodeChild, FourCc};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Fixed VisualSampleEntry fields before child boxes.
const VISUAL_ENTRY_FIXED_LEN: usize = 78;
/// Fixed AudioSampleEntry fields before child boxes (QuickTime version 0).
const AUDIO_ENTRY_FIXED_LEN: usize = 28;

// ---------------------------------------------------------------------------
// stsd
// ---------------------------------------------------------------------------

/// Sample description.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StsdBox {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<SampleEntry>,
}

impl StsdBox {
    /// The first encrypted (`enca`/`encv`) entry.
    pub fn encrypted_entry(&self) -> Option<&EncryptedSampleEntry> {
        self.entries.iter().find_map(|e| match e {
            SampleEntry::Encrypted(enc) => Some(enc),
            SampleEntry::Other(_) => None,
        })
    }

    /// Scheme information of the first encrypted entry.
    pub fn sinf(&self) -> Option<&SinfBox> {
        self.encrypted_entry()?.sinf()
    }

    /// Default encryption parameters of the first encrypted entry.
    pub fn tenc(&self) -> Option<&TencBox> {
        self.sinf()?.tenc()
    }

    pub fn is_protected(&self) -> bool {
        self.encrypted_entry().is_some()
    }

    /// Strip DRM signalling: every encrypted entry loses its `sinf` and
    /// takes back the format recorded in `frma`. Returns how many entries
    /// were rewritten.
    pub fn unprotect(&mut self) -> Result<usize> {
        let mut count = 0;
        for entry in &mut self.entries {
            if let SampleEntry::Encrypted(enc) = entry {
                *entry = SampleEntry::Other(enc.unprotect()?);
                count += 1;
            }
        }
        Ok(count)
    }
}

impl BmffBox for StsdBox {
    const TYPE: FourCc = FourCc::STSD;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "stsd");
        let (version, flags) = r.read_full_box_header()?;
        let _entry_count = r.read_u32()?;

        let mut entries = Vec::new();
        for slice in iter_boxes(r.read_rest()) {
            let slice = slice?;
            let entry = match slice.box_type() {
                FourCc::ENCA | FourCc::ENCV => SampleEntry::Encrypted(
                    EncryptedSampleEntry::decode(slice.box_type(), slice.payload())?,
                ),
                _ => SampleEntry::Other(RawBox::from_slice(&slice)),
            };
            entries.push(entry);
        }

        Ok(Self {
            version,
            flags,
            entries,
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, self.version, self.flags);
        buf.put_u32(self.entries.len() as u32);
        for entry in &self.entries {
            match entry {
                SampleEntry::Encrypted(enc) => enc.encode(buf),
                SampleEntry::Other(raw) => raw.encode(buf),
            }
        }
    }
}

/// One sample description entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleEntry {
    /// `enca` or `encv`, with its protection chain parsed.
    Encrypted(EncryptedSampleEntry),
    /// Any clear codec entry, kept verbatim.
    Other(RawBox),
}

impl SampleEntry {
    pub fn format(&self) -> FourCc {
        match self {
            Self::Encrypted(enc) => enc.format,
            Self::Other(raw) => raw.box_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryChild {
    Sinf(SinfBox),
    Raw(RawBox),
}

impl EncodeChild for EntryChild {
    fn encode_child(&self, buf: &mut BytesMut) {
        match self {
            Self::Sinf(b) => b.encode(buf),
            Self::Raw(b) => b.encode(buf),
        }
    }
}

/// An encrypted audio or visual sample entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSampleEntry {
    /// `enca` or `encv`.
    pub format: FourCc,
    /// Fixed audio/visual entry fields, kept opaque.
    pub fixed: Vec<u8>,
    pub children: Vec<EntryChild>,
}

impl EncryptedSampleEntry {
    fn decode(format: FourCc, payload: &[u8]) -> Result<Self> {
        let fixed_len = if format == FourCc::ENCV {
            VISUAL_ENTRY_FIXED_LEN
        } else {
            // QuickTime sound description version lives at offset 8
            let qt_version = payload
                .get(8..10)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .unwrap_or(0);
            match qt_version {
                1 => AUDIO_ENTRY_FIXED_LEN + 16,
                2 => AUDIO_ENTRY_FIXED_LEN + 36,
                _ => AUDIO_ENTRY_FIXED_LEN,
            }
        };

        let mut r = ByteReader::new(payload, "sample entry");
        let fixed = r.read_bytes(fixed_len)?.to_vec();
        let children = decode_children!(r.read_rest(), EntryChild::Raw, {
            FourCc::SINF => EntryChild::Sinf: SinfBox,
        });

        Ok(Self {
            format,
            fixed,
            children,
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.fixed);
        for child in &self.children {
            child.encode_child(buf);
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        let mut payload = BytesMut::new();
        self.encode_payload(&mut payload);
        crate::bmff::write_box(buf, self.format, &payload);
    }

    pub fn sinf(&self) -> Option<&SinfBox> {
        self.children.iter().find_map(|c| match c {
            EntryChild::Sinf(b) => Some(b),
            EntryChild::Raw(_) => None,
        })
    }

    /// Drop `sinf` and rename the entry to the `frma` original format.
    fn unprotect(&self) -> Result<RawBox> {
        let sinf = self.sinf().ok_or(Error::MissingAtom("sinf"))?;
        let original = sinf.frma().ok_or(Error::MissingAtom("frma"))?.data_format;

        let mut payload = BytesMut::new();
        payload.put_slice(&self.fixed);
        for child in &self.children {
            if let EntryChild::Raw(raw) = child {
                raw.encode(&mut payload);
            }
        }
        Ok(RawBox::new(original, &payload))
    }
}

// ---------------------------------------------------------------------------
// sinf and children
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinfChild {
    Frma(FrmaBox),
    Schm(SchmBox),
    Schi(SchiBox),
    Raw(RawBox),
}

impl EncodeChild for SinfChild {
    fn encode_child(&self, buf: &mut BytesMut) {
        match self {
            Self::Frma(b) => b.encode(buf),
            Self::Schm(b) => b.encode(buf),
            Self::Schi(b) => b.encode(buf),
            Self::Raw(b) => b.encode(buf),
        }
    }
}

/// Protection scheme information.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SinfBox {
    pub children: Vec<SinfChild>,
}

impl SinfBox {
    pub fn frma(&self) -> Option<&FrmaBox> {
        self.children.iter().find_map(|c| match c {
            SinfChild::Frma(b) => Some(b),
            _ => None,
        })
    }

    pub fn schm(&self) -> Option<&SchmBox> {
        self.children.iter().find_map(|c| match c {
            SinfChild::Schm(b) => Some(b),
            _ => None,
        })
    }

    pub fn schi(&self) -> Option<&SchiBox> {
        self.children.iter().find_map(|c| match c {
            SinfChild::Schi(b) => Some(b),
            _ => None,
        })
    }

    pub fn tenc(&self) -> Option<&TencBox> {
        self.schi()?.tenc()
    }
}

impl BmffBox for SinfBox {
    const TYPE: FourCc = FourCc::SINF;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let children = decode_children!(payload, SinfChild::Raw, {
            FourCc::FRMA => SinfChild::Frma: FrmaBox,
            FourCc::SCHM => SinfChild::Schm: SchmBox,
            FourCc::SCHI => SinfChild::Schi: SchiBox,
        });
        Ok(Self { children })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        for child in &self.children {
            child.encode_child(buf);
        }
    }
}

/// Original (pre-encryption) format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrmaBox {
    pub data_format: FourCc,
}

impl BmffBox for FrmaBox {
    const TYPE: FourCc = FourCc::FRMA;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "frma");
        Ok(Self {
            data_format: FourCc(r.read_array()?),
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.data_format.0);
    }
}

/// Scheme type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchmBox {
    pub version: u8,
    pub flags: u32,
    /// `cenc`, `cens`, `cbc1` or `cbcs`.
    pub scheme_type: FourCc,
    pub scheme_version: u32,
    /// Present when flags bit 0x1 is set.
    pub scheme_uri: Option<Vec<u8>>,
}

impl SchmBox {
    pub const CENC: FourCc = FourCc(*b"cenc");
}

impl BmffBox for SchmBox {
    const TYPE: FourCc = FourCc::SCHM;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "schm");
        let (version, flags) = r.read_full_box_header()?;
        let scheme_type = FourCc(r.read_array()?);
        let scheme_version = r.read_u32()?;
        let scheme_uri = (flags & 0x1 != 0).then(|| r.read_rest().to_vec());
        Ok(Self {
            version,
            flags,
            scheme_type,
            scheme_version,
            scheme_uri,
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, self.version, self.flags);
        buf.put_slice(&self.scheme_type.0);
        buf.put_u32(self.scheme_version);
        if let Some(uri) = &self.scheme_uri {
            buf.put_slice(uri);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchiChild {
    Tenc(TencBox),
    Raw(RawBox),
}

impl EncodeChild for SchiChild {
    fn encode_child(&self, buf: &mut BytesMut) {
        match self {
            Self::Tenc(b) => b.encode(buf),
            Self::Raw(b) => b.encode(buf),
        }
    }
}

/// Scheme information container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchiBox {
    pub children: Vec<SchiChild>,
}

impl SchiBox {
    pub fn tenc(&self) -> Option<&TencBox> {
        self.children.iter().find_map(|c| match c {
            SchiChild::Tenc(b) => Some(b),
            SchiChild::Raw(_) => None,
        })
    }
}

impl BmffBox for SchiBox {
    const TYPE: FourCc = FourCc::SCHI;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let children = decode_children!(payload, SchiChild::Raw, {
            FourCc::TENC => SchiChild::Tenc: TencBox,
        });
        Ok(Self { children })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        for child in &self.children {
            child.encode_child(buf);
        }
    }
}

/// Track encryption defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TencBox {
    pub version: u8,
    pub flags: u32,
    /// Pattern encryption, version 1 only.
    pub default_crypt_byte_block: u8,
    pub default_skip_byte_block: u8,
    pub default_is_protected: u8,
    /// 0, 8 or 16. Zero means every sample uses `default_constant_iv`.
    pub default_per_sample_iv_size: u8,
    pub default_kid: [u8; 16],
    pub default_constant_iv: Option<Vec<u8>>,
}

impl TencBox {
    /// Default key ID as lowercase hex.
    pub fn default_kid_hex(&self) -> String {
        hex::encode(self.default_kid)
    }
}

impl BmffBox for TencBox {
    const TYPE: FourCc = FourCc::TENC;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "tenc");
        let (version, flags) = r.read_full_box_header()?;
        r.skip(1)?;
        let (default_crypt_byte_block, default_skip_byte_block) = if version == 0 {
            r.skip(1)?;
            (0, 0)
        } else {
            let pattern = r.read_u8()?;
            (pattern >> 4, pattern & 0x0F)
        };
        let default_is_protected = r.read_u8()?;
        let default_per_sample_iv_size = r.read_u8()?;
        let default_kid = r.read_array()?;
        let default_constant_iv = if default_is_protected == 1 && default_per_sample_iv_size == 0 {
            let len = r.read_u8()? as usize;
            Some(r.read_bytes(len)?.to_vec())
        } else {
            None
        };

        Ok(Self {
            version,
            flags,
            default_crypt_byte_block,
            default_skip_byte_block,
            default_is_protected,
            default_per_sample_iv_size,
            default_kid,
            default_constant_iv,
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, self.version, self.flags);
        buf.put_u8(0);
        if self.version == 0 {
            buf.put_u8(0);
        } else {
            buf.put_u8((self.default_crypt_byte_block << 4) | (self.default_skip_byte_block & 0x0F));
        }
        buf.put_u8(self.default_is_protected);
        buf.put_u8(self.default_per_sample_iv_size);
        buf.put_slice(&self.default_kid);
        if let Some(iv) = &self.default_constant_iv {
            buf.put_u8(iv.len() as u8);
            buf.put_slice(iv);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn tenc() -> TencBox {
        TencBox {
            version: 0,
            flags: 0,
            default_crypt_byte_block: 0,
            default_skip_byte_block: 0,
            default_is_protected: 1,
            default_per_sample_iv_size: 8,
            default_kid: [0x11; 16],
            default_constant_iv: None,
        }
    }

    fn enca_entry() -> EncryptedSampleEntry {
        let sinf = SinfBox {
            children: vec![
                SinfChild::Frma(FrmaBox {
                    data_format: FourCc(*b"mp4a"),
                }),
                SinfChild::Schm(SchmBox {
                    version: 0,
                    flags: 0,
                    scheme_type: SchmBox::CENC,
                    scheme_version: 0x0001_0000,
                    scheme_uri: None,
                }),
                SinfChild::Schi(SchiBox {
                    children: vec![SchiChild::Tenc(tenc())],
                }),
            ],
        };
        EncryptedSampleEntry {
            format: FourCc::ENCA,
            fixed: vec![0; AUDIO_ENTRY_FIXED_LEN],
            children: vec![
                EntryChild::Raw(RawBox::new(FourCc(*b"esds"), &[0, 0, 0, 0, 3])),
                EntryChild::Sinf(sinf),
            ],
        }
    }

    #[test]
    fn test_tenc_roundtrip_versions() {
        let v0 = tenc();
        assert_eq!(TencBox::decode(&v0.to_bytes()).unwrap(), v0);

        let v1 = TencBox {
            version: 1,
            default_crypt_byte_block: 1,
            default_skip_byte_block: 9,
            default_per_sample_iv_size: 0,
            default_constant_iv: Some(vec![7; 16]),
            ..tenc()
        };
        let decoded = TencBox::decode(&v1.to_bytes()).unwrap();
        assert_eq!(decoded, v1);
        assert_eq!(decoded.default_kid_hex(), "11".repeat(16));
    }

    #[test]
    fn test_stsd_with_encrypted_entry_roundtrip() {
        let stsd = StsdBox {
            version: 0,
            flags: 0,
            entries: vec![SampleEntry::Encrypted(enca_entry())],
        };
        let bytes = stsd.to_bytes();
        let decoded = StsdBox::decode(&bytes).unwrap();
        assert_eq!(decoded, stsd);
        assert!(decoded.is_protected());
        assert_eq!(decoded.tenc().unwrap().default_kid, [0x11; 16]);
        assert_eq!(decoded.sinf().unwrap().schm().unwrap().scheme_type, SchmBox::CENC);
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn test_unprotect_restores_original_format() {
        let mut stsd = StsdBox {
            version: 0,
            flags: 0,
            entries: vec![SampleEntry::Encrypted(enca_entry())],
        };
        assert_eq!(stsd.unprotect().unwrap(), 1);
        assert!(!stsd.is_protected());
        assert_eq!(stsd.entries[0].format(), FourCc(*b"mp4a"));

        // The rewritten entry keeps the fixed fields and the codec config
        let SampleEntry::Other(raw) = &stsd.entries[0] else {
            panic!("expected clear entry");
        };
        let payload = raw.payload();
        assert_eq!(payload.len(), AUDIO_ENTRY_FIXED_LEN + 13);
        assert_eq!(&payload[AUDIO_ENTRY_FIXED_LEN + 4..AUDIO_ENTRY_FIXED_LEN + 8], b"esds");
    }

    #[test]
    fn test_unprotect_without_frma_fails() {
        let mut entry = enca_entry();
        for child in &mut entry.children {
            if let EntryChild::Sinf(sinf) = child {
                sinf.children.retain(|c| !matches!(c, SinfChild::Frma(_)));
            }
        }
        let mut stsd = StsdBox {
            version: 0,
            flags: 0,
            entries: vec![SampleEntry::Encrypted(entry)],
        };
        assert_matches!(stsd.unprotect(), Err(Error::MissingAtom("frma")));
    }

    #[test]
    fn test_short_encrypted_entry_is_truncated() {
        let mut buf = BytesMut::new();
        write_full_box_header(&mut buf, 0, 0);
        buf.put_u32(1);
        crate::bmff::write_box(&mut buf, FourCc::ENCV, &[0; 10]);
        assert_matches!(
            StsdBox::decode_payload(&buf),
            Err(Error::Truncated { context: "sample entry", .. })
        );
    }
}
