//! Sample encryption box.

use crate::bmff::{write_full_box_header, BmffBox, ByteReader, FourCc};
use crate::Result;
use bytes::{BufMut, BytesMut};

/// One clear/protected byte run inside a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subsample {
    pub clear_bytes: u16,
    pub protected_bytes: u32,
}

impl Subsample {
    pub fn new(clear_bytes: u16, protected_bytes: u32) -> Self {
        Self {
            clear_bytes,
            protected_bytes,
        }
    }
}

/// Per-sample encryption info from `senc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SencSample {
    /// Empty when the track uses a constant IV.
    pub iv: Vec<u8>,
    /// `None` means the whole sample is encrypted.
    pub subsamples: Option<Vec<Subsample>>,
}

/// Sample encryption.
///
/// The per-sample IV size is not recorded in the box itself (it comes
/// from the track's `tenc`), so records are kept undecoded until
/// [`SencBox::samples`] is called with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SencBox {
    pub version: u8,
    pub flags: u32,
    pub sample_count: u32,
    pub records: Vec<u8>,
}

impl SencBox {
    /// Flag bit: each record carries a subsample list.
    pub const USE_SUBSAMPLES: u32 = 0x2;

    pub fn has_subsamples(&self) -> bool {
        self.flags & Self::USE_SUBSAMPLES != 0
    }

    /// Decode the records with a per-sample IV of `iv_size` bytes.
    pub fn samples(&self, iv_size: usize) -> Result<Vec<SencSample>> {
        let mut r = ByteReader::new(&self.records, "senc");
        let min_record = iv_size + if self.has_subsamples() { 2 } else { 0 };
        r.ensure_records(self.sample_count as usize, min_record)?;

        let mut samples = Vec::with_capacity(self.sample_count as usize);
        for _ in 0..self.sample_count {
            let iv = r.read_bytes(iv_size)?.to_vec();
            let subsamples = if self.has_subsamples() {
                let count = r.read_u16()? as usize;
                r.ensure_records(count, 6)?;
                let mut runs = Vec::with_capacity(count);
                for _ in 0..count {
                    runs.push(Subsample::new(r.read_u16()?, r.read_u32()?));
                }
                Some(runs)
            } else {
                None
            };
            samples.push(SencSample { iv, subsamples });
        }
        Ok(samples)
    }

    /// Build a box from decoded records. The subsample flag is set when any
    /// sample carries a subsample list.
    pub fn from_samples(samples: &[SencSample]) -> Self {
        let use_subsamples = samples.iter().any(|s| s.subsamples.is_some());
        let mut records = BytesMut::new();
        for sample in samples {
            records.put_slice(&sample.iv);
            if use_subsamples {
                let runs = sample.subsamples.as_deref().unwrap_or_default();
                records.put_u16(runs.len() as u16);
                for run in runs {
                    records.put_u16(run.clear_bytes);
                    records.put_u32(run.protected_bytes);
                }
            }
        }
        Self {
            version: 0,
            flags: if use_subsamples { Self::USE_SUBSAMPLES } else { 0 },
            sample_count: samples.len() as u32,
            records: records.to_vec(),
        }
    }
}

impl BmffBox for SencBox {
    const TYPE: FourCc = FourCc::SENC;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "senc");
        let (version, flags) = r.read_full_box_header()?;
        let sample_count = r.read_u32()?;
        Ok(Self {
            version,
            flags,
            sample_count,
            records: r.read_rest().to_vec(),
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, self.version, self.flags);
        buf.put_u32(self.sample_count);
        buf.put_slice(&self.records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use assert_matches::assert_matches;

    #[test]
    fn test_senc_with_subsamples() {
        let samples = vec![
            SencSample {
                iv: vec![1; 8],
                subsamples: Some(vec![Subsample::new(4, 8), Subsample::new(0, 4)]),
            },
            SencSample {
                iv: vec![2; 8],
                subsamples: Some(vec![]),
            },
        ];
        let senc = SencBox::from_samples(&samples);
        assert!(senc.has_subsamples());
        assert_eq!(senc.records.len(), (8 + 2 + 12) + (8 + 2));

        let decoded = SencBox::decode(&senc.to_bytes()).unwrap();
        assert_eq!(decoded, senc);
        assert_eq!(decoded.samples(8).unwrap(), samples);
    }

    #[test]
    fn test_senc_full_sample_ivs() {
        let samples: Vec<_> = (0..3u8)
            .map(|i| SencSample {
                iv: vec![i; 16],
                subsamples: None,
            })
            .collect();
        let senc = SencBox::from_samples(&samples);
        assert!(!senc.has_subsamples());
        assert_eq!(senc.samples(16).unwrap(), samples);
    }

    #[test]
    fn test_senc_wrong_iv_size_is_truncated() {
        let senc = SencBox::from_samples(&[SencSample {
            iv: vec![0; 8],
            subsamples: None,
        }]);
        assert_matches!(senc.samples(16), Err(Error::Truncated { context: "senc", .. }));
    }
}
