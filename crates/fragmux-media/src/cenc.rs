//! Common Encryption (`cenc` scheme) sample decryption.
//!
//! Samples are AES-128-CTR encrypted. An 8-byte IV fills the high half of
//! the counter block and the low half counts blocks from zero. With a
//! subsample list only the protected runs are encrypted, and the keystream
//! continues from one protected run to the next within a sample.

use crate::boxes::{SchmBox, SencSample, StsdBox, Subsample, TencBox};
use crate::{Error, Result};
use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use std::collections::HashMap;
use tracing::warn;

type Aes128Ctr = ctr::Ctr64BE<Aes128>;

/// 16-byte key identifier.
pub type KeyId = [u8; 16];
/// 16-byte AES key.
pub type ContentKey = [u8; 16];

/// Key ID to content key lookup, supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct KeyMap {
    keys: HashMap<KeyId, ContentKey>,
}

impl KeyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kid: KeyId, key: ContentKey) -> Option<ContentKey> {
        self.keys.insert(kid, key)
    }

    /// Insert a hex-encoded pair. Hyphens in the KID are ignored so
    /// UUID-formatted IDs work as-is.
    pub fn insert_hex(&mut self, kid: &str, key: &str) -> Result<()> {
        let kid = parse_hex16(kid, "KID")?;
        let key = parse_hex16(key, "key")?;
        self.keys.insert(kid, key);
        Ok(())
    }

    /// Parse a `KID:KEY` pair of hex strings.
    pub fn parse_pair(pair: &str) -> Result<(KeyId, ContentKey)> {
        let (kid, key) = pair
            .split_once(':')
            .ok_or_else(|| Error::InvalidKey(format!("expected KID:KEY, got '{pair}'")))?;
        Ok((parse_hex16(kid, "KID")?, parse_hex16(key, "key")?))
    }

    pub fn get(&self, kid: &KeyId) -> Option<&ContentKey> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<(KeyId, ContentKey)> for KeyMap {
    fn from_iter<I: IntoIterator<Item = (KeyId, ContentKey)>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

fn parse_hex16(s: &str, what: &str) -> Result<[u8; 16]> {
    let cleaned: String = s.trim().chars().filter(|c| *c != '-').collect();
    let bytes =
        hex::decode(&cleaned).map_err(|e| Error::InvalidKey(format!("{what} '{s}': {e}")))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        Error::InvalidKey(format!("{what} '{s}' is {} bytes, expected 16", b.len()))
    })
}

/// Decrypt one sample in place.
///
/// Without `subsamples` the whole sample is one CTR stream. With them,
/// each run skips `clear_bytes` and decrypts `protected_bytes`; bytes past
/// the last run stay clear.
pub fn decrypt_sample(
    key: &ContentKey,
    iv: &[u8],
    subsamples: Option<&[Subsample]>,
    data: &mut [u8],
) -> Result<()> {
    let mut counter = [0u8; 16];
    match iv.len() {
        8 | 16 => counter[..iv.len()].copy_from_slice(iv),
        n => return Err(Error::MalformedIv(n)),
    }

    let mut cipher = Aes128Ctr::new(&(*key).into(), &counter.into());

    let Some(runs) = subsamples else {
        cipher.apply_keystream(data);
        return Ok(());
    };

    let mut pos = 0usize;
    for run in runs {
        let start = pos + run.clear_bytes as usize;
        let end = start + run.protected_bytes as usize;
        if end > data.len() {
            return Err(Error::invalid_mp4(format!(
                "subsample runs cover {end} bytes of a {}-byte sample",
                data.len()
            )));
        }
        cipher.apply_keystream(&mut data[start..end]);
        pos = end;
    }
    Ok(())
}

/// Per-sample hook run by the remux engine before a sample is written.
///
/// `encryption` is the sample's `senc` record when the fragment has one.
pub trait SampleProcessor {
    fn process(&mut self, sample: &mut [u8], encryption: Option<&SencSample>) -> Result<()>;
}

impl<F> SampleProcessor for F
where
    F: FnMut(&mut [u8], Option<&SencSample>) -> Result<()>,
{
    fn process(&mut self, sample: &mut [u8], encryption: Option<&SencSample>) -> Result<()> {
        self(sample, encryption)
    }
}

/// Leaves samples untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl SampleProcessor for Passthrough {
    fn process(&mut self, _sample: &mut [u8], _encryption: Option<&SencSample>) -> Result<()> {
        Ok(())
    }
}

/// Decrypts samples of one protected track.
#[derive(Debug, Clone)]
pub struct CencDecryptor {
    key: ContentKey,
    default_protected: bool,
    constant_iv: Option<Vec<u8>>,
}

impl CencDecryptor {
    pub fn new(key: ContentKey, tenc: &TencBox) -> Self {
        Self {
            key,
            default_protected: tenc.default_is_protected != 0,
            constant_iv: tenc.default_constant_iv.clone(),
        }
    }

    /// Build a decryptor for the track described by `stsd`.
    ///
    /// Returns `None` for a clear track. Fails when the scheme is not
    /// `cenc`, when `tenc` is absent, or when `keys` lacks the default KID.
    pub fn for_track(stsd: &StsdBox, keys: &KeyMap) -> Result<Option<Self>> {
        let Some(sinf) = stsd.sinf() else {
            return Ok(None);
        };
        if let Some(schm) = sinf.schm() {
            if schm.scheme_type != SchmBox::CENC {
                return Err(Error::unsupported(format!(
                    "protection scheme '{}'",
                    schm.scheme_type
                )));
            }
        }
        let tenc = sinf.tenc().ok_or(Error::MissingAtom("tenc"))?;
        let key = keys
            .get(&tenc.default_kid)
            .ok_or(Error::MissingKey(tenc.default_kid))?;
        Ok(Some(Self::new(*key, tenc)))
    }
}

impl SampleProcessor for CencDecryptor {
    fn process(&mut self, sample: &mut [u8], encryption: Option<&SencSample>) -> Result<()> {
        let Some(info) = encryption else {
            return match (&self.constant_iv, self.default_protected) {
                (Some(iv), true) => decrypt_sample(&self.key, iv, None, sample),
                (_, false) => Ok(()),
                (None, true) => Err(Error::invalid_mp4(
                    "protected sample has no sample encryption entry",
                )),
            };
        };

        let iv = match (info.iv.is_empty(), &self.constant_iv) {
            (false, _) => info.iv.as_slice(),
            (true, Some(constant)) => constant.as_slice(),
            (true, None) => return Err(Error::MalformedIv(0)),
        };

        let subsamples = match info.subsamples.as_deref() {
            Some([]) => {
                warn!("Empty subsample list, decrypting the whole sample");
                None
            }
            other => other,
        };

        decrypt_sample(&self.key, iv, subsamples, sample)
    }
}
