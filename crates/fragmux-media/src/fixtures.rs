//! Synthetic init and media segments for tests and benchmarks.
//!
//! Segments are assembled from the typed box model, optionally with CENC
//! encryption applied to the sample payloads, so no binary test files are
//! needed.

use crate::bmff::{write_box, BmffBox, FourCc};
use crate::boxes::{
    EncryptedSampleEntry, EntryChild, FrmaBox, HdlrBox, HeaderTimes, MdhdBox, MdiaBox, MdiaChild,
    MfhdBox, MinfBox, MinfChild, MoofBox, MoofChild, MoovBox, MoovChild, MvexBox, MvexChild,
    MvhdBox, PsshBox, RawBox, SampleEntry, SchiBox, SchiChild, SchmBox, SencBox, SencSample,
    SinfBox, SinfChild, StblBox, StblChild, StcoBox, StscBox, StsdBox, StszBox, SttsBox,
    Subsample, TencBox, TfhdBox, TkhdBox, TrafBox, TrafChild, TrakBox, TrakChild, TrexBox,
    TrunBox, TrunEntry,
};
use crate::cenc::{decrypt_sample, ContentKey, KeyId};
use bytes::{BufMut, BytesMut};

/// Sample flags of a sync sample (depends on no other sample).
pub const SYNC_SAMPLE_FLAGS: u32 = 0x0200_0000;
/// Sample flags of a difference sample.
pub const NON_SYNC_SAMPLE_FLAGS: u32 = 0x0101_0000;

/// Default KID used by the fixtures.
pub const FIXTURE_KID: KeyId = [
    0x10, 0x00, 0x00, 0x00, 0x10, 0x00, 0x10, 0x00, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x01,
];
/// Default content key used by the fixtures.
pub const FIXTURE_KEY: ContentKey = [
    0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f, 0x3c,
];

/// One clear sample to place in a media segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureSample {
    pub data: Vec<u8>,
    pub duration: u32,
    pub is_sync: bool,
    pub composition_offset: i32,
}

impl FixtureSample {
    pub fn new(data: Vec<u8>, duration: u32) -> Self {
        Self {
            data,
            duration,
            is_sync: true,
            composition_offset: 0,
        }
    }

    pub fn non_sync(mut self) -> Self {
        self.is_sync = false;
        self
    }

    pub fn composition_offset(mut self, offset: i32) -> Self {
        self.composition_offset = offset;
        self
    }
}

// ---------------------------------------------------------------------------
// Init segment
// ---------------------------------------------------------------------------

/// Builder for a fragmented init segment (`ftyp` + `moov` with `mvex`).
#[derive(Debug, Clone)]
pub struct InitSegmentBuilder {
    track_id: u32,
    video: bool,
    timescale: u32,
    extra_track_ids: Vec<u32>,
    kid: Option<KeyId>,
    scheme: FourCc,
    iv_size: u8,
    constant_iv: Option<Vec<u8>>,
    edit_list: bool,
    pssh: bool,
    trex: TrexBox,
}

impl Default for InitSegmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InitSegmentBuilder {
    /// A clear AAC-style audio track with ID 1 at 48 kHz.
    pub fn new() -> Self {
        Self {
            track_id: 1,
            video: false,
            timescale: 48_000,
            extra_track_ids: Vec::new(),
            kid: None,
            scheme: SchmBox::CENC,
            iv_size: 8,
            constant_iv: None,
            edit_list: false,
            pssh: false,
            trex: TrexBox::default(),
        }
    }

    pub fn track_id(mut self, id: u32) -> Self {
        self.track_id = id;
        self
    }

    /// Make the track an AVC-style video track at 90 kHz.
    pub fn video(mut self) -> Self {
        self.video = true;
        self.timescale = 90_000;
        self
    }

    pub fn timescale(mut self, timescale: u32) -> Self {
        self.timescale = timescale;
        self
    }

    /// Add a clear audio track alongside the main one.
    pub fn extra_track(mut self, id: u32) -> Self {
        self.extra_track_ids.push(id);
        self
    }

    /// Protect the track (`enca`/`encv` + `sinf`) with `kid`.
    pub fn encrypted(mut self, kid: KeyId) -> Self {
        self.kid = Some(kid);
        self
    }

    pub fn scheme(mut self, scheme: FourCc) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn iv_size(mut self, size: u8) -> Self {
        self.iv_size = size;
        self
    }

    /// Use one constant IV for every sample (per-sample IV size 0).
    pub fn constant_iv(mut self, iv: Vec<u8>) -> Self {
        self.iv_size = 0;
        self.constant_iv = Some(iv);
        self
    }

    pub fn with_edit_list(mut self) -> Self {
        self.edit_list = true;
        self
    }

    /// Add a Widevine `pssh` to the `moov`.
    pub fn with_pssh(mut self) -> Self {
        self.pssh = true;
        self
    }

    /// Fragment defaults for the main track.
    pub fn trex_defaults(mut self, duration: u32, size: u32, flags: u32) -> Self {
        self.trex.default_sample_duration = duration;
        self.trex.default_sample_size = size;
        self.trex.default_sample_flags = flags;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(1024);
        write_ftyp(&mut buf, b"iso6");
        self.moov().encode(&mut buf);
        buf.to_vec()
    }

    fn moov(&self) -> MoovBox {
        let next_track_id = self
            .extra_track_ids
            .iter()
            .copied()
            .fold(self.track_id, u32::max)
            + 1;
        let mut children = vec![MoovChild::Mvhd(MvhdBox {
            times: header_times(1000),
            trailing: mvhd_trailing(next_track_id),
        })];

        children.push(MoovChild::Trak(self.trak(self.track_id, self.video, self.kid)));
        for &id in &self.extra_track_ids {
            children.push(MoovChild::Trak(self.trak(id, false, None)));
        }

        let mut trex = vec![MvexChild::Trex(TrexBox {
            track_id: self.track_id,
            default_sample_description_index: 1,
            ..self.trex.clone()
        })];
        trex.extend(self.extra_track_ids.iter().map(|&id| {
            MvexChild::Trex(TrexBox {
                track_id: id,
                default_sample_description_index: 1,
                ..Default::default()
            })
        }));
        children.push(MoovChild::Mvex(MvexBox { children: trex }));

        if self.pssh {
            children.push(MoovChild::Pssh(PsshBox {
                version: 0,
                flags: 0,
                system_id: PsshBox::WIDEVINE,
                key_ids: Vec::new(),
                data: vec![0x12, 0x10],
            }));
        }

        MoovBox { children }
    }

    fn trak(&self, track_id: u32, video: bool, kid: Option<KeyId>) -> TrakBox {
        let mut children = vec![TrakChild::Tkhd(TkhdBox {
            version: 0,
            flags: 0x3,
            creation_time: 0,
            modification_time: 0,
            track_id,
            reserved: 0,
            duration: 0,
            trailing: tkhd_trailing(video),
        })];
        if self.edit_list {
            children.push(TrakChild::Raw(edts()));
        }

        let (handler, media_header) = if video {
            (FourCc(*b"vide"), RawBox::new(FourCc(*b"vmhd"), &[0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]))
        } else {
            (FourCc(*b"soun"), RawBox::new(FourCc(*b"smhd"), &[0; 8]))
        };

        let stbl = StblBox {
            children: vec![
                StblChild::Stsd(StsdBox {
                    version: 0,
                    flags: 0,
                    entries: vec![self.sample_entry(video, kid)],
                }),
                StblChild::Stts(SttsBox::default()),
                StblChild::Stsc(StscBox::default()),
                StblChild::Stsz(StszBox::default()),
                StblChild::Stco(StcoBox::default()),
            ],
        };

        let mdia = MdiaBox {
            children: vec![
                MdiaChild::Mdhd(MdhdBox {
                    times: header_times(self.timescale),
                    // und, pre_defined
                    trailing: vec![0x55, 0xC4, 0, 0],
                }),
                MdiaChild::Hdlr(HdlrBox {
                    version: 0,
                    flags: 0,
                    pre_defined: 0,
                    handler_type: handler,
                    trailing: [&[0u8; 12][..], &b"fixture\0"[..]].concat(),
                }),
                MdiaChild::Minf(MinfBox {
                    children: vec![
                        MinfChild::Raw(media_header),
                        MinfChild::Raw(dinf()),
                        MinfChild::Stbl(stbl),
                    ],
                }),
            ],
        };
        children.push(TrakChild::Mdia(mdia));

        TrakBox { children }
    }

    fn sample_entry(&self, video: bool, kid: Option<KeyId>) -> SampleEntry {
        let (format, protected_format, fixed, config) = if video {
            (
                FourCc(*b"avc1"),
                FourCc::ENCV,
                visual_entry_fixed(),
                RawBox::new(FourCc(*b"avcC"), &[1, 0x64, 0, 0x1F, 0xFF, 0xE0, 0]),
            )
        } else {
            (
                FourCc(*b"mp4a"),
                FourCc::ENCA,
                audio_entry_fixed(self.timescale),
                RawBox::new(FourCc(*b"esds"), &[0, 0, 0, 0, 0x03, 0x80, 0x80, 0x80, 0x00]),
            )
        };

        let Some(kid) = kid else {
            let mut payload = BytesMut::new();
            payload.put_slice(&fixed);
            config.encode(&mut payload);
            return SampleEntry::Other(RawBox::new(format, &payload));
        };

        let tenc = TencBox {
            version: 0,
            flags: 0,
            default_crypt_byte_block: 0,
            default_skip_byte_block: 0,
            default_is_protected: 1,
            default_per_sample_iv_size: self.iv_size,
            default_kid: kid,
            default_constant_iv: self.constant_iv.clone(),
        };
        let sinf = SinfBox {
            children: vec![
                SinfChild::Frma(FrmaBox {
                    data_format: format,
                }),
                SinfChild::Schm(SchmBox {
                    version: 0,
                    flags: 0,
                    scheme_type: self.scheme,
                    scheme_version: 0x0001_0000,
                    scheme_uri: None,
                }),
                SinfChild::Schi(SchiBox {
                    children: vec![SchiChild::Tenc(tenc)],
                }),
            ],
        };
        SampleEntry::Encrypted(EncryptedSampleEntry {
            format: protected_format,
            fixed,
            children: vec![EntryChild::Raw(config), EntryChild::Sinf(sinf)],
        })
    }
}

fn write_ftyp(buf: &mut BytesMut, major: &[u8; 4]) {
    let mut payload = BytesMut::new();
    payload.put_slice(major);
    payload.put_u32(0x200);
    for brand in [major, b"iso8", b"mp41", b"dash", b"cmfc"] {
        payload.put_slice(brand);
    }
    write_box(buf, FourCc::FTYP, &payload);
}

fn header_times(timescale: u32) -> HeaderTimes {
    HeaderTimes {
        version: 0,
        flags: 0,
        creation_time: 0,
        modification_time: 0,
        timescale,
        duration: 0,
    }
}

fn identity_matrix(buf: &mut BytesMut) {
    for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        buf.put_u32(v);
    }
}

fn mvhd_trailing(next_track_id: u32) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u32(0x0001_0000); // rate
    buf.put_u16(0x0100); // volume
    buf.put_slice(&[0; 10]);
    identity_matrix(&mut buf);
    buf.put_slice(&[0; 24]);
    buf.put_u32(next_track_id);
    buf.to_vec()
}

fn tkhd_trailing(video: bool) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_slice(&[0; 8]);
    buf.put_u16(0); // layer
    buf.put_u16(0); // alternate group
    buf.put_u16(if video { 0 } else { 0x0100 });
    buf.put_u16(0);
    identity_matrix(&mut buf);
    let (w, h) = if video { (1280u32, 720u32) } else { (0, 0) };
    buf.put_u32(w << 16);
    buf.put_u32(h << 16);
    buf.to_vec()
}

fn edts() -> RawBox {
    // elst v0 with one entry: 1024 ticks skipped at media time 1024
    let mut elst = BytesMut::new();
    elst.put_u32(0);
    elst.put_u32(1);
    elst.put_u32(0);
    elst.put_u32(1024);
    elst.put_u32(0x0001_0000);
    let mut payload = BytesMut::new();
    write_box(&mut payload, FourCc(*b"elst"), &elst);
    RawBox::new(FourCc::EDTS, &payload)
}

fn dinf() -> RawBox {
    let mut url = BytesMut::new();
    write_box(&mut url, FourCc(*b"url "), &[0, 0, 0, 1]);
    let mut dref = BytesMut::new();
    dref.put_u32(0);
    dref.put_u32(1);
    dref.put_slice(&url);
    let mut payload = BytesMut::new();
    write_box(&mut payload, FourCc(*b"dref"), &dref);
    RawBox::new(FourCc(*b"dinf"), &payload)
}

fn visual_entry_fixed() -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_slice(&[0; 6]);
    buf.put_u16(1); // data_reference_index
    buf.put_slice(&[0; 16]);
    buf.put_u16(1280);
    buf.put_u16(720);
    buf.put_u32(0x0048_0000);
    buf.put_u32(0x0048_0000);
    buf.put_u32(0);
    buf.put_u16(1); // frame_count
    buf.put_slice(&[0; 32]);
    buf.put_u16(0x0018);
    buf.put_i16(-1);
    buf.to_vec()
}

fn audio_entry_fixed(sample_rate: u32) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_slice(&[0; 6]);
    buf.put_u16(1); // data_reference_index
    buf.put_slice(&[0; 8]);
    buf.put_u16(2); // channels
    buf.put_u16(16); // sample size
    buf.put_u32(0);
    buf.put_u32(sample_rate.min(0xFFFF) << 16);
    buf.to_vec()
}

// ---------------------------------------------------------------------------
// Media segment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SegmentEncryption {
    key: ContentKey,
    iv_size: usize,
    constant_iv: Option<Vec<u8>>,
    clear_lead: Option<u16>,
}

/// Builder for one `styp` + `moof` + `mdat` media segment.
#[derive(Debug, Clone)]
pub struct MediaSegmentBuilder {
    sequence_number: u32,
    track_id: u32,
    base_decode_time: u64,
    samples: Vec<FixtureSample>,
    encryption: Option<SegmentEncryption>,
    data_offset: bool,
    mdat_padding: usize,
    foreign_track: Option<u32>,
}

impl MediaSegmentBuilder {
    pub fn new(sequence_number: u32) -> Self {
        Self {
            sequence_number,
            track_id: 1,
            base_decode_time: 0,
            samples: Vec::new(),
            encryption: None,
            data_offset: true,
            mdat_padding: 0,
            foreign_track: None,
        }
    }

    pub fn track_id(mut self, id: u32) -> Self {
        self.track_id = id;
        self
    }

    pub fn base_decode_time(mut self, time: u64) -> Self {
        self.base_decode_time = time;
        self
    }

    pub fn samples(mut self, samples: impl IntoIterator<Item = FixtureSample>) -> Self {
        self.samples.extend(samples);
        self
    }

    /// Encrypt every sample with `key` and per-sample IVs of `iv_size`
    /// bytes, recorded in a `senc`.
    pub fn encrypt(mut self, key: ContentKey, iv_size: usize) -> Self {
        self.encryption = Some(SegmentEncryption {
            key,
            iv_size,
            constant_iv: None,
            clear_lead: None,
        });
        self
    }

    /// Encrypt every sample with `key` and one constant IV.
    pub fn encrypt_with_constant_iv(mut self, key: ContentKey, iv: Vec<u8>) -> Self {
        self.encryption = Some(SegmentEncryption {
            key,
            iv_size: 0,
            constant_iv: Some(iv),
            clear_lead: None,
        });
        self
    }

    /// Leave the first `bytes` of each sample clear (subsample encryption).
    pub fn clear_lead(mut self, bytes: u16) -> Self {
        if let Some(enc) = &mut self.encryption {
            enc.clear_lead = Some(bytes);
        }
        self
    }

    /// Omit `trun` data offsets so runs are located back to back.
    pub fn without_data_offset(mut self) -> Self {
        self.data_offset = false;
        self
    }

    /// Junk bytes at the start of the `mdat` payload, skipped via the
    /// `trun` data offset.
    pub fn mdat_padding(mut self, bytes: usize) -> Self {
        self.mdat_padding = bytes;
        self
    }

    /// Add an empty-sized `traf` for another track.
    pub fn foreign_track(mut self, id: u32) -> Self {
        self.foreign_track = Some(id);
        self
    }

    /// Sum of the clear sample sizes.
    pub fn payload_len(&self) -> usize {
        self.samples.iter().map(|s| s.data.len()).sum()
    }

    pub fn build(&self) -> Vec<u8> {
        let (payloads, senc) = self.encrypted_payloads();

        let mut traf = vec![
            TrafChild::Tfhd(self.tfhd()),
            TrafChild::Raw(tfdt(self.base_decode_time)),
            TrafChild::Trun(self.trun()),
        ];
        if let Some(senc) = senc {
            traf.push(TrafChild::Senc(senc));
        }

        let mut children = vec![
            MoofChild::Mfhd(MfhdBox {
                sequence_number: self.sequence_number,
            }),
            MoofChild::Traf(TrafBox { children: traf }),
        ];
        if let Some(id) = self.foreign_track {
            children.push(MoofChild::Traf(foreign_traf(id)));
        }
        let mut moof = MoofBox { children };

        if self.data_offset {
            let moof_len = moof.to_bytes().len();
            let offset = (moof_len + 8 + self.mdat_padding) as i32;
            for child in &mut moof.children {
                if let MoofChild::Traf(traf) = child {
                    for c in &mut traf.children {
                        if let TrafChild::Trun(trun) = c {
                            trun.data_offset = Some(offset);
                        }
                    }
                }
            }
        }

        let mut mdat = vec![0xA5; self.mdat_padding];
        for payload in &payloads {
            mdat.extend_from_slice(payload);
        }

        let mut buf = BytesMut::new();
        write_styp(&mut buf);
        moof.encode(&mut buf);
        write_box(&mut buf, FourCc::MDAT, &mdat);
        buf.to_vec()
    }

    fn tfhd(&self) -> TfhdBox {
        let mut tfhd = TfhdBox {
            flags: TfhdBox::DEFAULT_BASE_IS_MOOF,
            track_id: self.track_id,
            ..Default::default()
        };
        if let Some(first) = self.samples.first() {
            if self.samples.iter().all(|s| s.duration == first.duration) {
                tfhd.default_sample_duration = Some(first.duration);
            }
        }
        tfhd.default_sample_flags = match self.sync_pattern() {
            SyncPattern::AllSync => Some(SYNC_SAMPLE_FLAGS),
            SyncPattern::FirstOnly => Some(NON_SYNC_SAMPLE_FLAGS),
            SyncPattern::Mixed => None,
        };
        tfhd
    }

    fn trun(&self) -> TrunBox {
        let uniform_duration = self.tfhd().default_sample_duration.is_some();
        let pattern = self.sync_pattern();
        let with_cto = self.samples.iter().any(|s| s.composition_offset != 0);

        let mut flags = TrunBox::SAMPLE_SIZE;
        if !uniform_duration {
            flags |= TrunBox::SAMPLE_DURATION;
        }
        if pattern == SyncPattern::Mixed {
            flags |= TrunBox::SAMPLE_FLAGS;
        }
        if with_cto {
            flags |= TrunBox::SAMPLE_COMPOSITION_OFFSET;
        }

        TrunBox {
            version: u8::from(self.samples.iter().any(|s| s.composition_offset < 0)),
            flags,
            data_offset: None,
            first_sample_flags: (pattern == SyncPattern::FirstOnly).then_some(SYNC_SAMPLE_FLAGS),
            entries: self
                .samples
                .iter()
                .map(|s| TrunEntry {
                    duration: (!uniform_duration).then_some(s.duration),
                    size: Some(s.data.len() as u32),
                    flags: (pattern == SyncPattern::Mixed).then_some(if s.is_sync {
                        SYNC_SAMPLE_FLAGS
                    } else {
                        NON_SYNC_SAMPLE_FLAGS
                    }),
                    composition_offset: with_cto.then_some(s.composition_offset),
                })
                .collect(),
        }
    }

    fn sync_pattern(&self) -> SyncPattern {
        match self.samples.split_first() {
            _ if self.samples.iter().all(|s| s.is_sync) => SyncPattern::AllSync,
            Some((first, rest)) if first.is_sync && rest.iter().all(|s| !s.is_sync) => {
                SyncPattern::FirstOnly
            }
            _ => SyncPattern::Mixed,
        }
    }

    fn encrypted_payloads(&self) -> (Vec<Vec<u8>>, Option<SencBox>) {
        let Some(enc) = &self.encryption else {
            return (self.samples.iter().map(|s| s.data.clone()).collect(), None);
        };

        let mut payloads = Vec::with_capacity(self.samples.len());
        let mut records = Vec::with_capacity(self.samples.len());
        for (i, sample) in self.samples.iter().enumerate() {
            let iv = if enc.iv_size == 0 {
                Vec::new()
            } else {
                let mut iv = vec![0u8; enc.iv_size];
                iv[..4].copy_from_slice(&self.sequence_number.to_be_bytes());
                iv[4..8].copy_from_slice(&(i as u32).to_be_bytes());
                iv
            };
            let subsamples = enc.clear_lead.map(|lead| {
                let len = sample.data.len();
                let clear = (lead as usize).min(len);
                vec![Subsample::new(clear as u16, (len - clear) as u32)]
            });

            let mut data = sample.data.clone();
            let counter = enc.constant_iv.as_deref().unwrap_or(&iv);
            // CTR mode: encrypting is the same operation as decrypting
            if decrypt_sample(&enc.key, counter, subsamples.as_deref(), &mut data).is_err() {
                panic!("fixture IV must be 8 or 16 bytes");
            }
            payloads.push(data);
            records.push(SencSample { iv, subsamples });
        }

        let senc = (enc.iv_size > 0 || enc.clear_lead.is_some())
            .then(|| SencBox::from_samples(&records));
        (payloads, senc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncPattern {
    AllSync,
    FirstOnly,
    Mixed,
}

fn write_styp(buf: &mut BytesMut) {
    let mut payload = BytesMut::new();
    payload.put_slice(b"msdh");
    payload.put_u32(0);
    payload.put_slice(b"msdhmsix");
    write_box(buf, FourCc::STYP, &payload);
}

fn tfdt(base_decode_time: u64) -> RawBox {
    let mut payload = BytesMut::new();
    payload.put_u32(0x0100_0000);
    payload.put_u64(base_decode_time);
    RawBox::new(FourCc::TFDT, &payload)
}

fn foreign_traf(track_id: u32) -> TrafBox {
    TrafBox {
        children: vec![
            TrafChild::Tfhd(TfhdBox {
                flags: TfhdBox::DEFAULT_BASE_IS_MOOF,
                track_id,
                default_sample_duration: Some(1),
                ..Default::default()
            }),
            TrafChild::Trun(TrunBox {
                flags: TrunBox::SAMPLE_SIZE,
                entries: vec![TrunEntry {
                    size: Some(0),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        ],
    }
}
