//! Integration tests for fragmux-media: full remux lifecycle over
//! synthetic segments.

use assert_matches::assert_matches;
use bytes::BytesMut;
use fragmux_media::bmff::{iter_boxes, write_box, BmffBox, FourCc};
use fragmux_media::boxes::{
    parse, MfhdBox, MoofBox, MoofChild, MoovBox, Mp4Box, SampleEntry, StblBox, TfhdBox, TrafBox,
    TrafChild, TrakChild, TrunBox, TrunEntry,
};
use fragmux_media::fixtures::{
    FixtureSample, InitSegmentBuilder, MediaSegmentBuilder, FIXTURE_KEY, FIXTURE_KID,
};
use fragmux_media::{Error, KeyMap, Passthrough, SampleTable, UnfragmentOptions, Unfragmenter};
use std::io::{self, Cursor, Seek, SeekFrom, Write};

fn keys() -> KeyMap {
    [(FIXTURE_KID, FIXTURE_KEY)].into_iter().collect()
}

fn remuxer(options: UnfragmentOptions) -> Unfragmenter<Cursor<Vec<u8>>> {
    Unfragmenter::new(Cursor::new(Vec::new()), options)
}

/// Ten samples of varying size, distinct content per segment.
fn segment_samples(segment: u8) -> Vec<FixtureSample> {
    (0..10u8)
        .map(|i| FixtureSample::new(vec![segment * 10 + i; 20 + i as usize], 1024))
        .collect()
}

struct Output {
    bytes: Vec<u8>,
    moov: MoovBox,
    moov_bytes: Vec<u8>,
    mdat_payload: Vec<u8>,
}

impl Output {
    fn parse(bytes: Vec<u8>) -> Self {
        let mut moov = None;
        let mut moov_bytes = Vec::new();
        let mut mdat_payload = Vec::new();
        for slice in iter_boxes(&bytes) {
            let slice = slice.unwrap();
            match slice.box_type() {
                FourCc::MOOV => {
                    moov_bytes = slice.bytes.to_vec();
                    let Mp4Box::Moov(m) = Mp4Box::decode_slice(&slice).unwrap() else {
                        unreachable!()
                    };
                    moov = Some(m);
                }
                FourCc::MDAT => mdat_payload = slice.payload().to_vec(),
                _ => {}
            }
        }
        Self {
            moov: moov.expect("output has a moov"),
            moov_bytes,
            mdat_payload,
            bytes,
        }
    }

    fn stbl(&self) -> &StblBox {
        self.moov.trak(None).unwrap().stbl().unwrap()
    }

    fn contains_type(&self, code: &[u8; 4]) -> bool {
        self.moov_bytes.windows(4).any(|w| w == code)
    }
}

#[test]
fn test_encrypted_audio_end_to_end() {
    let init = InitSegmentBuilder::new()
        .encrypted(FIXTURE_KID)
        .with_pssh()
        .with_edit_list()
        .build();
    let seg1 = MediaSegmentBuilder::new(1)
        .samples(segment_samples(0))
        .encrypt(FIXTURE_KEY, 8)
        .clear_lead(5)
        .build();
    let seg2 = MediaSegmentBuilder::new(2)
        .base_decode_time(10 * 1024)
        .samples(segment_samples(1))
        .encrypt(FIXTURE_KEY, 8)
        .build();

    let mut r = remuxer(UnfragmentOptions::default());
    r.initialize(&init).unwrap();
    r.add_encrypted_segment(&seg1, &keys()).unwrap();
    r.add_encrypted_segment(&seg2, &keys()).unwrap();
    let summary = r.finish().unwrap();
    assert_eq!(summary.sample_count, 20);
    assert_eq!(summary.chunk_count, 2);

    let out = Output::parse(r.into_inner().into_inner());

    // top level: ftyp, mdat, moov
    let types: Vec<_> = parse(&out.bytes).unwrap().iter().map(Mp4Box::box_type).collect();
    assert_eq!(types, [FourCc::FTYP, FourCc::MDAT, FourCc::MOOV]);

    // no DRM or fragmentation leftovers
    for code in [b"pssh", b"sinf", b"edts", b"mvex", b"enca", b"tenc"] {
        assert!(!out.contains_type(code), "{} left in moov", FourCc(*code));
    }
    let trak = out.moov.trak(None).unwrap();
    assert!(!trak
        .children
        .iter()
        .any(|c| matches!(c, TrakChild::Raw(r) if r.box_type == FourCc::EDTS)));

    // sample entry restored to the frma format
    let stsd = trak.stsd().unwrap();
    assert!(!stsd.is_protected());
    assert_matches!(&stsd.entries[0], SampleEntry::Other(raw) if raw.box_type == FourCc(*b"mp4a"));

    // stsz: 20 entries summing to the decrypted payload
    let stsz = out.stbl().stsz().unwrap();
    assert_eq!(stsz.entry_sizes.len(), 20);
    let total: u64 = stsz.entry_sizes.iter().map(|&s| s as u64).sum();
    assert_eq!(total, out.mdat_payload.len() as u64);

    // every sample decrypts back to its plaintext at the recorded offset
    let table = SampleTable::from_stbl(out.stbl()).unwrap();
    let expected: Vec<_> = segment_samples(0)
        .into_iter()
        .chain(segment_samples(1))
        .collect();
    for (entry, sample) in table.iter().zip(&expected) {
        let start = entry.offset as usize;
        assert_eq!(&out.bytes[start..start + entry.size as usize], &sample.data[..]);
    }

    // durations in media and movie headers
    assert_eq!(table.duration(), 20 * 1024);
    let mdhd = trak.mdhd().unwrap();
    assert_eq!(mdhd.duration(), 20 * 1024);
    let mvhd = out.moov.mvhd().unwrap();
    assert_eq!(mvhd.timescale(), 48_000);
    assert_eq!(mvhd.duration(), 20 * 1024);
    assert_eq!(trak.tkhd().unwrap().duration, 20 * 1024);

    // one chunk per segment, ten samples each
    assert_eq!(out.stbl().chunk_offsets().len(), 2);
    assert_eq!(out.stbl().stsc().unwrap().entries.len(), 1);
    assert!(out.stbl().stss().is_none());
    assert!(out.stbl().ctts().is_none());
}

#[test]
fn test_missing_key_writes_nothing_past_placeholder() {
    let init = InitSegmentBuilder::new().encrypted(FIXTURE_KID).build();
    let segment = MediaSegmentBuilder::new(1)
        .samples(segment_samples(0))
        .encrypt(FIXTURE_KEY, 8)
        .build();

    let mut r = remuxer(UnfragmentOptions::default());
    r.initialize(&init).unwrap();
    let after_init = r.sink().get_ref().len();

    let result = r.add_encrypted_segment(&segment, &KeyMap::new());
    assert_matches!(result, Err(Error::MissingKey(kid)) if kid == FIXTURE_KID);
    assert_eq!(r.sink().get_ref().len(), after_init);

    // ftyp followed by the largesize mdat header only
    let bytes = r.into_inner().into_inner();
    assert_eq!(&bytes[bytes.len() - 16..bytes.len() - 12], &1u32.to_be_bytes());
    assert_eq!(&bytes[bytes.len() - 12..bytes.len() - 8], b"mdat");
}

#[test]
fn test_video_sync_and_composition_tables() {
    let init = InitSegmentBuilder::new().video().build();
    let samples: Vec<_> = (0..6u8)
        .map(|i| {
            let offset = if i % 2 == 0 { 6000 } else { 0 };
            let s = FixtureSample::new(vec![i; 50], 3000).composition_offset(offset);
            if i % 3 == 0 {
                s
            } else {
                s.non_sync()
            }
        })
        .collect();
    let segment = MediaSegmentBuilder::new(1).samples(samples).build();

    let mut r = remuxer(UnfragmentOptions::default());
    r.initialize(&init).unwrap();
    r.add_segment(&segment, &mut Passthrough).unwrap();
    r.finish().unwrap();

    let out = Output::parse(r.into_inner().into_inner());
    assert!(out.moov.trak(None).unwrap().is_video());
    assert_eq!(out.stbl().stss().unwrap().sample_numbers, vec![1, 4]);
    let ctts = out.stbl().ctts().unwrap();
    assert_eq!(ctts.version, 0);
    assert_eq!(ctts.offsets(), vec![6000, 0, 6000, 0, 6000, 0]);
    assert_eq!(
        out.moov.trak(None).unwrap().mdhd().unwrap().timescale(),
        90_000
    );
}

#[test]
fn test_first_sample_flags_pattern() {
    let init = InitSegmentBuilder::new().video().build();
    let samples = (0..4u8).map(|i| {
        let s = FixtureSample::new(vec![i; 8], 3000);
        if i == 0 {
            s
        } else {
            s.non_sync()
        }
    });
    let segment = MediaSegmentBuilder::new(1).samples(samples).build();

    let mut r = remuxer(UnfragmentOptions::default());
    r.initialize(&init).unwrap();
    r.add_segment(&segment, &mut Passthrough).unwrap();
    r.finish().unwrap();

    let out = Output::parse(r.into_inner().into_inner());
    assert_eq!(out.stbl().stss().unwrap().sample_numbers, vec![1]);
}

#[test]
fn test_track_selection_skips_other_tracks() {
    let init = InitSegmentBuilder::new().extra_track(2).build();
    let segment = MediaSegmentBuilder::new(1)
        .samples(segment_samples(0))
        .foreign_track(2)
        .build();

    let mut r = remuxer(UnfragmentOptions::default());
    r.initialize(&init).unwrap();
    r.add_segment(&segment, &mut Passthrough).unwrap();
    let summary = r.finish().unwrap();
    assert_eq!(summary.track_id, 1);
    assert_eq!(summary.sample_count, 10);

    let out = Output::parse(r.into_inner().into_inner());
    assert_eq!(out.moov.traks().count(), 1);
    assert_eq!(out.moov.trak(None).unwrap().track_id(), 1);
}

#[test]
fn test_select_second_track() {
    let init = InitSegmentBuilder::new().extra_track(2).build();
    let segment = MediaSegmentBuilder::new(1)
        .track_id(2)
        .samples(segment_samples(3))
        .build();

    let mut r = remuxer(UnfragmentOptions { track_id: Some(2) });
    r.initialize(&init).unwrap();
    r.add_segment(&segment, &mut Passthrough).unwrap();
    r.finish().unwrap();

    let out = Output::parse(r.into_inner().into_inner());
    let ids: Vec<_> = out.moov.traks().map(|t| t.track_id()).collect();
    assert_eq!(ids, vec![2]);
    assert_eq!(out.stbl().stsz().unwrap().entry_sizes.len(), 10);
}

#[test]
fn test_data_offset_padding_and_back_to_back_runs() {
    let init = InitSegmentBuilder::new().build();
    let padded = MediaSegmentBuilder::new(1)
        .samples(segment_samples(0))
        .mdat_padding(13)
        .build();
    let plain = MediaSegmentBuilder::new(2)
        .samples(segment_samples(1))
        .without_data_offset()
        .build();

    let mut r = remuxer(UnfragmentOptions::default());
    r.initialize(&init).unwrap();
    r.add_segment(&padded, &mut Passthrough).unwrap();
    r.add_segment(&plain, &mut Passthrough).unwrap();
    r.finish().unwrap();

    let out = Output::parse(r.into_inner().into_inner());
    let expected: Vec<u8> = segment_samples(0)
        .into_iter()
        .chain(segment_samples(1))
        .flat_map(|s| s.data)
        .collect();
    // padding is not copied
    assert_eq!(out.mdat_payload, expected);
}

#[test]
fn test_constant_iv_track() {
    let iv = vec![7u8; 16];
    let init = InitSegmentBuilder::new()
        .encrypted(FIXTURE_KID)
        .constant_iv(iv.clone())
        .build();
    let segment = MediaSegmentBuilder::new(1)
        .samples(segment_samples(2))
        .encrypt_with_constant_iv(FIXTURE_KEY, iv)
        .build();

    let mut r = remuxer(UnfragmentOptions::default());
    r.initialize(&init).unwrap();
    r.add_encrypted_segment(&segment, &keys()).unwrap();
    r.finish().unwrap();

    let out = Output::parse(r.into_inner().into_inner());
    let expected: Vec<u8> = segment_samples(2).into_iter().flat_map(|s| s.data).collect();
    assert_eq!(out.mdat_payload, expected);
}

#[test]
fn test_sixteen_byte_ivs() {
    let init = InitSegmentBuilder::new()
        .video()
        .encrypted(FIXTURE_KID)
        .iv_size(16)
        .build();
    let segment = MediaSegmentBuilder::new(1)
        .samples(segment_samples(4))
        .encrypt(FIXTURE_KEY, 16)
        .clear_lead(3)
        .build();

    let mut r = remuxer(UnfragmentOptions::default());
    r.initialize(&init).unwrap();
    r.add_encrypted_segment(&segment, &keys()).unwrap();
    r.finish().unwrap();

    let out = Output::parse(r.into_inner().into_inner());
    let expected: Vec<u8> = segment_samples(4).into_iter().flat_map(|s| s.data).collect();
    assert_eq!(out.mdat_payload, expected);
    let stsd = out.moov.trak(None).unwrap().stsd().unwrap();
    assert_eq!(stsd.entries[0].format(), FourCc(*b"avc1"));
}

#[test]
fn test_non_cenc_scheme_is_unsupported() {
    let init = InitSegmentBuilder::new()
        .encrypted(FIXTURE_KID)
        .scheme(FourCc(*b"cbcs"))
        .build();
    let segment = MediaSegmentBuilder::new(1)
        .samples(segment_samples(0))
        .build();

    let mut r = remuxer(UnfragmentOptions::default());
    r.initialize(&init).unwrap();
    assert_matches!(
        r.add_encrypted_segment(&segment, &keys()),
        Err(Error::Unsupported(_))
    );
}

/// A run with sizes only takes durations and flags from `trex`.
#[test]
fn test_trex_defaults_fill_missing_fields() {
    let init = InitSegmentBuilder::new()
        .video()
        .trex_defaults(512, 0, 0x0001_0000)
        .build();

    let moof = MoofBox {
        children: vec![
            MoofChild::Mfhd(MfhdBox { sequence_number: 1 }),
            MoofChild::Traf(TrafBox {
                children: vec![
                    TrafChild::Tfhd(TfhdBox {
                        flags: TfhdBox::DEFAULT_BASE_IS_MOOF,
                        track_id: 1,
                        ..Default::default()
                    }),
                    TrafChild::Trun(TrunBox {
                        first_sample_flags: Some(0),
                        entries: vec![
                            TrunEntry {
                                size: Some(4),
                                ..Default::default()
                            };
                            3
                        ],
                        ..Default::default()
                    }),
                ],
            }),
        ],
    };
    let mut segment = BytesMut::new();
    moof.encode(&mut segment);
    write_box(&mut segment, FourCc::MDAT, &[1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);

    let mut r = remuxer(UnfragmentOptions::default());
    r.initialize(&init).unwrap();
    r.add_segment(&segment, &mut Passthrough).unwrap();
    let summary = r.finish().unwrap();
    assert_eq!(summary.sample_count, 3);
    assert_eq!(summary.duration, 3 * 512);

    let out = Output::parse(r.into_inner().into_inner());
    assert_eq!(out.stbl().stts().unwrap().durations(), vec![512, 512, 512]);
    assert_eq!(out.stbl().stss().unwrap().sample_numbers, vec![1]);
    assert_eq!(out.mdat_payload, [1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);
}

#[test]
fn test_empty_segment_adds_nothing() {
    let mut r = remuxer(UnfragmentOptions::default());
    r.initialize(&InitSegmentBuilder::new().build()).unwrap();
    r.add_segment(&[], &mut Passthrough).unwrap();
    let summary = r.finish().unwrap();
    assert_eq!(summary.sample_count, 0);
    assert_eq!(summary.chunk_count, 0);
    assert_eq!(summary.mdat_size, 16);
}

#[test]
fn test_truncated_mdat_fails() {
    let init = InitSegmentBuilder::new().build();
    let mut segment = MediaSegmentBuilder::new(1)
        .samples(segment_samples(0))
        .build();
    // shrink the mdat's declared size and drop the tail
    let len = segment.len();
    segment.truncate(len - 10);
    let mdat_start = iter_boxes(&segment)
        .take(2)
        .map(|b| b.unwrap().bytes.len())
        .sum::<usize>();
    let new_size = (segment.len() - mdat_start) as u32;
    segment[mdat_start..mdat_start + 4].copy_from_slice(&new_size.to_be_bytes());

    let mut r = remuxer(UnfragmentOptions::default());
    r.initialize(&init).unwrap();
    assert_matches!(
        r.add_segment(&segment, &mut Passthrough),
        Err(Error::Truncated { context: "mdat", .. })
    );
}

/// A sink that reports every position shifted by `base`, standing in for
/// output that already holds `base` bytes.
struct ShiftedSink {
    base: u64,
    inner: Cursor<Vec<u8>>,
}

impl Write for ShiftedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for ShiftedSink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let pos = match pos {
            SeekFrom::Start(p) => SeekFrom::Start(p.checked_sub(self.base).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "seek before base")
            })?),
            other => other,
        };
        Ok(self.inner.seek(pos)? + self.base)
    }
}

#[test]
fn test_offsets_past_4gib_use_co64() {
    let base = 5 << 30;
    let sink = ShiftedSink {
        base,
        inner: Cursor::new(Vec::new()),
    };
    let init = InitSegmentBuilder::new().build();
    let segments: Vec<_> = (0..2u8)
        .map(|n| {
            MediaSegmentBuilder::new(n as u32 + 1)
                .samples(segment_samples(n))
                .build()
        })
        .collect();

    let mut r = Unfragmenter::new(sink, UnfragmentOptions::default());
    r.initialize(&init).unwrap();
    for segment in &segments {
        r.add_segment(segment, &mut Passthrough).unwrap();
    }
    let summary = r.finish().unwrap();
    assert_eq!(summary.chunk_count, 2);

    let out = Output::parse(r.into_inner().inner.into_inner());
    assert!(out.stbl().stco().is_none());
    let offsets = out.stbl().co64().unwrap().offsets.clone();
    assert_eq!(offsets.len(), 2);
    assert!(offsets[0] > u32::MAX as u64);

    // chunk offsets point at the right bytes once the base is removed
    let table = SampleTable::from_stbl(out.stbl()).unwrap();
    let expected: Vec<_> = segment_samples(0)
        .into_iter()
        .chain(segment_samples(1))
        .collect();
    for (entry, sample) in table.iter().zip(&expected) {
        let start = (entry.offset - base) as usize;
        assert_eq!(&out.bytes[start..start + entry.size as usize], &sample.data[..]);
    }
}
