//! Fragmented to progressive MP4 remuxing.
//!
//! [`Unfragmenter`] takes an init segment and a sequence of
//! `moof`+`mdat` media segments and writes one non-fragmented file:
//!
//! ```text
//! [init boxes except moov/pssh] [mdat (64-bit size)] [moov]
//! ```
//!
//! The `mdat` header is written as a 16-byte largesize placeholder at
//! [`Unfragmenter::initialize`] and patched with the real size in
//! [`Unfragmenter::finish`], so samples stream straight to the sink and
//! never have to be held all at once.
//!
//! # Example
//!
//! ```ignore
//! let mut remuxer = Unfragmenter::new(File::create("out.mp4")?, UnfragmentOptions::default());
//! remuxer.initialize(&init)?;
//! for segment in &segments {
//!     remuxer.add_encrypted_segment(segment, &keys)?;
//! }
//! remuxer.finish()?;
//! ```

mod fragment;
mod sink;

pub use sink::OutputSink;

use crate::bmff::{iter_boxes, BmffBox, BoxHeader, BoxSlice, FourCc};
use crate::boxes::{MoofBox, MoovBox, StsdBox, TrexBox};
use crate::cenc::{CencDecryptor, KeyMap, Passthrough, SampleProcessor};
use crate::sample_table::{build_stbl, RemuxSample};
use crate::{Error, Result};
use bytes::BytesMut;
use fragment::{locate_samples, PayloadLayout};
use tracing::{debug, info, trace, warn};

/// Length of the placeholder `mdat` header.
const MDAT_HEADER_LEN: u64 = 16;

/// Remux options.
#[derive(Debug, Clone, Default)]
pub struct UnfragmentOptions {
    /// Track to remux. Defaults to the first `trak` of the init segment.
    pub track_id: Option<u32>,
}

/// Totals reported by [`Unfragmenter::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemuxSummary {
    pub track_id: u32,
    pub sample_count: usize,
    pub chunk_count: usize,
    /// Total duration in media timescale units.
    pub duration: u64,
    pub timescale: u32,
    /// Size of the `mdat` box, header included.
    pub mdat_size: u64,
    /// Size of the encoded `moov` box.
    pub moov_size: u64,
}

/// Accumulated state between `initialize` and `finish`.
#[derive(Debug)]
struct Session {
    moov: MoovBox,
    track_id: u32,
    timescale: u32,
    trex: Option<TrexBox>,
    /// Per-sample IV size from the track's `tenc`.
    iv_size: usize,
    mdat_start: u64,
    data_end: u64,
    samples: Vec<RemuxSample>,
    chunk_offsets: Vec<u64>,
    chunk_sample_counts: Vec<u32>,
}

impl Session {
    fn stsd(&self) -> Result<&StsdBox> {
        self.moov
            .trak(Some(self.track_id))
            .and_then(|t| t.stsd())
            .ok_or(Error::MissingStsd)
    }
}

#[derive(Debug)]
enum State {
    Uninitialized,
    Initialized(Box<Session>),
    Finished,
}

/// Single-use fragmented to progressive remuxer.
///
/// Segments must be added in presentation order. After any error the
/// output is incomplete and should be discarded.
#[derive(Debug)]
pub struct Unfragmenter<S: OutputSink> {
    sink: S,
    options: UnfragmentOptions,
    state: State,
}

impl<S: OutputSink> Unfragmenter<S> {
    pub fn new(sink: S, options: UnfragmentOptions) -> Self {
        Self {
            sink,
            options,
            state: State::Uninitialized,
        }
    }

    /// Parse the init segment, copy its leading boxes to the output and
    /// write the placeholder `mdat` header.
    pub fn initialize(&mut self, init_segment: &[u8]) -> Result<()> {
        match self.state {
            State::Uninitialized => {}
            State::Initialized(_) => return Err(Error::AlreadyInitialized),
            State::Finished => return Err(Error::Finished),
        }

        let mut moov = None;
        let mut passthrough = Vec::new();
        for slice in iter_boxes(init_segment) {
            let slice = slice?;
            match slice.box_type() {
                FourCc::MOOV => {
                    if moov.is_some() {
                        return Err(Error::invalid_mp4("init segment has more than one moov"));
                    }
                    moov = Some(MoovBox::decode_payload(slice.payload())?);
                }
                FourCc::PSSH => debug!("Dropping top-level pssh"),
                _ => passthrough.push(slice.bytes),
            }
        }

        let moov = moov.ok_or(Error::MissingMoov)?;
        let trak = moov.trak(self.options.track_id).ok_or(Error::MissingTrak)?;
        let track_id = trak.track_id();
        let timescale = trak.mdhd().ok_or(Error::MissingMdhd)?.timescale();
        let stsd = trak.stsd().ok_or(Error::MissingStsd)?;
        let iv_size = stsd
            .tenc()
            .map_or(8, |t| t.default_per_sample_iv_size as usize);
        let trex = moov.mvex().and_then(|m| m.trex(track_id)).cloned();

        info!(
            track_id,
            timescale,
            handler = ?trak.handler_type(),
            protected = stsd.is_protected(),
            tracks = moov.traks().count(),
            "Initializing remux"
        );

        for bytes in passthrough {
            self.sink.write_bytes(bytes)?;
        }
        let mdat_start = self.sink.position()?;
        let mut header = BytesMut::with_capacity(MDAT_HEADER_LEN as usize);
        BoxHeader::write_large(&mut header, FourCc::MDAT, 0);
        self.sink.write_bytes(&header)?;

        self.state = State::Initialized(Box::new(Session {
            moov,
            track_id,
            timescale,
            trex,
            iv_size,
            mdat_start,
            data_end: mdat_start + MDAT_HEADER_LEN,
            samples: Vec::new(),
            chunk_offsets: Vec::new(),
            chunk_sample_counts: Vec::new(),
        }));
        Ok(())
    }

    /// Add one media segment, running `processor` over every sample
    /// before it is written. The segment's samples form one chunk.
    pub fn add_segment<P: SampleProcessor>(
        &mut self,
        segment: &[u8],
        processor: &mut P,
    ) -> Result<()> {
        let session = match &mut self.state {
            State::Initialized(session) => session,
            State::Uninitialized => return Err(Error::NotInitialized),
            State::Finished => return Err(Error::Finished),
        };

        let boxes = iter_boxes(segment).collect::<Result<Vec<_>>>()?;

        let mut chunk = Vec::new();
        let mut chunk_samples = Vec::new();
        for (i, slice) in boxes.iter().enumerate() {
            if slice.box_type() != FourCc::MOOF {
                continue;
            }
            let Some(mdat) = boxes.get(i + 1).filter(|b| b.box_type() == FourCc::MDAT) else {
                warn!("moof without a following mdat, ignoring");
                continue;
            };
            process_fragment(session, slice, mdat, processor, &mut chunk, &mut chunk_samples)?;
        }

        if chunk_samples.is_empty() {
            debug!("Segment carried no samples for track {}", session.track_id);
            return Ok(());
        }

        let offset = session.data_end;
        self.sink.write_bytes(&chunk)?;
        session.data_end = offset + chunk.len() as u64;
        session.chunk_offsets.push(offset);
        session.chunk_sample_counts.push(chunk_samples.len() as u32);

        debug!(
            chunk = session.chunk_offsets.len(),
            samples = chunk_samples.len(),
            bytes = chunk.len(),
            offset,
            "Added segment"
        );
        session.samples.extend(chunk_samples);
        Ok(())
    }

    /// Add a segment, decrypting its samples with `keys` when the track is
    /// protected.
    ///
    /// Fails with [`Error::MissingKey`] before anything is written when
    /// `keys` lacks the track's default KID.
    pub fn add_encrypted_segment(&mut self, segment: &[u8], keys: &KeyMap) -> Result<()> {
        let decryptor = match &self.state {
            State::Initialized(session) => CencDecryptor::for_track(session.stsd()?, keys)?,
            State::Uninitialized => return Err(Error::NotInitialized),
            State::Finished => return Err(Error::Finished),
        };
        match decryptor {
            Some(mut decryptor) => self.add_segment(segment, &mut decryptor),
            None => self.add_segment(segment, &mut Passthrough),
        }
    }

    /// Rewrite the `moov` for the progressive layout, append it and patch
    /// the `mdat` size.
    pub fn finish(&mut self) -> Result<RemuxSummary> {
        let session = match std::mem::replace(&mut self.state, State::Finished) {
            State::Initialized(session) => session,
            State::Uninitialized => {
                self.state = State::Uninitialized;
                return Err(Error::NotInitialized);
            }
            State::Finished => return Err(Error::Finished),
        };
        let Session {
            mut moov,
            track_id,
            samples,
            chunk_offsets,
            chunk_sample_counts,
            mdat_start,
            data_end,
            ..
        } = *session;

        let duration: u64 = samples.iter().map(|s| s.duration as u64).sum();

        moov.retain_track(track_id);
        moov.remove_mvex();
        let pssh_removed = moov.remove_pssh();

        let trak = moov.trak_mut(Some(track_id)).ok_or(Error::MissingTrak)?;
        let edits_removed = trak.remove_edit_lists();
        if let Some(tkhd) = trak.tkhd_mut() {
            tkhd.set_duration(duration);
        }

        let mdia = trak.mdia_mut().ok_or(Error::MissingMdhd)?;
        let mdhd = mdia.mdhd_mut().ok_or(Error::MissingMdhd)?;
        mdhd.set_duration(duration);
        let timescale = mdhd.timescale();

        let stbl = mdia
            .minf_mut()
            .and_then(|m| m.stbl_mut())
            .ok_or(Error::MissingStsd)?;
        let mut stsd = stbl.stsd().cloned().ok_or(Error::MissingStsd)?;
        let unprotected = stsd.unprotect()?;
        *stbl = build_stbl(stsd, &samples, &chunk_sample_counts, &chunk_offsets);

        if let Some(mvhd) = moov.mvhd_mut() {
            mvhd.set_timescale(timescale);
            mvhd.set_duration(duration);
        }

        debug!(pssh_removed, edits_removed, unprotected, "Rewrote moov");

        let moov_bytes = moov.to_bytes();
        let mdat_size = data_end - mdat_start;

        self.sink.seek_to(data_end)?;
        self.sink.write_bytes(&moov_bytes)?;
        let end = self.sink.position()?;
        self.sink.seek_to(mdat_start + 8)?;
        self.sink.write_bytes(&mdat_size.to_be_bytes())?;
        self.sink.seek_to(end)?;

        let summary = RemuxSummary {
            track_id,
            sample_count: samples.len(),
            chunk_count: chunk_offsets.len(),
            duration,
            timescale,
            mdat_size,
            moov_size: moov_bytes.len() as u64,
        };
        info!(
            samples = summary.sample_count,
            chunks = summary.chunk_count,
            duration,
            timescale,
            mdat_size,
            "Remux finished"
        );
        Ok(summary)
    }

    /// Samples accumulated so far.
    pub fn sample_count(&self) -> usize {
        match &self.state {
            State::Initialized(session) => session.samples.len(),
            _ => 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Finished)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}

/// Resolve, process and buffer the samples of one `moof`+`mdat` pair.
fn process_fragment<P: SampleProcessor>(
    session: &Session,
    moof_slice: &BoxSlice<'_>,
    mdat: &BoxSlice<'_>,
    processor: &mut P,
    chunk: &mut Vec<u8>,
    chunk_samples: &mut Vec<RemuxSample>,
) -> Result<()> {
    let moof = MoofBox::decode_payload(moof_slice.payload())?;
    let payload = mdat.payload();
    let layout = PayloadLayout {
        moof_size: moof_slice.header.size,
        mdat_header_len: mdat.header.header_len,
        payload_len: payload.len(),
    };

    for traf in moof.trafs() {
        if traf.track_id() != session.track_id {
            warn!(
                track_id = traf.track_id(),
                "Skipping traf for a track that is not being remuxed"
            );
            continue;
        }

        let located = locate_samples(traf, session.trex.as_ref(), layout)?;
        let encryption = match traf.senc() {
            Some(senc) => {
                let entries = senc.samples(session.iv_size)?;
                if entries.len() != located.len() {
                    return Err(Error::invalid_mp4(format!(
                        "senc has {} entries for {} samples",
                        entries.len(),
                        located.len()
                    )));
                }
                entries
            }
            None => Vec::new(),
        };

        debug!(
            sequence = moof.sequence_number(),
            samples = located.len(),
            encrypted = !encryption.is_empty(),
            "Fragment"
        );

        for (i, located) in located.into_iter().enumerate() {
            let start = chunk.len();
            chunk.extend_from_slice(&payload[located.range.clone()]);
            processor.process(&mut chunk[start..], encryption.get(i))?;
            trace!(
                index = i,
                size = located.sample.size,
                duration = located.sample.duration,
                sync = located.sample.is_sync,
                "Sample"
            );
            chunk_samples.push(located.sample);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{InitSegmentBuilder, MediaSegmentBuilder, FixtureSample};
    use assert_matches::assert_matches;
    use std::io::Cursor;

    fn remuxer() -> Unfragmenter<Cursor<Vec<u8>>> {
        Unfragmenter::new(Cursor::new(Vec::new()), UnfragmentOptions::default())
    }

    #[test]
    fn test_state_machine_misuse() {
        let mut r = remuxer();
        assert_matches!(r.finish(), Err(Error::NotInitialized));
        assert_matches!(r.add_segment(&[], &mut Passthrough), Err(Error::NotInitialized));

        let init = InitSegmentBuilder::new().build();
        r.initialize(&init).unwrap();
        assert_matches!(r.initialize(&init), Err(Error::AlreadyInitialized));
        r.finish().unwrap();
        assert!(r.is_finished());
        assert_matches!(r.finish(), Err(Error::Finished));
        assert_matches!(r.add_segment(&[], &mut Passthrough), Err(Error::Finished));
    }

    #[test]
    fn test_initialize_requires_moov_and_trak() {
        let mut r = remuxer();
        assert_matches!(r.initialize(&[]), Err(Error::MissingMoov));

        let mut r = Unfragmenter::new(
            Cursor::new(Vec::new()),
            UnfragmentOptions { track_id: Some(9) },
        );
        let init = InitSegmentBuilder::new().build();
        assert_matches!(r.initialize(&init), Err(Error::MissingTrak));
        // nothing written on failure
        assert!(r.into_inner().into_inner().is_empty());
    }

    #[test]
    fn test_placeholder_then_patch() {
        let init = InitSegmentBuilder::new().build();
        let segment = MediaSegmentBuilder::new(1)
            .samples((0..4).map(|i| FixtureSample::new(vec![i; 10], 1024)))
            .build();

        let mut r = remuxer();
        r.initialize(&init).unwrap();
        let mdat_start = r.sink().get_ref().len() as u64 - MDAT_HEADER_LEN;
        assert_eq!(&r.sink().get_ref()[mdat_start as usize + 4..mdat_start as usize + 8], b"mdat");

        r.add_segment(&segment, &mut Passthrough).unwrap();
        assert_eq!(r.sample_count(), 4);
        let summary = r.finish().unwrap();
        assert_eq!(summary.mdat_size, MDAT_HEADER_LEN + 40);
        assert_eq!(summary.duration, 4096);

        let out = r.into_inner().into_inner();
        let header = BoxHeader::decode(&out[mdat_start as usize..]).unwrap();
        assert_eq!(header.size, MDAT_HEADER_LEN + 40);
        assert_eq!(header.header_len, 16);
        // moov directly after mdat
        let next = mdat_start as usize + header.size as usize;
        assert_eq!(&out[next + 4..next + 8], b"moov");
        assert_eq!(out.len() as u64, next as u64 + summary.moov_size);
    }

    #[test]
    fn test_moof_without_mdat_is_ignored() {
        let init = InitSegmentBuilder::new().build();
        let segment = MediaSegmentBuilder::new(1)
            .samples((0..2).map(|_| FixtureSample::new(vec![1; 5], 10)))
            .build();
        // cut the trailing mdat
        let header = BoxHeader::decode(&segment).unwrap();
        let orphan = &segment[..header.size as usize];

        let mut r = remuxer();
        r.initialize(&init).unwrap();
        r.add_segment(orphan, &mut Passthrough).unwrap();
        assert_eq!(r.sample_count(), 0);
        r.add_segment(&segment, &mut Passthrough).unwrap();
        assert_eq!(r.sample_count(), 2);
    }

    #[test]
    fn test_processor_sees_every_sample() {
        let init = InitSegmentBuilder::new().build();
        let segment = MediaSegmentBuilder::new(1)
            .samples((0..3).map(|i| FixtureSample::new(vec![i; 4], 10)))
            .build();

        let mut seen = Vec::new();
        let mut r = remuxer();
        r.initialize(&init).unwrap();
        r.add_segment(&segment, &mut |sample: &mut [u8], info: Option<&crate::boxes::SencSample>| -> Result<()> {
            assert!(info.is_none());
            seen.push(sample[0]);
            sample.fill(0xFF);
            Ok(())
        })
        .unwrap();
        r.finish().unwrap();
        assert_eq!(seen, vec![0, 1, 2]);

        let out = r.into_inner().into_inner();
        assert!(out.windows(12).any(|w| w == [0xFF; 12]));
    }

    #[test]
    fn test_processor_error_stops_segment() {
        let init = InitSegmentBuilder::new().build();
        let segment = MediaSegmentBuilder::new(1)
            .samples((0..3).map(|i| FixtureSample::new(vec![i; 4], 10)))
            .build();

        let mut r = remuxer();
        r.initialize(&init).unwrap();
        let written = r.sink().get_ref().len();
        let result = r.add_segment(&segment, &mut |_: &mut [u8], _: Option<&crate::boxes::SencSample>| -> Result<()> {
            Err(Error::invalid_mp4("boom"))
        });
        assert_matches!(result, Err(Error::InvalidMp4(_)));
        assert_eq!(r.sink().get_ref().len(), written);
        assert_eq!(r.sample_count(), 0);
    }
}
