//! Sample resolution for one track fragment.

use crate::boxes::{TrafBox, TrexBox};
use crate::sample_table::RemuxSample;
use crate::{Error, Result};
use std::ops::Range;

/// `sample_is_non_sync_sample` bit of the sample flags word.
pub(crate) const NON_SYNC_SAMPLE: u32 = 0x0001_0000;

/// A sample located in its fragment's `mdat` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocatedSample {
    pub range: Range<usize>,
    pub sample: RemuxSample,
}

/// Where the fragment's `mdat` payload starts relative to the `moof`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PayloadLayout {
    pub moof_size: u64,
    pub mdat_header_len: usize,
    pub payload_len: usize,
}

/// Resolve every sample of `traf` to its effective values and its byte
/// range inside the `mdat` payload.
///
/// Defaults apply lowest first: `trex`, `tfhd`, the run's first-sample
/// flags (sample 0 only), then the entry's own fields.
pub(crate) fn locate_samples(
    traf: &TrafBox,
    trex: Option<&TrexBox>,
    layout: PayloadLayout,
) -> Result<Vec<LocatedSample>> {
    let tfhd = traf.tfhd().ok_or(Error::MissingAtom("tfhd"))?;
    let payload_start = layout.moof_size + layout.mdat_header_len as u64;

    let default_duration = tfhd
        .default_sample_duration
        .or(trex.map(|t| t.default_sample_duration))
        .unwrap_or(0);
    let default_size = tfhd
        .default_sample_size
        .or(trex.map(|t| t.default_sample_size))
        .unwrap_or(0);
    let default_flags = tfhd
        .default_sample_flags
        .or(trex.map(|t| t.default_sample_flags))
        .unwrap_or(0);

    let mut located = Vec::with_capacity(traf.sample_count());
    let mut cursor = 0usize;

    for trun in traf.truns() {
        let mut pos = match (tfhd.base_data_offset, trun.data_offset) {
            (None, Some(offset)) => {
                let start = offset as i64 - payload_start as i64;
                usize::try_from(start).map_err(|_| {
                    Error::invalid_mp4(format!(
                        "trun data offset {offset} points before the mdat payload"
                    ))
                })?
            }
            _ => cursor,
        };

        for (i, entry) in trun.entries.iter().enumerate() {
            let mut flags = default_flags;
            if i == 0 {
                if let Some(first) = trun.first_sample_flags {
                    flags = first;
                }
            }
            if let Some(entry_flags) = entry.flags {
                flags = entry_flags;
            }

            let size = entry.size.unwrap_or(default_size);
            let end = pos
                .checked_add(size as usize)
                .filter(|&end| end <= layout.payload_len)
                .ok_or_else(|| {
                    Error::truncated("mdat", pos.saturating_add(size as usize), layout.payload_len)
                })?;

            located.push(LocatedSample {
                range: pos..end,
                sample: RemuxSample {
                    size,
                    duration: entry.duration.unwrap_or(default_duration),
                    is_sync: flags & NON_SYNC_SAMPLE == 0,
                    composition_offset: entry.composition_offset.unwrap_or(0),
                },
            });
            pos = end;
        }
        cursor = pos;
    }

    Ok(located)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{TfhdBox, TrafChild, TrunBox, TrunEntry};
    use assert_matches::assert_matches;

    fn traf(tfhd: TfhdBox, truns: Vec<TrunBox>) -> TrafBox {
        let mut children = vec![TrafChild::Tfhd(tfhd)];
        children.extend(truns.into_iter().map(TrafChild::Trun));
        TrafBox { children }
    }

    fn sized_run(sizes: &[u32]) -> TrunBox {
        TrunBox {
            flags: TrunBox::SAMPLE_SIZE,
            entries: sizes
                .iter()
                .map(|&s| TrunEntry {
                    size: Some(s),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn layout(payload_len: usize) -> PayloadLayout {
        PayloadLayout {
            moof_size: 100,
            mdat_header_len: 8,
            payload_len,
        }
    }

    #[test]
    fn test_default_resolution_order() {
        let trex = TrexBox {
            default_sample_duration: 1,
            default_sample_size: 4,
            default_sample_flags: NON_SYNC_SAMPLE,
            ..Default::default()
        };
        let tfhd = TfhdBox {
            track_id: 1,
            default_sample_duration: Some(1024),
            ..Default::default()
        };
        let mut trun = TrunBox {
            first_sample_flags: Some(0x0200_0000),
            entries: vec![TrunEntry::default(); 3],
            ..Default::default()
        };
        trun.entries[2].flags = Some(0);
        trun.entries[2].composition_offset = Some(-5);

        let samples = locate_samples(&traf(tfhd, vec![trun]), Some(&trex), layout(12)).unwrap();
        let resolved: Vec<_> = samples.iter().map(|s| s.sample).collect();
        // duration from tfhd, size from trex
        assert!(resolved.iter().all(|s| s.duration == 1024 && s.size == 4));
        // first-sample flags make sample 0 sync, trex makes sample 1
        // non-sync, the entry's own flags make sample 2 sync
        let sync: Vec<_> = resolved.iter().map(|s| s.is_sync).collect();
        assert_eq!(sync, vec![true, false, true]);
        assert_eq!(resolved[2].composition_offset, -5);
        assert_eq!(samples[2].range, 8..12);
    }

    #[test]
    fn test_runs_back_to_back_without_data_offset() {
        let t = traf(
            TfhdBox {
                track_id: 1,
                ..Default::default()
            },
            vec![sized_run(&[3, 2]), sized_run(&[5])],
        );
        let ranges: Vec<_> = locate_samples(&t, None, layout(10))
            .unwrap()
            .into_iter()
            .map(|s| s.range)
            .collect();
        assert_eq!(ranges, vec![0..3, 3..5, 5..10]);
    }

    #[test]
    fn test_data_offset_is_relative_to_moof() {
        let mut run = sized_run(&[4]);
        // 100-byte moof + 8-byte mdat header + 6 bytes of padding
        run.data_offset = Some(114);
        let t = traf(
            TfhdBox {
                track_id: 1,
                flags: TfhdBox::DEFAULT_BASE_IS_MOOF,
                ..Default::default()
            },
            vec![run],
        );
        let samples = locate_samples(&t, None, layout(10)).unwrap();
        assert_eq!(samples[0].range, 6..10);

        let mut before = sized_run(&[4]);
        before.data_offset = Some(50);
        let t = traf(TfhdBox::default(), vec![before]);
        assert_matches!(locate_samples(&t, None, layout(10)), Err(Error::InvalidMp4(_)));
    }

    #[test]
    fn test_sample_past_payload_is_truncated() {
        let t = traf(TfhdBox::default(), vec![sized_run(&[6, 6])]);
        assert_matches!(
            locate_samples(&t, None, layout(10)),
            Err(Error::Truncated { context: "mdat", need: 12, have: 10 })
        );
    }
}
