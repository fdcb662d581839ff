//! File summaries for the `inspect` and `ranges` commands.

use fragmux_media::bmff::{iter_boxes, BmffBox, FourCc};
use fragmux_media::boxes::{HandlerType, MoovBox, PsshBox, SidxBox, TrakBox};
use fragmux_media::{Error, Result, SampleTable};
use serde::Serialize;
use std::fmt;

/// Everything `inspect` reports about one file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileReport {
    pub boxes: Vec<BoxReport>,
    pub tracks: Vec<TrackReport>,
    pub pssh: Vec<PsshReport>,
}

/// A top-level box.
#[derive(Debug, Clone, Serialize)]
pub struct BoxReport {
    pub box_type: String,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackReport {
    pub track_id: u32,
    pub handler: String,
    pub timescale: Option<u32>,
    pub duration: Option<u64>,
    /// Format of the first sample entry (`enca`/`encv` when protected).
    pub sample_entry: Option<String>,
    pub protected: bool,
    pub scheme: Option<String>,
    pub default_kid: Option<String>,
    /// Only for progressive files; fragmented init segments have empty
    /// sample tables.
    pub sample_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PsshReport {
    pub system_id: String,
    pub key_ids: Vec<String>,
    pub data_len: usize,
}

/// Walk the top-level boxes of `data`, decoding any `moov` and `pssh`.
pub fn inspect(data: &[u8]) -> Result<FileReport> {
    let mut report = FileReport::default();
    let mut offset = 0u64;

    for slice in iter_boxes(data) {
        let slice = slice?;
        let box_type = slice.box_type();
        report.boxes.push(BoxReport {
            box_type: box_type.to_string(),
            offset,
            size: slice.bytes.len() as u64,
        });
        offset += slice.bytes.len() as u64;

        match box_type {
            FourCc::MOOV => {
                let moov = MoovBox::decode_payload(slice.payload())?;
                for trak in moov.traks() {
                    report.tracks.push(track_report(trak)?);
                }
                report.pssh.extend(moov.pssh_boxes().map(pssh_report));
            }
            FourCc::PSSH => {
                let pssh = PsshBox::decode_payload(slice.payload())?;
                report.pssh.push(pssh_report(&pssh));
            }
            _ => {}
        }
    }

    Ok(report)
}

/// Inclusive byte ranges of the subsegments indexed by the first `sidx`.
///
/// Ranges are anchored at `anchor` when given, otherwise at the first
/// byte after the `sidx`.
pub fn sidx_ranges(data: &[u8], anchor: Option<u64>) -> Result<Vec<(u64, u64)>> {
    let mut offset = 0u64;
    for slice in iter_boxes(data) {
        let slice = slice?;
        offset += slice.bytes.len() as u64;
        if slice.box_type() == FourCc::SIDX {
            let sidx = SidxBox::decode_payload(slice.payload())?;
            return sidx.byte_ranges(anchor.unwrap_or(offset));
        }
    }
    Err(Error::MissingAtom("sidx"))
}

fn handler_name(handler: Option<HandlerType>) -> String {
    match handler {
        Some(HandlerType::Video) => "video".into(),
        Some(HandlerType::Audio) => "audio".into(),
        Some(HandlerType::Hint) => "hint".into(),
        Some(HandlerType::Meta) => "meta".into(),
        Some(HandlerType::Text) => "text".into(),
        Some(HandlerType::Subtitle) => "subtitle".into(),
        Some(HandlerType::Unknown(code)) => code.to_string(),
        None => "none".into(),
    }
}

fn track_report(trak: &TrakBox) -> Result<TrackReport> {
    let mdhd = trak.mdhd();
    let stsd = trak.stsd();
    let sample_count = match trak.stbl() {
        Some(stbl) if stbl.stsz().is_some_and(|stsz| stsz.sample_count > 0) => {
            Some(SampleTable::from_stbl(stbl)?.len())
        }
        _ => None,
    };

    Ok(TrackReport {
        track_id: trak.track_id(),
        handler: handler_name(trak.handler_type()),
        timescale: mdhd.map(|m| m.timescale()),
        duration: mdhd.map(|m| m.duration()),
        sample_entry: stsd
            .and_then(|s| s.entries.first())
            .map(|e| e.format().to_string()),
        protected: stsd.is_some_and(|s| s.is_protected()),
        scheme: stsd
            .and_then(|s| s.sinf())
            .and_then(|sinf| sinf.schm())
            .map(|schm| schm.scheme_type.to_string()),
        default_kid: stsd.and_then(|s| s.tenc()).map(|t| t.default_kid_hex()),
        sample_count,
    })
}

fn pssh_report(pssh: &PsshBox) -> PsshReport {
    PsshReport {
        system_id: pssh.system_id_hex(),
        key_ids: pssh.key_ids.iter().map(hex::encode).collect(),
        data_len: pssh.data.len(),
    }
}

impl fmt::Display for FileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Boxes:")?;
        for b in &self.boxes {
            writeln!(f, "  {} @ {} ({} bytes)", b.box_type, b.offset, b.size)?;
        }

        for t in &self.tracks {
            writeln!(f, "Track {} ({})", t.track_id, t.handler)?;
            if let (Some(timescale), Some(duration)) = (t.timescale, t.duration) {
                writeln!(f, "  Timescale: {timescale}, duration: {duration}")?;
            }
            if let Some(entry) = &t.sample_entry {
                writeln!(f, "  Sample entry: {entry}")?;
            }
            if t.protected {
                writeln!(
                    f,
                    "  Protected: scheme {}, KID {}",
                    t.scheme.as_deref().unwrap_or("?"),
                    t.default_kid.as_deref().unwrap_or("?"),
                )?;
            }
            if let Some(count) = t.sample_count {
                writeln!(f, "  Samples: {count}")?;
            }
        }

        for p in &self.pssh {
            writeln!(f, "PSSH {} ({} bytes of data)", p.system_id, p.data_len)?;
            for kid in &p.key_ids {
                writeln!(f, "  KID {kid}")?;
            }
        }
        Ok(())
    }
}
