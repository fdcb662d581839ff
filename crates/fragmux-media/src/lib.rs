//! Fragmux-Media: ISO BMFF box model, CENC decryption, and fragmented to
//! progressive MP4 remuxing
//!
//! This crate turns DASH/HLS/CMAF style fragmented media (an init segment
//! plus `moof`+`mdat` media segments) into one seekable, non-fragmented,
//! decrypted MP4.
//!
//! # Modules
//!
//! - `bmff` - Box header codec, bounds-checked field reader, container iteration
//! - `boxes` - Typed boxes: moov/trak/stbl/stsd, sinf/tenc, moof/traf/tfhd/trun/senc, sidx, pssh
//! - `cenc` - AES-128 CTR sample decryption and key maps
//! - `sample_table` - stts/ctts/stsz/stsc/stco/stss builders and a per-sample reader
//! - `remux` - The `Unfragmenter` engine
//!
//! # Architecture
//!
//! The remuxer writes its output in one forward pass:
//!
//! 1. `initialize` copies the init segment's leading boxes and writes a
//!    16-byte `mdat` header with a placeholder 64-bit size
//! 2. Each `add_segment` resolves sample sizes and timing from `tfhd`/`trun`,
//!    decrypts samples in place, and appends them as one chunk
//! 3. `finish` rebuilds the track's sample table, strips `mvex`, `edts`,
//!    `pssh` and `sinf`, appends the `moov`, and back-patches the `mdat` size

pub mod bmff;
pub mod boxes;
pub mod cenc;
pub mod error;
#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;
pub mod remux;
pub mod sample_table;

pub use bmff::{BmffBox, FourCc};
pub use boxes::{parse, Mp4Box};
pub use cenc::{decrypt_sample, CencDecryptor, KeyMap, Passthrough, SampleProcessor};
pub use error::{Error, Result};
pub use remux::{OutputSink, RemuxSummary, UnfragmentOptions, Unfragmenter};
pub use sample_table::SampleTable;
