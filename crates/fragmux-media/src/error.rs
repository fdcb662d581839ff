//! Error types for fragmux-media.

use crate::bmff::FourCc;
use std::io;
use thiserror::Error;

/// Result type for fragmux-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for fragmux-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the output sink.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Fewer bytes available than a field or declared size requires.
    #[error("Truncated {context}: need {need} bytes, have {have}")]
    Truncated {
        context: &'static str,
        need: usize,
        have: usize,
    },

    /// Declared box size is below the header minimum or past the buffer end.
    #[error("Invalid size {size} for box '{box_type}' ({available} bytes available)")]
    InvalidBoxSize {
        box_type: FourCc,
        size: u64,
        available: usize,
    },

    /// A structural position required a specific box type.
    #[error("Unexpected box '{found}', expected '{expected}'")]
    UnexpectedBoxType { expected: FourCc, found: FourCc },

    /// Box contents are internally inconsistent.
    #[error("Invalid MP4: {0}")]
    InvalidMp4(String),

    /// A required child box is absent.
    #[error("Missing required atom: {0}")]
    MissingAtom(&'static str),

    /// No key supplied for the track's key ID.
    #[error("No key for KID {}", hex::encode(.0))]
    MissingKey([u8; 16]),

    /// IV is neither 8 nor 16 bytes.
    #[error("Malformed IV: {0} bytes (expected 8 or 16)")]
    MalformedIv(usize),

    /// Key material could not be parsed.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Unsupported feature, e.g. a non-CTR protection scheme.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Init segment has no moov box.
    #[error("Init segment has no moov box")]
    MissingMoov,

    /// moov has no (selected) trak box.
    #[error("moov has no usable trak box")]
    MissingTrak,

    /// Track has no mdhd box.
    #[error("Track has no mdhd box")]
    MissingMdhd,

    /// Track has no stsd box.
    #[error("Track has no stsd box")]
    MissingStsd,

    /// `initialize` called twice.
    #[error("Remuxer already initialized")]
    AlreadyInitialized,

    /// Operation requires a prior `initialize`.
    #[error("Remuxer not initialized")]
    NotInitialized,

    /// Operation after `finish`.
    #[error("Remuxer already finished")]
    Finished,
}

impl Error {
    /// Create an invalid MP4 error.
    pub fn invalid_mp4(msg: impl Into<String>) -> Self {
        Self::InvalidMp4(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub(crate) fn truncated(context: &'static str, need: usize, have: usize) -> Self {
        Self::Truncated {
            context,
            need,
            have,
        }
    }
}
