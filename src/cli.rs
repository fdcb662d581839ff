use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fragmux")]
#[command(author, version, about = "Fragmented MP4 to progressive MP4 remuxer")]
pub struct Cli {
    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Remux an init segment and media segments into one progressive MP4
    Unfragment {
        /// Initialization segment (ftyp + moov)
        #[arg(long, required = true)]
        init: PathBuf,

        /// Media segments (moof + mdat), in presentation order
        #[arg(long = "segment", required = true)]
        segments: Vec<PathBuf>,

        /// Output file
        #[arg(short, long, required = true)]
        output: PathBuf,

        /// Content key as KID:KEY in hex (repeatable)
        #[arg(long = "key")]
        keys: Vec<String>,

        /// Track to remux when the init segment carries several
        #[arg(long)]
        track_id: Option<u32>,
    },

    /// List the boxes and tracks of an MP4 file
    Inspect {
        /// File to inspect
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the byte ranges indexed by a segment index (sidx)
    Ranges {
        /// File containing a sidx
        #[arg(required = true)]
        file: PathBuf,

        /// Absolute offset of the first indexed byte (default: just after the sidx)
        #[arg(long)]
        offset: Option<u64>,
    },

    /// Display version information
    Version,
}
