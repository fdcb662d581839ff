//! Output sink for the remux engine.

use std::io::{self, Seek, SeekFrom, Write};

/// Positioned byte sink: current position, sequential writes and
/// absolute seeks. Implemented for every `Write + Seek`, so files and
/// `Cursor<Vec<u8>>` both work.
pub trait OutputSink {
    fn position(&mut self) -> io::Result<u64>;
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()>;
    fn seek_to(&mut self, pos: u64) -> io::Result<()>;
}

impl<W: Write + Seek> OutputSink for W {
    fn position(&mut self) -> io::Result<u64> {
        self.stream_position()
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_all(buf)
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.seek(SeekFrom::Start(pos)).map(|_| ())
    }
}
