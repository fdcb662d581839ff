//! Box header codec and container iteration.

use super::FourCc;
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Parsed box header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    /// Box type code.
    pub box_type: FourCc,
    /// Box size including header, with the size-0 sentinel resolved to
    /// the end of the enclosing buffer.
    pub size: u64,
    /// Size of the header (8, 16, 24 or 32 bytes).
    pub header_len: usize,
    /// Extended type, present only for `uuid` boxes.
    pub user_type: Option<[u8; 16]>,
}

impl BoxHeader {
    /// Smallest possible header.
    pub const MIN_LEN: usize = 8;

    /// Decode the header at the front of `data`, where `data` runs to the
    /// end of the enclosing buffer.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_LEN {
            return Err(Error::truncated("box header", Self::MIN_LEN, data.len()));
        }

        let size32 = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let box_type = FourCc([data[4], data[5], data[6], data[7]]);
        let mut header_len = Self::MIN_LEN;

        let size = match size32 {
            1 => {
                // 64-bit largesize
                if data.len() < 16 {
                    return Err(Error::truncated("box largesize", 16, data.len()));
                }
                header_len = 16;
                u64::from_be_bytes([
                    data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
                ])
            }
            // Box extends to end of enclosing buffer
            0 => data.len() as u64,
            n => n as u64,
        };

        let user_type = if box_type == FourCc::UUID {
            let end = header_len + 16;
            if data.len() < end {
                return Err(Error::truncated("box user type", end, data.len()));
            }
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(&data[header_len..end]);
            header_len = end;
            Some(uuid)
        } else {
            None
        };

        if size < header_len as u64 || size > data.len() as u64 {
            return Err(Error::InvalidBoxSize {
                box_type,
                size,
                available: data.len(),
            });
        }

        Ok(Self {
            box_type,
            size,
            header_len,
            user_type,
        })
    }

    /// Payload length (size minus header).
    pub fn payload_len(&self) -> u64 {
        self.size - self.header_len as u64
    }

    /// Write a header for a box with `payload_len` payload bytes.
    ///
    /// Uses the compact 32-bit form unless the total exceeds `u32::MAX`.
    pub fn write(buf: &mut BytesMut, box_type: FourCc, payload_len: u64) {
        let compact = payload_len + 8;
        if compact > u32::MAX as u64 {
            buf.put_u32(1);
            buf.put_slice(&box_type.0);
            buf.put_u64(payload_len + 16);
        } else {
            buf.put_u32(compact as u32);
            buf.put_slice(&box_type.0);
        }
    }

    /// Write a largesize header regardless of payload length.
    pub fn write_large(buf: &mut BytesMut, box_type: FourCc, payload_len: u64) {
        buf.put_u32(1);
        buf.put_slice(&box_type.0);
        buf.put_u64(payload_len + 16);
    }
}

/// One box located inside a buffer.
#[derive(Debug, Clone, Copy)]
pub struct BoxSlice<'a> {
    pub header: BoxHeader,
    /// The whole box, header included.
    pub bytes: &'a [u8],
}

impl<'a> BoxSlice<'a> {
    /// Box contents after the header.
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[self.header.header_len..]
    }

    pub fn box_type(&self) -> FourCc {
        self.header.box_type
    }
}

/// Iterator over consecutive boxes in a byte range.
///
/// Stops exactly at the end of the range; after the first error it yields
/// nothing more.
pub struct BoxIter<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Iterate the boxes laid out back to back in `data`.
pub fn iter_boxes(data: &[u8]) -> BoxIter<'_> {
    BoxIter { data, pos: 0 }
}

impl<'a> Iterator for BoxIter<'a> {
    type Item = Result<BoxSlice<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let rest = &self.data[self.pos..];
        match BoxHeader::decode(rest) {
            Ok(header) => {
                let size = header.size as usize;
                self.pos += size;
                Some(Ok(BoxSlice {
                    header,
                    bytes: &rest[..size],
                }))
            }
            Err(e) => {
                self.pos = self.data.len();
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_decode_compact_header() {
        let data = [0, 0, 0, 12, b'f', b'r', b'e', b'e', 1, 2, 3, 4];
        let header = BoxHeader::decode(&data).unwrap();
        assert_eq!(header.box_type, FourCc::FREE);
        assert_eq!(header.size, 12);
        assert_eq!(header.header_len, 8);
        assert_eq!(header.payload_len(), 4);
        assert!(header.user_type.is_none());
    }

    #[test]
    fn test_decode_largesize_header() {
        let mut data = vec![0, 0, 0, 1, b'm', b'd', b'a', b't'];
        data.extend_from_slice(&20u64.to_be_bytes());
        data.extend_from_slice(&[9, 9, 9, 9]);
        let header = BoxHeader::decode(&data).unwrap();
        assert_eq!(header.box_type, FourCc::MDAT);
        assert_eq!(header.size, 20);
        assert_eq!(header.header_len, 16);
    }

    #[test]
    fn test_decode_size_zero_extends_to_end() {
        let data = [0, 0, 0, 0, b'm', b'd', b'a', b't', 1, 2, 3];
        let header = BoxHeader::decode(&data).unwrap();
        assert_eq!(header.size, 11);
    }

    #[test]
    fn test_decode_uuid_header() {
        let mut data = vec![0, 0, 0, 28, b'u', b'u', b'i', b'd'];
        data.extend_from_slice(&[7u8; 16]);
        data.extend_from_slice(&[0, 0, 0, 0]);
        let header = BoxHeader::decode(&data).unwrap();
        assert_eq!(header.header_len, 24);
        assert_eq!(header.user_type, Some([7u8; 16]));
    }

    #[test]
    fn test_decode_rejects_bad_sizes() {
        assert_matches!(
            BoxHeader::decode(&[0, 0, 0]),
            Err(Error::Truncated { need: 8, have: 3, .. })
        );
        // Declared size smaller than header
        assert_matches!(
            BoxHeader::decode(&[0, 0, 0, 4, b'f', b'r', b'e', b'e']),
            Err(Error::InvalidBoxSize { size: 4, .. })
        );
        // Declared size past end of buffer
        assert_matches!(
            BoxHeader::decode(&[0, 0, 0, 64, b'f', b'r', b'e', b'e']),
            Err(Error::InvalidBoxSize { size: 64, .. })
        );
    }

    #[test]
    fn test_iter_boxes_stops_at_error() {
        let mut data = vec![0, 0, 0, 8, b'f', b'r', b'e', b'e'];
        data.extend_from_slice(&[0, 0, 0, 99, b's', b'k', b'i', b'p']);
        let results: Vec<_> = iter_boxes(&data).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_matches!(results[1], Err(Error::InvalidBoxSize { .. }));
    }

    #[test]
    fn test_write_header_forms() {
        let mut buf = BytesMut::new();
        BoxHeader::write(&mut buf, FourCc::FREE, 4);
        assert_eq!(&buf[..], &[0, 0, 0, 12, b'f', b'r', b'e', b'e']);

        let mut buf = BytesMut::new();
        BoxHeader::write_large(&mut buf, FourCc::MDAT, 0);
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[0..4], &[0, 0, 0, 1]);
        assert_eq!(&buf[8..16], &16u64.to_be_bytes());
    }
}
