//! Opaque, byte-preserving box.

use crate::bmff::{write_box, BoxSlice, EncodeChild, FourCc};
use bytes::{BufMut, BytesMut};

/// A box kept verbatim, header included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBox {
    pub box_type: FourCc,
    header_len: usize,
    bytes: Vec<u8>,
}

impl RawBox {
    /// Build a box from a type and payload; the header is generated.
    pub fn new(box_type: FourCc, payload: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(payload.len() + 16);
        write_box(&mut buf, box_type, payload);
        let header_len = buf.len() - payload.len();
        Self {
            box_type,
            header_len,
            bytes: buf.to_vec(),
        }
    }

    /// Copy a located box.
    pub fn from_slice(slice: &BoxSlice<'_>) -> Self {
        Self {
            box_type: slice.header.box_type,
            header_len: slice.header.header_len,
            bytes: slice.bytes.to_vec(),
        }
    }

    /// The whole box, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[self.header_len..]
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.bytes);
    }
}

impl EncodeChild for RawBox {
    fn encode_child(&self, buf: &mut BytesMut) {
        self.encode(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bmff::iter_boxes;

    #[test]
    fn test_raw_box_preserves_bytes() {
        // size 0 header is kept as-is rather than rewritten
        let data = [0, 0, 0, 0, b'f', b'r', b'e', b'e', 1, 2];
        let slice = iter_boxes(&data).next().unwrap().unwrap();
        let raw = RawBox::from_slice(&slice);
        assert_eq!(raw.as_bytes(), &data);
        assert_eq!(raw.payload(), &[1, 2]);

        let mut buf = BytesMut::new();
        raw.encode(&mut buf);
        assert_eq!(&buf[..], &data);
    }

    #[test]
    fn test_raw_box_new() {
        let raw = RawBox::new(FourCc::FREE, &[0xAA]);
        assert_eq!(raw.as_bytes(), &[0, 0, 0, 9, b'f', b'r', b'e', b'e', 0xAA]);
        assert_eq!(raw.payload(), &[0xAA]);
    }
}
