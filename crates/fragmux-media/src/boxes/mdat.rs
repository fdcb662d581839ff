//! Media data.

use crate::bmff::{BmffBox, FourCc};
use crate::Result;
use bytes::{BufMut, BytesMut};

/// Media data. Sample boundaries come from the fragment tables, not from
/// the payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MdatBox {
    pub data: Vec<u8>,
}

impl BmffBox for MdatBox {
    const TYPE: FourCc = FourCc::MDAT;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            data: payload.to_vec(),
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.data);
    }
}
