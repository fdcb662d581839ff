//! Protection system specific header.

use crate::bmff::{write_full_box_header, BmffBox, ByteReader, FourCc};
use crate::Result;
use bytes::{BufMut, BytesMut};

/// DRM system header. One per protection system; carries opaque
/// license-acquisition data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsshBox {
    pub version: u8,
    pub flags: u32,
    pub system_id: [u8; 16],
    /// Version 1 only.
    pub key_ids: Vec<[u8; 16]>,
    pub data: Vec<u8>,
}

impl PsshBox {
    /// Widevine system ID.
    pub const WIDEVINE: [u8; 16] = [
        0xed, 0xef, 0x8b, 0xa9, 0x79, 0xd6, 0x4a, 0xce, 0xa3, 0xc8, 0x27, 0xdc, 0xd5, 0x1d, 0x21,
        0xed,
    ];

    pub fn system_id_hex(&self) -> String {
        hex::encode(self.system_id)
    }
}

impl BmffBox for PsshBox {
    const TYPE: FourCc = FourCc::PSSH;

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "pssh");
        let (version, flags) = r.read_full_box_header()?;
        let system_id = r.read_array()?;

        let mut key_ids = Vec::new();
        if version > 0 {
            let count = r.read_u32()? as usize;
            r.ensure_records(count, 16)?;
            key_ids.reserve(count);
            for _ in 0..count {
                key_ids.push(r.read_array()?);
            }
        }

        let data_len = r.read_u32()? as usize;
        let data = r.read_bytes(data_len)?.to_vec();

        Ok(Self {
            version,
            flags,
            system_id,
            key_ids,
            data,
        })
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        write_full_box_header(buf, self.version, self.flags);
        buf.put_slice(&self.system_id);
        if self.version > 0 {
            buf.put_u32(self.key_ids.len() as u32);
            for kid in &self.key_ids {
                buf.put_slice(kid);
            }
        }
        buf.put_u32(self.data.len() as u32);
        buf.put_slice(&self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use assert_matches::assert_matches;

    #[test]
    fn test_pssh_v1_roundtrip() {
        let pssh = PsshBox {
            version: 1,
            flags: 0,
            system_id: PsshBox::WIDEVINE,
            key_ids: vec![[1; 16], [2; 16]],
            data: vec![0x08, 0x01, 0x12],
        };
        let bytes = pssh.to_bytes();
        assert_eq!(bytes.len(), 8 + 4 + 16 + 4 + 32 + 4 + 3);
        let decoded = PsshBox::decode(&bytes).unwrap();
        assert_eq!(decoded, pssh);
        assert_eq!(decoded.system_id_hex(), "edef8ba979d64acea3c827dcd51d21ed");
    }

    #[test]
    fn test_pssh_huge_kid_count_is_truncated() {
        let mut buf = BytesMut::new();
        write_full_box_header(&mut buf, 1, 0);
        buf.put_slice(&[0; 16]);
        buf.put_u32(u32::MAX);
        assert_matches!(PsshBox::decode_payload(&buf), Err(Error::Truncated { .. }));
    }
}
