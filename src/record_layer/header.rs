use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::content::ContentType;
use crate::error::{Error, Result};

pub const RECORD_LAYER_HEADER_SIZE: usize = 13;
const CID_CONTENT_TYPE: u8 = 25;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

pub const DTLS1_2: ProtocolVersion = ProtocolVersion {
    major: 254,
    minor: 253,
};

/// One record's framing. `sequence_number` is the 48-bit value from
/// RFC 6347 §4.1; the top 16 bits are always zero and checked on
/// marshal. `connection_id` is present only once RFC 9146 negotiation
/// has completed for this direction — its presence is what selects the
/// `tls12_cid` content type on the wire, not a flag field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordLayerHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub epoch: u16,
    pub sequence_number: u64,
    pub connection_id: Option<Vec<u8>>,
    pub content_len: u16,
}

impl RecordLayerHeader {
    pub fn size(&self) -> usize {
        RECORD_LAYER_HEADER_SIZE + self.connection_id.as_ref().map_or(0, |c| c.len())
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        if self.sequence_number > 0xffff_ffff_ffff {
            return Err(Error::ErrSequenceNumberOverflow);
        }

        let type_byte = if self.connection_id.is_some() {
            CID_CONTENT_TYPE
        } else {
            self.content_type as u8
        };
        writer.write_u8(type_byte)?;
        writer.write_u8(self.version.major)?;
        writer.write_u8(self.version.minor)?;
        writer.write_u16::<BigEndian>(self.epoch)?;
        writer.write_u48::<BigEndian>(self.sequence_number)?;
        if let Some(cid) = &self.connection_id {
            writer.write_all(cid)?;
        }
        writer.write_u16::<BigEndian>(self.content_len)?;

        Ok(writer.flush()?)
    }

    /// `cid_len` is the length this connection has negotiated for
    /// incoming connection ids (0 if CIDs are not in use); RFC 9146
    /// does not put the CID's length on the wire, so the caller must
    /// already know it.
    pub fn unmarshal<R: Read>(reader: &mut R, cid_len: usize) -> Result<Self> {
        let type_byte = reader.read_u8()?;
        let major = reader.read_u8()?;
        let minor = reader.read_u8()?;
        let epoch = reader.read_u16::<BigEndian>()?;
        let sequence_number = reader.read_u48::<BigEndian>()?;

        let connection_id = if type_byte == CID_CONTENT_TYPE {
            let mut cid = vec![0u8; cid_len];
            reader.read_exact(&mut cid)?;
            Some(cid)
        } else {
            None
        };

        let content_len = reader.read_u16::<BigEndian>()?;

        let content_type = if type_byte == CID_CONTENT_TYPE {
            ContentType::ApplicationData
        } else {
            type_byte.into()
        };

        Ok(RecordLayerHeader {
            content_type,
            version: ProtocolVersion { major, minor },
            epoch,
            sequence_number,
            connection_id,
            content_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_without_cid() {
        let h = RecordLayerHeader {
            content_type: ContentType::Handshake,
            version: DTLS1_2,
            epoch: 1,
            sequence_number: 42,
            connection_id: None,
            content_len: 10,
        };
        let mut buf = vec![];
        h.marshal(&mut buf).unwrap();
        assert_eq!(buf.len(), RECORD_LAYER_HEADER_SIZE);
        let back = RecordLayerHeader::unmarshal(&mut buf.as_slice(), 0).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn roundtrip_with_cid() {
        let h = RecordLayerHeader {
            content_type: ContentType::ApplicationData,
            version: DTLS1_2,
            epoch: 3,
            sequence_number: 7,
            connection_id: Some(vec![0xaa, 0xbb, 0xcc, 0xdd]),
            content_len: 5,
        };
        let mut buf = vec![];
        h.marshal(&mut buf).unwrap();
        let back = RecordLayerHeader::unmarshal(&mut buf.as_slice(), 4).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn rejects_overflowed_sequence_number() {
        let h = RecordLayerHeader {
            content_type: ContentType::Alert,
            version: DTLS1_2,
            epoch: 0,
            sequence_number: 1 << 48,
            connection_id: None,
            content_len: 0,
        };
        let mut buf = vec![];
        assert!(h.marshal(&mut buf).is_err());
    }
}
