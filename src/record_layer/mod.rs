pub mod header;

use std::io::{Read, Write};

use header::{ProtocolVersion, RecordLayerHeader, RECORD_LAYER_HEADER_SIZE};

use crate::alert::Alert;
use crate::application_data::ApplicationData;
use crate::change_cipher_spec::ChangeCipherSpec;
use crate::content::{Content, ContentType};
use crate::error::{Error, Result};
use crate::handshake::Handshake;

/// One framed unit of the record protocol: a header plus its decrypted
/// content. Multiple records, and multiple handshake fragments within
/// one record's content, may share a single UDP datagram (RFC 6347
/// §4.2.3); `unpack_datagram` splits them apart before each is handed
/// to `unmarshal`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLayer {
    pub header: RecordLayerHeader,
    pub content: Content,
}

impl RecordLayer {
    pub fn new(version: ProtocolVersion, epoch: u16, sequence_number: u64, content: Content) -> Self {
        RecordLayer {
            header: RecordLayerHeader {
                content_type: content.content_type(),
                version,
                epoch,
                sequence_number,
                connection_id: None,
                content_len: content.size() as u16,
            },
            content,
        }
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.header.marshal(writer)?;
        self.content.marshal(writer)?;
        Ok(())
    }

    pub fn unmarshal<R: Read>(reader: &mut R, cid_len: usize) -> Result<Self> {
        let header = RecordLayerHeader::unmarshal(reader, cid_len)?;
        if header.content_type == ContentType::ApplicationData && header.epoch == 0 {
            return Err(Error::ErrApplicationDataEpochZero);
        }
        let content = match header.content_type {
            ContentType::Alert => Content::Alert(Alert::unmarshal(reader)?),
            ContentType::ApplicationData => {
                Content::ApplicationData(ApplicationData::unmarshal(reader)?)
            }
            ContentType::ChangeCipherSpec => {
                Content::ChangeCipherSpec(ChangeCipherSpec::unmarshal(reader)?)
            }
            ContentType::Handshake => Content::Handshake(Handshake::unmarshal(reader)?),
            ContentType::Invalid => return Err(Error::DecodeError),
        };

        Ok(RecordLayer { header, content })
    }
}

/// Splits one UDP datagram into the individual records it carries, per
/// RFC 6347 §4.2.3. `cid_len` must match the connection this datagram
/// was received on.
pub fn unpack_datagram(buf: &[u8], cid_len: usize) -> Result<Vec<Vec<u8>>> {
    let mut out = vec![];
    let mut offset = 0;

    while offset != buf.len() {
        let fixed = RECORD_LAYER_HEADER_SIZE + cid_len;
        if buf.len() - offset < fixed {
            return Err(Error::ErrInvalidPacketLength);
        }

        let len_offset = offset + fixed - 2;
        let content_len = ((buf[len_offset] as usize) << 8) | buf[len_offset + 1] as usize;
        let pkt_len = fixed + content_len;
        if offset + pkt_len > buf.len() {
            return Err(Error::ErrInvalidPacketLength);
        }

        out.push(buf[offset..offset + pkt_len].to_vec());
        offset += pkt_len;
    }

    Ok(out)
}

/// Builds the Alert record sent on a fatal failure or an explicit
/// close_notify. Alerts are sent best-effort, outside the flight
/// retransmission machinery (spec's error propagation policy).
pub fn alert_record(version: ProtocolVersion, epoch: u16, sequence_number: u64, alert: Alert) -> RecordLayer {
    RecordLayer::new(version, epoch, sequence_number, Content::Alert(alert))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertDescription, AlertLevel};
    use crate::record_layer::header::DTLS1_2;

    #[test]
    fn unpacks_two_records_from_one_datagram() {
        let a = RecordLayer::new(
            DTLS1_2,
            1,
            0,
            Content::Alert(Alert {
                level: AlertLevel::Warning,
                description: AlertDescription::CloseNotify,
            }),
        );
        let b = RecordLayer::new(
            DTLS1_2,
            1,
            1,
            Content::Alert(Alert {
                level: AlertLevel::Fatal,
                description: AlertDescription::HandshakeFailure,
            }),
        );

        let mut buf = vec![];
        a.marshal(&mut buf).unwrap();
        b.marshal(&mut buf).unwrap();

        let packets = unpack_datagram(&buf, 0).unwrap();
        assert_eq!(packets.len(), 2);
        let ra = RecordLayer::unmarshal(&mut packets[0].as_slice(), 0).unwrap();
        let rb = RecordLayer::unmarshal(&mut packets[1].as_slice(), 0).unwrap();
        assert_eq!(ra, a);
        assert_eq!(rb, b);
    }

    #[test]
    fn rejects_application_data_at_epoch_zero() {
        let r = RecordLayer::new(
            DTLS1_2,
            0,
            0,
            Content::ApplicationData(ApplicationData { data: vec![1, 2, 3] }),
        );
        let mut buf = vec![];
        r.marshal(&mut buf).unwrap();
        assert!(RecordLayer::unmarshal(&mut buf.as_slice(), 0).is_err());
    }
}
