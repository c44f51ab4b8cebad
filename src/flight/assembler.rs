use crate::change_cipher_spec::ChangeCipherSpec;
use crate::content::Content;
use crate::error::Result;
use crate::handshake::Handshake;
use crate::record_layer::header::ProtocolVersion;
use crate::record_layer::RecordLayer;

/// One outbound unit: a marshalled record plus the epoch/key state it
/// should be sent under. `should_encrypt` is false only for the three
/// plaintext message types a pre-CCS flight may still contain.
#[derive(Clone, Debug)]
pub struct Packet {
    pub record: RecordLayer,
    pub should_encrypt: bool,
}

/// Greedily fragments a flight's handshake messages into records no
/// larger than `max_fragment_length`, and bumps the epoch for anything
/// queued after a ChangeCipherSpec in the same flight (flight 5 may
/// carry a CCS followed by an encrypted Finished).
pub struct FlightAssembler {
    pub max_fragment_length: usize,
    pub version: ProtocolVersion,
}

impl FlightAssembler {
    pub fn new(max_fragment_length: usize, version: ProtocolVersion) -> Self {
        FlightAssembler {
            max_fragment_length,
            version,
        }
    }

    /// `messages` ships in order; `epoch`/`next_seq` track the record
    /// layer sequence counter for the epoch currently in effect, and
    /// flip to `epoch + 1` as soon as a `ChangeCipherSpec` is emitted.
    pub fn assemble(
        &self,
        messages: &[(Handshake, bool)],
        mut epoch: u16,
        mut next_seq: u64,
    ) -> Result<Vec<Packet>> {
        let mut packets = vec![];

        for (handshake, should_encrypt) in messages {
            let mut body = vec![];
            handshake.message.marshal(&mut body)?;

            if body.is_empty() {
                packets.push(self.fragment_one(handshake, 0, 0, epoch, &mut next_seq, *should_encrypt)?);
                continue;
            }

            let mut offset = 0;
            while offset < body.len() {
                let frag_len = self.max_fragment_length.min(body.len() - offset);
                packets.push(self.fragment_one(
                    handshake,
                    offset,
                    frag_len,
                    epoch,
                    &mut next_seq,
                    *should_encrypt,
                )?);
                offset += frag_len;
            }
        }

        Ok(packets)
    }

    fn fragment_one(
        &self,
        handshake: &Handshake,
        fragment_offset: usize,
        fragment_length: usize,
        epoch: u16,
        next_seq: &mut u64,
        should_encrypt: bool,
    ) -> Result<Packet> {
        let mut fragment = handshake.clone();
        fragment.header.fragment_offset = fragment_offset as u32;
        fragment.header.fragment_length = fragment_length as u32;

        let seq = *next_seq;
        *next_seq += 1;

        Ok(Packet {
            record: RecordLayer::new(self.version, epoch, seq, Content::Handshake(fragment)),
            should_encrypt,
        })
    }

    pub fn change_cipher_spec_packet(&self, epoch: u16, seq: u64) -> Packet {
        Packet {
            record: RecordLayer::new(
                self.version,
                epoch,
                seq,
                Content::ChangeCipherSpec(ChangeCipherSpec),
            ),
            should_encrypt: false,
        }
    }
}
