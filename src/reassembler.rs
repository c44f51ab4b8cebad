use crate::error::{Error, Result};
use crate::handshake::header::HandshakeHeader;

struct PendingMessage {
    message_sequence: u16,
    total_length: usize,
    received: Vec<u8>,
    have: Vec<(usize, usize)>,
}

impl PendingMessage {
    fn new(message_sequence: u16, total_length: usize) -> Self {
        PendingMessage {
            message_sequence,
            total_length,
            received: vec![0u8; total_length],
            have: vec![],
        }
    }

    fn add_fragment(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset + data.len();
        if end > self.total_length {
            return Err(Error::DecodeError);
        }

        for &(start, stop) in &self.have {
            let overlaps = offset < stop && start < end;
            if overlaps {
                let overlap_start = offset.max(start);
                let overlap_end = end.min(stop);
                if self.received[overlap_start..overlap_end] != data[overlap_start - offset..overlap_end - offset] {
                    return Err(Error::ErrConflictingFragment);
                }
            }
        }

        self.received[offset..end].copy_from_slice(data);
        self.have.push((offset, end));
        self.have.sort_unstable();
        merge_ranges(&mut self.have);
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.have.len() == 1 && self.have[0] == (0, self.total_length)
    }
}

fn merge_ranges(ranges: &mut Vec<(usize, usize)>) {
    let mut merged = vec![];
    for &(start, end) in ranges.iter() {
        if let Some(last) = merged.last_mut() {
            let (ls, le): &mut (usize, usize) = last;
            if start <= *le {
                *le = (*le).max(end);
                continue;
            }
        }
        merged.push((start, end));
    }
    *ranges = merged;
}

/// What feeding one fragment into the `Reassembler` produced.
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Buffered; the message isn't complete yet.
    Pending,
    /// Every fragment of this message_sequence has now arrived.
    Complete(u16, Vec<u8>),
    /// A fragment of a message_sequence already delivered arrived again
    /// -- the peer is retransmitting its side of a flight because it
    /// never saw our reply, per RFC 6347 §4.2.4. The caller should
    /// resend its own last flight rather than wait out a fresh timeout.
    Retransmit,
}

/// Reorders and reassembles fragmented handshake messages for one
/// connection/direction. Per-message fragments may arrive out of
/// order or duplicated across retransmissions; overlapping fragments
/// that disagree on content are a protocol violation
/// (`Error::ErrConflictingFragment`), not silently repaired.
pub struct Reassembler {
    next_receive_seq: u16,
    pending: Vec<PendingMessage>,
    max_buffered_bytes: usize,
}

impl Reassembler {
    /// `max_buffered_bytes` bounds the total size of all messages
    /// currently buffered awaiting completion -- `Config::
    /// max_deferred_processed_incoming_records_size`, not a fixed
    /// message count, since a flight's messages vary wildly in size.
    pub fn new(max_buffered_bytes: usize) -> Self {
        Reassembler {
            next_receive_seq: 0,
            pending: vec![],
            max_buffered_bytes,
        }
    }

    fn buffered_bytes(&self) -> usize {
        self.pending.iter().map(|p| p.total_length).sum()
    }

    /// Feeds one fragment in. A fragment for a message_sequence already
    /// behind `next_receive_seq` is a retransmit, not new data -- see
    /// `PushOutcome::Retransmit`. A fragment that would start a new
    /// message past the buffer's byte budget is dropped (the new
    /// fragment, not anything already buffered): what's already
    /// in-flight is closer to completion than a brand new message
    /// would be.
    pub fn push(&mut self, header: &HandshakeHeader, fragment: &[u8]) -> Result<PushOutcome> {
        if header.message_sequence < self.next_receive_seq {
            return Ok(PushOutcome::Retransmit);
        }

        let idx = match self
            .pending
            .iter()
            .position(|p| p.message_sequence == header.message_sequence)
        {
            Some(idx) => idx,
            None => {
                let new_total = header.length as usize;
                if self.buffered_bytes() + new_total > self.max_buffered_bytes {
                    return Ok(PushOutcome::Pending);
                }
                self.pending.push(PendingMessage::new(header.message_sequence, new_total));
                self.pending.len() - 1
            }
        };

        self.pending[idx].add_fragment(header.fragment_offset as usize, fragment)?;

        if self.pending[idx].is_complete() {
            let msg = self.pending.remove(idx);
            if msg.message_sequence == self.next_receive_seq {
                self.next_receive_seq += 1;
            }
            return Ok(PushOutcome::Complete(msg.message_sequence, msg.received));
        }

        Ok(PushOutcome::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::HandshakeType;

    fn header(seq: u16, len: u32, offset: u32, frag_len: u32) -> HandshakeHeader {
        HandshakeHeader {
            handshake_type: HandshakeType::ClientHello,
            length: len,
            message_sequence: seq,
            fragment_offset: offset,
            fragment_length: frag_len,
        }
    }

    #[test]
    fn reassembles_out_of_order_fragments() {
        let mut r = Reassembler::new(1024);
        let data = b"hello world!";
        assert_eq!(r.push(&header(0, 12, 6, 6), &data[6..12]).unwrap(), PushOutcome::Pending);
        let result = r.push(&header(0, 12, 0, 6), &data[0..6]).unwrap();
        assert_eq!(result, PushOutcome::Complete(0, data.to_vec()));
    }

    #[test]
    fn rejects_conflicting_overlap() {
        let mut r = Reassembler::new(1024);
        r.push(&header(0, 12, 0, 6), b"hello ").unwrap();
        let err = r.push(&header(0, 12, 3, 6), b"XXXXXX");
        assert!(err.is_err());
    }

    #[test]
    fn duplicate_fragment_is_idempotent() {
        let mut r = Reassembler::new(1024);
        let data = b"hello world!";
        r.push(&header(0, 12, 0, 6), &data[0..6]).unwrap();
        r.push(&header(0, 12, 0, 6), &data[0..6]).unwrap();
        let result = r.push(&header(0, 12, 6, 6), &data[6..12]).unwrap();
        assert_eq!(result, PushOutcome::Complete(0, data.to_vec()));
    }

    #[test]
    fn retransmit_of_already_delivered_message_is_signaled() {
        let mut r = Reassembler::new(1024);
        let data = b"hello!";
        let result = r.push(&header(0, 6, 0, 6), data).unwrap();
        assert_eq!(result, PushOutcome::Complete(0, data.to_vec()));

        let retransmit = r.push(&header(0, 6, 0, 6), data).unwrap();
        assert_eq!(retransmit, PushOutcome::Retransmit);
    }

    #[test]
    fn new_message_past_byte_budget_is_dropped_not_oldest_pending() {
        let mut r = Reassembler::new(12);
        // Message 0 (12 bytes) fills the whole budget, left incomplete.
        assert_eq!(r.push(&header(0, 12, 0, 6), b"hello "), Ok(PushOutcome::Pending));
        // Message 1 would need its own 12 bytes on top of that -- dropped.
        assert_eq!(r.push(&header(1, 12, 0, 6), b"world!"), Ok(PushOutcome::Pending));
        // Message 0 can still complete: it was never evicted.
        let result = r.push(&header(0, 12, 6, 6), b"world!").unwrap();
        assert_eq!(result, PushOutcome::Complete(0, b"hello world!".to_vec()));
    }
}
