//! Bookkeeping for the CRYPTO streams crossing the link.
//!
//! A handshake message may start anywhere in a CRYPTO frame, or run across
//! several of them, so message boundaries can only be found by walking the
//! stream from offset 0. Each log keeps the bytes the sender wrote, plus the
//! size change of every message the interceptor rewrote, so that frames
//! sent after an edit can be moved to the offsets the receiver expects.

use crate::crypto::Level;
use crate::tls::handshake::Role;
use crate::tls::messages::{read_handshake_header, HANDSHAKE_HEADER_LEN};

/// A handshake message located in the sender's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StreamMessage {
    pub msg_type: u8,
    /// Offset of the message header.
    pub start: u64,
    /// Encoded length, header included. `None` while the header itself is
    /// incomplete.
    pub len: Option<usize>,
}

impl StreamMessage {
    pub fn end(&self) -> Option<u64> {
        self.len.map(|len| self.start + len as u64)
    }

    /// Whether the whole message lies in `[start, end)`.
    pub fn within(&self, start: u64, end: u64) -> bool {
        self.start >= start && self.end().is_some_and(|e| e <= end)
    }
}

/// One direction of one level's CRYPTO stream.
#[derive(Debug, Default)]
pub(crate) struct CryptoStreamLog {
    /// Stream bytes as sent, contiguous from offset 0.
    original: Vec<u8>,
    /// Original end offset of each rewritten message and its size change.
    edits: Vec<(u64, i64)>,
}

impl CryptoStreamLog {
    /// Record frame data found at `offset`.
    ///
    /// Retransmitted bytes are accepted and ignored. Returns `false` when
    /// bytes before `offset` were never seen, in which case nothing is
    /// recorded.
    pub fn record(&mut self, offset: u64, data: &[u8]) -> bool {
        let known = self.original.len() as u64;
        if offset > known {
            return false;
        }
        let end = offset + data.len() as u64;
        if end > known {
            let skip = (known - offset) as usize;
            self.original.extend_from_slice(&data[skip..]);
        }
        true
    }

    pub fn recorded_len(&self) -> u64 {
        self.original.len() as u64
    }

    /// Messages overlapping `[start, end)`, in stream order.
    pub fn messages_overlapping(&self, start: u64, end: u64) -> Vec<StreamMessage> {
        let mut found = Vec::new();
        if start >= end {
            return found;
        }
        let mut pos = 0usize;
        while pos < self.original.len() && (pos as u64) < end {
            let rest = &self.original[pos..];
            let Some((msg_type, body_len)) = read_handshake_header(rest) else {
                // header split across frames
                found.push(StreamMessage {
                    msg_type: rest[0],
                    start: pos as u64,
                    len: None,
                });
                break;
            };
            let msg = StreamMessage {
                msg_type,
                start: pos as u64,
                len: Some(HANDSHAKE_HEADER_LEN + body_len),
            };
            if msg.end().is_some_and(|e| e > start) {
                found.push(msg);
            }
            pos += HANDSHAKE_HEADER_LEN + body_len;
        }
        found
    }

    /// Total size change of the rewritten messages that end at or before
    /// `offset`.
    pub fn shift_at(&self, offset: u64) -> i64 {
        self.edits
            .iter()
            .filter(|(end, _)| *end <= offset)
            .map(|(_, delta)| delta)
            .sum()
    }

    /// Note that the message ending at `original_end` changed size by `delta`.
    pub fn note_edit(&mut self, original_end: u64, delta: i64) {
        // a retransmitted message carries the same edit again
        if delta == 0 || self.edits.iter().any(|(end, _)| *end == original_end) {
            return;
        }
        self.edits.push((original_end, delta));
    }
}

/// Logs for both directions at every level.
#[derive(Debug, Default)]
pub(crate) struct CryptoStreams {
    logs: [[CryptoStreamLog; 3]; 2],
}

impl CryptoStreams {
    pub fn get_mut(&mut self, sender: Role, level: Level) -> &mut CryptoStreamLog {
        let side = match sender {
            Role::Client => 0,
            Role::Server => 1,
        };
        &mut self.logs[side][level.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(ty: u8, body_len: usize) -> Vec<u8> {
        let mut msg = vec![ty, 0, (body_len >> 8) as u8, body_len as u8];
        msg.resize(4 + body_len, 0xab);
        msg
    }

    #[test]
    fn record_accepts_overlap_and_rejects_gaps() {
        let mut log = CryptoStreamLog::default();
        assert!(log.record(0, &[1, 2, 3]));
        assert!(log.record(1, &[2, 3, 4, 5]));
        assert!(log.record(0, &[1]));
        assert_eq!(log.recorded_len(), 5);
        assert!(!log.record(7, &[9]));
        assert_eq!(log.recorded_len(), 5);
    }

    #[test]
    fn boundaries_come_from_the_start_of_the_stream() {
        let mut stream = message(8, 10);
        stream.extend(message(20, 32));
        let mut log = CryptoStreamLog::default();

        // first frame ends inside the second message's header
        assert!(log.record(0, &stream[..16]));
        let found = log.messages_overlapping(0, 16);
        assert_eq!(found.len(), 2);
        assert!(found[0].within(0, 16));
        assert_eq!(found[1], StreamMessage { msg_type: 20, start: 14, len: None });

        // second frame starts mid-header
        assert!(log.record(16, &stream[16..]));
        let found = log.messages_overlapping(16, stream.len() as u64);
        assert_eq!(found, vec![StreamMessage { msg_type: 20, start: 14, len: Some(36) }]);
        assert!(!found[0].within(16, stream.len() as u64));
        assert!(found[0].within(14, stream.len() as u64));
    }

    #[test]
    fn shifts_apply_to_later_offsets_only() {
        let mut log = CryptoStreamLog::default();
        log.note_edit(40, -12);
        log.note_edit(40, -12);
        log.note_edit(90, 5);
        log.note_edit(120, 0);
        assert_eq!(log.shift_at(0), 0);
        assert_eq!(log.shift_at(40), -12);
        assert_eq!(log.shift_at(89), -12);
        assert_eq!(log.shift_at(200), -7);
    }

    #[test]
    fn directions_and_levels_are_separate() {
        let mut streams = CryptoStreams::default();
        assert!(streams.get_mut(Role::Server, Level::Handshake).record(0, &[8, 0, 0, 0]));
        assert_eq!(streams.get_mut(Role::Server, Level::Handshake).recorded_len(), 4);
        assert_eq!(streams.get_mut(Role::Client, Level::Handshake).recorded_len(), 0);
        assert_eq!(streams.get_mut(Role::Server, Level::Initial).recorded_len(), 0);
    }
}
