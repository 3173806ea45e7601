//! Iterator over coalesced QUIC packets in a single UDP datagram.

use crate::error::FaultError;
use crate::packet::{parse_header, PacketHeader};

/// Iterator over coalesced packets in a single UDP datagram.
///
/// Long header packets use the Length field to determine packet boundaries.
/// A short header packet must be the last packet in the datagram (it consumes
/// the rest of the buffer). Short headers carry no DCID length, so the
/// iterator needs the receiver's connection id length.
pub struct CoalescedPackets<'a> {
    buf: &'a [u8],
    offset: usize,
    short_dcid_len: usize,
}

impl<'a> CoalescedPackets<'a> {
    pub fn new(datagram: &'a [u8], short_dcid_len: usize) -> Self {
        CoalescedPackets {
            buf: datagram,
            offset: 0,
            short_dcid_len,
        }
    }
}

impl<'a> Iterator for CoalescedPackets<'a> {
    /// Parsed (still protected) header and the packet's bytes.
    type Item = Result<(PacketHeader, &'a [u8]), FaultError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.buf.len() {
            return None;
        }

        let remaining = &self.buf[self.offset..];
        match parse_header(remaining, self.short_dcid_len) {
            Ok(header) => {
                let pkt = &remaining[..header.packet_len];
                self.offset += header.packet_len;
                Some(Ok((header, pkt)))
            }
            Err(e) => {
                let e = match e {
                    FaultError::MalformedEncoding { offset } => FaultError::MalformedEncoding {
                        offset: self.offset + offset,
                    },
                    other => other,
                };
                self.offset = self.buf.len();
                Some(Err(e))
            }
        }
    }
}
