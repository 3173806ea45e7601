//! QUIC packet header types and codec.
//!
//! Parses and builds the outer packet structure (headers, packet numbers,
//! coalescing) and applies packet protection. An unprotected packet is kept
//! as one contiguous buffer: header, packet number, then plaintext frames.
//! Keeping the header in the same buffer lets the long header Length field
//! be patched like any other length prefix.

pub mod coalesce;
pub mod number;
pub mod protection;

pub use coalesce::CoalescedPackets;
pub use number::{decode_pn, encode_pn, pn_length, read_truncated_pn};
pub use protection::{protect, unprotect};

use crate::buf::PacketBuf;
use crate::codec::LengthField;
use crate::crypto::Level;
use crate::error::FaultError;
use crate::varint::{decode_varint, encode_varint};

/// QUIC v1 version number (RFC 9000).
pub const QUIC_VERSION_1: u32 = 0x0000_0001;

/// Maximum connection ID length (RFC 9000).
pub const MAX_CID_LEN: usize = 20;

/// Minimum size of a datagram carrying a client Initial (RFC 9000 section 14.1).
pub const MIN_INITIAL_PACKET_SIZE: usize = 1200;

const LONG_TYPE_INITIAL: u8 = 0b00;
const LONG_TYPE_HANDSHAKE: u8 = 0b10;

pub type ConnectionId = heapless::Vec<u8, MAX_CID_LEN>;

/// Copy `bytes` into a [`ConnectionId`].
pub fn connection_id(bytes: &[u8]) -> Result<ConnectionId, FaultError> {
    ConnectionId::from_slice(bytes).map_err(|_| FaultError::EncodingOverflow {
        value: bytes.len() as u64,
        width: MAX_CID_LEN,
    })
}

/// A parsed packet header.
///
/// Fresh from [`parse_header`] the packet number fields are unknown (zero)
/// and `first_byte` is still masked; [`unprotect`] fills them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub level: Level,
    pub first_byte: u8,
    /// Zero for short headers.
    pub version: u32,
    pub dcid: ConnectionId,
    /// Empty for short headers.
    pub scid: ConnectionId,
    /// Initial packets only.
    pub token: Vec<u8>,
    /// Long header Length field (covers packet number + protected payload).
    pub length_field: Option<LengthField>,
    /// Declared Length value for long headers, bytes after the DCID for short ones.
    pub payload_length: usize,
    pub pn_offset: usize,
    pub pn_len: usize,
    pub pn: u64,
    /// Bytes this packet occupies in its datagram.
    pub packet_len: usize,
}

impl PacketHeader {
    pub fn is_long(&self) -> bool {
        self.first_byte & 0x80 != 0
    }

    /// Offset of the first frame byte in an unprotected packet buffer.
    pub fn payload_start(&self) -> usize {
        self.pn_offset + self.pn_len
    }
}

fn malformed(offset: usize) -> FaultError {
    FaultError::MalformedEncoding { offset }
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], FaultError> {
    let bytes = buf
        .get(*pos..pos.saturating_add(len))
        .filter(|b| b.len() == len)
        .ok_or(malformed(*pos))?;
    *pos += len;
    Ok(bytes)
}

fn take_cid(buf: &[u8], pos: &mut usize) -> Result<ConnectionId, FaultError> {
    let len = usize::from(*take(buf, pos, 1)?.first().ok_or(malformed(*pos))?);
    if len > MAX_CID_LEN {
        return Err(malformed(*pos - 1));
    }
    connection_id(take(buf, pos, len)?)
}

/// Parse the (still protected) header of the first packet in `buf`.
///
/// Only Initial, Handshake and 1-RTT packets are understood. Short headers
/// carry no DCID length, so the receiver's `short_dcid_len` is needed.
pub fn parse_header(buf: &[u8], short_dcid_len: usize) -> Result<PacketHeader, FaultError> {
    let first_byte = *buf.first().ok_or(malformed(0))?;
    let mut pos = 1;

    if first_byte & 0x80 == 0 {
        if first_byte & 0x40 == 0 {
            return Err(malformed(0));
        }
        let dcid = connection_id(take(buf, &mut pos, short_dcid_len)?)?;
        return Ok(PacketHeader {
            level: Level::Application,
            first_byte,
            version: 0,
            dcid,
            scid: ConnectionId::new(),
            token: Vec::new(),
            length_field: None,
            payload_length: buf.len() - pos,
            pn_offset: pos,
            pn_len: 0,
            pn: 0,
            packet_len: buf.len(),
        });
    }

    let version_bytes = take(buf, &mut pos, 4)?;
    let version = u32::from_be_bytes([
        version_bytes[0],
        version_bytes[1],
        version_bytes[2],
        version_bytes[3],
    ]);
    if version != QUIC_VERSION_1 {
        return Err(malformed(1));
    }

    let level = match (first_byte & 0x30) >> 4 {
        LONG_TYPE_INITIAL => Level::Initial,
        LONG_TYPE_HANDSHAKE => Level::Handshake,
        _ => return Err(malformed(0)),
    };

    let dcid = take_cid(buf, &mut pos)?;
    let scid = take_cid(buf, &mut pos)?;

    let mut token = Vec::new();
    if level == Level::Initial {
        let (token_len, n) = decode_varint(buf, pos)?;
        pos += n;
        let token_len = usize::try_from(token_len).map_err(|_| malformed(pos))?;
        token.extend_from_slice(take(buf, &mut pos, token_len)?);
    }

    let length_field = LengthField::varint_at(buf, pos)?;
    let payload_length =
        usize::try_from(length_field.read(buf)?).map_err(|_| malformed(length_field.offset))?;
    let pn_offset = length_field.end();
    let packet_len = pn_offset
        .checked_add(payload_length)
        .filter(|end| *end <= buf.len())
        .ok_or(malformed(length_field.offset))?;

    Ok(PacketHeader {
        level,
        first_byte,
        version,
        dcid,
        scid,
        token,
        length_field: Some(length_field),
        payload_length,
        pn_offset,
        pn_len: 0,
        pn: 0,
        packet_len,
    })
}

/// What to put in the header of a packet being built.
#[derive(Debug, Clone, Copy)]
pub struct PacketSpec<'a> {
    pub level: Level,
    pub dcid: &'a [u8],
    pub scid: &'a [u8],
    pub token: &'a [u8],
    pub pn: u64,
    pub pn_len: usize,
}

/// Lay out an unprotected packet: header, packet number, `payload`.
///
/// The long header Length field is sized for `payload` plus an AEAD tag of
/// `tag_len` bytes, ready for [`protect`].
pub fn build_packet(
    spec: &PacketSpec<'_>,
    payload: &[u8],
    tag_len: usize,
) -> Result<(PacketHeader, PacketBuf), FaultError> {
    if !(1..=4).contains(&spec.pn_len) {
        return Err(FaultError::EncodingOverflow {
            value: spec.pn_len as u64,
            width: 4,
        });
    }
    let pn_bits = (spec.pn_len - 1) as u8;
    let mut buf = PacketBuf::new();

    let (first_byte, length_field) = match spec.level {
        Level::Application => {
            let first_byte = 0x40 | pn_bits;
            buf.extend_from_slice(&[first_byte])?;
            buf.extend_from_slice(spec.dcid)?;
            (first_byte, None)
        }
        long => {
            let ty = if long == Level::Initial {
                LONG_TYPE_INITIAL
            } else {
                LONG_TYPE_HANDSHAKE
            };
            let first_byte = 0xc0 | (ty << 4) | pn_bits;
            buf.extend_from_slice(&[first_byte])?;
            buf.extend_from_slice(&QUIC_VERSION_1.to_be_bytes())?;
            buf.extend_from_slice(&[spec.dcid.len() as u8])?;
            buf.extend_from_slice(spec.dcid)?;
            buf.extend_from_slice(&[spec.scid.len() as u8])?;
            buf.extend_from_slice(spec.scid)?;
            if long == Level::Initial {
                buf.extend_from_slice(&encode_varint(spec.token.len() as u64)?)?;
                buf.extend_from_slice(spec.token)?;
            }
            let length = (spec.pn_len + payload.len() + tag_len) as u64;
            let encoded = encode_varint(length)?;
            let field = LengthField::varint(buf.len(), encoded.len());
            buf.extend_from_slice(&encoded)?;
            (first_byte, Some(field))
        }
    };

    let pn_offset = buf.len();
    let mut pn_bytes = [0u8; 4];
    encode_pn(spec.pn, spec.pn_len, &mut pn_bytes)?;
    buf.extend_from_slice(&pn_bytes[..spec.pn_len])?;
    buf.extend_from_slice(payload)?;

    let header = PacketHeader {
        level: spec.level,
        first_byte,
        version: if spec.level == Level::Application {
            0
        } else {
            QUIC_VERSION_1
        },
        dcid: connection_id(spec.dcid)?,
        scid: if spec.level == Level::Application {
            ConnectionId::new()
        } else {
            connection_id(spec.scid)?
        },
        token: if spec.level == Level::Initial {
            spec.token.to_vec()
        } else {
            Vec::new()
        },
        length_field,
        payload_length: spec.pn_len + payload.len() + tag_len,
        pn_offset,
        pn_len: spec.pn_len,
        pn: spec.pn,
        packet_len: buf.len() + tag_len,
    };
    Ok((header, buf))
}

/// Destination connection id of the first packet in a datagram.
pub fn peek_dcid(datagram: &[u8], short_dcid_len: usize) -> Option<&[u8]> {
    let first = *datagram.first()?;
    if first & 0x80 != 0 {
        let len = usize::from(*datagram.get(5)?);
        datagram.get(6..6 + len)
    } else {
        datagram.get(1..1 + short_dcid_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(level: Level) -> PacketSpec<'static> {
        PacketSpec {
            level,
            dcid: &[1, 2, 3, 4, 5, 6, 7, 8],
            scid: &[9, 10, 11, 12],
            token: &[],
            pn: 3,
            pn_len: 1,
        }
    }

    #[test]
    fn initial_header_layout_and_parse() {
        let mut s = spec(Level::Initial);
        s.token = &[0xaa, 0xbb];
        let (hdr, buf) = build_packet(&s, &[0x01; 30], 16).unwrap();

        assert_eq!(buf[0], 0xc0);
        assert_eq!(&buf[1..5], &[0, 0, 0, 1]);
        assert_eq!(hdr.length_field.unwrap().read(&buf).unwrap(), 1 + 30 + 16);

        // parse expects the full protected length to be present
        let mut wire = buf.as_slice().to_vec();
        wire.extend_from_slice(&[0u8; 16]);
        let parsed = parse_header(&wire, 0).unwrap();
        assert_eq!(parsed.level, Level::Initial);
        assert_eq!(parsed.dcid.as_slice(), s.dcid);
        assert_eq!(parsed.scid.as_slice(), s.scid);
        assert_eq!(parsed.token, vec![0xaa, 0xbb]);
        assert_eq!(parsed.pn_offset, hdr.pn_offset);
        assert_eq!(parsed.packet_len, wire.len());
        assert_eq!(parsed.length_field, hdr.length_field);
    }

    #[test]
    fn handshake_type_bits() {
        let (hdr, buf) = build_packet(&spec(Level::Handshake), &[0; 4], 16).unwrap();
        assert_eq!(buf[0], 0xe0);
        assert!(hdr.is_long());
        assert!(hdr.token.is_empty());
    }

    #[test]
    fn short_header_consumes_rest() {
        let mut s = spec(Level::Application);
        s.pn_len = 2;
        let (hdr, buf) = build_packet(&s, &[0; 10], 16).unwrap();
        assert_eq!(buf[0], 0x41);
        assert!(!hdr.is_long());
        assert_eq!(hdr.pn_offset, 9);

        let parsed = parse_header(&buf, 8).unwrap();
        assert_eq!(parsed.level, Level::Application);
        assert_eq!(parsed.packet_len, buf.len());
        assert_eq!(parsed.length_field, None);
    }

    #[test]
    fn length_beyond_datagram_is_malformed() {
        let (_, buf) = build_packet(&spec(Level::Handshake), &[0; 4], 16).unwrap();
        // tag bytes missing
        assert!(matches!(
            parse_header(&buf, 0),
            Err(FaultError::MalformedEncoding { .. })
        ));
    }

    #[test]
    fn unsupported_headers_are_rejected() {
        assert!(parse_header(&[], 0).is_err());
        // 0-RTT type
        assert!(parse_header(&[0xd0, 0, 0, 0, 1, 0, 0, 0], 0).is_err());
        // version negotiation
        assert!(parse_header(&[0xc0, 0, 0, 0, 0, 0, 0], 0).is_err());
        // short header without fixed bit
        assert!(parse_header(&[0x00, 1, 2], 0).is_err());
        // oversized cid
        assert!(parse_header(&[0xc0, 0, 0, 0, 1, 21], 0).is_err());
    }

    #[test]
    fn peek_dcid_both_forms() {
        let (_, long) = build_packet(&spec(Level::Initial), &[0; 4], 0).unwrap();
        assert_eq!(peek_dcid(&long, 0), Some(&[1, 2, 3, 4, 5, 6, 7, 8][..]));
        let (_, short) = build_packet(&spec(Level::Application), &[0; 4], 0).unwrap();
        assert_eq!(peek_dcid(&short, 8), Some(&[1, 2, 3, 4, 5, 6, 7, 8][..]));
        assert_eq!(peek_dcid(&[], 8), None);
    }
}
