//! Packet protection (RFC 9001 section 5): AEAD payload protection and
//! header protection.

use crate::buf::PacketBuf;
use crate::codec::rewrite_length_field;
use crate::crypto::{Level, PacketKeys};
use crate::error::FaultError;
use crate::packet::{decode_pn, read_truncated_pn, PacketHeader};

/// Header protection sample size.
const SAMPLE_LEN: usize = 16;

/// The sample starts this far past the packet number offset.
const SAMPLE_OFFSET: usize = 4;

fn first_byte_mask(level: Level) -> u8 {
    match level {
        Level::Application => 0x1f,
        Level::Initial | Level::Handshake => 0x0f,
    }
}

fn sample_at(buf: &[u8], pn_offset: usize) -> Option<[u8; SAMPLE_LEN]> {
    let start = pn_offset + SAMPLE_OFFSET;
    buf.get(start..start + SAMPLE_LEN)?.try_into().ok()
}

/// Remove header protection from `packet` and decrypt its payload.
///
/// `header` comes from [`parse_header`](crate::packet::parse_header) on the
/// same bytes. `largest_pn` is the largest packet number already seen at this
/// level and anchors packet number reconstruction.
///
/// Returns the completed header and a buffer holding the unprotected header,
/// the packet number and the plaintext frames.
pub fn unprotect(
    packet: &[u8],
    mut header: PacketHeader,
    keys: &PacketKeys,
    largest_pn: Option<u64>,
) -> Result<(PacketHeader, PacketBuf), FaultError> {
    let level = header.level;
    let fail = || FaultError::DecryptionFailure(level);

    let protected = packet.get(..header.packet_len).ok_or_else(fail)?;
    let mut buf = PacketBuf::from_slice(protected)?;
    let pn_offset = header.pn_offset;

    let sample = sample_at(&buf, pn_offset).ok_or_else(fail)?;
    let mask = keys.header_protection.mask(&sample);

    buf[0] ^= mask[0] & first_byte_mask(level);
    let pn_len = usize::from(buf[0] & 0x03) + 1;
    for (b, m) in buf[pn_offset..pn_offset + pn_len].iter_mut().zip(&mask[1..]) {
        *b ^= m;
    }

    let truncated = read_truncated_pn(&buf[pn_offset..pn_offset + pn_len]);
    let pn = decode_pn(truncated, pn_len, largest_pn);

    let payload_start = pn_offset + pn_len;
    let (aad, body) = buf.split_at_mut(payload_start);
    let ciphertext_len = body.len();
    let plaintext_len = keys
        .aead
        .open_in_place(&keys.nonce(pn), aad, body, ciphertext_len)
        .map_err(|_| fail())?;
    buf.resize(payload_start + plaintext_len)?;

    header.first_byte = buf[0];
    header.pn_len = pn_len;
    header.pn = pn;
    Ok((header, buf))
}

/// Encrypt an unprotected packet buffer and apply header protection.
///
/// `buf` holds the unprotected header, packet number and plaintext frames as
/// produced by [`unprotect`] or [`build_packet`](crate::packet::build_packet).
/// A payload too short to leave room for the header protection sample is
/// padded with PADDING frames, and the Length field grows with it. The
/// Length field must otherwise already describe the packet.
pub fn protect(
    header: &PacketHeader,
    mut buf: PacketBuf,
    keys: &PacketKeys,
) -> Result<Vec<u8>, FaultError> {
    let level = header.level;
    let payload_start = header.payload_start();
    let tag_len = keys.aead.tag_len();

    let payload_len = buf
        .len()
        .checked_sub(payload_start)
        .ok_or(FaultError::RangeError {
            offset: payload_start,
            len: 0,
            buf_len: buf.len(),
        })?;

    // pn + ciphertext must cover the 4-byte skip and the 16-byte sample
    let min_payload = (SAMPLE_OFFSET + SAMPLE_LEN).saturating_sub(header.pn_len + tag_len);
    if payload_len < min_payload {
        let pad = min_payload - payload_len;
        buf.resize(buf.len() + pad)?;
        if let Some(field) = &header.length_field {
            rewrite_length_field(&mut buf, field, pad as isize, false)?;
        }
        tracing::trace!(?level, pad, "padded short packet for header protection sample");
    }

    if let Some(field) = &header.length_field {
        let declared = field.read(&buf)?;
        let actual = (buf.len() - header.pn_offset + tag_len) as u64;
        if declared != actual {
            return Err(FaultError::MalformedEncoding {
                offset: field.offset,
            });
        }
    }

    let payload_len = buf.len() - payload_start;
    buf.resize(buf.len() + tag_len)?;
    let (aad, body) = buf.split_at_mut(payload_start);
    keys.aead
        .seal_in_place(&keys.nonce(header.pn), aad, body, payload_len)
        .map_err(|_| FaultError::EncryptionFailure(level))?;

    let sample =
        sample_at(&buf, header.pn_offset).ok_or(FaultError::EncryptionFailure(level))?;
    let mask = keys.header_protection.mask(&sample);
    buf[0] ^= mask[0] & first_byte_mask(level);
    let pn_range = header.pn_offset..payload_start;
    for (b, m) in buf[pn_range].iter_mut().zip(&mask[1..]) {
        *b ^= m;
    }

    Ok(buf.into_vec())
}
