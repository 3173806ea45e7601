//! QUIC packet number encoding and decoding (RFC 9000 section 17.1, A.2, A.3).

use crate::error::FaultError;

/// Determine how many bytes are needed to encode `full_pn` given `largest_acked`.
///
/// Chooses the smallest encoding that covers twice the distance from
/// `largest_acked` to `full_pn`, as recommended by RFC 9000 section A.2.
/// With nothing acknowledged yet the whole packet number space up to
/// `full_pn` counts as unacknowledged.
pub fn pn_length(full_pn: u64, largest_acked: Option<u64>) -> usize {
    let num_unacked = match largest_acked {
        Some(acked) if full_pn > acked => full_pn - acked,
        Some(_) => 1,
        None => full_pn + 1,
    };
    if num_unacked < (1 << 7) {
        1
    } else if num_unacked < (1 << 15) {
        2
    } else if num_unacked < (1 << 23) {
        3
    } else {
        4
    }
}

/// Write the low `pn_len` bytes of `full_pn` big-endian into `out`.
pub fn encode_pn(full_pn: u64, pn_len: usize, out: &mut [u8]) -> Result<(), FaultError> {
    if !(1..=4).contains(&pn_len) || out.len() < pn_len {
        return Err(FaultError::RangeError {
            offset: 0,
            len: pn_len,
            buf_len: out.len(),
        });
    }
    out[..pn_len].copy_from_slice(&full_pn.to_be_bytes()[8 - pn_len..]);
    Ok(())
}

/// Read a truncated packet number of `pn_len` bytes.
pub fn read_truncated_pn(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
}

/// Decode a truncated packet number given the largest packet number seen.
///
/// Implements the algorithm from RFC 9000 section A.3.
pub fn decode_pn(truncated_pn: u32, pn_len: usize, largest_pn: Option<u64>) -> u64 {
    let pn_nbits = (pn_len as u64) * 8;
    let pn_win = 1u64 << pn_nbits;
    let pn_hwin = pn_win / 2;
    let pn_mask = pn_win - 1;

    let expected_pn = largest_pn.map_or(0, |pn| pn + 1);
    let candidate_pn = (expected_pn & !pn_mask) | u64::from(truncated_pn);

    if candidate_pn + pn_hwin <= expected_pn && candidate_pn + pn_win <= (1u64 << 62) {
        candidate_pn + pn_win
    } else if candidate_pn > expected_pn + pn_hwin && candidate_pn >= pn_win {
        candidate_pn - pn_win
    } else {
        candidate_pn
    }
}
