/// QUIC variable-length integer encoding (RFC 9000 §16).
///
/// | 2MSB | Length  | Usable Bits | Range                        |
/// |------|---------|-------------|------------------------------|
/// | 00   | 1 byte  | 6           | 0–63                         |
/// | 01   | 2 bytes | 14          | 0–16383                      |
/// | 10   | 4 bytes | 30          | 0–1073741823                 |
/// | 11   | 8 bytes | 62          | 0–4611686018427387903        |

use crate::error::FaultError;

/// Maximum value representable as a QUIC varint (2^62 - 1).
pub const MAX_VARINT: u64 = (1 << 62) - 1;

/// Encoded varint bytes, at most 8.
pub type VarIntBytes = heapless::Vec<u8, 8>;

/// How many bytes are needed to encode `value`?
pub const fn varint_len(value: u64) -> usize {
    if value <= 63 {
        1
    } else if value <= 16383 {
        2
    } else if value <= 1_073_741_823 {
        4
    } else {
        8
    }
}

/// Largest value a varint of `len` encoded bytes can carry.
pub const fn varint_max_for_len(len: usize) -> u64 {
    match len {
        1 => 63,
        2 => 16383,
        4 => 1_073_741_823,
        _ => MAX_VARINT,
    }
}

/// Decode the varint starting at `buf[offset]`.
///
/// Returns `(value, bytes_consumed)`.
pub fn decode_varint(buf: &[u8], offset: usize) -> Result<(u64, usize), FaultError> {
    let first = *buf
        .get(offset)
        .ok_or(FaultError::MalformedEncoding { offset })?;
    let len = 1usize << (first >> 6);
    let bytes = buf
        .get(offset..offset + len)
        .ok_or(FaultError::MalformedEncoding { offset })?;

    let mut value = u64::from(first & 0x3f);
    for b in &bytes[1..] {
        value = (value << 8) | u64::from(*b);
    }
    Ok((value, len))
}

/// Encode `value` in exactly `len` bytes (1, 2, 4 or 8) into `out`.
///
/// Non-minimal encodings are legal QUIC and are how a length field keeps its
/// width when its value shrinks.
pub fn write_varint_with_len(value: u64, len: usize, out: &mut [u8]) -> Result<usize, FaultError> {
    if !matches!(len, 1 | 2 | 4 | 8) || value > varint_max_for_len(len) {
        return Err(FaultError::EncodingOverflow { value, width: len });
    }
    if out.len() < len {
        return Err(FaultError::RangeError {
            offset: 0,
            len,
            buf_len: out.len(),
        });
    }

    let tag: u8 = match len {
        1 => 0x00,
        2 => 0x40,
        4 => 0x80,
        _ => 0xc0,
    };
    let bytes = value.to_be_bytes();
    out[..len].copy_from_slice(&bytes[8 - len..]);
    out[0] |= tag;
    Ok(len)
}

/// Encode `value` minimally into `out`. Returns the number of bytes written.
pub fn write_varint(value: u64, out: &mut [u8]) -> Result<usize, FaultError> {
    if value > MAX_VARINT {
        return Err(FaultError::EncodingOverflow { value, width: 8 });
    }
    write_varint_with_len(value, varint_len(value), out)
}

/// Encode `value` with the canonical minimal width.
pub fn encode_varint(value: u64) -> Result<VarIntBytes, FaultError> {
    let mut tmp = [0u8; 8];
    let n = write_varint(value, &mut tmp)?;
    let mut out = VarIntBytes::new();
    // cannot overflow: n <= 8
    let _ = out.extend_from_slice(&tmp[..n]);
    Ok(out)
}

/// Append the minimal encoding of `value` to `out`.
pub fn push_varint(value: u64, out: &mut Vec<u8>) -> Result<(), FaultError> {
    out.extend_from_slice(&encode_varint(value)?);
    Ok(())
}
