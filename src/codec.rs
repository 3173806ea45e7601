//! Length-prefixed field codec and nested length patching.
//!
//! QUIC packets nest length-prefixed structures several layers deep: the long
//! header Length field covers CRYPTO frames whose length covers a handshake
//! message whose 24-bit length covers an extension block. Editing the
//! innermost structure means rewriting every enclosing length. A
//! [`PatchList`] records those fields outermost-first and applies a size
//! delta innermost-to-outermost, folding in any extra bytes introduced when a
//! varint length has to widen.

use crate::buf::PacketBuf;
use crate::error::FaultError;
use crate::varint::{decode_varint, varint_len, varint_max_for_len, write_varint_with_len};

/// Encoding of a length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWidth {
    /// Big-endian unsigned integer of the given byte width (1..=8).
    Fixed(usize),
    /// QUIC varint currently occupying the given number of bytes.
    VarInt(usize),
}

impl FieldWidth {
    pub fn encoded_len(self) -> usize {
        match self {
            FieldWidth::Fixed(n) | FieldWidth::VarInt(n) => n,
        }
    }

    fn max_value(self) -> u64 {
        match self {
            FieldWidth::Fixed(n) if n >= 8 => u64::MAX,
            FieldWidth::Fixed(n) => (1u64 << (8 * n)) - 1,
            FieldWidth::VarInt(n) => varint_max_for_len(n),
        }
    }
}

/// A length field located inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthField {
    pub offset: usize,
    pub width: FieldWidth,
}

impl LengthField {
    pub const fn fixed(offset: usize, width: usize) -> Self {
        Self {
            offset,
            width: FieldWidth::Fixed(width),
        }
    }

    pub const fn varint(offset: usize, width: usize) -> Self {
        Self {
            offset,
            width: FieldWidth::VarInt(width),
        }
    }

    /// Locate a varint length field at `offset`, taking its width from the encoding.
    pub fn varint_at(buf: &[u8], offset: usize) -> Result<Self, FaultError> {
        let (_, len) = decode_varint(buf, offset)?;
        Ok(Self::varint(offset, len))
    }

    pub fn read(&self, buf: &[u8]) -> Result<u64, FaultError> {
        match self.width {
            FieldWidth::Fixed(n) => read_fixed(buf, self.offset, n),
            FieldWidth::VarInt(n) => {
                let (value, len) = decode_varint(buf, self.offset)?;
                if len != n {
                    return Err(FaultError::MalformedEncoding {
                        offset: self.offset,
                    });
                }
                Ok(value)
            }
        }
    }

    /// First byte after this field.
    pub fn end(&self) -> usize {
        self.offset + self.width.encoded_len()
    }
}

/// Read a big-endian unsigned integer of `width` bytes.
pub fn read_fixed(buf: &[u8], offset: usize, width: usize) -> Result<u64, FaultError> {
    if width == 0 || width > 8 {
        return Err(FaultError::MalformedEncoding { offset });
    }
    let bytes = buf
        .get(offset..offset.saturating_add(width))
        .filter(|b| b.len() == width)
        .ok_or(FaultError::RangeError {
            offset,
            len: width,
            buf_len: buf.len(),
        })?;
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Write `value` as a big-endian unsigned integer of `width` bytes.
pub fn write_fixed(buf: &mut [u8], offset: usize, width: usize, value: u64) -> Result<(), FaultError> {
    if width == 0 || width > 8 || (width < 8 && value >> (8 * width) != 0) {
        return Err(FaultError::EncodingOverflow { value, width });
    }
    let buf_len = buf.len();
    let dst = buf
        .get_mut(offset..offset.saturating_add(width))
        .filter(|b| b.len() == width)
        .ok_or(FaultError::RangeError {
            offset,
            len: width,
            buf_len,
        })?;
    dst.copy_from_slice(&value.to_be_bytes()[8 - width..]);
    Ok(())
}

pub fn read_u16(buf: &[u8], offset: usize) -> Result<u16, FaultError> {
    read_fixed(buf, offset, 2).map(|v| v as u16)
}

pub fn read_u24(buf: &[u8], offset: usize) -> Result<u32, FaultError> {
    read_fixed(buf, offset, 3).map(|v| v as u32)
}

fn apply_delta(value: u64, delta: isize, offset: usize) -> Result<u64, FaultError> {
    if delta >= 0 {
        value
            .checked_add(delta as u64)
            .ok_or(FaultError::EncodingOverflow {
                value: u64::MAX,
                width: 8,
            })
    } else {
        value
            .checked_sub(delta.unsigned_abs() as u64)
            .ok_or(FaultError::MalformedEncoding { offset })
    }
}

/// Add `delta` to the length stored in `field`.
///
/// Fixed fields and non-widenable varints keep their width; a value that no
/// longer fits is [`FaultError::EncodingOverflow`]. A widenable varint is
/// re-encoded at the smallest width that is at least its current one and
/// spliced in place. Returns the number of bytes the field itself grew by.
pub fn rewrite_length_field(
    buf: &mut PacketBuf,
    field: &LengthField,
    delta: isize,
    widenable: bool,
) -> Result<usize, FaultError> {
    let old = field.read(buf)?;
    let new = apply_delta(old, delta, field.offset)?;

    match field.width {
        FieldWidth::Fixed(n) => {
            write_fixed(buf, field.offset, n, new)?;
            Ok(0)
        }
        FieldWidth::VarInt(n) if new <= field.width.max_value() => {
            write_varint_with_len(new, n, &mut buf[field.offset..])?;
            Ok(0)
        }
        FieldWidth::VarInt(n) if widenable => {
            let wide = varint_len(new).max(n);
            let mut tmp = [0u8; 8];
            write_varint_with_len(new, wide, &mut tmp)?;
            buf.splice(field.offset, n, &tmp[..wide])?;
            tracing::trace!(offset = field.offset, from = n, to = wide, "widened varint length");
            Ok(wide - n)
        }
        FieldWidth::VarInt(n) => Err(FaultError::EncodingOverflow {
            value: new,
            width: n,
        }),
    }
}

/// One length field that must follow a size change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSite {
    pub field: LengthField,
    /// Whether a varint field may grow to a wider encoding.
    pub widenable: bool,
}

/// Enclosing length fields, recorded outermost-first.
///
/// Sites must be ordered by increasing offset: an enclosing field always
/// precedes the fields it covers, so widening an inner field never moves an
/// outer one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchList {
    sites: Vec<PatchSite>,
}

impl PatchList {
    pub fn new() -> Self {
        Self { sites: Vec::new() }
    }

    pub fn push(&mut self, field: LengthField, widenable: bool) {
        self.sites.push(PatchSite { field, widenable });
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn sites(&self) -> &[PatchSite] {
        &self.sites
    }

    /// Drop the innermost site.
    pub fn pop(&mut self) -> Option<PatchSite> {
        self.sites.pop()
    }

    /// Shift every recorded offset at or after `from` by `by` bytes.
    pub fn shift_from(&mut self, from: usize, by: isize) {
        for site in &mut self.sites {
            if site.field.offset >= from {
                site.field.offset = site.field.offset.saturating_add_signed(by);
            }
        }
    }

    /// Apply `delta` bytes of growth (negative for shrinkage) to every site,
    /// innermost first. Returns the total size change of the buffer.
    pub fn apply(&self, buf: &mut PacketBuf, delta: isize) -> Result<isize, FaultError> {
        let mut acc = delta;
        for site in self.sites.iter().rev() {
            let grown = rewrite_length_field(buf, &site.field, acc, site.widenable)?;
            acc += grown as isize;
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_read_write() {
        let mut buf = [0u8; 6];
        write_fixed(&mut buf, 1, 3, 0x01_02_03).unwrap();
        assert_eq!(buf, [0, 1, 2, 3, 0, 0]);
        assert_eq!(read_u24(&buf, 1).unwrap(), 0x01_02_03);
        assert_eq!(read_u16(&buf, 2).unwrap(), 0x0203);
        assert_eq!(
            write_fixed(&mut buf, 0, 1, 256),
            Err(FaultError::EncodingOverflow { value: 256, width: 1 })
        );
        assert!(read_fixed(&buf, 5, 2).is_err());
    }

    #[test]
    fn varint_keeps_width_when_shrinking() {
        // 2-byte varint holding 70
        let mut buf = PacketBuf::from_slice(&[0x40, 70, 0xee]).unwrap();
        let field = LengthField::varint_at(&buf, 0).unwrap();
        assert_eq!(rewrite_length_field(&mut buf, &field, -60, false).unwrap(), 0);
        assert_eq!(buf.as_slice(), &[0x40, 10, 0xee]);
    }

    #[test]
    fn varint_overflow_without_widening() {
        let mut buf = PacketBuf::from_slice(&[60]).unwrap();
        let field = LengthField::varint_at(&buf, 0).unwrap();
        assert_eq!(
            rewrite_length_field(&mut buf, &field, 10, false),
            Err(FaultError::EncodingOverflow { value: 70, width: 1 })
        );
    }

    #[test]
    fn varint_widens_when_allowed() {
        let mut buf = PacketBuf::from_slice(&[60, 0xaa]).unwrap();
        let field = LengthField::varint_at(&buf, 0).unwrap();
        assert_eq!(rewrite_length_field(&mut buf, &field, 10, true).unwrap(), 1);
        assert_eq!(buf.as_slice(), &[0x40, 70, 0xaa]);
    }

    #[test]
    fn negative_result_is_malformed() {
        let mut buf = PacketBuf::from_slice(&[0x00, 0x05]).unwrap();
        let field = LengthField::fixed(0, 2);
        assert_eq!(
            rewrite_length_field(&mut buf, &field, -6, false),
            Err(FaultError::MalformedEncoding { offset: 0 })
        );
    }

    #[test]
    fn nested_patch_applies_inner_to_outer() {
        // outer varint(1) = 6 | u24 = 2 | u16 = 0 | ... body grows by 4
        let mut buf = PacketBuf::from_slice(&[6, 0, 0, 2, 0, 0]).unwrap();
        let mut patches = PatchList::new();
        patches.push(LengthField::varint(0, 1), true);
        patches.push(LengthField::fixed(1, 3), false);
        patches.push(LengthField::fixed(4, 2), false);

        let total = patches.apply(&mut buf, 4).unwrap();
        assert_eq!(total, 4);
        assert_eq!(buf.as_slice(), &[10, 0, 0, 6, 0, 4]);
    }

    #[test]
    fn widening_inner_varint_propagates_outward() {
        // outer u16 = 64 covering a 1-byte varint of value 62
        let mut buf = PacketBuf::from_slice(&[0, 64, 62]).unwrap();
        let mut patches = PatchList::new();
        patches.push(LengthField::fixed(0, 2), false);
        patches.push(LengthField::varint(2, 1), true);

        let total = patches.apply(&mut buf, 3).unwrap();
        // inner grows to a 2-byte varint, outer sees 3 + 1
        assert_eq!(total, 4);
        assert_eq!(buf.as_slice(), &[0, 68, 0x40, 65]);
    }

    #[test]
    fn shift_from_moves_later_sites() {
        let mut patches = PatchList::new();
        patches.push(LengthField::fixed(2, 2), false);
        patches.push(LengthField::fixed(10, 2), false);
        patches.shift_from(5, 3);
        assert_eq!(patches.sites()[0].field.offset, 2);
        assert_eq!(patches.sites()[1].field.offset, 13);
    }
}
