//! Growable byte buffer for in-flight packet plaintext.
//!
//! `PacketBuf` wraps a `Vec<u8>` whose logical length is only changed through
//! explicit operations. Growth goes through `try_reserve` so an allocator
//! refusal surfaces as [`FaultError::AllocationError`] instead of aborting.

use core::ops::{Deref, DerefMut};

use crate::error::FaultError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketBuf {
    data: Vec<u8>,
}

impl PacketBuf {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, FaultError> {
        let mut buf = Self::new();
        buf.extend_from_slice(bytes)?;
        Ok(buf)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    fn reserve(&mut self, additional: usize) -> Result<(), FaultError> {
        self.data
            .try_reserve(additional)
            .map_err(|_| FaultError::AllocationError {
                requested: self.data.len().saturating_add(additional),
            })
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<usize, FaultError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(end),
            _ => Err(FaultError::RangeError {
                offset,
                len,
                buf_len: self.data.len(),
            }),
        }
    }

    /// Set the logical length. New bytes are zero; shrinking drops the tail.
    pub fn resize(&mut self, new_len: usize) -> Result<(), FaultError> {
        if new_len > self.data.len() {
            self.reserve(new_len - self.data.len())?;
        }
        self.data.resize(new_len, 0);
        Ok(())
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<(), FaultError> {
        self.reserve(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Insert `bytes` at `offset`, shifting the tail right.
    pub fn insert(&mut self, offset: usize, bytes: &[u8]) -> Result<(), FaultError> {
        self.check_range(offset, 0)?;
        self.reserve(bytes.len())?;
        self.data.splice(offset..offset, bytes.iter().copied());
        Ok(())
    }

    /// Remove `count` bytes starting at `offset`, shifting the tail left.
    pub fn remove(&mut self, offset: usize, count: usize) -> Result<(), FaultError> {
        let end = self.check_range(offset, count)?;
        self.data.drain(offset..end);
        Ok(())
    }

    /// Replace `old_len` bytes at `offset` with `bytes`, which may differ in length.
    pub fn splice(&mut self, offset: usize, old_len: usize, bytes: &[u8]) -> Result<(), FaultError> {
        let end = self.check_range(offset, old_len)?;
        if bytes.len() > old_len {
            self.reserve(bytes.len() - old_len)?;
        }
        self.data.splice(offset..end, bytes.iter().copied());
        Ok(())
    }

    /// Borrow `len` bytes at `offset`.
    pub fn range(&self, offset: usize, len: usize) -> Result<&[u8], FaultError> {
        let end = self.check_range(offset, len)?;
        Ok(&self.data[offset..end])
    }
}

impl Deref for PacketBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PacketBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl AsRef<[u8]> for PacketBuf {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_grows_zero_filled() {
        let mut buf = PacketBuf::from_slice(&[1, 2, 3]).unwrap();
        buf.resize(6).unwrap();
        assert_eq!(buf.as_slice(), &[1, 2, 3, 0, 0, 0]);
    }

    #[test]
    fn resize_shrinks_logical_length() {
        let mut buf = PacketBuf::from_slice(&[1, 2, 3, 4]).unwrap();
        let cap = buf.capacity();
        buf.resize(2).unwrap();
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.as_slice(), &[1, 2]);
        assert!(buf.capacity() >= cap.min(2));
    }

    #[test]
    fn grow_then_prepend_shifts_tail() {
        let original = [0xaa, 0xbb, 0xcc];
        let mut buf = PacketBuf::from_slice(&original).unwrap();
        let len = buf.len();
        buf.resize(len + 2).unwrap();
        buf.copy_within(0..len, 2);
        buf[..2].copy_from_slice(&[0x01, 0x02]);
        assert_eq!(buf.as_slice(), &[0x01, 0x02, 0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn insert_in_the_middle() {
        let mut buf = PacketBuf::from_slice(&[1, 4]).unwrap();
        buf.insert(1, &[2, 3]).unwrap();
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
        // insert at end is allowed
        buf.insert(4, &[5]).unwrap();
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn insert_past_end_is_range_error() {
        let mut buf = PacketBuf::from_slice(&[1, 2]).unwrap();
        assert_eq!(
            buf.insert(3, &[9]),
            Err(FaultError::RangeError {
                offset: 3,
                len: 0,
                buf_len: 2
            })
        );
    }

    #[test]
    fn remove_range() {
        let mut buf = PacketBuf::from_slice(&[1, 2, 3, 4, 5]).unwrap();
        buf.remove(1, 3).unwrap();
        assert_eq!(buf.as_slice(), &[1, 5]);
        assert!(buf.remove(1, 2).is_err());
        assert!(buf.remove(usize::MAX, 2).is_err());
    }

    #[test]
    fn splice_changes_length() {
        let mut buf = PacketBuf::from_slice(&[1, 2, 3, 4]).unwrap();
        buf.splice(1, 2, &[7, 7, 7, 7]).unwrap();
        assert_eq!(buf.as_slice(), &[1, 7, 7, 7, 7, 4]);
        buf.splice(1, 4, &[]).unwrap();
        assert_eq!(buf.as_slice(), &[1, 4]);
        assert!(buf.splice(1, 2, &[0]).is_err());
    }
}
