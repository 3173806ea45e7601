//! Running transcript hash for the TLS 1.3 handshake.
//!
//! Every handshake message, header included, is fed in order. Intermediate
//! hashes come from finalizing a clone of the state.

use sha2::{Digest, Sha256};

/// SHA-256 output length.
pub const HASH_LEN: usize = 32;

/// SHA-256 of the empty string, used by `Derive-Secret(., "derived", "")`.
pub fn empty_hash() -> [u8; HASH_LEN] {
    TranscriptHash::new().current_hash()
}

/// Running SHA-256 transcript over handshake messages.
#[derive(Clone, Default)]
pub struct TranscriptHash {
    hasher: Sha256,
    messages: usize,
}

impl TranscriptHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one complete handshake message.
    pub fn update(&mut self, message: &[u8]) {
        self.hasher.update(message);
        self.messages += 1;
    }

    /// Hash of everything fed so far; the running state is left untouched.
    pub fn current_hash(&self) -> [u8; HASH_LEN] {
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&self.hasher.clone().finalize());
        out
    }

    /// Number of messages fed so far.
    pub fn message_count(&self) -> usize {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn empty_transcript_is_sha256_of_nothing() {
        let expected = hex!("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
        assert_eq!(TranscriptHash::new().current_hash(), expected);
        assert_eq!(empty_hash(), expected);
    }

    #[test]
    fn incremental_equals_one_shot() {
        let mut t = TranscriptHash::new();
        t.update(b"hello");
        let partial = t.current_hash();
        t.update(b" world");

        assert_ne!(partial, t.current_hash());
        assert_eq!(&t.current_hash()[..], &Sha256::digest(b"hello world")[..]);
        assert_eq!(t.message_count(), 2);
    }
}
