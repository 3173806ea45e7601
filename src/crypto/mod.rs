//! Packet protection primitives.
//!
//! The interceptor opens and reseals packets with exactly the keys the
//! sending endpoint holds, so both sides share these types. A
//! [`CryptoProvider`] builds the primitives for one cipher suite;
//! [`PacketKeys`] erases the suite so any level's keys fit one type.

pub mod key_schedule;
pub mod rustcrypto;

use crate::error::Error;

/// In-place AEAD over a packet body.
pub trait Aead {
    /// 16 for every QUIC v1 suite.
    fn tag_len(&self) -> usize {
        16
    }

    /// Encrypt `buf[..payload_len]` and append the tag; `buf` must have
    /// room for it. Returns ciphertext plus tag length.
    fn seal_in_place(
        &self,
        nonce: &[u8; 12],
        aad: &[u8],
        buf: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, Error>;

    /// Decrypt `buf[..ciphertext_len]` (tag included). Returns the
    /// plaintext length; a bad tag is `Error::Crypto`.
    fn open_in_place(
        &self,
        nonce: &[u8; 12],
        aad: &[u8],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<usize, Error>;
}

/// HKDF over the suite hash (RFC 5869).
pub trait Hkdf {
    fn extract(&self, salt: &[u8], ikm: &[u8], prk: &mut [u8]);

    fn expand(&self, prk: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), Error>;
}

/// Header protection mask from a 16-byte ciphertext sample.
///
/// Byte 0 masks the first header byte, bytes 1..5 the packet number.
pub trait HeaderProtection {
    fn mask(&self, sample: &[u8; 16]) -> [u8; 5];
}

/// Encryption level; selects the key set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Initial,
    Handshake,
    /// 1-RTT application data.
    Application,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Initial, Level::Handshake, Level::Application];

    /// Array slot for per-level state.
    pub const fn index(self) -> usize {
        match self {
            Level::Initial => 0,
            Level::Handshake => 1,
            Level::Application => 2,
        }
    }
}

/// Bundle of cryptographic primitives needed by QUIC.
///
/// Implementations provide AEAD, HKDF, and header protection
/// for a specific cipher suite.
pub trait CryptoProvider {
    type Aead: Aead + 'static;
    type Hkdf: Hkdf;
    type HeaderProtection: HeaderProtection + 'static;

    /// AEAD key length in bytes.
    const KEY_LEN: usize;
    /// Header protection key length in bytes.
    const HP_KEY_LEN: usize;

    /// Create an AEAD instance from a key.
    fn aead(&self, key: &[u8]) -> Result<Self::Aead, Error>;

    /// Get an HKDF instance for key derivation.
    fn hkdf(&self) -> Self::Hkdf;

    /// Create a header protection cipher from a key.
    fn header_protection(&self, key: &[u8]) -> Result<Self::HeaderProtection, Error>;
}

/// Keys for one direction (send or recv) at one encryption level.
pub struct PacketKeys {
    pub aead: Box<dyn Aead>,
    pub header_protection: Box<dyn HeaderProtection>,
    /// Nonce base, XORed with the packet number.
    pub iv: [u8; 12],
}

impl PacketKeys {
    /// Compute the AEAD nonce for a given packet number.
    ///
    /// The nonce is formed by XORing the IV with the packet number
    /// (left-padded to 12 bytes).
    pub fn nonce(&self, packet_number: u64) -> [u8; 12] {
        let mut nonce = self.iv;
        for (n, p) in nonce[4..].iter_mut().zip(packet_number.to_be_bytes()) {
            *n ^= p;
        }
        nonce
    }
}

impl core::fmt::Debug for PacketKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PacketKeys").finish_non_exhaustive()
    }
}

/// TLS 1.3 cipher suites usable for QUIC packet protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    Aes128GcmSha256,
    #[cfg(feature = "rustcrypto-chacha")]
    ChaCha20Poly1305Sha256,
}

impl CipherSuite {
    pub const fn to_u16(self) -> u16 {
        match self {
            CipherSuite::Aes128GcmSha256 => 0x1301,
            #[cfg(feature = "rustcrypto-chacha")]
            CipherSuite::ChaCha20Poly1305Sha256 => 0x1303,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1301 => Some(CipherSuite::Aes128GcmSha256),
            #[cfg(feature = "rustcrypto-chacha")]
            0x1303 => Some(CipherSuite::ChaCha20Poly1305Sha256),
            _ => None,
        }
    }

    /// Derive packet protection keys for this suite from a traffic secret.
    pub fn packet_keys(self, secret: &[u8]) -> Result<PacketKeys, Error> {
        match self {
            CipherSuite::Aes128GcmSha256 => {
                key_schedule::packet_keys_for(&rustcrypto::Aes128GcmProvider, secret)
            }
            #[cfg(feature = "rustcrypto-chacha")]
            CipherSuite::ChaCha20Poly1305Sha256 => {
                key_schedule::packet_keys_for(&rustcrypto::ChaCha20Provider, secret)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_xors_low_bytes() {
        let keys = CipherSuite::Aes128GcmSha256.packet_keys(&[7u8; 32]).unwrap();
        assert_eq!(keys.nonce(0), keys.iv);
        let n = keys.nonce(0x0102);
        assert_eq!(n[10], keys.iv[10] ^ 0x01);
        assert_eq!(n[11], keys.iv[11] ^ 0x02);
        assert_eq!(&n[..10], &keys.iv[..10]);
    }

    #[test]
    fn suite_codes() {
        assert_eq!(CipherSuite::from_u16(0x1301), Some(CipherSuite::Aes128GcmSha256));
        assert_eq!(CipherSuite::Aes128GcmSha256.to_u16(), 0x1301);
        assert_eq!(CipherSuite::from_u16(0x1302), None);
    }
}
