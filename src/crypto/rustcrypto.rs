//! RustCrypto backends: HKDF-SHA256, AES-128-GCM with AES-ECB header
//! protection and, behind `rustcrypto-chacha`, ChaCha20-Poly1305.

use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::AeadInPlace;

use crate::crypto::{Aead as AeadTrait, CryptoProvider, HeaderProtection, Hkdf as HkdfTrait};
use crate::error::Error;

const TAG_LEN: usize = 16;

// ---- HKDF-SHA256 ----

/// HKDF using SHA-256 (via the `hkdf` crate).
pub struct HkdfSha256;

impl HkdfTrait for HkdfSha256 {
    fn extract(&self, salt: &[u8], ikm: &[u8], prk: &mut [u8]) {
        let (out, _) = hkdf::Hkdf::<sha2::Sha256>::extract(Some(salt), ikm);
        prk[..32].copy_from_slice(&out);
    }

    fn expand(&self, prk: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), Error> {
        let hk = hkdf::Hkdf::<sha2::Sha256>::from_prk(prk).map_err(|_| Error::Crypto)?;
        hk.expand(info, okm).map_err(|_| Error::Crypto)
    }
}

// ---- AEAD ----

/// Any RustCrypto AEAD with a 96-bit nonce and a 16-byte tag, with the tag
/// carried directly after the ciphertext as QUIC lays it out.
pub struct RustCryptoAead<C> {
    cipher: C,
}

pub type Aes128GcmAead = RustCryptoAead<aes_gcm::Aes128Gcm>;

#[cfg(feature = "rustcrypto-chacha")]
pub type ChaCha20Poly1305Aead = RustCryptoAead<chacha20poly1305::ChaCha20Poly1305>;

impl<C> AeadTrait for RustCryptoAead<C>
where
    C: AeadInPlace<NonceSize = U12, TagSize = U16>,
{
    fn seal_in_place(
        &self,
        nonce: &[u8; 12],
        aad: &[u8],
        buf: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, Error> {
        let total = payload_len + TAG_LEN;
        if buf.len() < total {
            return Err(Error::BufferTooSmall { needed: total });
        }
        let tag = self
            .cipher
            .encrypt_in_place_detached(nonce.into(), aad, &mut buf[..payload_len])
            .map_err(|_| Error::Crypto)?;
        buf[payload_len..total].copy_from_slice(&tag);
        Ok(total)
    }

    fn open_in_place(
        &self,
        nonce: &[u8; 12],
        aad: &[u8],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<usize, Error> {
        if ciphertext_len < TAG_LEN || ciphertext_len > buf.len() {
            return Err(Error::Crypto);
        }
        let plaintext_len = ciphertext_len - TAG_LEN;
        let (body, rest) = buf.split_at_mut(plaintext_len);
        let tag = GenericArray::from_slice(&rest[..TAG_LEN]);
        self.cipher
            .decrypt_in_place_detached(nonce.into(), aad, body, tag)
            .map_err(|_| Error::Crypto)?;
        Ok(plaintext_len)
    }
}

// ---- AES Header Protection ----

/// AES-128-ECB header protection.
pub struct AesHeaderProtection {
    cipher: aes::Aes128,
}

impl HeaderProtection for AesHeaderProtection {
    fn mask(&self, sample: &[u8; 16]) -> [u8; 5] {
        use aes::cipher::BlockEncrypt;

        let mut block = aes::Block::from(*sample);
        self.cipher.encrypt_block(&mut block);
        let mut mask = [0u8; 5];
        mask.copy_from_slice(&block[..5]);
        mask
    }
}

// ---- ChaCha20 Header Protection ----

#[cfg(feature = "rustcrypto-chacha")]
/// ChaCha20 header protection.
pub struct ChaChaHeaderProtection {
    key: [u8; 32],
}

#[cfg(feature = "rustcrypto-chacha")]
impl HeaderProtection for ChaChaHeaderProtection {
    fn mask(&self, sample: &[u8; 16]) -> [u8; 5] {
        use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};

        // counter = sample[0..4] little-endian, nonce = sample[4..16]
        let counter = u32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]);
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&sample[4..16]);

        let mut cipher = chacha20::ChaCha20::new((&self.key).into(), (&nonce).into());
        cipher.seek(u64::from(counter) * 64);

        let mut mask = [0u8; 5];
        cipher.apply_keystream(&mut mask);
        mask
    }
}

// ---- CryptoProvider bundles ----

/// AES-128-GCM cipher suite provider.
pub struct Aes128GcmProvider;

impl CryptoProvider for Aes128GcmProvider {
    type Aead = Aes128GcmAead;
    type Hkdf = HkdfSha256;
    type HeaderProtection = AesHeaderProtection;

    const KEY_LEN: usize = 16;
    const HP_KEY_LEN: usize = 16;

    fn aead(&self, key: &[u8]) -> Result<Self::Aead, Error> {
        use aes_gcm::KeyInit;
        let cipher = aes_gcm::Aes128Gcm::new_from_slice(key).map_err(|_| Error::Crypto)?;
        Ok(Aes128GcmAead { cipher })
    }

    fn hkdf(&self) -> Self::Hkdf {
        HkdfSha256
    }

    fn header_protection(&self, key: &[u8]) -> Result<Self::HeaderProtection, Error> {
        use aes::cipher::KeyInit;
        let cipher = aes::Aes128::new_from_slice(key).map_err(|_| Error::Crypto)?;
        Ok(AesHeaderProtection { cipher })
    }
}

#[cfg(feature = "rustcrypto-chacha")]
/// ChaCha20-Poly1305 cipher suite provider.
pub struct ChaCha20Provider;

#[cfg(feature = "rustcrypto-chacha")]
impl CryptoProvider for ChaCha20Provider {
    type Aead = ChaCha20Poly1305Aead;
    type Hkdf = HkdfSha256;
    type HeaderProtection = ChaChaHeaderProtection;

    const KEY_LEN: usize = 32;
    const HP_KEY_LEN: usize = 32;

    fn aead(&self, key: &[u8]) -> Result<Self::Aead, Error> {
        use chacha20poly1305::KeyInit;
        let cipher =
            chacha20poly1305::ChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::Crypto)?;
        Ok(ChaCha20Poly1305Aead { cipher })
    }

    fn hkdf(&self) -> Self::Hkdf {
        HkdfSha256
    }

    fn header_protection(&self, key: &[u8]) -> Result<Self::HeaderProtection, Error> {
        let key: [u8; 32] = key.try_into().map_err(|_| Error::Crypto)?;
        Ok(ChaChaHeaderProtection { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn seal_open(aead: &dyn AeadTrait) {
        let nonce = [3u8; 12];
        let aad = b"associated data";
        let plaintext = b"hello world";

        let mut buf = [0u8; 64];
        buf[..plaintext.len()].copy_from_slice(plaintext);
        let ct_len = aead
            .seal_in_place(&nonce, aad, &mut buf, plaintext.len())
            .unwrap();
        assert_eq!(ct_len, plaintext.len() + 16);
        assert_ne!(&buf[..plaintext.len()], plaintext);

        let pt_len = aead.open_in_place(&nonce, aad, &mut buf, ct_len).unwrap();
        assert_eq!(&buf[..pt_len], plaintext);

        // wrong aad must fail
        let ct_len = aead
            .seal_in_place(&nonce, aad, &mut buf, plaintext.len())
            .unwrap();
        assert_eq!(
            aead.open_in_place(&nonce, b"other", &mut buf, ct_len),
            Err(Error::Crypto)
        );
    }

    #[test]
    fn aes128gcm_roundtrip_and_auth() {
        let aead = Aes128GcmProvider.aead(&[0x42u8; 16]).unwrap();
        seal_open(&aead);
    }

    #[test]
    fn aes128gcm_short_ciphertext() {
        let aead = Aes128GcmProvider.aead(&[0x42u8; 16]).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(
            aead.open_in_place(&[0; 12], &[], &mut buf, 8),
            Err(Error::Crypto)
        );
        assert_eq!(
            aead.seal_in_place(&[0; 12], &[], &mut buf, 4),
            Err(Error::BufferTooSmall { needed: 20 })
        );
    }

    #[test]
    fn aes_rejects_wrong_key_length() {
        assert!(Aes128GcmProvider.aead(&[0u8; 15]).is_err());
        assert!(Aes128GcmProvider.header_protection(&[0u8; 32]).is_err());
    }

    /// RFC 9001 A.2 / A.3 header protection masks.
    #[test]
    fn aes_header_protection_rfc_vectors() {
        let hp = Aes128GcmProvider
            .header_protection(&hex!("9f50449e04a0e810283a1e9933adedd2"))
            .unwrap();
        assert_eq!(
            hp.mask(&hex!("d1b1c98dd7689fb8ec11d242b123dc9b")),
            hex!("437b9aec36")
        );

        let hp = Aes128GcmProvider
            .header_protection(&hex!("c206b8d9b9f0f37644430b490eeaa314"))
            .unwrap();
        assert_eq!(
            hp.mask(&hex!("2cd0991cd25b0aac406a5816b6394100")),
            hex!("2ec0d8356a")
        );
    }

    #[cfg(feature = "rustcrypto-chacha")]
    #[test]
    fn chacha20poly1305_roundtrip_and_auth() {
        let aead = ChaCha20Provider.aead(&[0x42u8; 32]).unwrap();
        seal_open(&aead);
    }

    /// RFC 9001 A.5 ChaCha20 header protection.
    #[cfg(feature = "rustcrypto-chacha")]
    #[test]
    fn chacha_header_protection_rfc_vector() {
        let hp = ChaCha20Provider
            .header_protection(&hex!(
                "25a282b9e82f06f21f488917a4fc8f1b73573685608597d0efcb076b0ab7a7a4"
            ))
            .unwrap();
        assert_eq!(
            hp.mask(&hex!("5e5cd55c41f69080575d7999c25a5bfb")),
            hex!("aefefe7d03")
        );
    }
}
