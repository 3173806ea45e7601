//! QUIC v1 key derivation: HKDF-Expand-Label, Initial secrets and the
//! per-secret packet keys (RFC 9001 section 5).

use crate::crypto::{CryptoProvider, Hkdf, PacketKeys};
use crate::error::Error;

/// QUIC v1 Initial salt (RFC 9001 section 5.2).
pub const INITIAL_SALT_V1: [u8; 20] = [
    0x38, 0x76, 0x2c, 0xf7, 0xf5, 0x59, 0x34, 0xb3, 0x4d, 0x17, 0x9a, 0xe6, 0xa4, 0xc8, 0x0c,
    0xad, 0xcc, 0xbb, 0x7f, 0x0a,
];

const LABEL_PREFIX: &[u8] = b"tls13 ";

/// HKDF-Expand-Label as defined in RFC 8446 section 7.1.
///
/// Builds the HkdfLabel structure
///   uint16 length = out.len()
///   opaque label<7..255> = "tls13 " + label
///   opaque context<0..255> = context
/// and expands `secret` with it.
pub fn hkdf_expand_label<H: Hkdf>(
    hkdf: &H,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    out: &mut [u8],
) -> Result<(), Error> {
    let full_label_len = LABEL_PREFIX.len() + label.len();
    if full_label_len > 255 || context.len() > 255 || out.len() > u16::MAX as usize {
        return Err(Error::Crypto);
    }

    let mut info: heapless::Vec<u8, 520> = heapless::Vec::new();
    let parts: [&[u8]; 6] = [
        &(out.len() as u16).to_be_bytes(),
        &[full_label_len as u8],
        LABEL_PREFIX,
        label,
        &[context.len() as u8],
        context,
    ];
    for part in parts {
        info.extend_from_slice(part).map_err(|_| Error::Crypto)?;
    }

    hkdf.expand(secret, &info, out)
}

/// Client and server Initial secrets (RFC 9001 section 5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialSecrets {
    pub client: [u8; 32],
    pub server: [u8; 32],
}

/// Initial secrets keyed by the client's first Destination Connection ID.
pub fn initial_secrets<H: Hkdf>(hkdf: &H, dcid: &[u8]) -> Result<InitialSecrets, Error> {
    let mut initial = [0u8; 32];
    hkdf.extract(&INITIAL_SALT_V1, dcid, &mut initial);

    let mut secrets = InitialSecrets {
        client: [0u8; 32],
        server: [0u8; 32],
    };
    hkdf_expand_label(hkdf, &initial, b"client in", &[], &mut secrets.client)?;
    hkdf_expand_label(hkdf, &initial, b"server in", &[], &mut secrets.server)?;
    Ok(secrets)
}

/// Raw "quic key", "quic iv" and "quic hp" output for one traffic secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub key: heapless::Vec<u8, 32>,
    pub iv: [u8; 12],
    pub hp: heapless::Vec<u8, 32>,
}

/// Expand a traffic secret into key material for a suite with the given
/// AEAD and header protection key sizes (at most 32 bytes each).
pub fn key_material<H: Hkdf>(
    hkdf: &H,
    secret: &[u8],
    key_len: usize,
    hp_len: usize,
) -> Result<KeyMaterial, Error> {
    if key_len > 32 || hp_len > 32 {
        return Err(Error::Crypto);
    }
    let mut key = [0u8; 32];
    let mut iv = [0u8; 12];
    let mut hp = [0u8; 32];
    hkdf_expand_label(hkdf, secret, b"quic key", &[], &mut key[..key_len])?;
    hkdf_expand_label(hkdf, secret, b"quic iv", &[], &mut iv)?;
    hkdf_expand_label(hkdf, secret, b"quic hp", &[], &mut hp[..hp_len])?;

    let to_vec = |bytes: &[u8]| heapless::Vec::from_slice(bytes).map_err(|_| Error::Crypto);
    Ok(KeyMaterial {
        key: to_vec(&key[..key_len])?,
        iv,
        hp: to_vec(&hp[..hp_len])?,
    })
}

/// Suite-erased [`PacketKeys`] for one traffic secret.
pub fn packet_keys_for<C: CryptoProvider>(provider: &C, secret: &[u8]) -> Result<PacketKeys, Error> {
    let material = key_material(&provider.hkdf(), secret, C::KEY_LEN, C::HP_KEY_LEN)?;
    Ok(PacketKeys {
        aead: Box::new(provider.aead(&material.key)?),
        header_protection: Box::new(provider.header_protection(&material.hp)?),
        iv: material.iv,
    })
}

/// Client and server Initial keys for a connection.
///
/// Both endpoints, and the interceptor between them, derive the same pair
/// from the client's first DCID.
pub fn initial_keys(dcid: &[u8]) -> Result<(PacketKeys, PacketKeys), Error> {
    use crate::crypto::rustcrypto::{Aes128GcmProvider, HkdfSha256};

    let secrets = initial_secrets(&HkdfSha256, dcid)?;
    Ok((
        packet_keys_for(&Aes128GcmProvider, &secrets.client)?,
        packet_keys_for(&Aes128GcmProvider, &secrets.server)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rustcrypto::HkdfSha256;
    use hex_literal::hex;

    // RFC 9001 Appendix A.1

    #[test]
    fn initial_secrets_match_rfc() {
        let secrets = initial_secrets(&HkdfSha256, &hex!("8394c8f03e515708")).unwrap();
        assert_eq!(
            secrets.client,
            hex!("c00cf151ca5be075ed0ebfb5c80323c42d6b7db67881289af4008f1f6c357aea")
        );
        assert_eq!(
            secrets.server,
            hex!("3c199828fd139efd216c155ad844cc81fb82fa8d7446fa7d78be803acdda951b")
        );
    }

    #[test]
    fn key_material_matches_rfc() {
        let secrets = initial_secrets(&HkdfSha256, &hex!("8394c8f03e515708")).unwrap();

        let client = key_material(&HkdfSha256, &secrets.client, 16, 16).unwrap();
        assert_eq!(client.key[..], hex!("1f369613dd76d5467730efcbe3b1a22d"));
        assert_eq!(client.iv, hex!("fa044b2f42a3fd3b46fb255c"));
        assert_eq!(client.hp[..], hex!("9f50449e04a0e810283a1e9933adedd2"));

        let server = key_material(&HkdfSha256, &secrets.server, 16, 16).unwrap();
        assert_eq!(server.key[..], hex!("cf3a5331653c364c88f0f379b6067e37"));
        assert_eq!(server.iv, hex!("0ac1493ca1905853b0bba03e"));
        assert_eq!(server.hp[..], hex!("c206b8d9b9f0f37644430b490eeaa314"));
    }

    #[test]
    fn key_material_rejects_oversized_keys() {
        assert_eq!(key_material(&HkdfSha256, &[0u8; 32], 33, 16), Err(Error::Crypto));
    }

    #[test]
    fn initial_keys_pair_matches_rfc_ivs() {
        let (client, server) = initial_keys(&hex!("8394c8f03e515708")).unwrap();
        assert_eq!(client.iv, hex!("fa044b2f42a3fd3b46fb255c"));
        assert_eq!(server.iv, hex!("0ac1493ca1905853b0bba03e"));

        // same key material on both sides: what one seals the other opens
        let (peer_client, _) = initial_keys(&hex!("8394c8f03e515708")).unwrap();
        let mut buf = [0u8; 64];
        buf[..4].copy_from_slice(b"ping");
        let nonce = client.nonce(2);
        let ct = client.aead.seal_in_place(&nonce, b"hdr", &mut buf, 4).unwrap();
        let pt = peer_client
            .aead
            .open_in_place(&nonce, b"hdr", &mut buf, ct)
            .unwrap();
        assert_eq!(&buf[..pt], b"ping");
    }

    #[test]
    fn oversized_label_rejected() {
        let mut out = [0u8; 16];
        let label = [b'a'; 250];
        assert_eq!(
            hkdf_expand_label(&HkdfSha256, &[0u8; 32], &label, &[], &mut out),
            Err(Error::Crypto)
        );
    }
}
