//! TLS 1.3 key schedule (RFC 8446 section 7.1), SHA-256 only.
//!
//! ```text
//!             0
//!             |
//!   0 ->  HKDF-Extract = Early Secret
//!             |
//!   ECDHE -> HKDF-Extract = Handshake Secret
//!             +-> Derive-Secret(., "c hs traffic", CH..SH)
//!             +-> Derive-Secret(., "s hs traffic", CH..SH)
//!             |
//!   0  ->  HKDF-Extract = Master Secret
//!             +-> Derive-Secret(., "c ap traffic", CH..SF)
//!             +-> Derive-Secret(., "s ap traffic", CH..SF)
//! ```

use crate::crypto::key_schedule::hkdf_expand_label;
use crate::crypto::Hkdf;
use crate::error::Error;
use crate::tls::transcript::{empty_hash, HASH_LEN};

type Secret = [u8; HASH_LEN];

/// Client and server secrets for one stage of the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficSecrets {
    pub client: Secret,
    pub server: Secret,
}

/// Where the schedule is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Early,
    Handshake,
    Master,
}

/// TLS 1.3 key schedule state.
pub struct TlsKeySchedule {
    stage: Stage,
    secret: Secret,
}

impl TlsKeySchedule {
    /// Start without a PSK: Early Secret = HKDF-Extract(0, 0).
    pub fn new<H: Hkdf>(hkdf: &H) -> Self {
        let mut secret = [0u8; HASH_LEN];
        hkdf.extract(&[0u8; HASH_LEN], &[0u8; HASH_LEN], &mut secret);
        Self {
            stage: Stage::Early,
            secret,
        }
    }

    /// Derive-Secret(current, "derived", "") as the salt of the next extract.
    fn advance<H: Hkdf>(&mut self, hkdf: &H, ikm: &[u8], next: Stage) -> Result<(), Error> {
        let mut salt = [0u8; HASH_LEN];
        hkdf_expand_label(hkdf, &self.secret, b"derived", &empty_hash(), &mut salt)?;
        hkdf.extract(&salt, ikm, &mut self.secret);
        self.stage = next;
        Ok(())
    }

    fn traffic<H: Hkdf>(
        &self,
        hkdf: &H,
        labels: (&[u8], &[u8]),
        transcript_hash: &Secret,
    ) -> Result<TrafficSecrets, Error> {
        let mut secrets = TrafficSecrets {
            client: [0u8; HASH_LEN],
            server: [0u8; HASH_LEN],
        };
        hkdf_expand_label(hkdf, &self.secret, labels.0, transcript_hash, &mut secrets.client)?;
        hkdf_expand_label(hkdf, &self.secret, labels.1, transcript_hash, &mut secrets.server)?;
        Ok(secrets)
    }

    /// Mix in the ECDHE shared secret and derive the handshake traffic
    /// secrets over the ClientHello..ServerHello transcript.
    pub fn handshake_secrets<H: Hkdf>(
        &mut self,
        hkdf: &H,
        shared_secret: &[u8; 32],
        transcript_hash: &Secret,
    ) -> Result<TrafficSecrets, Error> {
        if self.stage != Stage::Early {
            return Err(Error::InvalidState);
        }
        self.advance(hkdf, shared_secret, Stage::Handshake)?;
        self.traffic(hkdf, (b"c hs traffic", b"s hs traffic"), transcript_hash)
    }

    /// Move to the master secret and derive the application traffic secrets
    /// over the ClientHello..server Finished transcript.
    pub fn application_secrets<H: Hkdf>(
        &mut self,
        hkdf: &H,
        transcript_hash: &Secret,
    ) -> Result<TrafficSecrets, Error> {
        if self.stage != Stage::Handshake {
            return Err(Error::InvalidState);
        }
        self.advance(hkdf, &[0u8; HASH_LEN], Stage::Master)?;
        self.traffic(hkdf, (b"c ap traffic", b"s ap traffic"), transcript_hash)
    }
}

/// finished_key = HKDF-Expand-Label(traffic_secret, "finished", "", Hash.length)
pub fn finished_key<H: Hkdf>(hkdf: &H, traffic_secret: &Secret) -> Result<Secret, Error> {
    let mut key = [0u8; HASH_LEN];
    hkdf_expand_label(hkdf, traffic_secret, b"finished", &[], &mut key)?;
    Ok(key)
}

/// Finished verify_data = HMAC(finished_key, transcript_hash).
///
/// HKDF-Extract(salt, ikm) is HMAC(salt, ikm), so the extract step computes it.
pub fn finished_verify_data<H: Hkdf>(
    hkdf: &H,
    traffic_secret: &Secret,
    transcript_hash: &Secret,
) -> Result<Secret, Error> {
    let key = finished_key(hkdf, traffic_secret)?;
    let mut verify_data = [0u8; HASH_LEN];
    hkdf.extract(&key, transcript_hash, &mut verify_data);
    Ok(verify_data)
}

/// Constant-time comparison of two byte slices.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}
