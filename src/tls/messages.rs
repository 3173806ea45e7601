//! TLS 1.3 handshake message encoding and decoding.
//!
//! Handshake message format:
//!   HandshakeType (1 byte)
//!   Length (3 bytes, big-endian)
//!   Body (Length bytes)

use crate::crypto::CipherSuite;
use crate::error::{Error, FaultError};
use crate::tls::decode_error;

/// Size of the type + length header in front of every message.
pub const HANDSHAKE_HEADER_LEN: usize = 4;

/// Legacy version field of both hellos.
const LEGACY_VERSION: [u8; 2] = [0x03, 0x03];

/// Largest body a 24-bit length can describe.
const MAX_BODY_LEN: usize = 0x00ff_ffff;

/// TLS handshake message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
    NewSessionTicket = 4,
    EncryptedExtensions = 8,
    Certificate = 11,
    CertificateRequest = 13,
    CertificateVerify = 15,
    Finished = 20,
}

impl HandshakeType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::ClientHello),
            2 => Some(Self::ServerHello),
            4 => Some(Self::NewSessionTicket),
            8 => Some(Self::EncryptedExtensions),
            11 => Some(Self::Certificate),
            13 => Some(Self::CertificateRequest),
            15 => Some(Self::CertificateVerify),
            20 => Some(Self::Finished),
            _ => None,
        }
    }

    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Read the handshake header: returns (type byte, body length).
pub fn read_handshake_header(data: &[u8]) -> Option<(u8, usize)> {
    let header = data.get(..HANDSHAKE_HEADER_LEN)?;
    let length =
        (usize::from(header[1]) << 16) | (usize::from(header[2]) << 8) | usize::from(header[3]);
    Some((header[0], length))
}

/// Total encoded length of the complete message at the start of `data`,
/// or `None` if `data` holds only part of it.
pub fn complete_message_len(data: &[u8]) -> Option<usize> {
    let (_, body_len) = read_handshake_header(data)?;
    let total = HANDSHAKE_HEADER_LEN + body_len;
    (data.len() >= total).then_some(total)
}

/// Frame `body` as a handshake message of type `msg_type`.
pub fn encode_message(msg_type: u8, body: &[u8]) -> Result<Vec<u8>, FaultError> {
    if body.len() > MAX_BODY_LEN {
        return Err(FaultError::EncodingOverflow {
            value: body.len() as u64,
            width: 3,
        });
    }
    let mut out = Vec::with_capacity(HANDSHAKE_HEADER_LEN + body.len());
    out.push(msg_type);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(body);
    Ok(out)
}

fn push_extension_block(body: &mut Vec<u8>, extensions: &[u8]) -> Result<(), Error> {
    let len = u16::try_from(extensions.len()).map_err(|_| FaultError::EncodingOverflow {
        value: extensions.len() as u64,
        width: 2,
    })?;
    body.extend_from_slice(&len.to_be_bytes());
    body.extend_from_slice(extensions);
    Ok(())
}

/// Cursor over a message body; every shortfall is a `decode_error` alert.
struct Reader<'a> {
    data: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, off: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let bytes = self
            .data
            .get(self.off..self.off + len)
            .ok_or_else(|| decode_error(()))?;
        self.off += len;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, Error> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn vec8(&mut self) -> Result<&'a [u8], Error> {
        let len = self.u8()?;
        self.take(usize::from(len))
    }

    fn vec16(&mut self) -> Result<&'a [u8], Error> {
        let len = self.u16()?;
        self.take(usize::from(len))
    }

    fn finish(&self) -> Result<(), Error> {
        if self.off == self.data.len() {
            Ok(())
        } else {
            Err(decode_error(()))
        }
    }
}

/// Parsed ClientHello body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHello<'a> {
    pub random: &'a [u8],
    pub session_id: &'a [u8],
    /// Raw cipher suite list: pairs of bytes.
    pub cipher_suites: &'a [u8],
    pub extensions: &'a [u8],
}

impl ClientHello<'_> {
    pub fn cipher_suites(&self) -> impl Iterator<Item = u16> + '_ {
        self.cipher_suites
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
    }
}

/// Parsed ServerHello body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHello<'a> {
    pub random: &'a [u8],
    pub session_id: &'a [u8],
    pub cipher_suite: u16,
    pub extensions: &'a [u8],
}

/// Encode a ClientHello message.
pub fn encode_client_hello(
    random: &[u8; 32],
    cipher_suites: &[CipherSuite],
    extensions: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    body.extend_from_slice(&LEGACY_VERSION);
    body.extend_from_slice(random);
    // QUIC forbids the legacy session id
    body.push(0);
    body.extend_from_slice(&((cipher_suites.len() * 2) as u16).to_be_bytes());
    for suite in cipher_suites {
        body.extend_from_slice(&suite.to_u16().to_be_bytes());
    }
    // one null compression method
    body.extend_from_slice(&[1, 0]);
    push_extension_block(&mut body, extensions)?;
    Ok(encode_message(HandshakeType::ClientHello.to_u8(), &body)?)
}

/// Parse a ClientHello body (after the 4-byte header).
pub fn parse_client_hello(data: &[u8]) -> Result<ClientHello<'_>, Error> {
    let mut r = Reader::new(data);
    r.take(2)?;
    let random = r.take(32)?;
    let session_id = r.vec8()?;
    let cipher_suites = r.vec16()?;
    r.vec8()?;
    let extensions = r.vec16()?;
    r.finish()?;
    Ok(ClientHello {
        random,
        session_id,
        cipher_suites,
        extensions,
    })
}

/// Encode a ServerHello message.
pub fn encode_server_hello(
    random: &[u8; 32],
    session_id: &[u8],
    cipher_suite: CipherSuite,
    extensions: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    body.extend_from_slice(&LEGACY_VERSION);
    body.extend_from_slice(random);
    body.push(session_id.len() as u8);
    body.extend_from_slice(session_id);
    body.extend_from_slice(&cipher_suite.to_u16().to_be_bytes());
    body.push(0);
    push_extension_block(&mut body, extensions)?;
    Ok(encode_message(HandshakeType::ServerHello.to_u8(), &body)?)
}

/// Parse a ServerHello body (after the 4-byte header).
pub fn parse_server_hello(data: &[u8]) -> Result<ServerHello<'_>, Error> {
    let mut r = Reader::new(data);
    r.take(2)?;
    let random = r.take(32)?;
    let session_id = r.vec8()?;
    let cipher_suite = r.u16()?;
    r.u8()?;
    let extensions = r.vec16()?;
    r.finish()?;
    Ok(ServerHello {
        random,
        session_id,
        cipher_suite,
        extensions,
    })
}

/// Encode an EncryptedExtensions message around an encoded extension list.
pub fn encode_encrypted_extensions(extensions: &[u8]) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    push_extension_block(&mut body, extensions)?;
    Ok(encode_message(
        HandshakeType::EncryptedExtensions.to_u8(),
        &body,
    )?)
}

/// Parse an EncryptedExtensions body; returns the raw extension list.
pub fn parse_encrypted_extensions(data: &[u8]) -> Result<&[u8], Error> {
    let mut r = Reader::new(data);
    let extensions = r.vec16()?;
    r.finish()?;
    Ok(extensions)
}

pub fn encode_finished(verify_data: &[u8]) -> Result<Vec<u8>, Error> {
    Ok(encode_message(HandshakeType::Finished.to_u8(), verify_data)?)
}

/// Parse a Finished body; SHA-256 suites carry 32 bytes of verify_data.
pub fn parse_finished(data: &[u8]) -> Result<&[u8; 32], Error> {
    data.try_into().map_err(decode_error)
}
