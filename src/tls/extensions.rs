//! TLS 1.3 extension encoding and decoding for QUIC.
//!
//! Extension format: type (2 bytes) + length (2 bytes) + data. A message
//! carries them in a block prefixed by a 2-byte total length.

use crate::error::{Error, FaultError};
use crate::tls::transport_params::TransportParams;
use crate::tls::{decode_error, AlertDescription};

/// Extension type codepoints.
#[derive(Debug, Clone, Copy)]
pub struct ExtensionType;

impl ExtensionType {
    pub const SERVER_NAME: u16 = 0x0000;
    pub const SUPPORTED_GROUPS: u16 = 0x000a;
    pub const SIGNATURE_ALGORITHMS: u16 = 0x000d;
    pub const ALPN: u16 = 0x0010;
    pub const SUPPORTED_VERSIONS: u16 = 0x002b;
    pub const KEY_SHARE: u16 = 0x0033;
    pub const QUIC_TRANSPORT_PARAMETERS: u16 = 0x0039;
}

/// Named group for X25519.
pub const GROUP_X25519: u16 = 0x001d;

/// TLS 1.3 in `supported_versions`.
pub const TLS13_VERSION: u16 = 0x0304;

/// Iterator over the (type, body) pairs of an extension block.
///
/// The block excludes its own 2-byte length prefix. Iteration stops at the
/// first truncated entry with [`FaultError::MalformedHandshake`].
pub struct Extensions<'a> {
    block: &'a [u8],
    off: usize,
}

impl<'a> Extensions<'a> {
    pub fn new(block: &'a [u8]) -> Self {
        Self { block, off: 0 }
    }
}

impl<'a> Iterator for Extensions<'a> {
    type Item = Result<(u16, &'a [u8]), FaultError>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.block.get(self.off..)?;
        if rest.is_empty() {
            return None;
        }
        if rest.len() < 4 {
            self.off = self.block.len();
            return Some(Err(FaultError::MalformedHandshake("truncated extension header")));
        }
        let ty = u16::from_be_bytes([rest[0], rest[1]]);
        let len = usize::from(u16::from_be_bytes([rest[2], rest[3]]));
        let Some(body) = rest.get(4..4 + len) else {
            self.off = self.block.len();
            return Some(Err(FaultError::MalformedHandshake("extension overruns block")));
        };
        self.off += 4 + len;
        Some(Ok((ty, body)))
    }
}

/// Append one extension to `out`.
pub fn push_extension(out: &mut Vec<u8>, ty: u16, body: &[u8]) -> Result<(), Error> {
    let len = u16::try_from(body.len()).map_err(|_| FaultError::EncodingOverflow {
        value: body.len() as u64,
        width: 2,
    })?;
    out.extend_from_slice(&ty.to_be_bytes());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(body);
    Ok(())
}

fn alpn_list(protocols: &[Vec<u8>]) -> Result<Vec<u8>, Error> {
    let mut list = Vec::new();
    for proto in protocols {
        let len = u8::try_from(proto.len()).map_err(|_| Error::Alert(AlertDescription::InternalError))?;
        list.push(len);
        list.extend_from_slice(proto);
    }
    let mut body = Vec::with_capacity(2 + list.len());
    body.extend_from_slice(&(list.len() as u16).to_be_bytes());
    body.extend_from_slice(&list);
    Ok(body)
}

fn parse_alpn_list(body: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
    let list_len = usize::from(u16::from_be_bytes([
        *body.first().ok_or_else(|| decode_error(()))?,
        *body.get(1).ok_or_else(|| decode_error(()))?,
    ]));
    let mut list = body.get(2..2 + list_len).ok_or_else(|| decode_error(()))?;
    let mut protocols = Vec::new();
    while let Some((&len, rest)) = list.split_first() {
        let proto = rest.get(..usize::from(len)).ok_or_else(|| decode_error(()))?;
        protocols.push(proto.to_vec());
        list = &rest[usize::from(len)..];
    }
    Ok(protocols)
}

/// Extensions a ClientHello carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHelloExtensions {
    pub key_share: Option<[u8; 32]>,
    pub supports_tls13: bool,
    pub alpn_protocols: Vec<Vec<u8>>,
    pub transport_params: Option<TransportParams>,
}

/// Encode ClientHello extensions: supported_versions, supported_groups,
/// key_share, ALPN and QUIC transport parameters.
pub fn encode_client_hello_extensions(
    public_key: &[u8; 32],
    alpn: &[Vec<u8>],
    transport_params: &TransportParams,
) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();

    // list length + TLS 1.3
    let mut versions = vec![2];
    versions.extend_from_slice(&TLS13_VERSION.to_be_bytes());
    push_extension(&mut out, ExtensionType::SUPPORTED_VERSIONS, &versions)?;

    let mut groups = 2u16.to_be_bytes().to_vec();
    groups.extend_from_slice(&GROUP_X25519.to_be_bytes());
    push_extension(&mut out, ExtensionType::SUPPORTED_GROUPS, &groups)?;

    // client_shares: length(2) + group(2) + key_length(2) + key(32)
    let mut share = 36u16.to_be_bytes().to_vec();
    share.extend_from_slice(&GROUP_X25519.to_be_bytes());
    share.extend_from_slice(&32u16.to_be_bytes());
    share.extend_from_slice(public_key);
    push_extension(&mut out, ExtensionType::KEY_SHARE, &share)?;

    if !alpn.is_empty() {
        push_extension(&mut out, ExtensionType::ALPN, &alpn_list(alpn)?)?;
    }

    push_extension(
        &mut out,
        ExtensionType::QUIC_TRANSPORT_PARAMETERS,
        &transport_params.encode()?,
    )?;
    Ok(out)
}

/// Parse ClientHello extensions. Unknown extensions are ignored.
pub fn parse_client_hello_extensions(block: &[u8]) -> Result<ClientHelloExtensions, Error> {
    let mut result = ClientHelloExtensions::default();

    for ext in Extensions::new(block) {
        let (ty, body) = ext.map_err(decode_error)?;
        match ty {
            ExtensionType::SUPPORTED_VERSIONS => {
                let (&list_len, list) = body.split_first().ok_or_else(|| decode_error(()))?;
                let list = list.get(..usize::from(list_len)).ok_or_else(|| decode_error(()))?;
                result.supports_tls13 = list
                    .chunks_exact(2)
                    .any(|v| u16::from_be_bytes([v[0], v[1]]) == TLS13_VERSION);
            }
            ExtensionType::KEY_SHARE => {
                // skip the 2-byte list length, then walk KeyShareEntry values
                let mut entries = body.get(2..).ok_or_else(|| decode_error(()))?;
                while entries.len() >= 4 {
                    let group = u16::from_be_bytes([entries[0], entries[1]]);
                    let key_len = usize::from(u16::from_be_bytes([entries[2], entries[3]]));
                    let key = entries.get(4..4 + key_len).ok_or_else(|| decode_error(()))?;
                    if group == GROUP_X25519 && key_len == 32 {
                        let mut k = [0u8; 32];
                        k.copy_from_slice(key);
                        result.key_share = Some(k);
                    }
                    entries = &entries[4 + key_len..];
                }
            }
            ExtensionType::ALPN => result.alpn_protocols = parse_alpn_list(body)?,
            ExtensionType::QUIC_TRANSPORT_PARAMETERS => {
                result.transport_params = Some(TransportParams::decode(body)?);
            }
            _ => {}
        }
    }

    Ok(result)
}

/// Extensions a ServerHello carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerHelloExtensions {
    pub selected_version: u16,
    pub key_share: Option<[u8; 32]>,
}

/// Encode ServerHello extensions: supported_versions and key_share.
pub fn encode_server_hello_extensions(public_key: &[u8; 32]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    push_extension(
        &mut out,
        ExtensionType::SUPPORTED_VERSIONS,
        &TLS13_VERSION.to_be_bytes(),
    )?;

    let mut share = GROUP_X25519.to_be_bytes().to_vec();
    share.extend_from_slice(&32u16.to_be_bytes());
    share.extend_from_slice(public_key);
    push_extension(&mut out, ExtensionType::KEY_SHARE, &share)?;
    Ok(out)
}

pub fn parse_server_hello_extensions(block: &[u8]) -> Result<ServerHelloExtensions, Error> {
    let mut result = ServerHelloExtensions::default();

    for ext in Extensions::new(block) {
        let (ty, body) = ext.map_err(decode_error)?;
        match ty {
            ExtensionType::SUPPORTED_VERSIONS => {
                let v = body.get(..2).ok_or_else(|| decode_error(()))?;
                result.selected_version = u16::from_be_bytes([v[0], v[1]]);
            }
            ExtensionType::KEY_SHARE => {
                if body.len() != 36
                    || u16::from_be_bytes([body[0], body[1]]) != GROUP_X25519
                    || u16::from_be_bytes([body[2], body[3]]) != 32
                {
                    return Err(Error::Alert(AlertDescription::IllegalParameter));
                }
                let mut key = [0u8; 32];
                key.copy_from_slice(&body[4..]);
                result.key_share = Some(key);
            }
            _ => {}
        }
    }

    Ok(result)
}

/// Extensions an EncryptedExtensions message carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptedExtensionsData {
    pub alpn: Option<Vec<u8>>,
    pub transport_params: Option<TransportParams>,
}

/// Encode EncryptedExtensions: the selected ALPN and our transport parameters.
pub fn encode_encrypted_extensions_data(
    alpn: Option<&[u8]>,
    transport_params: &TransportParams,
) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    if let Some(proto) = alpn {
        push_extension(&mut out, ExtensionType::ALPN, &alpn_list(&[proto.to_vec()])?)?;
    }
    push_extension(
        &mut out,
        ExtensionType::QUIC_TRANSPORT_PARAMETERS,
        &transport_params.encode()?,
    )?;
    Ok(out)
}

pub fn parse_encrypted_extensions_data(block: &[u8]) -> Result<EncryptedExtensionsData, Error> {
    let mut result = EncryptedExtensionsData::default();

    for ext in Extensions::new(block) {
        let (ty, body) = ext.map_err(decode_error)?;
        match ty {
            ExtensionType::ALPN => {
                // the server selects exactly one protocol
                let mut protocols = parse_alpn_list(body)?;
                if protocols.len() != 1 {
                    return Err(Error::Alert(AlertDescription::IllegalParameter));
                }
                result.alpn = protocols.pop();
            }
            ExtensionType::QUIC_TRANSPORT_PARAMETERS => {
                result.transport_params = Some(TransportParams::decode(body)?);
            }
            _ => {}
        }
    }

    Ok(result)
}
