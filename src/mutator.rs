//! Editable view of a TLS handshake message's extension list.
//!
//! A message is split into its type, the opaque bytes between the header and
//! the extension block (the "fixed part"), and the ordered extensions. Edits
//! work on that owned view; [`HandshakeMessageView::reencode`] lays it back
//! out with both the 2-byte extension block length and the 3-byte message
//! length recomputed.

use crate::error::FaultError;
use crate::tls::extensions::Extensions;
use crate::tls::messages::{encode_message, read_handshake_header, HandshakeType, HANDSHAKE_HEADER_LEN};

/// Message types whose extension lists can be edited.
pub const EDITABLE_TYPES: [HandshakeType; 3] = [
    HandshakeType::ClientHello,
    HandshakeType::ServerHello,
    HandshakeType::EncryptedExtensions,
];

fn malformed(what: &'static str) -> FaultError {
    FaultError::MalformedHandshake(what)
}

/// Length of a `u8`- or `u16`-prefixed vector at `off`, prefix included.
fn prefixed_len(body: &[u8], off: usize, prefix: usize) -> Result<usize, FaultError> {
    let len_bytes = body
        .get(off..off + prefix)
        .ok_or(malformed("truncated fixed part"))?;
    let len = len_bytes
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
    Ok(prefix + len)
}

/// Bytes before the extension block in a message body.
fn fixed_part_len(msg_type: HandshakeType, body: &[u8]) -> Result<usize, FaultError> {
    // legacy_version + random
    const HELLO_PREFIX: usize = 2 + 32;
    let len = match msg_type {
        HandshakeType::ClientHello => {
            let mut off = HELLO_PREFIX;
            off += prefixed_len(body, off, 1)?; // session id
            off += prefixed_len(body, off, 2)?; // cipher suites
            off += prefixed_len(body, off, 1)?; // compression methods
            off
        }
        HandshakeType::ServerHello => {
            let mut off = HELLO_PREFIX;
            off += prefixed_len(body, off, 1)?; // session id
            off + 2 + 1 // cipher suite, compression method
        }
        HandshakeType::EncryptedExtensions => 0,
        other => return Err(FaultError::UnsupportedMessage(other)),
    };
    if len > body.len() {
        return Err(malformed("truncated fixed part"));
    }
    Ok(len)
}

/// Decoded handshake message ready for extension edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessageView {
    msg_type: HandshakeType,
    fixed: Vec<u8>,
    extensions: Vec<(u16, Vec<u8>)>,
    original_len: usize,
}

impl HandshakeMessageView {
    pub fn is_editable(msg_type: HandshakeType) -> bool {
        EDITABLE_TYPES.contains(&msg_type)
    }

    /// Decode one complete message, header included.
    ///
    /// Only ClientHello, ServerHello and EncryptedExtensions are understood;
    /// other types are [`FaultError::UnsupportedMessage`]. A truncated
    /// header, fixed part or extension list, an extension running past its
    /// block, trailing bytes, or a repeated extension type is
    /// [`FaultError::MalformedHandshake`].
    pub fn parse(bytes: &[u8]) -> Result<Self, FaultError> {
        let (type_byte, body_len) =
            read_handshake_header(bytes).ok_or(malformed("truncated message header"))?;
        let msg_type =
            HandshakeType::from_u8(type_byte).ok_or(malformed("unknown handshake message type"))?;
        let body = &bytes[HANDSHAKE_HEADER_LEN..];
        if body.len() != body_len {
            return Err(malformed("message length disagrees with its bytes"));
        }

        let fixed_len = fixed_part_len(msg_type, body)?;
        let rest = &body[fixed_len..];
        let block_len = rest
            .get(..2)
            .map(|b| usize::from(u16::from_be_bytes([b[0], b[1]])))
            .ok_or(malformed("truncated extension block length"))?;
        if rest.len() != 2 + block_len {
            return Err(malformed("extension block length disagrees with message"));
        }

        let mut extensions: Vec<(u16, Vec<u8>)> = Vec::new();
        for ext in Extensions::new(&rest[2..]) {
            let (ty, data) = ext?;
            if extensions.iter().any(|(t, _)| *t == ty) {
                return Err(malformed("duplicate extension type"));
            }
            extensions.push((ty, data.to_vec()));
        }

        Ok(Self {
            msg_type,
            fixed: body[..fixed_len].to_vec(),
            extensions,
            original_len: bytes.len(),
        })
    }

    pub fn msg_type(&self) -> HandshakeType {
        self.msg_type
    }

    /// Bytes between the header and the extension block.
    pub fn fixed_part(&self) -> &[u8] {
        &self.fixed
    }

    /// Encoded size when parsed.
    pub fn original_len(&self) -> usize {
        self.original_len
    }

    /// Encoded size the message has now.
    pub fn encoded_len(&self) -> usize {
        HANDSHAKE_HEADER_LEN + self.fixed.len() + 2 + self.extensions_len()
    }

    fn extensions_len(&self) -> usize {
        self.extensions.iter().map(|(_, b)| 4 + b.len()).sum()
    }

    fn position(&self, ty: u16) -> Option<usize> {
        self.extensions.iter().position(|(t, _)| *t == ty)
    }

    /// Extension types in wire order.
    pub fn extension_types(&self) -> Vec<u16> {
        self.extensions.iter().map(|(t, _)| *t).collect()
    }

    /// Body of the extension of type `ty`.
    pub fn extension(&self, ty: u16) -> Option<&[u8]> {
        self.extensions
            .iter()
            .find(|(t, _)| *t == ty)
            .map(|(_, b)| b.as_slice())
    }

    /// Remove the extension of type `ty`. Returns `false` if it was absent.
    pub fn delete_extension(&mut self, ty: u16) -> bool {
        match self.position(ty) {
            Some(i) => {
                self.extensions.remove(i);
                tracing::trace!(msg = ?self.msg_type, ty, "deleted extension");
                true
            }
            None => false,
        }
    }

    /// Insert a new extension at `position` in the list (`len` appends).
    pub fn insert_extension(&mut self, ty: u16, body: &[u8], position: usize) -> Result<(), FaultError> {
        if self.position(ty).is_some() {
            return Err(malformed("duplicate extension type"));
        }
        if position > self.extensions.len() {
            return Err(FaultError::RangeError {
                offset: position,
                len: 0,
                buf_len: self.extensions.len(),
            });
        }
        self.extensions.insert(position, (ty, body.to_vec()));
        Ok(())
    }

    /// Swap the body of the extension of type `ty`, keeping its position.
    /// Returns `false` if it was absent.
    pub fn replace_extension(&mut self, ty: u16, body: &[u8]) -> bool {
        match self.position(ty) {
            Some(i) => {
                self.extensions[i].1 = body.to_vec();
                true
            }
            None => false,
        }
    }

    /// Lay the message back out with recomputed lengths.
    pub fn reencode(&self) -> Result<Vec<u8>, FaultError> {
        let block_len = self.extensions_len();
        if block_len > usize::from(u16::MAX) {
            return Err(FaultError::EncodingOverflow {
                value: block_len as u64,
                width: 2,
            });
        }

        let mut body = Vec::with_capacity(self.fixed.len() + 2 + block_len);
        body.extend_from_slice(&self.fixed);
        body.extend_from_slice(&(block_len as u16).to_be_bytes());
        for (ty, data) in &self.extensions {
            // a single body over 64 KiB already overflowed the block above
            body.extend_from_slice(&ty.to_be_bytes());
            body.extend_from_slice(&(data.len() as u16).to_be_bytes());
            body.extend_from_slice(data);
        }
        encode_message(self.msg_type.to_u8(), &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherSuite;
    use crate::tls::extensions::{
        encode_client_hello_extensions, encode_encrypted_extensions_data,
        encode_server_hello_extensions, ExtensionType,
    };
    use crate::tls::messages::{
        encode_client_hello, encode_encrypted_extensions, encode_server_hello, read_handshake_header,
    };
    use crate::tls::TransportParams;

    fn encrypted_extensions() -> Vec<u8> {
        let block =
            encode_encrypted_extensions_data(Some(b"hq-interop"), &TransportParams::default()).unwrap();
        encode_encrypted_extensions(&block).unwrap()
    }

    fn client_hello() -> Vec<u8> {
        let block = encode_client_hello_extensions(
            &[9u8; 32],
            &[b"hq-interop".to_vec()],
            &TransportParams::default(),
        )
        .unwrap();
        encode_client_hello(&[1u8; 32], &[CipherSuite::Aes128GcmSha256], &block).unwrap()
    }

    fn server_hello() -> Vec<u8> {
        let block = encode_server_hello_extensions(&[8u8; 32]).unwrap();
        encode_server_hello(&[2u8; 32], &[], CipherSuite::Aes128GcmSha256, &block).unwrap()
    }

    #[test]
    fn reencode_is_identity_for_supported_messages() {
        for msg in [encrypted_extensions(), client_hello(), server_hello()] {
            let view = HandshakeMessageView::parse(&msg).unwrap();
            assert_eq!(view.original_len(), msg.len());
            assert_eq!(view.encoded_len(), msg.len());
            assert_eq!(view.reencode().unwrap(), msg);
        }
    }

    #[test]
    fn fixed_parts_are_skipped_structurally() {
        let view = HandshakeMessageView::parse(&encrypted_extensions()).unwrap();
        assert!(view.fixed_part().is_empty());
        assert_eq!(
            view.extension_types(),
            vec![ExtensionType::ALPN, ExtensionType::QUIC_TRANSPORT_PARAMETERS]
        );

        let view = HandshakeMessageView::parse(&server_hello()).unwrap();
        assert_eq!(view.msg_type(), HandshakeType::ServerHello);
        // version + random + empty session id + suite + compression
        assert_eq!(view.fixed_part().len(), 2 + 32 + 1 + 2 + 1);

        let view = HandshakeMessageView::parse(&client_hello()).unwrap();
        // version + random + empty session id + one suite + one compression method
        assert_eq!(view.fixed_part().len(), 2 + 32 + 1 + 4 + 2);
        assert!(view.extension(ExtensionType::KEY_SHARE).is_some());
    }

    #[test]
    fn delete_recomputes_both_lengths() {
        let msg = encrypted_extensions();
        let mut view = HandshakeMessageView::parse(&msg).unwrap();
        let tp_len = view.extension(ExtensionType::QUIC_TRANSPORT_PARAMETERS).unwrap().len();

        assert!(view.delete_extension(ExtensionType::QUIC_TRANSPORT_PARAMETERS));
        assert!(!view.delete_extension(ExtensionType::QUIC_TRANSPORT_PARAMETERS));

        let out = view.reencode().unwrap();
        assert_eq!(out.len(), msg.len() - 4 - tp_len);
        let (_, body_len) = read_handshake_header(&out).unwrap();
        let alpn_len = 4 + view.extension(ExtensionType::ALPN).unwrap().len();
        assert_eq!(body_len, view.fixed_part().len() + 2 + alpn_len);

        let reparsed = HandshakeMessageView::parse(&out).unwrap();
        assert_eq!(reparsed.extension_types(), vec![ExtensionType::ALPN]);
    }

    #[test]
    fn insert_and_replace() {
        let mut view = HandshakeMessageView::parse(&server_hello()).unwrap();
        view.insert_extension(0xfafa, &[1, 2, 3], 0).unwrap();
        assert_eq!(view.extension_types()[0], 0xfafa);
        assert!(matches!(
            view.insert_extension(0xfafa, &[], 1),
            Err(FaultError::MalformedHandshake(_))
        ));
        assert!(matches!(
            view.insert_extension(0xfbfb, &[], 9),
            Err(FaultError::RangeError { .. })
        ));

        assert!(view.replace_extension(0xfafa, &[7; 10]));
        assert!(!view.replace_extension(0x1234, &[]));

        let reparsed = HandshakeMessageView::parse(&view.reencode().unwrap()).unwrap();
        assert_eq!(reparsed.extension(0xfafa), Some(&[7u8; 10][..]));
        assert_eq!(reparsed, {
            let mut v = view.clone();
            v.original_len = reparsed.original_len();
            v
        });
    }

    #[test]
    fn oversized_block_fails_to_encode() {
        let mut view = HandshakeMessageView::parse(&encrypted_extensions()).unwrap();
        view.insert_extension(0xfafa, &vec![0u8; 70_000], 0).unwrap();
        assert!(matches!(
            view.reencode(),
            Err(FaultError::EncodingOverflow { width: 2, .. })
        ));
    }

    #[test]
    fn malformed_messages_are_rejected() {
        let msg = encrypted_extensions();
        // truncated anywhere
        for cut in [0, 3, 5, msg.len() - 1] {
            assert!(matches!(
                HandshakeMessageView::parse(&msg[..cut]),
                Err(FaultError::MalformedHandshake(_))
            ));
        }
        // Finished carries no extensions
        assert_eq!(
            HandshakeMessageView::parse(&[20, 0, 0, 2, 0, 0]),
            Err(FaultError::UnsupportedMessage(HandshakeType::Finished))
        );
        // duplicated type
        let dup = [8, 0, 0, 10, 0, 8, 0, 0x10, 0, 0, 0, 0x10, 0, 0];
        assert_eq!(
            HandshakeMessageView::parse(&dup),
            Err(FaultError::MalformedHandshake("duplicate extension type"))
        );
        // extension runs past the block
        let overrun = [8, 0, 0, 6, 0, 4, 0, 0x10, 0, 9];
        assert!(HandshakeMessageView::parse(&overrun).is_err());
    }
}
