//! TLS 1.3 handshake state machine for QUIC, both roles, no certificates.
//!
//! Client:
//! ```text
//! (ClientHello sent) -> WaitServerHello -> WaitEncryptedExtensions -> WaitFinished -> Complete
//! ```
//! Server:
//! ```text
//! WaitClientHello -> (ServerHello, EncryptedExtensions, Finished sent) -> WaitClientFinished -> Complete
//! ```
//!
//! Authentication is the Finished exchange only: with no Certificate or
//! CertificateVerify, the peers prove knowledge of the ECDHE secret and
//! nothing more. That is all a fault-injection target needs.

use crate::crypto::rustcrypto::HkdfSha256;
use crate::crypto::{CipherSuite, Level};
use crate::error::Error;
use crate::tls::extensions::{
    encode_client_hello_extensions, encode_encrypted_extensions_data,
    encode_server_hello_extensions, parse_client_hello_extensions,
    parse_encrypted_extensions_data, parse_server_hello_extensions, TLS13_VERSION,
};
use crate::tls::key_schedule::{ct_eq, finished_verify_data, TlsKeySchedule, TrafficSecrets};
use crate::tls::messages::{
    complete_message_len, encode_client_hello, encode_encrypted_extensions, encode_finished,
    encode_server_hello, parse_client_hello, parse_encrypted_extensions, parse_finished,
    parse_server_hello, HandshakeType, HANDSHAKE_HEADER_LEN,
};
use crate::tls::transcript::TranscriptHash;
use crate::tls::transport_params::TransportParams;
use crate::tls::{AlertDescription, DerivedKeys, TlsSession};

/// Client or server role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    WaitServerHello,
    WaitEncryptedExtensions,
    WaitFinished,
    WaitClientHello,
    WaitClientFinished,
    Complete,
    /// An alert was raised; every further message is rejected.
    Failed,
}

/// Handshake configuration shared by both roles.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Client: protocols to offer. Server: protocols to accept, in preference
    /// order. Empty disables ALPN.
    pub alpn_protocols: Vec<Vec<u8>>,
    /// Our QUIC transport parameters.
    pub transport_params: TransportParams,
    /// Cipher suites in preference order.
    pub cipher_suites: Vec<CipherSuite>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            alpn_protocols: vec![b"hq-interop".to_vec()],
            transport_params: TransportParams::default(),
            cipher_suites: vec![CipherSuite::Aes128GcmSha256],
        }
    }
}

/// Handshake flights waiting for the connection, and secrets waiting for
/// packet key derivation.
const MAX_PENDING: usize = 4;

/// TLS 1.3 handshake engine.
pub struct TlsEngine {
    role: Role,
    state: HandshakeState,

    private_key: x25519_dalek::StaticSecret,
    public_key: x25519_dalek::PublicKey,
    random: [u8; 32],

    cipher_suite: Option<CipherSuite>,
    key_schedule: TlsKeySchedule,
    handshake_secrets: Option<TrafficSecrets>,
    transcript: TranscriptHash,
    /// Server side: the client Finished we expect.
    expected_client_finished: Option<[u8; 32]>,

    /// Bytes of a message not yet complete, and the level they arrived at.
    partial: Vec<u8>,
    partial_level: Level,

    outgoing: heapless::Deque<(Level, Vec<u8>), MAX_PENDING>,
    pending_keys: heapless::Deque<DerivedKeys, MAX_PENDING>,

    config: TlsConfig,
    peer_transport_params: Option<TransportParams>,
    negotiated_alpn: Option<Vec<u8>>,
}

impl TlsEngine {
    fn new(role: Role, config: TlsConfig, secret_bytes: [u8; 32], random: [u8; 32]) -> Self {
        let private_key = x25519_dalek::StaticSecret::from(secret_bytes);
        let public_key = x25519_dalek::PublicKey::from(&private_key);
        Self {
            role,
            state: match role {
                Role::Client => HandshakeState::WaitServerHello,
                Role::Server => HandshakeState::WaitClientHello,
            },
            private_key,
            public_key,
            random,
            cipher_suite: None,
            key_schedule: TlsKeySchedule::new(&HkdfSha256),
            handshake_secrets: None,
            transcript: TranscriptHash::new(),
            expected_client_finished: None,
            partial: Vec::new(),
            partial_level: Level::Initial,
            outgoing: heapless::Deque::new(),
            pending_keys: heapless::Deque::new(),
            config,
            peer_transport_params: None,
            negotiated_alpn: None,
        }
    }

    /// Create a client engine; the ClientHello is queued immediately.
    ///
    /// `secret_bytes` is the X25519 private key and `random` the hello random,
    /// both supplied by the caller's RNG.
    pub fn new_client(
        config: TlsConfig,
        secret_bytes: [u8; 32],
        random: [u8; 32],
    ) -> Result<Self, Error> {
        let mut engine = Self::new(Role::Client, config, secret_bytes, random);
        let extensions = encode_client_hello_extensions(
            engine.public_key.as_bytes(),
            &engine.config.alpn_protocols,
            &engine.config.transport_params,
        )?;
        let hello = encode_client_hello(&engine.random, &engine.config.cipher_suites, &extensions)?;
        engine.transcript.update(&hello);
        engine.queue_flight(Level::Initial, hello)?;
        Ok(engine)
    }

    pub fn new_server(config: TlsConfig, secret_bytes: [u8; 32], random: [u8; 32]) -> Self {
        Self::new(Role::Server, config, secret_bytes, random)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Negotiated cipher suite, once the hellos are exchanged.
    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.cipher_suite
    }

    pub fn has_failed(&self) -> bool {
        self.state == HandshakeState::Failed
    }

    fn queue_flight(&mut self, level: Level, bytes: Vec<u8>) -> Result<(), Error> {
        self.outgoing
            .push_back((level, bytes))
            .map_err(|_| Error::Alert(AlertDescription::InternalError))
    }

    fn queue_keys(&mut self, level: Level, send: [u8; 32], recv: [u8; 32]) -> Result<(), Error> {
        self.pending_keys
            .push_back(DerivedKeys {
                level,
                send_secret: send,
                recv_secret: recv,
            })
            .map_err(|_| Error::Alert(AlertDescription::InternalError))
    }

    fn shared_secret(&self, peer_key: [u8; 32]) -> [u8; 32] {
        let peer = x25519_dalek::PublicKey::from(peer_key);
        *self.private_key.diffie_hellman(&peer).as_bytes()
    }

    fn process_server_hello(&mut self, msg: &[u8]) -> Result<(), Error> {
        let sh = parse_server_hello(&msg[HANDSHAKE_HEADER_LEN..])?;

        let suite = CipherSuite::from_u16(sh.cipher_suite)
            .filter(|s| self.config.cipher_suites.contains(s))
            .ok_or(Error::Alert(AlertDescription::IllegalParameter))?;

        let ext = parse_server_hello_extensions(sh.extensions)?;
        if ext.selected_version != TLS13_VERSION {
            return Err(Error::Alert(AlertDescription::ProtocolVersion));
        }
        let server_key = ext
            .key_share
            .ok_or(Error::Alert(AlertDescription::MissingExtension))?;

        self.transcript.update(msg);
        let shared = self.shared_secret(server_key);
        let secrets = self.key_schedule.handshake_secrets(
            &HkdfSha256,
            &shared,
            &self.transcript.current_hash(),
        )?;
        self.cipher_suite = Some(suite);
        self.handshake_secrets = Some(secrets);
        self.queue_keys(Level::Handshake, secrets.client, secrets.server)?;

        self.state = HandshakeState::WaitEncryptedExtensions;
        Ok(())
    }

    fn process_encrypted_extensions(&mut self, msg: &[u8]) -> Result<(), Error> {
        let block = parse_encrypted_extensions(&msg[HANDSHAKE_HEADER_LEN..])?;
        let parsed = parse_encrypted_extensions_data(block)?;

        let Some(params) = parsed.transport_params else {
            tracing::warn!("EncryptedExtensions without quic_transport_parameters");
            return Err(Error::Alert(AlertDescription::MissingExtension));
        };

        if !self.config.alpn_protocols.is_empty() {
            match &parsed.alpn {
                None => return Err(Error::Alert(AlertDescription::NoApplicationProtocol)),
                Some(p) if !self.config.alpn_protocols.contains(p) => {
                    return Err(Error::Alert(AlertDescription::IllegalParameter))
                }
                Some(_) => {}
            }
        }

        self.transcript.update(msg);
        self.peer_transport_params = Some(params);
        self.negotiated_alpn = parsed.alpn;
        self.state = HandshakeState::WaitFinished;
        Ok(())
    }

    fn process_server_finished(&mut self, msg: &[u8]) -> Result<(), Error> {
        let verify_data = parse_finished(&msg[HANDSHAKE_HEADER_LEN..])?;
        let secrets = self.handshake_secrets.ok_or(Error::InvalidState)?;

        let expected =
            finished_verify_data(&HkdfSha256, &secrets.server, &self.transcript.current_hash())?;
        if !ct_eq(&expected, verify_data) {
            return Err(Error::Alert(AlertDescription::DecryptError));
        }
        self.transcript.update(msg);

        let through_server_finished = self.transcript.current_hash();
        let app = self
            .key_schedule
            .application_secrets(&HkdfSha256, &through_server_finished)?;
        let client_verify =
            finished_verify_data(&HkdfSha256, &secrets.client, &through_server_finished)?;
        let finished = encode_finished(&client_verify)?;
        self.transcript.update(&finished);

        self.queue_flight(Level::Handshake, finished)?;
        self.queue_keys(Level::Application, app.client, app.server)?;
        self.state = HandshakeState::Complete;
        Ok(())
    }

    fn select_alpn(&self, offered: &[Vec<u8>]) -> Result<Option<Vec<u8>>, Error> {
        if self.config.alpn_protocols.is_empty() {
            return Ok(None);
        }
        self.config
            .alpn_protocols
            .iter()
            .find(|p| offered.contains(*p))
            .cloned()
            .map(Some)
            .ok_or(Error::Alert(AlertDescription::NoApplicationProtocol))
    }

    fn process_client_hello(&mut self, msg: &[u8]) -> Result<(), Error> {
        let ch = parse_client_hello(&msg[HANDSHAKE_HEADER_LEN..])?;

        let offered: Vec<u16> = ch.cipher_suites().collect();
        let suite = self
            .config
            .cipher_suites
            .iter()
            .copied()
            .find(|s| offered.contains(&s.to_u16()))
            .ok_or(Error::Alert(AlertDescription::HandshakeFailure))?;

        let ext = parse_client_hello_extensions(ch.extensions)?;
        if !ext.supports_tls13 {
            return Err(Error::Alert(AlertDescription::ProtocolVersion));
        }
        let client_key = ext
            .key_share
            .ok_or(Error::Alert(AlertDescription::MissingExtension))?;
        let params = ext
            .transport_params
            .ok_or(Error::Alert(AlertDescription::MissingExtension))?;
        let alpn = self.select_alpn(&ext.alpn_protocols)?;

        self.transcript.update(msg);
        let server_hello = encode_server_hello(
            &self.random,
            ch.session_id,
            suite,
            &encode_server_hello_extensions(self.public_key.as_bytes())?,
        )?;
        self.transcript.update(&server_hello);
        self.queue_flight(Level::Initial, server_hello)?;

        let shared = self.shared_secret(client_key);
        let secrets = self.key_schedule.handshake_secrets(
            &HkdfSha256,
            &shared,
            &self.transcript.current_hash(),
        )?;
        self.queue_keys(Level::Handshake, secrets.server, secrets.client)?;

        let mut flight = encode_encrypted_extensions(&encode_encrypted_extensions_data(
            alpn.as_deref(),
            &self.config.transport_params,
        )?)?;
        self.transcript.update(&flight);

        let server_verify =
            finished_verify_data(&HkdfSha256, &secrets.server, &self.transcript.current_hash())?;
        let finished = encode_finished(&server_verify)?;
        self.transcript.update(&finished);
        flight.extend_from_slice(&finished);
        self.queue_flight(Level::Handshake, flight)?;

        let through_server_finished = self.transcript.current_hash();
        let app = self
            .key_schedule
            .application_secrets(&HkdfSha256, &through_server_finished)?;
        self.queue_keys(Level::Application, app.server, app.client)?;
        self.expected_client_finished = Some(finished_verify_data(
            &HkdfSha256,
            &secrets.client,
            &through_server_finished,
        )?);

        self.cipher_suite = Some(suite);
        self.handshake_secrets = Some(secrets);
        self.peer_transport_params = Some(params);
        self.negotiated_alpn = alpn;
        self.state = HandshakeState::WaitClientFinished;
        Ok(())
    }

    fn process_client_finished(&mut self, msg: &[u8]) -> Result<(), Error> {
        let verify_data = parse_finished(&msg[HANDSHAKE_HEADER_LEN..])?;
        let expected = self.expected_client_finished.ok_or(Error::InvalidState)?;
        if !ct_eq(&expected, verify_data) {
            return Err(Error::Alert(AlertDescription::DecryptError));
        }
        self.transcript.update(msg);
        self.state = HandshakeState::Complete;
        Ok(())
    }

    fn handle_message(&mut self, level: Level, msg: &[u8]) -> Result<(), Error> {
        let msg_type = HandshakeType::from_u8(msg[0]);
        tracing::trace!(role = ?self.role, ?level, ?msg_type, len = msg.len(), "handshake message");

        use HandshakeState as S;
        use HandshakeType as T;
        match (self.state, level, msg_type) {
            (S::WaitServerHello, Level::Initial, Some(T::ServerHello)) => {
                self.process_server_hello(msg)
            }
            (S::WaitEncryptedExtensions, Level::Handshake, Some(T::EncryptedExtensions)) => {
                self.process_encrypted_extensions(msg)
            }
            (S::WaitFinished, Level::Handshake, Some(T::Finished)) => {
                self.process_server_finished(msg)
            }
            (S::WaitClientHello, Level::Initial, Some(T::ClientHello)) => {
                self.process_client_hello(msg)
            }
            (S::WaitClientFinished, Level::Handshake, Some(T::Finished)) => {
                self.process_client_finished(msg)
            }
            _ => Err(Error::Alert(AlertDescription::UnexpectedMessage)),
        }
    }
}

impl TlsSession for TlsEngine {
    fn read_handshake(&mut self, level: Level, data: &[u8]) -> Result<(), Error> {
        if self.state == HandshakeState::Failed {
            return Err(Error::InvalidState);
        }
        if !self.partial.is_empty() && self.partial_level != level {
            self.state = HandshakeState::Failed;
            return Err(Error::Alert(AlertDescription::UnexpectedMessage));
        }
        self.partial_level = level;
        self.partial.extend_from_slice(data);

        while let Some(total) = complete_message_len(&self.partial) {
            let msg: Vec<u8> = self.partial.drain(..total).collect();
            if let Err(e) = self.handle_message(level, &msg) {
                tracing::debug!(role = ?self.role, error = %e, "handshake failed");
                self.state = HandshakeState::Failed;
                return Err(e);
            }
        }
        Ok(())
    }

    fn write_handshake(&mut self) -> Option<(Level, Vec<u8>)> {
        self.outgoing.pop_front()
    }

    fn derived_keys(&mut self) -> Option<DerivedKeys> {
        self.pending_keys.pop_front()
    }

    fn is_complete(&self) -> bool {
        self.state == HandshakeState::Complete
    }

    fn alpn(&self) -> Option<&[u8]> {
        self.negotiated_alpn.as_deref()
    }

    fn peer_transport_params(&self) -> Option<&TransportParams> {
        self.peer_transport_params.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::extensions::{push_extension, Extensions, ExtensionType};
    use crate::tls::messages::{encode_message, read_handshake_header};

    fn pair() -> (TlsEngine, TlsEngine) {
        let client = TlsEngine::new_client(TlsConfig::default(), [1u8; 32], [2u8; 32]).unwrap();
        let server = TlsEngine::new_server(TlsConfig::default(), [3u8; 32], [4u8; 32]);
        (client, server)
    }

    fn deliver(from: &mut TlsEngine, to: &mut TlsEngine) -> Result<(), Error> {
        while let Some((level, bytes)) = from.write_handshake() {
            to.read_handshake(level, &bytes)?;
        }
        Ok(())
    }

    #[test]
    fn full_handshake_agrees_on_keys() {
        let (mut client, mut server) = pair();
        deliver(&mut client, &mut server).unwrap();
        deliver(&mut server, &mut client).unwrap();
        assert!(client.is_complete());
        deliver(&mut client, &mut server).unwrap();
        assert!(server.is_complete());

        for level in [Level::Handshake, Level::Application] {
            let c = client.derived_keys().unwrap();
            let s = server.derived_keys().unwrap();
            assert_eq!(c.level, level);
            assert_eq!(s.level, level);
            assert_eq!(c.send_secret, s.recv_secret);
            assert_eq!(c.recv_secret, s.send_secret);
        }
        assert!(client.derived_keys().is_none());

        assert_eq!(client.alpn(), Some(&b"hq-interop"[..]));
        assert_eq!(server.alpn(), Some(&b"hq-interop"[..]));
        assert_eq!(client.cipher_suite(), Some(CipherSuite::Aes128GcmSha256));
        assert_eq!(
            client.peer_transport_params(),
            Some(&TransportParams::default())
        );
    }

    #[test]
    fn server_flights_use_initial_then_handshake() {
        let (mut client, mut server) = pair();
        deliver(&mut client, &mut server).unwrap();

        let (l1, sh) = server.write_handshake().unwrap();
        let (l2, flight) = server.write_handshake().unwrap();
        assert_eq!(l1, Level::Initial);
        assert_eq!(sh[0], HandshakeType::ServerHello.to_u8());
        assert_eq!(l2, Level::Handshake);
        assert_eq!(flight[0], HandshakeType::EncryptedExtensions.to_u8());
        assert!(server.write_handshake().is_none());
    }

    #[test]
    fn message_split_across_reads_is_buffered() {
        let (mut client, mut server) = pair();
        let (level, hello) = client.write_handshake().unwrap();
        for byte in hello.chunks(1) {
            server.read_handshake(level, byte).unwrap();
        }
        assert!(server.write_handshake().is_some());
    }

    /// Rebuild an EncryptedExtensions message without one extension type.
    fn strip_extension(ee: &[u8], ty: u16) -> Vec<u8> {
        let block = parse_encrypted_extensions(&ee[HANDSHAKE_HEADER_LEN..]).unwrap();
        let mut kept = Vec::new();
        for ext in Extensions::new(block) {
            let (t, body) = ext.unwrap();
            if t != ty {
                push_extension(&mut kept, t, body).unwrap();
            }
        }
        encode_encrypted_extensions(&kept).unwrap()
    }

    #[test]
    fn missing_transport_params_raises_missing_extension() {
        let (mut client, mut server) = pair();
        deliver(&mut client, &mut server).unwrap();

        let (level, sh) = server.write_handshake().unwrap();
        client.read_handshake(level, &sh).unwrap();

        let (level, flight) = server.write_handshake().unwrap();
        let (_, ee_len) = read_handshake_header(&flight).unwrap();
        let ee = &flight[..HANDSHAKE_HEADER_LEN + ee_len];
        let stripped = strip_extension(ee, ExtensionType::QUIC_TRANSPORT_PARAMETERS);

        assert_eq!(
            client.read_handshake(level, &stripped).unwrap_err(),
            Error::Alert(AlertDescription::MissingExtension)
        );
        assert!(client.has_failed());
        assert_eq!(client.read_handshake(level, &[]).unwrap_err(), Error::InvalidState);
    }

    #[test]
    fn client_hello_without_transport_params_is_rejected() {
        let (mut client, mut server) = pair();
        let (level, hello) = client.write_handshake().unwrap();
        let body = parse_client_hello(&hello[HANDSHAKE_HEADER_LEN..]).unwrap();

        let mut kept = Vec::new();
        for ext in Extensions::new(body.extensions) {
            let (t, b) = ext.unwrap();
            if t != ExtensionType::QUIC_TRANSPORT_PARAMETERS {
                push_extension(&mut kept, t, b).unwrap();
            }
        }
        let hello = encode_client_hello(&[2u8; 32], &[CipherSuite::Aes128GcmSha256], &kept).unwrap();

        assert_eq!(
            server.read_handshake(level, &hello).unwrap_err(),
            Error::Alert(AlertDescription::MissingExtension)
        );
    }

    #[test]
    fn tampered_finished_is_decrypt_error() {
        let (mut client, mut server) = pair();
        deliver(&mut client, &mut server).unwrap();
        let (level, sh) = server.write_handshake().unwrap();
        client.read_handshake(level, &sh).unwrap();

        let (level, mut flight) = server.write_handshake().unwrap();
        let last = flight.len() - 1;
        flight[last] ^= 0x01;
        assert_eq!(
            client.read_handshake(level, &flight).unwrap_err(),
            Error::Alert(AlertDescription::DecryptError)
        );
    }

    #[test]
    fn wrong_level_or_order_is_unexpected() {
        let (_, mut server) = pair();
        let fin = encode_message(HandshakeType::Finished.to_u8(), &[0u8; 32]).unwrap();
        assert_eq!(
            server.read_handshake(Level::Handshake, &fin).unwrap_err(),
            Error::Alert(AlertDescription::UnexpectedMessage)
        );

        let (mut client, mut server) = pair();
        let (_, hello) = client.write_handshake().unwrap();
        assert_eq!(
            server.read_handshake(Level::Handshake, &hello).unwrap_err(),
            Error::Alert(AlertDescription::UnexpectedMessage)
        );
    }
}
