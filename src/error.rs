use crate::crypto::Level;
use crate::fault::ListenerCategory;
use crate::tls::{AlertDescription, HandshakeType};

/// QUIC transport error codes (RFC 9000 §20).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum TransportError {
    NoError = 0x00,
    InternalError = 0x01,
    ConnectionRefused = 0x02,
    FlowControlError = 0x03,
    StreamLimitError = 0x04,
    StreamStateError = 0x05,
    FinalSizeError = 0x06,
    FrameEncodingError = 0x07,
    TransportParameterError = 0x08,
    ConnectionIdLimitError = 0x09,
    ProtocolViolation = 0x0a,
    InvalidToken = 0x0b,
    ApplicationError = 0x0c,
    CryptoBufferExceeded = 0x0d,
    KeyUpdateError = 0x0e,
    AeadLimitReached = 0x0f,
    NoViablePath = 0x10,
}

impl TransportError {
    /// Convert a transport error to its RFC 9000 wire code.
    pub const fn to_code(self) -> u64 {
        self as u64
    }

    /// Create a `CRYPTO_ERROR` code (0x0100 + TLS alert code).
    pub const fn crypto_error(alert_code: u8) -> u64 {
        0x0100 + alert_code as u64
    }

    /// Parse a wire error code into a `TransportError`.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x00 => Some(Self::NoError),
            0x01 => Some(Self::InternalError),
            0x02 => Some(Self::ConnectionRefused),
            0x03 => Some(Self::FlowControlError),
            0x04 => Some(Self::StreamLimitError),
            0x05 => Some(Self::StreamStateError),
            0x06 => Some(Self::FinalSizeError),
            0x07 => Some(Self::FrameEncodingError),
            0x08 => Some(Self::TransportParameterError),
            0x09 => Some(Self::ConnectionIdLimitError),
            0x0a => Some(Self::ProtocolViolation),
            0x0b => Some(Self::InvalidToken),
            0x0c => Some(Self::ApplicationError),
            0x0d => Some(Self::CryptoBufferExceeded),
            0x0e => Some(Self::KeyUpdateError),
            0x0f => Some(Self::AeadLimitReached),
            0x10 => Some(Self::NoViablePath),
            _ => None,
        }
    }
}

/// Why a connection stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminateCause {
    /// Transport error code carried in (or that would be carried in) CONNECTION_CLOSE.
    pub error_code: u64,
    /// Frame type that triggered the error, 0 if unknown.
    pub frame_type: u64,
    /// `true` if the peer sent the CONNECTION_CLOSE, `false` if we did.
    pub remote: bool,
}

impl TerminateCause {
    /// A termination caused by a protocol violation rather than a clean close.
    pub fn is_protocol_error(&self) -> bool {
        self.error_code != TransportError::NoError.to_code()
    }
}

impl core::fmt::Display for TerminateCause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let side = if self.remote { "peer" } else { "local" };
        match TransportError::from_code(self.error_code) {
            Some(e) => write!(f, "{side} close with {e:?}"),
            None if self.error_code >= 0x0100 && self.error_code <= 0x01ff => {
                write!(f, "{side} close with CRYPTO_ERROR alert {}", self.error_code - 0x0100)
            }
            None => write!(f, "{side} close with code {:#x}", self.error_code),
        }
    }
}

/// Errors raised by the interception pipeline and its codecs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FaultError {
    #[error("could not allocate {requested} bytes")]
    AllocationError { requested: usize },
    #[error("range {offset}+{len} outside buffer of {buf_len} bytes")]
    RangeError {
        offset: usize,
        len: usize,
        buf_len: usize,
    },
    #[error("malformed encoding at offset {offset}")]
    MalformedEncoding { offset: usize },
    #[error("value {value} does not fit a {width}-byte field")]
    EncodingOverflow { value: u64, width: usize },
    #[error("malformed handshake message: {0}")]
    MalformedHandshake(&'static str),
    #[error("{0:?} packet failed to decrypt")]
    DecryptionFailure(Level),
    #[error("{0:?} packet failed to encrypt")]
    EncryptionFailure(Level),
    #[error("packet of {size} bytes exceeds the {max}-byte maximum")]
    PacketTooLarge { size: usize, max: usize },
    #[error("a listener is already registered for {0}")]
    RegistrationConflict(ListenerCategory),
    #[error("{0:?} messages carry no editable extensions")]
    UnsupportedMessage(HandshakeType),
    #[error("{0:?} message is split across CRYPTO frames")]
    FragmentedHandshake(HandshakeType),
    #[error("{0} listener aborted the packet")]
    ListenerAborted(ListenerCategory),
}

/// Top-level crate error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// QUIC transport error; the connection must close.
    #[error("transport error: {0:?}")]
    Transport(TransportError),
    /// TLS alert raised by the handshake engine; closes with CRYPTO_ERROR.
    #[error("TLS alert: {0:?}")]
    Alert(AlertDescription),
    /// Cryptographic operation failed.
    #[error("cryptographic error")]
    Crypto,
    /// Caller-provided buffer too small.
    #[error("buffer too small, need {needed} bytes")]
    BufferTooSmall { needed: usize },
    /// Connection has terminated.
    #[error("connection terminated: {0}")]
    Terminated(TerminateCause),
    /// Would block; no data available.
    #[error("would block")]
    WouldBlock,
    /// Invalid state for the requested operation.
    #[error("invalid state")]
    InvalidState,
    /// The fault-injection pipeline failed.
    #[error(transparent)]
    Fault(#[from] FaultError),
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl From<AlertDescription> for Error {
    fn from(a: AlertDescription) -> Self {
        Error::Alert(a)
    }
}

impl Error {
    /// The CONNECTION_CLOSE error code an endpoint sends for this error.
    pub fn close_code(&self) -> u64 {
        match self {
            Error::Transport(e) => e.to_code(),
            Error::Alert(a) => TransportError::crypto_error(a.to_u8()),
            Error::Terminated(cause) => cause.error_code,
            _ => TransportError::InternalError.to_code(),
        }
    }

    /// Coarse classification for callers that only care what kind of failure happened.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::WouldBlock => ErrorKind::WantRead,
            Error::Terminated(cause) if !cause.is_protocol_error() => ErrorKind::ZeroReturn,
            Error::Terminated(_) | Error::Transport(_) | Error::Alert(_) | Error::Crypto => {
                ErrorKind::Ssl
            }
            Error::BufferTooSmall { .. } | Error::InvalidState | Error::Fault(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// What a failed read or write on an endpoint means to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Nothing to read yet; tick and try again.
    WantRead,
    /// The connection failed with a protocol error.
    Ssl,
    /// The connection was closed cleanly.
    ZeroReturn,
    /// Harness or caller bug, not a protocol outcome.
    Internal,
}
