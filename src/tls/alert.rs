//! TLS 1.3 alert descriptions (RFC 8446 section 6).
//!
//! QUIC never sends alert records; an alert becomes a CONNECTION_CLOSE with
//! CRYPTO_ERROR code `0x0100 + description`.

use core::fmt;

/// TLS alert description codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    HandshakeFailure = 40,
    BadCertificate = 42,
    IllegalParameter = 47,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    MissingExtension = 109,
    UnsupportedExtension = 110,
    NoApplicationProtocol = 120,
}

impl AlertDescription {
    const ALL: [AlertDescription; 14] = [
        Self::CloseNotify,
        Self::UnexpectedMessage,
        Self::BadRecordMac,
        Self::HandshakeFailure,
        Self::BadCertificate,
        Self::IllegalParameter,
        Self::DecodeError,
        Self::DecryptError,
        Self::ProtocolVersion,
        Self::InsufficientSecurity,
        Self::InternalError,
        Self::MissingExtension,
        Self::UnsupportedExtension,
        Self::NoApplicationProtocol,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.to_u8() == v)
    }

    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Recover the alert carried in a QUIC CRYPTO_ERROR close code.
    pub fn from_crypto_error(code: u64) -> Option<Self> {
        match code.checked_sub(0x0100) {
            Some(v) if v <= 0xff => Self::from_u8(v as u8),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::CloseNotify => "close_notify",
            Self::UnexpectedMessage => "unexpected_message",
            Self::BadRecordMac => "bad_record_mac",
            Self::HandshakeFailure => "handshake_failure",
            Self::BadCertificate => "bad_certificate",
            Self::IllegalParameter => "illegal_parameter",
            Self::DecodeError => "decode_error",
            Self::DecryptError => "decrypt_error",
            Self::ProtocolVersion => "protocol_version",
            Self::InsufficientSecurity => "insufficient_security",
            Self::InternalError => "internal_error",
            Self::MissingExtension => "missing_extension",
            Self::UnsupportedExtension => "unsupported_extension",
            Self::NoApplicationProtocol => "no_application_protocol",
        }
    }
}

impl fmt::Display for AlertDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.to_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_alert_codes() {
        for alert in AlertDescription::ALL {
            assert_eq!(AlertDescription::from_u8(alert.to_u8()), Some(alert));
        }
        assert_eq!(AlertDescription::from_u8(255), None);
        assert_eq!(AlertDescription::from_u8(1), None);
    }

    #[test]
    fn crypto_error_codes() {
        assert_eq!(
            AlertDescription::from_crypto_error(0x016d),
            Some(AlertDescription::MissingExtension)
        );
        assert_eq!(AlertDescription::from_crypto_error(0x07), None);
        assert_eq!(AlertDescription::from_crypto_error(0x0200), None);
    }

    #[test]
    fn display_names_the_alert() {
        assert_eq!(
            AlertDescription::MissingExtension.to_string(),
            "missing_extension (109)"
        );
    }
}
