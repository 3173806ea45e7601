//! QUIC transport parameters (RFC 9000 section 18).
//!
//! Carried in the `quic_transport_parameters` TLS extension as a sequence of
//! (varint id, varint length, value) triples.

use crate::error::{Error, TransportError};
use crate::varint::{decode_varint, push_varint, varint_len};

const PARAM_MAX_IDLE_TIMEOUT: u64 = 0x01;
const PARAM_MAX_UDP_PAYLOAD_SIZE: u64 = 0x03;
const PARAM_INITIAL_MAX_DATA: u64 = 0x04;
const PARAM_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u64 = 0x05;
const PARAM_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u64 = 0x06;
const PARAM_INITIAL_MAX_STREAM_DATA_UNI: u64 = 0x07;
const PARAM_INITIAL_MAX_STREAMS_BIDI: u64 = 0x08;
const PARAM_INITIAL_MAX_STREAMS_UNI: u64 = 0x09;
const PARAM_ACK_DELAY_EXPONENT: u64 = 0x0a;
const PARAM_MAX_ACK_DELAY: u64 = 0x0b;
const PARAM_ACTIVE_CONNECTION_ID_LIMIT: u64 = 0x0e;

/// The integer-valued transport parameters this crate exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    pub max_idle_timeout: u64,
    pub max_udp_payload_size: u64,
    pub initial_max_data: u64,
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
    pub ack_delay_exponent: u64,
    pub max_ack_delay: u64,
    pub active_connection_id_limit: u64,
}

impl TransportParams {
    /// RFC defaults for every parameter a peer leaves out.
    pub const fn rfc_defaults() -> Self {
        Self {
            max_idle_timeout: 0,
            max_udp_payload_size: 65527,
            initial_max_data: 0,
            initial_max_stream_data_bidi_local: 0,
            initial_max_stream_data_bidi_remote: 0,
            initial_max_stream_data_uni: 0,
            initial_max_streams_bidi: 0,
            initial_max_streams_uni: 0,
            ack_delay_exponent: 3,
            max_ack_delay: 25,
            active_connection_id_limit: 2,
        }
    }

    fn entries(&self) -> [(u64, u64); 11] {
        [
            (PARAM_MAX_IDLE_TIMEOUT, self.max_idle_timeout),
            (PARAM_MAX_UDP_PAYLOAD_SIZE, self.max_udp_payload_size),
            (PARAM_INITIAL_MAX_DATA, self.initial_max_data),
            (
                PARAM_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
                self.initial_max_stream_data_bidi_local,
            ),
            (
                PARAM_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
                self.initial_max_stream_data_bidi_remote,
            ),
            (
                PARAM_INITIAL_MAX_STREAM_DATA_UNI,
                self.initial_max_stream_data_uni,
            ),
            (PARAM_INITIAL_MAX_STREAMS_BIDI, self.initial_max_streams_bidi),
            (PARAM_INITIAL_MAX_STREAMS_UNI, self.initial_max_streams_uni),
            (PARAM_ACK_DELAY_EXPONENT, self.ack_delay_exponent),
            (PARAM_MAX_ACK_DELAY, self.max_ack_delay),
            (
                PARAM_ACTIVE_CONNECTION_ID_LIMIT,
                self.active_connection_id_limit,
            ),
        ]
    }

    fn slot(&mut self, id: u64) -> Option<&mut u64> {
        Some(match id {
            PARAM_MAX_IDLE_TIMEOUT => &mut self.max_idle_timeout,
            PARAM_MAX_UDP_PAYLOAD_SIZE => &mut self.max_udp_payload_size,
            PARAM_INITIAL_MAX_DATA => &mut self.initial_max_data,
            PARAM_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => &mut self.initial_max_stream_data_bidi_local,
            PARAM_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                &mut self.initial_max_stream_data_bidi_remote
            }
            PARAM_INITIAL_MAX_STREAM_DATA_UNI => &mut self.initial_max_stream_data_uni,
            PARAM_INITIAL_MAX_STREAMS_BIDI => &mut self.initial_max_streams_bidi,
            PARAM_INITIAL_MAX_STREAMS_UNI => &mut self.initial_max_streams_uni,
            PARAM_ACK_DELAY_EXPONENT => &mut self.ack_delay_exponent,
            PARAM_MAX_ACK_DELAY => &mut self.max_ack_delay,
            PARAM_ACTIVE_CONNECTION_ID_LIMIT => &mut self.active_connection_id_limit,
            _ => return None,
        })
    }

    /// Encode as the body of a `quic_transport_parameters` extension.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        for (id, value) in self.entries() {
            push_varint(id, &mut out)?;
            push_varint(varint_len(value) as u64, &mut out)?;
            push_varint(value, &mut out)?;
        }
        Ok(out)
    }

    /// Decode an extension body. Unknown parameters are skipped; a truncated
    /// or malformed entry is `TRANSPORT_PARAMETER_ERROR`.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let malformed = |_| Error::Transport(TransportError::TransportParameterError);
        let mut params = Self::rfc_defaults();

        let mut off = 0;
        while off < buf.len() {
            let (id, n) = decode_varint(buf, off).map_err(malformed)?;
            off += n;
            let (len, n) = decode_varint(buf, off).map_err(malformed)?;
            off += n;

            let end = usize::try_from(len)
                .ok()
                .and_then(|len| off.checked_add(len))
                .filter(|end| *end <= buf.len())
                .ok_or(Error::Transport(TransportError::TransportParameterError))?;
            let value_bytes = &buf[off..end];

            if let Some(slot) = params.slot(id) {
                let (value, used) = decode_varint(value_bytes, 0).map_err(malformed)?;
                if used != value_bytes.len() {
                    return Err(Error::Transport(TransportError::TransportParameterError));
                }
                *slot = value;
            }
            off = end;
        }

        Ok(params)
    }
}

impl Default for TransportParams {
    /// Parameters the test endpoints advertise.
    fn default() -> Self {
        Self {
            max_idle_timeout: 30_000,
            max_udp_payload_size: 1472,
            initial_max_data: 1_048_576,
            initial_max_stream_data_bidi_local: 262_144,
            initial_max_stream_data_bidi_remote: 262_144,
            initial_max_stream_data_uni: 262_144,
            initial_max_streams_bidi: 100,
            initial_max_streams_uni: 100,
            ack_delay_exponent: 3,
            max_ack_delay: 25,
            active_connection_id_limit: 2,
        }
    }
}
