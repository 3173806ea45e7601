//! QUIC frame codec (RFC 9000 section 19), restricted to the frames the test
//! endpoints exchange, plus a scanner that locates CRYPTO frames inside a
//! decrypted packet payload.

use crate::codec::LengthField;
use crate::error::{Error, TransportError};
use crate::varint::{decode_varint, push_varint};

pub const FRAME_PADDING: u64 = 0x00;
pub const FRAME_PING: u64 = 0x01;
pub const FRAME_ACK: u64 = 0x02;
pub const FRAME_ACK_ECN: u64 = 0x03;
pub const FRAME_CRYPTO: u64 = 0x06;
pub const FRAME_STREAM: u64 = 0x08;
pub const FRAME_CONNECTION_CLOSE: u64 = 0x1c;
pub const FRAME_CONNECTION_CLOSE_APP: u64 = 0x1d;
pub const FRAME_HANDSHAKE_DONE: u64 = 0x1e;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame<'a> {
    pub largest_ack: u64,
    pub ack_delay: u64,
    pub first_ack_range: u64,
    /// Raw (gap, range) varint pairs following the first range.
    pub ack_ranges: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoFrame<'a> {
    pub offset: u64,
    pub data: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame<'a> {
    pub stream_id: u64,
    pub offset: u64,
    pub data: &'a [u8],
    pub fin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCloseFrame<'a> {
    /// `true` for the application variant (0x1d).
    pub is_application: bool,
    pub error_code: u64,
    /// Frame type that triggered the close (transport variant only).
    pub frame_type: u64,
    pub reason: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<'a> {
    Padding,                                   // 0x00
    Ping,                                      // 0x01
    Ack(AckFrame<'a>),                         // 0x02-0x03
    Crypto(CryptoFrame<'a>),                   // 0x06
    Stream(StreamFrame<'a>),                   // 0x08-0x0f
    ConnectionClose(ConnectionCloseFrame<'a>), // 0x1c-0x1d
    HandshakeDone,                             // 0x1e
}

impl Frame<'_> {
    /// Every frame except PADDING, ACK and CONNECTION_CLOSE elicits an ACK.
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(
            self,
            Frame::Padding | Frame::Ack(_) | Frame::ConnectionClose(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn frame_encoding_error() -> Error {
    Error::Transport(TransportError::FrameEncodingError)
}

fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64, Error> {
    let (val, n) = decode_varint(buf, *pos).map_err(|_| frame_encoding_error())?;
    *pos += n;
    Ok(val)
}

fn read_bytes<'a>(buf: &'a [u8], pos: &mut usize, len: u64) -> Result<&'a [u8], Error> {
    let len = usize::try_from(len).map_err(|_| frame_encoding_error())?;
    if buf.len() - *pos < len {
        return Err(frame_encoding_error());
    }
    let slice = &buf[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decode one QUIC frame from `buf`.
///
/// Returns the decoded frame and the number of bytes consumed. Frame types
/// outside the supported set are `FRAME_ENCODING_ERROR`.
pub fn decode(buf: &[u8]) -> Result<(Frame<'_>, usize), Error> {
    let mut pos = 0;
    let frame_type = read_varint(buf, &mut pos)?;

    let frame = match frame_type {
        FRAME_PADDING => Frame::Padding,
        FRAME_PING => Frame::Ping,

        FRAME_ACK | FRAME_ACK_ECN => {
            let largest_ack = read_varint(buf, &mut pos)?;
            let ack_delay = read_varint(buf, &mut pos)?;
            let ack_range_count = read_varint(buf, &mut pos)?;
            let first_ack_range = read_varint(buf, &mut pos)?;
            if first_ack_range > largest_ack {
                return Err(frame_encoding_error());
            }

            let ranges_start = pos;
            for _ in 0..ack_range_count {
                read_varint(buf, &mut pos)?;
                read_varint(buf, &mut pos)?;
            }
            let ack_ranges = &buf[ranges_start..pos];

            if frame_type == FRAME_ACK_ECN {
                for _ in 0..3 {
                    read_varint(buf, &mut pos)?;
                }
            }

            Frame::Ack(AckFrame {
                largest_ack,
                ack_delay,
                first_ack_range,
                ack_ranges,
            })
        }

        FRAME_CRYPTO => {
            let offset = read_varint(buf, &mut pos)?;
            let length = read_varint(buf, &mut pos)?;
            let data = read_bytes(buf, &mut pos, length)?;
            Frame::Crypto(CryptoFrame { offset, data })
        }

        0x08..=0x0f => {
            let has_offset = frame_type & 0x04 != 0;
            let has_length = frame_type & 0x02 != 0;
            let fin = frame_type & 0x01 != 0;

            let stream_id = read_varint(buf, &mut pos)?;
            let offset = if has_offset {
                read_varint(buf, &mut pos)?
            } else {
                0
            };
            let data = if has_length {
                let length = read_varint(buf, &mut pos)?;
                read_bytes(buf, &mut pos, length)?
            } else {
                // runs to the end of the packet
                let rest = &buf[pos..];
                pos = buf.len();
                rest
            };

            Frame::Stream(StreamFrame {
                stream_id,
                offset,
                data,
                fin,
            })
        }

        FRAME_CONNECTION_CLOSE | FRAME_CONNECTION_CLOSE_APP => {
            let is_application = frame_type == FRAME_CONNECTION_CLOSE_APP;
            let error_code = read_varint(buf, &mut pos)?;
            let frame_type_field = if is_application {
                0
            } else {
                read_varint(buf, &mut pos)?
            };
            let reason_len = read_varint(buf, &mut pos)?;
            let reason = read_bytes(buf, &mut pos, reason_len)?;
            Frame::ConnectionClose(ConnectionCloseFrame {
                is_application,
                error_code,
                frame_type: frame_type_field,
                reason,
            })
        }

        FRAME_HANDSHAKE_DONE => Frame::HandshakeDone,

        _ => return Err(frame_encoding_error()),
    };

    Ok((frame, pos))
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Append one QUIC frame to `out`.
pub fn encode(frame: &Frame<'_>, out: &mut Vec<u8>) -> Result<(), Error> {
    match frame {
        Frame::Padding => out.push(0x00),

        Frame::Ping => push_varint(FRAME_PING, out)?,

        Frame::Ack(ack) => {
            push_varint(FRAME_ACK, out)?;
            push_varint(ack.largest_ack, out)?;
            push_varint(ack.ack_delay, out)?;

            let mut count: u64 = 0;
            let mut pos = 0;
            while pos < ack.ack_ranges.len() {
                read_varint(ack.ack_ranges, &mut pos)?;
                read_varint(ack.ack_ranges, &mut pos)?;
                count += 1;
            }
            push_varint(count, out)?;
            push_varint(ack.first_ack_range, out)?;
            out.extend_from_slice(ack.ack_ranges);
        }

        Frame::Crypto(f) => {
            push_varint(FRAME_CRYPTO, out)?;
            push_varint(f.offset, out)?;
            push_varint(f.data.len() as u64, out)?;
            out.extend_from_slice(f.data);
        }

        Frame::Stream(f) => {
            // length bit always set so frames can be followed by others
            let mut type_byte = FRAME_STREAM | 0x02;
            if f.offset > 0 {
                type_byte |= 0x04;
            }
            if f.fin {
                type_byte |= 0x01;
            }
            push_varint(type_byte, out)?;
            push_varint(f.stream_id, out)?;
            if f.offset > 0 {
                push_varint(f.offset, out)?;
            }
            push_varint(f.data.len() as u64, out)?;
            out.extend_from_slice(f.data);
        }

        Frame::ConnectionClose(f) => {
            let ty = if f.is_application {
                FRAME_CONNECTION_CLOSE_APP
            } else {
                FRAME_CONNECTION_CLOSE
            };
            push_varint(ty, out)?;
            push_varint(f.error_code, out)?;
            if !f.is_application {
                push_varint(f.frame_type, out)?;
            }
            push_varint(f.reason.len() as u64, out)?;
            out.extend_from_slice(f.reason);
        }

        Frame::HandshakeDone => push_varint(FRAME_HANDSHAKE_DONE, out)?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CRYPTO frame scanning
// ---------------------------------------------------------------------------

/// Where a CRYPTO frame sits inside a plaintext payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoFrameSite {
    /// Offset of the frame type byte.
    pub frame_start: usize,
    /// Stream offset carried by the frame.
    pub stream_offset: u64,
    /// Where that offset is encoded.
    pub offset_field: LengthField,
    /// The frame's varint Length field.
    pub length_field: LengthField,
    /// Offset of the first data byte.
    pub data_start: usize,
    pub data_len: usize,
}

/// Walk the frames of `payload` and report every CRYPTO frame.
///
/// Scanning stops quietly at the first frame that does not decode, so a
/// payload a listener has deliberately corrupted still yields the CRYPTO
/// frames that precede the corruption.
pub fn scan_crypto_frames(payload: &[u8]) -> Vec<CryptoFrameSite> {
    let mut sites = Vec::new();
    let mut pos = 0;

    while pos < payload.len() {
        let (frame, consumed) = match decode(&payload[pos..]) {
            Ok(v) => v,
            Err(_) => {
                tracing::trace!(offset = pos, "frame scan stopped at undecodable frame");
                break;
            }
        };

        if let Frame::Crypto(cf) = frame {
            // type varint, offset varint, then the length varint
            let located = decode_varint(payload, pos)
                .and_then(|(_, t)| LengthField::varint_at(payload, pos + t))
                .and_then(|o| LengthField::varint_at(payload, o.end()).map(|l| (o, l)));
            if let Ok((offset_field, length_field)) = located {
                sites.push(CryptoFrameSite {
                    frame_start: pos,
                    stream_offset: cf.offset,
                    offset_field,
                    length_field,
                    data_start: length_field.end(),
                    data_len: cf.data.len(),
                });
            }
        }
        pos += consumed;
    }

    sites
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(frame: &Frame<'_>) -> Vec<u8> {
        let mut out = Vec::new();
        encode(frame, &mut out).unwrap();
        out
    }

    #[test]
    fn crypto_frame_wire_layout() {
        let bytes = encoded(&Frame::Crypto(CryptoFrame {
            offset: 5,
            data: b"abc",
        }));
        assert_eq!(bytes, [0x06, 0x05, 0x03, b'a', b'b', b'c']);
        let (frame, n) = decode(&bytes).unwrap();
        assert_eq!(n, bytes.len());
        assert_eq!(
            frame,
            Frame::Crypto(CryptoFrame {
                offset: 5,
                data: b"abc"
            })
        );
    }

    #[test]
    fn stream_frame_flags() {
        let bytes = encoded(&Frame::Stream(StreamFrame {
            stream_id: 0,
            offset: 7,
            data: b"hi",
            fin: true,
        }));
        assert_eq!(bytes[0], 0x08 | 0x04 | 0x02 | 0x01);

        let bytes = encoded(&Frame::Stream(StreamFrame {
            stream_id: 0,
            offset: 0,
            data: b"hi",
            fin: false,
        }));
        assert_eq!(bytes, [0x0a, 0x00, 0x02, b'h', b'i']);
    }

    #[test]
    fn stream_without_length_runs_to_end() {
        let buf = [0x08, 0x04, b'x', b'y', b'z'];
        let (frame, n) = decode(&buf).unwrap();
        assert_eq!(n, 5);
        match frame {
            Frame::Stream(sf) => {
                assert_eq!(sf.stream_id, 4);
                assert_eq!(sf.data, b"xyz");
            }
            other => panic!("expected stream frame, got {other:?}"),
        }
    }

    #[test]
    fn ack_and_close_decode() {
        let ack = Frame::Ack(AckFrame {
            largest_ack: 9,
            ack_delay: 0,
            first_ack_range: 9,
            ack_ranges: &[],
        });
        let bytes = encoded(&ack);
        assert_eq!(decode(&bytes).unwrap().0, ack);

        let close = Frame::ConnectionClose(ConnectionCloseFrame {
            is_application: false,
            error_code: 0x07,
            frame_type: 0,
            reason: b"",
        });
        let bytes = encoded(&close);
        assert_eq!(bytes, [0x1c, 0x07, 0x00, 0x00]);
        assert_eq!(decode(&bytes).unwrap().0, close);
    }

    #[test]
    fn ack_range_larger_than_largest_is_rejected() {
        assert_eq!(
            decode(&[0x02, 0x01, 0x00, 0x00, 0x05]),
            Err(Error::Transport(TransportError::FrameEncodingError))
        );
    }

    #[test]
    fn maximal_unknown_type_is_frame_encoding_error() {
        let buf = [0xff; 8];
        assert_eq!(
            decode(&buf),
            Err(Error::Transport(TransportError::FrameEncodingError))
        );
        assert!(decode(&[0x1f]).is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn truncated_crypto_is_rejected() {
        assert!(decode(&[0x06, 0x00, 0x05, 1, 2]).is_err());
    }

    #[test]
    fn ack_eliciting_classification() {
        assert!(!Frame::Padding.is_ack_eliciting());
        assert!(Frame::Ping.is_ack_eliciting());
        assert!(Frame::HandshakeDone.is_ack_eliciting());
    }

    #[test]
    fn scan_finds_crypto_frames_between_others() {
        let mut payload = Vec::new();
        encode(&Frame::Ping, &mut payload).unwrap();
        encode(
            &Frame::Crypto(CryptoFrame {
                offset: 0,
                data: &[1, 2, 3, 4],
            }),
            &mut payload,
        )
        .unwrap();
        encode(&Frame::Padding, &mut payload).unwrap();
        encode(
            &Frame::Crypto(CryptoFrame {
                offset: 4,
                data: &[5; 70],
            }),
            &mut payload,
        )
        .unwrap();

        let sites = scan_crypto_frames(&payload);
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].frame_start, 1);
        assert_eq!(sites[0].data_start, 4);
        assert_eq!(sites[0].data_len, 4);
        assert_eq!(sites[1].stream_offset, 4);
        assert_eq!(sites[1].offset_field, LengthField::varint(10, 1));
        assert_eq!(sites[1].length_field, LengthField::varint(11, 2));
        assert_eq!(&payload[sites[1].data_start..][..70], &[5; 70]);
    }

    #[test]
    fn scan_stops_at_garbage() {
        let mut payload = Vec::new();
        encode(
            &Frame::Crypto(CryptoFrame {
                offset: 0,
                data: &[9],
            }),
            &mut payload,
        )
        .unwrap();
        payload.extend_from_slice(&[0xff; 8]);
        assert_eq!(scan_crypto_frames(&payload).len(), 1);

        let mut prefixed = vec![0xff; 8];
        prefixed.extend_from_slice(&payload);
        assert!(scan_crypto_frames(&prefixed).is_empty());
    }
}
