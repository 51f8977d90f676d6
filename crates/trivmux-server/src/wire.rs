//! Length-prefixed wire protocol.
//!
//! One TCP connection carries one session. Every request gets exactly one
//! response, in order.
//!
//! ```text
//! request:  [op: u8][len: u32 BE][payload: len bytes]
//!           op 0x01 write  payload = data
//!           op 0x02 read   payload = requested count (u32 BE)
//!
//! response: [status: u8][len: u32 BE][payload: len bytes]
//!           status 0       payload = accepted count (write) or ciphertext (read)
//!           status code    payload = UTF-8 error message
//! ```
//!
//! # Security
//!
//! Lengths are checked against [`MAX_PAYLOAD`] before any payload buffer is
//! allocated.

use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;
use trivmux_core::ResultCode;

/// Size of request and response headers.
pub const HEADER_LEN: usize = 5;

/// Largest payload accepted in either direction (1 MiB).
pub const MAX_PAYLOAD: usize = 1 << 20;

/// Request operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Key, IV or plaintext
    Write = 0x01,
    /// Ciphertext read
    Read = 0x02,
}

/// Wire-level decoding errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes than a header or the declared payload
    #[error("truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes needed
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Declared length over [`MAX_PAYLOAD`]
    #[error("payload of {size} bytes exceeds limit of {max}")]
    PayloadTooLarge {
        /// Declared length
        size: usize,
        /// Limit
        max: usize,
    },

    /// Opcode not recognised. `len` is still valid, so the payload can be
    /// skipped.
    #[error("unknown opcode {opcode:#04x}")]
    UnknownOpcode {
        /// Opcode byte
        opcode: u8,
        /// Declared payload length
        len: usize,
    },

    /// Read request payload is not a 4-byte count
    #[error("read request payload must be 4 bytes, got {0}")]
    BadReadRequest(usize),

    /// Response status byte is not 0 or a known code
    #[error("unknown status {0}")]
    UnknownStatus(u8),
}

/// Decoded request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Operation
    pub opcode: Opcode,
    /// Payload length
    pub len: usize,
}

impl RequestHeader {
    /// Decode the first [`HEADER_LEN`] bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// - `WireError::Truncated` if fewer than [`HEADER_LEN`] bytes
    /// - `WireError::PayloadTooLarge` if the length exceeds [`MAX_PAYLOAD`]
    ///   (checked before the opcode)
    /// - `WireError::UnknownOpcode` otherwise for a bad opcode
    pub fn decode(mut bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::Truncated { expected: HEADER_LEN, actual: bytes.len() });
        }

        let opcode = bytes.get_u8();
        let len = bytes.get_u32() as usize;
        if len > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge { size: len, max: MAX_PAYLOAD });
        }

        let opcode = match opcode {
            0x01 => Opcode::Write,
            0x02 => Opcode::Read,
            other => return Err(WireError::UnknownOpcode { opcode: other, len }),
        };
        Ok(Self { opcode, len })
    }
}

/// A complete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Write bytes to the session
    Write(Bytes),
    /// Read this many ciphertext bytes
    Read(u32),
}

impl Request {
    /// Build a request from a decoded header and its payload.
    ///
    /// # Errors
    ///
    /// `WireError::BadReadRequest` if a read payload is not 4 bytes.
    pub fn from_parts(opcode: Opcode, payload: Bytes) -> Result<Self, WireError> {
        match opcode {
            Opcode::Write => Ok(Self::Write(payload)),
            Opcode::Read => {
                let Ok(count) = <[u8; 4]>::try_from(payload.as_ref()) else {
                    return Err(WireError::BadReadRequest(payload.len()));
                };
                Ok(Self::Read(u32::from_be_bytes(count)))
            },
        }
    }

    /// Decode one request from the front of `bytes`. Returns the request and
    /// the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Any header error, `WireError::Truncated` if the payload is short, or
    /// `WireError::BadReadRequest`.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), WireError> {
        let header = RequestHeader::decode(bytes)?;
        let payload = payload(bytes, header.len)?;
        Ok((Self::from_parts(header.opcode, payload)?, HEADER_LEN + header.len))
    }

    /// Encode into `dst`.
    ///
    /// # Errors
    ///
    /// `WireError::PayloadTooLarge` if a write exceeds [`MAX_PAYLOAD`].
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), WireError> {
        match self {
            Self::Write(data) => {
                let len = checked_len(data.len())?;
                dst.put_u8(Opcode::Write as u8);
                dst.put_u32(len);
                dst.put_slice(data);
            },
            Self::Read(count) => {
                dst.put_u8(Opcode::Read as u8);
                dst.put_u32(4);
                dst.put_u32(*count);
            },
        }
        Ok(())
    }
}

/// A complete response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Success with payload
    Ok(Bytes),
    /// Failure with a boundary code
    Error {
        /// Result code
        code: ResultCode,
        /// Human-readable reason
        message: String,
    },
}

impl Response {
    /// Success response for a write of `accepted` bytes.
    pub fn written(accepted: u32) -> Self {
        Self::Ok(Bytes::copy_from_slice(&accepted.to_be_bytes()))
    }

    /// Failure response.
    pub fn error(code: ResultCode, message: impl Into<String>) -> Self {
        Self::Error { code, message: message.into() }
    }

    /// Encode into `dst`.
    ///
    /// # Errors
    ///
    /// `WireError::PayloadTooLarge` if the payload exceeds [`MAX_PAYLOAD`].
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), WireError> {
        let (status, payload) = match self {
            Self::Ok(data) => (0, data.as_ref()),
            Self::Error { code, message } => (code.as_u8(), message.as_bytes()),
        };
        let len = checked_len(payload.len())?;
        dst.put_u8(status);
        dst.put_u32(len);
        dst.put_slice(payload);
        Ok(())
    }

    /// Decode one response from the front of `bytes`. Returns the response
    /// and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// `WireError::Truncated`, `WireError::PayloadTooLarge` or
    /// `WireError::UnknownStatus`.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), WireError> {
        let mut header = bytes;
        if header.len() < HEADER_LEN {
            return Err(WireError::Truncated { expected: HEADER_LEN, actual: header.len() });
        }
        let status = header.get_u8();
        let len = header.get_u32() as usize;
        if len > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge { size: len, max: MAX_PAYLOAD });
        }

        let payload = payload(bytes, len)?;
        let response = if status == 0 {
            Self::Ok(payload)
        } else {
            let code = ResultCode::from_u8(status).ok_or(WireError::UnknownStatus(status))?;
            Self::Error { code, message: String::from_utf8_lossy(&payload).into_owned() }
        };
        Ok((response, HEADER_LEN + len))
    }
}

fn checked_len(len: usize) -> Result<u32, WireError> {
    if len > MAX_PAYLOAD {
        return Err(WireError::PayloadTooLarge { size: len, max: MAX_PAYLOAD });
    }
    u32::try_from(len).map_err(|_| WireError::PayloadTooLarge { size: len, max: MAX_PAYLOAD })
}

fn payload(frame: &[u8], len: usize) -> Result<Bytes, WireError> {
    frame
        .get(HEADER_LEN..HEADER_LEN + len)
        .map(Bytes::copy_from_slice)
        .ok_or(WireError::Truncated { expected: len, actual: frame.len().saturating_sub(HEADER_LEN) })
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn read_request_layout() {
        let mut buf = BytesMut::new();
        Request::Read(16).encode(&mut buf).unwrap();

        assert_eq!(&buf[..], [0x02, 0, 0, 0, 4, 0, 0, 0, 16]);
    }

    #[test]
    fn oversized_length_rejected_before_opcode() {
        let header = [0xFF, 0x00, 0x20, 0x00, 0x00];

        assert_eq!(
            RequestHeader::decode(&header),
            Err(WireError::PayloadTooLarge { size: 0x0020_0000, max: MAX_PAYLOAD })
        );
    }

    #[test]
    fn unknown_opcode_keeps_length() {
        assert_eq!(
            RequestHeader::decode(&[0x09, 0, 0, 0, 3]),
            Err(WireError::UnknownOpcode { opcode: 0x09, len: 3 })
        );
    }

    #[test]
    fn read_payload_must_be_a_count() {
        assert_eq!(
            Request::from_parts(Opcode::Read, Bytes::from_static(&[1, 2])),
            Err(WireError::BadReadRequest(2))
        );
    }

    #[test]
    fn error_response_carries_code_and_message() {
        let mut buf = BytesMut::new();
        Response::error(ResultCode::EngineBusy, "busy").encode(&mut buf).unwrap();

        assert_eq!(buf[0], 3);
        let (decoded, used) = Response::decode(&buf).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(decoded, Response::error(ResultCode::EngineBusy, "busy"));
    }

    #[test]
    fn truncated_payload_reports_sizes() {
        let mut buf = BytesMut::new();
        Request::Write(Bytes::from_static(&[7; 10])).encode(&mut buf).unwrap();

        assert_eq!(
            Request::decode(&buf[..9]),
            Err(WireError::Truncated { expected: 10, actual: 4 })
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let _ = Request::decode(&bytes);
            let _ = Response::decode(&bytes);
        }

        #[test]
        fn prop_write_requests_survive_the_wire(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let request = Request::Write(Bytes::from(data));
            let mut buf = BytesMut::new();
            request.encode(&mut buf).unwrap();

            let (decoded, used) = Request::decode(&buf).unwrap();
            prop_assert_eq!(decoded, request);
            prop_assert_eq!(used, buf.len());
        }
    }
}
