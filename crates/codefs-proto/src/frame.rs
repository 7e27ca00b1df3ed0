// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Request and response frames
//!
//! A request frame is the operation header byte followed by the SSZ payload.
//! A response frame is a status byte followed by either the operation result
//! or an [`ErrorReply`]. Frames carry no correlation id: a response always
//! belongs to the single request currently outstanding on the channel.

use ssz::Encode;
use thiserror::Error;

use crate::messages::{ErrorReply, OpCode};
use crate::{decode_payload, encode_payload};

/// Status byte of a successful response
pub const STATUS_OK: u8 = 0;
/// Status byte of an operation-level failure
pub const STATUS_ERROR: u8 = 1;

/// Frame decoding error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown operation code {0:#04x}")]
    UnknownOpCode(u8),
    #[error("unknown response status {0}")]
    UnknownStatus(u8),
    #[error("malformed payload: {0}")]
    Payload(String),
}

/// One request unit as sent over the transport
#[derive(Clone, Debug, PartialEq)]
pub struct RequestFrame {
    pub op: OpCode,
    pub payload: Vec<u8>,
}

impl RequestFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.payload.len());
        bytes.push(self.op as u8);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let (&header, payload) = bytes.split_first().ok_or(FrameError::Empty)?;
        Ok(Self {
            op: OpCode::try_from(header)?,
            payload: payload.to_vec(),
        })
    }
}

/// One response unit as received from the transport
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseFrame {
    Ok(Vec<u8>),
    Error(ErrorReply),
}

impl ResponseFrame {
    /// Successful response carrying an SSZ-encoded result.
    pub fn ok(result: &impl Encode) -> Self {
        Self::Ok(encode_payload(result))
    }

    /// Successful response without a result payload.
    pub fn empty() -> Self {
        Self::Ok(Vec::new())
    }

    pub fn error(errno: i32, message: impl Into<String>) -> Self {
        Self::Error(ErrorReply::new(errno, message))
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            ResponseFrame::Ok(payload) => {
                let mut bytes = Vec::with_capacity(1 + payload.len());
                bytes.push(STATUS_OK);
                bytes.extend_from_slice(payload);
                bytes
            }
            ResponseFrame::Error(reply) => {
                let mut bytes = vec![STATUS_ERROR];
                bytes.extend_from_slice(&encode_payload(reply));
                bytes
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let (&status, payload) = bytes.split_first().ok_or(FrameError::Empty)?;
        match status {
            STATUS_OK => Ok(Self::Ok(payload.to_vec())),
            STATUS_ERROR => Ok(Self::Error(decode_payload(payload)?)),
            other => Err(FrameError::UnknownStatus(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{DataReply, Request};

    #[test]
    fn request_header_is_first_byte() {
        let frame = Request::mkdir("/x", 0o755).to_frame();
        let bytes = frame.encode();
        assert_eq!(bytes[0], OpCode::Mkdir as u8);
        assert_eq!(RequestFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn two_path_requests_keep_from_to_order() {
        let frame = Request::rename("/a", "/b").to_frame();
        let decoded = Request::from_frame(&RequestFrame::decode(&frame.encode()).unwrap()).unwrap();
        match decoded {
            Request::Rename(req) => {
                assert_eq!(req.from, b"/a");
                assert_eq!(req.to, b"/b");
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn unknown_header_is_rejected() {
        assert_eq!(
            RequestFrame::decode(&[0xEE, 1, 2]),
            Err(FrameError::UnknownOpCode(0xEE))
        );
        assert_eq!(RequestFrame::decode(&[]), Err(FrameError::Empty));
    }

    #[test]
    fn error_response_carries_errno() {
        let bytes = ResponseFrame::error(2, "no such file").encode();
        assert_eq!(bytes[0], STATUS_ERROR);
        match ResponseFrame::decode(&bytes).unwrap() {
            ResponseFrame::Error(reply) => {
                assert_eq!(reply.errno, 2);
                assert_eq!(reply.message, b"no such file");
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn ok_response_payload_decodes() {
        let bytes = ResponseFrame::ok(&DataReply {
            data: b"hello".to_vec(),
        })
        .encode();
        let ResponseFrame::Ok(payload) = ResponseFrame::decode(&bytes).unwrap() else {
            panic!("expected ok frame");
        };
        let reply: DataReply = decode_payload(&payload).unwrap();
        assert_eq!(reply.data, b"hello");
    }

    #[test]
    fn unknown_status_is_protocol_error() {
        assert_eq!(
            ResponseFrame::decode(&[7]),
            Err(FrameError::UnknownStatus(7))
        );
    }
}
