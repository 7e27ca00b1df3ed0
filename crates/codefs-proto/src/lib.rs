// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! codefs protocol: framing, payload schemas and transports
//!
//! This crate defines the message framing layer shared by the codefs client and
//! server: the one-byte operation codes, the SSZ payload schemas carried by
//! each operation, the request/response frame encodings, and the
//! length-prefixed stream transport the frames travel over.

pub mod frame;
pub mod messages;
pub mod transport;
pub mod validation;

pub use frame::{FrameError, RequestFrame, ResponseFrame, STATUS_ERROR, STATUS_OK};
pub use messages::{
    DataReply, ErrorReply, FileRecord, FlushRequest, HelloReply, HelloRequest,
    InvalidationReply, LchownRequest, MetadataReply, OpCode, OpenReply, OpenRequest,
    PathModeRequest, PathRequest, ReadRequest, RemoveXattrRequest, Request, SetXattrRequest,
    StatData, StatvfsReply, TimespecData, TruncateRequest, TwoPathRequest, UtimensRequest,
    XattrData, ID_UNCHANGED, PROTOCOL_VERSION,
};
pub use transport::{FramedStream, ReadTimeout, Transport, TransportError, MAX_FRAME_LEN};
pub use validation::*;

use ssz::{Decode, Encode};

/// Encode a payload using SSZ
pub fn encode_payload(data: &impl Encode) -> Vec<u8> {
    data.as_ssz_bytes()
}

/// Decode a payload from SSZ bytes
pub fn decode_payload<T: Decode>(data: &[u8]) -> Result<T, FrameError> {
    T::from_ssz_bytes(data).map_err(|err| FrameError::Payload(format!("{:?}", err)))
}
