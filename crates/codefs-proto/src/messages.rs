// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Operation codes and payload schemas for the codefs RPC protocol

use ssz_derive::{Decode, Encode};

use crate::frame::{FrameError, RequestFrame};
use crate::{decode_payload, encode_payload};

/// The protocol version supported by this build. Both peers must agree.
pub const PROTOCOL_VERSION: u32 = 1;

/// Owner/group value meaning "leave unchanged" in [`LchownRequest`].
pub const ID_UNCHANGED: u32 = u32::MAX;

/// One-byte request header selecting the operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Hello = 0x01,
    Heartbeat = 0x02,
    FetchMetadata = 0x03,
    PollInvalidations = 0x04,
    Open = 0x10,
    Flush = 0x11,
    Read = 0x12,
    Mkdir = 0x13,
    Unlink = 0x14,
    Rmdir = 0x15,
    Symlink = 0x16,
    Rename = 0x17,
    Link = 0x18,
    Chmod = 0x19,
    Lchown = 0x1A,
    Truncate = 0x1B,
    Statvfs = 0x1C,
    Utimensat = 0x1D,
    Lsetxattr = 0x1E,
    Lremovexattr = 0x1F,
}

impl OpCode {
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Hello => "hello",
            OpCode::Heartbeat => "heartbeat",
            OpCode::FetchMetadata => "fetch_metadata",
            OpCode::PollInvalidations => "poll_invalidations",
            OpCode::Open => "open",
            OpCode::Flush => "flush",
            OpCode::Read => "read",
            OpCode::Mkdir => "mkdir",
            OpCode::Unlink => "unlink",
            OpCode::Rmdir => "rmdir",
            OpCode::Symlink => "symlink",
            OpCode::Rename => "rename",
            OpCode::Link => "link",
            OpCode::Chmod => "chmod",
            OpCode::Lchown => "lchown",
            OpCode::Truncate => "truncate",
            OpCode::Statvfs => "statvfs",
            OpCode::Utimensat => "utimensat",
            OpCode::Lsetxattr => "lsetxattr",
            OpCode::Lremovexattr => "lremovexattr",
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for OpCode {
    type Error = FrameError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        let op = match byte {
            0x01 => OpCode::Hello,
            0x02 => OpCode::Heartbeat,
            0x03 => OpCode::FetchMetadata,
            0x04 => OpCode::PollInvalidations,
            0x10 => OpCode::Open,
            0x11 => OpCode::Flush,
            0x12 => OpCode::Read,
            0x13 => OpCode::Mkdir,
            0x14 => OpCode::Unlink,
            0x15 => OpCode::Rmdir,
            0x16 => OpCode::Symlink,
            0x17 => OpCode::Rename,
            0x18 => OpCode::Link,
            0x19 => OpCode::Chmod,
            0x1A => OpCode::Lchown,
            0x1B => OpCode::Truncate,
            0x1C => OpCode::Statvfs,
            0x1D => OpCode::Utimensat,
            0x1E => OpCode::Lsetxattr,
            0x1F => OpCode::Lremovexattr,
            other => return Err(FrameError::UnknownOpCode(other)),
        };
        Ok(op)
    }
}

// Strings travel as raw byte vectors; SSZ has no native string type.

/// Connection handshake request
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct HelloRequest {
    pub protocol_version: u32,
}

/// Connection handshake reply
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct HelloReply {
    pub protocol_version: u32,
}

/// Single-path request (fetch metadata, unlink, rmdir)
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct PathRequest {
    pub path: Vec<u8>,
}

/// Path plus permission bits (mkdir, chmod)
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct PathModeRequest {
    pub path: Vec<u8>,
    pub mode: u32,
}

/// Two-path request (symlink, rename, link), always encoded as (from, to)
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct TwoPathRequest {
    pub from: Vec<u8>,
    pub to: Vec<u8>,
}

/// Open request
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct OpenRequest {
    pub path: Vec<u8>,
    pub flags: u32,
    pub mode: u32,
}

/// Open reply; carries the committed content when the file was opened for writing
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct OpenReply {
    pub content: Option<Vec<u8>>,
}

/// Commit of a locally buffered file
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct FlushRequest {
    pub path: Vec<u8>,
    pub content: Vec<u8>,
}

/// Positional read request
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ReadRequest {
    pub path: Vec<u8>,
    pub offset: u64,
    pub size: u64,
}

/// Bytes returned by a read
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct DataReply {
    pub data: Vec<u8>,
}

/// Ownership change; [`ID_UNCHANGED`] leaves the id as is
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct LchownRequest {
    pub path: Vec<u8>,
    pub uid: u32,
    pub gid: u32,
}

/// Truncate request
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct TruncateRequest {
    pub path: Vec<u8>,
    pub size: u64,
}

/// Seconds/nanoseconds pair. `nsec` may carry `UTIME_NOW` or `UTIME_OMIT`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct TimespecData {
    pub sec: u64,
    pub nsec: u32,
}

/// Timestamp update request
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct UtimensRequest {
    pub path: Vec<u8>,
    pub atime: TimespecData,
    pub mtime: TimespecData,
}

/// Extended attribute set request
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SetXattrRequest {
    pub path: Vec<u8>,
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    pub flags: u32,
}

/// Extended attribute removal request
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct RemoveXattrRequest {
    pub path: Vec<u8>,
    pub name: Vec<u8>,
}

/// Filesystem-level statistics
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct StatvfsReply {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub fsid: u64,
    pub flag: u64,
    pub namemax: u64,
}

/// POSIX attributes of one path
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct StatData {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u64,
    pub atime: TimespecData,
    pub mtime: TimespecData,
    pub ctime: TimespecData,
}

/// Extended attribute name/value pair
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct XattrData {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

/// Server-side view of one path
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct FileRecord {
    pub path: Vec<u8>,
    pub deleted: bool,
    pub stat: StatData,
    pub symlink_target: Option<Vec<u8>>,
    /// Child names (not full paths) when the record is a directory
    pub children: Vec<Vec<u8>>,
    pub xattrs: Vec<XattrData>,
}

/// Reply to FetchMetadata: the requested path first, then its children
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct MetadataReply {
    pub records: Vec<FileRecord>,
}

/// Paths the server wants the client to treat as stale
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct InvalidationReply {
    pub paths: Vec<Vec<u8>>,
}

/// Operation-level failure reported by the server
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ErrorReply {
    pub errno: u32,
    pub message: Vec<u8>,
}

/// Typed view of a request frame
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Hello(HelloRequest),
    Heartbeat,
    FetchMetadata(PathRequest),
    PollInvalidations,
    Open(OpenRequest),
    Flush(FlushRequest),
    Read(ReadRequest),
    Mkdir(PathModeRequest),
    Unlink(PathRequest),
    Rmdir(PathRequest),
    Symlink(TwoPathRequest),
    Rename(TwoPathRequest),
    Link(TwoPathRequest),
    Chmod(PathModeRequest),
    Lchown(LchownRequest),
    Truncate(TruncateRequest),
    Statvfs,
    Utimensat(UtimensRequest),
    Lsetxattr(SetXattrRequest),
    Lremovexattr(RemoveXattrRequest),
}

impl Request {
    pub fn op_code(&self) -> OpCode {
        match self {
            Request::Hello(_) => OpCode::Hello,
            Request::Heartbeat => OpCode::Heartbeat,
            Request::FetchMetadata(_) => OpCode::FetchMetadata,
            Request::PollInvalidations => OpCode::PollInvalidations,
            Request::Open(_) => OpCode::Open,
            Request::Flush(_) => OpCode::Flush,
            Request::Read(_) => OpCode::Read,
            Request::Mkdir(_) => OpCode::Mkdir,
            Request::Unlink(_) => OpCode::Unlink,
            Request::Rmdir(_) => OpCode::Rmdir,
            Request::Symlink(_) => OpCode::Symlink,
            Request::Rename(_) => OpCode::Rename,
            Request::Link(_) => OpCode::Link,
            Request::Chmod(_) => OpCode::Chmod,
            Request::Lchown(_) => OpCode::Lchown,
            Request::Truncate(_) => OpCode::Truncate,
            Request::Statvfs => OpCode::Statvfs,
            Request::Utimensat(_) => OpCode::Utimensat,
            Request::Lsetxattr(_) => OpCode::Lsetxattr,
            Request::Lremovexattr(_) => OpCode::Lremovexattr,
        }
    }

    /// Serialize into a request frame (header byte + SSZ payload).
    pub fn to_frame(&self) -> RequestFrame {
        let payload = match self {
            Request::Heartbeat | Request::PollInvalidations | Request::Statvfs => Vec::new(),
            Request::Hello(req) => encode_payload(req),
            Request::FetchMetadata(req) | Request::Unlink(req) | Request::Rmdir(req) => {
                encode_payload(req)
            }
            Request::Open(req) => encode_payload(req),
            Request::Flush(req) => encode_payload(req),
            Request::Read(req) => encode_payload(req),
            Request::Mkdir(req) | Request::Chmod(req) => encode_payload(req),
            Request::Symlink(req) | Request::Rename(req) | Request::Link(req) => {
                encode_payload(req)
            }
            Request::Lchown(req) => encode_payload(req),
            Request::Truncate(req) => encode_payload(req),
            Request::Utimensat(req) => encode_payload(req),
            Request::Lsetxattr(req) => encode_payload(req),
            Request::Lremovexattr(req) => encode_payload(req),
        };
        RequestFrame {
            op: self.op_code(),
            payload,
        }
    }

    /// Decode the payload of a request frame according to its header byte.
    pub fn from_frame(frame: &RequestFrame) -> Result<Self, FrameError> {
        let payload = frame.payload.as_slice();
        let request = match frame.op {
            OpCode::Hello => Request::Hello(decode_payload(payload)?),
            OpCode::Heartbeat => Request::Heartbeat,
            OpCode::FetchMetadata => Request::FetchMetadata(decode_payload(payload)?),
            OpCode::PollInvalidations => Request::PollInvalidations,
            OpCode::Open => Request::Open(decode_payload(payload)?),
            OpCode::Flush => Request::Flush(decode_payload(payload)?),
            OpCode::Read => Request::Read(decode_payload(payload)?),
            OpCode::Mkdir => Request::Mkdir(decode_payload(payload)?),
            OpCode::Unlink => Request::Unlink(decode_payload(payload)?),
            OpCode::Rmdir => Request::Rmdir(decode_payload(payload)?),
            OpCode::Symlink => Request::Symlink(decode_payload(payload)?),
            OpCode::Rename => Request::Rename(decode_payload(payload)?),
            OpCode::Link => Request::Link(decode_payload(payload)?),
            OpCode::Chmod => Request::Chmod(decode_payload(payload)?),
            OpCode::Lchown => Request::Lchown(decode_payload(payload)?),
            OpCode::Truncate => Request::Truncate(decode_payload(payload)?),
            OpCode::Statvfs => Request::Statvfs,
            OpCode::Utimensat => Request::Utimensat(decode_payload(payload)?),
            OpCode::Lsetxattr => Request::Lsetxattr(decode_payload(payload)?),
            OpCode::Lremovexattr => Request::Lremovexattr(decode_payload(payload)?),
        };
        Ok(request)
    }
}

// Constructors taking Rust strings (converted to byte vectors on the wire)
impl Request {
    pub fn hello(protocol_version: u32) -> Self {
        Self::Hello(HelloRequest { protocol_version })
    }

    pub fn fetch_metadata(path: &str) -> Self {
        Self::FetchMetadata(PathRequest::new(path))
    }

    pub fn open(path: &str, flags: u32, mode: u32) -> Self {
        Self::Open(OpenRequest {
            path: path.as_bytes().to_vec(),
            flags,
            mode,
        })
    }

    pub fn flush(path: &str, content: Vec<u8>) -> Self {
        Self::Flush(FlushRequest {
            path: path.as_bytes().to_vec(),
            content,
        })
    }

    pub fn read(path: &str, offset: u64, size: u64) -> Self {
        Self::Read(ReadRequest {
            path: path.as_bytes().to_vec(),
            offset,
            size,
        })
    }

    pub fn mkdir(path: &str, mode: u32) -> Self {
        Self::Mkdir(PathModeRequest::new(path, mode))
    }

    pub fn unlink(path: &str) -> Self {
        Self::Unlink(PathRequest::new(path))
    }

    pub fn rmdir(path: &str) -> Self {
        Self::Rmdir(PathRequest::new(path))
    }

    pub fn symlink(from: &str, to: &str) -> Self {
        Self::Symlink(TwoPathRequest::new(from, to))
    }

    pub fn rename(from: &str, to: &str) -> Self {
        Self::Rename(TwoPathRequest::new(from, to))
    }

    pub fn link(from: &str, to: &str) -> Self {
        Self::Link(TwoPathRequest::new(from, to))
    }

    pub fn chmod(path: &str, mode: u32) -> Self {
        Self::Chmod(PathModeRequest::new(path, mode))
    }

    pub fn lchown(path: &str, uid: Option<u32>, gid: Option<u32>) -> Self {
        Self::Lchown(LchownRequest {
            path: path.as_bytes().to_vec(),
            uid: uid.unwrap_or(ID_UNCHANGED),
            gid: gid.unwrap_or(ID_UNCHANGED),
        })
    }

    pub fn truncate(path: &str, size: u64) -> Self {
        Self::Truncate(TruncateRequest {
            path: path.as_bytes().to_vec(),
            size,
        })
    }

    pub fn utimensat(path: &str, atime: TimespecData, mtime: TimespecData) -> Self {
        Self::Utimensat(UtimensRequest {
            path: path.as_bytes().to_vec(),
            atime,
            mtime,
        })
    }

    pub fn lsetxattr(path: &str, name: &str, value: Vec<u8>, flags: u32) -> Self {
        Self::Lsetxattr(SetXattrRequest {
            path: path.as_bytes().to_vec(),
            name: name.as_bytes().to_vec(),
            value,
            flags,
        })
    }

    pub fn lremovexattr(path: &str, name: &str) -> Self {
        Self::Lremovexattr(RemoveXattrRequest {
            path: path.as_bytes().to_vec(),
            name: name.as_bytes().to_vec(),
        })
    }

    /// Every path the request names, in (from, to) order for two-path operations.
    pub fn paths(&self) -> Vec<&[u8]> {
        match self {
            Request::Hello(_)
            | Request::Heartbeat
            | Request::PollInvalidations
            | Request::Statvfs => Vec::new(),
            Request::FetchMetadata(req) | Request::Unlink(req) | Request::Rmdir(req) => {
                vec![req.path.as_slice()]
            }
            Request::Open(req) => vec![req.path.as_slice()],
            Request::Flush(req) => vec![req.path.as_slice()],
            Request::Read(req) => vec![req.path.as_slice()],
            Request::Mkdir(req) | Request::Chmod(req) => vec![req.path.as_slice()],
            Request::Symlink(req) => vec![req.to.as_slice()],
            Request::Rename(req) | Request::Link(req) => {
                vec![req.from.as_slice(), req.to.as_slice()]
            }
            Request::Lchown(req) => vec![req.path.as_slice()],
            Request::Truncate(req) => vec![req.path.as_slice()],
            Request::Utimensat(req) => vec![req.path.as_slice()],
            Request::Lsetxattr(req) => vec![req.path.as_slice()],
            Request::Lremovexattr(req) => vec![req.path.as_slice()],
        }
    }
}

impl PathRequest {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.as_bytes().to_vec(),
        }
    }
}

impl PathModeRequest {
    pub fn new(path: &str, mode: u32) -> Self {
        Self {
            path: path.as_bytes().to_vec(),
            mode,
        }
    }
}

impl TwoPathRequest {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.as_bytes().to_vec(),
            to: to.as_bytes().to_vec(),
        }
    }
}

impl ErrorReply {
    pub fn new(errno: i32, message: impl Into<String>) -> Self {
        Self {
            errno: errno.unsigned_abs(),
            message: message.into().into_bytes(),
        }
    }
}

impl FileRecord {
    /// Record for a path the server no longer has.
    pub fn deleted(path: &str) -> Self {
        Self {
            path: path.as_bytes().to_vec(),
            deleted: true,
            stat: StatData::default(),
            symlink_target: None,
            children: Vec::new(),
            xattrs: Vec::new(),
        }
    }
}
