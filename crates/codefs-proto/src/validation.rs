// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Schema validation for codefs requests

use crate::messages::*;
use thiserror::Error;

/// Largest single read a client may request
pub const MAX_READ_SIZE: u64 = 16 * 1024 * 1024;

/// Latest timestamp, in seconds since the epoch, a record may carry
pub const MAX_TIME_SECS: u64 = i64::MAX as u64;

/// Validation error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("schema validation failed: {0}")]
    Schema(String),
    #[error("invalid path {path:?}: {reason}")]
    Path { path: String, reason: &'static str },
}

/// Validate a decoded request against its logical schema
pub fn validate_request(request: &Request) -> Result<(), ValidationError> {
    for path in request.paths() {
        validate_path(path)?;
    }

    match request {
        Request::Hello(hello) => {
            if hello.protocol_version == 0 {
                return Err(ValidationError::Schema(
                    "protocol version must be non-zero".to_string(),
                ));
            }
            Ok(())
        }
        Request::Read(read) => {
            if read.size > MAX_READ_SIZE {
                return Err(ValidationError::Schema(format!(
                    "read of {} bytes exceeds the {} byte limit",
                    read.size, MAX_READ_SIZE
                )));
            }
            Ok(())
        }
        Request::Symlink(symlink) => {
            // `from` is the link body and may be relative.
            if symlink.from.is_empty() || symlink.from.contains(&0) {
                return Err(ValidationError::Schema(
                    "symlink target must be non-empty and NUL-free".to_string(),
                ));
            }
            Ok(())
        }
        Request::Lsetxattr(SetXattrRequest { name, .. })
        | Request::Lremovexattr(RemoveXattrRequest { name, .. }) => {
            if name.is_empty() || name.contains(&0) {
                return Err(ValidationError::Schema(
                    "xattr name must be non-empty and NUL-free".to_string(),
                ));
            }
            Ok(())
        }
        Request::Heartbeat
        | Request::FetchMetadata(_)
        | Request::PollInvalidations
        | Request::Open(_)
        | Request::Flush(_)
        | Request::Mkdir(_)
        | Request::Unlink(_)
        | Request::Rmdir(_)
        | Request::Rename(_)
        | Request::Link(_)
        | Request::Chmod(_)
        | Request::Lchown(_)
        | Request::Truncate(_)
        | Request::Statvfs
        | Request::Utimensat(_) => Ok(()),
    }
}

/// Paths are absolute, UTF-8 and NUL-free.
pub fn validate_path(path: &[u8]) -> Result<(), ValidationError> {
    let display = String::from_utf8_lossy(path).into_owned();
    if path.first() != Some(&b'/') {
        return Err(ValidationError::Path {
            path: display,
            reason: "must be absolute",
        });
    }
    if path.contains(&0) {
        return Err(ValidationError::Path {
            path: display,
            reason: "contains a NUL byte",
        });
    }
    if std::str::from_utf8(path).is_err() {
        return Err(ValidationError::Path {
            path: display,
            reason: "is not valid UTF-8",
        });
    }
    Ok(())
}

/// Validate a record returned by FetchMetadata
pub fn validate_record(record: &FileRecord) -> Result<(), ValidationError> {
    validate_path(&record.path)?;
    let stat = &record.stat;
    let times = [("atime", stat.atime), ("mtime", stat.mtime), ("ctime", stat.ctime)];
    for (field, time) in times {
        if time.sec > MAX_TIME_SECS || time.nsec >= 1_000_000_000 {
            return Err(ValidationError::Schema(format!(
                "{} out of range ({}.{:09}) for {}",
                field,
                time.sec,
                time.nsec,
                String::from_utf8_lossy(&record.path)
            )));
        }
    }
    for child in &record.children {
        if child.is_empty() || child.contains(&b'/') || child.contains(&0) {
            return Err(ValidationError::Schema(format!(
                "invalid child name {:?} under {}",
                String::from_utf8_lossy(child),
                String::from_utf8_lossy(&record.path)
            )));
        }
    }
    Ok(())
}
