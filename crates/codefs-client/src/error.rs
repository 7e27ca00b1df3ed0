// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Client error taxonomy and its POSIX errno mapping

use codefs_proto::{FrameError, TransportError, ValidationError};
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("no response within the liveness window of {timeout_ms} ms")]
    LivenessTimeout { timeout_ms: u64 },

    #[error("channel is degraded; reconnect required")]
    Degraded,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("request of {len} bytes exceeds the {limit} byte frame limit")]
    RequestTooLarge { len: usize, limit: usize },

    #[error("protocol version mismatch: client {client}, server {server}")]
    VersionMismatch { client: u32, server: u32 },

    #[error("server error {errno}: {message}")]
    Remote { errno: i32, message: String },

    #[error("path is not open for writing: {0}")]
    NotOwned(String),

    #[error("handle {handle} is not open on {path}")]
    UnknownHandle { path: String, handle: u64 },

    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("not a symbolic link: {0}")]
    NotASymlink(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Positive POSIX errno for this error.
    pub fn errno(&self) -> i32 {
        match self {
            ClientError::Transport(_)
            | ClientError::LivenessTimeout { .. }
            | ClientError::Degraded
            | ClientError::Protocol(_) => libc::EIO,
            ClientError::VersionMismatch { .. } => libc::EPROTO,
            ClientError::RequestTooLarge { .. } => libc::EFBIG,
            ClientError::Remote { errno, .. } => {
                if *errno > 0 {
                    *errno
                } else {
                    libc::EIO
                }
            }
            ClientError::NotOwned(_) | ClientError::UnknownHandle { .. } => libc::EBADF,
            ClientError::NotFound(_) => libc::ENOENT,
            ClientError::NotADirectory(_) => libc::ENOTDIR,
            ClientError::NotASymlink(_) | ClientError::InvalidArgument(_) => libc::EINVAL,
            ClientError::Config(_) => libc::EINVAL,
        }
    }

    /// Whether the error leaves the channel unusable until reconnect.
    pub fn is_channel_failure(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_)
                | ClientError::LivenessTimeout { .. }
                | ClientError::Degraded
                | ClientError::Protocol(_)
                | ClientError::VersionMismatch { .. }
        )
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

impl From<ValidationError> for ClientError {
    fn from(err: ValidationError) -> Self {
        ClientError::InvalidArgument(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_failures_map_to_eio() {
        assert_eq!(ClientError::Degraded.errno(), libc::EIO);
        assert_eq!(
            ClientError::LivenessTimeout { timeout_ms: 10 }.errno(),
            libc::EIO
        );
        assert_eq!(
            ClientError::Transport(TransportError::Disconnected).errno(),
            libc::EIO
        );
        assert_eq!(ClientError::Protocol("bad".into()).errno(), libc::EIO);
    }

    #[test]
    fn remote_errno_is_passed_through() {
        let err = ClientError::Remote {
            errno: libc::ENOTEMPTY,
            message: "directory not empty".into(),
        };
        assert_eq!(err.errno(), libc::ENOTEMPTY);
        assert!(!err.is_channel_failure());
    }

    #[test]
    fn local_consistency_failures_are_ebadf() {
        assert_eq!(ClientError::NotOwned("/f".into()).errno(), libc::EBADF);
        assert_eq!(
            ClientError::UnknownHandle {
                path: "/f".into(),
                handle: 9
            }
            .errno(),
            libc::EBADF
        );
    }

    #[test]
    fn version_mismatch_is_fatal_protocol_error() {
        let err = ClientError::VersionMismatch {
            client: 1,
            server: 2,
        };
        assert_eq!(err.errno(), libc::EPROTO);
        assert!(err.is_channel_failure());
    }
}
