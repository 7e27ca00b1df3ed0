// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! codefs client
//!
//! The client half of the codefs remote filesystem: a path-keyed metadata
//! cache with invalidation, write-back buffers for files open for writing,
//! and a request/response channel that keeps exactly one call in flight.
//! [`Client`] ties them together behind POSIX-shaped operations.

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metadata;
pub mod owned;
pub mod posix;

pub use channel::{HeartbeatHandle, RpcChannel};
pub use config::{ClientConfig, ClientConfigBuilder, Endpoint};
pub use dispatcher::{Client, FIRST_HANDLE};
pub use error::{ClientError, ClientResult};
pub use metadata::{parent_path, FileAttributes, FileMetadata, MetadataCache, MetadataView};
pub use owned::{HandleId, OwnedContentStore, OwnedFileInfo};
pub use posix::Posix;
