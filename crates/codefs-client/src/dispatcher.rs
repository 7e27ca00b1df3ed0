// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filesystem dispatcher
//!
//! [`Client`] is the operation surface a filesystem hook calls into. Each
//! operation is at most one round trip on the shared [`RpcChannel`]; results
//! are applied to the metadata cache and the owned-content store before
//! returning. Nothing is retried here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use codefs_proto::{
    validate_record, DataReply, InvalidationReply, MetadataReply, OpenReply, Request,
    StatvfsReply, TimespecData, Transport, MAX_READ_SIZE,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::channel::{HeartbeatHandle, RpcChannel};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::metadata::{FileAttributes, FileMetadata, MetadataCache, MetadataView};
use crate::owned::{renamed_path, HandleId, OwnedContentStore};
use crate::posix::Posix;

/// Handles 0-2 are left to stdio.
pub const FIRST_HANDLE: u64 = 3;

#[derive(Clone, Debug)]
struct OpenHandle {
    path: String,
    writable: bool,
}

pub struct Client {
    channel: Arc<RpcChannel>,
    metadata: MetadataCache,
    owned: OwnedContentStore,
    handles: Mutex<HashMap<HandleId, OpenHandle>>,
    next_handle: AtomicU64,
    heartbeat_interval: Option<Duration>,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
}

impl Client {
    /// Handshake over an already connected transport. The heartbeat thread
    /// is not started; see [`Client::start_heartbeat`].
    pub fn new(transport: Box<dyn Transport>, config: &ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let channel = Arc::new(RpcChannel::new(transport, config.liveness_timeout()));
        channel.handshake()?;
        Ok(Self {
            channel,
            metadata: MetadataCache::new(),
            owned: OwnedContentStore::new(),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(FIRST_HANDLE),
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat: Mutex::new(None),
        })
    }

    /// Connect to the configured endpoint, handshake and start the heartbeat.
    pub fn connect(config: &ClientConfig) -> ClientResult<Self> {
        let transport = config.endpoint.connect(config.connect_timeout())?;
        let client = Self::new(transport, config)?;
        client.start_heartbeat()?;
        info!(endpoint = %config.endpoint, "connected");
        Ok(client)
    }

    /// Start the background heartbeat if an interval is configured.
    pub fn start_heartbeat(&self) -> ClientResult<()> {
        let Some(interval) = self.heartbeat_interval else {
            return Ok(());
        };
        let mut heartbeat = self.heartbeat.lock();
        if heartbeat.is_none() {
            *heartbeat = Some(self.channel.spawn_heartbeat(interval)?);
        }
        Ok(())
    }

    pub fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.stop();
        }
    }

    /// One liveness check, for callers driving the heartbeat themselves.
    pub fn heartbeat(&self) -> ClientResult<()> {
        self.channel.heartbeat()
    }

    /// Install a fresh transport after the channel degraded. Every cached
    /// entry is invalidated since the server may have changed meanwhile.
    pub fn reconnect(&self, transport: Box<dyn Transport>) -> ClientResult<()> {
        self.channel.reconnect(transport)?;
        for path in self.metadata.paths() {
            self.metadata.invalidate(&path);
        }
        Ok(())
    }

    pub fn is_degraded(&self) -> bool {
        self.channel.is_degraded()
    }

    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    pub fn posix(&self) -> Posix<'_> {
        Posix::new(self)
    }

    /// Apply the server's pending invalidation notices. Returns how many
    /// paths were invalidated.
    pub fn update(&self) -> ClientResult<usize> {
        let reply: InvalidationReply = self.channel.call_decode(&Request::PollInvalidations)?;
        for path in &reply.paths {
            self.metadata.invalidate(&String::from_utf8_lossy(path));
        }
        if !reply.paths.is_empty() {
            debug!(count = reply.paths.len(), "applied invalidations");
        }
        Ok(reply.paths.len())
    }

    // Metadata

    /// Attributes of `path`, refreshed from the server when the cached entry
    /// is missing or invalid. An owned path reports its buffered size.
    pub fn getattr(&self, path: &str) -> ClientResult<FileAttributes> {
        let entry = self.refresh(path)?;
        let mut attributes = entry
            .attributes
            .ok_or_else(|| ClientError::NotFound(path.to_string()))?;
        if let Some(size) = self.owned.size_override(path) {
            attributes.size = size;
        }
        Ok(attributes)
    }

    pub fn readdir(&self, path: &str) -> ClientResult<Vec<String>> {
        let entry = self.refresh(path)?;
        match &entry.attributes {
            Some(attributes) if attributes.is_dir() => Ok(entry.children),
            _ => Err(ClientError::NotADirectory(path.to_string())),
        }
    }

    pub fn readlink(&self, path: &str) -> ClientResult<String> {
        self.refresh(path)?
            .symlink_target
            .ok_or_else(|| ClientError::NotASymlink(path.to_string()))
    }

    fn refresh(&self, path: &str) -> ClientResult<FileMetadata> {
        let entry = match self.metadata.lookup(path) {
            Some(entry) if !entry.invalid && (entry.attributes.is_some() || entry.deleted) => {
                entry
            }
            _ => self.fetch(path)?,
        };
        if entry.deleted {
            return Err(ClientError::NotFound(path.to_string()));
        }
        Ok(entry)
    }

    fn fetch(&self, path: &str) -> ClientResult<FileMetadata> {
        let reply: MetadataReply = self.channel.call_decode(&Request::fetch_metadata(path))?;
        for record in &reply.records {
            validate_record(record).map_err(|err| ClientError::Protocol(err.to_string()))?;
            self.metadata.insert_record(record);
        }
        self.metadata
            .lookup(path)
            .filter(|entry| !entry.invalid)
            .ok_or_else(|| ClientError::Protocol(format!("metadata reply did not cover {}", path)))
    }

    // File content

    /// Open `path`. Opening for writing makes the path owned, seeded with the
    /// server's current content.
    pub fn open(&self, path: &str, flags: i32, mode: u32) -> ClientResult<HandleId> {
        let reply: OpenReply = self
            .channel
            .call_decode(&Request::open(path, flags as u32, mode))?;
        let handle = HandleId(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let writable = flags & libc::O_ACCMODE != libc::O_RDONLY;

        if writable {
            let created = self
                .owned
                .open(path, handle, reply.content.unwrap_or_default());
            if !created && flags & libc::O_TRUNC != 0 {
                self.owned.truncate(path, 0)?;
            }
        }
        if flags & libc::O_CREAT != 0 {
            self.metadata.invalidate_path_and_parent(path);
        } else if writable {
            self.metadata.invalidate(path);
        }

        self.handles.lock().insert(
            handle,
            OpenHandle {
                path: path.to_string(),
                writable,
            },
        );
        debug!(path, %handle, writable, "opened");
        Ok(handle)
    }

    /// Release `handle`, which must have been opened on `path`. The last
    /// writable handle on a path flushes the buffered content; if that flush
    /// fails the handle stays open.
    pub fn close(&self, path: &str, handle: HandleId) -> ClientResult<()> {
        let open = self
            .handles
            .lock()
            .get(&handle)
            .filter(|open| open.path == path)
            .cloned()
            .ok_or_else(|| ClientError::UnknownHandle {
                path: path.to_string(),
                handle: handle.0,
            })?;

        if open.writable {
            if let Some(content) = self.owned.begin_close(path, handle)? {
                debug!(path, bytes = content.len(), "flushing");
                if let Err(err) = self.channel.call(&Request::flush(path, content)) {
                    self.owned.abort_close(path, handle);
                    return Err(err);
                }
                let released = self.owned.finish_close(path);
                self.metadata.invalidate(path);
                debug!(path, released, "flushed");
            }
        }

        self.handles.lock().remove(&handle);
        debug!(path, %handle, "closed");
        Ok(())
    }

    /// Read into `buf` at `offset`. Owned paths are served locally; others
    /// take one read round trip, capped at the protocol's read limit.
    pub fn pread(&self, path: &str, buf: &mut [u8], offset: u64) -> ClientResult<usize> {
        if let Some(count) = self.owned.read(path, buf, offset) {
            return Ok(count);
        }
        let size = (buf.len() as u64).min(MAX_READ_SIZE);
        let reply: DataReply = self
            .channel
            .call_decode(&Request::read(path, offset, size))?;
        let count = reply.data.len().min(buf.len());
        buf[..count].copy_from_slice(&reply.data[..count]);
        Ok(count)
    }

    /// Write into the owned buffer; committed to the server on last close.
    pub fn pwrite(&self, path: &str, data: &[u8], offset: u64) -> ClientResult<usize> {
        self.owned.write(path, None, offset, data)
    }

    /// Buffered size of an owned path.
    pub fn get_size_override(&self, path: &str) -> Option<u64> {
        self.owned.size_override(path)
    }

    // Namespace

    pub fn mkdir(&self, path: &str, mode: u32) -> ClientResult<()> {
        self.channel.call(&Request::mkdir(path, mode))?;
        self.metadata.invalidate_path_and_parent(path);
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> ClientResult<()> {
        self.channel.call(&Request::unlink(path))?;
        self.metadata.invalidate_path_and_parent(path);
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> ClientResult<()> {
        self.channel.call(&Request::rmdir(path))?;
        self.metadata.invalidate_path_and_parent(path);
        Ok(())
    }

    /// Create `to` as a symbolic link whose body is `from`.
    pub fn symlink(&self, from: &str, to: &str) -> ClientResult<()> {
        self.channel.call(&Request::symlink(from, to))?;
        self.metadata.invalidate_path_and_parent(to);
        Ok(())
    }

    pub fn rename(&self, from: &str, to: &str) -> ClientResult<()> {
        self.channel.call(&Request::rename(from, to))?;
        self.owned.rename(from, to);
        for open in self.handles.lock().values_mut() {
            if let Some(renamed) = renamed_path(&open.path, from, to) {
                open.path = renamed;
            }
        }
        self.metadata.invalidate_path_and_parent(from);
        self.metadata.invalidate_path_and_parent(to);
        Ok(())
    }

    pub fn link(&self, from: &str, to: &str) -> ClientResult<()> {
        self.channel.call(&Request::link(from, to))?;
        self.metadata.invalidate_path_and_parent(from);
        self.metadata.invalidate_path_and_parent(to);
        Ok(())
    }

    // Attributes

    pub fn chmod(&self, path: &str, mode: u32) -> ClientResult<()> {
        self.channel.call(&Request::chmod(path, mode))?;
        self.metadata.invalidate(path);
        Ok(())
    }

    /// `None` leaves the owner or group unchanged.
    pub fn lchown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> ClientResult<()> {
        self.channel.call(&Request::lchown(path, uid, gid))?;
        self.metadata.invalidate(path);
        Ok(())
    }

    pub fn truncate(&self, path: &str, size: u64) -> ClientResult<()> {
        self.channel.call(&Request::truncate(path, size))?;
        self.owned.truncate(path, size)?;
        self.metadata.invalidate(path);
        Ok(())
    }

    pub fn utimensat(
        &self,
        path: &str,
        atime: TimespecData,
        mtime: TimespecData,
    ) -> ClientResult<()> {
        self.channel.call(&Request::utimensat(path, atime, mtime))?;
        self.metadata.invalidate(path);
        Ok(())
    }

    pub fn lsetxattr(
        &self,
        path: &str,
        name: &str,
        value: &[u8],
        flags: u32,
    ) -> ClientResult<()> {
        self.channel
            .call(&Request::lsetxattr(path, name, value.to_vec(), flags))?;
        self.metadata.invalidate(path);
        Ok(())
    }

    pub fn lremovexattr(&self, path: &str, name: &str) -> ClientResult<()> {
        self.channel.call(&Request::lremovexattr(path, name))?;
        self.metadata.invalidate(path);
        Ok(())
    }

    pub fn statvfs(&self) -> ClientResult<StatvfsReply> {
        self.channel.call_decode(&Request::Statvfs)
    }
}
