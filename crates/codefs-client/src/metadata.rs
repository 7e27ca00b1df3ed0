// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Metadata cache
//!
//! Maps absolute paths to the last metadata the server reported. Entries are
//! never removed: invalidation flips the `invalid` flag (creating an empty
//! placeholder if the path was never seen) so lookups stay total over every
//! path the client has touched. Deleted paths are kept as tombstones.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use codefs_proto::{FileRecord, StatData, TimespecData};
use parking_lot::ReentrantMutex;
use tracing::trace;

/// POSIX attributes of a cached path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileAttributes {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl FileAttributes {
    pub fn from_stat(stat: &StatData) -> Self {
        Self {
            mode: stat.mode,
            uid: stat.uid,
            gid: stat.gid,
            size: stat.size,
            nlink: stat.nlink,
            atime: to_system_time(stat.atime),
            mtime: to_system_time(stat.mtime),
            ctime: to_system_time(stat.ctime),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFLNK as u32
    }

    pub fn is_file(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFREG as u32
    }

    /// Permission bits without the file type.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Times past what `SystemTime` can hold saturate to the epoch; records
/// carrying them are rejected by `validate_record` before reaching the cache.
fn to_system_time(time: TimespecData) -> SystemTime {
    UNIX_EPOCH
        .checked_add(Duration::new(time.sec, time.nsec.min(999_999_999)))
        .unwrap_or(UNIX_EPOCH)
}

/// Cached view of one path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMetadata {
    pub path: String,
    /// `None` for placeholders created by invalidation.
    pub attributes: Option<FileAttributes>,
    /// Tombstone: the server reported the path as gone.
    pub deleted: bool,
    pub symlink_target: Option<String>,
    /// Child names when the path is a directory.
    pub children: Vec<String>,
    pub xattrs: BTreeMap<String, Vec<u8>>,
    /// Attributes are stale and must be refreshed before being trusted.
    pub invalid: bool,
}

impl FileMetadata {
    pub fn placeholder(path: &str) -> Self {
        Self {
            path: path.to_string(),
            attributes: None,
            deleted: false,
            symlink_target: None,
            children: Vec::new(),
            xattrs: BTreeMap::new(),
            invalid: true,
        }
    }

    pub fn from_record(record: &FileRecord) -> Self {
        let lossy = |bytes: &[u8]| String::from_utf8_lossy(bytes).into_owned();
        Self {
            path: lossy(&record.path[..]),
            attributes: (!record.deleted).then(|| FileAttributes::from_stat(&record.stat)),
            deleted: record.deleted,
            symlink_target: record.symlink_target.as_deref().map(lossy),
            children: record.children.iter().map(|name| lossy(name.as_slice())).collect(),
            xattrs: record
                .xattrs
                .iter()
                .map(|xattr| (lossy(&xattr.name[..]), xattr.value.clone()))
                .collect(),
            invalid: false,
        }
    }

    /// Valid, non-deleted entry.
    pub fn is_usable(&self) -> bool {
        !self.invalid && !self.deleted && self.attributes.is_some()
    }
}

/// Metadata lookup and invalidation, as needed by the dispatcher.
pub trait MetadataView: Send + Sync {
    fn lookup(&self, path: &str) -> Option<FileMetadata>;
    fn invalidate(&self, path: &str);
    fn invalidate_path_and_parent(&self, path: &str);
}

/// Path-keyed metadata cache behind a single reentrant lock
#[derive(Default)]
pub struct MetadataCache {
    entries: ReentrantMutex<RefCell<HashMap<String, FileMetadata>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache from an initial listing.
    pub fn init(&self, records: &[FileRecord]) {
        let guard = self.entries.lock();
        let mut entries = guard.borrow_mut();
        for record in records {
            let metadata = FileMetadata::from_record(record);
            entries.insert(metadata.path.clone(), metadata);
        }
    }

    pub fn insert(&self, metadata: FileMetadata) {
        let guard = self.entries.lock();
        guard.borrow_mut().insert(metadata.path.clone(), metadata);
    }

    pub fn insert_record(&self, record: &FileRecord) {
        self.insert(FileMetadata::from_record(record));
    }

    /// Paths currently cached, sorted.
    pub fn paths(&self) -> Vec<String> {
        let guard = self.entries.lock();
        let mut paths: Vec<String> = guard.borrow().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.entries.lock().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataView for MetadataCache {
    /// Cached entry regardless of validity; callers check `invalid`.
    fn lookup(&self, path: &str) -> Option<FileMetadata> {
        self.entries.lock().borrow().get(path).cloned()
    }

    fn invalidate(&self, path: &str) {
        let guard = self.entries.lock();
        let mut entries = guard.borrow_mut();
        trace!(path, "invalidate");
        entries
            .entry(path.to_string())
            .and_modify(|metadata| metadata.invalid = true)
            .or_insert_with(|| FileMetadata::placeholder(path));
    }

    fn invalidate_path_and_parent(&self, path: &str) {
        // Both invalidations happen under one acquisition; the inner calls
        // re-enter the lock.
        let _guard = self.entries.lock();
        self.invalidate(parent_path(path));
        self.invalidate(path);
    }
}

/// Parent directory of an absolute path; the root is its own parent.
pub fn parent_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &trimmed[..idx],
    }
}

/// Join a directory and a child name.
pub fn child_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}
