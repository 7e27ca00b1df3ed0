// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Owned-content store
//!
//! While a path is open for writing its content lives here, keyed by path
//! and reference-counted by the open handles. The buffer is authoritative
//! over the server's copy until the last handle closes and the content is
//! handed back for the flush.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::ReentrantMutex;
use tracing::trace;

use crate::error::{ClientError, ClientResult};

/// File-descriptor-like handle returned by `open`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Buffered content of one owned path; `handles` is empty only while the
/// flush of a last close is in flight.
#[derive(Clone, Debug)]
pub struct OwnedFileInfo {
    pub handles: HashSet<HandleId>,
    pub content: Vec<u8>,
}

#[derive(Default)]
pub struct OwnedContentStore {
    files: ReentrantMutex<RefCell<HashMap<String, OwnedFileInfo>>>,
}

impl OwnedContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` on `path`. The first opener's content is kept when
    /// the path is already owned. Returns true if a new entry was created.
    pub fn open(&self, path: &str, handle: HandleId, initial_content: Vec<u8>) -> bool {
        let guard = self.files.lock();
        let mut files = guard.borrow_mut();
        match files.get_mut(path) {
            Some(info) => {
                info.handles.insert(handle);
                trace!(path, %handle, handles = info.handles.len(), "owned handle added");
                false
            }
            None => {
                files.insert(
                    path.to_string(),
                    OwnedFileInfo {
                        handles: HashSet::from([handle]),
                        content: initial_content,
                    },
                );
                trace!(path, %handle, "owned entry created");
                true
            }
        }
    }

    /// Write `data` at `offset`, growing the buffer and zero-filling any gap.
    /// When `handle` is given it must be one of the path's open handles.
    pub fn write(
        &self,
        path: &str,
        handle: Option<HandleId>,
        offset: u64,
        data: &[u8],
    ) -> ClientResult<usize> {
        let guard = self.files.lock();
        let mut files = guard.borrow_mut();
        let info = files
            .get_mut(path)
            .ok_or_else(|| ClientError::NotOwned(path.to_string()))?;
        if let Some(handle) = handle {
            if !info.handles.contains(&handle) {
                return Err(ClientError::UnknownHandle {
                    path: path.to_string(),
                    handle: handle.0,
                });
            }
        }

        let start = usize::try_from(offset)
            .map_err(|_| ClientError::InvalidArgument(format!("offset {} too large", offset)))?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| ClientError::InvalidArgument("write overflows".into()))?;
        if info.content.len() < end {
            info.content.resize(end, 0);
        }
        info.content[start..end].copy_from_slice(data);
        Ok(data.len())
    }

    /// Read from the buffer at `offset`; `None` if the path is not owned.
    pub fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> Option<usize> {
        let guard = self.files.lock();
        let files = guard.borrow();
        let content = &files.get(path)?.content;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
        let count = buf.len().min(content.len() - start);
        buf[..count].copy_from_slice(&content[start..start + count]);
        Some(count)
    }

    /// Buffered length of an owned path.
    pub fn size_override(&self, path: &str) -> Option<u64> {
        let guard = self.files.lock();
        let files = guard.borrow();
        files.get(path).map(|info| info.content.len() as u64)
    }

    pub fn is_owned(&self, path: &str) -> bool {
        self.files.lock().borrow().contains_key(path)
    }

    /// Resize an owned buffer. Returns false if the path is not owned.
    pub fn truncate(&self, path: &str, size: u64) -> ClientResult<bool> {
        let size = usize::try_from(size)
            .map_err(|_| ClientError::InvalidArgument(format!("size {} too large", size)))?;
        let guard = self.files.lock();
        let mut files = guard.borrow_mut();
        Ok(match files.get_mut(path) {
            Some(info) => {
                info.content.resize(size, 0);
                true
            }
            None => false,
        })
    }

    /// Move owned entries at or below `from` to `to`. A target that is
    /// already owned keeps its handles, merged into the moved entry whose
    /// content replaces the target's. Entries with a last close in flight
    /// stay where they are.
    pub fn rename(&self, from: &str, to: &str) {
        let guard = self.files.lock();
        let mut files = guard.borrow_mut();
        let moved: Vec<String> = files
            .iter()
            .filter(|(path, info)| {
                !info.handles.is_empty() && renamed_path(path, from, to).is_some()
            })
            .map(|(path, _)| path.clone())
            .collect();
        for old in moved {
            let Some(new) = renamed_path(&old, from, to) else {
                continue;
            };
            let Some(mut info) = files.remove(&old) else {
                continue;
            };
            if let Some(target) = files.remove(&new) {
                trace!(
                    from = %old,
                    to = %new,
                    handles = target.handles.len(),
                    "owned target replaced"
                );
                info.handles.extend(target.handles);
            }
            trace!(from = %old, to = %new, "owned entry renamed");
            files.insert(new, info);
        }
    }

    /// Drop `handle` from `path`. When it was the last handle the content is
    /// returned for the flush and the entry stays in place until
    /// [`Self::finish_close`] or [`Self::abort_close`]; exactly one caller
    /// ever receives it.
    pub fn begin_close(&self, path: &str, handle: HandleId) -> ClientResult<Option<Vec<u8>>> {
        let guard = self.files.lock();
        let mut files = guard.borrow_mut();
        let info = files
            .get_mut(path)
            .ok_or_else(|| ClientError::NotOwned(path.to_string()))?;
        if !info.handles.remove(&handle) {
            return Err(ClientError::UnknownHandle {
                path: path.to_string(),
                handle: handle.0,
            });
        }
        if !info.handles.is_empty() {
            trace!(path, %handle, handles = info.handles.len(), "owned handle released");
            return Ok(None);
        }
        Ok(Some(info.content.clone()))
    }

    /// Remove the entry after a successful flush, unless a handle was
    /// opened on it meanwhile. Returns true if the entry was removed.
    pub fn finish_close(&self, path: &str) -> bool {
        let guard = self.files.lock();
        let mut files = guard.borrow_mut();
        match files.get(path) {
            Some(info) if info.handles.is_empty() => {
                files.remove(path);
                trace!(path, "owned entry released");
                true
            }
            _ => false,
        }
    }

    /// Put `handle` back after a failed flush so the close can be retried.
    pub fn abort_close(&self, path: &str, handle: HandleId) {
        let guard = self.files.lock();
        let mut files = guard.borrow_mut();
        if let Some(info) = files.get_mut(path) {
            info.handles.insert(handle);
        }
    }
}

/// Where `path` ends up when `from` is renamed to `to`, if it is affected.
pub(crate) fn renamed_path(path: &str, from: &str, to: &str) -> Option<String> {
    if path == from {
        return Some(to.to_string());
    }
    let rest = path.strip_prefix(from)?.strip_prefix('/')?;
    Some(format!("{}/{}", to.trim_end_matches('/'), rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_opener_content_wins() {
        let store = OwnedContentStore::new();
        assert!(store.open("/f", HandleId(3), b"abc".to_vec()));
        assert!(!store.open("/f", HandleId(4), b"zzzzzz".to_vec()));
        assert_eq!(store.size_override("/f"), Some(3));
    }

    #[test]
    fn sparse_write_zero_fills() {
        let store = OwnedContentStore::new();
        store.open("/f", HandleId(3), b"ab".to_vec());
        assert_eq!(store.write("/f", None, 4, b"xy").unwrap(), 2);

        let mut buf = [0xFFu8; 8];
        let n = store.read("/f", &mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"ab\0\0xy");
    }

    #[test]
    fn write_requires_ownership() {
        let store = OwnedContentStore::new();
        assert!(matches!(
            store.write("/nope", None, 0, b"x"),
            Err(ClientError::NotOwned(_))
        ));
        store.open("/f", HandleId(3), Vec::new());
        assert!(matches!(
            store.write("/f", Some(HandleId(99)), 0, b"x"),
            Err(ClientError::UnknownHandle { handle: 99, .. })
        ));
    }

    #[test]
    fn read_past_end_is_empty() {
        let store = OwnedContentStore::new();
        store.open("/f", HandleId(3), b"hello".to_vec());
        let mut buf = [0u8; 4];
        assert_eq!(store.read("/f", &mut buf, 10), Some(0));
        assert_eq!(store.read("/f", &mut buf, 3), Some(2));
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(store.read("/other", &mut buf, 0), None);
    }

    #[test]
    fn last_close_returns_content() {
        let store = OwnedContentStore::new();
        store.open("/f", HandleId(3), Vec::new());
        store.open("/f", HandleId(4), Vec::new());
        store.write("/f", Some(HandleId(4)), 0, b"data").unwrap();

        assert_eq!(store.begin_close("/f", HandleId(3)).unwrap(), None);
        assert!(store.is_owned("/f"));
        assert_eq!(
            store.begin_close("/f", HandleId(4)).unwrap(),
            Some(b"data".to_vec())
        );
        // Still readable while the flush is in flight.
        assert_eq!(store.size_override("/f"), Some(4));
        assert!(store.finish_close("/f"));
        assert!(!store.is_owned("/f"));
        assert_eq!(store.size_override("/f"), None);
    }

    #[test]
    fn open_during_flush_keeps_entry() {
        let store = OwnedContentStore::new();
        store.open("/f", HandleId(3), b"old".to_vec());
        store.write("/f", None, 0, b"new").unwrap();
        assert_eq!(store.begin_close("/f", HandleId(3)).unwrap(), Some(b"new".to_vec()));

        assert!(!store.open("/f", HandleId(4), b"server".to_vec()));
        assert!(!store.finish_close("/f"));
        assert_eq!(store.begin_close("/f", HandleId(4)).unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn aborted_close_can_be_retried() {
        let store = OwnedContentStore::new();
        store.open("/f", HandleId(3), b"abc".to_vec());
        assert!(store.begin_close("/f", HandleId(3)).unwrap().is_some());
        store.abort_close("/f", HandleId(3));
        assert!(store.is_owned("/f"));
        assert_eq!(store.begin_close("/f", HandleId(3)).unwrap(), Some(b"abc".to_vec()));
    }

    #[test]
    fn close_with_unknown_handle_keeps_entry() {
        let store = OwnedContentStore::new();
        store.open("/f", HandleId(3), Vec::new());
        assert!(store.begin_close("/f", HandleId(7)).is_err());
        assert!(store.is_owned("/f"));
        assert!(matches!(
            store.begin_close("/g", HandleId(3)),
            Err(ClientError::NotOwned(_))
        ));
    }

    #[test]
    fn truncate_and_rename() {
        let store = OwnedContentStore::new();
        store.open("/a", HandleId(3), b"hello world".to_vec());
        assert!(store.truncate("/a", 5).unwrap());
        assert!(!store.truncate("/b", 5).unwrap());

        store.rename("/a", "/b");
        assert_eq!(store.size_override("/a"), None);
        assert_eq!(store.size_override("/b"), Some(5));
        assert_eq!(store.begin_close("/b", HandleId(3)).unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn rename_onto_owned_path_merges_handles() {
        let store = OwnedContentStore::new();
        store.open("/a", HandleId(3), b"from a".to_vec());
        store.open("/b", HandleId(4), b"from b".to_vec());

        store.rename("/a", "/b");
        assert!(!store.is_owned("/a"));
        assert_eq!(store.begin_close("/b", HandleId(4)).unwrap(), None);
        assert_eq!(
            store.begin_close("/b", HandleId(3)).unwrap(),
            Some(b"from a".to_vec())
        );
    }

    #[test]
    fn rename_moves_entries_below_directory() {
        let store = OwnedContentStore::new();
        store.open("/dir/f", HandleId(3), b"x".to_vec());
        store.open("/dirt", HandleId(4), b"y".to_vec());

        store.rename("/dir", "/moved");
        assert!(store.is_owned("/moved/f"));
        assert!(store.is_owned("/dirt"));
        assert!(!store.is_owned("/dir/f"));
    }
}
