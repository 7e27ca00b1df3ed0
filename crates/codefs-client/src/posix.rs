// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! POSIX-shaped adapter over [`Client`]
//!
//! Every call returns zero or a positive value on success and a negated
//! errno on failure, matching what a kernel filesystem hook hands back.

use codefs_proto::TimespecData;
use tracing::debug;

use crate::dispatcher::Client;
use crate::error::ClientResult;
use crate::owned::HandleId;

pub struct Posix<'a> {
    client: &'a Client,
}

fn status(op: &str, result: ClientResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            debug!(op, error = %err, "posix call failed");
            -err.errno()
        }
    }
}

fn count(op: &str, result: ClientResult<usize>) -> i32 {
    match result {
        Ok(n) => i32::try_from(n).unwrap_or(i32::MAX),
        Err(err) => {
            debug!(op, error = %err, "posix call failed");
            -err.errno()
        }
    }
}

fn offset(offset: i64) -> Option<u64> {
    u64::try_from(offset).ok()
}

fn timespec(ts: &libc::timespec) -> TimespecData {
    TimespecData {
        sec: u64::try_from(ts.tv_sec).unwrap_or(0),
        nsec: ts.tv_nsec as u32,
    }
}

impl<'a> Posix<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// Handle on success.
    pub fn open(&self, path: &str, flags: i32, mode: libc::mode_t) -> i32 {
        match self.client.open(path, flags, mode as u32) {
            Ok(handle) => i32::try_from(handle.0).unwrap_or(-libc::EMFILE),
            Err(err) => -err.errno(),
        }
    }

    pub fn close(&self, path: &str, fd: i32) -> i32 {
        let Ok(handle) = u64::try_from(fd) else {
            return -libc::EBADF;
        };
        status("close", self.client.close(path, HandleId(handle)))
    }

    pub fn pread(&self, path: &str, buf: &mut [u8], off: i64) -> i32 {
        let Some(off) = offset(off) else {
            return -libc::EINVAL;
        };
        count("pread", self.client.pread(path, buf, off))
    }

    pub fn pwrite(&self, path: &str, buf: &[u8], off: i64) -> i32 {
        let Some(off) = offset(off) else {
            return -libc::EINVAL;
        };
        count("pwrite", self.client.pwrite(path, buf, off))
    }

    pub fn mkdir(&self, path: &str, mode: libc::mode_t) -> i32 {
        status("mkdir", self.client.mkdir(path, mode as u32))
    }

    pub fn unlink(&self, path: &str) -> i32 {
        status("unlink", self.client.unlink(path))
    }

    pub fn rmdir(&self, path: &str) -> i32 {
        status("rmdir", self.client.rmdir(path))
    }

    pub fn symlink(&self, from: &str, to: &str) -> i32 {
        status("symlink", self.client.symlink(from, to))
    }

    pub fn rename(&self, from: &str, to: &str) -> i32 {
        status("rename", self.client.rename(from, to))
    }

    pub fn link(&self, from: &str, to: &str) -> i32 {
        status("link", self.client.link(from, to))
    }

    pub fn chmod(&self, path: &str, mode: libc::mode_t) -> i32 {
        status("chmod", self.client.chmod(path, mode as u32))
    }

    /// A negative id leaves it unchanged.
    pub fn lchown(&self, path: &str, uid: i64, gid: i64) -> i32 {
        let uid = u32::try_from(uid).ok();
        let gid = u32::try_from(gid).ok();
        status("lchown", self.client.lchown(path, uid, gid))
    }

    pub fn truncate(&self, path: &str, size: i64) -> i32 {
        let Ok(size) = u64::try_from(size) else {
            return -libc::EINVAL;
        };
        status("truncate", self.client.truncate(path, size))
    }

    pub fn statvfs(&self, stbuf: &mut libc::statvfs) -> i32 {
        match self.client.statvfs() {
            Ok(reply) => {
                stbuf.f_bsize = reply.bsize as _;
                stbuf.f_frsize = reply.frsize as _;
                stbuf.f_blocks = reply.blocks as _;
                stbuf.f_bfree = reply.bfree as _;
                stbuf.f_bavail = reply.bavail as _;
                stbuf.f_files = reply.files as _;
                stbuf.f_ffree = reply.ffree as _;
                stbuf.f_favail = reply.favail as _;
                stbuf.f_fsid = reply.fsid as _;
                stbuf.f_flag = reply.flag as _;
                stbuf.f_namemax = reply.namemax as _;
                0
            }
            Err(err) => -err.errno(),
        }
    }

    /// `ts[0]` is the access time, `ts[1]` the modification time.
    pub fn utimensat(&self, path: &str, ts: &[libc::timespec; 2]) -> i32 {
        status(
            "utimensat",
            self.client.utimensat(path, timespec(&ts[0]), timespec(&ts[1])),
        )
    }

    pub fn lsetxattr(&self, path: &str, name: &str, value: &[u8], flags: i32) -> i32 {
        let Ok(flags) = u32::try_from(flags) else {
            return -libc::EINVAL;
        };
        status("lsetxattr", self.client.lsetxattr(path, name, value, flags))
    }

    pub fn lremovexattr(&self, path: &str, name: &str) -> i32 {
        status("lremovexattr", self.client.lremovexattr(path, name))
    }

    pub fn get_size_override(&self, path: &str) -> Option<i64> {
        self.client
            .get_size_override(path)
            .map(|size| i64::try_from(size).unwrap_or(i64::MAX))
    }
}
