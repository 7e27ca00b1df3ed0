// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory codefs server for tests
//!
//! [`MemoryServer`] answers every protocol operation against an in-memory
//! tree and records what it received. Tests reach it either through a
//! [`LoopbackTransport`] (no sockets, deterministic timing) or over a real
//! stream with [`MemoryServer::serve`]. Hard links are modelled as copies
//! that share a link count but not content.

use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use codefs_proto::*;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

const XATTR_CREATE: u32 = 1;
const XATTR_REPLACE: u32 = 2;

#[derive(Clone, Debug)]
enum NodeKind {
    File(Vec<u8>),
    Dir,
    Symlink(Vec<u8>),
}

#[derive(Clone, Debug)]
struct Node {
    kind: NodeKind,
    perm: u32,
    uid: u32,
    gid: u32,
    nlink: u64,
    xattrs: BTreeMap<Vec<u8>, Vec<u8>>,
    atime: TimespecData,
    mtime: TimespecData,
    ctime: TimespecData,
}

impl Node {
    fn new(kind: NodeKind, perm: u32) -> Self {
        let now = now();
        Self {
            kind,
            perm: perm & 0o7777,
            uid: 0,
            gid: 0,
            nlink: 1,
            xattrs: BTreeMap::new(),
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir)
    }

    fn stat(&self) -> StatData {
        let (file_type, size) = match &self.kind {
            NodeKind::File(content) => (libc::S_IFREG, content.len() as u64),
            NodeKind::Dir => (libc::S_IFDIR, 4096),
            NodeKind::Symlink(target) => (libc::S_IFLNK, target.len() as u64),
        };
        StatData {
            mode: file_type as u32 | self.perm,
            uid: self.uid,
            gid: self.gid,
            size,
            nlink: self.nlink,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
        }
    }
}

type OpResult = Result<ResponseFrame, i32>;

#[derive(Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
}

impl Tree {
    fn with_root() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::new(NodeKind::Dir, 0o755));
        Self { nodes }
    }

    fn get(&self, path: &str) -> Result<&Node, i32> {
        self.nodes.get(path).ok_or(libc::ENOENT)
    }

    fn get_mut(&mut self, path: &str) -> Result<&mut Node, i32> {
        self.nodes.get_mut(path).ok_or(libc::ENOENT)
    }

    fn check_parent(&self, path: &str) -> Result<(), i32> {
        if path == "/" {
            return Err(libc::EEXIST);
        }
        if self.get(parent_of(path))?.is_dir() {
            Ok(())
        } else {
            Err(libc::ENOTDIR)
        }
    }

    fn create(&mut self, path: &str, node: Node) -> Result<(), i32> {
        self.check_parent(path)?;
        if self.nodes.contains_key(path) {
            return Err(libc::EEXIST);
        }
        self.nodes.insert(path.to_string(), node);
        self.touch(parent_of(path));
        Ok(())
    }

    fn touch(&mut self, path: &str) {
        if let Some(node) = self.nodes.get_mut(path) {
            let now = now();
            node.mtime = now;
            node.ctime = now;
        }
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        self.nodes
            .keys()
            .filter(|key| key.len() > prefix.len() && key.starts_with(&prefix))
            .map(|key| &key[prefix.len()..])
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }

    fn record(&self, path: &str) -> FileRecord {
        let Some(node) = self.nodes.get(path) else {
            return FileRecord::deleted(path);
        };
        let (symlink_target, children) = match &node.kind {
            NodeKind::Symlink(target) => (Some(target.clone()), Vec::new()),
            NodeKind::Dir => (
                None,
                self.children(path).into_iter().map(String::into_bytes).collect(),
            ),
            NodeKind::File(_) => (None, Vec::new()),
        };
        FileRecord {
            path: path.as_bytes().to_vec(),
            deleted: false,
            stat: node.stat(),
            symlink_target,
            children,
            xattrs: node
                .xattrs
                .iter()
                .map(|(name, value)| XattrData {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }
}

struct ServerState {
    tree: Mutex<Tree>,
    received: Mutex<Vec<Request>>,
    invalidations: Mutex<Vec<String>>,
    protocol_version: AtomicU32,
    withhold_heartbeat_acks: AtomicBool,
    withhold_replies: AtomicBool,
    garbage_replies: AtomicBool,
    reply_delay_ms: AtomicU64,
    generation: AtomicU64,
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
}

/// In-memory codefs server; clones share state.
#[derive(Clone)]
pub struct MemoryServer {
    state: Arc<ServerState>,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    /// Server holding only the root directory.
    pub fn new() -> Self {
        Self {
            state: Arc::new(ServerState {
                tree: Mutex::new(Tree::with_root()),
                received: Mutex::new(Vec::new()),
                invalidations: Mutex::new(Vec::new()),
                protocol_version: AtomicU32::new(PROTOCOL_VERSION),
                withhold_heartbeat_acks: AtomicBool::new(false),
                withhold_replies: AtomicBool::new(false),
                garbage_replies: AtomicBool::new(false),
                reply_delay_ms: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                outstanding: AtomicUsize::new(0),
                max_outstanding: AtomicUsize::new(0),
            }),
        }
    }

    // Seeding

    pub fn add_dir(&self, path: &str) {
        self.seed(path, Node::new(NodeKind::Dir, 0o755));
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        self.seed(path, Node::new(NodeKind::File(content.to_vec()), 0o644));
    }

    pub fn add_symlink(&self, path: &str, target: &str) {
        self.seed(
            path,
            Node::new(NodeKind::Symlink(target.as_bytes().to_vec()), 0o777),
        );
    }

    fn seed(&self, path: &str, node: Node) {
        self.state.tree.lock().nodes.insert(path.to_string(), node);
    }

    // Inspection

    pub fn exists(&self, path: &str) -> bool {
        self.state.tree.lock().nodes.contains_key(path)
    }

    pub fn file_content(&self, path: &str) -> Option<Vec<u8>> {
        match &self.state.tree.lock().nodes.get(path)?.kind {
            NodeKind::File(content) => Some(content.clone()),
            _ => None,
        }
    }

    pub fn stat(&self, path: &str) -> Option<StatData> {
        self.state.tree.lock().nodes.get(path).map(Node::stat)
    }

    pub fn xattr(&self, path: &str, name: &str) -> Option<Vec<u8>> {
        self.state.tree.lock().nodes.get(path)?.xattrs.get(name.as_bytes()).cloned()
    }

    /// Requests in arrival order.
    pub fn received_requests(&self) -> Vec<Request> {
        self.state.received.lock().clone()
    }

    pub fn received_ops(&self) -> Vec<OpCode> {
        self.state.received.lock().iter().map(Request::op_code).collect()
    }

    /// Arrival order without handshakes and heartbeats.
    pub fn received_fs_ops(&self) -> Vec<OpCode> {
        self.received_ops()
            .into_iter()
            .filter(|op| !matches!(op, OpCode::Hello | OpCode::Heartbeat))
            .collect()
    }

    pub fn count_ops(&self, op: OpCode) -> usize {
        self.state.received.lock().iter().filter(|req| req.op_code() == op).count()
    }

    pub fn clear_received(&self) {
        self.state.received.lock().clear();
    }

    /// Highest number of requests seen in flight at once.
    pub fn max_outstanding(&self) -> usize {
        self.state.max_outstanding.load(Ordering::SeqCst)
    }

    // Behaviour switches

    pub fn push_invalidation(&self, path: &str) {
        self.state.invalidations.lock().push(path.to_string());
    }

    pub fn set_protocol_version(&self, version: u32) {
        self.state.protocol_version.store(version, Ordering::SeqCst);
    }

    pub fn set_withhold_heartbeat_acks(&self, withhold: bool) {
        self.state.withhold_heartbeat_acks.store(withhold, Ordering::SeqCst);
    }

    pub fn set_withhold_replies(&self, withhold: bool) {
        self.state.withhold_replies.store(withhold, Ordering::SeqCst);
    }

    /// Answer with frames that do not decode as responses.
    pub fn set_garbage_replies(&self, garbage: bool) {
        self.state.garbage_replies.store(garbage, Ordering::SeqCst);
    }

    pub fn set_reply_delay(&self, delay: Duration) {
        self.state
            .reply_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.state.reply_delay_ms.load(Ordering::SeqCst))
    }

    /// Break every transport created so far.
    pub fn drop_connections(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    // Connections

    pub fn connect(&self) -> LoopbackTransport {
        LoopbackTransport {
            server: self.clone(),
            generation: self.state.generation.load(Ordering::SeqCst),
            replies: VecDeque::new(),
            in_flight: 0,
        }
    }

    /// Serve length-prefixed frames over `stream` on a background thread
    /// until the peer disconnects.
    pub fn serve<S>(&self, stream: S) -> JoinHandle<()>
    where
        S: Read + Write + ReadTimeout + Send + 'static,
    {
        let server = self.clone();
        thread::Builder::new()
            .name("codefs-memory-server".to_string())
            .spawn(move || {
                let mut framed = FramedStream::new(stream);
                loop {
                    match framed.recv(Duration::from_millis(100)) {
                        Ok(Some(frame)) => {
                            server.begin_request();
                            let reply = server.process(&frame);
                            server.end_request();
                            let Some(reply) = reply else { continue };
                            let delay = server.reply_delay();
                            if !delay.is_zero() {
                                thread::sleep(delay);
                            }
                            if let Err(err) = framed.send(&reply) {
                                debug!(error = %err, "memory server peer gone");
                                return;
                            }
                        }
                        Ok(None) => continue,
                        Err(TransportError::Disconnected) => return,
                        Err(err) => {
                            warn!(error = %err, "memory server transport error");
                            return;
                        }
                    }
                }
            })
            .expect("failed to spawn memory server thread")
    }

    fn begin_request(&self) {
        let now = self.state.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_outstanding.fetch_max(now, Ordering::SeqCst);
    }

    fn end_request(&self) {
        self.state.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    /// Handle one request frame. `None` means the reply is withheld.
    pub fn process(&self, frame: &[u8]) -> Option<Vec<u8>> {
        let request = match RequestFrame::decode(frame).and_then(|f| Request::from_frame(&f)) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "memory server received a malformed frame");
                return Some(ResponseFrame::error(libc::EINVAL, err.to_string()).encode());
            }
        };
        trace!(op = %request.op_code(), "memory server request");
        self.state.received.lock().push(request.clone());

        if let Err(err) = validate_request(&request) {
            return Some(ResponseFrame::error(libc::EINVAL, err.to_string()).encode());
        }
        if self.state.withhold_replies.load(Ordering::SeqCst) {
            return None;
        }
        if matches!(request, Request::Heartbeat)
            && self.state.withhold_heartbeat_acks.load(Ordering::SeqCst)
        {
            return None;
        }
        if self.state.garbage_replies.load(Ordering::SeqCst) {
            return Some(vec![0xFF, 0x00]);
        }

        let response = self.handle(&request).unwrap_or_else(|errno| {
            ResponseFrame::error(errno, std::io::Error::from_raw_os_error(errno).to_string())
        });
        Some(response.encode())
    }

    fn handle(&self, request: &Request) -> OpResult {
        match request {
            Request::Hello(_) => Ok(ResponseFrame::ok(&HelloReply {
                protocol_version: self.state.protocol_version.load(Ordering::SeqCst),
            })),
            Request::Heartbeat => Ok(ResponseFrame::empty()),
            Request::PollInvalidations => {
                let paths = std::mem::take(&mut *self.state.invalidations.lock());
                Ok(ResponseFrame::ok(&InvalidationReply {
                    paths: paths.into_iter().map(String::into_bytes).collect(),
                }))
            }
            Request::Statvfs => Ok(ResponseFrame::ok(&StatvfsReply {
                bsize: 4096,
                frsize: 4096,
                blocks: 1 << 20,
                bfree: 1 << 19,
                bavail: 1 << 19,
                files: 1 << 16,
                ffree: 1 << 15,
                favail: 1 << 15,
                fsid: 0xC0DE,
                flag: 0,
                namemax: 255,
            })),
            other => {
                let mut tree = self.state.tree.lock();
                handle_tree_op(&mut tree, other)
            }
        }
    }
}

fn handle_tree_op(tree: &mut Tree, request: &Request) -> OpResult {
    match request {
        Request::FetchMetadata(req) => {
            let path = utf8(&req.path)?;
            let mut records = vec![tree.record(path)];
            if matches!(tree.get(path).map(|n| &n.kind), Ok(NodeKind::Dir)) {
                for child in tree.children(path) {
                    records.push(tree.record(&join(path, &child)));
                }
            }
            Ok(ResponseFrame::ok(&MetadataReply { records }))
        }
        Request::Open(req) => {
            let path = utf8(&req.path)?;
            let flags = req.flags as i32;
            let writable = flags & libc::O_ACCMODE != libc::O_RDONLY;
            if !tree.nodes.contains_key(path) {
                if flags & libc::O_CREAT == 0 {
                    return Err(libc::ENOENT);
                }
                tree.create(path, Node::new(NodeKind::File(Vec::new()), req.mode))?;
            } else if flags & libc::O_CREAT != 0 && flags & libc::O_EXCL != 0 {
                return Err(libc::EEXIST);
            }
            let node = tree.get_mut(path)?;
            let content = match &mut node.kind {
                NodeKind::Dir if writable => return Err(libc::EISDIR),
                NodeKind::File(content) if writable => {
                    if flags & libc::O_TRUNC != 0 {
                        content.clear();
                    }
                    Some(content.clone())
                }
                _ => None,
            };
            Ok(ResponseFrame::ok(&OpenReply { content }))
        }
        Request::Flush(req) => {
            let node = tree.get_mut(utf8(&req.path)?)?;
            match &mut node.kind {
                NodeKind::File(content) => *content = req.content.clone(),
                NodeKind::Dir => return Err(libc::EISDIR),
                NodeKind::Symlink(_) => return Err(libc::EINVAL),
            }
            let now = now();
            node.mtime = now;
            node.ctime = now;
            Ok(ResponseFrame::empty())
        }
        Request::Read(req) => match &tree.get(utf8(&req.path)?)?.kind {
            NodeKind::File(content) => {
                let start = (req.offset as usize).min(content.len());
                let end = start.saturating_add(req.size as usize).min(content.len());
                Ok(ResponseFrame::ok(&DataReply {
                    data: content[start..end].to_vec(),
                }))
            }
            NodeKind::Dir => Err(libc::EISDIR),
            NodeKind::Symlink(_) => Err(libc::EINVAL),
        },
        Request::Mkdir(req) => {
            tree.create(utf8(&req.path)?, Node::new(NodeKind::Dir, req.mode))?;
            Ok(ResponseFrame::empty())
        }
        Request::Unlink(req) => {
            let path = utf8(&req.path)?;
            if tree.get(path)?.is_dir() {
                return Err(libc::EISDIR);
            }
            tree.nodes.remove(path);
            tree.touch(parent_of(path));
            Ok(ResponseFrame::empty())
        }
        Request::Rmdir(req) => {
            let path = utf8(&req.path)?;
            if path == "/" {
                return Err(libc::EBUSY);
            }
            if !tree.get(path)?.is_dir() {
                return Err(libc::ENOTDIR);
            }
            if !tree.children(path).is_empty() {
                return Err(libc::ENOTEMPTY);
            }
            tree.nodes.remove(path);
            tree.touch(parent_of(path));
            Ok(ResponseFrame::empty())
        }
        Request::Symlink(req) => {
            let node = Node::new(NodeKind::Symlink(req.from.clone()), 0o777);
            tree.create(utf8(&req.to)?, node)?;
            Ok(ResponseFrame::empty())
        }
        Request::Rename(req) => {
            rename(tree, utf8(&req.from)?, utf8(&req.to)?)?;
            Ok(ResponseFrame::empty())
        }
        Request::Link(req) => {
            let from = utf8(&req.from)?;
            let to = utf8(&req.to)?;
            let source = tree.get_mut(from)?;
            if source.is_dir() {
                return Err(libc::EPERM);
            }
            source.nlink += 1;
            let copy = source.clone();
            if let Err(errno) = tree.create(to, copy) {
                tree.get_mut(from)?.nlink -= 1;
                return Err(errno);
            }
            Ok(ResponseFrame::empty())
        }
        Request::Chmod(req) => {
            let node = tree.get_mut(utf8(&req.path)?)?;
            node.perm = req.mode & 0o7777;
            node.ctime = now();
            Ok(ResponseFrame::empty())
        }
        Request::Lchown(req) => {
            let node = tree.get_mut(utf8(&req.path)?)?;
            if req.uid != ID_UNCHANGED {
                node.uid = req.uid;
            }
            if req.gid != ID_UNCHANGED {
                node.gid = req.gid;
            }
            node.ctime = now();
            Ok(ResponseFrame::empty())
        }
        Request::Truncate(req) => {
            let node = tree.get_mut(utf8(&req.path)?)?;
            match &mut node.kind {
                NodeKind::File(content) => content.resize(req.size as usize, 0),
                NodeKind::Dir => return Err(libc::EISDIR),
                NodeKind::Symlink(_) => return Err(libc::EINVAL),
            }
            node.mtime = now();
            Ok(ResponseFrame::empty())
        }
        Request::Utimensat(req) => {
            let node = tree.get_mut(utf8(&req.path)?)?;
            if let Some(atime) = resolve_time(req.atime) {
                node.atime = atime;
            }
            if let Some(mtime) = resolve_time(req.mtime) {
                node.mtime = mtime;
            }
            node.ctime = now();
            Ok(ResponseFrame::empty())
        }
        Request::Lsetxattr(req) => {
            let node = tree.get_mut(utf8(&req.path)?)?;
            let present = node.xattrs.contains_key(&req.name);
            if req.flags & XATTR_CREATE != 0 && present {
                return Err(libc::EEXIST);
            }
            if req.flags & XATTR_REPLACE != 0 && !present {
                return Err(libc::ENODATA);
            }
            node.xattrs.insert(req.name.clone(), req.value.clone());
            Ok(ResponseFrame::empty())
        }
        Request::Lremovexattr(req) => {
            let node = tree.get_mut(utf8(&req.path)?)?;
            node.xattrs.remove(&req.name).ok_or(libc::ENODATA)?;
            Ok(ResponseFrame::empty())
        }
        Request::Hello(_)
        | Request::Heartbeat
        | Request::PollInvalidations
        | Request::Statvfs => Err(libc::EINVAL),
    }
}

fn rename(tree: &mut Tree, from: &str, to: &str) -> Result<(), i32> {
    let source_is_dir = tree.get(from)?.is_dir();
    if from == to {
        return Ok(());
    }
    if to.starts_with(&format!("{}/", from)) {
        return Err(libc::EINVAL);
    }
    tree.check_parent(to)?;
    if let Ok(target) = tree.get(to) {
        match (source_is_dir, target.is_dir()) {
            (true, false) => return Err(libc::ENOTDIR),
            (false, true) => return Err(libc::EISDIR),
            (true, true) if !tree.children(to).is_empty() => return Err(libc::ENOTEMPTY),
            _ => {}
        }
    }

    let prefix = format!("{}/", from);
    let moved: Vec<String> = tree
        .nodes
        .keys()
        .filter(|key| key.as_str() == from || key.starts_with(&prefix))
        .cloned()
        .collect();
    for old in moved {
        if let Some(node) = tree.nodes.remove(&old) {
            let new = format!("{}{}", to, &old[from.len()..]);
            tree.nodes.insert(new, node);
        }
    }
    tree.touch(parent_of(from));
    tree.touch(parent_of(to));
    Ok(())
}

fn utf8(bytes: &[u8]) -> Result<&str, i32> {
    std::str::from_utf8(bytes).map_err(|_| libc::EINVAL)
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

fn now() -> TimespecData {
    let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    TimespecData {
        sec: since_epoch.as_secs(),
        nsec: since_epoch.subsec_nanos(),
    }
}

fn resolve_time(time: TimespecData) -> Option<TimespecData> {
    match time.nsec as libc::c_long {
        libc::UTIME_OMIT => None,
        libc::UTIME_NOW => Some(now()),
        _ => Some(time),
    }
}

/// In-process transport to a [`MemoryServer`]
///
/// Replies are queued with the time they become visible, so a configured
/// reply delay is observed by `recv` without any background thread.
pub struct LoopbackTransport {
    server: MemoryServer,
    generation: u64,
    replies: VecDeque<(Instant, Vec<u8>)>,
    in_flight: usize,
}

impl LoopbackTransport {
    fn connected(&self) -> bool {
        self.server.state.generation.load(Ordering::SeqCst) == self.generation
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.connected() {
            return Err(TransportError::Disconnected);
        }
        self.server.begin_request();
        self.in_flight += 1;
        if let Some(reply) = self.server.process(frame) {
            let ready_at = Instant::now() + self.server.reply_delay();
            self.replies.push_back((ready_at, reply));
        }
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        if !self.connected() {
            return Err(TransportError::Disconnected);
        }
        let deadline = Instant::now() + timeout;
        let Some(&(ready_at, _)) = self.replies.front() else {
            thread::sleep(timeout);
            return Ok(None);
        };
        if ready_at > deadline {
            thread::sleep(deadline.saturating_duration_since(Instant::now()));
            return Ok(None);
        }
        thread::sleep(ready_at.saturating_duration_since(Instant::now()));
        let reply = self.replies.pop_front().map(|(_, reply)| reply);
        if self.in_flight > 0 {
            self.in_flight -= 1;
            self.server.end_request();
        }
        Ok(reply)
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        for _ in 0..self.in_flight {
            self.server.end_request();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(server: &MemoryServer, request: Request) -> ResponseFrame {
        let reply = server.process(&request.to_frame().encode()).unwrap();
        ResponseFrame::decode(&reply).unwrap()
    }

    fn errno_of(frame: ResponseFrame) -> u32 {
        match frame {
            ResponseFrame::Error(reply) => reply.errno,
            ResponseFrame::Ok(_) => 0,
        }
    }

    #[test]
    fn mkdir_requires_parent() {
        let server = MemoryServer::new();
        assert_eq!(
            errno_of(call(&server, Request::mkdir("/a/b", 0o755))),
            libc::ENOENT as u32
        );
        assert_eq!(errno_of(call(&server, Request::mkdir("/a", 0o755))), 0);
        assert_eq!(
            errno_of(call(&server, Request::mkdir("/a", 0o755))),
            libc::EEXIST as u32
        );
    }

    #[test]
    fn rename_moves_subtree() {
        let server = MemoryServer::new();
        server.add_dir("/src");
        server.add_file("/src/main.rs", b"fn main() {}");
        assert_eq!(errno_of(call(&server, Request::rename("/src", "/lib"))), 0);
        assert!(!server.exists("/src/main.rs"));
        assert_eq!(
            server.file_content("/lib/main.rs").as_deref(),
            Some(&b"fn main() {}"[..])
        );
    }

    #[test]
    fn fetch_metadata_lists_children() {
        let server = MemoryServer::new();
        server.add_dir("/d");
        server.add_file("/d/x", b"1");
        server.add_symlink("/d/y", "x");
        let ResponseFrame::Ok(payload) = call(&server, Request::fetch_metadata("/d")) else {
            panic!("expected ok reply");
        };
        let reply: MetadataReply = decode_payload(&payload).unwrap();
        assert_eq!(reply.records.len(), 3);
        assert_eq!(reply.records[0].children, vec![b"x".to_vec(), b"y".to_vec()]);
    }

    #[test]
    fn missing_path_yields_tombstone() {
        let server = MemoryServer::new();
        let ResponseFrame::Ok(payload) = call(&server, Request::fetch_metadata("/gone")) else {
            panic!("expected ok reply");
        };
        let reply: MetadataReply = decode_payload(&payload).unwrap();
        assert!(reply.records[0].deleted);
    }

    #[test]
    fn loopback_delays_replies() {
        let server = MemoryServer::new();
        server.set_reply_delay(Duration::from_millis(50));
        let mut transport = server.connect();
        transport.send(&Request::Heartbeat.to_frame().encode()).unwrap();
        assert!(transport.recv(Duration::from_millis(5)).unwrap().is_none());
        assert!(transport.recv(Duration::from_millis(500)).unwrap().is_some());
    }

    #[test]
    fn dropped_connections_disconnect() {
        let server = MemoryServer::new();
        let mut transport = server.connect();
        server.drop_connections();
        assert!(matches!(
            transport.send(&Request::Heartbeat.to_frame().encode()),
            Err(TransportError::Disconnected)
        ));
        let mut fresh = server.connect();
        assert!(fresh.send(&Request::Heartbeat.to_frame().encode()).is_ok());
    }
}
