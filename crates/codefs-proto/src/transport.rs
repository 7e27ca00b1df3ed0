// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Frame transports
//!
//! The RPC channel only needs three things from a transport: send one opaque
//! frame, receive one opaque frame (with a deadline), and report connection
//! loss. [`FramedStream`] provides them over any byte stream by prefixing each
//! frame with its little-endian `u32` length.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::trace;

/// Largest frame accepted from a peer
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

/// Transport-level failure
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection closed by peer")]
    Disconnected,
    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Packet-oriented, point-to-point frame exchange
pub trait Transport: Send {
    /// Send one complete frame.
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for one complete frame. `Ok(None)` means the
    /// deadline passed with no frame available.
    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Streams whose blocking reads can be bounded
pub trait ReadTimeout {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl ReadTimeout for UnixStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_read_timeout(self, timeout)
    }
}

impl ReadTimeout for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

/// Length-prefixed frames over a byte stream
///
/// Partial frames survive a receive timeout: bytes read so far stay buffered
/// and the next `recv` resumes where the previous one stopped.
pub struct FramedStream<S> {
    stream: S,
    pending: Vec<u8>,
}

impl<S> FramedStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pending: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn take_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.pending.len() < 4 {
            return Ok(None);
        }
        let mut len_buf = [0u8; 4];
        len_buf.copy_from_slice(&self.pending[..4]);
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(len));
        }
        if self.pending.len() < 4 + len {
            return Ok(None);
        }
        let frame = self.pending[4..4 + len].to_vec();
        self.pending.drain(..4 + len);
        Ok(Some(frame))
    }
}

impl<S> Transport for FramedStream<S>
where
    S: Read + Write + ReadTimeout + Send,
{
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }
        let len = frame.len() as u32;
        self.stream
            .write_all(&len.to_le_bytes())
            .and_then(|_| self.stream.write_all(frame))
            .and_then(|_| self.stream.flush())
            .map_err(map_io_error)?;
        trace!(bytes = frame.len(), "frame sent");
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.take_frame()? {
                trace!(bytes = frame.len(), "frame received");
                return Ok(Some(frame));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.stream.set_read_timeout(Some(deadline - now))?;

            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(err) => return Err(map_io_error(err)),
            }
        }
    }
}

fn map_io_error(err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => TransportError::Disconnected,
        _ => TransportError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_survive_partial_reads() {
        let (left, mut right) = UnixStream::pair().unwrap();
        let mut framed = FramedStream::new(left);

        // Write the length prefix and half of the body, then time out.
        right.write_all(&5u32.to_le_bytes()).unwrap();
        right.write_all(b"he").unwrap();
        assert!(framed.recv(Duration::from_millis(20)).unwrap().is_none());

        right.write_all(b"llo").unwrap();
        let frame = framed.recv(Duration::from_secs(1)).unwrap();
        assert_eq!(frame.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn back_to_back_frames_are_split() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut sender = FramedStream::new(right);
        let mut receiver = FramedStream::new(left);

        sender.send(b"one").unwrap();
        sender.send(b"").unwrap();
        sender.send(b"three").unwrap();

        let timeout = Duration::from_secs(1);
        assert_eq!(receiver.recv(timeout).unwrap().unwrap(), b"one");
        assert_eq!(receiver.recv(timeout).unwrap().unwrap(), b"");
        assert_eq!(receiver.recv(timeout).unwrap().unwrap(), b"three");
    }

    #[test]
    fn peer_close_is_disconnect() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut framed = FramedStream::new(left);
        drop(right);
        assert!(matches!(
            framed.recv(Duration::from_secs(1)),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let (left, mut right) = UnixStream::pair().unwrap();
        let mut framed = FramedStream::new(left);
        right.write_all(&u32::MAX.to_le_bytes()).unwrap();
        assert!(matches!(
            framed.recv(Duration::from_secs(1)),
            Err(TransportError::FrameTooLarge(_))
        ));
    }
}
