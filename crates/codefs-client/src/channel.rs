// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Bidirectional RPC channel
//!
//! Frames carry no correlation id. The channel lock is held from send until
//! the response is read, so the next frame received always answers the call
//! holding the lock. Heartbeats share the same lock and transport.
//!
//! A call whose response does not arrive within the liveness window marks
//! the channel degraded. Every later call fails fast with
//! [`ClientError::Degraded`] until [`RpcChannel::reconnect`] installs a new
//! transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use codefs_proto::{
    decode_payload, validate_request, HelloReply, OpCode, Request, ResponseFrame, Transport,
    MAX_FRAME_LEN, PROTOCOL_VERSION,
};
use parking_lot::Mutex;
use ssz::Decode;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};

pub struct RpcChannel {
    transport: Mutex<Box<dyn Transport>>,
    degraded: AtomicBool,
    liveness_timeout: Duration,
}

impl RpcChannel {
    /// Wrap a connected transport. No handshake is performed.
    pub fn new(transport: Box<dyn Transport>, liveness_timeout: Duration) -> Self {
        Self {
            transport: Mutex::new(transport),
            degraded: AtomicBool::new(false),
            liveness_timeout,
        }
    }

    pub fn liveness_timeout(&self) -> Duration {
        self.liveness_timeout
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// One round trip; returns the ok payload.
    pub fn call(&self, request: &Request) -> ClientResult<Vec<u8>> {
        validate_request(request)?;
        let frame = request.to_frame().encode();
        let mut transport = self.transport.lock();
        self.round_trip(transport.as_mut(), request.op_code(), &frame)
    }

    /// One round trip with the ok payload decoded as `T`.
    pub fn call_decode<T: Decode>(&self, request: &Request) -> ClientResult<T> {
        let payload = self.call(request)?;
        Ok(decode_payload(&payload)?)
    }

    /// Liveness check. Skipped when a call is in flight, since that call is
    /// itself bounded by the liveness window.
    pub fn heartbeat(&self) -> ClientResult<()> {
        let Some(mut transport) = self.transport.try_lock() else {
            debug!("heartbeat skipped, call in flight");
            return Ok(());
        };
        let frame = Request::Heartbeat.to_frame().encode();
        self.round_trip(transport.as_mut(), OpCode::Heartbeat, &frame)
            .map(|_| ())
    }

    /// Exchange protocol versions. A mismatch leaves the channel degraded.
    pub fn handshake(&self) -> ClientResult<()> {
        let mut transport = self.transport.lock();
        self.hello(transport.as_mut())
    }

    /// Replace the transport, clear the degraded state and handshake again.
    pub fn reconnect(&self, transport: Box<dyn Transport>) -> ClientResult<()> {
        let mut current = self.transport.lock();
        *current = transport;
        self.degraded.store(false, Ordering::SeqCst);
        self.hello(current.as_mut())?;
        info!("channel reconnected");
        Ok(())
    }

    /// Run [`Self::heartbeat`] every `interval` on a background thread.
    pub fn spawn_heartbeat(self: &Arc<Self>, interval: Duration) -> ClientResult<HeartbeatHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let channel = Arc::clone(self);
        let thread = thread::Builder::new()
            .name("codefs-heartbeat".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match channel.heartbeat() {
                        Ok(()) | Err(ClientError::Degraded) => {}
                        Err(err) => warn!(error = %err, "heartbeat failed"),
                    },
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|err| ClientError::Transport(err.into()))?;
        debug!(interval_ms = interval.as_millis() as u64, "heartbeat thread started");
        Ok(HeartbeatHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Any failure, including an error reply or an undecodable one, leaves
    /// the channel degraded: no call may run without a completed handshake.
    fn hello(&self, transport: &mut dyn Transport) -> ClientResult<()> {
        let result = self.exchange_versions(transport);
        if let Err(err) = &result {
            self.mark_degraded(OpCode::Hello, err);
        }
        result
    }

    fn exchange_versions(&self, transport: &mut dyn Transport) -> ClientResult<()> {
        let frame = Request::hello(PROTOCOL_VERSION).to_frame().encode();
        let payload = self.round_trip(transport, OpCode::Hello, &frame)?;
        let reply: HelloReply = decode_payload(&payload)?;
        if reply.protocol_version != PROTOCOL_VERSION {
            return Err(ClientError::VersionMismatch {
                client: PROTOCOL_VERSION,
                server: reply.protocol_version,
            });
        }
        info!(version = PROTOCOL_VERSION, "handshake complete");
        Ok(())
    }

    fn round_trip(
        &self,
        transport: &mut dyn Transport,
        op: OpCode,
        frame: &[u8],
    ) -> ClientResult<Vec<u8>> {
        if self.is_degraded() {
            return Err(ClientError::Degraded);
        }
        // Refused before anything is written, so the stream stays in sync.
        if frame.len() > MAX_FRAME_LEN {
            debug!(%op, bytes = frame.len(), "request too large");
            return Err(ClientError::RequestTooLarge {
                len: frame.len(),
                limit: MAX_FRAME_LEN,
            });
        }
        debug!(%op, bytes = frame.len(), "rpc call");

        if let Err(err) = transport.send(frame) {
            self.mark_degraded(op, &err);
            return Err(err.into());
        }
        let reply = match transport.recv(self.liveness_timeout) {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                let err = ClientError::LivenessTimeout {
                    timeout_ms: self.liveness_timeout.as_millis() as u64,
                };
                self.mark_degraded(op, &err);
                return Err(err);
            }
            Err(err) => {
                self.mark_degraded(op, &err);
                return Err(err.into());
            }
        };

        match ResponseFrame::decode(&reply) {
            Ok(ResponseFrame::Ok(payload)) => Ok(payload),
            Ok(ResponseFrame::Error(reply)) => {
                let err = ClientError::Remote {
                    errno: reply.errno as i32,
                    message: String::from_utf8_lossy(&reply.message).into_owned(),
                };
                debug!(%op, error = %err, "rpc failed");
                Err(err)
            }
            Err(err) => {
                self.mark_degraded(op, &err);
                Err(err.into())
            }
        }
    }

    fn mark_degraded(&self, op: OpCode, cause: &dyn std::fmt::Display) {
        self.degraded.store(true, Ordering::SeqCst);
        warn!(%op, cause = %cause, "channel degraded");
    }
}

/// Stops and joins the heartbeat thread when dropped.
pub struct HeartbeatHandle {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("heartbeat thread panicked");
            }
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codefs_proto::{DataReply, TransportError};
    use std::collections::VecDeque;

    /// Transport replaying scripted replies and recording sent frames
    #[derive(Default)]
    struct Scripted {
        replies: VecDeque<Vec<u8>>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_send: bool,
    }

    impl Transport for Scripted {
        fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            if self.fail_send {
                return Err(TransportError::Disconnected);
            }
            self.sent.lock().push(frame.to_vec());
            Ok(())
        }

        fn recv(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
            Ok(self.replies.pop_front())
        }
    }

    fn scripted(replies: Vec<ResponseFrame>) -> (Box<Scripted>, Arc<Mutex<Vec<Vec<u8>>>>) {
        let transport = Scripted {
            replies: replies.iter().map(ResponseFrame::encode).collect(),
            ..Scripted::default()
        };
        let sent = Arc::clone(&transport.sent);
        (Box::new(transport), sent)
    }

    #[test]
    fn ok_reply_is_decoded() {
        let (transport, sent) = scripted(vec![ResponseFrame::ok(&DataReply {
            data: b"abc".to_vec(),
        })]);
        let channel = RpcChannel::new(transport, Duration::from_millis(10));
        let reply: DataReply = channel.call_decode(&Request::read("/f", 0, 3)).unwrap();
        assert_eq!(reply.data, b"abc");
        assert_eq!(sent.lock()[0][0], OpCode::Read as u8);
    }

    #[test]
    fn remote_error_keeps_channel_healthy() {
        let (transport, _) = scripted(vec![ResponseFrame::error(libc::ENOENT, "missing")]);
        let channel = RpcChannel::new(transport, Duration::from_millis(10));
        let err = channel.call(&Request::unlink("/x")).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
        assert!(!channel.is_degraded());
    }

    #[test]
    fn missing_reply_degrades_channel() {
        let (transport, sent) = scripted(Vec::new());
        let channel = RpcChannel::new(transport, Duration::from_millis(10));
        assert!(matches!(
            channel.call(&Request::Statvfs),
            Err(ClientError::LivenessTimeout { timeout_ms: 10 })
        ));
        assert!(channel.is_degraded());

        // Fails fast without touching the transport.
        assert!(matches!(
            channel.call(&Request::Statvfs),
            Err(ClientError::Degraded)
        ));
        assert_eq!(sent.lock().len(), 1);
    }

    #[test]
    fn malformed_reply_is_protocol_error() {
        let transport = Scripted {
            replies: VecDeque::from([vec![0x42]]),
            ..Scripted::default()
        };
        let channel = RpcChannel::new(Box::new(transport), Duration::from_millis(10));
        let err = channel.call(&Request::Heartbeat).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
        assert_eq!(err.errno(), libc::EIO);
        assert!(channel.is_degraded());
    }

    #[test]
    fn send_failure_is_transport_error() {
        let transport = Scripted {
            fail_send: true,
            ..Scripted::default()
        };
        let channel = RpcChannel::new(Box::new(transport), Duration::from_millis(10));
        assert!(matches!(
            channel.call(&Request::Heartbeat),
            Err(ClientError::Transport(TransportError::Disconnected))
        ));
    }

    #[test]
    fn invalid_request_is_not_sent() {
        let (transport, sent) = scripted(Vec::new());
        let channel = RpcChannel::new(transport, Duration::from_millis(10));
        assert!(matches!(
            channel.call(&Request::mkdir("relative", 0o755)),
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(sent.lock().is_empty());
        assert!(!channel.is_degraded());
    }

    #[test]
    fn failed_reconnect_handshake_stays_degraded() {
        let (transport, _) = scripted(Vec::new());
        let channel = RpcChannel::new(transport, Duration::from_millis(10));
        assert!(channel.call(&Request::Heartbeat).is_err());

        // Hello answered with a payload too short for a HelloReply.
        let (short, _) = scripted(vec![ResponseFrame::Ok(vec![1, 0])]);
        assert!(matches!(
            channel.reconnect(short),
            Err(ClientError::Protocol(_))
        ));
        assert!(channel.is_degraded());

        let (refused, _) = scripted(vec![ResponseFrame::error(libc::EACCES, "denied")]);
        let err = channel.reconnect(refused).unwrap_err();
        assert_eq!(err.errno(), libc::EACCES);
        assert!(channel.is_degraded());
        assert!(matches!(
            channel.call(&Request::Heartbeat),
            Err(ClientError::Degraded)
        ));
    }

    #[test]
    fn oversized_request_is_refused_locally() {
        let (transport, sent) = scripted(vec![ResponseFrame::empty()]);
        let channel = RpcChannel::new(transport, Duration::from_millis(10));

        let err = channel
            .call(&Request::flush("/big", vec![0; MAX_FRAME_LEN]))
            .unwrap_err();
        assert!(matches!(err, ClientError::RequestTooLarge { limit: MAX_FRAME_LEN, .. }));
        assert_eq!(err.errno(), libc::EFBIG);
        assert!(!channel.is_degraded());
        assert!(sent.lock().is_empty());

        channel.call(&Request::Heartbeat).unwrap();
    }

    #[test]
    fn reconnect_clears_degraded_state() {
        let (transport, _) = scripted(Vec::new());
        let channel = RpcChannel::new(transport, Duration::from_millis(10));
        assert!(channel.call(&Request::Heartbeat).is_err());
        assert!(channel.is_degraded());

        let (fresh, sent) = scripted(vec![
            ResponseFrame::ok(&HelloReply {
                protocol_version: PROTOCOL_VERSION,
            }),
            ResponseFrame::empty(),
        ]);
        channel.reconnect(fresh).unwrap();
        assert!(!channel.is_degraded());
        channel.call(&Request::Heartbeat).unwrap();
        assert_eq!(sent.lock()[0][0], OpCode::Hello as u8);
    }
}
