// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Client configuration
//!
//! A [`ClientConfig`] is either built in code with [`ClientConfig::builder`]
//! or loaded from a JSON file with [`ClientConfig::load`]; both paths end in
//! the same validation.

use std::fmt;
use std::fs;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use codefs_proto::{FramedStream, Transport, TransportError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClientError, ClientResult};

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_LIVENESS_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Server address: `unix:<path>` or `tcp:<host:port>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(ClientError::Config("empty unix socket path".into()));
            }
            Ok(Endpoint::Unix(PathBuf::from(path)))
        } else if let Some(addr) = s.strip_prefix("tcp:") {
            if !addr.contains(':') {
                return Err(ClientError::Config(format!(
                    "tcp endpoint needs host:port, got {:?}",
                    addr
                )));
            }
            Ok(Endpoint::Tcp(addr.to_string()))
        } else {
            Err(ClientError::Config(format!(
                "endpoint must start with unix: or tcp:, got {:?}",
                s
            )))
        }
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

impl Endpoint {
    /// Open a framed connection to the endpoint.
    pub fn connect(&self, timeout: Duration) -> ClientResult<Box<dyn Transport>> {
        debug!(endpoint = %self, "connecting");
        match self {
            Endpoint::Unix(path) => {
                let stream = connect_unix(path, timeout)?;
                Ok(Box::new(FramedStream::new(stream)))
            }
            Endpoint::Tcp(addr) => {
                let addrs = addr
                    .to_socket_addrs()
                    .map_err(|err| ClientError::Config(format!("resolve {}: {}", addr, err)))?;
                let mut last_err = None;
                for sock_addr in addrs {
                    match TcpStream::connect_timeout(&sock_addr, timeout) {
                        Ok(stream) => {
                            stream.set_nodelay(true).map_err(TransportError::from)?;
                            return Ok(Box::new(FramedStream::new(stream)));
                        }
                        Err(err) => last_err = Some(err),
                    }
                }
                Err(match last_err {
                    Some(err) => ClientError::Transport(err.into()),
                    None => ClientError::Config(format!("{} resolved to no addresses", addr)),
                })
            }
        }
    }
}

/// `UnixStream` has no connect timeout, so the connect runs on its own
/// thread. A connect that outlives `timeout` is abandoned and its stream
/// dropped when it eventually completes.
fn connect_unix(path: &Path, timeout: Duration) -> ClientResult<UnixStream> {
    let (tx, rx) = mpsc::channel();
    let target = path.to_path_buf();
    thread::Builder::new()
        .name("codefs-connect".to_string())
        .spawn(move || {
            let _ = tx.send(UnixStream::connect(target));
        })
        .map_err(TransportError::from)?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result.map_err(|err| ClientError::Transport(err.into())),
        Err(_) => {
            debug!(path = %path.display(), ?timeout, "connect timed out");
            Err(ClientError::Transport(
                io::Error::new(io::ErrorKind::TimedOut, "connect timed out").into(),
            ))
        }
    }
}

/// Client configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    /// Period of the background heartbeat; `0` disables the heartbeat thread.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// How long a sent request may wait for its response.
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
    /// Bound on establishing the connection, for both endpoint kinds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_liveness_timeout_ms() -> u64 {
    DEFAULT_LIVENESS_TIMEOUT_MS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

impl ClientConfig {
    pub fn builder(endpoint: Endpoint) -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: ClientConfig {
                endpoint,
                heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
                liveness_timeout_ms: DEFAULT_LIVENESS_TIMEOUT_MS,
                connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            },
        }
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: &Path) -> ClientResult<Self> {
        let content = fs::read_to_string(path).map_err(|err| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), err))
        })?;
        let config: ClientConfig = serde_json::from_str(&content).map_err(|err| {
            ClientError::Config(format!("failed to parse {}: {}", path.display(), err))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.liveness_timeout_ms == 0 {
            return Err(ClientError::Config(
                "liveness_timeout_ms must be non-zero".into(),
            ));
        }
        if self.heartbeat_interval_ms != 0 && self.liveness_timeout_ms <= self.heartbeat_interval_ms
        {
            return Err(ClientError::Config(format!(
                "liveness_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.liveness_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms != 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Builder for [`ClientConfig`].
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Turn off the background heartbeat thread.
    pub fn no_heartbeat(mut self) -> Self {
        self.config.heartbeat_interval_ms = 0;
        self
    }

    pub fn liveness_timeout(mut self, timeout: Duration) -> Self {
        self.config.liveness_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn build(self) -> ClientResult<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
