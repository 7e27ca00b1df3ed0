// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! codefs-ctl: run single filesystem operations against a codefs server

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codefs_client::{Client, ClientConfig, Endpoint, FileAttributes};
use codefs_logging::CliLoggingArgs;
use tracing::info;

const CHUNK: usize = 64 * 1024;

#[derive(Parser)]
#[command(name = "codefs-ctl", version, about = "Inspect and modify a codefs server")]
struct Args {
    /// Client configuration file (JSON)
    #[arg(short, long, env = "CODEFS_CONFIG")]
    config: Option<PathBuf>,

    /// Server endpoint (`unix:<path>` or `tcp:<host:port>`); overrides the config file
    #[arg(short, long, env = "CODEFS_ENDPOINT")]
    endpoint: Option<Endpoint>,

    /// Response timeout in milliseconds
    #[arg(long)]
    liveness_timeout_ms: Option<u64>,

    #[command(flatten)]
    logging: CliLoggingArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one heartbeat
    Ping,
    /// Filesystem statistics
    Statvfs,
    /// Attributes of a path
    Stat { path: String },
    /// List a directory
    Ls { path: String },
    /// Print a file to stdout
    Cat { path: String },
    /// Replace a file's content with stdin or a local file
    Put {
        path: String,
        #[arg(long)]
        from: Option<PathBuf>,
    },
    Mkdir {
        path: String,
        #[arg(long, default_value = "755", value_parser = parse_mode)]
        mode: u32,
    },
    Rm { path: String },
    Rmdir { path: String },
    Mv { from: String, to: String },
    /// Create a hard link, or a symbolic link with -s
    Ln {
        target: String,
        link: String,
        #[arg(short, long)]
        symbolic: bool,
    },
    Chmod {
        #[arg(value_parser = parse_mode)]
        mode: u32,
        path: String,
    },
    /// Fetch pending invalidation notices
    Poll,
}

fn parse_mode(value: &str) -> Result<u32, String> {
    u32::from_str_radix(value, 8).map_err(|err| format!("invalid octal mode {:?}: {}", value, err))
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match (&args.config, &args.endpoint) {
        (Some(path), _) => ClientConfig::load(path)?,
        (None, Some(endpoint)) => ClientConfig::builder(endpoint.clone()).build()?,
        (None, None) => anyhow::bail!("either --config or --endpoint is required"),
    };
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(timeout) = args.liveness_timeout_ms {
        config.liveness_timeout_ms = timeout;
    }
    // One-shot commands never idle long enough to need the heartbeat.
    config.heartbeat_interval_ms = 0;
    config.validate()?;
    Ok(config)
}

fn describe(attributes: &FileAttributes) -> String {
    let kind = if attributes.is_dir() {
        "directory"
    } else if attributes.is_symlink() {
        "symlink"
    } else {
        "file"
    };
    let mtime = attributes
        .mtime
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    format!(
        "{} mode={:o} size={} uid={} gid={} nlink={} mtime={}",
        kind,
        attributes.permissions(),
        attributes.size,
        attributes.uid,
        attributes.gid,
        attributes.nlink,
        mtime
    )
}

fn cat(client: &Client, path: &str) -> Result<()> {
    let handle = client.open(path, libc::O_RDONLY, 0)?;
    let mut stdout = io::stdout().lock();
    let mut buf = vec![0u8; CHUNK];
    let mut offset = 0u64;
    loop {
        let n = client.pread(path, &mut buf, offset)?;
        if n == 0 {
            break;
        }
        stdout.write_all(&buf[..n])?;
        offset += n as u64;
    }
    client.close(path, handle)?;
    Ok(())
}

fn put(client: &Client, path: &str, from: Option<&PathBuf>) -> Result<()> {
    let data = match from {
        Some(file) => fs::read(file).with_context(|| format!("reading {}", file.display()))?,
        None => {
            let mut data = Vec::new();
            io::stdin().read_to_end(&mut data)?;
            data
        }
    };
    let handle = client.open(path, libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC, 0o644)?;
    client.pwrite(path, &data, 0)?;
    client.close(path, handle)?;
    info!(path, bytes = data.len(), "uploaded");
    Ok(())
}

fn run(client: &Client, command: &Command) -> Result<()> {
    match command {
        Command::Ping => {
            client.heartbeat()?;
            println!("ok");
        }
        Command::Statvfs => {
            let stats = client.statvfs()?;
            println!(
                "bsize={} blocks={} bfree={} bavail={} files={} ffree={} namemax={}",
                stats.bsize,
                stats.blocks,
                stats.bfree,
                stats.bavail,
                stats.files,
                stats.ffree,
                stats.namemax
            );
        }
        Command::Stat { path } => println!("{}", describe(&client.getattr(path)?)),
        Command::Ls { path } => {
            for name in client.readdir(path)? {
                println!("{}", name);
            }
        }
        Command::Cat { path } => cat(client, path)?,
        Command::Put { path, from } => put(client, path, from.as_ref())?,
        Command::Mkdir { path, mode } => client.mkdir(path, *mode)?,
        Command::Rm { path } => client.unlink(path)?,
        Command::Rmdir { path } => client.rmdir(path)?,
        Command::Mv { from, to } => client.rename(from, to)?,
        Command::Ln {
            target,
            link,
            symbolic,
        } => {
            if *symbolic {
                client.symlink(target, link)?;
            } else {
                client.link(target, link)?;
            }
        }
        Command::Chmod { mode, path } => client.chmod(path, *mode)?,
        Command::Poll => println!("{}", client.update()?),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    args.logging.init("codefs-ctl")?;

    let config = load_config(&args)?;
    let client = Client::connect(&config)
        .with_context(|| format!("connecting to {}", config.endpoint))?;
    run(&client, &args.command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn mode_is_octal() {
        assert_eq!(parse_mode("755"), Ok(0o755));
        assert!(parse_mode("9").is_err());
    }

    #[test]
    fn endpoint_flag_overrides_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"endpoint": "unix:/tmp/a.sock", "heartbeat_interval_ms": 100, "liveness_timeout_ms": 500}}"#
        )
        .unwrap();
        let args = Args::parse_from([
            "codefs-ctl",
            "--config",
            file.path().to_str().unwrap(),
            "--endpoint",
            "tcp:127.0.0.1:9",
            "ping",
        ]);

        let config = load_config(&args).unwrap();
        assert_eq!(config.endpoint, Endpoint::Tcp("127.0.0.1:9".into()));
        assert_eq!(config.heartbeat_interval_ms, 0);
        assert_eq!(config.liveness_timeout_ms, 500);
    }

    #[test]
    fn missing_endpoint_is_an_error() {
        let args = Args::parse_from(["codefs-ctl", "stat", "/"]);
        assert!(load_config(&args).is_err());
    }
}
