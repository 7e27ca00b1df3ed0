// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-test log files
//!
//! Every test writes its diagnostics to its own file so that concurrent tests
//! never interleave. Successful tests print a single line; failures print the
//! log path and size so the file can be opened directly.

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Overrides the directory test logs are written to.
pub const LOG_DIR_ENV: &str = "CODEFS_TEST_LOG_DIR";

#[derive(Error, Debug)]
pub enum TestLogError {
    #[error("test log io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write to test log file: {path}")]
    WriteError { path: PathBuf },

    #[error("invalid test name: {name}")]
    InvalidTestName { name: String },
}

pub struct TestLogger {
    log_path: PathBuf,
    writer: BufWriter<File>,
    test_name: String,
    start_time: DateTime<Utc>,
}

impl TestLogger {
    pub fn new(test_name: &str) -> Result<Self, TestLogError> {
        validate_test_name(test_name)?;

        let log_path = create_unique_test_log(test_name)?;
        // Append mode: the tracing layer installed by the guard writes to
        // the same file through its own handle.
        let file = OpenOptions::new().create_new(true).append(true).open(&log_path)?;

        let mut logger = Self {
            log_path,
            writer: BufWriter::new(file),
            test_name: test_name.to_string(),
            start_time: Utc::now(),
        };
        logger.write_header()?;
        Ok(logger)
    }

    pub fn log(&mut self, message: &str) -> Result<(), TestLogError> {
        let timestamp = Utc::now().format("%H:%M:%S%.3f");
        writeln!(self.writer, "[{}] {}", timestamp, message)
            .and_then(|_| self.writer.flush())
            .map_err(|_| TestLogError::WriteError {
                path: self.log_path.clone(),
            })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn finish_success(mut self) -> Result<PathBuf, TestLogError> {
        let elapsed = self.elapsed_secs();
        self.log(&format!("test passed in {:.3}s", elapsed))?;
        println!("✅ {} passed", self.test_name);
        Ok(self.log_path)
    }

    pub fn finish_failure(mut self, error_message: &str) -> Result<PathBuf, TestLogError> {
        let elapsed = self.elapsed_secs();
        self.log(&format!("test failed after {:.3}s: {}", elapsed, error_message))?;

        match fs::metadata(&self.log_path) {
            Ok(metadata) => println!(
                "❌ {} failed - Log: {} ({} bytes)",
                self.test_name,
                self.log_path.display(),
                metadata.len()
            ),
            Err(_) => println!(
                "❌ {} failed - Log: {}",
                self.test_name,
                self.log_path.display()
            ),
        }
        Ok(self.log_path)
    }

    fn elapsed_secs(&self) -> f64 {
        Utc::now().signed_duration_since(self.start_time).num_milliseconds() as f64 / 1000.0
    }

    fn write_header(&mut self) -> Result<(), TestLogError> {
        writeln!(self.writer, "=== codefs test log ===")?;
        writeln!(self.writer, "Test: {}", self.test_name)?;
        writeln!(
            self.writer,
            "Started: {}",
            self.start_time.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(self.writer, "Process: {}", std::process::id())?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Unique log path for `test_name`: `<log dir>/<date>/<name>-<time>-<uuid>.log`.
pub fn create_unique_test_log(test_name: &str) -> Result<PathBuf, TestLogError> {
    let now = Utc::now();
    let log_dir = log_root().join(now.format("%Y-%m-%d").to_string());
    fs::create_dir_all(&log_dir)?;

    let filename = format!(
        "{}-{}-{}.log",
        sanitize_filename(test_name),
        now.format("%H-%M-%S"),
        Uuid::new_v4()
    );
    Ok(log_dir.join(filename))
}

fn log_root() -> PathBuf {
    match env::var_os(LOG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => env::temp_dir().join("codefs-test-logs"),
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

fn validate_test_name(name: &str) -> Result<(), TestLogError> {
    if name.is_empty() || name.len() > 200 {
        return Err(TestLogError::InvalidTestName {
            name: name.chars().take(64).collect(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize_filename("ok_name-1"), "ok_name-1");
        assert_eq!(sanitize_filename("a/b c:d"), "a_b_c_d");
    }

    #[test]
    fn test_names_are_bounded() {
        assert!(validate_test_name("valid").is_ok());
        assert!(validate_test_name("").is_err());
        assert!(validate_test_name(&"x".repeat(201)).is_err());
    }

    #[test]
    fn log_paths_are_unique() {
        let first = create_unique_test_log("same").unwrap();
        let second = create_unique_test_log("same").unwrap();
        assert_ne!(first, second);
        assert!(first.parent().unwrap().exists());
    }

    #[test]
    fn logger_writes_header_and_messages() {
        let mut logger = TestLogger::new("logger_writes_header_and_messages").unwrap();
        logger.log("step one").unwrap();
        let path = logger.finish_success().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("Test: logger_writes_header_and_messages"));
        assert!(content.contains("step one"));
        assert!(content.contains("test passed"));
        fs::remove_file(path).unwrap();
    }
}
