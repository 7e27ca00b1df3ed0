// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! RAII guard behind `#[logged_test]`

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;

use crate::{TestLogError, TestLogger};

/// Owns a test's [`TestLogger`] and routes the test thread's `tracing`
/// events into the same file.
///
/// Dropping the guard without calling `finish_success`/`finish_failure`
/// (including during a panic unwind) records the test as failed.
pub struct TestLoggerGuard {
    logger: Option<TestLogger>,
    log_path: PathBuf,
    completed: bool,
    _tracing: Option<DefaultGuard>,
}

impl TestLoggerGuard {
    pub fn new(test_name: &str) -> Result<Self, TestLogError> {
        let logger = TestLogger::new(test_name)?;
        let log_path = logger.log_path().to_path_buf();

        let file = OpenOptions::new().append(true).open(&log_path)?;
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace"));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_thread_names(true)
            .finish();
        let tracing = tracing::subscriber::set_default(subscriber);

        Ok(Self {
            logger: Some(logger),
            log_path,
            completed: false,
            _tracing: Some(tracing),
        })
    }

    pub fn logger(&mut self) -> &mut TestLogger {
        self.logger.as_mut().expect("test logger already finalized")
    }

    pub fn finish_success(mut self) -> Result<PathBuf, TestLogError> {
        self.completed = true;
        match self.logger.take() {
            Some(logger) => logger.finish_success(),
            None => Ok(self.log_path.clone()),
        }
    }

    pub fn finish_failure<S: AsRef<str>>(mut self, message: S) -> Result<PathBuf, TestLogError> {
        self.completed = true;
        match self.logger.take() {
            Some(logger) => logger.finish_failure(message.as_ref()),
            None => Ok(self.log_path.clone()),
        }
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.log_path
    }
}

impl Drop for TestLoggerGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if let Some(logger) = self.logger.take() {
            let reason = if std::thread::panicking() {
                "test panicked"
            } else {
                "test exited without finishing its log"
            };
            if let Err(err) = logger.finish_failure(reason) {
                eprintln!(
                    "failed to finalize test log {}: {}",
                    self.log_path.display(),
                    err
                );
            }
        }
    }
}
