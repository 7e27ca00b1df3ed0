// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! codefs test utilities
//!
//! - [`logged_test`]: gives each test a unique log file holding its
//!   diagnostics and `tracing` output; only a one-line summary reaches stdout.
//! - [`MemoryServer`]: an in-memory codefs server with knobs for delayed,
//!   withheld and malformed replies.

pub mod guard;
pub mod logging;
pub mod server;

pub use codefs_test_utils_macros::logged_test;
pub use guard::TestLoggerGuard;
pub use logging::{create_unique_test_log, TestLogError, TestLogger};
pub use server::{LoopbackTransport, MemoryServer};
