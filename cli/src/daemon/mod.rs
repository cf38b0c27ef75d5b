// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - Wiring the swarm from configuration
//! - The HTTP/SSE surface for operators and observers
//! - The client used by CLI commands

pub mod api;
pub mod client;
pub mod server;

pub use client::DaemonClient;
pub use server::{build_router, start_daemon, AppState};

pub const DEFAULT_PORT: u16 = 8000;

/// Base URL for a daemon at `host:port`; `host` may already carry a scheme.
pub fn base_url(host: &str, port: u16) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}:{}", host.trim_end_matches('/'), port)
    } else {
        format!("http://{}:{}", host, port)
    }
}
