//! `fetchward-mcp`: the session-bounded HTTP server and wire surface around
//! the fetch engine in `fetchward-local`.
//!
//! The primary entrypoint for end users is the `fetchward` binary (HTTP
//! server by default, `--stdio` for direct stdio transport). This library
//! surface exists so the server, config, and admission-control pieces can be
//! exercised from integration tests without spawning the binary.

pub mod auth;
pub mod config;
pub mod hostgate;
pub mod ratelimit;
pub mod server;
pub mod session;
#[cfg(feature = "stdio")]
pub mod stdio;
pub mod telemetry;

pub use config::Config;
pub use server::{build_router, AppState};
