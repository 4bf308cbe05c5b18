//! Graph Gateway Library
//!
//! An authenticating tool-call gateway for Microsoft Graph: JSON-RPC 2.0
//! `tools/call` requests are authenticated with OIDC bearer tokens, mapped to
//! per-user delegated OAuth sessions (PKCE authorization-code flow), and
//! forwarded upstream with token lifecycle management, request idempotency,
//! retry/backoff, and pagination normalisation.
//!
//! # Components
//!
//! - [`cache`]: encrypted TTL'd KV store owning all persisted state
//! - [`auth`]: PKCE begin/complete, session minting, token refresh
//! - [`oidc`]: inbound caller JWT validation against a JWKS
//! - [`graph`]: mediated upstream HTTP with retries and error mapping
//! - [`session`] / [`idempotency`]: per-call resolution and replay guarantees
//! - [`gateway`]: JSON-RPC dispatch and the axum server

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod idempotency;
pub mod oidc;
pub mod protocol;
pub mod session;
pub mod tools;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
