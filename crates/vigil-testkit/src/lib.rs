//! Vigil Testing Infrastructure
//!
//! Test doubles and fixtures shared by the vigil crates:
//!
//! - `PredicateEngine`: expression engine backed by Rust closures, with an
//!   evaluation counter
//! - `StaticIdentityProvider`, `CountingIdentityProvider`: identity sources,
//!   the latter counting how often resolution actually runs
//! - `RecordingEventPublisher`: captures authorization events
//! - `fixtures`, `strategies`: sample operations, identities and proptest
//!   strategies
//!
//! Add this to your crate's `Cargo.toml` dev-dependencies:
//! ```toml
//! [dev-dependencies]
//! vigil-testkit = { path = "../vigil-testkit" }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod engine;
pub mod events;
pub mod fixtures;
pub mod identity;
pub mod strategies;

pub use engine::PredicateEngine;
pub use events::RecordingEventPublisher;
pub use fixtures::*;
pub use identity::{CountingIdentityProvider, StaticIdentityProvider};

use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a test subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
