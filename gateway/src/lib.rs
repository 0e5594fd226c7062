//! Gateway binary's library half, split out the way the teacher's
//! `services/server` crate splits `server::build_router` from `main.rs` so
//! integration tests can drive the admin surface over a real bound socket
//! instead of only through `tower::ServiceExt::oneshot`.

pub mod admin_http;
pub mod config;

use std::sync::Arc;

use proxy_core::Registry;

pub use admin_http::{build_router, AdminState};

/// Background tick that evicts forwarding-queue entries past
/// `max_forward_timeout` even when no transport failure or later response
/// would otherwise trigger that sweep (§4.C eviction, non-idempotent hold).
pub async fn timeout_sweep_loop(registry: Arc<Registry>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(100));
    loop {
        ticker.tick().await;
        registry.sweep_timeouts();
    }
}
