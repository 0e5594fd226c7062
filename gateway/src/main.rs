use std::env;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use gateway::{admin_http, config, timeout_sweep_loop};
use proxy_core::cache::NullCache;
use proxy_core::frang::FrangLimiter;
use proxy_core::Registry;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let cfg = config::load().expect("failed to load configuration");

    let registry = Arc::new(Registry::new(None));
    for group in &cfg.server_groups {
        registry
            .add_group(group.name.clone(), group.policy.clone())
            .expect("duplicate server group in configuration");
        info!(group = %group.name, servers = ?group.servers, "server group registered (connections are dialed by the transport layer)");
    }

    // Engine is constructed here so /api/v1/status can report live state once
    // a transport implementation starts adding connections to `registry`;
    // this binary's own scope is the admin surface (§10.D), not dialing
    // upstreams (parser/transport are external collaborators, §6).
    let engine = proxy_core::Engine::with_frang_config(
        registry.clone(),
        Arc::new(NullCache),
        Arc::new(FrangLimiter::new()),
        cfg.frang.clone(),
    );

    tokio::spawn(timeout_sweep_loop(registry.clone()));

    let state = admin_http::AdminState {
        registry,
        frang: engine.frang.clone(),
    };
    let router = admin_http::build_router(state);

    let bind_addr = cfg.admin.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {bind_addr}: {e}"));
    info!(addr = %bind_addr, "admin surface listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("admin server error");
    info!("gateway shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
