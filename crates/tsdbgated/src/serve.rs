//! Relay mode — binds the listener, serves sessions, and drains them on
//! SIGINT/SIGTERM.

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use tsdbgate_core::ProxySettings;
use tsdbgate_proxy::{Listener, build_backend};

/// Run the relay until a shutdown signal arrives and every session ends.
pub async fn run(settings: ProxySettings) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %settings.backend.kind(),
        "tsdbgated starting"
    );

    // ── Backend ──────────────────────────────────────────────────
    let backend = build_backend(&settings.backend, settings.chunk_size);

    // ── Listener ─────────────────────────────────────────────────
    let listener = Listener::bind(&settings, backend)
        .await
        .with_context(|| format!("failed to start listener on {}", settings.listen_addr))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(listener.serve(shutdown_rx));

    // ── Wait for shutdown ────────────────────────────────────────
    shutdown_signal().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    server.await.context("listener task panicked")?;
    info!("tsdbgated stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("failed to install CTRL+C handler")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C handler")
}
