//! Transports: newline-delimited stdio, or HTTP with SSE streams.

pub mod http;
pub mod sse;
pub mod stdio;

use crate::config::TransportKind;
use crate::context::AppContext;

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

/// Serve on the configured transport until the input ends or a signal arrives.
pub async fn run(ctx: AppContext) -> anyhow::Result<()> {
    let transport = ctx.config.transport;
    match transport {
        TransportKind::Stdio => stdio::run(&ctx, shutdown_signal()).await,
        TransportKind::Http => http::serve(ctx, shutdown_signal()).await,
    }
}
