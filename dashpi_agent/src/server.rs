//! HTTP surface: routes and the plain/TLS listeners.

use anyhow::Context;
use axum::{routing::get, Router};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tracing::info;

use crate::state::AppState;
use crate::tls::ensure_self_signed_cert;
use crate::ws::{term_handler, ws_handler};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/ws/term", get(term_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Serves on an already bound listener; used by `serve` and by tests that
/// need port 0.
pub async fn serve_on(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.socket_addr();
    let Some(tls) = state.config.tls.clone() else {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("couldn't bind {addr}"))?;
        info!("dashpi_agent listening on http://{}", listener.local_addr()?);
        return serve_on(listener, state).await;
    };

    let (cert, key) = match (tls.cert, tls.key) {
        (Some(cert), Some(key)) => (cert, key),
        _ => ensure_self_signed_cert()?,
    };
    let rustls = RustlsConfig::from_pem_file(&cert, &key)
        .await
        .with_context(|| format!("couldn't load TLS pair {}", cert.display()))?;
    info!("dashpi_agent listening on https://{addr}");
    axum_server::bind_rustls(addr, rustls)
        .serve(router(state).into_make_service())
        .await?;
    Ok(())
}
