//! HTTP transport: JSON-RPC over POST, SSE streams, health and index pages.
//!
//! Every route except `/` and `/health` needs `Authorization: Bearer <token>`.

use std::convert::Infallible;
use std::future::Future;

use anyhow::Context as _;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use chrono::Utc;
use futures::Stream;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::sse::{self, ConnectionRegistry, Monitor, Outbound, StreamKind};
use crate::auth::require_auth;
use crate::context::AppContext;
use crate::protocol::{codes, SERVER_NAME};

#[derive(Clone)]
pub struct HttpState {
    ctx: AppContext,
    clients: ConnectionRegistry,
}

pub fn router(ctx: AppContext) -> Router {
    router_with(ctx, ConnectionRegistry::new())
}

/// Build the router around an existing client registry.
pub fn router_with(ctx: AppContext, clients: ConnectionRegistry) -> Router {
    let auth = middleware::from_fn_with_state(ctx.token.clone(), require_auth);
    let state = HttpState { ctx, clients };

    let protected = Router::new()
        .route("/message", post(post_message))
        .route("/mcp", post(post_mcp))
        .route("/sse", get(sse_connect))
        .route("/sse/{monitor}", get(sse_monitor))
        .route_layer(auth);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(
    ctx: AppContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let (host, port) = ctx.config.listen_addr();
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;
    let addr = listener.local_addr().context("listener has no local address")?;

    tracing::info!(%addr, "serving MCP over HTTP");
    tracing::info!("  POST /message, /mcp   JSON-RPC");
    tracing::info!("  GET  /sse             MCP event stream");
    tracing::info!("  GET  /sse/{{monitor}}   live diagnostics");
    tracing::info!("  GET  /health          unauthenticated");

    let clients = ConnectionRegistry::new();
    let closer = clients.clone();
    axum::serve(listener, router_with(ctx, clients))
        .with_graceful_shutdown(async move {
            shutdown.await;
            // open streams would otherwise hold the server open
            closer.close_all();
        })
        .await
        .context("HTTP server error")
}

async fn post_message(State(state): State<HttpState>, body: Bytes) -> Response {
    handle_post(&state, &body, true).await
}

async fn post_mcp(State(state): State<HttpState>, body: Bytes) -> Response {
    handle_post(&state, &body, false).await
}

async fn handle_post(state: &HttpState, body: &[u8], broadcast: bool) -> Response {
    let Some(response) = state.ctx.dispatcher.handle(body).await else {
        return StatusCode::ACCEPTED.into_response();
    };

    let status = if response.error_code() == Some(codes::PARSE_ERROR) {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    let body = response.to_json();
    if broadcast && response.error.is_none() {
        state.clients.broadcast(&Outbound::message(body.clone()));
    }

    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

async fn sse_connect(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, rx) = state.clients.register(StreamKind::Mcp);
    if let Some(tx) = state.clients.sender(&id) {
        let _ = tx.try_send(sse::ready(&id));
    }
    tokio::spawn(sse::keep_pinging(state.clients.clone(), id, sse::PING_INTERVAL));
    sse::event_stream(rx)
}

async fn sse_monitor(
    State(state): State<HttpState>,
    Path(name): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<Value>)> {
    let Some(monitor) = Monitor::resolve(&name, &state.ctx.registry) else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": format!("Unknown monitor: {name}"),
                "monitors": Monitor::names(&state.ctx.registry),
            })),
        ));
    };

    let (id, rx) = state.clients.register(StreamKind::Monitor(monitor.name.clone()));
    tokio::spawn(sse::poll_monitor(
        state.ctx.dispatcher.clone(),
        state.clients.clone(),
        id,
        monitor,
        state.ctx.config.query_timeout,
    ));
    Ok(sse::event_stream(rx))
}

async fn health(State(state): State<HttpState>) -> Json<Value> {
    let (connected, status) = if state.ctx.db.is_configured() {
        match state.ctx.db.probe(None).await {
            Ok(_) => (true, "connected".to_string()),
            Err(err) => (false, state.ctx.dispatcher.redact(&err.to_string())),
        }
    } else {
        (false, "not configured".to_string())
    };

    Json(json!({
        "status": if connected { "healthy" } else { "degraded" },
        "server": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "database_connected": connected,
        "database_status": status,
        "sse_clients": state.clients.len(),
    }))
}

async fn index(State(state): State<HttpState>) -> Json<Value> {
    Json(json!({
        "name": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "endpoints": {
            "message": "POST /message",
            "mcp": "POST /mcp",
            "events": "GET /sse",
            "monitors": "GET /sse/{monitor}",
            "health": "GET /health",
        },
        "authentication": "Authorization: Bearer <token>",
        "tools": state.ctx.registry.names(),
        "monitors": Monitor::names(&state.ctx.registry),
    }))
}
