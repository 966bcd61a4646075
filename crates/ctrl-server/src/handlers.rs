//! Control API handlers and the proxy catch-all.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use ctrl_core::{validate_target, Config, ConfigUpdate};
use serde_json::{json, Value};

use crate::client;
use crate::error::ApiError;
use crate::notifier::reload_message;
use crate::server::AppState;

pub async fn get_config(State(state): State<AppState>) -> Json<Config> {
    Json(Config::clone(&state.config.snapshot()))
}

/// Merge a partial update into the live config and tell every viewer.
pub async fn post_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ConfigUpdate>, JsonRejection>,
) -> Result<Json<Config>, ApiError> {
    let Json(update) = payload?;

    // the configured external name may differ from the one this request used
    if let (Some(raw), Some(public)) = (&update.target_url, state.public_authority.as_deref()) {
        validate_target(raw, Some(public))?;
    }

    let config = state.config.commit(&update, request_host(&headers).as_deref())?;
    state.notifier.notify(config.last_modified);
    Ok(Json(Config::clone(&config)))
}

pub async fn reset(State(state): State<AppState>) -> Result<Json<Config>, ApiError> {
    let config = state.config.reset(&state.defaults)?;
    state.notifier.notify(config.last_modified);
    Ok(Json(Config::clone(&config)))
}

/// Empty the shared jar and bump the version so viewers pick up the
/// logged-out state. Once the jar is empty the request has succeeded,
/// whether or not the bump goes through.
pub async fn clear_cookies(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let cleared = state.jar.clear()?;
    tracing::info!(cleared, "cookie jar cleared");

    let last_modified = match state.config.bump() {
        Ok(config) => {
            state.notifier.notify(config.last_modified);
            config.last_modified
        }
        Err(e) => {
            tracing::warn!(error = %e, "version bump after cookie clear failed");
            state.config.version()
        }
    };
    Ok(Json(json!({ "cleared": cleared, "lastModified": last_modified })))
}

pub async fn report_height(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(body) = payload?;
    let height = body
        .get("height")
        .and_then(Value::as_f64)
        .filter(|h| h.is_finite() && *h >= 0.0)
        .ok_or_else(|| ApiError::BadRequest("height must be a non-negative number".into()))?;

    *state.page_height.lock() = Some(height);
    tracing::debug!(height, "page height reported");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn version(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "no-store")],
        Json(json!({ "lastModified": state.config.version() })),
    )
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let config = state.config.snapshot();
    Json(json!({
        "targetUrl": config.target_url,
        "scaleFactor": config.scale_factor,
        "autoScroll": config.auto_scroll,
        "scrollSpeed": config.scroll_speed,
        "scrollSequence": config.scroll_sequence,
        "interfaceLocked": config.interface_locked,
        "lastModified": config.last_modified,
        "connectedClients": state.registry.count(),
        "pageHeight": *state.page_height.lock(),
        "cookies": state.jar.snapshot().len(),
    }))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.registry.register();
    tracing::info!(client_id = %client_id, "viewer connected");

    // a viewer reconnecting after a missed commit reloads straight away;
    // one that is current ignores a stamp equal to its own
    state
        .registry
        .send_to(&client_id, reload_message(state.config.version()));

    client::handle_ws_connection(socket, client_id, rx, Arc::clone(&state.registry)).await;
}

/// Every path the API does not claim belongs to the proxied site.
pub async fn proxy(State(state): State<AppState>, request: Request) -> Response {
    state.pipeline.handle(request).await
}

fn request_host(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
