use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use tracing::{error, info, warn};

use crate::bot::{self, AppState};
use crate::line::{self, WebhookPayload};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/callback", post(handle_callback))
        .with_state(state)
}

/// The LINE webhook endpoint. The signature is checked over the raw body
/// before anything is parsed; a bad signature ends the request with 400
/// and no handler runs.
async fn handle_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    info!("Webhook request received: {} bytes", body.len());

    let signature = headers
        .get("x-line-signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if !line::verify_signature(&state.config.line.channel_secret, body.as_bytes(), signature) {
        warn!("Rejected webhook request with invalid signature");
        return StatusCode::BAD_REQUEST.into_response();
    }

    let payload: WebhookPayload = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to parse webhook payload: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    for event in payload.events {
        bot::handle_event(&state, event).await;
    }

    "OK".into_response()
}

/// Binds the webhook server and serves until the process is stopped.
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Listening on {}", addr);
    axum::serve(listener, router(state)).await?;

    Ok(())
}
