//! Marketplace account deletion webhook
//!
//! eBay validates the endpoint with a challenge (GET) and afterwards POSTs
//! deletion notifications. Notifications are acknowledged and logged; no
//! credential state is touched here.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::DeletionConfig;

#[derive(Deserialize)]
struct ChallengeQuery {
    challenge_code: Option<String>,
}

pub fn router(config: DeletionConfig) -> Router {
    Router::new()
        .route(
            "/ebay/account-deletion",
            get(challenge_handler).post(notification_handler),
        )
        .with_state(config)
}

/// Lowercase hex of `sha256(challenge_code || verification_token || endpoint_url)`.
pub fn challenge_response(challenge_code: &str, verification_token: &str, endpoint_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge_code.as_bytes());
    hasher.update(verification_token.as_bytes());
    hasher.update(endpoint_url.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// GET /ebay/account-deletion?challenge_code=...
async fn challenge_handler(
    State(config): State<DeletionConfig>,
    Query(query): Query<ChallengeQuery>,
) -> impl IntoResponse {
    let Some(code) = query.challenge_code.filter(|c| !c.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(serde_json::json!({ "error": "Missing challenge_code" })),
        );
    };

    if config.verification_token.is_none() || config.endpoint_url.is_none() {
        warn!("deletion challenge received without verification token or endpoint URL configured");
    }
    let token = config
        .verification_token
        .as_ref()
        .map_or("", |t| t.expose().as_str());
    let endpoint = config.endpoint_url.as_deref().unwrap_or("");

    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "challengeResponse": challenge_response(&code, token, endpoint)
        })),
    )
}

/// POST /ebay/account-deletion
async fn notification_handler(body: Bytes) -> impl IntoResponse {
    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
    let notification_id = payload
        .pointer("/notification/notificationId")
        .or_else(|| payload.get("notificationId"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let metadata = payload.get("metadata").cloned().unwrap_or_default();

    info!(
        notification_id,
        metadata = %metadata,
        "eBay account deletion notification received"
    );

    axum::Json(serde_json::json!({ "ack": "success" }))
}
