//! Shared fixtures: a scripted token endpoint and store/manager builders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Form;
use axum::http::StatusCode;
use common::Secret;
use ebay_auth::{
    CredentialId, CredentialStore, CredentialUpdate, Environment, OAuthClient, OAuthConfig,
    TokenCodec,
};
use tokio::net::TcpListener;

use crate::cache::TokenCache;
use crate::manager::{TokenManager, TokenManagerConfig};

#[derive(Debug, Clone)]
pub struct TokenReply {
    status: u16,
    body: serde_json::Value,
}

impl TokenReply {
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }

    pub fn status(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }
}

/// Token endpoint answering by refresh token value, or by
/// `client_credentials` for the application grant. Anything unscripted gets
/// `400 invalid_grant`.
pub struct MockTokenServer {
    pub url: String,
    pub calls: Arc<AtomicUsize>,
    pub refresh_tokens_seen: Arc<Mutex<Vec<String>>>,
}

impl MockTokenServer {
    pub async fn start(replies: Vec<(&'static str, TokenReply)>) -> Self {
        Self::start_with_delay(replies, Duration::ZERO).await
    }

    pub async fn start_with_delay(replies: Vec<(&'static str, TokenReply)>, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let replies: Arc<HashMap<String, TokenReply>> = Arc::new(
            replies
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handler_calls = calls.clone();
        let handler_seen = seen.clone();
        let handler = move |Form(form): Form<HashMap<String, String>>| {
            let replies = replies.clone();
            let calls = handler_calls.clone();
            let seen = handler_seen.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let key = match form.get("grant_type").map(String::as_str) {
                    Some("refresh_token") => {
                        let rt = form.get("refresh_token").cloned().unwrap_or_default();
                        seen.lock().unwrap().push(rt.clone());
                        rt
                    }
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                let reply = replies.get(&key).cloned().unwrap_or_else(|| {
                    TokenReply::status(400, serde_json::json!({ "error": "invalid_grant" }))
                });
                (
                    StatusCode::from_u16(reply.status).unwrap(),
                    axum::Json(reply.body),
                )
            }
        };

        tokio::spawn(async move {
            let app = axum::Router::new().route("/token", axum::routing::post(handler));
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}/token"),
            calls,
            refresh_tokens_seen: seen,
        }
    }
}

pub fn oauth_client(token_url: &str, environment: Environment) -> OAuthClient {
    OAuthClient::new(
        reqwest::Client::new(),
        OAuthConfig {
            environment,
            client_id: Some("client-id".into()),
            client_secret: Some(Secret::new("client-secret".into())),
            redirect_uri: Some("Test-RuName".into()),
            scopes: vec!["https://api.ebay.com/oauth/api_scope".into()],
            authorize_url: "https://auth.sandbox.ebay.com/oauth2/authorize".into(),
            token_url: token_url.into(),
        },
    )
}

pub async fn open_store(dir: &tempfile::TempDir) -> Arc<CredentialStore> {
    let codec = TokenCodec::from_bytes(vec![7u8; 32]).unwrap();
    Arc::new(
        CredentialStore::open(dir.path().join("credentials.json"), codec)
            .await
            .unwrap(),
    )
}

/// Write a sandbox credential whose refresh token was encrypted under another
/// key. Call before [`open_store`] on the same directory.
pub async fn seed_undecryptable(dir: &tempfile::TempDir, user_id: &str) -> CredentialId {
    let codec = TokenCodec::from_bytes(vec![1u8; 32]).unwrap();
    let store = CredentialStore::open(dir.path().join("credentials.json"), codec)
        .await
        .unwrap();
    seed_credential(&store, user_id, Some("rt_other_key"), None).await
}

/// Insert an active sandbox credential and return its id.
pub async fn seed_credential(
    store: &CredentialStore,
    user_id: &str,
    refresh_token: Option<&str>,
    refresh_token_expires_at: Option<u64>,
) -> CredentialId {
    seed_credential_in(store, user_id, Environment::Sandbox, refresh_token, refresh_token_expires_at)
        .await
}

pub async fn seed_credential_in(
    store: &CredentialStore,
    user_id: &str,
    environment: Environment,
    refresh_token: Option<&str>,
    refresh_token_expires_at: Option<u64>,
) -> CredentialId {
    store
        .upsert(
            user_id,
            environment,
            CredentialUpdate {
                display_name: Some(format!("{user_id} store")),
                refresh_token: refresh_token.map(|t| Secret::new(t.to_string())),
                refresh_token_expires_at,
            },
        )
        .await
        .unwrap()
        .id
}

pub fn test_manager(
    token_url: &str,
    store: Arc<CredentialStore>,
    cache: Arc<dyn TokenCache>,
) -> TokenManager {
    TokenManager::new(
        oauth_client(token_url, Environment::Sandbox),
        store,
        cache,
        TokenManagerConfig::default(),
    )
}
