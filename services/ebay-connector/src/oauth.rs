//! Seller authorization flow
//!
//! Endpoints:
//! - GET  /ebay/oauth/redirect: start consent, redirect to eBay
//! - GET  /ebay/oauth/callback: eBay redirects back with `code` and `state`
//! - POST /ebay/oauth/exchange: paste a callback URL by hand (form field `callback_url`)
//!
//! A completed exchange resolves the eBay user, upserts the credential and
//! seeds the access-token cache. Every outcome ends in a redirect to the
//! configured success or error route.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{Form, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use common::Secret;
use ebay_auth::{
    Credential, CredentialStore, CredentialUpdate, IdentityClient, OAuthClient, generate_state,
    now_millis,
};
use ebay_tokens::TokenManager;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::RoutesConfig;

/// Maximum age of a pending `state` value.
const STATE_EXPIRY: Duration = Duration::from_secs(600);

#[derive(Clone)]
pub struct OAuthState {
    oauth: OAuthClient,
    identity: IdentityClient,
    store: Arc<CredentialStore>,
    manager: Arc<TokenManager>,
    routes: RoutesConfig,
    pending: Arc<Mutex<HashMap<String, Instant>>>,
}

impl OAuthState {
    pub fn new(
        oauth: OAuthClient,
        identity: IdentityClient,
        store: Arc<CredentialStore>,
        manager: Arc<TokenManager>,
        routes: RoutesConfig,
    ) -> Self {
        Self {
            oauth,
            identity,
            store,
            manager,
            routes,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Exchange `code`, resolve the eBay user, persist and seed the cache.
    async fn complete(&self, code: &str) -> ebay_auth::Result<Credential> {
        let tokens = self.oauth.exchange_authorization_code(code).await?;
        let user = self.identity.get_user(&tokens.access_token).await?;
        let environment = self.oauth.environment();

        let update = CredentialUpdate {
            display_name: user.username.clone(),
            refresh_token: tokens
                .refresh_token
                .clone()
                .filter(|t| !t.is_empty())
                .map(Secret::new),
            refresh_token_expires_at: tokens
                .refresh_token_expires_in
                .map(|secs| now_millis().saturating_add(secs.saturating_mul(1000))),
        };
        let credential = self.store.upsert(&user.user_id, environment, update).await?;

        self.manager
            .cache_access_token(credential.id, &tokens.access_token, tokens.expires_in);

        info!(
            credential_id = credential.id,
            environment = %environment,
            "eBay account connected"
        );
        Ok(credential)
    }

    fn finish(&self, result: ebay_auth::Result<Credential>, step: &'static str) -> Response {
        match result {
            Ok(_) => Redirect::to(&self.routes.success_redirect).into_response(),
            Err(e) => {
                error!(step, error = %e, "eBay OAuth flow failed");
                Redirect::to(&self.routes.error_redirect).into_response()
            }
        }
    }
}

pub fn router(state: OAuthState) -> Router {
    Router::new()
        .route("/ebay/oauth/redirect", get(redirect_handler))
        .route("/ebay/oauth/callback", get(callback_handler))
        .route("/ebay/oauth/exchange", post(exchange_handler))
        .with_state(state)
}

/// GET /ebay/oauth/redirect: remember a fresh `state` and send the seller to eBay.
async fn redirect_handler(State(state): State<OAuthState>) -> Response {
    let csrf = generate_state();
    let url = match state.oauth.build_authorization_url(Some(&csrf)) {
        Ok(url) => url,
        Err(e) => return state.finish(Err(e), "redirect"),
    };

    let mut pending = state.pending.lock().await;
    // Lazy cleanup while holding the lock
    pending.retain(|_, created| created.elapsed() < STATE_EXPIRY);
    pending.insert(csrf, Instant::now());

    Redirect::to(&url).into_response()
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
}

/// GET /ebay/oauth/callback?code=..&state=..
async fn callback_handler(
    State(state): State<OAuthState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let result = async {
        let created = match query.state.as_deref() {
            Some(csrf) => state.pending.lock().await.remove(csrf),
            None => None,
        };
        if !created.is_some_and(|at| at.elapsed() < STATE_EXPIRY) {
            return Err(ebay_auth::Error::InvalidResponse(
                "Invalid state parameter".into(),
            ));
        }

        let code = query
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ebay_auth::Error::InvalidResponse("Missing authorization code".into()))?;
        state.complete(code).await
    }
    .await;

    state.finish(result, "callback")
}

#[derive(Deserialize)]
struct ExchangeRequest {
    callback_url: String,
}

/// POST /ebay/oauth/exchange: for when the callback cannot reach this service.
async fn exchange_handler(
    State(state): State<OAuthState>,
    Form(body): Form<ExchangeRequest>,
) -> Response {
    let result = async {
        let code = code_from_callback_url(&body.callback_url)?;
        state.complete(&code).await
    }
    .await;

    state.finish(result, "exchange")
}

fn code_from_callback_url(callback_url: &str) -> ebay_auth::Result<String> {
    let url = reqwest::Url::parse(callback_url.trim())
        .map_err(|e| ebay_auth::Error::InvalidResponse(format!("invalid callback URL: {e}")))?;
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ebay_auth::Error::InvalidResponse("No authorization code found in URL".into()))
}
