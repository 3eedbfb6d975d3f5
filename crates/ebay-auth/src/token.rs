//! OAuth exchange client for the eBay token endpoint
//!
//! Three grants share one POST shape (form body, HTTP Basic client
//! authentication):
//! 1. `authorization_code` after the seller consents in the browser
//! 2. `refresh_token` to mint a seller access token
//! 3. `client_credentials` for the application-scoped token
//!
//! The client holds configuration only. Required values are checked on every
//! call, before any network I/O.

use std::fmt;

use common::Secret;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::environment::Environment;
use crate::error::{Error, Result};

/// Parsed reply from the token endpoint.
///
/// Missing fields fall back to empty/zero/absent instead of failing the
/// parse. `refresh_token` is only present when the server rotated it.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("refresh_token_expires_in", &self.refresh_token_expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

impl TokenResponse {
    /// Parse a token endpoint body.
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body)
            .map_err(|e| Error::InvalidResponse(format!("token response is not valid JSON: {e}")))
    }
}

/// Client registration and endpoints for one environment.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub environment: Environment,
    pub client_id: Option<String>,
    pub client_secret: Option<Secret<String>>,
    pub redirect_uri: Option<String>,
    pub scopes: Vec<String>,
    pub authorize_url: String,
    pub token_url: String,
}

/// Stateless caller of the authorization server.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    config: OAuthConfig,
}

#[derive(Deserialize)]
struct ErrorBody {
    error_description: Option<String>,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, config: OAuthConfig) -> Self {
        Self { http, config }
    }

    pub fn environment(&self) -> Environment {
        self.config.environment
    }

    /// Build the consent URL the seller is redirected to.
    ///
    /// Query keys are always `client_id`, `redirect_uri`, `response_type`,
    /// `scope` (space-joined), followed by `state` when given.
    pub fn build_authorization_url(&self, state: Option<&str>) -> Result<String> {
        let client_id = self.client_id()?;
        let redirect_uri = self.redirect_uri()?;
        let scope = self.scope();

        let mut params = vec![
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope.as_str()),
        ];
        if let Some(state) = state {
            params.push(("state", state));
        }

        let url = Url::parse_with_params(&self.config.authorize_url, &params).map_err(|e| {
            Error::InvalidConfiguration {
                key: self.key("urls", "authorize"),
                reason: e.to_string(),
            }
        })?;
        Ok(url.into())
    }

    /// Exchange an authorization code for an access/refresh token pair.
    pub async fn exchange_authorization_code(&self, code: &str) -> Result<TokenResponse> {
        let redirect_uri = self.redirect_uri()?;
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        let (status, body) = self.post_token_form(&form).await?;
        if !status.is_success() {
            return Err(Error::TokenExchangeFailed(error_message(&body)));
        }
        TokenResponse::from_json(&body)
    }

    /// Mint a new seller access token from a refresh token.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let (status, body) = self.post_token_form(&form).await?;
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        TokenResponse::from_json(&body)
    }

    /// Obtain an application-scoped token via the client-credentials grant.
    pub async fn get_application_token(&self) -> Result<TokenResponse> {
        let scope = self.scope();
        let form = [
            ("grant_type", "client_credentials"),
            ("scope", scope.as_str()),
        ];

        let (status, body) = self.post_token_form(&form).await?;
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        TokenResponse::from_json(&body)
    }

    async fn post_token_form(
        &self,
        form: &[(&str, &str)],
    ) -> Result<(reqwest::StatusCode, String)> {
        let client_id = self.client_id()?;
        let client_secret = self.client_secret()?;
        let grant_type = form
            .iter()
            .find(|(k, _)| *k == "grant_type")
            .map_or("", |(_, v)| *v);

        let response = self
            .http
            .post(&self.config.token_url)
            .basic_auth(client_id, Some(client_secret))
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Request(format!("token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Request(format!("reading token response failed: {e}")))?;

        debug!(
            environment = %self.config.environment,
            grant_type,
            status = status.as_u16(),
            "token endpoint responded"
        );
        Ok((status, body))
    }

    fn client_id(&self) -> Result<&str> {
        required(self.config.client_id.as_deref(), || {
            self.key("credentials", "client_id")
        })
    }

    fn client_secret(&self) -> Result<&str> {
        required(
            self.config.client_secret.as_ref().map(|s| s.expose().as_str()),
            || self.key("credentials", "client_secret"),
        )
    }

    fn redirect_uri(&self) -> Result<&str> {
        required(self.config.redirect_uri.as_deref(), || {
            self.key("credentials", "redirect_uri")
        })
    }

    fn scope(&self) -> String {
        self.config.scopes.join(" ")
    }

    fn key(&self, section: &str, name: &str) -> String {
        format!("{section}.{}.{name}", self.config.environment)
    }
}

fn required<'a>(value: Option<&'a str>, key: impl FnOnce() -> String) -> Result<&'a str> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::MissingConfiguration { key: key() }),
    }
}

/// Prefer the server's `error_description`, fall back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error_description)
        .unwrap_or_else(|| body.to_string())
}
