//! Authenticated request builder for the eBay REST APIs.

use std::sync::Arc;

use ebay_auth::CredentialId;
use reqwest::{Method, RequestBuilder};

use crate::error::Result;
use crate::manager::TokenManager;

/// Prepends the API base URL and attaches a bearer token from the manager.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    manager: Arc<TokenManager>,
    api_base: String,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, manager: Arc<TokenManager>, api_base: impl Into<String>) -> Self {
        Self {
            http,
            manager,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Request on behalf of a seller, e.g. `/sell/inventory/v1/inventory_item`.
    pub async fn for_seller(
        &self,
        credential_id: CredentialId,
        method: Method,
        path: &str,
    ) -> Result<RequestBuilder> {
        let token = self.manager.get_seller_access_token(credential_id).await?;
        Ok(self.request(method, path).bearer_auth(token))
    }

    /// Request with the application token, e.g. taxonomy or browse calls.
    pub async fn for_application(
        &self,
        method: Method,
        path: &str,
    ) -> ebay_auth::Result<RequestBuilder> {
        let token = self.manager.get_application_access_token().await?;
        Ok(self.request(method, path).bearer_auth(token))
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path))
    }
}
