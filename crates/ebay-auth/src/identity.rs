//! Identity lookup: resolve the eBay user behind an access token

use serde::Deserialize;

use crate::constants::IDENTITY_USER_PATH;
use crate::error::{Error, Result};

/// The seller an access token belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub username: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityBody {
    user_id: Option<String>,
    username: Option<String>,
}

/// Calls `GET {identity}/commerce/identity/v1/user/` with a bearer token.
#[derive(Debug, Clone)]
pub struct IdentityClient {
    http: reqwest::Client,
    identity_url: String,
}

impl IdentityClient {
    pub fn new(http: reqwest::Client, identity_url: impl Into<String>) -> Self {
        Self {
            http,
            identity_url: identity_url.into(),
        }
    }

    pub async fn get_user(&self, access_token: &str) -> Result<UserIdentity> {
        let url = format!(
            "{}{}",
            self.identity_url.trim_end_matches('/'),
            IDENTITY_USER_PATH
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::Request(format!("identity request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: "Failed to fetch user identity from eBay".into(),
            });
        }

        let body: IdentityBody = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("identity response: {e}")))?;

        match body.user_id {
            Some(user_id) if !user_id.is_empty() => Ok(UserIdentity {
                user_id,
                username: body.username,
            }),
            _ => Err(Error::InvalidResponse(
                "Missing userId in identity response".into(),
            )),
        }
    }
}
