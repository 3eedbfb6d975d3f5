//! eBay OAuth endpoints and default scopes
//!
//! These are public values. Client credentials and refresh tokens come from
//! configuration and the credential store, never from here.

use crate::environment::Environment;

pub const SANDBOX_AUTHORIZE_URL: &str = "https://auth.sandbox.ebay.com/oauth2/authorize";
pub const SANDBOX_TOKEN_URL: &str = "https://api.sandbox.ebay.com/identity/v1/oauth2/token";
pub const SANDBOX_API_URL: &str = "https://api.sandbox.ebay.com";
pub const SANDBOX_IDENTITY_URL: &str = "https://apiz.sandbox.ebay.com";

pub const PRODUCTION_AUTHORIZE_URL: &str = "https://auth.ebay.com/oauth2/authorize";
pub const PRODUCTION_TOKEN_URL: &str = "https://api.ebay.com/identity/v1/oauth2/token";
pub const PRODUCTION_API_URL: &str = "https://api.ebay.com";
pub const PRODUCTION_IDENTITY_URL: &str = "https://apiz.ebay.com";

/// Path of the identity endpoint, relative to the identity base URL.
pub const IDENTITY_USER_PATH: &str = "/commerce/identity/v1/user/";

/// Scopes requested by default in both environments.
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://api.ebay.com/oauth/api_scope",
    "https://api.ebay.com/oauth/api_scope/sell.inventory",
    "https://api.ebay.com/oauth/api_scope/sell.fulfillment",
    "https://api.ebay.com/oauth/api_scope/sell.account",
];

/// Endpoint URLs for one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authorize: String,
    pub token: String,
    pub api: String,
    pub identity: String,
}

impl Endpoints {
    /// Built-in endpoints for the given environment.
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Sandbox => Self {
                authorize: SANDBOX_AUTHORIZE_URL.into(),
                token: SANDBOX_TOKEN_URL.into(),
                api: SANDBOX_API_URL.into(),
                identity: SANDBOX_IDENTITY_URL.into(),
            },
            Environment::Production => Self {
                authorize: PRODUCTION_AUTHORIZE_URL.into(),
                token: PRODUCTION_TOKEN_URL.into(),
                api: PRODUCTION_API_URL.into(),
                identity: PRODUCTION_IDENTITY_URL.into(),
            },
        }
    }
}

/// Default scopes as owned strings.
pub fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_endpoints_point_at_sandbox_hosts() {
        let endpoints = Endpoints::for_environment(Environment::Sandbox);
        assert!(endpoints.authorize.contains("sandbox"));
        assert!(endpoints.token.contains("sandbox"));
        assert!(endpoints.api.contains("sandbox"));
        assert!(endpoints.identity.starts_with("https://apiz.sandbox"));
    }

    #[test]
    fn production_endpoints_have_no_sandbox_hosts() {
        let endpoints = Endpoints::for_environment(Environment::Production);
        for url in [
            &endpoints.authorize,
            &endpoints.token,
            &endpoints.api,
            &endpoints.identity,
        ] {
            assert!(!url.contains("sandbox"), "unexpected sandbox url: {url}");
        }
    }

    #[test]
    fn default_scopes_include_base_scope() {
        let scopes = default_scopes();
        assert_eq!(scopes.len(), 4);
        assert_eq!(scopes[0], "https://api.ebay.com/oauth/api_scope");
    }
}
