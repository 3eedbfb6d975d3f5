//! Error types for OAuth exchange, identity lookup and credential storage

/// Errors from the eBay authorization server, identity endpoint or the
/// credential store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Missing eBay configuration: {key}")]
    MissingConfiguration { key: String },

    #[error("Invalid eBay configuration {key}: {reason}")]
    InvalidConfiguration { key: String, reason: String },

    #[error("Invalid OAuth response from eBay: {0}")]
    InvalidResponse(String),

    #[error("Failed to exchange authorization code for tokens: {0}")]
    TokenExchangeFailed(String),

    #[error("eBay API returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("refresh token codec error: {0}")]
    Crypto(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
