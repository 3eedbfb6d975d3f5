//! Error types for seller token refresh

use ebay_auth::CredentialId;

/// Errors from the seller-token path of the lifecycle manager.
///
/// `CredentialNotFound` and `CredentialInactive` leave the credential
/// untouched. `RefreshTokenExpired` and `RefreshFailed` are only returned
/// after the credential has been deactivated, except for a missing refresh
/// token, which is reported as `RefreshFailed` without mutation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("eBay credential with ID {id} not found")]
    CredentialNotFound { id: CredentialId },

    #[error("eBay credential with ID {id} is inactive")]
    CredentialInactive { id: CredentialId },

    #[error("Refresh token expired for credential {id}")]
    RefreshTokenExpired { id: CredentialId },

    #[error("Failed to refresh token for credential {id}: {reason}")]
    RefreshFailed { id: CredentialId, reason: String },

    #[error("credential store error: {0}")]
    Credential(String),
}

/// Result alias for token lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;
