//! eBay OAuth building blocks
//!
//! Everything below the token lifecycle: the exchange client for the token
//! endpoint, the identity lookup, and the durable credential store with its
//! at-rest refresh-token codec. The lifecycle manager in `ebay-tokens` wires
//! these together.
//!
//! Authorization flow:
//! 1. `state::generate_state()` + `OAuthClient::build_authorization_url()`
//! 2. Seller consents, eBay redirects back with `code`
//! 3. `OAuthClient::exchange_authorization_code()`
//! 4. `IdentityClient::get_user()` resolves the eBay user id
//! 5. `CredentialStore::upsert()` persists the refresh token (encrypted)

pub mod codec;
pub mod constants;
pub mod credentials;
pub mod environment;
pub mod error;
pub mod identity;
pub mod state;
pub mod token;

pub use codec::TokenCodec;
pub use constants::{Endpoints, default_scopes};
pub use credentials::{
    Credential, CredentialId, CredentialQuery, CredentialStore, CredentialSummary,
    CredentialUpdate, now_millis,
};
pub use environment::Environment;
pub use error::{Error, Result};
pub use identity::{IdentityClient, UserIdentity};
pub use state::generate_state;
pub use token::{OAuthClient, OAuthConfig, TokenResponse};
