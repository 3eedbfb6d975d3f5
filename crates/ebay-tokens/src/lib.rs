//! eBay access-token lifecycle
//!
//! [`TokenManager`] hands out seller and application access tokens, serving
//! them from a [`TokenCache`] when possible and otherwise exchanging the
//! stored refresh token. Failed refreshes deactivate the credential.
//! [`refresh_all`] drives the same path for every eligible credential.

pub mod api;
pub mod cache;
pub mod error;
pub mod manager;
pub mod refresh;

#[cfg(test)]
mod test_support;

pub use api::ApiClient;
pub use cache::{MemoryCache, TokenCache};
pub use error::{Error, Result};
pub use manager::{TokenManager, TokenManagerConfig};
pub use refresh::{RefreshDelay, RefreshSummary, refresh_all, spawn_refresh_task};
