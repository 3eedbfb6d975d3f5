//! Token lifecycle manager
//!
//! Decides when a cached access token is reusable and when to mint a new one.
//! Per seller credential the implicit states are:
//!
//! - cached: a valid access token sits in the cache, no I/O at all
//! - stale: cache miss, refresh token still valid
//! - refreshing: one `refresh_token` grant in flight (single-flight per id)
//! - deactivated: any refresh failure or an expired refresh token; only a new
//!   authorization-code exchange brings the credential back
//!
//! Nothing is retried here. A refresh token that fails once fails the same way
//! on every retry, so the credential is switched off and surfaced for
//! re-authorization instead.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use common::Secret;
use ebay_auth::{CredentialId, CredentialStore, Environment, OAuthClient, now_millis};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::cache::TokenCache;
use crate::error::{Error, Result};

/// Cache naming and lifetime policy.
#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    /// Prefix of every cache key, e.g. `ebay`.
    pub cache_prefix: String,
    /// Subtracted from the server-reported lifetime before caching.
    pub ttl_buffer: Duration,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "ebay".into(),
            ttl_buffer: Duration::from_secs(300),
        }
    }
}

pub struct TokenManager {
    oauth: OAuthClient,
    store: Arc<CredentialStore>,
    cache: Arc<dyn TokenCache>,
    config: TokenManagerConfig,
    refresh_guards: std::sync::Mutex<HashMap<CredentialId, Arc<Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(
        oauth: OAuthClient,
        store: Arc<CredentialStore>,
        cache: Arc<dyn TokenCache>,
        config: TokenManagerConfig,
    ) -> Self {
        Self {
            oauth,
            store,
            cache,
            config,
            refresh_guards: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Environment of the OAuth client; application tokens are cached per
    /// environment.
    pub fn environment(&self) -> Environment {
        self.oauth.environment()
    }

    pub fn credential_store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Access token for a seller credential.
    ///
    /// A cache hit returns without I/O. On a miss only one refresh per
    /// credential runs at a time; callers queued behind it re-check the cache
    /// and reuse its result.
    pub async fn get_seller_access_token(&self, credential_id: CredentialId) -> Result<String> {
        let key = self.seller_cache_key(credential_id);
        if let Some(token) = self.cached(&key) {
            debug!(credential_id, "seller token cache hit");
            record("seller", "cache_hit");
            return Ok(token);
        }

        let guard = self.refresh_guard(credential_id);
        let result = {
            let _singleflight = guard.lock().await;
            match self.cached(&key) {
                Some(token) => {
                    debug!(credential_id, "seller token refreshed by concurrent caller");
                    record("seller", "cache_hit");
                    Ok(token)
                }
                None => self.refresh_seller_token(credential_id).await,
            }
        };
        drop(guard);
        self.release_refresh_guard(credential_id);
        result
    }

    /// Application-scoped access token (client-credentials grant).
    ///
    /// Failures are returned as the raw OAuth error; there is no credential to
    /// deactivate.
    pub async fn get_application_access_token(&self) -> ebay_auth::Result<String> {
        let key = self.application_cache_key();
        if let Some(token) = self.cached(&key) {
            debug!(environment = %self.environment(), "application token cache hit");
            record("application", "cache_hit");
            return Ok(token);
        }

        let response = match self.oauth.get_application_token().await {
            Ok(response) => response,
            Err(e) => {
                record("application", "failed");
                return Err(e);
            }
        };
        self.cache_application_token(&response.access_token, response.expires_in);
        record("application", "refreshed");
        Ok(response.access_token)
    }

    /// Seed the cache for a seller, e.g. right after a code exchange.
    pub fn cache_access_token(&self, credential_id: CredentialId, access_token: &str, expires_in: u64) {
        self.cache.put(
            &self.seller_cache_key(credential_id),
            access_token,
            self.cache_ttl(expires_in),
        );
    }

    pub fn cache_application_token(&self, access_token: &str, expires_in: u64) {
        self.cache.put(
            &self.application_cache_key(),
            access_token,
            self.cache_ttl(expires_in),
        );
    }

    /// `expires_in - ttl_buffer`, floored at zero.
    pub fn cache_ttl(&self, expires_in: u64) -> Duration {
        Duration::from_secs(expires_in).saturating_sub(self.config.ttl_buffer)
    }

    pub fn seller_cache_key(&self, credential_id: CredentialId) -> String {
        format!("{}.access_token.{credential_id}", self.config.cache_prefix)
    }

    pub fn application_cache_key(&self) -> String {
        format!(
            "{}.application_token.{}",
            self.config.cache_prefix,
            self.environment()
        )
    }

    async fn refresh_seller_token(&self, id: CredentialId) -> Result<String> {
        let summary = self
            .store
            .summary(id)
            .await
            .ok_or(Error::CredentialNotFound { id })?;

        if !summary.is_active {
            return Err(Error::CredentialInactive { id });
        }

        if summary.is_refresh_token_expired(now_millis()) {
            self.deactivate(id).await;
            record("seller", "failed");
            return Err(Error::RefreshTokenExpired { id });
        }

        let credential = match self.store.find(id).await {
            Ok(Some(credential)) => credential,
            Ok(None) => return Err(Error::CredentialNotFound { id }),
            // An undecryptable refresh token will never refresh.
            Err(e @ ebay_auth::Error::Crypto(_)) => {
                self.deactivate(id).await;
                error!(credential_id = id, error = %e, "eBay token refresh failed");
                record("seller", "failed");
                return Err(Error::RefreshFailed {
                    id,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(Error::Credential(e.to_string())),
        };
        let Some(refresh_token) = credential.refresh_token.as_ref() else {
            record("seller", "failed");
            return Err(Error::RefreshFailed {
                id,
                reason: "No refresh token available".into(),
            });
        };

        match self.rotate(id, refresh_token).await {
            Ok(access_token) => {
                record("seller", "refreshed");
                Ok(access_token)
            }
            Err(e) => {
                self.deactivate(id).await;
                error!(credential_id = id, error = %e, "eBay token refresh failed");
                record("seller", "failed");
                Err(Error::RefreshFailed {
                    id,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Exchange the refresh token, persist a rotated one, then cache.
    ///
    /// The rotated refresh token is durable before the access token is
    /// returned or cached.
    async fn rotate(
        &self,
        id: CredentialId,
        refresh_token: &Secret<String>,
    ) -> ebay_auth::Result<String> {
        let response = self.oauth.refresh_access_token(refresh_token.expose()).await?;

        if let Some(rotated) = response.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            let expires_at = response
                .refresh_token_expires_in
                .map(|secs| now_millis().saturating_add(secs.saturating_mul(1000)));
            self.store
                .update_refresh_token(id, &Secret::new(rotated.to_string()), expires_at)
                .await?;
            debug!(credential_id = id, "persisted rotated refresh token");
        }

        self.cache_access_token(id, &response.access_token, response.expires_in);
        Ok(response.access_token)
    }

    async fn deactivate(&self, id: CredentialId) {
        warn!(credential_id = id, "deactivating eBay credential");
        if let Err(e) = self.store.deactivate(id).await {
            error!(credential_id = id, error = %e, "failed to deactivate credential");
        }
    }

    fn cached(&self, key: &str) -> Option<String> {
        self.cache.get(key).filter(|t| !t.is_empty())
    }

    fn refresh_guard(&self, id: CredentialId) -> Arc<Mutex<()>> {
        self.refresh_guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .clone()
    }

    /// Drop the guard entry once no caller holds or waits on it.
    fn release_refresh_guard(&self, id: CredentialId) {
        let mut guards = self
            .refresh_guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if guards.get(&id).is_some_and(|g| Arc::strong_count(g) == 1) {
            guards.remove(&id);
        }
    }
}

fn record(kind: &'static str, result: &'static str) {
    metrics::counter!("ebay_token_requests_total", "kind" => kind, "result" => result)
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::test_support::{
        MockTokenServer, TokenReply, open_store, seed_credential, seed_undecryptable, test_manager,
    };
    use ebay_auth::CredentialUpdate;
    use std::sync::atomic::Ordering;

    /// Records every `put` so TTLs can be asserted.
    #[derive(Default)]
    struct RecordingCache {
        inner: MemoryCache,
        puts: std::sync::Mutex<Vec<(String, Duration)>>,
    }

    impl TokenCache for RecordingCache {
        fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, token: &str, ttl: Duration) {
            self.puts.lock().unwrap().push((key.to_string(), ttl));
            self.inner.put(key, token, ttl);
        }
    }

    #[tokio::test]
    async fn cache_hit_makes_no_network_call() {
        let server = MockTokenServer::start(vec![]).await;
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let id = seed_credential(&store, "seller-1", Some("rt_1"), None).await;
        let manager = test_manager(&server.url, store, Arc::new(MemoryCache::new()));

        manager.cache_access_token(id, "cached-at", 7200);

        assert_eq!(manager.get_seller_access_token(id).await.unwrap(), "cached-at");
        assert_eq!(server.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cache_miss_refreshes_then_serves_from_cache() {
        let server = MockTokenServer::start(vec![(
            "rt_1",
            TokenReply::ok(serde_json::json!({ "access_token": "fresh-at", "expires_in": 7200 })),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let id = seed_credential(&store, "seller-1", Some("rt_1"), None).await;
        let manager = test_manager(&server.url, store.clone(), Arc::new(MemoryCache::new()));

        assert_eq!(manager.get_seller_access_token(id).await.unwrap(), "fresh-at");
        assert_eq!(manager.get_seller_access_token(id).await.unwrap(), "fresh-at");
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);

        // No rotation in the reply: the stored refresh token is unchanged.
        let credential = store.find(id).await.unwrap().unwrap();
        assert_eq!(credential.refresh_token.unwrap().expose(), "rt_1");
        assert!(credential.is_active);
    }

    #[tokio::test]
    async fn unknown_credential_is_not_found() {
        let server = MockTokenServer::start(vec![]).await;
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let manager = test_manager(&server.url, store, Arc::new(MemoryCache::new()));

        let err = manager.get_seller_access_token(42).await.unwrap_err();
        assert!(matches!(err, Error::CredentialNotFound { id: 42 }), "got {err:?}");
        assert_eq!(server.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn inactive_credential_fails_without_network() {
        let server = MockTokenServer::start(vec![]).await;
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let id = seed_credential(&store, "seller-1", Some("rt_1"), None).await;
        store.deactivate(id).await.unwrap();
        let manager = test_manager(&server.url, store, Arc::new(MemoryCache::new()));

        let err = manager.get_seller_access_token(id).await.unwrap_err();
        assert!(matches!(err, Error::CredentialInactive { .. }), "got {err:?}");
        assert_eq!(server.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_refresh_token_deactivates_credential() {
        let server = MockTokenServer::start(vec![]).await;
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let expired = now_millis() - 60_000;
        let id = seed_credential(&store, "seller-1", Some("rt_1"), Some(expired)).await;
        let manager = test_manager(&server.url, store.clone(), Arc::new(MemoryCache::new()));

        let err = manager.get_seller_access_token(id).await.unwrap_err();
        assert!(matches!(err, Error::RefreshTokenExpired { .. }), "got {err:?}");
        assert!(!store.find(id).await.unwrap().unwrap().is_active);
        assert_eq!(server.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_deactivation() {
        let server = MockTokenServer::start(vec![]).await;
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let id = seed_credential(&store, "seller-1", None, None).await;
        let manager = test_manager(&server.url, store.clone(), Arc::new(MemoryCache::new()));

        let err = manager.get_seller_access_token(id).await.unwrap_err();
        match err {
            Error::RefreshFailed { reason, .. } => assert_eq!(reason, "No refresh token available"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(store.find(id).await.unwrap().unwrap().is_active);
        assert_eq!(server.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rotated_refresh_token_replaces_stored_one() {
        let server = MockTokenServer::start(vec![
            (
                "rt_old",
                TokenReply::ok(serde_json::json!({
                    "access_token": "at_1",
                    "expires_in": 7200,
                    "refresh_token": "rt_new",
                    "refresh_token_expires_in": 47304000
                })),
            ),
            (
                "rt_new",
                TokenReply::ok(serde_json::json!({ "access_token": "at_2", "expires_in": 7200 })),
            ),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let id = seed_credential(&store, "seller-1", Some("rt_old"), None).await;

        let manager = test_manager(&server.url, store.clone(), Arc::new(MemoryCache::new()));
        let before = now_millis();
        assert_eq!(manager.get_seller_access_token(id).await.unwrap(), "at_1");

        let credential = store.find(id).await.unwrap().unwrap();
        assert_eq!(credential.refresh_token.unwrap().expose(), "rt_new");
        let expires_at = credential.refresh_token_expires_at.unwrap();
        assert!(expires_at >= before + 47_304_000_000);

        // A cold cache refreshes with the rotated token, never the old one.
        let cold = test_manager(&server.url, store, Arc::new(MemoryCache::new()));
        assert_eq!(cold.get_seller_access_token(id).await.unwrap(), "at_2");
        assert_eq!(
            *server.refresh_tokens_seen.lock().unwrap(),
            vec!["rt_old".to_string(), "rt_new".to_string()]
        );
    }

    #[tokio::test]
    async fn invalid_grant_deactivates_and_reports_refresh_failed() {
        let server = MockTokenServer::start(vec![(
            "rt_revoked",
            TokenReply::status(
                400,
                serde_json::json!({
                    "error": "invalid_grant",
                    "error_description": "the provided authorization refresh token is invalid or was issued to another client"
                }),
            ),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let id = seed_credential(&store, "seller-1", Some("rt_revoked"), None).await;
        let manager = test_manager(&server.url, store.clone(), Arc::new(MemoryCache::new()));

        let err = manager.get_seller_access_token(id).await.unwrap_err();
        match err {
            Error::RefreshFailed { id: failed, reason } => {
                assert_eq!(failed, id);
                assert!(reason.contains("HTTP 400"), "reason: {reason}");
                assert!(reason.contains("refresh token is invalid"), "reason: {reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!store.find(id).await.unwrap().unwrap().is_active);

        // Deactivated: the next call never reaches the server.
        let err = manager.get_seller_access_token(id).await.unwrap_err();
        assert!(matches!(err, Error::CredentialInactive { .. }));
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_deactivates() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let id = seed_credential(&store, "seller-1", Some("rt_1"), None).await;
        // Port 9 (discard) on localhost refuses connections.
        let manager = test_manager(
            "http://127.0.0.1:9/token",
            store.clone(),
            Arc::new(MemoryCache::new()),
        );

        let err = manager.get_seller_access_token(id).await.unwrap_err();
        assert!(matches!(err, Error::RefreshFailed { .. }), "got {err:?}");
        assert!(!store.find(id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn undecryptable_refresh_token_deactivates() {
        let server = MockTokenServer::start(vec![]).await;
        let dir = tempfile::tempdir().unwrap();
        let id = seed_undecryptable(&dir, "seller-1").await;
        let store = open_store(&dir).await;
        let manager = test_manager(&server.url, store.clone(), Arc::new(MemoryCache::new()));

        let err = manager.get_seller_access_token(id).await.unwrap_err();
        match err {
            Error::RefreshFailed { id: failed, reason } => {
                assert_eq!(failed, id);
                assert!(reason.contains("decryption failed"), "reason: {reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(server.calls.load(Ordering::SeqCst), 0);

        assert!(!store.summary(id).await.unwrap().is_active);

        let err = manager.get_seller_access_token(id).await.unwrap_err();
        assert!(matches!(err, Error::CredentialInactive { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn refreshed_token_cached_with_buffered_ttl() {
        let server = MockTokenServer::start(vec![(
            "rt_1",
            TokenReply::ok(serde_json::json!({ "access_token": "at", "expires_in": 7200 })),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let id = seed_credential(&store, "seller-1", Some("rt_1"), None).await;
        let cache = Arc::new(RecordingCache::default());
        let manager = test_manager(&server.url, store, cache.clone());

        manager.get_seller_access_token(id).await.unwrap();

        let puts = cache.puts.lock().unwrap();
        assert_eq!(
            *puts,
            vec![(format!("ebay.access_token.{id}"), Duration::from_secs(6900))]
        );
    }

    #[tokio::test]
    async fn application_token_cached_and_reused() {
        let server = MockTokenServer::start(vec![(
            "client_credentials",
            TokenReply::ok(serde_json::json!({ "access_token": "app-token", "expires_in": 7200 })),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let cache = Arc::new(RecordingCache::default());
        let manager = test_manager(&server.url, store, cache.clone());

        assert_eq!(manager.get_application_access_token().await.unwrap(), "app-token");
        assert_eq!(manager.get_application_access_token().await.unwrap(), "app-token");
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *cache.puts.lock().unwrap(),
            vec![(
                "ebay.application_token.sandbox".to_string(),
                Duration::from_secs(6900)
            )]
        );
    }

    #[tokio::test]
    async fn application_token_failure_is_raw_auth_error() {
        let server = MockTokenServer::start(vec![(
            "client_credentials",
            TokenReply::status(401, serde_json::json!({ "error": "invalid_client" })),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let manager = test_manager(&server.url, store, Arc::new(MemoryCache::new()));

        let err = manager.get_application_access_token().await.unwrap_err();
        assert!(
            matches!(err, ebay_auth::Error::Http { status: 401, .. }),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_refresh() {
        let server = MockTokenServer::start_with_delay(
            vec![(
                "rt_old",
                TokenReply::ok(serde_json::json!({
                    "access_token": "shared-at",
                    "expires_in": 7200,
                    "refresh_token": "rt_rotated"
                })),
            )],
            Duration::from_millis(200),
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let id = seed_credential(&store, "seller-1", Some("rt_old"), None).await;
        let manager = Arc::new(test_manager(
            &server.url,
            store.clone(),
            Arc::new(MemoryCache::new()),
        ));

        let mut handles = vec![];
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager.get_seller_access_token(id).await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), "shared-at");
        }

        assert_eq!(server.calls.load(Ordering::SeqCst), 1);
        let credential = store.find(id).await.unwrap().unwrap();
        assert_eq!(credential.refresh_token.unwrap().expose(), "rt_rotated");
        assert!(manager.refresh_guards.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reauthorized_credential_refreshes_again() {
        let server = MockTokenServer::start(vec![(
            "rt_fresh",
            TokenReply::ok(serde_json::json!({ "access_token": "at", "expires_in": 60 })),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let id = seed_credential(&store, "seller-1", Some("rt_dead"), None).await;
        store.deactivate(id).await.unwrap();
        store
            .upsert(
                "seller-1",
                Environment::Sandbox,
                CredentialUpdate {
                    refresh_token: Some(Secret::new("rt_fresh".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let manager = test_manager(&server.url, store, Arc::new(MemoryCache::new()));

        // expires_in below the buffer: cached with zero TTL, still returned.
        assert_eq!(manager.get_seller_access_token(id).await.unwrap(), "at");
    }

    #[tokio::test]
    async fn cache_ttl_floors_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let manager = test_manager("http://127.0.0.1:9/token", store, Arc::new(MemoryCache::new()));

        assert_eq!(manager.cache_ttl(7200), Duration::from_secs(6900));
        assert_eq!(manager.cache_ttl(300), Duration::ZERO);
        assert_eq!(manager.cache_ttl(10), Duration::ZERO);
    }

    #[tokio::test]
    async fn zero_ttl_seed_is_served_once() {
        let server = MockTokenServer::start(vec![]).await;
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let id = seed_credential(&store, "seller-1", None, None).await;
        let manager = test_manager(&server.url, store, Arc::new(MemoryCache::new()));

        manager.cache_access_token(id, "short-lived", 120);
        assert_eq!(manager.get_seller_access_token(id).await.unwrap(), "short-lived");
        // Gone after one read: the next call goes to the store and finds no refresh token.
        assert!(matches!(
            manager.get_seller_access_token(id).await,
            Err(Error::RefreshFailed { .. })
        ));
    }

    #[tokio::test]
    async fn cache_keys_use_prefix_and_environment() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let manager = TokenManager::new(
            crate::test_support::oauth_client("http://127.0.0.1:9/token", Environment::Production),
            store,
            Arc::new(MemoryCache::new()),
            TokenManagerConfig {
                cache_prefix: "shop".into(),
                ttl_buffer: Duration::from_secs(60),
            },
        );
        assert_eq!(manager.seller_cache_key(12), "shop.access_token.12");
        assert_eq!(manager.application_cache_key(), "shop.application_token.production");
    }
}
