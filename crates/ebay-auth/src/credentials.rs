//! Durable seller credentials
//!
//! Manages a JSON file of seller refresh tokens keyed by a numeric id. All
//! writes use atomic temp-file + rename. A tokio Mutex serializes writers.
//!
//! Refresh tokens never sit in the file or in memory as plaintext records:
//! the [`TokenCodec`] encrypts them on the way in and decrypts them on the way
//! out of this module. Records are never hard-deleted; a failed refresh flips
//! `is_active` and a fresh authorization-code exchange flips it back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::codec::TokenCodec;
use crate::environment::Environment;
use crate::error::{Error, Result};

/// Opaque credential identifier.
pub type CredentialId = u64;

/// Current time as unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A seller's refresh token and its activation state, decrypted.
///
/// Timestamps are unix milliseconds.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: CredentialId,
    pub display_name: Option<String>,
    pub environment: Environment,
    pub external_user_id: String,
    pub refresh_token: Option<Secret<String>>,
    pub refresh_token_expires_at: Option<u64>,
    pub is_active: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Credential {
    /// True once a known refresh-token expiry has been reached.
    pub fn is_refresh_token_expired(&self, now: u64) -> bool {
        matches!(self.refresh_token_expires_at, Some(at) if at <= now)
    }
}

/// A credential's metadata without its refresh token.
///
/// Listing never touches the codec, so one undecryptable record cannot hide
/// the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSummary {
    pub id: CredentialId,
    pub display_name: Option<String>,
    pub environment: Environment,
    pub external_user_id: String,
    pub has_refresh_token: bool,
    pub refresh_token_expires_at: Option<u64>,
    pub is_active: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl CredentialSummary {
    /// Same deadline rule as [`Credential::is_refresh_token_expired`].
    pub fn is_refresh_token_expired(&self, now: u64) -> bool {
        matches!(self.refresh_token_expires_at, Some(at) if at <= now)
    }
}

impl From<&StoredCredential> for CredentialSummary {
    fn from(record: &StoredCredential) -> Self {
        Self {
            id: record.id,
            display_name: record.display_name.clone(),
            environment: record.environment,
            external_user_id: record.external_user_id.clone(),
            has_refresh_token: record.refresh_token.as_deref().is_some_and(|t| !t.is_empty()),
            refresh_token_expires_at: record.refresh_token_expires_at,
            is_active: record.is_active,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Fields written by an authorization-code exchange.
#[derive(Debug, Clone, Default)]
pub struct CredentialUpdate {
    pub display_name: Option<String>,
    pub refresh_token: Option<Secret<String>>,
    /// Kept unchanged when `None`.
    pub refresh_token_expires_at: Option<u64>,
}

/// On-disk form. `refresh_token` holds the codec output.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredential {
    id: CredentialId,
    #[serde(default)]
    display_name: Option<String>,
    environment: Environment,
    external_user_id: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    refresh_token_expires_at: Option<u64>,
    is_active: bool,
    created_at: u64,
    updated_at: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    next_id: CredentialId,
    credentials: BTreeMap<CredentialId, StoredCredential>,
}

impl StoreFile {
    fn allocate_id(&mut self) -> CredentialId {
        let floor = self.credentials.keys().next_back().copied().unwrap_or(0);
        self.next_id = self.next_id.max(floor) + 1;
        self.next_id
    }
}

/// Predicate builder over credential records.
///
/// ```
/// use ebay_auth::{CredentialQuery, Environment};
///
/// let query = CredentialQuery::new()
///     .active()
///     .environment(Environment::Production)
///     .usable_refresh_token_at(1_700_000_000_000);
/// # let _ = query;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialQuery {
    active: Option<bool>,
    environment: Option<Environment>,
    usable_at: Option<u64>,
}

impl CredentialQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only `is_active` records.
    pub fn active(mut self) -> Self {
        self.active = Some(true);
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Only records with no refresh-token expiry, or one later than `now`.
    pub fn usable_refresh_token_at(mut self, now: u64) -> Self {
        self.usable_at = Some(now);
        self
    }

    fn matches(&self, record: &StoredCredential) -> bool {
        self.active.is_none_or(|a| record.is_active == a)
            && self.environment.is_none_or(|e| record.environment == e)
            && self
                .usable_at
                .is_none_or(|now| record.refresh_token_expires_at.is_none_or(|at| at > now))
    }
}

/// File-backed credential store.
pub struct CredentialStore {
    path: PathBuf,
    codec: TokenCodec,
    state: Mutex<StoreFile>,
}

impl CredentialStore {
    /// Open the store at `path`, creating an empty file when missing.
    pub async fn open(path: PathBuf, codec: TokenCodec) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let file: StoreFile = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), credentials = file.credentials.len(), "loaded credentials");
            file
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let file = StoreFile::default();
            write_atomic(&path, &file).await?;
            file
        };

        Ok(Self {
            path,
            codec,
            state: Mutex::new(state),
        })
    }

    /// Load a credential by id.
    pub async fn find(&self, id: CredentialId) -> Result<Option<Credential>> {
        let state = self.state.lock().await;
        state
            .credentials
            .get(&id)
            .map(|record| self.decode(record))
            .transpose()
    }

    /// Metadata for one credential, without decrypting its token.
    pub async fn summary(&self, id: CredentialId) -> Option<CredentialSummary> {
        let state = self.state.lock().await;
        state.credentials.get(&id).map(CredentialSummary::from)
    }

    /// Load a credential by its eBay user id within one environment.
    pub async fn find_by_user(
        &self,
        external_user_id: &str,
        environment: Environment,
    ) -> Result<Option<Credential>> {
        let state = self.state.lock().await;
        state
            .credentials
            .values()
            .find(|r| r.external_user_id == external_user_id && r.environment == environment)
            .map(|record| self.decode(record))
            .transpose()
    }

    /// All credentials matching `query`, ordered by id. Tokens stay encrypted;
    /// use [`find`](Self::find) to decrypt one.
    pub async fn list(&self, query: CredentialQuery) -> Vec<CredentialSummary> {
        let state = self.state.lock().await;
        state
            .credentials
            .values()
            .filter(|r| query.matches(r))
            .map(CredentialSummary::from)
            .collect()
    }

    /// Active credentials of `environment` whose refresh token has no expiry
    /// or expires later. Credentials of the other environment are excluded
    /// because their tokens can only be refreshed with that environment's
    /// client credentials.
    pub async fn list_active_with_usable_refresh_token(
        &self,
        environment: Environment,
    ) -> Vec<CredentialSummary> {
        self.list(
            CredentialQuery::new()
                .active()
                .environment(environment)
                .usable_refresh_token_at(now_millis()),
        )
        .await
    }

    /// Create or update the credential for `(external_user_id, environment)`.
    ///
    /// Always leaves the record active. The refresh-token expiry is only
    /// overwritten when the update carries one.
    pub async fn upsert(
        &self,
        external_user_id: &str,
        environment: Environment,
        update: CredentialUpdate,
    ) -> Result<Credential> {
        let encrypted = update
            .refresh_token
            .as_ref()
            .map(|token| self.codec.encode(token.expose()))
            .transpose()?;
        let now = now_millis();

        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let existing = next
            .credentials
            .values()
            .find(|r| r.external_user_id == external_user_id && r.environment == environment)
            .map(|r| r.id);

        let id = match existing {
            Some(id) => id,
            None => {
                let id = next.allocate_id();
                next.credentials.insert(
                    id,
                    StoredCredential {
                        id,
                        display_name: None,
                        environment,
                        external_user_id: external_user_id.to_string(),
                        refresh_token: None,
                        refresh_token_expires_at: None,
                        is_active: true,
                        created_at: now,
                        updated_at: now,
                    },
                );
                id
            }
        };

        let record = next
            .credentials
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("credential {id}")))?;
        record.display_name = update.display_name;
        record.refresh_token = encrypted;
        if let Some(expires_at) = update.refresh_token_expires_at {
            record.refresh_token_expires_at = Some(expires_at);
        }
        record.is_active = true;
        record.updated_at = now;
        let credential = self.decode(record)?;

        write_atomic(&self.path, &next).await?;
        *state = next;
        debug!(credential_id = id, environment = %environment, created = existing.is_none(), "upserted credential");
        Ok(credential)
    }

    /// Replace the refresh token after the authorization server rotated it.
    pub async fn update_refresh_token(
        &self,
        id: CredentialId,
        refresh_token: &Secret<String>,
        refresh_token_expires_at: Option<u64>,
    ) -> Result<()> {
        let encrypted = self.codec.encode(refresh_token.expose())?;

        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let record = next
            .credentials
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("credential {id}")))?;
        record.refresh_token = Some(encrypted);
        if let Some(expires_at) = refresh_token_expires_at {
            record.refresh_token_expires_at = Some(expires_at);
        }
        record.updated_at = now_millis();

        write_atomic(&self.path, &next).await?;
        *state = next;
        debug!(credential_id = id, "rotated refresh token");
        Ok(())
    }

    /// Mark a credential inactive. Idempotent.
    pub async fn deactivate(&self, id: CredentialId) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let record = next
            .credentials
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("credential {id}")))?;
        if !record.is_active {
            return Ok(());
        }
        record.is_active = false;
        record.updated_at = now_millis();

        write_atomic(&self.path, &next).await?;
        *state = next;
        info!(credential_id = id, "deactivated credential");
        Ok(())
    }

    /// Number of stored credentials, active or not.
    pub async fn len(&self) -> usize {
        self.state.lock().await.credentials.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn decode(&self, record: &StoredCredential) -> Result<Credential> {
        let refresh_token = match record.refresh_token.as_deref() {
            None | Some("") => None,
            Some(stored) => Some(Secret::new(self.codec.decode(stored).map_err(|e| match e {
                Error::Crypto(reason) => Error::Crypto(format!("credential {}: {reason}", record.id)),
                other => other,
            })?)),
        };

        Ok(Credential {
            id: record.id,
            display_name: record.display_name.clone(),
            environment: record.environment,
            external_user_id: record.external_user_id.clone(),
            refresh_token,
            refresh_token_expires_at: record.refresh_token_expires_at,
            is_active: record.is_active,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Write the store atomically with 0600 permissions.
async fn write_atomic(path: &Path, data: &StoreFile) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
