//! Configuration types and loading
//!
//! Config precedence: env vars > config file > built-in defaults.
//! Client secrets and the encryption key may come from the environment so
//! they never have to live in the TOML file.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use ebay_auth::{Endpoints, Environment, OAuthConfig, default_scopes};
use ebay_tokens::{RefreshDelay, TokenManagerConfig};
use serde::{Deserialize, Deserializer};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Environment used for new credentials, application tokens and refresh runs.
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub credentials: PerEnvironment<ClientCredentials>,
    #[serde(default)]
    pub scopes: PerEnvironment<Option<Vec<String>>>,
    #[serde(default)]
    pub urls: PerEnvironment<UrlOverrides>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub deletion_notification: DeletionConfig,
    #[serde(default)]
    pub routes: RoutesConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// One value per eBay environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PerEnvironment<T> {
    #[serde(default)]
    pub sandbox: T,
    #[serde(default)]
    pub production: T,
}

impl<T> PerEnvironment<T> {
    pub fn get(&self, environment: Environment) -> &T {
        match environment {
            Environment::Sandbox => &self.sandbox,
            Environment::Production => &self.production,
        }
    }

    fn get_mut(&mut self, environment: Environment) -> &mut T {
        match environment {
            Environment::Sandbox => &mut self.sandbox,
            Environment::Production => &mut self.production,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Externally reachable base URL; `APP_URL` overrides.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
            public_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub credentials_path: PathBuf,
    /// Base64 AES-256 key. Set from EBAY_ENCRYPTION_KEY or `encryption_key_file`.
    #[serde(skip)]
    pub encryption_key: Option<Secret<String>>,
    #[serde(default)]
    pub encryption_key_file: Option<PathBuf>,
}

/// Application keyset for one environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientCredentials {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default, deserialize_with = "optional_secret")]
    pub client_secret: Option<Secret<String>>,
    /// eBay RuName registered for the application.
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

/// Per-environment endpoint overrides; unset fields use the eBay hosts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UrlOverrides {
    pub authorize: Option<String>,
    pub token: Option<String>,
    pub api: Option<String>,
    pub identity: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_prefix")]
    pub prefix: String,
    #[serde(default = "default_ttl_buffer")]
    pub ttl_buffer_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: default_cache_prefix(),
            ttl_buffer_secs: default_ttl_buffer(),
        }
    }
}

/// Marketplace account deletion webhook settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeletionConfig {
    #[serde(default, deserialize_with = "optional_secret")]
    pub verification_token: Option<Secret<String>>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
    #[serde(default = "default_redirect")]
    pub success_redirect: String,
    #[serde(default = "default_redirect")]
    pub error_redirect: String,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            success_redirect: default_redirect(),
            error_redirect: default_redirect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_min_delay")]
    pub min_delay_secs: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    /// Background refresh period in `serve` mode; 0 disables it.
    #[serde(default)]
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: default_min_delay(),
            max_delay_secs: default_max_delay(),
            interval_secs: 0,
        }
    }
}

const DEFAULT_PUBLIC_URL: &str = "http://localhost";
const DELETION_PATH: &str = "/ebay/account-deletion";

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_max_connections() -> usize {
    1000
}

fn default_cache_prefix() -> String {
    "ebay".into()
}

fn default_ttl_buffer() -> u64 {
    300
}

fn default_redirect() -> String {
    "/dashboard".into()
}

fn default_min_delay() -> u64 {
    1
}

fn default_max_delay() -> u64 {
    5
}

fn optional_secret<'de, D>(deserializer: D) -> Result<Option<Secret<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.trim().is_empty())
        .map(Secret::new))
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Encryption key resolution order:
    /// 1. EBAY_ENCRYPTION_KEY env var
    /// 2. `storage.encryption_key_file`
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> common::Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        config.apply_env()?;
        config.load_encryption_key()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> common::Result<()> {
        if let Some(value) = env_value("EBAY_ENVIRONMENT") {
            self.environment = value.parse::<Environment>().map_err(|reason| common::Error::InvalidValue {
                key: "EBAY_ENVIRONMENT".into(),
                reason,
            })?;
        }

        let active = self.environment;
        for environment in [Environment::Sandbox, Environment::Production] {
            // EBAY_<ENV>_CLIENT_ID wins; bare EBAY_CLIENT_ID only feeds the active environment.
            let lookup = |name: &str| {
                let specific = format!("EBAY_{}_{name}", environment.as_str().to_uppercase());
                env_value(&specific).or_else(|| {
                    (environment == active)
                        .then(|| env_value(&format!("EBAY_{name}")))
                        .flatten()
                })
            };

            let client_id = lookup("CLIENT_ID");
            let client_secret = lookup("CLIENT_SECRET");
            let redirect_uri = lookup("REDIRECT_URI");

            let credentials = self.credentials.get_mut(environment);
            if client_id.is_some() {
                credentials.client_id = client_id;
            }
            if let Some(secret) = client_secret {
                credentials.client_secret = Some(Secret::new(secret));
            }
            if redirect_uri.is_some() {
                credentials.redirect_uri = redirect_uri;
            }
        }

        if let Some(token) = env_value("EBAY_DELETION_VERIFICATION_TOKEN") {
            self.deletion_notification.verification_token = Some(Secret::new(token));
        }
        if let Some(url) = env_value("APP_URL") {
            self.server.public_url = Some(url);
        }
        if let Some(url) = env_value("EBAY_DELETION_ENDPOINT_URL") {
            self.deletion_notification.endpoint_url = Some(url);
        }
        if self.deletion_notification.endpoint_url.is_none() {
            let base = self.server.public_url.as_deref().unwrap_or(DEFAULT_PUBLIC_URL);
            self.deletion_notification.endpoint_url = Some(format!(
                "{}{DELETION_PATH}",
                base.trim_end_matches('/')
            ));
        }
        Ok(())
    }

    fn load_encryption_key(&mut self) -> common::Result<()> {
        if let Some(key) = env_value("EBAY_ENCRYPTION_KEY") {
            self.storage.encryption_key = Some(Secret::new(key));
        } else if let Some(ref key_file) = self.storage.encryption_key_file {
            let key = std::fs::read_to_string(key_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read encryption_key_file {}: {e}",
                    key_file.display()
                ))
            })?;
            let key = key.trim().to_owned();
            if !key.is_empty() {
                self.storage.encryption_key = Some(Secret::new(key));
            }
        }
        Ok(())
    }

    fn validate(&self) -> common::Result<()> {
        for environment in [Environment::Sandbox, Environment::Production] {
            let urls = self.urls.get(environment);
            let overrides = [
                ("authorize", &urls.authorize),
                ("token", &urls.token),
                ("api", &urls.api),
                ("identity", &urls.identity),
            ];
            for (name, value) in overrides {
                if let Some(url) = value {
                    check_http_url(&format!("urls.{environment}.{name}"), url)?;
                }
            }
        }

        if let Some(ref url) = self.server.public_url {
            check_http_url("server.public_url", url)?;
        }
        if let Some(ref url) = self.deletion_notification.endpoint_url {
            check_http_url("deletion_notification.endpoint_url", url)?;
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "server.max_connections must be greater than 0".into(),
            ));
        }

        if self.refresh.min_delay_secs > self.refresh.max_delay_secs {
            return Err(common::Error::Config(format!(
                "refresh.min_delay_secs ({}) must not exceed refresh.max_delay_secs ({})",
                self.refresh.min_delay_secs, self.refresh.max_delay_secs
            )));
        }
        Ok(())
    }

    /// Built-in endpoints for the active environment with overrides applied.
    pub fn endpoints(&self) -> Endpoints {
        let mut endpoints = Endpoints::for_environment(self.environment);
        let overrides = self.urls.get(self.environment);
        if let Some(ref url) = overrides.authorize {
            endpoints.authorize = url.clone();
        }
        if let Some(ref url) = overrides.token {
            endpoints.token = url.clone();
        }
        if let Some(ref url) = overrides.api {
            endpoints.api = url.clone();
        }
        if let Some(ref url) = overrides.identity {
            endpoints.identity = url.clone();
        }
        endpoints
    }

    pub fn oauth_config(&self) -> OAuthConfig {
        let credentials = self.credentials.get(self.environment).clone();
        let endpoints = self.endpoints();
        OAuthConfig {
            environment: self.environment,
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            redirect_uri: credentials.redirect_uri,
            scopes: self
                .scopes
                .get(self.environment)
                .clone()
                .unwrap_or_else(default_scopes),
            authorize_url: endpoints.authorize,
            token_url: endpoints.token,
        }
    }

    pub fn token_manager_config(&self) -> TokenManagerConfig {
        TokenManagerConfig {
            cache_prefix: self.cache.prefix.clone(),
            ttl_buffer: Duration::from_secs(self.cache.ttl_buffer_secs),
        }
    }

    pub fn refresh_delay(&self) -> RefreshDelay {
        RefreshDelay::new(
            Duration::from_secs(self.refresh.min_delay_secs),
            Duration::from_secs(self.refresh.max_delay_secs),
        )
    }

    pub fn encryption_key(&self) -> common::Result<&Secret<String>> {
        self.storage.encryption_key.as_ref().ok_or_else(|| {
            common::Error::Config(
                "no encryption key: set EBAY_ENCRYPTION_KEY or storage.encryption_key_file".into(),
            )
        })
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("ebay-connector.toml")
    }
}

fn check_http_url(key: &str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(());
    }
    Err(common::Error::InvalidValue {
        key: key.to_string(),
        reason: format!("must start with http:// or https://, got: {url}"),
    })
}
