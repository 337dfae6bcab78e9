use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::session::ValueSerializer;

/// Default name of the session cookie issued by the gateway
pub const DEFAULT_COOKIE_NAME: &str = "oidc-auth-session";

/// Longest session lifetime accepted, ten years
pub const MAX_SESSION_AGE_SECONDS: i64 = 10 * 365 * 86400;

/// Environment variable pointing at an alternative settings file
pub const SETTINGS_PATH_ENV: &str = "OIDC_GATEWAY_SETTINGS";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewaySettings {
    pub application: ApplicationSettings,
    pub oidc: OidcSettings,
    pub session: SessionSettings,
    pub storage: StorageSettings,
    pub health: HealthSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    /// Comma separated list of origins allowed by CORS
    pub allowed_origins: String,
    /// Path prefixes that bypass authentication entirely
    pub whitelist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcSettings {
    pub issuer_url: String,
    /// External URL of the callback endpoint registered with the provider
    pub redirect_url: String,
    pub scopes: Vec<String>,
    pub username_claim: String,
    pub groups_claim: String,
    pub offline_access: bool,
    pub request_timeout_secs: u64,

    // Direct values (can be overridden by environment variables)
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    // Environment variable names for overrides
    pub client_id_env: Option<String>,
    pub client_secret_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub cookie_name: String,
    pub max_age_seconds: i64,
    pub serializer: ValueSerializer,
    /// Cookie key pairs, newest first. Older pairs only verify.
    pub key_pairs: Vec<KeyPairSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KeyPairSettings {
    pub hash_key: Option<String>,
    pub block_key: Option<String>,
    pub hash_key_env: Option<String>,
    pub block_key_env: Option<String>,
}

/// Storage backend selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageSettings {
    #[default]
    Memory,
    File {
        path: PathBuf,
        #[serde(default = "default_bucket")]
        bucket: String,
        /// Seconds between expiry sweeps; 0 disables sweeping
        #[serde(default)]
        sweep_frequency_secs: u64,
    },
    Redis {
        address: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        password_env: Option<String>,
        #[serde(default)]
        db: i64,
        #[serde(default)]
        key_prefix: String,
        #[serde(default = "default_redis_timeout")]
        timeout_secs: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

fn default_bucket() -> String {
    "sessions".to_string()
}

fn default_redis_timeout() -> u64 {
    5
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: String::new(),
            whitelist: Vec::new(),
        }
    }
}

impl Default for OidcSettings {
    fn default() -> Self {
        Self {
            issuer_url: String::new(),
            redirect_url: String::new(),
            scopes: vec!["email".to_string(), "profile".to_string()],
            username_claim: "email".to_string(),
            groups_claim: "groups".to_string(),
            offline_access: false,
            request_timeout_secs: 10,
            client_id: None,
            client_secret: None,
            client_id_env: None,
            client_secret_env: None,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            max_age_seconds: 86400 * 30,
            serializer: ValueSerializer::default(),
            key_pairs: Vec::new(),
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Configuration problems detected while loading or validating settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: String,
        source: basic_toml::Error,
    },
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl GatewaySettings {
    /// Load settings from the settings file and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read or parsed
    /// - A required setting is missing after environment overrides
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_base_settings()?.into_validated()
    }

    /// Apply environment overrides and validate the result
    ///
    /// Split from [`GatewaySettings::load`] so that the logger can be
    /// configured from the file before overrides emit warnings.
    ///
    /// # Errors
    ///
    /// Returns an error if a required setting is missing or invalid
    pub fn into_validated(mut self) -> Result<Self, SettingsError> {
        Self::apply_env_overrides(&mut self);
        self.validate()?;
        Ok(self)
    }

    /// Load base settings from TOML or use defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file exists but cannot be read or parsed
    pub fn load_base_settings() -> Result<Self, SettingsError> {
        let path = std::env::var(SETTINGS_PATH_ENV)
            .map_or_else(|_| PathBuf::from("Settings.toml"), PathBuf::from);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| SettingsError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parse settings from a TOML document
    ///
    /// # Errors
    ///
    /// Returns an error if TOML parsing fails
    pub fn from_toml(content: &str) -> Result<Self, basic_toml::Error> {
        basic_toml::from_str(content)
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_oidc_env_overrides(&mut settings.oidc);
        Self::apply_session_env_overrides(&mut settings.session);
        Self::apply_storage_env_overrides(&mut settings.storage);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(host) = std::env::var("HOST") {
            app_settings.host = host;
        }
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                app_settings.port = port;
            }
        }
        if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
            app_settings.allowed_origins = origins;
        }
    }

    fn apply_oidc_env_overrides(oidc_settings: &mut OidcSettings) {
        if let Ok(issuer) = std::env::var("OIDC_ISSUER_URL") {
            oidc_settings.issuer_url = issuer;
        }
        if let Ok(redirect) = std::env::var("OIDC_REDIRECT_URL") {
            oidc_settings.redirect_url = redirect;
        }
        if let Ok(client_id) = std::env::var("OIDC_CLIENT_ID") {
            oidc_settings.client_id = Some(client_id);
        }
        if let Ok(client_secret) = std::env::var("OIDC_CLIENT_SECRET") {
            oidc_settings.client_secret = Some(client_secret);
        }
    }

    /// Apply environment overrides for session settings
    ///
    /// A key pair from `SESSION_HASH_KEY`/`SESSION_BLOCK_KEY` becomes the
    /// newest pair. When no hash key is configured at all, a random one is
    /// generated so that the gateway can still start.
    pub fn apply_session_env_overrides(session_settings: &mut SessionSettings) {
        if let Ok(max_age) = std::env::var("SESSION_MAX_AGE") {
            if let Ok(value) = max_age.parse::<i64>() {
                session_settings.max_age_seconds = value;
            }
        }

        if let Some(hash_key) = non_empty_env("SESSION_HASH_KEY") {
            session_settings.key_pairs.insert(
                0,
                KeyPairSettings {
                    hash_key: Some(hash_key),
                    block_key: non_empty_env("SESSION_BLOCK_KEY"),
                    ..KeyPairSettings::default()
                },
            );
        }

        if !session_settings
            .key_pairs
            .iter()
            .any(|pair| pair.get_hash_key().is_some())
        {
            let secret = Self::generate_random_hash_key();
            log::warn!(
                "No session hash key configured; using a generated key. \
                 Session cookies will not survive a restart. Set SESSION_HASH_KEY \
                 or configure [[session.key_pairs]] in Settings.toml"
            );
            session_settings.key_pairs.insert(
                0,
                KeyPairSettings {
                    hash_key: Some(secret),
                    ..KeyPairSettings::default()
                },
            );
        }
    }

    fn apply_storage_env_overrides(storage_settings: &mut StorageSettings) {
        if let StorageSettings::Redis { password, .. } = storage_settings {
            if let Some(value) = non_empty_env("REDIS_PASSWORD") {
                *password = Some(value);
            }
        }
    }

    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging_settings.level = log_level;
        }
    }

    /// Generate a 32 byte random hash key, base64 encoded
    fn generate_random_hash_key() -> String {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        general_purpose::STANDARD.encode(secret)
    }

    /// Check that every setting needed at startup is present and well formed
    ///
    /// # Errors
    ///
    /// Returns the first missing or invalid setting found
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.oidc.issuer_url.is_empty() {
            return Err(SettingsError::Missing("oidc.issuer_url"));
        }
        if self.oidc.get_client_id().is_none() {
            return Err(SettingsError::Missing("oidc.client_id"));
        }
        if self.oidc.redirect_url.is_empty() {
            return Err(SettingsError::Missing("oidc.redirect_url"));
        }
        url::Url::parse(&self.oidc.redirect_url).map_err(|e| SettingsError::Invalid {
            name: "oidc.redirect_url",
            reason: e.to_string(),
        })?;
        if self.oidc.username_claim.is_empty() {
            return Err(SettingsError::Missing("oidc.username_claim"));
        }
        if self.session.max_age_seconds > MAX_SESSION_AGE_SECONDS {
            return Err(SettingsError::Invalid {
                name: "session.max_age_seconds",
                reason: format!("must not exceed {MAX_SESSION_AGE_SECONDS}"),
            });
        }
        if let StorageSettings::File { path, bucket, .. } = &self.storage {
            if path.as_os_str().is_empty() {
                return Err(SettingsError::Missing("storage.path"));
            }
            if bucket.is_empty() {
                return Err(SettingsError::Missing("storage.bucket"));
            }
        }
        if let StorageSettings::Redis { address, .. } = &self.storage {
            if address.is_empty() {
                return Err(SettingsError::Missing("storage.address"));
            }
        }
        Ok(())
    }

    /// Get the bind address for the server
    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// Get CORS origins as a vector of strings
    #[must_use]
    pub fn get_allowed_origins(&self) -> Vec<String> {
        self.application
            .allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    /// Session cookies are only marked `Secure` behind an HTTPS redirect URL
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.oidc.redirect_url.starts_with("https://")
    }

    /// Path component of the redirect URL, used to mount the callback handler
    #[must_use]
    pub fn callback_path(&self) -> String {
        url::Url::parse(&self.oidc.redirect_url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/callback".to_string())
    }
}

impl OidcSettings {
    /// Get the client ID, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_id(&self) -> Option<String> {
        env_or(self.client_id_env.as_deref(), self.client_id.as_ref())
    }

    /// Get the client secret, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_secret(&self) -> Option<String> {
        env_or(self.client_secret_env.as_deref(), self.client_secret.as_ref())
    }

    /// Requested scopes with `openid` first, plus `offline_access` when enabled
    #[must_use]
    pub fn effective_scopes(&self) -> Vec<String> {
        let mut scopes = vec!["openid".to_string()];
        for scope in &self.scopes {
            if !scopes.contains(scope) {
                scopes.push(scope.clone());
            }
        }
        if self.offline_access && !scopes.iter().any(|s| s == "offline_access") {
            scopes.push("offline_access".to_string());
        }
        scopes
    }
}

impl KeyPairSettings {
    #[must_use]
    pub fn get_hash_key(&self) -> Option<String> {
        env_or(self.hash_key_env.as_deref(), self.hash_key.as_ref()).filter(|k| !k.is_empty())
    }

    #[must_use]
    pub fn get_block_key(&self) -> Option<String> {
        env_or(self.block_key_env.as_deref(), self.block_key.as_ref()).filter(|k| !k.is_empty())
    }
}

impl StorageSettings {
    /// Redis password, checking the environment variable first
    #[must_use]
    pub fn redis_password(&self) -> Option<String> {
        match self {
            Self::Redis {
                password,
                password_env,
                ..
            } => env_or(password_env.as_deref(), password.as_ref()).filter(|p| !p.is_empty()),
            _ => None,
        }
    }

    /// Short backend name for log output
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File { .. } => "file",
            Self::Redis { .. } => "redis",
        }
    }
}

fn env_or(env_var: Option<&str>, fallback: Option<&String>) -> Option<String> {
    if let Some(env_var) = env_var {
        if let Ok(value) = std::env::var(env_var) {
            return Some(value);
        }
    }
    fallback.cloned()
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
