//! Cart synchronizer configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `VARKETPLACE_API_BASE` - Backend API base URL (default: `http://localhost:8000/api`)
//! - `VARKETPLACE_CART_KEY` - Local store key for the cart envelope (default: `varketplace_cart_v1`)
//! - `VARKETPLACE_CART_TTL_DAYS` - Lifetime of the local envelope in days (default: 7)
//! - `VARKETPLACE_REQUEST_TIMEOUT_SECS` - Per-request timeout for backend calls (default: none)
//! - `VARKETPLACE_STORE_DIR` - Directory for the file-backed local store (default: `.varketplace`)
//! - `VARKETPLACE_USER_ID` - Signed-in user ID; requires `VARKETPLACE_AUTH_TOKEN`
//! - `VARKETPLACE_AUTH_TOKEN` - Bearer token for the backend; requires `VARKETPLACE_USER_ID`
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;
use varketplace_core::UserId;

use crate::auth::AuthSession;

const DEFAULT_API_BASE: &str = "http://localhost:8000/api";
const DEFAULT_CART_KEY: &str = "varketplace_cart_v1";
const DEFAULT_TTL_DAYS: i64 = 7;
const DEFAULT_STORE_DIR: &str = ".varketplace";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart synchronizer configuration.
#[derive(Debug, Clone)]
pub struct CartConfig {
    /// Backend API settings
    pub api: ApiConfig,
    /// Local envelope settings
    pub storage: StorageConfig,
    /// Session to start with, if one was provided
    pub session: Option<AuthSession>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

/// Backend API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL; endpoint paths are appended to it
    pub base_url: Url,
    /// Per-request timeout, if any
    pub request_timeout: Option<Duration>,
}

/// Local key-value store configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Key holding the cart envelope
    pub cart_key: String,
    /// Envelope lifetime from last write
    pub ttl: chrono::Duration,
    /// Directory used by the file-backed store
    pub store_dir: PathBuf,
}

impl ApiConfig {
    /// API settings for `base_url` with no request timeout.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if `base_url` is not an absolute
    /// http(s) URL.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let base_url = parse_base_url(base_url)
            .map_err(|e| ConfigError::InvalidEnvVar("VARKETPLACE_API_BASE".to_string(), e))?;
        Ok(Self {
            base_url,
            request_timeout: None,
        })
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cart_key: DEFAULT_CART_KEY.to_string(),
            ttl: chrono::Duration::days(DEFAULT_TTL_DAYS),
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
        }
    }
}

impl CartConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid, or if only
    /// one half of the session pair is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`CartConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api = ApiConfig::from_lookup(&lookup)?;
        let storage = StorageConfig::from_lookup(&lookup)?;
        let session = session_from_lookup(&lookup)?;
        let sentry_dsn = lookup("SENTRY_DSN").filter(|s| !s.is_empty());

        Ok(Self {
            api,
            storage,
            session,
            sentry_dsn,
        })
    }
}

impl ApiConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = get_or_default(lookup, "VARKETPLACE_API_BASE", DEFAULT_API_BASE);
        let base_url = parse_base_url(&raw)
            .map_err(|e| ConfigError::InvalidEnvVar("VARKETPLACE_API_BASE".to_string(), e))?;

        let request_timeout = lookup("VARKETPLACE_REQUEST_TIMEOUT_SECS")
            .map(|v| {
                v.parse::<u64>().map_err(|e| {
                    ConfigError::InvalidEnvVar(
                        "VARKETPLACE_REQUEST_TIMEOUT_SECS".to_string(),
                        e.to_string(),
                    )
                })
            })
            .transpose()?
            .map(Duration::from_secs);

        Ok(Self {
            base_url,
            request_timeout,
        })
    }
}

impl StorageConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cart_key = get_or_default(lookup, "VARKETPLACE_CART_KEY", DEFAULT_CART_KEY);
        if cart_key.trim().is_empty() {
            return Err(ConfigError::InvalidEnvVar(
                "VARKETPLACE_CART_KEY".to_string(),
                "must not be empty".to_string(),
            ));
        }

        let ttl_days = get_or_default(lookup, "VARKETPLACE_CART_TTL_DAYS", "7")
            .parse::<i64>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("VARKETPLACE_CART_TTL_DAYS".to_string(), e.to_string())
            })?;
        if ttl_days < 1 {
            return Err(ConfigError::InvalidEnvVar(
                "VARKETPLACE_CART_TTL_DAYS".to_string(),
                format!("must be at least 1 (got {ttl_days})"),
            ));
        }

        let store_dir = PathBuf::from(get_or_default(
            lookup,
            "VARKETPLACE_STORE_DIR",
            DEFAULT_STORE_DIR,
        ));

        Ok(Self {
            cart_key,
            ttl: chrono::Duration::days(ttl_days),
            store_dir,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a variable with a default value.
fn get_or_default<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| default.to_string())
}

/// Parse the API base, making sure relative joins keep its path.
///
/// `Url::join` replaces the last path segment unless the base ends in `/`,
/// so `http://host/api` is stored as `http://host/api/`.
fn parse_base_url(raw: &str) -> Result<Url, String> {
    let mut url = Url::parse(raw.trim()).map_err(|e| e.to_string())?;
    if url.cannot_be_a_base() {
        return Err("must be an absolute http(s) URL".to_string());
    }
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme: {}", url.scheme()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Session from `VARKETPLACE_USER_ID` + `VARKETPLACE_AUTH_TOKEN`.
fn session_from_lookup<F>(lookup: &F) -> Result<Option<AuthSession>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let user_id = lookup("VARKETPLACE_USER_ID").filter(|s| !s.is_empty());
    let token = lookup("VARKETPLACE_AUTH_TOKEN").filter(|s| !s.is_empty());

    match (user_id, token) {
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::MissingEnvVar(
            "VARKETPLACE_AUTH_TOKEN".to_string(),
        )),
        (None, Some(_)) => Err(ConfigError::MissingEnvVar(
            "VARKETPLACE_USER_ID".to_string(),
        )),
        (Some(user_id), Some(token)) => {
            let user_id = user_id.parse::<UserId>().map_err(|e| {
                ConfigError::InvalidEnvVar("VARKETPLACE_USER_ID".to_string(), e.to_string())
            })?;
            Ok(Some(AuthSession::new(user_id, SecretString::from(token))))
        }
    }
}
