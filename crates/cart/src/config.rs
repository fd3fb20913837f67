//! Cart sync configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `CART_API_BASE_URL` - Base URL of the remote cart API (required by the HTTP gateway)
//! - `CART_GUEST_DIR` - Directory for the file-backed guest store (default: .hearthwood)
//! - `CART_GUEST_TTL_DAYS` - Lifetime of guest records in days (default: 30)
//! - `CART_MIGRATION_POLICY` - `all_or_nothing` or `retain_rejected` (default: `all_or_nothing`)
//! - `CART_SERIALIZE_ROW_MUTATIONS` - Queue overlapping mutations per row (default: false)
//! - `CART_CUSTOMER_TOKEN` - Bearer credential for a signed-in customer
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::path::PathBuf;

use chrono::TimeDelta;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use crate::guest::DEFAULT_TTL_DAYS;
use crate::migration::MigrationPolicy;

const DEFAULT_GUEST_DIR: &str = ".hearthwood";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "xxx",
    "todo",
    "insert",
    "put-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart sync configuration.
#[derive(Clone)]
pub struct CartSyncConfig {
    /// Base URL of the remote cart API
    pub api_base_url: Option<Url>,
    /// Directory holding guest store files
    pub guest_dir: PathBuf,
    /// Lifetime of a guest record from its last write
    pub guest_ttl: TimeDelta,
    /// Treatment of rows rejected during login migration
    pub migration_policy: MigrationPolicy,
    /// Queue overlapping authenticated mutations on the same row
    pub serialize_row_mutations: bool,
    /// Bearer credential for a signed-in customer
    pub customer_token: Option<SecretString>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

impl Default for CartSyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            guest_dir: PathBuf::from(DEFAULT_GUEST_DIR),
            guest_ttl: TimeDelta::days(DEFAULT_TTL_DAYS),
            migration_policy: MigrationPolicy::default(),
            serialize_row_mutations: false,
            customer_token: None,
            sentry_dsn: None,
        }
    }
}

impl std::fmt::Debug for CartSyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartSyncConfig")
            .field("api_base_url", &self.api_base_url.as_ref().map(Url::as_str))
            .field("guest_dir", &self.guest_dir)
            .field("guest_ttl_days", &self.guest_ttl.num_days())
            .field("migration_policy", &self.migration_policy)
            .field("serialize_row_mutations", &self.serialize_row_mutations)
            .field(
                "customer_token",
                &self.customer_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("sentry_dsn", &self.sentry_dsn.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl CartSyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let api_base_url = env
            .optional("CART_API_BASE_URL")
            .map(|raw| parse_base_url("CART_API_BASE_URL", &raw))
            .transpose()?;

        let guest_dir = PathBuf::from(env.or_default("CART_GUEST_DIR", DEFAULT_GUEST_DIR));

        let ttl_days = env
            .or_default("CART_GUEST_TTL_DAYS", &DEFAULT_TTL_DAYS.to_string())
            .parse::<i64>()
            .map_err(|e| ConfigError::InvalidEnvVar("CART_GUEST_TTL_DAYS".to_string(), e.to_string()))?;
        if ttl_days <= 0 {
            return Err(ConfigError::InvalidEnvVar(
                "CART_GUEST_TTL_DAYS".to_string(),
                "must be a positive number of days".to_string(),
            ));
        }
        let guest_ttl = TimeDelta::try_days(ttl_days).ok_or_else(|| {
            ConfigError::InvalidEnvVar("CART_GUEST_TTL_DAYS".to_string(), "out of range".to_string())
        })?;

        let migration_policy = env
            .or_default("CART_MIGRATION_POLICY", "all_or_nothing")
            .parse::<MigrationPolicy>()
            .map_err(|e| ConfigError::InvalidEnvVar("CART_MIGRATION_POLICY".to_string(), e.to_string()))?;

        let serialize_row_mutations = parse_bool(
            "CART_SERIALIZE_ROW_MUTATIONS",
            &env.or_default("CART_SERIALIZE_ROW_MUTATIONS", "false"),
        )?;

        let customer_token = env
            .optional("CART_CUSTOMER_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .map(|token| validate_token("CART_CUSTOMER_TOKEN", SecretString::from(token)))
            .transpose()?;

        Ok(Self {
            api_base_url,
            guest_dir,
            guest_ttl,
            migration_policy,
            serialize_row_mutations,
            customer_token,
            sentry_dsn: env.optional("SENTRY_DSN"),
        })
    }

    /// The API base URL, for callers that need the HTTP gateway.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `CART_API_BASE_URL` is unset.
    pub fn require_api_base_url(&self) -> Result<&Url, ConfigError> {
        self.api_base_url
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("CART_API_BASE_URL".to_string()))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Get an optional variable.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    /// Get a variable with a default value.
    fn or_default(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }
}

fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be an http(s) URL".to_string(),
        ));
    }
    Ok(url)
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("expected a boolean, got {other:?}"),
        )),
    }
}

/// Reject tokens copied verbatim from an env template.
fn validate_token(key: &str, token: SecretString) -> Result<SecretString, ConfigError> {
    let lower = token.expose_secret().to_lowercase();
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InvalidEnvVar(
                key.to_string(),
                format!("contains placeholder pattern '{pattern}'"),
            ));
        }
    }
    Ok(token)
}
