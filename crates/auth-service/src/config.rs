//! Auth service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default deployment environment. Development tokens are disabled here.
pub const DEFAULT_APP_ENV: &str = "production";

/// Default TTL for cached active introspection results.
pub const DEFAULT_INTROSPECTION_CACHE_TTL_SECONDS: u64 = 300;

/// Default TTL for cached inactive introspection results.
pub const DEFAULT_NEGATIVE_CACHE_TTL_SECONDS: u64 = 60;

/// Default IdP circuit breaker cooldown.
pub const DEFAULT_CIRCUIT_BREAKER_COOLDOWN_SECONDS: u64 = 30;

/// Default timeout for each outbound IdP request.
pub const DEFAULT_IDP_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Default prefix identifying locally-issued API tokens.
pub const DEFAULT_API_TOKEN_PREFIX: &str = "gk_";

/// Default interval between expired cache row purges.
pub const DEFAULT_CACHE_PURGE_INTERVAL_SECONDS: u64 = 600;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Auth service configuration.
///
/// Database URL and the standalone API key are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Deployment environment (`APP_ENV`). Anything other than "production"
    /// enables development tokens.
    pub app_env: String,

    /// IdP issuer base URL. Remote introspection and userinfo are only
    /// available when this is set.
    pub issuer_url: Option<String>,

    /// Path to the service-account key JSON used to sign client assertions.
    pub service_account_key_path: Option<String>,

    pub introspection_enabled: bool,

    pub userinfo_fallback_enabled: bool,

    /// Upper bound on how long an active introspection result is cached.
    pub introspection_cache_ttl_seconds: u64,

    /// How long an inactive introspection result is cached.
    pub negative_cache_ttl_seconds: u64,

    /// How long remote introspection is skipped after an IdP failure.
    pub circuit_breaker_cooldown_seconds: u64,

    pub idp_http_timeout_seconds: u64,

    /// Prefix that marks a bearer credential as a local API token.
    pub api_token_prefix: String,

    /// Accept the configured service API key as a credential.
    pub standalone_mode: bool,

    /// Shared key for standalone mode. Always set when `standalone_mode` is.
    pub standalone_api_key: Option<SecretString>,

    /// Interval for purging expired cache rows. Zero disables the purge task.
    pub cache_purge_interval_seconds: u64,

    pub log_format: LogFormat,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("app_env", &self.app_env)
            .field("issuer_url", &self.issuer_url)
            .field("service_account_key_path", &self.service_account_key_path)
            .field("introspection_enabled", &self.introspection_enabled)
            .field("userinfo_fallback_enabled", &self.userinfo_fallback_enabled)
            .field(
                "introspection_cache_ttl_seconds",
                &self.introspection_cache_ttl_seconds,
            )
            .field("negative_cache_ttl_seconds", &self.negative_cache_ttl_seconds)
            .field(
                "circuit_breaker_cooldown_seconds",
                &self.circuit_breaker_cooldown_seconds,
            )
            .field("idp_http_timeout_seconds", &self.idp_http_timeout_seconds)
            .field("api_token_prefix", &self.api_token_prefix)
            .field("standalone_mode", &self.standalone_mode)
            .field(
                "standalone_api_key",
                &self.standalone_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "cache_purge_interval_seconds",
                &self.cache_purge_interval_seconds,
            )
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid boolean configuration: {0}")]
    InvalidBool(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),

    #[error("Invalid issuer URL: {0}")]
    InvalidIssuerUrl(String),

    #[error("Invalid API token prefix: {0}")]
    InvalidApiTokenPrefix(String),

    #[error("Invalid log format: {0}")]
    InvalidLogFormat(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
            .clone();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let app_env = vars
            .get("APP_ENV")
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_APP_ENV.to_string());

        let issuer_url = match non_empty(vars, "AUTH_ISSUER_URL") {
            Some(url) => {
                if !url.starts_with("https://") && !url.starts_with("http://") {
                    return Err(ConfigError::InvalidIssuerUrl(format!(
                        "AUTH_ISSUER_URL must start with http:// or https://, got '{}'",
                        url
                    )));
                }
                Some(url.trim_end_matches('/').to_string())
            }
            None => None,
        };

        let service_account_key_path = non_empty(vars, "AUTH_SERVICE_ACCOUNT_KEY_PATH");

        let introspection_enabled = parse_bool(vars, "AUTH_INTROSPECTION_ENABLED", true)?;
        let userinfo_fallback_enabled = parse_bool(vars, "AUTH_USERINFO_FALLBACK_ENABLED", true)?;

        let introspection_cache_ttl_seconds = parse_seconds(
            vars,
            "INTROSPECTION_CACHE_TTL_SECONDS",
            DEFAULT_INTROSPECTION_CACHE_TTL_SECONDS,
            false,
        )?;
        let negative_cache_ttl_seconds = parse_seconds(
            vars,
            "INTROSPECTION_NEGATIVE_CACHE_TTL_SECONDS",
            DEFAULT_NEGATIVE_CACHE_TTL_SECONDS,
            false,
        )?;
        let circuit_breaker_cooldown_seconds = parse_seconds(
            vars,
            "IDP_CIRCUIT_BREAKER_COOLDOWN_SECONDS",
            DEFAULT_CIRCUIT_BREAKER_COOLDOWN_SECONDS,
            true,
        )?;
        let idp_http_timeout_seconds = parse_seconds(
            vars,
            "IDP_HTTP_TIMEOUT_SECONDS",
            DEFAULT_IDP_HTTP_TIMEOUT_SECONDS,
            false,
        )?;
        let cache_purge_interval_seconds = parse_seconds(
            vars,
            "CACHE_PURGE_INTERVAL_SECONDS",
            DEFAULT_CACHE_PURGE_INTERVAL_SECONDS,
            true,
        )?;

        let api_token_prefix = vars
            .get("API_TOKEN_PREFIX")
            .cloned()
            .unwrap_or_else(|| DEFAULT_API_TOKEN_PREFIX.to_string());
        if api_token_prefix.is_empty() || api_token_prefix.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidApiTokenPrefix(format!(
                "API_TOKEN_PREFIX must be non-empty without whitespace, got '{}'",
                api_token_prefix
            )));
        }

        let standalone_mode = parse_bool(vars, "STANDALONE_MODE", false)?;
        let standalone_api_key = if standalone_mode {
            let key = non_empty(vars, "STANDALONE_API_KEY")
                .ok_or_else(|| ConfigError::MissingEnvVar("STANDALONE_API_KEY".to_string()))?;
            Some(SecretString::from(key))
        } else {
            None
        };

        let log_format = match vars.get("LOG_FORMAT").map(|v| v.trim().to_lowercase()) {
            None => LogFormat::Pretty,
            Some(v) if v.is_empty() || v == "pretty" || v == "text" => LogFormat::Pretty,
            Some(v) if v == "json" => LogFormat::Json,
            Some(v) => {
                return Err(ConfigError::InvalidLogFormat(format!(
                    "LOG_FORMAT must be 'json' or 'pretty', got '{}'",
                    v
                )))
            }
        };

        Ok(Config {
            database_url,
            bind_address,
            app_env,
            issuer_url,
            service_account_key_path,
            introspection_enabled,
            userinfo_fallback_enabled,
            introspection_cache_ttl_seconds,
            negative_cache_ttl_seconds,
            circuit_breaker_cooldown_seconds,
            idp_http_timeout_seconds,
            api_token_prefix,
            standalone_mode,
            standalone_api_key,
            cache_purge_interval_seconds,
            log_format,
        })
    }

    /// Development tokens are accepted everywhere except production.
    pub fn dev_tokens_enabled(&self) -> bool {
        self.app_env != "production"
    }

    pub fn introspection_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.introspection_cache_ttl_seconds)
    }

    pub fn negative_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_cache_ttl_seconds)
    }

    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_cooldown_seconds)
    }

    pub fn idp_http_timeout(&self) -> Duration {
        Duration::from_secs(self.idp_http_timeout_seconds)
    }
}

fn non_empty(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(
    vars: &HashMap<String, String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    match value_str.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        "" => Ok(default),
        _ => Err(ConfigError::InvalidBool(format!(
            "{} must be true or false, got '{}'",
            name, value_str
        ))),
    }
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
    allow_zero: bool,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.trim().parse().map_err(|e| {
        ConfigError::InvalidDuration(format!(
            "{} must be a valid non-negative integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 && !allow_zero {
        return Err(ConfigError::InvalidDuration(format!(
            "{} must be greater than 0",
            name
        )));
    }

    Ok(value)
}
