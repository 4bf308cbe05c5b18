//! Configuration management
//!
//! A single immutable record assembled from the process environment at
//! startup. Required fields fail fast in [`Config::validate`]; components
//! receive the record (or slices of it) through their constructors.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use figment::{Figment, providers::Env};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Floor applied to the access-token skew window (seconds).
pub const MIN_SKEW_SECONDS: u64 = 60;
/// Ceiling applied to the access-token skew window (seconds).
pub const MAX_SKEW_SECONDS: u64 = 300;

/// Cache back-end selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// In-process store, unencrypted; intended for tests and development
    Memory,
    /// Remote Redis-compatible store, encrypted at rest
    Remote,
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host to bind the gateway listener to
    pub listen_host: String,
    /// Port to bind the gateway listener to
    pub listen_port: u16,

    /// OAuth client id registered with the Microsoft identity platform
    pub graph_client_id: String,
    /// Client secret for confidential clients; sent on token/refresh when set
    pub graph_client_secret: Option<String>,
    /// Tenant segment of the authority URL
    pub graph_tenant_id: String,
    /// Default redirect URI for the authorization-code flow
    pub graph_redirect_uri: String,

    /// Cache back-end to use
    pub cache_mode: CacheMode,
    /// Redis endpoint (`host:port`), required when `cache_mode=remote`
    pub cache_endpoint: Option<String>,
    /// Base64-encoded 32-byte AES key, required when `cache_mode=remote`
    pub cache_encryption_key: Option<String>,

    /// Expected `iss` claim of inbound caller tokens
    pub oidc_issuer: Option<String>,
    /// Expected `aud` claim of inbound caller tokens
    pub oidc_audience: Option<String>,
    /// JWKS endpoint used to verify inbound caller tokens
    pub oidc_jwks_url: Option<String>,
    /// Skip inbound OIDC validation entirely (development only)
    pub disable_oidc_validation: bool,

    /// TTL for cached session records (seconds)
    pub token_cache_ttl_seconds: u64,
    /// TTL for idempotency entries (seconds)
    pub idempotency_ttl_seconds: u64,
    /// Access tokens are dropped from cache this many seconds before expiry
    pub access_token_skew_seconds: u64,
    /// Upper bound on decoded base64 payloads (bytes)
    pub max_base64_bytes: usize,

    /// Resource API base URL
    pub upstream_base_url: String,
    /// Authorization server base URL (authority)
    pub authority_base_url: String,
    /// Per-request deadline for outbound HTTP (seconds)
    pub http_timeout_seconds: f64,
    /// Total attempts per upstream request before surfacing 502
    pub max_retry_attempts: u32,
    /// Base for exponential backoff between retries (seconds)
    pub retry_base_seconds: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 8080,
            graph_client_id: String::new(),
            graph_client_secret: None,
            graph_tenant_id: "organizations".to_string(),
            graph_redirect_uri: String::new(),
            cache_mode: CacheMode::Remote,
            cache_endpoint: None,
            cache_encryption_key: None,
            oidc_issuer: None,
            oidc_audience: None,
            oidc_jwks_url: None,
            disable_oidc_validation: false,
            token_cache_ttl_seconds: 900,
            idempotency_ttl_seconds: 1800,
            access_token_skew_seconds: 300,
            max_base64_bytes: 100 * 1024 * 1024,
            upstream_base_url: "https://graph.microsoft.com/v1.0".to_string(),
            authority_base_url: "https://login.microsoftonline.com".to_string(),
            http_timeout_seconds: 10.0,
            max_retry_attempts: 4,
            retry_base_seconds: 0.5,
        }
    }
}

impl Config {
    /// Assemble configuration from the process environment.
    ///
    /// Variable names match field names uppercased (`GRAPH_CLIENT_ID`,
    /// `CACHE_MODE`, ...). The record is validated before being returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when extraction or validation fails.
    pub fn from_env() -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Env::raw())
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate required fields and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.graph_client_id.is_empty() {
            return Err(Error::Config("GRAPH_CLIENT_ID is required".to_string()));
        }
        if self.graph_redirect_uri.is_empty() {
            return Err(Error::Config("GRAPH_REDIRECT_URI is required".to_string()));
        }

        if self.cache_mode == CacheMode::Remote {
            if self.cache_endpoint.as_deref().unwrap_or("").is_empty() {
                return Err(Error::Config(
                    "CACHE_ENDPOINT is required when CACHE_MODE=remote".to_string(),
                ));
            }
            let key = self.cache_encryption_key.as_deref().unwrap_or("");
            if key.is_empty() {
                return Err(Error::Config(
                    "CACHE_ENCRYPTION_KEY is required when CACHE_MODE=remote".to_string(),
                ));
            }
            let raw = STANDARD
                .decode(key)
                .map_err(|_| Error::Config("CACHE_ENCRYPTION_KEY is not valid base64".to_string()))?;
            if raw.len() != 32 {
                return Err(Error::Config(format!(
                    "CACHE_ENCRYPTION_KEY must decode to 32 bytes, got {}",
                    raw.len()
                )));
            }
        }

        if !self.disable_oidc_validation {
            for (name, value) in [
                ("OIDC_ISSUER", &self.oidc_issuer),
                ("OIDC_AUDIENCE", &self.oidc_audience),
                ("OIDC_JWKS_URL", &self.oidc_jwks_url),
            ] {
                if value.as_deref().unwrap_or("").is_empty() {
                    return Err(Error::Config(format!(
                        "{name} is required unless DISABLE_OIDC_VALIDATION=true"
                    )));
                }
            }
        }

        if self.max_retry_attempts == 0 {
            return Err(Error::Config(
                "MAX_RETRY_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Skew window clamped to the supported range.
    #[must_use]
    pub fn effective_skew_seconds(&self) -> u64 {
        self.access_token_skew_seconds
            .clamp(MIN_SKEW_SECONDS, MAX_SKEW_SECONDS)
    }

    /// Decoded cache encryption key, when configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the key is not valid base64 (callers
    /// should have run [`Config::validate`] first).
    pub fn decoded_encryption_key(&self) -> Result<Option<Vec<u8>>> {
        match self.cache_encryption_key.as_deref() {
            None | Some("") => Ok(None),
            Some(key) => STANDARD
                .decode(key)
                .map(Some)
                .map_err(|_| Error::Config("CACHE_ENCRYPTION_KEY is not valid base64".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_memory_config() -> Config {
        Config {
            graph_client_id: "client-1".to_string(),
            graph_redirect_uri: "http://localhost/cb".to_string(),
            cache_mode: CacheMode::Memory,
            disable_oidc_validation: true,
            ..Config::default()
        }
    }

    #[test]
    fn minimal_memory_config_validates() {
        minimal_memory_config().validate().unwrap();
    }

    #[test]
    fn missing_client_id_is_rejected() {
        let config = Config {
            graph_client_id: String::new(),
            ..minimal_memory_config()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("GRAPH_CLIENT_ID"));
    }

    #[test]
    fn remote_mode_requires_endpoint_and_key() {
        let config = Config {
            cache_mode: CacheMode::Remote,
            ..minimal_memory_config()
        };
        assert!(config.validate().is_err());

        let config = Config {
            cache_mode: CacheMode::Remote,
            cache_endpoint: Some("localhost:6379".to_string()),
            ..minimal_memory_config()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("CACHE_ENCRYPTION_KEY"));
    }

    #[test]
    fn encryption_key_must_be_32_bytes() {
        use base64::Engine as _;
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 16]);
        let config = Config {
            cache_mode: CacheMode::Remote,
            cache_endpoint: Some("localhost:6379".to_string()),
            cache_encryption_key: Some(short),
            ..minimal_memory_config()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("32 bytes"));

        let full = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        let config = Config {
            cache_mode: CacheMode::Remote,
            cache_endpoint: Some("localhost:6379".to_string()),
            cache_encryption_key: Some(full),
            ..minimal_memory_config()
        };
        config.validate().unwrap();
    }

    #[test]
    fn oidc_fields_required_when_validation_enabled() {
        let config = Config {
            disable_oidc_validation: false,
            ..minimal_memory_config()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("OIDC_ISSUER"));
    }

    #[test]
    fn skew_is_clamped_to_supported_range() {
        let mut config = minimal_memory_config();
        config.access_token_skew_seconds = 5;
        assert_eq!(config.effective_skew_seconds(), MIN_SKEW_SECONDS);
        config.access_token_skew_seconds = 10_000;
        assert_eq!(config.effective_skew_seconds(), MAX_SKEW_SECONDS);
        config.access_token_skew_seconds = 120;
        assert_eq!(config.effective_skew_seconds(), 120);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.graph_tenant_id, "organizations");
        assert_eq!(config.token_cache_ttl_seconds, 900);
        assert_eq!(config.idempotency_ttl_seconds, 1800);
        assert_eq!(config.max_base64_bytes, 100 * 1024 * 1024);
        assert_eq!(config.max_retry_attempts, 4);
        assert!((config.retry_base_seconds - 0.5).abs() < f64::EPSILON);
        assert!(matches!(config.cache_mode, CacheMode::Remote));
    }
}
