//! Inbound caller token verification — RS256 JWT validation against a JWKS.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid`.
//! 2. Fetch the configured JWKS (cached for 1 hour; refreshed once on an
//!    unknown `kid` before failing).
//! 3. Verify the signature and standard claims (`exp`, `nbf`, `aud`, `iss`).
//! 4. Return the decoded claim set.
//!
//! Every failure maps to `AUTH_REQUIRED`; callers never learn which check
//! rejected the token.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

/// How long a fetched JWKS stays fresh.
const JWKS_TTL: Duration = Duration::from_secs(3600);

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

impl CachedJwks {
    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() >= JWKS_TTL
    }
}

/// JWKS cache — one entry per issuer, populated lazily on first validation.
pub struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: reqwest::Client,
}

impl JwksCache {
    fn new(timeout: Duration) -> Self {
        Self {
            inner: DashMap::new(),
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Return the cached JWKS for `issuer`, fetching from `jwks_url` when
    /// stale or when `force_refresh` is set.
    async fn get_or_fetch(
        &self,
        issuer: &str,
        jwks_url: &str,
        force_refresh: bool,
    ) -> Result<JwkSet> {
        if !force_refresh {
            if let Some(cached) = self.inner.get(issuer) {
                if !cached.is_stale() {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!(issuer = %issuer, "Fetching JWKS");
        let response = self
            .http
            .get(jwks_url)
            .send()
            .await
            .map_err(|_| Error::auth_required("Unable to load JWKS"))?;
        if !response.status().is_success() {
            return Err(Error::auth_required("Unable to load JWKS"));
        }
        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|_| Error::auth_required("Unable to load JWKS"))?;

        self.inner.insert(
            issuer.to_string(),
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(jwks)
    }
}

/// Validates inbound caller bearer tokens.
pub struct OidcValidator {
    issuer: String,
    audience: String,
    jwks_url: String,
    jwks: JwksCache,
}

impl OidcValidator {
    /// Create a validator for one issuer/audience pair.
    #[must_use]
    pub fn new(issuer: String, audience: String, jwks_url: String, timeout: Duration) -> Self {
        Self {
            issuer,
            audience,
            jwks_url,
            jwks: JwksCache::new(timeout),
        }
    }

    /// Validate `token` and return its claim set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthRequired`] for any malformed, unsigned, expired,
    /// or mis-addressed token, and when the signing key cannot be resolved.
    pub async fn validate(&self, token: &str) -> Result<Value> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|_| Error::auth_required("Invalid token header"))?;
        let kid = header
            .kid
            .ok_or_else(|| Error::auth_required("Invalid token header"))?;

        let decoding_key = self.find_decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.validate_nbf = true;

        let data = jsonwebtoken::decode::<Value>(token, &decoding_key, &validation)
            .map_err(|_| Error::auth_required("Invalid token"))?;
        Ok(data.claims)
    }

    /// Find a decoding key by `kid`, refreshing the JWKS once if not found.
    async fn find_decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        let jwks = self
            .jwks
            .get_or_fetch(&self.issuer, &self.jwks_url, false)
            .await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        debug!(kid = %kid, "Key not in cached JWKS, refreshing");
        let jwks = self
            .jwks
            .get_or_fetch(&self.issuer, &self.jwks_url, true)
            .await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| Error::auth_required("Unknown signing key"))
    }
}

/// Find an RSA JWK by `kid` and convert it to a [`DecodingKey`].
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        if jwk.common.key_id.as_deref() != Some(kid) {
            continue;
        }
        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            _ => None,
        };
    }
    None
}
