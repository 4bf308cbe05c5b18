//! Access-token supply for live sessions
//!
//! The happy path is a cache hit; on miss the stored refresh token mints a
//! fresh access token and both records are rewritten. Refreshes are
//! best-effort concurrent: two workers may race the same session and both
//! succeed. Last writer wins, and the AS resolves single-use refresh tokens.

use std::sync::Arc;

use tracing::debug;

use super::TokenEndpoint;
use crate::cache::{KvCache, RefreshTokenRecord, SessionRecord};
use crate::{Error, Result};

/// Returns a live delegated access token for a session.
pub struct TokenService {
    cache: Arc<KvCache>,
    tokens: Arc<TokenEndpoint>,
}

impl TokenService {
    /// Assemble the service from its collaborators.
    #[must_use]
    pub fn new(cache: Arc<KvCache>, tokens: Arc<TokenEndpoint>) -> Self {
        Self { cache, tokens }
    }

    /// Return a cached access token, refreshing on miss.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthRequired`] when no refresh token exists for the
    /// session or the AS rejects the refresh.
    pub async fn get_access_token(&self, session: &SessionRecord) -> Result<String> {
        if let Some(token) = self.cache.get_access_token(&session.session_id).await? {
            return Ok(token);
        }

        let stored = self
            .cache
            .get_refresh_token(&session.session_id)
            .await?
            .filter(|r| !r.refresh_token.is_empty())
            .ok_or_else(|| Error::auth_required("No refresh token"))?;

        let response = self.tokens.refresh(&stored.refresh_token, &stored.scopes).await?;

        // Rotate: keep the previous refresh token when the AS did not rotate
        let refresh_token = response
            .refresh_token
            .clone()
            .unwrap_or_else(|| stored.refresh_token.clone());
        let scopes = response.granted_scopes(&stored.scopes);
        let expires_at = self.cache.now() + response.expires_in;

        self.cache
            .put_refresh_token(
                &session.session_id,
                &RefreshTokenRecord {
                    refresh_token,
                    scopes,
                    expires_at,
                },
            )
            .await?;
        self.cache
            .put_access_token(
                &session.session_id,
                &response.access_token,
                response.expires_in,
            )
            .await?;

        debug!("Refreshed delegated access token");
        Ok(response.access_token)
    }
}
