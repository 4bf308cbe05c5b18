//! Session resolution for tool calls
//!
//! Every session-bound tool call passes through [`SessionResolver::resolve`]:
//! the caller's bearer is validated (unless OIDC validation is disabled) and
//! the opaque session handle is looked up in the cache. All failures collapse
//! to `AUTH_REQUIRED` so callers cannot probe which step rejected them.

use std::sync::Arc;

use tracing::debug;

use crate::cache::{KvCache, SessionRecord};
use crate::oidc::OidcValidator;
use crate::{Error, Result};

/// Validates callers and resolves session handles to session records.
pub struct SessionResolver {
    cache: Arc<KvCache>,
    /// `None` when inbound OIDC validation is disabled (development only)
    oidc: Option<Arc<OidcValidator>>,
}

impl SessionResolver {
    /// Assemble the resolver from its collaborators.
    #[must_use]
    pub fn new(cache: Arc<KvCache>, oidc: Option<Arc<OidcValidator>>) -> Self {
        Self { cache, oidc }
    }

    /// Resolve `session_id` into its session record, authenticating the
    /// caller first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthRequired`] for an empty session id, a missing or
    /// invalid bearer (when validation is enabled), or an unknown session.
    pub async fn resolve(&self, session_id: &str, bearer: &str) -> Result<SessionRecord> {
        if session_id.is_empty() {
            return Err(Error::auth_required("Missing session"));
        }

        if let Some(oidc) = &self.oidc {
            if bearer.is_empty() {
                return Err(Error::auth_required("Missing client token"));
            }
            oidc.validate(bearer).await?;
        }

        let session = self
            .cache
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::auth_required("Invalid session"))?;
        Ok(session)
    }

    /// Remove a session's record and refresh-token material.
    ///
    /// The cached access token is left to expire on its own TTL.
    pub async fn logout(&self, session_id: &str) -> Result<()> {
        self.cache.delete_session(session_id).await?;
        self.cache.delete_refresh_token(session_id).await?;
        debug!("Session revoked");
        Ok(())
    }
}
