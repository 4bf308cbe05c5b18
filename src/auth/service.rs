//! Authorization flow — PKCE begin/complete and session minting

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::pkce::{build_authorization_url, generate_pkce_pair, generate_session_id, generate_state};
use super::TokenEndpoint;
use crate::cache::{KvCache, PkceTransaction, RefreshTokenRecord, SessionRecord};
use crate::config::Config;
use crate::graph::GraphClient;
use crate::{Error, Result};

/// Scope every session needs so the AS issues a refresh token.
const OFFLINE_ACCESS: &str = "offline_access";

/// Result of `auth_begin_pkce`.
#[derive(Debug, Serialize)]
pub struct AuthBeginResponse {
    /// Authorize URL the end user must visit
    pub authorization_url: String,
    /// CSRF state bound to the stored PKCE transaction
    pub state: String,
    /// Always `"S256"`
    pub code_challenge_method: &'static str,
}

/// Result of `auth_complete_pkce`.
#[derive(Debug, Serialize)]
pub struct AuthCompleteResponse {
    /// Opaque session handle substituted for the raw tokens
    pub graph_session_id: String,
    /// Scopes the AS actually granted
    pub granted_scopes: Vec<String>,
    /// Access-token lifetime in seconds
    pub expires_in: u64,
}

/// Drives the split PKCE authorization-code flow.
pub struct AuthService {
    cache: Arc<KvCache>,
    graph: Arc<GraphClient>,
    tokens: Arc<TokenEndpoint>,
    authority_base_url: String,
    tenant_id: String,
    client_id: String,
    default_redirect_uri: String,
}

impl AuthService {
    /// Assemble the service from its collaborators and the config record.
    #[must_use]
    pub fn new(
        config: &Config,
        cache: Arc<KvCache>,
        graph: Arc<GraphClient>,
        tokens: Arc<TokenEndpoint>,
    ) -> Self {
        Self {
            cache,
            graph,
            tokens,
            authority_base_url: config.authority_base_url.clone(),
            tenant_id: config.graph_tenant_id.clone(),
            client_id: config.graph_client_id.clone(),
            default_redirect_uri: config.graph_redirect_uri.clone(),
        }
    }

    /// Start an authorization: persist a PKCE transaction and hand back the
    /// authorize URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] when the cache write fails and
    /// [`Error::Config`] for an unusable authority URL.
    pub async fn begin_pkce(
        &self,
        scopes: Vec<String>,
        redirect_uri: Option<String>,
        login_hint: Option<String>,
    ) -> Result<AuthBeginResponse> {
        let scopes = normalize_scopes(scopes);
        let state = generate_state();
        let (verifier, challenge) = generate_pkce_pair();
        let effective_redirect_uri =
            redirect_uri.unwrap_or_else(|| self.default_redirect_uri.clone());

        self.cache
            .put_pkce(
                &state,
                &PkceTransaction {
                    verifier,
                    scopes: scopes.clone(),
                    redirect_uri: effective_redirect_uri.clone(),
                },
            )
            .await?;

        let authorization_url = build_authorization_url(
            &self.authority_base_url,
            &self.tenant_id,
            &self.client_id,
            &scopes,
            &state,
            &challenge,
            &effective_redirect_uri,
            login_hint.as_deref(),
        )?;

        debug!(scopes = scopes.len(), "Started PKCE authorization");
        Ok(AuthBeginResponse {
            authorization_url,
            state,
            code_challenge_method: "S256",
        })
    }

    /// Finish an authorization: redeem the code, resolve the user, mint the
    /// session, and cache its token material.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthRequired`] for an unknown/expired `state` and
    /// [`Error::Upstream`] for exchange or user-resolution failures.
    pub async fn complete_pkce(
        &self,
        code: &str,
        state: &str,
        redirect_uri: Option<String>,
    ) -> Result<AuthCompleteResponse> {
        let txn = self
            .cache
            .pop_pkce(state)
            .await?
            .ok_or_else(|| Error::auth_required("Invalid or expired state"))?;

        // Stored redirect wins; then the caller's argument; then the default.
        // A mismatch with what the AS saw fails at the token endpoint.
        let effective_redirect_uri = if txn.redirect_uri.is_empty() {
            redirect_uri.unwrap_or_else(|| self.default_redirect_uri.clone())
        } else {
            txn.redirect_uri.clone()
        };

        let token_response = self
            .tokens
            .exchange_code(code, &txn.verifier, &effective_redirect_uri, &txn.scopes)
            .await?;
        let refresh_token = token_response
            .refresh_token
            .clone()
            .ok_or_else(|| Error::upstream("Token response missing refresh token"))?;

        // The token was just obtained over TLS from the AS; its audience is
        // the resource API, so we read `tid` without signature verification.
        let tenant_id =
            unverified_claim(&token_response.access_token, "tid").unwrap_or_else(|| "unknown".to_string());

        let me = self.graph.get("/me").send_json(&token_response.access_token).await?;
        let user_id = me
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::upstream("Unable to resolve user"))?
            .to_string();

        let granted_scopes = token_response.granted_scopes(&txn.scopes);
        let session_id = generate_session_id();
        let expires_at = self.cache.now() + token_response.expires_in;

        self.cache
            .put_refresh_token(
                &session_id,
                &RefreshTokenRecord {
                    refresh_token,
                    scopes: granted_scopes.clone(),
                    expires_at,
                },
            )
            .await?;
        self.cache
            .put_session(
                &session_id,
                &SessionRecord {
                    session_id: session_id.clone(),
                    tenant_id: tenant_id.clone(),
                    user_id: user_id.clone(),
                    client_id: self.client_id.clone(),
                    scopes: granted_scopes.clone(),
                    expires_at,
                },
            )
            .await?;
        self.cache
            .put_access_token(
                &session_id,
                &token_response.access_token,
                token_response.expires_in,
            )
            .await?;

        info!(tenant = %tenant_id, "Minted delegated session");
        Ok(AuthCompleteResponse {
            graph_session_id: session_id,
            granted_scopes,
            expires_in: token_response.expires_in,
        })
    }
}

/// Strip, dedupe preserving first occurrence, and force `offline_access`.
fn normalize_scopes(scopes: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(scopes.len() + 1);
    for scope in scopes {
        let trimmed = scope.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !normalized.iter().any(|s| s == trimmed) {
            normalized.push(trimmed.to_string());
        }
    }
    if !normalized.iter().any(|s| s == OFFLINE_ACCESS) {
        normalized.push(OFFLINE_ACCESS.to_string());
    }
    normalized
}

/// Read a string claim from a JWT payload without verifying the signature.
fn unverified_claim(token: &str, claim: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    claims.get(claim)?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Scope normalisation ───────────────────────────────────────────────────

    #[test]
    fn normalize_appends_offline_access() {
        assert_eq!(
            normalize_scopes(vec!["Mail.Read".to_string()]),
            vec!["Mail.Read".to_string(), "offline_access".to_string()]
        );
    }

    #[test]
    fn normalize_keeps_existing_offline_access_in_place() {
        assert_eq!(
            normalize_scopes(vec![
                "offline_access".to_string(),
                "Mail.Read".to_string()
            ]),
            vec!["offline_access".to_string(), "Mail.Read".to_string()]
        );
    }

    #[test]
    fn normalize_strips_and_dedupes_preserving_order() {
        assert_eq!(
            normalize_scopes(vec![
                " Mail.Read ".to_string(),
                "Calendars.Read".to_string(),
                "Mail.Read".to_string(),
                "  ".to_string(),
            ]),
            vec![
                "Mail.Read".to_string(),
                "Calendars.Read".to_string(),
                "offline_access".to_string()
            ]
        );
    }

    #[test]
    fn normalize_of_empty_input_is_just_offline_access() {
        assert_eq!(normalize_scopes(vec![]), vec!["offline_access".to_string()]);
    }

    // ── Unverified claim extraction ───────────────────────────────────────────

    fn jwt_with_payload(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
        format!("{header}.{body}.c2lnbmF0dXJl")
    }

    #[test]
    fn unverified_claim_reads_tid() {
        let token = jwt_with_payload(&serde_json::json!({"tid": "tenant-1", "sub": "u"}));
        assert_eq!(unverified_claim(&token, "tid"), Some("tenant-1".to_string()));
    }

    #[test]
    fn unverified_claim_missing_or_malformed_is_none() {
        let token = jwt_with_payload(&serde_json::json!({"sub": "u"}));
        assert_eq!(unverified_claim(&token, "tid"), None);
        assert_eq!(unverified_claim("opaque-token", "tid"), None);
        assert_eq!(unverified_claim("a.!!!.c", "tid"), None);
    }
}
