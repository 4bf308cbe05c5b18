//! Delegated OAuth against the Microsoft identity platform
//!
//! [`pkce`] generates verifier/challenge material and the authorize URL,
//! [`AuthService`] drives the split begin/complete authorization-code flow,
//! and [`TokenService`] keeps sessions supplied with live access tokens.

pub mod pkce;
mod service;
mod token;

pub use service::{AuthBeginResponse, AuthCompleteResponse, AuthService};
pub use token::TokenService;

use std::time::Duration;

use serde::Deserialize;

use crate::config::Config;
use crate::{Error, Result};

/// Token endpoint response for both grant types.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Delegated access token for the resource API
    pub access_token: String,
    /// Rotated refresh token; absent when the AS did not rotate
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access-token lifetime in seconds
    pub expires_in: u64,
    /// Space-joined scopes actually granted
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Granted scopes split on whitespace; falls back to `stored` when the
    /// AS omitted the `scope` field.
    #[must_use]
    pub fn granted_scopes(&self, stored: &[String]) -> Vec<String> {
        let split: Vec<String> = self
            .scope
            .as_deref()
            .unwrap_or("")
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if split.is_empty() {
            stored.to_vec()
        } else {
            split
        }
    }
}

/// Client for the authorization server's `/oauth2/v2.0/token` endpoint.
///
/// Exchange and refresh failures are terminal and never retried: a bad code
/// or refresh token does not get better with time.
#[derive(Clone)]
pub struct TokenEndpoint {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl TokenEndpoint {
    /// Build from the process configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the HTTP client cannot be constructed.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(config.http_timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            config.authority_base_url.trim_end_matches('/'),
            config.graph_tenant_id
        );
        Ok(Self {
            http,
            token_url,
            client_id: config.graph_client_id.clone(),
            client_secret: config.graph_client_secret.clone(),
        })
    }

    /// Redeem an authorization code with its PKCE verifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] (502) on any non-2xx from the AS.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> Result<TokenResponse> {
        let scope = scopes.join(" ");
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("scope", scope.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
            ("code_verifier", code_verifier),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|_| Error::upstream("Token exchange failed"))?;
        if !response.status().is_success() {
            return Err(Error::upstream("Token exchange failed"));
        }
        response
            .json()
            .await
            .map_err(|_| Error::upstream("Token exchange failed"))
    }

    /// Mint a fresh access token from a refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthRequired`] on any non-2xx from the AS; a
    /// rejected refresh token is terminal for the session.
    pub async fn refresh(&self, refresh_token: &str, scopes: &[String]) -> Result<TokenResponse> {
        let scope = scopes.join(" ");
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|_| Error::auth_required("Refresh token failed"))?;
        if !response.status().is_success() {
            return Err(Error::auth_required("Refresh token failed"));
        }
        response
            .json()
            .await
            .map_err(|_| Error::auth_required("Refresh token failed"))
    }
}
