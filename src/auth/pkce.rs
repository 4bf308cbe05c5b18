//! PKCE material and authorization URL construction (RFC 7636, S256)

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::RngExt;
use sha2::{Digest, Sha256};
use url::Url;

use crate::{Error, Result};

/// Query-parameter charset: RFC 3986 unreserved characters stay literal,
/// everything else (spaces included) is percent-encoded.
const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn escape(value: &str) -> String {
    utf8_percent_encode(value, QUERY_ENCODE).to_string()
}

/// Generate a PKCE code verifier and its S256 challenge.
///
/// The verifier is 32 random bytes, base64url-encoded;
/// `challenge = base64url(SHA-256(verifier))`.
#[must_use]
pub fn generate_pkce_pair() -> (String, String) {
    let verifier_bytes: [u8; 32] = rand::rng().random();
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    (verifier, challenge)
}

/// Generate a CSRF `state` parameter (128 bits, URL-safe).
#[must_use]
pub fn generate_state() -> String {
    let state_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

/// Generate an opaque session handle (192 bits, URL-safe).
#[must_use]
pub fn generate_session_id() -> String {
    let id_bytes: [u8; 24] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(id_bytes)
}

/// Assemble the provider's `/oauth2/v2.0/authorize` URL.
///
/// Every parameter is query-escaped; scopes are space-joined.
///
/// # Errors
///
/// Returns [`Error::Config`] when `authority`/`tenant` do not form a valid URL.
#[allow(clippy::too_many_arguments)]
pub fn build_authorization_url(
    authority: &str,
    tenant: &str,
    client_id: &str,
    scopes: &[String],
    state: &str,
    code_challenge: &str,
    redirect_uri: &str,
    login_hint: Option<&str>,
) -> Result<String> {
    let base = format!(
        "{}/{tenant}/oauth2/v2.0/authorize",
        authority.trim_end_matches('/')
    );
    Url::parse(&base).map_err(|e| Error::Config(format!("invalid authority URL: {e}")))?;

    let mut url = format!(
        "{base}?client_id={}&response_type=code&redirect_uri={}&response_mode=query\
         &scope={}&state={}&code_challenge={}&code_challenge_method=S256",
        escape(client_id),
        escape(redirect_uri),
        escape(&scopes.join(" ")),
        escape(state),
        escape(code_challenge),
    );
    if let Some(hint) = login_hint {
        url.push_str("&login_hint=");
        url.push_str(&escape(hint));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── PKCE generation ───────────────────────────────────────────────────────

    #[test]
    fn challenge_is_sha256_of_verifier() {
        let (verifier, challenge) = generate_pkce_pair();
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let expected = URL_SAFE_NO_PAD.encode(hasher.finalize());
        assert_eq!(challenge, expected);
    }

    #[test]
    fn verifier_differs_from_challenge() {
        let (verifier, challenge) = generate_pkce_pair();
        assert_ne!(verifier, challenge);
    }

    #[test]
    fn pkce_values_are_base64url_safe() {
        for _ in 0..10 {
            let (verifier, challenge) = generate_pkce_pair();
            for value in [&verifier, &challenge] {
                assert!(!value.contains('+'));
                assert!(!value.contains('/'));
                assert!(!value.contains('='));
            }
            // 32 random bytes -> 43 base64url chars
            assert_eq!(verifier.len(), 43);
        }
    }

    #[test]
    fn pkce_pairs_are_unique() {
        let (v1, _) = generate_pkce_pair();
        let (v2, _) = generate_pkce_pair();
        assert_ne!(v1, v2);
    }

    // ── State / session id generation ─────────────────────────────────────────

    #[test]
    fn state_has_at_least_128_bits() {
        // 16 random bytes -> 22 base64url chars
        let state = generate_state();
        assert!(state.len() >= 22, "state too short: {}", state.len());
        assert!(!state.contains('+') && !state.contains('/') && !state.contains('='));
    }

    #[test]
    fn session_id_has_at_least_192_bits() {
        // 24 random bytes -> 32 base64url chars
        let sid = generate_session_id();
        assert!(sid.len() >= 32, "session id too short: {}", sid.len());
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(generate_state(), generate_state());
        assert_ne!(generate_session_id(), generate_session_id());
    }

    // ── Authorization URL ─────────────────────────────────────────────────────

    #[test]
    fn authorize_url_carries_all_parameters() {
        let url = build_authorization_url(
            "https://login.microsoftonline.com",
            "organizations",
            "client-1",
            &["Mail.Read".to_string(), "offline_access".to_string()],
            "state-xyz",
            "challenge-abc",
            "http://cb",
            None,
        )
        .unwrap();

        assert!(url.starts_with("https://login.microsoftonline.com/organizations/oauth2/v2.0/authorize?"));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("response_mode=query"));
        assert!(url.contains("scope=Mail.Read%20offline_access"));
        assert!(url.contains("state=state-xyz"));
        assert!(url.contains("code_challenge=challenge-abc"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(!url.contains("login_hint"));
    }

    #[test]
    fn authorize_url_escapes_redirect_uri() {
        let url = build_authorization_url(
            "https://login.microsoftonline.com",
            "organizations",
            "client-1",
            &[],
            "s",
            "c",
            "http://localhost:8080/callback?next=/home",
            None,
        )
        .unwrap();
        assert!(!url.contains("callback?next"));
        assert!(url.contains("callback%3Fnext%3D%2Fhome"));
    }

    #[test]
    fn authorize_url_appends_login_hint_when_present() {
        let url = build_authorization_url(
            "https://login.microsoftonline.com",
            "contoso",
            "client-1",
            &[],
            "s",
            "c",
            "http://cb",
            Some("alice@contoso.com"),
        )
        .unwrap();
        assert!(url.contains("/contoso/oauth2/v2.0/authorize?"));
        assert!(url.contains("login_hint=alice%40contoso.com"));
    }
}
