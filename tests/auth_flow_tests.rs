//! End-to-end PKCE flow tests
//!
//! Drives `begin_pkce` / `complete_pkce` against stub authorization-server
//! and resource-API endpoints, asserting the authorize URL shape, the cache
//! records minted on completion, and the one-shot semantics of the stored
//! PKCE transaction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{Json, Router, routing::get, routing::post};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use graph_gateway::auth::{AuthService, TokenEndpoint};
use graph_gateway::cache::{KvCache, KvStore, MemoryStore};
use graph_gateway::config::{CacheMode, Config};
use graph_gateway::graph::GraphClient;

const NOW: u64 = 1_000_000;

async fn spawn(app: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Access token carrying a `tid` claim, unsigned (only decoded, never verified).
fn access_token_with_tid(tid: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&json!({"tid": tid, "aud": "https://graph.microsoft.com"})).unwrap(),
    );
    format!("{header}.{payload}.c2ln")
}

type FormLog = Arc<Mutex<Vec<HashMap<String, String>>>>;

/// Stub AS: records token-endpoint form posts and answers with a fixed grant.
async fn spawn_authorization_server(token_body: Value) -> (std::net::SocketAddr, FormLog) {
    let forms: FormLog = Arc::new(Mutex::new(Vec::new()));
    let forms_for_handler = Arc::clone(&forms);
    let app = Router::new().route(
        "/organizations/oauth2/v2.0/token",
        post(move |body: String| {
            let forms = Arc::clone(&forms_for_handler);
            let token_body = token_body.clone();
            async move {
                let form: HashMap<String, String> = serde_urlencoded::from_str(&body).unwrap();
                forms.lock().unwrap().push(form);
                Json(token_body)
            }
        }),
    );
    (spawn(app).await, forms)
}

async fn spawn_resource_api(me_body: Value) -> std::net::SocketAddr {
    let app = Router::new().route("/me", get(move || {
        let me_body = me_body.clone();
        async move { Json(me_body) }
    }));
    spawn(app).await
}

fn test_config(authority: &str, upstream: &str) -> Config {
    Config {
        graph_client_id: "client-1".to_string(),
        graph_redirect_uri: "http://default-cb".to_string(),
        cache_mode: CacheMode::Memory,
        disable_oidc_validation: true,
        authority_base_url: authority.to_string(),
        upstream_base_url: upstream.to_string(),
        access_token_skew_seconds: 60,
        ..Config::default()
    }
}

fn build_service(config: &Config) -> (Arc<MemoryStore>, Arc<KvCache>, AuthService) {
    let store = Arc::new(MemoryStore::with_clock(NOW));
    let cache = Arc::new(KvCache::new(
        Arc::clone(&store) as Arc<dyn KvStore>,
        None,
        config.effective_skew_seconds(),
    ));
    let graph = Arc::new(GraphClient::new(config).unwrap());
    let tokens = Arc::new(TokenEndpoint::new(config).unwrap());
    let service = AuthService::new(config, Arc::clone(&cache), graph, tokens);
    (store, cache, service)
}

// ── begin_pkce ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn begin_pkce_builds_authorize_url_and_stores_transaction() {
    let config = test_config("https://login.microsoftonline.com", "https://graph.example");
    let (store, _, service) = build_service(&config);

    let response = service
        .begin_pkce(vec!["Mail.Read".to_string()], Some("http://cb".to_string()), None)
        .await
        .unwrap();

    assert!(
        response
            .authorization_url
            .starts_with("https://login.microsoftonline.com/organizations/oauth2/v2.0/authorize?")
    );
    assert!(response.authorization_url.contains("code_challenge_method=S256"));
    assert!(
        response
            .authorization_url
            .contains("scope=Mail.Read%20offline_access")
    );
    assert!(response.authorization_url.contains(&format!("state={}", response.state)));
    assert_eq!(response.code_challenge_method, "S256");
    assert!(response.state.len() >= 22);

    // The PKCE transaction is cached under the state with a bounded TTL
    let ttl = store.ttl_of(&format!("pkce:{}", response.state)).unwrap();
    assert!(ttl <= 600, "PKCE TTL {ttl} exceeds 10 minutes");
}

#[tokio::test]
async fn begin_pkce_falls_back_to_configured_redirect() {
    let config = test_config("https://login.microsoftonline.com", "https://graph.example");
    let (_, cache, service) = build_service(&config);

    let response = service
        .begin_pkce(vec!["Mail.Read".to_string()], None, None)
        .await
        .unwrap();
    assert!(response.authorization_url.contains("default-cb"));

    let txn = cache.pop_pkce(&response.state).await.unwrap().unwrap();
    assert_eq!(txn.redirect_uri, "http://default-cb");
    assert_eq!(
        txn.scopes,
        vec!["Mail.Read".to_string(), "offline_access".to_string()]
    );
}

// ── complete_pkce ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn complete_pkce_mints_session_and_caches_token_material() {
    let as_addr = spawn_authorization_server(json!({
        "access_token": access_token_with_tid("tenant-1"),
        "refresh_token": "rt",
        "expires_in": 3600,
        "scope": "Mail.Read offline_access",
    }))
    .await;
    let graph_addr = spawn_resource_api(json!({"id": "user-123"})).await;

    let config = test_config(
        &format!("http://{}", as_addr.0),
        &format!("http://{graph_addr}"),
    );
    let (store, cache, service) = build_service(&config);

    let begin = service
        .begin_pkce(vec!["Mail.Read".to_string()], Some("http://cb".to_string()), None)
        .await
        .unwrap();
    let response = service
        .complete_pkce("code-abc", &begin.state, Some("http://cb".to_string()))
        .await
        .unwrap();

    assert_eq!(
        response.granted_scopes,
        vec!["Mail.Read".to_string(), "offline_access".to_string()]
    );
    assert_eq!(response.expires_in, 3600);
    assert!(response.graph_session_id.len() >= 32);

    // Session record
    let session = cache
        .get_session(&response.graph_session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.user_id, "user-123");
    assert_eq!(session.tenant_id, "tenant-1");
    assert_eq!(session.client_id, "client-1");
    assert_eq!(session.expires_at, NOW + 3600);

    // Refresh-token record
    let refresh = cache
        .get_refresh_token(&response.graph_session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refresh.refresh_token, "rt");

    // Access-token entry with TTL = expires_in − skew
    let access_ttl = store
        .ttl_of(&format!("access:{}", response.graph_session_id))
        .unwrap();
    assert_eq!(access_ttl, 3600 - 60);

    // The token endpoint saw the verifier and the stored redirect
    let forms = as_addr.1.lock().unwrap();
    assert_eq!(forms.len(), 1);
    assert_eq!(forms[0]["grant_type"], "authorization_code");
    assert_eq!(forms[0]["code"], "code-abc");
    assert_eq!(forms[0]["redirect_uri"], "http://cb");
    assert!(!forms[0]["code_verifier"].is_empty());
    assert!(forms[0]["scope"].contains("offline_access"));
}

#[tokio::test]
async fn complete_pkce_with_unknown_state_is_auth_required() {
    let config = test_config("https://login.microsoftonline.com", "https://graph.example");
    let (_, _, service) = build_service(&config);

    let err = service
        .complete_pkce("code", "never-stored", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "AUTH_REQUIRED");
    assert_eq!(err.status(), 401);
}

#[tokio::test]
async fn complete_pkce_consumes_the_state() {
    let as_addr = spawn_authorization_server(json!({
        "access_token": access_token_with_tid("tenant-1"),
        "refresh_token": "rt",
        "expires_in": 3600,
        "scope": "Mail.Read",
    }))
    .await;
    let graph_addr = spawn_resource_api(json!({"id": "user-123"})).await;

    let config = test_config(
        &format!("http://{}", as_addr.0),
        &format!("http://{graph_addr}"),
    );
    let (_, _, service) = build_service(&config);

    let begin = service
        .begin_pkce(vec!["Mail.Read".to_string()], None, None)
        .await
        .unwrap();
    service
        .complete_pkce("code", &begin.state, None)
        .await
        .unwrap();

    // Replaying the same state observes a consumed transaction
    let err = service
        .complete_pkce("code", &begin.state, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "AUTH_REQUIRED");
}

#[tokio::test]
async fn complete_pkce_fails_upstream_when_user_cannot_be_resolved() {
    let as_addr = spawn_authorization_server(json!({
        "access_token": access_token_with_tid("tenant-1"),
        "refresh_token": "rt",
        "expires_in": 3600,
        "scope": "Mail.Read",
    }))
    .await;
    // /me responds without an id
    let graph_addr = spawn_resource_api(json!({"displayName": "nobody"})).await;

    let config = test_config(
        &format!("http://{}", as_addr.0),
        &format!("http://{graph_addr}"),
    );
    let (_, _, service) = build_service(&config);

    let begin = service.begin_pkce(vec![], None, None).await.unwrap();
    let err = service
        .complete_pkce("code", &begin.state, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "UPSTREAM_ERROR");
    assert_eq!(err.status(), 502);
}

#[tokio::test]
async fn complete_pkce_defaults_tenant_when_token_is_opaque() {
    let as_addr = spawn_authorization_server(json!({
        "access_token": "opaque-not-a-jwt",
        "refresh_token": "rt",
        "expires_in": 3600,
        "scope": "Mail.Read",
    }))
    .await;
    let graph_addr = spawn_resource_api(json!({"id": "user-123"})).await;

    let config = test_config(
        &format!("http://{}", as_addr.0),
        &format!("http://{graph_addr}"),
    );
    let (_, cache, service) = build_service(&config);

    let begin = service.begin_pkce(vec![], None, None).await.unwrap();
    let response = service
        .complete_pkce("code", &begin.state, None)
        .await
        .unwrap();

    let session = cache
        .get_session(&response.graph_session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.tenant_id, "unknown");
}
