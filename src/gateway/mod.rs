//! Gateway assembly and HTTP server

pub mod dispatch;
pub mod router;

pub use dispatch::Dispatcher;
pub use router::{AppState, create_router};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use crate::auth::{AuthService, TokenEndpoint, TokenService};
use crate::cache::{CacheCipher, KvCache, KvStore, MemoryStore, RedisStore};
use crate::config::{CacheMode, Config};
use crate::graph::GraphClient;
use crate::idempotency::IdempotencyCoordinator;
use crate::oidc::OidcValidator;
use crate::session::SessionResolver;
use crate::{Error, Result};

/// The assembled gateway server.
pub struct Gateway {
    config: Config,
    state: Arc<AppState>,
}

impl Gateway {
    /// Wire every component from the validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the cache back-end cannot be reached or any
    /// component rejects its configuration.
    pub async fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn KvStore> = match config.cache_mode {
            CacheMode::Memory => Arc::new(MemoryStore::new()),
            CacheMode::Remote => {
                let endpoint = config
                    .cache_endpoint
                    .as_deref()
                    .ok_or_else(|| Error::Config("CACHE_ENDPOINT is required".to_string()))?;
                Arc::new(RedisStore::connect(endpoint).await?)
            }
        };
        let cipher = match config.decoded_encryption_key()? {
            Some(key) => Some(CacheCipher::new(&key)?),
            None => None,
        };
        let cache = Arc::new(KvCache::new(store, cipher, config.effective_skew_seconds()));

        let graph = Arc::new(GraphClient::new(&config)?);
        let tokens = Arc::new(TokenEndpoint::new(&config)?);

        let oidc = if config.disable_oidc_validation {
            None
        } else {
            let issuer = config
                .oidc_issuer
                .clone()
                .ok_or_else(|| Error::Config("OIDC_ISSUER is required".to_string()))?;
            let audience = config
                .oidc_audience
                .clone()
                .ok_or_else(|| Error::Config("OIDC_AUDIENCE is required".to_string()))?;
            let jwks_url = config
                .oidc_jwks_url
                .clone()
                .ok_or_else(|| Error::Config("OIDC_JWKS_URL is required".to_string()))?;
            Some(Arc::new(OidcValidator::new(
                issuer,
                audience,
                jwks_url,
                Duration::from_secs_f64(config.http_timeout_seconds),
            )))
        };

        let auth = Arc::new(AuthService::new(
            &config,
            Arc::clone(&cache),
            Arc::clone(&graph),
            Arc::clone(&tokens),
        ));
        let token_service = Arc::new(TokenService::new(Arc::clone(&cache), tokens));
        let sessions = Arc::new(SessionResolver::new(Arc::clone(&cache), oidc.clone()));
        let idempotency = Arc::new(IdempotencyCoordinator::new(
            Arc::clone(&cache),
            Duration::from_secs(config.idempotency_ttl_seconds),
        ));

        let dispatcher = Dispatcher::new(
            auth,
            token_service,
            sessions,
            idempotency,
            oidc,
            graph,
            config.max_base64_bytes,
        );

        Ok(Self {
            config,
            state: Arc::new(AppState { dispatcher }),
        })
    }

    /// Run the HTTP server until ctrl-c.
    ///
    /// # Errors
    ///
    /// Returns an error when the listener cannot bind or the server fails.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .listen_host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid listen host: {e}")))?,
            self.config.listen_port,
        );

        let router = create_router(self.state);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Cannot bind {addr}: {e}")))?;

        info!(addr = %addr, "Gateway listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(format!("server error: {e}")))?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
