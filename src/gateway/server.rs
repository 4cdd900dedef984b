//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{AppState, create_router};
use crate::auth::{Authenticator, JwtTokenVerifier, NonceStore, TokenVerifier};
use crate::config::{Config, ProviderKind, StoreKind};
use crate::dispatch::{Dispatcher, JsonRpcClient, RpcClient, StaticRpcClient};
use crate::limit::{RateLimiter, build_algorithm};
use crate::notify::{ChangeBus, spawn_apply_task};
use crate::pipeline::Pipeline;
use crate::provider::{
    CredentialCache, CredentialProvider, HttpCredentialProvider, HttpRouteProvider,
    MemoryCredentialProvider, MemoryRouteProvider, RouteProvider, spawn_evict_task,
};
use crate::route::{RouteTable, spawn_reload_task};
use crate::store::{MemoryStore, RedisStore, SharedStore, spawn_sweep_task};
use crate::{Error, Result};

/// Edge gateway server
///
/// Owns the fully wired admission pipeline and its supporting pieces:
/// the route snapshot, the shared counter store, the providers, and the
/// change bus. [`Gateway::run`] serves until shutdown.
pub struct Gateway {
    config: Config,
    table: Arc<RouteTable>,
    routes: Arc<dyn RouteProvider>,
    credentials: Arc<CredentialCache>,
    pipeline: Pipeline,
    bus: ChangeBus,
}

impl Gateway {
    /// Wire up a gateway from deployment configuration.
    ///
    /// Connects the shared store, builds providers, loads the initial
    /// route snapshot, and assembles the stage pipeline. A provider that
    /// cannot answer yet is not fatal; the periodic reload will fill the
    /// snapshot once it recovers.
    ///
    /// # Errors
    ///
    /// Returns an error for unresolvable secrets, an unreachable Redis
    /// store, or an invalid provider base URL.
    pub async fn new(config: Config) -> Result<Self> {
        let store = build_store(&config).await?;
        let (routes, credentials) = build_providers(&config)?;

        let table = Arc::new(RouteTable::new());
        match table.load_from(routes.as_ref()).await {
            Ok(count) => info!(routes = count, "Initial route snapshot loaded"),
            Err(e) => warn!(error = %e, "Initial route load failed, starting empty"),
        }

        let limiter = Arc::new(RateLimiter::new(
            build_algorithm(config.rate_limit.algorithm, Arc::clone(&store)),
            config.rate_limit.key_strategy,
            config.rate_limit.on_store_error,
            config.rate_limit.default_limit,
            config.rate_limit.window(),
        ));

        let secret = config.auth.resolve_jwt_secret()?;
        let verifier: Arc<dyn TokenVerifier> =
            Arc::new(JwtTokenVerifier::new(&secret, config.auth.jwt_leeway_secs));
        let cache = Arc::new(CredentialCache::new(
            Arc::clone(&credentials),
            config.auth.credential_cache_ttl(),
        ));
        let nonces = NonceStore::new(Arc::clone(&store), config.auth.signature_tolerance());
        let authenticator = Arc::new(Authenticator::new(
            verifier,
            Arc::clone(&cache),
            credentials,
            nonces,
            config.auth.signature_tolerance(),
        ));

        let client = build_http_client()?;
        let rpc: Arc<dyn RpcClient> = match config.rpc.endpoint.clone() {
            Some(endpoint) => Arc::new(JsonRpcClient::new(client.clone(), endpoint)),
            None => Arc::new(StaticRpcClient::new()),
        };
        let dispatcher = Arc::new(Dispatcher::new(client, rpc));

        let pipeline = Pipeline::standard(Arc::clone(&table), limiter, authenticator, dispatcher);

        let bus = ChangeBus::new(config.providers.bus_capacity);

        Ok(Self {
            config,
            table,
            routes,
            credentials: cache,
            pipeline,
            bus,
        })
    }

    /// Handle for publishing change events into this gateway.
    #[must_use]
    pub fn change_bus(&self) -> ChangeBus {
        self.bus.clone()
    }

    /// Run the gateway
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        // Create shutdown channel
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        // Background tasks: periodic snapshot reload, change-event apply,
        // and credential-cache cleanup
        let reload_task = spawn_reload_task(
            Arc::clone(&self.table),
            Arc::clone(&self.routes),
            self.config.providers.reload_interval(),
            shutdown_tx.subscribe(),
        );
        let apply_task = spawn_apply_task(
            &self.bus,
            Arc::clone(&self.table),
            Arc::clone(&self.routes),
            Arc::clone(&self.credentials),
            shutdown_tx.subscribe(),
        );
        let evict_task = spawn_evict_task(
            Arc::clone(&self.credentials),
            self.config.auth.credential_cache_ttl(),
            shutdown_tx.subscribe(),
        );

        // Create app state
        let state = Arc::new(AppState {
            pipeline: self.pipeline,
            routes: Arc::clone(&self.table),
            max_body_bytes: self.config.server.max_body_bytes,
        });

        // Create router
        let app = create_router(Arc::clone(&state));

        // Bind listener
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("EDGE GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = self.config.server.port, "Listening");
        info!(
            routes = self.table.len(),
            store = ?self.config.store.kind,
            providers = ?self.config.providers.kind,
            "Snapshot and shared store ready"
        );
        info!(stages = ?state.pipeline.stage_names(), "Admission pipeline assembled");
        info!(
            "  GET  http://{}:{}/health  (liveness)",
            self.config.server.host, self.config.server.port
        );
        info!("  *    everything else resolves against the route table");
        info!("============================================================");

        // Run server with graceful shutdown; the handler needs the peer
        // address for ip-keyed rate limiting
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Waiting for background tasks...");
        let _ = reload_task.await;
        let _ = apply_task.await;
        let _ = evict_task.await;

        Ok(())
    }
}

/// Connect the shared counter and nonce store.
async fn build_store(config: &Config) -> Result<Arc<dyn SharedStore>> {
    match config.store.kind {
        StoreKind::Memory => {
            let store = Arc::new(MemoryStore::new());
            spawn_sweep_task(Arc::clone(&store), config.store.sweep_interval());
            Ok(store)
        }
        StoreKind::Redis => {
            let url = config.store.resolve_url()?;
            let store = RedisStore::connect(&url).await?;
            info!("Connected to Redis store");
            Ok(Arc::new(store))
        }
    }
}

/// Build the route and credential providers.
#[allow(clippy::type_complexity)]
fn build_providers(
    config: &Config,
) -> Result<(Arc<dyn RouteProvider>, Arc<dyn CredentialProvider>)> {
    match config.providers.kind {
        ProviderKind::Memory => Ok((
            Arc::new(MemoryRouteProvider::new()),
            Arc::new(MemoryCredentialProvider::new()),
        )),
        ProviderKind::Http => {
            let timeout = config.providers.timeout();
            Ok((
                Arc::new(HttpRouteProvider::new(&config.providers.base_url, timeout)?),
                Arc::new(HttpCredentialProvider::new(
                    &config.providers.base_url,
                    timeout,
                )?),
            ))
        }
    }
}

/// Client for upstream dispatch. No global timeout; each route carries
/// its own deadline.
fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(32)
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .tcp_keepalive(std::time::Duration::from_secs(30))
        .tcp_nodelay(true)
        .build()
        .map_err(|e| Error::Internal(format!("http client: {e}")))
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
