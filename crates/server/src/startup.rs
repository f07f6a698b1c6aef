use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use configs::{AppConfig, RedisConfig, ServerConfig};
use service::{
    backend::redis_store::{RedisBackend, RedisBackendOptions},
    FlashConfig, FlashStore,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::middleware::FlashState;
use crate::routes;

fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

fn bind_addr(server: &ServerConfig) -> anyhow::Result<SocketAddr> {
    Ok(format!("{}:{}", server.host, server.port).parse()?)
}

/// Connect the Redis backend once and wrap it in the shared store
pub async fn build_flash_store(redis: &RedisConfig) -> anyhow::Result<Arc<FlashStore>> {
    let backend = RedisBackend::connect(RedisBackendOptions {
        url: redis.connection_url(),
        timeout: Duration::from_millis(redis.timeout_ms),
        ttl: redis.ttl_secs.map(Duration::from_secs),
        atomic_reads: redis.atomic_reads,
    })
    .await?;
    let config = FlashConfig { key_prefix: redis.key_prefix.clone() };
    Ok(Arc::new(FlashStore::new(Arc::new(backend), config)))
}

/// Router wired to an already-built store; used by `run` and by tests
pub fn build_app(store: Arc<FlashStore>, cfg: &AppConfig) -> Router {
    let state = FlashState { store, options: Arc::new(cfg.flash.clone()) };
    routes::build_router(state, build_cors())
}

/// Public entry: build the app and run the HTTP server.
/// Expects `cfg` already loaded and validated, and logging initialised.
pub async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let store = build_flash_store(&cfg.redis).await?;
    info!(
        backend = store.backend_name(),
        redis_url = %cfg.redis.redacted_url(),
        atomic_reads = cfg.redis.atomic_reads,
        keep_existing = cfg.flash.keep_existing,
        "flash store ready"
    );

    let app = build_app(store, &cfg);
    let addr = bind_addr(&cfg.server)?;
    info!(%addr, "starting flash server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
