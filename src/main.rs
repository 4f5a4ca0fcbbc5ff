use anyhow::{Context, Result};
use std::sync::Arc;
use tokenvault::accessor::TokenAccessor;
use tokenvault::api::{create_router, ApiState};
use tokenvault::config::{self, StoreBackend};
use tokenvault::credentials::{EncryptionKey, TokenStore};
use tokenvault::kv::{run_purge, KvStore, MemoryKv, SqliteKv};
use tokenvault::oauth::{run_state_cleanup, OAuthFlow, StateManager};
use tokenvault::providers::ProviderRegistry;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokenvault=info".into()),
        )
        .init();

    info!("Tokenvault starting...");

    let config = config::load_from_env().context("Failed to load configuration")?;

    let key_hex = std::env::var("TOKEN_ENCRYPTION_KEY")
        .context("TOKEN_ENCRYPTION_KEY is required (64 hex characters)")?;
    let encryption_key =
        EncryptionKey::from_hex(&key_hex).context("TOKEN_ENCRYPTION_KEY is invalid")?;

    let kv: Arc<dyn KvStore> = match config.store.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory token storage; tokens are lost on restart");
            Arc::new(MemoryKv::new())
        }
        StoreBackend::Sqlite => Arc::new(
            SqliteKv::new(&config.store.sqlite_path)
                .context("Failed to initialize token database")?,
        ),
    };
    info!(
        backend = ?config.store.backend,
        sqlite_path = %config.store.sqlite_path,
        "Token store initialized"
    );

    let providers = ProviderRegistry::from_env();
    let configured = providers.configured();
    if configured.is_empty() {
        warn!("No OAuth clients configured; set <PROVIDER>_CLIENT_ID and <PROVIDER>_CLIENT_SECRET");
    }
    info!(providers = ?configured, "Providers loaded");

    let http = reqwest::Client::new();
    let store = TokenStore::new(Arc::clone(&kv), encryption_key);
    let states = StateManager::new(config.server.callback_state_ttl_seconds);

    let accessor = TokenAccessor::new(store.clone(), providers.clone(), http.clone())
        .with_expiry_buffer(config.refresh.expiry_buffer_seconds);
    let oauth = OAuthFlow::new(providers, states.clone(), store, http);

    tokio::spawn(run_state_cleanup(
        states,
        config.server.state_cleanup_interval_seconds,
    ));
    tokio::spawn(run_purge(Arc::clone(&kv), config.store.purge_interval_seconds));

    let router = create_router(ApiState { accessor, oauth });
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;
    info!(bind_address = %config.server.bind_address, "Tokenvault API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("API server error")?;

    info!("Tokenvault stopped");
    Ok(())
}
