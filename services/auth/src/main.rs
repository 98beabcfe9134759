use anyhow::Result;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod config;
mod dispatch;
mod jwt;
mod middleware;
mod models;
mod password;
mod repositories;
mod routes;
mod service;
mod sweeper;
mod validation;

use common::{
    ChannelConfig, NotificationPublisher, RedisStreamPublisher,
    broker::{Broker, BrokerConfig},
    database,
};

use crate::{
    config::{AuthConfig, StoreBackend},
    jwt::JwtService,
    password::PasswordService,
    repositories::{
        AccountRepository, InMemoryStore, PgAccountRepository, PgRefreshTokenRepository,
        PgVerificationRepository, RefreshTokenRepository, VerificationRepository,
    },
    service::SessionService,
    sweeper::TokenSweeper,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub session_service: SessionService,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting authentication service");

    let config = AuthConfig::from_env()?;

    let (accounts, verifications, refresh_tokens) = open_store(&config).await?;

    // Notification channel. The broker may still be down: the publisher
    // connects on first use and the dispatcher keeps retrying until then.
    let broker = Broker::new(&BrokerConfig::from_env())?;
    let channel_config = ChannelConfig::from_env();
    let publisher: Arc<dyn NotificationPublisher> =
        Arc::new(RedisStreamPublisher::new(broker, &channel_config));
    info!(topic = %channel_config.topic, "Notification publisher configured");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (dispatch_queue, dispatcher) = dispatch::spawn(&config.dispatch, publisher, shutdown_rx);

    let mut scheduler = TokenSweeper::new(refresh_tokens.clone())
        .start(&config.sweep_schedule)
        .await?;

    let session_service = SessionService::new(
        accounts,
        verifications,
        refresh_tokens,
        Arc::new(dispatch_queue),
        JwtService::new(config.jwt.clone()),
        PasswordService::new(&config.password)?,
        config.session.clone(),
    );

    info!("Authentication service initialized successfully");

    // Start the web server
    let app = routes::create_router(AppState { session_service });

    let listener = TcpListener::bind(&config.bind_address).await?;
    info!("Authentication service listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down background workers");
    let _ = shutdown_tx.send(true);

    if let Err(e) = scheduler.shutdown().await {
        error!("Failed to stop token sweeper: {}", e);
    }
    dispatcher.await?;

    info!("Authentication service stopped");
    Ok(())
}

type Stores = (
    Arc<dyn AccountRepository>,
    Arc<dyn VerificationRepository>,
    Arc<dyn RefreshTokenRepository>,
);

/// Open the configured credential store
async fn open_store(config: &AuthConfig) -> Result<Stores> {
    match config.store {
        StoreBackend::Postgres => {
            // Initialize database connection pool
            let db_config = database::DatabaseConfig::from_env()?;
            let pool = database::init_pool(&db_config).await?;

            // Check database connectivity
            if database::health_check(&pool).await? {
                info!("Database connection successful");
            } else {
                anyhow::bail!("Failed to connect to database");
            }

            database::run_migrations(&pool).await?;

            let accounts: Arc<dyn AccountRepository> =
                Arc::new(PgAccountRepository::new(pool.clone()));
            let verifications: Arc<dyn VerificationRepository> =
                Arc::new(PgVerificationRepository::new(pool.clone()));
            let refresh_tokens: Arc<dyn RefreshTokenRepository> =
                Arc::new(PgRefreshTokenRepository::new(pool));

            Ok((accounts, verifications, refresh_tokens))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory credential store, all accounts are lost on restart");
            let store = Arc::new(InMemoryStore::new());
            let accounts: Arc<dyn AccountRepository> = store.clone();
            let verifications: Arc<dyn VerificationRepository> = store.clone();
            let refresh_tokens: Arc<dyn RefreshTokenRepository> = store;

            Ok((accounts, verifications, refresh_tokens))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
