//! Redis broker module for the learning platform
//!
//! This module provides the connection to the Redis instance that backs the
//! notification channel, a `PING` health check and the readiness polling
//! used by consumers before they start reading.

use redis::{
    Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ChannelError, ChannelResult};

/// Configuration for the broker connection
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Interval between readiness probes
    pub ready_interval: Duration,
    /// Number of readiness probes before giving up
    pub ready_max_attempts: u32,
}

impl BrokerConfig {
    /// Create a new BrokerConfig from environment variables
    ///
    /// # Environment Variables
    /// - `BROKER_URL`: Redis connection URL (default: "redis://localhost:6379")
    /// - `BROKER_READY_INTERVAL_SECS`: Seconds between readiness probes (default: 2)
    /// - `BROKER_READY_MAX_ATTEMPTS`: Probes before giving up (default: 60)
    pub fn from_env() -> Self {
        let url =
            std::env::var("BROKER_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let ready_interval = std::env::var("BROKER_READY_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(2));
        let ready_max_attempts = std::env::var("BROKER_READY_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        BrokerConfig {
            url,
            ready_interval,
            ready_max_attempts,
        }
    }
}

/// Handle on the Redis broker
#[derive(Clone)]
pub struct Broker {
    client: Client,
}

impl Broker {
    /// Open a client for the configured URL. No connection is made yet.
    pub fn new(config: &BrokerConfig) -> ChannelResult<Self> {
        let client = Client::open(config.url.clone())?;
        info!("Broker client initialized with URL: {}", config.url);
        Ok(Broker { client })
    }

    /// Get a connection that reconnects on its own after broker outages
    pub async fn connection(&self) -> ChannelResult<ConnectionManager> {
        let conn = self.client.get_connection_manager().await?;
        Ok(conn)
    }

    /// Like [`Broker::connection`], but makes a single connection attempt.
    /// Once established, the connection still reconnects on its own.
    pub async fn connect_once(&self) -> ChannelResult<ConnectionManager> {
        let config = ConnectionManagerConfig::new().set_number_of_retries(0);
        let conn = self.client.get_connection_manager_with_config(config).await?;
        Ok(conn)
    }

    /// Check if the broker is reachable
    pub async fn health_check(&self) -> ChannelResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }

    /// Poll the broker at a fixed interval until it answers `PING`.
    pub async fn wait_until_ready(&self, interval: Duration, max_attempts: u32) -> ChannelResult<()> {
        info!("Waiting for broker...");

        for attempt in 1..=max_attempts {
            match self.health_check().await {
                Ok(true) => {
                    info!(attempt, "Broker ready");
                    return Ok(());
                }
                Ok(false) => warn!(attempt, "Broker answered PING unexpectedly"),
                Err(e) => warn!(attempt, error = %e, "Broker not ready"),
            }

            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        Err(ChannelError::NotReady {
            attempts: max_attempts,
        })
    }
}
