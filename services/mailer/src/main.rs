use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod config;
mod transport;
mod worker;

use common::{
    ChannelConfig, RedisStreamSubscriber,
    broker::{Broker, BrokerConfig},
};

use crate::{
    config::SmtpConfig,
    transport::SmtpTransport,
    worker::DeliveryWorker,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting mailer");

    let smtp_config = SmtpConfig::from_env()?;
    let transport = Arc::new(SmtpTransport::new(&smtp_config)?);
    info!(
        "SMTP transport configured for {}:{} ({:?})",
        smtp_config.host, smtp_config.port, smtp_config.tls
    );

    // The channel must be reachable before we start consuming
    let broker_config = BrokerConfig::from_env();
    let broker = Broker::new(&broker_config)?;
    broker
        .wait_until_ready(broker_config.ready_interval, broker_config.ready_max_attempts)
        .await?;

    let channel_config = ChannelConfig::from_env();
    info!(
        topic = %channel_config.topic,
        group = %channel_config.group,
        consumer = %channel_config.consumer,
        "Subscribing to notification channel"
    );
    let subscriber = RedisStreamSubscriber::connect(broker.connection().await?, channel_config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = DeliveryWorker::new(subscriber, transport, config::read_retry_backoff());
    let handle = tokio::spawn(worker.run(shutdown_rx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
    handle.await?;

    info!("Mailer stopped");
    Ok(())
}
