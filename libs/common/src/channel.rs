//! Notification channel backed by Redis Streams
//!
//! The stream is the durable, ordered hand-off between the dispatch queue
//! of the authentication service and the mailer's delivery worker. Every
//! entry carries the recipient as `key` and the JSON request as `payload`.

use async_trait::async_trait;
use redis::{
    AsyncCommands,
    aio::ConnectionManager,
    streams::{StreamReadOptions, StreamReadReply},
};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{
    broker::Broker,
    error::{ChannelError, ChannelResult},
    notification::NotificationRequest,
};

/// Configuration of the notification stream
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Stream (topic) name
    pub topic: String,
    /// Consumer group shared by all mailer instances
    pub group: String,
    /// Name of this consumer inside the group
    pub consumer: String,
    /// How long a read blocks waiting for entries, in milliseconds
    pub block_ms: usize,
    /// Maximum entries returned by a single read
    pub batch_size: usize,
    /// Approximate cap on the stream length
    pub max_length: usize,
}

impl ChannelConfig {
    /// Create a new ChannelConfig from environment variables
    ///
    /// # Environment Variables
    /// - `NOTIFICATION_TOPIC`: Stream name (default: "email_send")
    /// - `NOTIFICATION_GROUP`: Consumer group (default: "email_service")
    /// - `NOTIFICATION_CONSUMER`: Consumer name, unique per mailer instance (default: "mailer")
    /// - `NOTIFICATION_BLOCK_MS`: Read block timeout (default: 5000)
    /// - `NOTIFICATION_BATCH_SIZE`: Entries per read (default: 10)
    /// - `NOTIFICATION_MAX_LENGTH`: Stream length cap (default: 100000)
    pub fn from_env() -> Self {
        let topic =
            std::env::var("NOTIFICATION_TOPIC").unwrap_or_else(|_| "email_send".to_string());
        let group =
            std::env::var("NOTIFICATION_GROUP").unwrap_or_else(|_| "email_service".to_string());
        let consumer =
            std::env::var("NOTIFICATION_CONSUMER").unwrap_or_else(|_| "mailer".to_string());
        let block_ms = std::env::var("NOTIFICATION_BLOCK_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        let batch_size = std::env::var("NOTIFICATION_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        let max_length = std::env::var("NOTIFICATION_MAX_LENGTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100_000);

        Self {
            topic,
            group,
            consumer,
            block_ms,
            batch_size,
            max_length,
        }
    }
}

/// A raw entry read from the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    /// Broker-assigned entry id, used for acknowledgement
    pub id: String,
    /// Partitioning key (the recipient email)
    pub key: String,
    /// Undecoded JSON payload
    pub payload: String,
}

/// Write side of the notification channel
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    /// Append a request to the channel
    async fn publish(&self, request: &NotificationRequest) -> ChannelResult<()>;
}

/// Read side of the notification channel
#[async_trait]
pub trait NotificationSubscriber: Send {
    /// Wait for the next batch of entries. An empty batch means the read
    /// timed out without new entries.
    async fn next_batch(&mut self) -> ChannelResult<Vec<ChannelMessage>>;

    /// Mark an entry as consumed by this group
    async fn ack(&mut self, id: &str) -> ChannelResult<()>;
}

/// Publisher appending to a Redis stream.
///
/// The connection is opened on the first publish, so a broker that is down
/// at startup only delays notifications. A failed connect is reported as a
/// publish error and attempted again on the next call.
pub struct RedisStreamPublisher {
    broker: Broker,
    conn: OnceCell<ConnectionManager>,
    topic: String,
    max_length: usize,
}

impl RedisStreamPublisher {
    pub fn new(broker: Broker, config: &ChannelConfig) -> Self {
        Self {
            broker,
            conn: OnceCell::new(),
            topic: config.topic.clone(),
            max_length: config.max_length,
        }
    }

    async fn connection(&self) -> ChannelResult<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = self.broker.connect_once().await?;
                info!(topic = %self.topic, "Notification channel connected");
                Ok::<_, ChannelError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl NotificationPublisher for RedisStreamPublisher {
    async fn publish(&self, request: &NotificationRequest) -> ChannelResult<()> {
        let payload = request.encode()?;
        let mut conn = self.connection().await?;

        let entry_id: String = redis::cmd("XADD")
            .arg(&self.topic)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*")
            .arg("key")
            .arg(&request.email)
            .arg("payload")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        debug!(topic = %self.topic, entry_id = %entry_id, "Published notification");
        Ok(())
    }
}

/// Consumer-group reader over a Redis stream.
///
/// Entries this consumer read but never acknowledged (a crash between read
/// and ack) are delivered again first, before any new entry.
pub struct RedisStreamSubscriber {
    conn: ConnectionManager,
    config: ChannelConfig,
    /// Last pending entry handed out, `None` once the backlog is drained
    backlog: Option<String>,
}

impl RedisStreamSubscriber {
    /// Create the subscriber, creating the consumer group if needed
    pub async fn connect(conn: ConnectionManager, config: ChannelConfig) -> ChannelResult<Self> {
        let mut subscriber = Self {
            conn,
            config,
            backlog: Some("0".to_string()),
        };
        subscriber.init_group().await?;
        Ok(subscriber)
    }

    async fn init_group(&mut self) -> ChannelResult<()> {
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.topic)
            .arg(&self.config.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.conn)
            .await;

        match result {
            Ok(()) => {
                info!(topic = %self.config.topic, group = %self.config.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(topic = %self.config.topic, group = %self.config.group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(ChannelError::Broker(e)),
        }
    }

    /// `XREADGROUP` from `id`: `>` for new entries, any other id for this
    /// consumer's pending entries after it
    async fn read(&mut self, id: &str) -> ChannelResult<Vec<ChannelMessage>> {
        let mut options = StreamReadOptions::default()
            .group(&self.config.group, &self.config.consumer)
            .count(self.config.batch_size);
        if id == ">" {
            options = options.block(self.config.block_ms);
        }

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[&self.config.topic], &[id], &options)
            .await?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut messages = Vec::new();
        for stream in reply.keys {
            for entry in stream.ids {
                let key: String = entry.get("key").unwrap_or_default();
                // A missing payload surfaces as a decode failure in the consumer
                let payload: String = entry.get("payload").unwrap_or_default();

                messages.push(ChannelMessage {
                    id: entry.id,
                    key,
                    payload,
                });
            }
        }

        Ok(messages)
    }
}

#[async_trait]
impl NotificationSubscriber for RedisStreamSubscriber {
    async fn next_batch(&mut self) -> ChannelResult<Vec<ChannelMessage>> {
        if let Some(cursor) = self.backlog.clone() {
            let messages = self.read(&cursor).await?;
            match messages.last() {
                Some(last) => {
                    info!(count = messages.len(), "Redelivering unacknowledged entries");
                    self.backlog = Some(last.id.clone());
                    return Ok(messages);
                }
                None => {
                    debug!(consumer = %self.config.consumer, "No pending entries left");
                    self.backlog = None;
                }
            }
        }

        self.read(">").await
    }

    async fn ack(&mut self, id: &str) -> ChannelResult<()> {
        let _: i64 = self
            .conn
            .xack(&self.config.topic, &self.config.group, &[id])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;
    use serial_test::serial;
    use std::time::Duration;

    #[test]
    #[serial]
    fn test_channel_config_defaults() {
        unsafe {
            std::env::remove_var("NOTIFICATION_TOPIC");
            std::env::remove_var("NOTIFICATION_GROUP");
            std::env::remove_var("NOTIFICATION_CONSUMER");
        }

        let config = ChannelConfig::from_env();
        assert_eq!(config.topic, "email_send");
        assert_eq!(config.group, "email_service");
        assert_eq!(config.consumer, "mailer");
        assert_eq!(config.batch_size, 10);
    }

    #[tokio::test]
    async fn test_publish_without_broker_is_an_error() {
        let broker = Broker::new(&BrokerConfig {
            url: "redis://127.0.0.1:1".to_string(),
            ready_interval: Duration::from_millis(10),
            ready_max_attempts: 1,
        })
        .unwrap();
        let config = ChannelConfig {
            topic: "email_send".to_string(),
            group: "email_service".to_string(),
            consumer: "mailer".to_string(),
            block_ms: 100,
            batch_size: 10,
            max_length: 1000,
        };

        // Construction never touches the network
        let publisher = RedisStreamPublisher::new(broker, &config);
        let request = NotificationRequest::verification("a@x.com", "123456");

        for _ in 0..2 {
            assert!(matches!(
                publisher.publish(&request).await,
                Err(ChannelError::Broker(_))
            ));
        }
    }
}
