//! Common library for the learning platform
//!
//! This crate provides shared functionality used by the authentication
//! service and the mailer: database connectivity, the Redis broker, the
//! notification channel built on Redis Streams, and error types.
//!
//! ```rust,no_run
//! use common::{
//!     ChannelConfig, NotificationPublisher, NotificationRequest, RedisStreamPublisher,
//!     broker::{Broker, BrokerConfig},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Broker::new(&BrokerConfig::from_env())?;
//!     let publisher = RedisStreamPublisher::new(broker, &ChannelConfig::from_env());
//!     publisher
//!         .publish(&NotificationRequest::verification("a@x.com", "042137"))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod channel;
pub mod database;
pub mod error;
pub mod notification;

pub use channel::{
    ChannelConfig, ChannelMessage, NotificationPublisher, NotificationSubscriber,
    RedisStreamPublisher, RedisStreamSubscriber,
};
pub use notification::NotificationRequest;
