//! Custom error types for the common library
//!
//! This module defines the infrastructure error types shared by the
//! authentication service and the mailer.

use redis::RedisError;
use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Error occurred during database migration
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Errors raised by the notification channel and the broker behind it
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The broker rejected a command or could not be reached
    #[error("Broker error: {0}")]
    Broker(#[from] RedisError),

    /// A payload could not be encoded or decoded
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// The broker never answered the readiness probe
    #[error("Broker not ready after {attempts} attempts")]
    NotReady { attempts: u32 },
}

/// Type alias for Result with ChannelError
pub type ChannelResult<T> = Result<T, ChannelError>;
