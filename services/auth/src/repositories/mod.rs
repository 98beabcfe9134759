//! Credential store: repository traits and their implementations
//!
//! Not-found is always `Ok(None)` (or `Ok(false)` for conditional
//! mutations); `Err` is reserved for storage failures and constraint
//! violations.

use async_trait::async_trait;
use common::error::DatabaseError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Account, AccountUpdate, NewAccount, NewRefreshToken, NewVerificationCode, RefreshToken,
    VerificationCode,
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::{PgAccountRepository, PgRefreshTokenRepository, PgVerificationRepository};

/// Errors surfaced by credential store implementations
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint was violated (e.g. duplicate email)
    #[error("Conflicting record: {0}")]
    Conflict(String),

    /// A stored row could not be decoded into a model
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The underlying database failed
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unique").to_string();
                return StoreError::Conflict(constraint);
            }
        }
        StoreError::Database(DatabaseError::Query(err))
    }
}

/// Type alias for Result with StoreError
pub type StoreResult<T> = Result<T, StoreError>;

/// Account persistence
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Insert a new pending account
    async fn create(&self, account: NewAccount) -> StoreResult<Account>;

    /// Find an account by exact email
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Account>>;

    /// Find an account by ID
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>>;

    /// Apply a partial update. Returns `false` if no account matched.
    async fn update(&self, id: Uuid, update: AccountUpdate) -> StoreResult<bool>;

    /// List all accounts, newest first
    async fn list(&self) -> StoreResult<Vec<Account>>;
}

/// Email verification code persistence
#[async_trait]
pub trait VerificationRepository: Send + Sync {
    async fn create(&self, code: NewVerificationCode) -> StoreResult<VerificationCode>;

    /// Newest unused, unexpired code matching the account email and code
    async fn find_valid(&self, email: &str, code: &str) -> StoreResult<Option<VerificationCode>>;

    /// Mark a code used. Returns `false` if it was already used.
    async fn mark_used(&self, id: Uuid) -> StoreResult<bool>;
}

/// Refresh token persistence
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn save(&self, token: NewRefreshToken) -> StoreResult<RefreshToken>;

    /// Un-revoked, unexpired token with this hash
    async fn find_valid(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>>;

    /// Revoke a token if it is still valid. Returns `true` only for the
    /// caller that flipped it, so concurrent rotations of one token cannot
    /// both succeed.
    async fn revoke(&self, token_hash: &str) -> StoreResult<bool>;

    /// Revoke every un-revoked token of an account. Returns the count.
    async fn revoke_all_for_account(&self, user_id: Uuid) -> StoreResult<u64>;

    /// Physically delete expired tokens. Returns the count.
    async fn delete_expired(&self) -> StoreResult<u64>;
}
