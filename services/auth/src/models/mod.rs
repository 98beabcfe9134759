//! Credential models

pub mod account;
pub mod refresh_token;
pub mod role;
pub mod verification;

// Re-export for convenience
pub use account::{Account, AccountStatus, AccountUpdate, NewAccount};
pub use refresh_token::{NewRefreshToken, RefreshToken};
pub use role::Role;
pub use verification::{NewVerificationCode, VerificationCode};
