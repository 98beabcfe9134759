//! Session service: registration, email verification, login and refresh
//! token rotation.
//!
//! The service holds no mutable state of its own. Every decision goes
//! through the credential store, and notifications leave through the
//! [`NotificationEnqueuer`] port without blocking the caller.

use chrono::{DateTime, Duration, Utc};
use common::NotificationRequest;
use rand::{Rng, rngs::OsRng};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::SessionConfig,
    dispatch::NotificationEnqueuer,
    jwt::JwtService,
    models::{Account, AccountStatus, AccountUpdate, NewAccount, NewRefreshToken, NewVerificationCode},
    password::{PasswordError, PasswordService},
    repositories::{AccountRepository, RefreshTokenRepository, StoreError, VerificationRepository},
};

/// Failures reported by the session service
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("An active account already exists for this email")]
    AlreadyActive,

    /// Wrong, expired and already-used codes are not told apart
    #[error("Invalid or expired verification code")]
    InvalidOrExpiredCode,

    #[error("Account no longer exists")]
    AccountMissing,

    /// Unknown email and wrong password are not told apart
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account email is not verified")]
    NotVerified,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Account not found")]
    NotFound,

    /// A configured lifetime does not fit a timestamp
    #[error("Lifetime of {0} seconds is out of range")]
    Lifetime(u64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Token signing error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Password(#[from] PasswordError),
}

/// Type alias for Result with AuthError
pub type AuthResult<T> = Result<T, AuthError>;

/// Raw token values handed to the caller once
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

/// Session service
#[derive(Clone)]
pub struct SessionService {
    accounts: Arc<dyn AccountRepository>,
    verifications: Arc<dyn VerificationRepository>,
    refresh_tokens: Arc<dyn RefreshTokenRepository>,
    notifier: Arc<dyn NotificationEnqueuer>,
    jwt: JwtService,
    passwords: PasswordService,
    config: SessionConfig,
}

impl SessionService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        verifications: Arc<dyn VerificationRepository>,
        refresh_tokens: Arc<dyn RefreshTokenRepository>,
        notifier: Arc<dyn NotificationEnqueuer>,
        jwt: JwtService,
        passwords: PasswordService,
        config: SessionConfig,
    ) -> Self {
        Self {
            accounts,
            verifications,
            refresh_tokens,
            notifier,
            jwt,
            passwords,
            config,
        }
    }

    /// Access to the token signer, used by the bearer middleware
    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    /// Register a new account, or resend a code to a pending one.
    ///
    /// Exactly one notification is enqueued per successful call.
    #[instrument(skip(self, password, display_name))]
    pub async fn register(&self, email: &str, password: &str, display_name: &str) -> AuthResult<()> {
        let account = match self.accounts.find_by_email(email).await? {
            Some(account) if account.is_active() => return Err(AuthError::AlreadyActive),
            Some(account) => {
                info!(user_id = %account.id, "Pending account registered again, resending code");
                account
            }
            None => {
                let password_hash = self.passwords.hash(password)?;
                let new_account = NewAccount {
                    email: email.to_string(),
                    password_hash,
                    display_name: display_name.to_string(),
                };

                match self.accounts.create(new_account).await {
                    Ok(account) => account,
                    // Lost a race against a concurrent registration
                    Err(StoreError::Conflict(constraint)) => {
                        warn!(constraint = %constraint, "Concurrent registration for the same email");
                        return Err(AuthError::AlreadyActive);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        self.send_verification_code(&account).await
    }

    async fn send_verification_code(&self, account: &Account) -> AuthResult<()> {
        let code = generate_verification_code();
        let expires_at = expires_after(self.config.verification_code_expiry)?;

        self.verifications
            .create(NewVerificationCode {
                user_id: account.id,
                code: code.clone(),
                expires_at,
            })
            .await?;

        self.notifier
            .enqueue(NotificationRequest::verification(&account.email, &code));

        info!(user_id = %account.id, "Verification code issued");
        Ok(())
    }

    /// Consume a verification code and activate its account
    #[instrument(skip(self, code))]
    pub async fn verify_email(&self, email: &str, code: &str) -> AuthResult<()> {
        let Some(verification) = self.verifications.find_valid(email, code).await? else {
            return Err(AuthError::InvalidOrExpiredCode);
        };

        // A concurrent verification already consumed it
        if !self.verifications.mark_used(verification.id).await? {
            return Err(AuthError::InvalidOrExpiredCode);
        }

        let Some(account) = self.accounts.find_by_id(verification.user_id).await? else {
            return Err(AuthError::AccountMissing);
        };

        if !self
            .accounts
            .update(account.id, AccountUpdate::status(AccountStatus::Active))
            .await?
        {
            return Err(AuthError::AccountMissing);
        }

        info!(user_id = %account.id, "Account verified");
        Ok(())
    }

    /// Authenticate and start a new refresh token chain.
    ///
    /// Every earlier refresh token of the account is revoked first.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<TokenPair> {
        let Some(account) = self.accounts.find_by_email(email).await? else {
            return Err(AuthError::InvalidCredentials);
        };

        if !account.is_active() {
            return Err(AuthError::NotVerified);
        }

        if !self.passwords.verify(password, &account.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        let revoked = self.refresh_tokens.revoke_all_for_account(account.id).await?;
        debug!(user_id = %account.id, revoked, "Revoked previous refresh tokens");

        let tokens = self.issue_tokens(&account).await?;
        info!(user_id = %account.id, "Login successful");
        Ok(tokens)
    }

    /// Rotate a refresh token. The presented token is revoked and a fresh
    /// pair is issued.
    #[instrument(skip_all)]
    pub async fn refresh(&self, raw_refresh_token: &str) -> AuthResult<TokenPair> {
        let token_hash = hash_token(raw_refresh_token);

        let Some(token) = self.refresh_tokens.find_valid(&token_hash).await? else {
            return Err(AuthError::InvalidRefreshToken);
        };

        // Only the caller that flips the row may continue
        if !self.refresh_tokens.revoke(&token_hash).await? {
            debug!(user_id = %token.user_id, "Refresh token already rotated");
            return Err(AuthError::InvalidRefreshToken);
        }

        let Some(account) = self.accounts.find_by_id(token.user_id).await? else {
            return Err(AuthError::InvalidRefreshToken);
        };

        let tokens = self.issue_tokens(&account).await?;
        info!(user_id = %account.id, "Refresh token rotated");
        Ok(tokens)
    }

    #[instrument(skip(self))]
    pub async fn get_user_by_id(&self, id: Uuid) -> AuthResult<Account> {
        self.accounts
            .find_by_id(id)
            .await?
            .ok_or(AuthError::NotFound)
    }

    async fn issue_tokens(&self, account: &Account) -> AuthResult<TokenPair> {
        let access_token = self.jwt.generate_access_token(account)?;

        let refresh_token = Uuid::new_v4().to_string();
        let expires_at = expires_after(self.config.refresh_token_expiry)?;

        self.refresh_tokens
            .save(NewRefreshToken {
                user_id: account.id,
                token_hash: hash_token(&refresh_token),
                expires_at,
            })
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.jwt.access_token_expiry(),
        })
    }
}

fn expires_after(seconds: u64) -> AuthResult<DateTime<Utc>> {
    i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or(AuthError::Lifetime(seconds))
}

/// Uniform 6-digit code from the OS random source
pub fn generate_verification_code() -> String {
    let value: u32 = OsRng.gen_range(0..1_000_000);
    format!("{:06}", value)
}

/// SHA-256 of a raw refresh token, hex encoded
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}
