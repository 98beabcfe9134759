//! PostgreSQL credential store

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use super::{
    AccountRepository, RefreshTokenRepository, StoreError, StoreResult, VerificationRepository,
};
use crate::models::{
    Account, AccountStatus, AccountUpdate, NewAccount, NewRefreshToken, NewVerificationCode,
    RefreshToken, Role, VerificationCode,
};

const ACCOUNT_COLUMNS: &str =
    "id, email, password_hash, display_name, avatar_url, role, status, created_at, updated_at";

fn account_from_row(row: &PgRow) -> StoreResult<Account> {
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("status")?;

    Ok(Account {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        display_name: row.try_get("display_name")?,
        avatar_url: row.try_get("avatar_url")?,
        role: role.parse::<Role>().map_err(StoreError::Corrupt)?,
        status: status
            .parse::<AccountStatus>()
            .map_err(StoreError::Corrupt)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn verification_from_row(row: &PgRow) -> StoreResult<VerificationCode> {
    Ok(VerificationCode {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        code: row.try_get("code")?,
        expires_at: row.try_get("expires_at")?,
        used: row.try_get("used")?,
        created_at: row.try_get("created_at")?,
    })
}

fn refresh_token_from_row(row: &PgRow) -> StoreResult<RefreshToken> {
    Ok(RefreshToken {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        token_hash: row.try_get("token_hash")?,
        revoked: row.try_get("revoked")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Account repository
#[derive(Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    /// Create a new account repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn create(&self, account: NewAccount) -> StoreResult<Account> {
        info!("Creating new account: {}", account.email);

        let account = account.into_account(Utc::now());
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, display_name, role, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(account.id)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.display_name)
        .bind(account.role.as_str())
        .bind(account.status.as_str())
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&self.pool)
        .await?;

        account_from_row(&row)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn update(&self, id: Uuid, update: AccountUpdate) -> StoreResult<bool> {
        if update.is_empty() {
            return Ok(self.find_by_id(id).await?.is_some());
        }

        let result = sqlx::query(
            r#"
            UPDATE users SET
                email = COALESCE($2, email),
                display_name = COALESCE($3, display_name),
                avatar_url = COALESCE($4, avatar_url),
                role = COALESCE($5, role),
                status = COALESCE($6, status),
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.email.as_deref())
        .bind(update.display_name.as_deref())
        .bind(update.avatar_url.as_deref())
        .bind(update.role.map(|r| r.as_str()))
        .bind(update.status.map(|s| s.as_str()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> StoreResult<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM users ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(account_from_row).collect()
    }
}

/// Verification code repository
#[derive(Clone)]
pub struct PgVerificationRepository {
    pool: PgPool,
}

impl PgVerificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerificationRepository for PgVerificationRepository {
    async fn create(&self, code: NewVerificationCode) -> StoreResult<VerificationCode> {
        let code = code.into_code(Utc::now());

        let row = sqlx::query(
            r#"
            INSERT INTO email_verifications (id, user_id, code, expires_at, used, created_at)
            VALUES ($1, $2, $3, $4, FALSE, $5)
            RETURNING id, user_id, code, expires_at, used, created_at
            "#,
        )
        .bind(code.id)
        .bind(code.user_id)
        .bind(&code.code)
        .bind(code.expires_at)
        .bind(code.created_at)
        .fetch_one(&self.pool)
        .await?;

        verification_from_row(&row)
    }

    async fn find_valid(&self, email: &str, code: &str) -> StoreResult<Option<VerificationCode>> {
        let row = sqlx::query(
            r#"
            SELECT v.id, v.user_id, v.code, v.expires_at, v.used, v.created_at
            FROM email_verifications v
            JOIN users u ON u.id = v.user_id
            WHERE u.email = $1 AND v.code = $2 AND v.used = FALSE AND v.expires_at > $3
            ORDER BY v.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(email)
        .bind(code)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(verification_from_row).transpose()
    }

    async fn mark_used(&self, id: Uuid) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE email_verifications SET used = TRUE WHERE id = $1 AND used = FALSE")
                .bind(id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Refresh token repository
#[derive(Clone)]
pub struct PgRefreshTokenRepository {
    pool: PgPool,
}

impl PgRefreshTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenRepository {
    async fn save(&self, token: NewRefreshToken) -> StoreResult<RefreshToken> {
        let token = token.into_token(Utc::now());

        let row = sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, revoked, expires_at, created_at)
            VALUES ($1, $2, $3, FALSE, $4, $5)
            RETURNING id, user_id, token_hash, revoked, expires_at, created_at
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.created_at)
        .fetch_one(&self.pool)
        .await?;

        refresh_token_from_row(&row)
    }

    async fn find_valid(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, token_hash, revoked, expires_at, created_at
            FROM refresh_tokens
            WHERE token_hash = $1 AND revoked = FALSE AND expires_at > $2
            "#,
        )
        .bind(token_hash)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(refresh_token_from_row).transpose()
    }

    async fn revoke(&self, token_hash: &str) -> StoreResult<bool> {
        // The row-level lock taken by UPDATE serializes concurrent revokers;
        // the loser re-evaluates `revoked = FALSE` and matches nothing.
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens SET revoked = TRUE
            WHERE token_hash = $1 AND revoked = FALSE AND expires_at > $2
            "#,
        )
        .bind(token_hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_for_account(&self, user_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1 AND revoked = FALSE",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
