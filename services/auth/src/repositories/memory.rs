//! In-memory credential store (for development/testing)
//!
//! All three repositories share one lock so that cross-entity lookups
//! (verification code by account email) and conditional updates behave
//! like their SQL counterparts.

use async_trait::async_trait;
use chrono::Utc;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AccountRepository, RefreshTokenRepository, StoreError, StoreResult, VerificationRepository,
};
use crate::models::{
    Account, AccountUpdate, NewAccount, NewRefreshToken, NewVerificationCode, RefreshToken,
    VerificationCode,
};

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    codes: Vec<VerificationCode>,
    tokens: Vec<RefreshToken>,
}

/// Credential store held in process memory
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every refresh token ever saved
    pub async fn refresh_tokens(&self) -> Vec<RefreshToken> {
        self.state.read().await.tokens.clone()
    }

    /// Snapshot of every verification code ever created
    pub async fn verification_codes(&self) -> Vec<VerificationCode> {
        self.state.read().await.codes.clone()
    }
}

#[async_trait]
impl AccountRepository for InMemoryStore {
    async fn create(&self, account: NewAccount) -> StoreResult<Account> {
        let mut state = self.state.write().await;

        if state.accounts.values().any(|a| a.email == account.email) {
            return Err(StoreError::Conflict("users_email_key".to_string()));
        }

        let account = account.into_account(Utc::now());
        state.accounts.insert(account.id, account.clone());

        tracing::info!(user_id = %account.id, email = %account.email, "Created account");
        Ok(account)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, update: AccountUpdate) -> StoreResult<bool> {
        let mut state = self.state.write().await;

        if let Some(email) = &update.email {
            if state
                .accounts
                .values()
                .any(|a| a.id != id && &a.email == email)
            {
                return Err(StoreError::Conflict("users_email_key".to_string()));
            }
        }

        match state.accounts.get_mut(&id) {
            Some(account) => {
                update.apply(account, Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self) -> StoreResult<Vec<Account>> {
        let state = self.state.read().await;
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(accounts)
    }
}

#[async_trait]
impl VerificationRepository for InMemoryStore {
    async fn create(&self, code: NewVerificationCode) -> StoreResult<VerificationCode> {
        let mut state = self.state.write().await;
        let code = code.into_code(Utc::now());
        state.codes.push(code.clone());
        Ok(code)
    }

    async fn find_valid(&self, email: &str, code: &str) -> StoreResult<Option<VerificationCode>> {
        let state = self.state.read().await;
        let now = Utc::now();

        let Some(account) = state.accounts.values().find(|a| a.email == email) else {
            return Ok(None);
        };

        // Codes are appended in creation order, so the last match is the newest
        Ok(state
            .codes
            .iter()
            .rev()
            .find(|c| c.user_id == account.id && c.code == code && c.is_valid_at(now))
            .cloned())
    }

    async fn mark_used(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.codes.iter_mut().find(|c| c.id == id && !c.used) {
            Some(code) => {
                code.used = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl RefreshTokenRepository for InMemoryStore {
    async fn save(&self, token: NewRefreshToken) -> StoreResult<RefreshToken> {
        let mut state = self.state.write().await;

        if state.tokens.iter().any(|t| t.token_hash == token.token_hash) {
            return Err(StoreError::Conflict(
                "refresh_tokens_token_hash_key".to_string(),
            ));
        }

        let token = token.into_token(Utc::now());
        state.tokens.push(token.clone());
        Ok(token)
    }

    async fn find_valid(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>> {
        let state = self.state.read().await;
        let now = Utc::now();
        Ok(state
            .tokens
            .iter()
            .find(|t| t.token_hash == token_hash && t.is_valid_at(now))
            .cloned())
    }

    async fn revoke(&self, token_hash: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        match state
            .tokens
            .iter_mut()
            .find(|t| t.token_hash == token_hash && t.is_valid_at(now))
        {
            Some(token) => {
                token.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all_for_account(&self, user_id: Uuid) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut revoked = 0;
        for token in state
            .tokens
            .iter_mut()
            .filter(|t| t.user_id == user_id && !t.revoked)
        {
            token.revoked = true;
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn delete_expired(&self) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let before = state.tokens.len();
        state.tokens.retain(|t| t.expires_at >= now);
        Ok((before - state.tokens.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            display_name: "Test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_is_a_conflict() {
        let store = InMemoryStore::new();
        AccountRepository::create(&store, new_account("a@x.com"))
            .await
            .unwrap();

        let result = AccountRepository::create(&store, new_account("a@x.com")).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_email_lookup_is_case_sensitive() {
        let store = InMemoryStore::new();
        AccountRepository::create(&store, new_account("a@x.com"))
            .await
            .unwrap();

        assert!(store.find_by_email("a@x.com").await.unwrap().is_some());
        assert!(store.find_by_email("A@X.COM").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_account_reports_false() {
        let store = InMemoryStore::new();
        let updated = store
            .update(Uuid::new_v4(), AccountUpdate::default())
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_find_valid_code_prefers_newest() {
        let store = InMemoryStore::new();
        let account = AccountRepository::create(&store, new_account("a@x.com"))
            .await
            .unwrap();
        let expires_at = Utc::now() + Duration::minutes(15);

        let first = VerificationRepository::create(
            &store,
            NewVerificationCode {
                user_id: account.id,
                code: "111111".to_string(),
                expires_at,
            },
        )
        .await
        .unwrap();
        let second = VerificationRepository::create(
            &store,
            NewVerificationCode {
                user_id: account.id,
                code: "111111".to_string(),
                expires_at,
            },
        )
        .await
        .unwrap();

        let found = VerificationRepository::find_valid(&store, "a@x.com", "111111")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, second.id);
        assert_ne!(found.id, first.id);
    }

    #[tokio::test]
    async fn test_expired_code_is_not_valid() {
        let store = InMemoryStore::new();
        let account = AccountRepository::create(&store, new_account("a@x.com"))
            .await
            .unwrap();

        VerificationRepository::create(
            &store,
            NewVerificationCode {
                user_id: account.id,
                code: "222222".to_string(),
                expires_at: Utc::now() - Duration::seconds(1),
            },
        )
        .await
        .unwrap();

        let found = VerificationRepository::find_valid(&store, "a@x.com", "222222")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_mark_used_only_once() {
        let store = InMemoryStore::new();
        let account = AccountRepository::create(&store, new_account("a@x.com"))
            .await
            .unwrap();
        let code = VerificationRepository::create(
            &store,
            NewVerificationCode {
                user_id: account.id,
                code: "333333".to_string(),
                expires_at: Utc::now() + Duration::minutes(15),
            },
        )
        .await
        .unwrap();

        assert!(store.mark_used(code.id).await.unwrap());
        assert!(!store.mark_used(code.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_is_conditional() {
        let store = InMemoryStore::new();
        let user_id = Uuid::new_v4();
        store
            .save(NewRefreshToken {
                user_id,
                token_hash: "h1".to_string(),
                expires_at: Utc::now() + Duration::days(30),
            })
            .await
            .unwrap();

        assert!(store.revoke("h1").await.unwrap());
        assert!(!store.revoke("h1").await.unwrap());
        assert!(RefreshTokenRepository::find_valid(&store, "h1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_revoke_all_and_delete_expired() {
        let store = InMemoryStore::new();
        let user_id = Uuid::new_v4();
        let other = Uuid::new_v4();

        for (owner, hash, ttl) in [
            (user_id, "a", Duration::days(30)),
            (user_id, "b", Duration::days(30)),
            (other, "c", Duration::days(30)),
            (other, "d", Duration::seconds(-5)),
        ] {
            store
                .save(NewRefreshToken {
                    user_id: owner,
                    token_hash: hash.to_string(),
                    expires_at: Utc::now() + ttl,
                })
                .await
                .unwrap();
        }

        assert_eq!(store.revoke_all_for_account(user_id).await.unwrap(), 2);
        assert_eq!(store.revoke_all_for_account(user_id).await.unwrap(), 0);
        assert!(RefreshTokenRepository::find_valid(&store, "c")
            .await
            .unwrap()
            .is_some());

        assert_eq!(store.delete_expired().await.unwrap(), 1);
        assert_eq!(store.refresh_tokens().await.len(), 3);
    }
}
