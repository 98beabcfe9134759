//! Account model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::Role;

/// Lifecycle status. Accounts start `Pending` and only email verification
/// moves them to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    #[default]
    Pending,
    Active,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "PENDING",
            AccountStatus::Active => "ACTIVE",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(AccountStatus::Pending),
            "ACTIVE" => Ok(AccountStatus::Active),
            other => Err(format!("unknown account status: {}", other)),
        }
    }
}

/// Account entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    /// Argon2 PHC string, never the plain password
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// New account creation payload
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
}

impl NewAccount {
    /// Materialize the account row. New accounts are always pending students.
    pub fn into_account(self, now: DateTime<Utc>) -> Account {
        Account {
            id: Uuid::new_v4(),
            email: self.email,
            password_hash: self.password_hash,
            display_name: self.display_name,
            avatar_url: None,
            role: Role::default(),
            status: AccountStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial account update; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Option<Role>,
    pub status: Option<AccountStatus>,
}

impl AccountUpdate {
    pub fn status(status: AccountStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.display_name.is_none()
            && self.avatar_url.is_none()
            && self.role.is_none()
            && self.status.is_none()
    }

    pub fn apply(&self, account: &mut Account, now: DateTime<Utc>) {
        if let Some(email) = &self.email {
            account.email = email.clone();
        }
        if let Some(display_name) = &self.display_name {
            account.display_name = display_name.clone();
        }
        if let Some(avatar_url) = &self.avatar_url {
            account.avatar_url = Some(avatar_url.clone());
        }
        if let Some(role) = self.role {
            account.role = role;
        }
        if let Some(status) = self.status {
            account.status = status;
        }
        account.updated_at = now;
    }
}
