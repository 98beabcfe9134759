//! Email verification code model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Verification code entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationCode {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Six digits, zero-padded
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl VerificationCode {
    /// A code is valid while unused and unexpired
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && now < self.expires_at
    }
}

/// New verification code payload
#[derive(Debug, Clone)]
pub struct NewVerificationCode {
    pub user_id: Uuid,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

impl NewVerificationCode {
    pub fn into_code(self, now: DateTime<Utc>) -> VerificationCode {
        VerificationCode {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            code: self.code,
            expires_at: self.expires_at,
            used: false,
            created_at: now,
        }
    }
}
