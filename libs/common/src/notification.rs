//! Notification payload exchanged between the authentication service and
//! the mailer.

use serde::{Deserialize, Serialize};

use crate::error::ChannelResult;

/// Subject line of verification emails
pub const VERIFICATION_SUBJECT: &str = "Verify your account";

/// Request to deliver a verification code by email.
///
/// Serialized as `{"email": ..., "subject": ..., "code": ...}` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub email: String,
    pub subject: String,
    pub code: String,
}

impl NotificationRequest {
    /// Build the verification email request for `email`
    pub fn verification(email: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            subject: VERIFICATION_SUBJECT.to_string(),
            code: code.into(),
        }
    }

    /// Render the email body
    pub fn body(&self) -> String {
        format!("Your code: {}", self.code)
    }

    /// Encode as the JSON wire payload
    pub fn encode(&self) -> ChannelResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON wire payload
    pub fn decode(payload: &str) -> ChannelResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;

    #[test]
    fn test_verification_request_uses_fixed_subject() {
        let request = NotificationRequest::verification("a@x.com", "042137");
        assert_eq!(request.subject, "Verify your account");
        assert_eq!(request.body(), "Your code: 042137");
    }

    #[test]
    fn test_wire_field_names() {
        let request = NotificationRequest::verification("a@x.com", "000001");
        let value: serde_json::Value =
            serde_json::from_str(&request.encode().unwrap()).unwrap();

        assert_eq!(value["email"], "a@x.com");
        assert_eq!(value["subject"], "Verify your account");
        assert_eq!(value["code"], "000001");
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        let result = NotificationRequest::decode(r#"{"email": "a@x.com"}"#);
        assert!(matches!(result, Err(ChannelError::Payload(_))));

        let result = NotificationRequest::decode("not json");
        assert!(matches!(result, Err(ChannelError::Payload(_))));
    }
}
