//! SMTP configuration

use anyhow::{Context, Result};
use std::{env, str::FromStr, time::Duration};
use tracing::warn;

/// Sender used when neither `SMTP_FROM` nor `SMTP_USER` is set
pub const DEFAULT_FROM: &str = "noreply@localhost";

/// How the SMTP connection is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpTls {
    /// Plain connection upgraded with STARTTLS (port 587)
    StartTls,
    /// TLS from the first byte (port 465)
    Wrapper,
    /// No encryption, for local catch-all servers
    None,
}

impl FromStr for SmtpTls {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "starttls" => Ok(SmtpTls::StartTls),
            "tls" | "wrapper" => Ok(SmtpTls::Wrapper),
            "none" | "off" => Ok(SmtpTls::None),
            other => Err(format!("unknown SMTP_TLS mode: {}", other)),
        }
    }
}

/// SMTP transport configuration
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Sender address; falls back to the username, then [`DEFAULT_FROM`]
    pub from: String,
    pub tls: SmtpTls,
}

impl SmtpConfig {
    /// Create a new SmtpConfig from environment variables
    ///
    /// # Environment Variables
    /// - `SMTP_HOST`: Server host (default: "localhost")
    /// - `SMTP_PORT`: Server port (default: 587, also used when unparsable)
    /// - `SMTP_USER` / `SMTP_PASSWORD`: Credentials (optional)
    /// - `SMTP_FROM`: Sender address (default: `SMTP_USER`, else "noreply@localhost")
    /// - `SMTP_TLS`: "starttls", "tls" or "none" (default: "starttls")
    pub fn from_env() -> Result<Self> {
        let host = env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|port| *port != 0)
            .unwrap_or(587);
        let username = env::var("SMTP_USER").unwrap_or_default();
        let password = env::var("SMTP_PASSWORD").unwrap_or_default();
        let from = [env::var("SMTP_FROM").ok(), Some(username.clone())]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .unwrap_or_else(|| {
                warn!("SMTP_FROM and SMTP_USER are unset, sending as {}", DEFAULT_FROM);
                DEFAULT_FROM.to_string()
            });

        let tls = match env::var("SMTP_TLS") {
            Ok(mode) => mode
                .parse::<SmtpTls>()
                .map_err(anyhow::Error::msg)
                .context("Invalid SMTP_TLS")?,
            Err(_) => SmtpTls::StartTls,
        };

        Ok(Self {
            host,
            port,
            username,
            password,
            from,
            tls,
        })
    }
}

/// Pause after a failed channel read before trying again
pub fn read_retry_backoff() -> Duration {
    env::var("MAILER_READ_RETRY_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        unsafe {
            for name in [
                "SMTP_HOST",
                "SMTP_PORT",
                "SMTP_USER",
                "SMTP_PASSWORD",
                "SMTP_FROM",
                "SMTP_TLS",
            ] {
                env::remove_var(name);
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults_with_sender_from_user() {
        clear();
        unsafe {
            env::set_var("SMTP_USER", "noreply@school.edu");
        }

        let config = SmtpConfig::from_env().unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 587);
        assert_eq!(config.from, "noreply@school.edu");
        assert_eq!(config.tls, SmtpTls::StartTls);

        clear();
    }

    #[test]
    #[serial]
    fn test_unparsable_port_falls_back() {
        clear();
        unsafe {
            env::set_var("SMTP_FROM", "noreply@school.edu");
            env::set_var("SMTP_PORT", "not-a-port");
            env::set_var("SMTP_TLS", "none");
        }

        let config = SmtpConfig::from_env().unwrap();
        assert_eq!(config.port, 587);
        assert_eq!(config.tls, SmtpTls::None);

        clear();
    }

    #[test]
    #[serial]
    fn test_missing_sender_falls_back_to_default() {
        clear();

        let config = SmtpConfig::from_env().unwrap();
        assert_eq!(config.from, DEFAULT_FROM);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 587);
    }

    #[test]
    #[serial]
    fn test_blank_sender_falls_back_to_user() {
        clear();
        unsafe {
            env::set_var("SMTP_FROM", "  ");
            env::set_var("SMTP_USER", "mailer@school.edu");
        }

        let config = SmtpConfig::from_env().unwrap();
        assert_eq!(config.from, "mailer@school.edu");
        clear();
    }

    #[test]
    #[serial]
    fn test_unknown_tls_mode_is_rejected() {
        clear();
        unsafe {
            env::set_var("SMTP_FROM", "noreply@school.edu");
            env::set_var("SMTP_TLS", "maybe");
        }

        assert!(SmtpConfig::from_env().is_err());
        clear();
    }

    #[test]
    fn test_tls_mode_parsing() {
        assert_eq!("STARTTLS".parse::<SmtpTls>().unwrap(), SmtpTls::StartTls);
        assert_eq!("tls".parse::<SmtpTls>().unwrap(), SmtpTls::Wrapper);
        assert_eq!("off".parse::<SmtpTls>().unwrap(), SmtpTls::None);
    }
}
