//! Service configuration
//!
//! Everything the authentication service needs is read once at startup
//! and passed down explicitly; business logic never reads the environment.

use anyhow::{Result, bail};
use std::time::Duration;

use crate::{jwt::JwtConfig, password::PasswordConfig};

/// Token and code lifetimes used by the session service
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Refresh token lifetime in seconds (default: 30 days)
    pub refresh_token_expiry: u64,
    /// Verification code lifetime in seconds (default: 15 minutes)
    pub verification_code_expiry: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_token_expiry: 30 * 24 * 60 * 60,
            verification_code_expiry: 15 * 60,
        }
    }
}

/// Dispatch queue sizing
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Buffered notifications before new ones are dropped
    pub capacity: usize,
    /// Pause between attempts to publish the same notification
    pub retry_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// Where credentials are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Postgres,
    /// Process memory, for local development only
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown credential store: {}", other)),
        }
    }
}

/// Authentication service configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub password: PasswordConfig,
    pub dispatch: DispatchConfig,
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// Cron expression of the expired refresh token sweep
    pub sweep_schedule: String,
    pub store: StoreBackend,
}

/// Upper bound for every token and code lifetime (10 years)
pub const MAX_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn lifetime(name: &str, default: u64) -> Result<u64> {
    let secs = env_or(name, default);
    if secs == 0 || secs > MAX_LIFETIME_SECS {
        bail!("{} must be between 1 and {} seconds, got {}", name, MAX_LIFETIME_SECS, secs);
    }
    Ok(secs)
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AuthConfig {
    /// Create a new AuthConfig from environment variables
    ///
    /// # Environment Variables
    /// - `JWT_SECRET`: HMAC secret for access tokens (required)
    /// - `JWT_ACCESS_TOKEN_EXPIRY`: Access token expiry in seconds (default: 900)
    /// - `REFRESH_TOKEN_EXPIRY`: Refresh token expiry in seconds (default: 2592000)
    /// - `VERIFICATION_CODE_EXPIRY`: Verification code expiry in seconds (default: 900)
    /// - `PASSWORD_MEMORY_KIB`, `PASSWORD_ITERATIONS`, `PASSWORD_PARALLELISM`: Argon2 cost
    /// - `DISPATCH_QUEUE_CAPACITY`: Dispatch buffer size (default: 100)
    /// - `DISPATCH_RETRY_BACKOFF_MS`: Publish retry back-off (default: 2000)
    /// - `BIND_ADDRESS`: HTTP listen address (default: "0.0.0.0:8081")
    /// - `TOKEN_SWEEP_SCHEDULE`: Cron schedule of the token sweep (default: hourly)
    /// - `CREDENTIAL_STORE`: "postgres" or "memory" (default: "postgres")
    ///
    /// Lifetimes outside `1..=MAX_LIFETIME_SECS` are rejected.
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable not set"))?;
        if secret.trim().is_empty() {
            bail!("JWT_SECRET must not be empty");
        }

        let password_defaults = PasswordConfig::default();
        let session_defaults = SessionConfig::default();
        let dispatch_defaults = DispatchConfig::default();

        let dispatch = DispatchConfig {
            capacity: env_or("DISPATCH_QUEUE_CAPACITY", dispatch_defaults.capacity),
            retry_backoff: std::env::var("DISPATCH_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(dispatch_defaults.retry_backoff),
        };
        if dispatch.capacity == 0 {
            bail!("DISPATCH_QUEUE_CAPACITY must be at least 1");
        }

        let store = match std::env::var("CREDENTIAL_STORE") {
            Ok(value) => value.parse::<StoreBackend>().map_err(anyhow::Error::msg)?,
            Err(_) => StoreBackend::default(),
        };

        Ok(AuthConfig {
            jwt: JwtConfig {
                secret,
                access_token_expiry: lifetime("JWT_ACCESS_TOKEN_EXPIRY", 900)?,
            },
            session: SessionConfig {
                refresh_token_expiry: lifetime(
                    "REFRESH_TOKEN_EXPIRY",
                    session_defaults.refresh_token_expiry,
                )?,
                verification_code_expiry: lifetime(
                    "VERIFICATION_CODE_EXPIRY",
                    session_defaults.verification_code_expiry,
                )?,
            },
            password: PasswordConfig {
                memory_kib: env_or("PASSWORD_MEMORY_KIB", password_defaults.memory_kib),
                iterations: env_or("PASSWORD_ITERATIONS", password_defaults.iterations),
                parallelism: env_or("PASSWORD_PARALLELISM", password_defaults.parallelism),
            },
            dispatch,
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8081".to_string()),
            sweep_schedule: std::env::var("TOKEN_SWEEP_SCHEDULE")
                .unwrap_or_else(|_| "0 0 * * * *".to_string()),
            store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "JWT_SECRET",
        "JWT_ACCESS_TOKEN_EXPIRY",
        "REFRESH_TOKEN_EXPIRY",
        "VERIFICATION_CODE_EXPIRY",
        "DISPATCH_QUEUE_CAPACITY",
        "DISPATCH_RETRY_BACKOFF_MS",
        "BIND_ADDRESS",
        "CREDENTIAL_STORE",
    ];

    fn clear() {
        for var in VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_missing_secret_is_fatal() {
        clear();
        assert!(AuthConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_blank_secret_is_fatal() {
        clear();
        unsafe {
            std::env::set_var("JWT_SECRET", "   ");
        }
        assert!(AuthConfig::from_env().is_err());
        clear();
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        unsafe {
            std::env::set_var("JWT_SECRET", "s3cret");
        }

        let config = AuthConfig::from_env().unwrap();
        assert_eq!(config.jwt.secret, "s3cret");
        assert_eq!(config.jwt.access_token_expiry, 900);
        assert_eq!(config.session.refresh_token_expiry, 2_592_000);
        assert_eq!(config.session.verification_code_expiry, 900);
        assert_eq!(config.dispatch.capacity, 100);
        assert_eq!(config.dispatch.retry_backoff, Duration::from_secs(2));
        assert_eq!(config.bind_address, "0.0.0.0:8081");
        assert_eq!(config.store, StoreBackend::Postgres);

        clear();
    }

    #[test]
    #[serial]
    fn test_custom_values() {
        clear();
        unsafe {
            std::env::set_var("JWT_SECRET", "s3cret");
            std::env::set_var("DISPATCH_QUEUE_CAPACITY", "5");
            std::env::set_var("DISPATCH_RETRY_BACKOFF_MS", "250");
            std::env::set_var("BIND_ADDRESS", "127.0.0.1:9000");
            std::env::set_var("CREDENTIAL_STORE", "Memory");
        }

        let config = AuthConfig::from_env().unwrap();
        assert_eq!(config.dispatch.capacity, 5);
        assert_eq!(config.dispatch.retry_backoff, Duration::from_millis(250));
        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.store, StoreBackend::Memory);

        clear();
    }

    #[test]
    #[serial]
    fn test_unknown_store_is_rejected() {
        clear();
        unsafe {
            std::env::set_var("JWT_SECRET", "s3cret");
            std::env::set_var("CREDENTIAL_STORE", "sqlite");
        }
        assert!(AuthConfig::from_env().is_err());
        clear();
    }

    #[test]
    #[serial]
    fn test_zero_capacity_is_rejected() {
        clear();
        unsafe {
            std::env::set_var("JWT_SECRET", "s3cret");
            std::env::set_var("DISPATCH_QUEUE_CAPACITY", "0");
        }
        assert!(AuthConfig::from_env().is_err());
        clear();
    }

    #[test]
    #[serial]
    fn test_out_of_range_lifetimes_are_rejected() {
        for (name, value) in [
            ("REFRESH_TOKEN_EXPIRY", "100000000000000"),
            ("REFRESH_TOKEN_EXPIRY", "18446744073709551615"),
            ("VERIFICATION_CODE_EXPIRY", "0"),
            ("JWT_ACCESS_TOKEN_EXPIRY", "315360001"),
        ] {
            clear();
            unsafe {
                std::env::set_var("JWT_SECRET", "s3cret");
                std::env::set_var(name, value);
            }
            assert!(AuthConfig::from_env().is_err(), "{}={} accepted", name, value);
        }
        clear();
    }

    #[test]
    #[serial]
    fn test_longest_lifetime_is_accepted() {
        clear();
        unsafe {
            std::env::set_var("JWT_SECRET", "s3cret");
            std::env::set_var("REFRESH_TOKEN_EXPIRY", MAX_LIFETIME_SECS.to_string());
        }

        let config = AuthConfig::from_env().unwrap();
        assert_eq!(config.session.refresh_token_expiry, MAX_LIFETIME_SECS);
        clear();
    }
}
