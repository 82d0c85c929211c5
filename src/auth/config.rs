//! Authentication configuration.

use serde::{Deserialize, Serialize};

/// Authentication configuration, loaded from the `[auth]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Secret used to sign access tokens. A development fallback is used
    /// when unset; set one in production.
    pub jwt_secret: Option<String>,

    /// Access token lifetime in hours.
    pub token_ttl_hours: i64,

    /// One-time login code lifetime in minutes.
    pub otp_ttl_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_hours: 24,
            otp_ttl_minutes: 15,
        }
    }
}

impl AuthConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref secret) = self.jwt_secret {
            if secret.len() < 32 {
                return Err("auth.jwt_secret must be at least 32 characters".to_string());
            }
        }
        if self.token_ttl_hours <= 0 {
            return Err("auth.token_ttl_hours must be positive".to_string());
        }
        if self.otp_ttl_minutes <= 0 {
            return Err("auth.otp_ttl_minutes must be positive".to_string());
        }
        Ok(())
    }
}
