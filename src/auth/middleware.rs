//! Token validation middleware and the current-user extractor.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use std::sync::Arc;

use super::claims::Claims;
use super::config::AuthConfig;
use super::error::AuthError;
use crate::api::ApiError;

/// Fallback signing secret for development setups without a configured one.
const DEV_SECRET: &str = "sceneon-dev-secret-change-me-before-deploying";

/// Shared authentication state: configuration plus the derived signing keys.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl AuthState {
    /// Create auth state from configuration.
    pub fn new(config: AuthConfig) -> Self {
        let secret = config.jwt_secret.clone().unwrap_or_else(|| {
            tracing::warn!("no auth.jwt_secret configured, using the development fallback");
            DEV_SECRET.to_string()
        });

        Self {
            config: Arc::new(config),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// One-time login code lifetime.
    pub fn otp_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.config.otp_ttl_minutes)
    }

    /// Issue an access token for a user.
    pub fn issue_token(&self, user_id: &str, email: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            exp: (now + chrono::Duration::hours(self.config.token_ttl_hours)).timestamp(),
            iat: Some(now.timestamp()),
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("signing token: {e}")))
    }

    /// Validate an access token and return its claims.
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::default();
        validation.set_required_spec_claims(&["sub", "exp"]);

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }
}

/// The authenticated caller, inserted by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub claims: Claims,
}

impl CurrentUser {
    /// The caller's user id.
    pub fn id(&self) -> &str {
        &self.claims.sub
    }

    /// The caller's email.
    pub fn email(&self) -> &str {
        &self.claims.email
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Not authenticated"))
    }
}

/// Middleware validating the bearer token and attaching [`CurrentUser`].
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or(AuthError::MissingAuthHeader)?;
    let claims = auth.verify_token(token)?;

    request.extensions_mut().insert(CurrentUser { claims });
    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let auth = AuthState::new(AuthConfig::default());
        let token = auth.issue_token("usr-1", "a@example.com").unwrap();
        let claims = auth.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "usr-1");
        assert_eq!(claims.email, "a@example.com");
    }

    #[test]
    fn test_garbage_token_is_rejected() {
        let auth = AuthState::new(AuthConfig::default());
        assert!(matches!(
            auth.verify_token("not-a-token"),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_token_from_other_secret_is_rejected() {
        let issuer = AuthState::new(AuthConfig {
            jwt_secret: Some("another-secret-that-is-long-enough-to-pass".to_string()),
            ..AuthConfig::default()
        });
        let verifier = AuthState::new(AuthConfig::default());

        let token = issuer.issue_token("usr-1", "a@example.com").unwrap();
        assert!(verifier.verify_token(&token).is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(AuthConfig::default().validate().is_ok());
        let short = AuthConfig {
            jwt_secret: Some("short".to_string()),
            ..AuthConfig::default()
        };
        assert!(short.validate().is_err());
    }
}
