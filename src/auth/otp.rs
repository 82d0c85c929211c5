//! One-time login codes.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

/// A stored one-time login code.
#[derive(Debug, Clone, FromRow)]
pub struct OtpCode {
    pub id: String,
    pub email: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Repository for one-time login codes.
#[derive(Debug, Clone)]
pub struct OtpRepository {
    pool: SqlitePool,
}

impl OtpRepository {
    /// Create a new repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Generate and store a fresh 6-digit code for an email address.
    pub async fn create(&self, email: &str, ttl: chrono::Duration) -> Result<OtpCode> {
        let now = Utc::now();
        let otp = OtpCode {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            code: generate_code(),
            expires_at: now + ttl,
            created_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO otp_codes (id, email, code, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&otp.id)
        .bind(&otp.email)
        .bind(&otp.code)
        .bind(otp.expires_at)
        .bind(otp.created_at)
        .execute(&self.pool)
        .await
        .context("storing login code")?;

        Ok(otp)
    }

    /// Verify a code for an email address. A matching, unexpired code is
    /// deleted so it cannot be replayed. Returns whether the code was valid.
    pub async fn consume(&self, email: &str, code: &str) -> Result<bool> {
        let now = Utc::now();
        let found = sqlx::query_scalar::<_, String>(
            r#"
            SELECT id FROM otp_codes
            WHERE email = ? AND code = ? AND expires_at > ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(email)
        .bind(code)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("verifying login code")?;

        let Some(id) = found else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM otp_codes WHERE id = ?")
            .bind(&id)
            .execute(&self.pool)
            .await
            .context("deleting used login code")?;

        Ok(true)
    }
}

/// Random 6-digit code, zero-padded.
fn generate_code() -> String {
    let n: u32 = rand::rng().random_range(0..1_000_000);
    format!("{n:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_code_shape() {
        for _ in 0..32 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
