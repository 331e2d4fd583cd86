use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::error::AppError;
use crate::models::{Account, OtpChallenge};
use crate::services::identity::IdentityService;
use crate::services::mailer::{activation_email, Mailer};

/// Number of digits in a verification code.
pub const OTP_CODE_LEN: usize = 6;

/// Closed set of challenge outcomes. Handlers and the activation flow branch
/// on variants, never on message strings; `From<OtpError> for AppError` below
/// is the only place these are turned into HTTP-facing errors.
#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("Email not registered.")]
    UnknownRecipient,

    #[error("No OTP was issued for this email. Please request one first.")]
    NoActiveChallenge,

    #[error("Invalid OTP. Please try again.")]
    CodeMismatch,

    #[error("OTP has expired. Please resend OTP.")]
    Expired,

    #[error("This OTP has already been used. Please request a new one.")]
    AlreadyConsumed,

    #[error("Failed to send OTP email. Please verify your email address.")]
    Dispatch(String),

    #[error("Database error")]
    Database(#[from] sqlx::Error),
}

impl From<OtpError> for AppError {
    fn from(err: OtpError) -> Self {
        let message = err.to_string();
        match err {
            OtpError::Database(e) => AppError::Database(e),
            OtpError::Dispatch(detail) => {
                tracing::error!("OTP dispatch failed: {}", detail);
                AppError::EmailDispatch(message)
            }
            OtpError::UnknownRecipient => AppError::NotFound(message),
            OtpError::NoActiveChallenge
            | OtpError::CodeMismatch
            | OtpError::Expired
            | OtpError::AlreadyConsumed => AppError::BadRequest(message),
        }
    }
}

/// Challenge lifecycle: issue, supersede, verify, consume.
pub struct OtpService;

impl OtpService {
    fn generate_code() -> String {
        let n: u32 = OsRng.gen_range(0..1_000_000);
        format!("{:0width$}", n, width = OTP_CODE_LEN)
    }

    /// Codes are stored hashed, so a leaked challenge row does not leak the
    /// code itself.
    pub fn hash_code(code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(code.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn is_expired(challenge: &OtpChallenge, now: DateTime<Utc>) -> bool {
        match DateTime::parse_from_rfc3339(&challenge.expires_at) {
            Ok(expires) => expires.with_timezone(&Utc) < now,
            Err(_) => true,
        }
    }

    async fn current_challenge(
        db: &Database,
        email: &str,
    ) -> Result<Option<OtpChallenge>, OtpError> {
        let challenge: Option<OtpChallenge> = sqlx::query_as(
            "SELECT * FROM otp_challenges WHERE email = ? ORDER BY issued_at DESC LIMIT 1",
        )
        .bind(email)
        .fetch_optional(db.pool())
        .await?;

        Ok(challenge)
    }

    /// The live challenge for an email, if one exists and is still usable.
    pub async fn active_challenge(
        db: &Database,
        email: &str,
    ) -> Result<Option<OtpChallenge>, OtpError> {
        let email = IdentityService::normalize_email(email);
        let challenge = Self::current_challenge(db, &email).await?;

        Ok(challenge.filter(|c| !c.is_consumed() && !Self::is_expired(c, Utc::now())))
    }

    /// Issue a fresh challenge for `email`, superseding any previous one.
    ///
    /// The supersede, the insert and the `registration_incomplete` reset all
    /// ride one transaction that commits only after the email goes out, so a
    /// dispatch failure leaves any previous challenge untouched.
    pub async fn issue(
        db: &Database,
        config: &Config,
        mailer: &dyn Mailer,
        email: &str,
    ) -> Result<OtpChallenge, OtpError> {
        let email = IdentityService::normalize_email(email);

        let account: Option<Account> = sqlx::query_as("SELECT * FROM accounts WHERE email = ?")
            .bind(&email)
            .fetch_optional(db.pool())
            .await?;
        let account = account.ok_or(OtpError::UnknownRecipient)?;

        let code = Self::generate_code();
        let now = Utc::now();
        let challenge = OtpChallenge {
            id: Uuid::new_v4().to_string(),
            email: email.clone(),
            code_hash: Self::hash_code(&code),
            issued_at: now.to_rfc3339(),
            expires_at: (now + Duration::seconds(config.otp.ttl_seconds as i64)).to_rfc3339(),
            consumed_at: None,
        };

        let mut tx = db.pool().begin().await?;

        sqlx::query("DELETE FROM otp_challenges WHERE email = ?")
            .bind(&email)
            .execute(tx.as_mut())
            .await?;

        sqlx::query(
            r#"
            INSERT INTO otp_challenges (id, email, code_hash, issued_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&challenge.id)
        .bind(&challenge.email)
        .bind(&challenge.code_hash)
        .bind(&challenge.issued_at)
        .bind(&challenge.expires_at)
        .execute(tx.as_mut())
        .await?;

        sqlx::query("UPDATE accounts SET registration_incomplete = 0, updated_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(&account.id)
            .execute(tx.as_mut())
            .await?;

        let ttl_minutes = (config.otp.ttl_seconds / 60).max(1);
        let mail = activation_email(&email, &account.name, &code, ttl_minutes);
        if let Err(err) = mailer.send(&mail).await {
            tx.rollback().await?;
            return Err(OtpError::Dispatch(err.to_string()));
        }

        tx.commit().await?;

        tracing::info!("OTP issued for {} (expires {})", email, challenge.expires_at);
        Ok(challenge)
    }

    /// Check a submitted code. Outcomes are ranked: a consumed challenge
    /// reports as consumed even if it has also expired, and expiry wins over
    /// a wrong digit.
    pub async fn verify(db: &Database, email: &str, code: &str) -> Result<(), OtpError> {
        let email = IdentityService::normalize_email(email);

        let challenge = Self::current_challenge(db, &email)
            .await?
            .ok_or(OtpError::NoActiveChallenge)?;

        if challenge.is_consumed() {
            return Err(OtpError::AlreadyConsumed);
        }
        if Self::is_expired(&challenge, Utc::now()) {
            return Err(OtpError::Expired);
        }
        if Self::hash_code(code) != challenge.code_hash {
            return Err(OtpError::CodeMismatch);
        }

        // Single use: of two concurrent submits with the right code, exactly
        // one sees its row update land.
        let result = sqlx::query(
            "UPDATE otp_challenges SET consumed_at = ? WHERE id = ? AND consumed_at IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&challenge.id)
        .execute(db.pool())
        .await?;

        if result.rows_affected() != 1 {
            return Err(OtpError::AlreadyConsumed);
        }

        tracing::info!("OTP verified for {}", email);
        Ok(())
    }
}
