use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{Account, Claims, RegisterRequest};

/// Identity store service: account records, credentials and session tokens.
///
/// `email_verified` and `verified_at` are only ever written through
/// `mark_email_verified`, which the activation flow alone calls.
pub struct IdentityService;

impl IdentityService {
    /// Emails are matched case-insensitively everywhere, so they are stored
    /// trimmed and lowercased.
    pub fn normalize_email(raw: &str) -> String {
        raw.trim().to_lowercase()
    }

    /// Syntactic check only; ownership is proven by the OTP handshake.
    pub fn is_valid_email(email: &str) -> bool {
        let Some((local, domain)) = email.split_once('@') else {
            return false;
        };
        !local.is_empty()
            && !domain.is_empty()
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
            && !email.contains(char::is_whitespace)
    }

    /// Get account by ID
    pub async fn get_account(db: &Database, account_id: &str) -> Result<Account> {
        let account: Account = sqlx::query_as("SELECT * FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Account not found".to_string()))?;

        Ok(account)
    }

    /// Get account by normalized email
    pub async fn find_by_email(db: &Database, email: &str) -> Result<Option<Account>> {
        let account: Option<Account> = sqlx::query_as("SELECT * FROM accounts WHERE email = ?")
            .bind(email)
            .fetch_optional(db.pool())
            .await?;

        Ok(account)
    }

    /// Create the account record with `email_verified = false`.
    ///
    /// The caller is expected to have validated the payload; this only
    /// enforces what the store itself guarantees (one account per email).
    pub async fn create_account(db: &Database, req: &RegisterRequest) -> Result<Account> {
        let email = Self::normalize_email(&req.email);

        // Check if email already exists
        let existing = Self::find_by_email(db, &email).await?;
        if existing.is_some() {
            return Err(AppError::Conflict(
                "Email already registered. Please log in or reset your password.".to_string(),
            ));
        }

        // Hash password
        let password_hash = Self::hash_password(&req.password)?;

        // Create account
        let account_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO accounts (id, email, name, mobile, dob, gender, address, role,
                                  password_hash, email_verified, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&account_id)
        .bind(&email)
        .bind(req.name.trim())
        .bind(req.mobile.trim())
        .bind(req.dob.trim())
        .bind(req.gender.as_str())
        .bind(req.address.trim())
        .bind(req.role.as_str())
        .bind(&password_hash)
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await?;

        Self::get_account(db, &account_id).await
    }

    /// Verify credentials for login
    pub async fn authenticate(db: &Database, email: &str, password: &str) -> Result<Account> {
        let email = Self::normalize_email(email);

        let account = Self::find_by_email(db, &email)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid email or password".to_string()))?;

        if !Self::verify_password(password, &account.password_hash)? {
            return Err(AppError::Unauthorized("Invalid email or password".to_string()));
        }

        Ok(account)
    }

    /// Flip the verification flag; called by the activation flow after a
    /// successful OTP handshake.
    pub async fn mark_email_verified(db: &Database, account_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE accounts SET email_verified = 1, verified_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&now)
        .bind(&now)
        .bind(account_id)
        .execute(db.pool())
        .await?;

        Ok(())
    }

    /// Record that the account exists but its activation code never went out
    /// (see the registration flow's dispatch-failure policy).
    pub async fn mark_registration_incomplete(db: &Database, account_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE accounts SET registration_incomplete = 1, updated_at = ? WHERE id = ?",
        )
        .bind(&now)
        .bind(account_id)
        .execute(db.pool())
        .await?;

        Ok(())
    }

    /// Generate access token (JWT)
    pub fn issue_token(account: &Account, config: &Config) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::minutes(config.jwt.access_token_expire_minutes as i64);

        let claims = Claims {
            sub: account.id.clone(),
            email: account.email.clone(),
            role: account.role.clone(),
            jti: Uuid::new_v4().to_string(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt.secret.as_bytes()),
        )?;

        Ok(token)
    }

    /// Validate access token and extract claims
    pub fn validate_token(token: &str, config: &Config) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let keys = std::iter::once(config.jwt.secret.as_str())
            .chain(config.jwt.previous_secrets.iter().map(|s| s.as_str()));

        for secret in keys {
            if let Ok(token_data) = decode::<Claims>(
                token,
                &DecodingKey::from_secret(secret.as_bytes()),
                &validation,
            ) {
                return Ok(token_data.claims);
            }
        }

        Err(AppError::Unauthorized("Invalid token".to_string()))
    }

    /// Hash password using Argon2
    fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?
            .to_string();

        Ok(password_hash)
    }

    /// Verify password against hash
    fn verify_password(password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_database;
    use crate::models::{Gender, Role};

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            name: "Ada Lovelace".to_string(),
            email: email.to_string(),
            mobile: "0123456789".to_string(),
            dob: "1990-01-01".to_string(),
            gender: Gender::Other,
            address: "1 Main St".to_string(),
            role: Role::User,
            password: "password1".to_string(),
            confirm_password: "password1".to_string(),
        }
    }

    #[test]
    fn email_syntax_check() {
        assert!(IdentityService::is_valid_email("ada@example.com"));
        assert!(IdentityService::is_valid_email("a.b+c@mail.example.org"));
        assert!(!IdentityService::is_valid_email("ada"));
        assert!(!IdentityService::is_valid_email("ada@"));
        assert!(!IdentityService::is_valid_email("@example.com"));
        assert!(!IdentityService::is_valid_email("ada@nodot"));
        assert!(!IdentityService::is_valid_email("ada@.com"));
        assert!(!IdentityService::is_valid_email("a da@example.com"));
    }

    #[test]
    fn email_is_normalized() {
        assert_eq!(
            IdentityService::normalize_email("  Ada@Example.COM "),
            "ada@example.com"
        );
    }

    #[tokio::test]
    async fn create_account_starts_unverified() {
        let db = open_test_database().await;
        let account = IdentityService::create_account(&db, &register_request("Ada@Example.com"))
            .await
            .unwrap();

        assert_eq!(account.email, "ada@example.com");
        assert!(!account.email_verified);
        assert!(account.verified_at.is_none());
        assert!(!account.registration_incomplete);
        assert_ne!(account.password_hash, "password1");
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let db = open_test_database().await;
        IdentityService::create_account(&db, &register_request("ada@example.com"))
            .await
            .unwrap();

        let err = IdentityService::create_account(&db, &register_request("ADA@example.com"))
            .await
            .unwrap_err();
        match err {
            AppError::Conflict(msg) => {
                assert_eq!(msg, "Email already registered. Please log in or reset your password.")
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn authenticate_checks_password() {
        let db = open_test_database().await;
        IdentityService::create_account(&db, &register_request("ada@example.com"))
            .await
            .unwrap();

        let account = IdentityService::authenticate(&db, "ada@example.com", "password1")
            .await
            .unwrap();
        assert_eq!(account.email, "ada@example.com");

        assert!(matches!(
            IdentityService::authenticate(&db, "ada@example.com", "wrong").await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            IdentityService::authenticate(&db, "nobody@example.com", "password1").await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn mark_email_verified_sets_timestamp() {
        let db = open_test_database().await;
        let account = IdentityService::create_account(&db, &register_request("ada@example.com"))
            .await
            .unwrap();

        IdentityService::mark_email_verified(&db, &account.id).await.unwrap();

        let account = IdentityService::get_account(&db, &account.id).await.unwrap();
        assert!(account.email_verified);
        assert!(account.verified_at.is_some());
    }

    #[tokio::test]
    async fn token_round_trip_and_rotation() {
        let db = open_test_database().await;
        let account = IdentityService::create_account(&db, &register_request("ada@example.com"))
            .await
            .unwrap();

        let mut old = Config::default();
        old.jwt.secret = "first-secret".to_string();
        let token = IdentityService::issue_token(&account, &old).unwrap();

        let claims = IdentityService::validate_token(&token, &old).unwrap();
        assert_eq!(claims.sub, account.id);
        assert_eq!(claims.email, "ada@example.com");

        // Token survives a secret rotation via previous_secrets
        let mut rotated = Config::default();
        rotated.jwt.secret = "second-secret".to_string();
        rotated.jwt.previous_secrets = vec!["first-secret".to_string()];
        assert!(IdentityService::validate_token(&token, &rotated).is_ok());

        let mut unrelated = Config::default();
        unrelated.jwt.secret = "third-secret".to_string();
        assert!(IdentityService::validate_token(&token, &unrelated).is_err());
    }
}
