use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{ActivationHandoff, RegisterRequest, RegisterResponse};
use crate::services::activation::ActivationSessions;
use crate::services::identity::IdentityService;
use crate::services::mailer::Mailer;
use crate::services::otp::OtpService;

/// Registration flow: validate, create the unverified account, kick off the
/// OTP handshake and hand the caller over to the activation flow.
pub struct RegistrationService;

impl RegistrationService {
    /// Field checks, before any I/O.
    fn validate(req: &RegisterRequest) -> Result<()> {
        if req.name.trim().is_empty() {
            return Err(AppError::BadRequest("Name is required".to_string()));
        }
        if !IdentityService::is_valid_email(&IdentityService::normalize_email(&req.email)) {
            return Err(AppError::BadRequest("Invalid email address".to_string()));
        }
        if req.mobile.trim().len() < 10 {
            return Err(AppError::BadRequest(
                "Mobile number must be at least 10 digits".to_string(),
            ));
        }
        if req.dob.trim().is_empty() {
            return Err(AppError::BadRequest("Date of birth is required".to_string()));
        }
        if req.address.trim().is_empty() {
            return Err(AppError::BadRequest("Address is required".to_string()));
        }
        if req.password.len() < 8 {
            return Err(AppError::BadRequest(
                "Password must be at least 8 characters".to_string(),
            ));
        }
        if req.password != req.confirm_password {
            return Err(AppError::BadRequest("Passwords do not match".to_string()));
        }

        Ok(())
    }

    pub async fn register(
        db: &Database,
        config: &Config,
        mailer: &dyn Mailer,
        sessions: &ActivationSessions,
        req: RegisterRequest,
    ) -> Result<RegisterResponse> {
        Self::validate(&req)?;

        let account = IdentityService::create_account(db, &req).await?;
        tracing::info!("Account created for {} (unverified)", account.email);

        let challenge = match OtpService::issue(db, config, mailer, &account.email).await {
            Ok(challenge) => challenge,
            Err(err) => {
                // The account stays; recovery is log in, land on the
                // activation screen in its expired state, resend from there.
                IdentityService::mark_registration_incomplete(db, &account.id).await?;
                tracing::warn!(
                    "Registration for {} kept without a dispatched OTP: {}",
                    account.email,
                    err
                );
                return Err(err.into());
            }
        };

        sessions.establish(&account.id, &account.email, &challenge.expires_at);

        let access_token = IdentityService::issue_token(&account, config)?;
        let activation = ActivationHandoff {
            email: account.email.clone(),
            expires_in_secs: config.otp.ttl_seconds,
        };

        Ok(RegisterResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: config.jwt.access_token_expire_minutes * 60,
            account: account.into(),
            activation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_database;
    use crate::models::{Gender, Role};
    use crate::services::mailer::test_support::{FailingMailer, RecordingMailer};

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            name: "Ada Lovelace".to_string(),
            email: email.to_string(),
            mobile: "0123456789".to_string(),
            dob: "1990-01-01".to_string(),
            gender: Gender::Female,
            address: "1 Main St".to_string(),
            role: Role::User,
            password: "password1".to_string(),
            confirm_password: "password1".to_string(),
        }
    }

    async fn challenge_count(db: &Database, email: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM otp_challenges WHERE email = ?")
            .bind(email)
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn register_creates_account_challenge_and_session() {
        let db = open_test_database().await;
        let mailer = RecordingMailer::default();
        let sessions = ActivationSessions::default();

        let resp = RegistrationService::register(
            &db,
            &Config::default(),
            &mailer,
            &sessions,
            register_request("Ada@Example.com"),
        )
        .await
        .unwrap();

        assert!(!resp.access_token.is_empty());
        assert_eq!(resp.account.email, "ada@example.com");
        assert!(!resp.account.email_verified);
        assert_eq!(resp.activation.email, "ada@example.com");
        assert_eq!(resp.activation.expires_in_secs, 300);

        assert_eq!(mailer.sent_count(), 1);
        assert_eq!(challenge_count(&db, "ada@example.com").await, 1);
        assert!(sessions.snapshot(&resp.account.id).is_some());
    }

    #[tokio::test]
    async fn register_rejects_bad_payloads() {
        let db = open_test_database().await;
        let mailer = RecordingMailer::default();
        let sessions = ActivationSessions::default();
        let config = Config::default();

        let cases = [
            (
                RegisterRequest { name: "  ".to_string(), ..register_request("a@example.com") },
                "Name is required",
            ),
            (
                RegisterRequest { email: "not-an-email".to_string(), ..register_request("x") },
                "Invalid email address",
            ),
            (
                RegisterRequest { mobile: "12345".to_string(), ..register_request("a@example.com") },
                "Mobile number must be at least 10 digits",
            ),
            (
                RegisterRequest { dob: String::new(), ..register_request("a@example.com") },
                "Date of birth is required",
            ),
            (
                RegisterRequest { address: String::new(), ..register_request("a@example.com") },
                "Address is required",
            ),
            (
                RegisterRequest {
                    password: "short".to_string(),
                    confirm_password: "short".to_string(),
                    ..register_request("a@example.com")
                },
                "Password must be at least 8 characters",
            ),
            (
                RegisterRequest {
                    confirm_password: "password2".to_string(),
                    ..register_request("a@example.com")
                },
                "Passwords do not match",
            ),
        ];

        for (req, expected) in cases {
            let err = RegistrationService::register(&db, &config, &mailer, &sessions, req)
                .await
                .unwrap_err();
            match err {
                AppError::BadRequest(msg) => assert_eq!(msg, expected),
                other => panic!("expected bad request for {expected:?}, got {other:?}"),
            }
        }

        // Nothing was created along the way.
        assert_eq!(mailer.sent_count(), 0);
        assert_eq!(challenge_count(&db, "a@example.com").await, 0);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_without_side_effects() {
        let db = open_test_database().await;
        let mailer = RecordingMailer::default();
        let sessions = ActivationSessions::default();
        let config = Config::default();

        RegistrationService::register(
            &db,
            &config,
            &mailer,
            &sessions,
            register_request("ada@example.com"),
        )
        .await
        .unwrap();

        let err = RegistrationService::register(
            &db,
            &config,
            &mailer,
            &sessions,
            register_request("ADA@example.com"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(mailer.sent_count(), 1);
        assert_eq!(challenge_count(&db, "ada@example.com").await, 1);
    }

    #[tokio::test]
    async fn dispatch_failure_keeps_account_flags_it_and_skips_session() {
        let db = open_test_database().await;
        let sessions = ActivationSessions::default();

        let err = RegistrationService::register(
            &db,
            &Config::default(),
            &FailingMailer,
            &sessions,
            register_request("ada@example.com"),
        )
        .await
        .unwrap_err();

        match err {
            AppError::EmailDispatch(msg) => {
                assert_eq!(msg, "Failed to send OTP email. Please verify your email address.")
            }
            other => panic!("expected dispatch error, got {other:?}"),
        }

        let account = IdentityService::find_by_email(&db, "ada@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(account.registration_incomplete);
        assert!(!account.email_verified);
        assert_eq!(challenge_count(&db, "ada@example.com").await, 0);
        assert!(sessions.snapshot(&account.id).is_none());
    }
}
