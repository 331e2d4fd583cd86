use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One issued OTP challenge. The code itself is never stored, only its
/// sha256; timestamps are RFC 3339 strings like every other table.
#[derive(Debug, Clone, FromRow)]
pub struct OtpChallenge {
    pub id: String,
    pub email: String,
    pub code_hash: String,
    pub issued_at: String,
    pub expires_at: String,
    pub consumed_at: Option<String>,
}

impl OtpChallenge {
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }
}

/// Request body for POST /auth/otp/send
#[derive(Debug, Deserialize)]
pub struct SendOtpRequest {
    pub email: String,
}

/// Request body for POST /auth/otp/verify
#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

/// Request body for POST /auth/activation/verify
#[derive(Debug, Deserialize)]
pub struct ActivationVerifyRequest {
    pub otp: String,
}

/// Plain `{ success, message }` body used by the raw OTP endpoints, which
/// always answer 200 and carry the outcome in the flag.
#[derive(Debug, Serialize)]
pub struct OtpResult {
    pub success: bool,
    pub message: String,
}

impl OtpResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
