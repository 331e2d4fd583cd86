use axum::{extract::State, Json};

use crate::models::{OtpResult, SendOtpRequest, VerifyOtpRequest};
use crate::services::OtpService;
use crate::AppState;

/// Issue (or reissue) a code for a registered email
/// POST /api/v1/auth/otp/send
///
/// Raw endpoint: both outcomes answer 200 and the flag carries the
/// result, so clients branch on `success` rather than the status line.
pub async fn send_otp(
    State(state): State<AppState>,
    Json(req): Json<SendOtpRequest>,
) -> Json<OtpResult> {
    match OtpService::issue(&state.db, &state.config, state.mailer.as_ref(), &req.email).await {
        Ok(_) => Json(OtpResult::ok("OTP sent successfully.")),
        Err(err) => {
            tracing::warn!("OTP send failed for {}: {:?}", req.email, err);
            Json(OtpResult::failed(err.to_string()))
        }
    }
}

/// Check a code against the active challenge and consume it on success
/// POST /api/v1/auth/otp/verify
///
/// Consumption here does not flip the account's verified flag; that belongs
/// to the activation flow.
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(req): Json<VerifyOtpRequest>,
) -> Json<OtpResult> {
    match OtpService::verify(&state.db, &req.email, &req.otp).await {
        Ok(()) => Json(OtpResult::ok("OTP verified successfully.")),
        Err(err) => Json(OtpResult::failed(err.to_string())),
    }
}
