use axum::{extract::State, Extension, Json};

use crate::error::{ApiResponse, Result};
use crate::models::{CurrentUser, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use crate::services::{IdentityService, RegistrationService};
use crate::AppState;

/// Register a new account and start the activation handshake
/// POST /api/v1/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<ApiResponse<RegisterResponse>>> {
    let response = RegistrationService::register(
        &state.db,
        &state.config,
        state.mailer.as_ref(),
        &state.activations,
        req,
    )
    .await?;

    Ok(Json(ApiResponse::success_with_message(
        "Check your email for the OTP to activate your account.",
        response,
    )))
}

/// Login with email and password
/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>> {
    let account = IdentityService::authenticate(&state.db, &req.email, &req.password).await?;
    let access_token = IdentityService::issue_token(&account, &state.config)?;

    Ok(Json(ApiResponse::success(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.jwt.access_token_expire_minutes * 60,
        account: account.into(),
    })))
}

/// Logout: drop the caller's activation session. The bearer token itself is
/// stateless and simply expires.
/// POST /api/v1/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<()>>> {
    state.activations.remove(&current_user.id);
    Ok(Json(ApiResponse::<()>::success_message("Signed out.")))
}
