use axum::{extract::State, http::HeaderMap, Json};

use crate::error::{ApiResponse, Result};
use crate::middleware::auth::resolve_current_identity;
use crate::models::ActivationVerifyRequest;
use crate::services::activation::{
    ActivationContext, ActivationFlow, ActivationState, ActivationStatus,
};
use crate::AppState;

async fn context(state: &AppState, headers: &HeaderMap) -> Result<ActivationContext> {
    let identity = resolve_current_identity(state, headers).await?;
    Ok(match identity {
        Some(user) => ActivationContext::authenticated(user),
        None => ActivationContext::anonymous(),
    })
}

fn flow<'a>(state: &'a AppState, ctx: ActivationContext) -> ActivationFlow<'a> {
    ActivationFlow::new(
        ctx,
        &state.db,
        &state.config,
        state.mailer.as_ref(),
        &state.activations,
    )
}

/// Where the caller stands in the activation handshake
/// GET /api/v1/auth/activation
pub async fn activation_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<ActivationStatus>>> {
    let ctx = context(&state, &headers).await?;
    let status = flow(&state, ctx).enter().await?;

    let response = match status.state {
        ActivationState::AwaitingEmail => {
            ApiResponse::success_with_message("No user logged in. Please register again.", status)
        }
        ActivationState::Activated => ApiResponse::success_with_message(
            "Your account is now active. Welcome to Item Retriever!",
            status,
        ),
        _ => ApiResponse::success(status),
    };

    Ok(Json(response))
}

/// Submit the emailed code
/// POST /api/v1/auth/activation/verify
pub async fn activation_verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ActivationVerifyRequest>,
) -> Result<Json<ApiResponse<ActivationStatus>>> {
    let ctx = context(&state, &headers).await?;
    let status = flow(&state, ctx).submit(&req.otp).await?;

    Ok(Json(ApiResponse::success_with_message(
        "Your account is now active. Welcome to Item Retriever!",
        status,
    )))
}

/// Request a replacement code once the countdown has expired
/// POST /api/v1/auth/activation/resend
pub async fn activation_resend(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<ActivationStatus>>> {
    let ctx = context(&state, &headers).await?;
    let status = flow(&state, ctx).resend().await?;

    let message = match (status.state, status.email.as_deref()) {
        (ActivationState::Activated, _) => {
            "Your account is now active. Welcome to Item Retriever!".to_string()
        }
        (_, Some(email)) => format!("A new OTP has been sent to {}.", email),
        (_, None) => "A new OTP has been sent.".to_string(),
    };

    Ok(Json(ApiResponse::success_with_message(&message, status)))
}
