use axum::{extract::State, Extension, Json};

use crate::error::{ApiResponse, Result};
use crate::models::{AccountResponse, CurrentUser};
use crate::services::IdentityService;
use crate::AppState;

/// Get current account profile
/// GET /api/v1/user/profile
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<AccountResponse>>> {
    let account = IdentityService::get_account(&state.db, &current_user.id).await?;
    Ok(Json(ApiResponse::success(account.into())))
}
