use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::error::{AppError, Result};
use crate::models::{CurrentUser, Role};
use crate::services::IdentityService;
use crate::AppState;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Resolve the caller's identity from the Authorization header, once.
///
/// The activation endpoints accept anonymous callers (they answer with the
/// awaiting-email state), so a missing header, a stale token or a deleted
/// account all resolve to `None` rather than an error.
pub async fn resolve_current_identity(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<CurrentUser>> {
    let Some(token) = bearer_token(headers) else {
        return Ok(None);
    };

    let Ok(claims) = IdentityService::validate_token(token, &state.config) else {
        return Ok(None);
    };

    let account = match IdentityService::get_account(&state.db, &claims.sub).await {
        Ok(account) => account,
        Err(AppError::NotFound(_)) => return Ok(None),
        Err(err) => return Err(err),
    };

    Ok(Some(CurrentUser {
        id: account.id,
        email: account.email,
        role: Role::from_str(&account.role),
    }))
}

/// Authentication middleware
/// Extracts and validates JWT from Authorization header
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let token = bearer_token(request.headers()).ok_or_else(|| {
        AppError::Unauthorized("Missing or invalid Authorization header".to_string())
    })?;

    // Validate token
    let claims = IdentityService::validate_token(token, &state.config)?;

    let (email, role): (String, String) =
        sqlx::query_as("SELECT email, role FROM accounts WHERE id = ?")
            .bind(&claims.sub)
            .fetch_one(state.db.pool())
            .await
            .map_err(|_| AppError::Unauthorized("Invalid token".to_string()))?;

    let current_user = CurrentUser {
        id: claims.sub,
        email,
        role: Role::from_str(&role),
    };
    tracing::debug!(
        "Authenticated {} ({})",
        current_user.email,
        current_user.role.as_str()
    );

    // Insert current user into request extensions
    request.extensions_mut().insert(current_user);

    Ok(next.run(request).await)
}
