//! Authentication API handlers

use crate::api::handlers::AppState;
use crate::auth::middleware::AuthUser;
use crate::auth::models::{
    ChangePasswordRequest, ChangePasswordResponse, ForgotPasswordRequest, ForgotPasswordResponse,
    LoginRequest, LoginResponse, MessageResponse, RegisterRequest, RegisterResponse,
    ResetPasswordRequest, UpdateProfileRequest, UserInfo,
};
use crate::auth::policy::{validate_phone, validate_username, Registration};
use crate::auth::renewal::NEW_TOKEN_HEADER;
use crate::auth::service::RESET_REQUESTED_MESSAGE;
use crate::core::error::{Result, RentError};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;

/// Handler for POST /api/users/register - User registration
pub async fn register(
    State(state): State<AppState>,
    body: std::result::Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(req) = body?;
    let registration = Registration::parse(&req.username, &req.email, &req.password, req.phone.as_deref())?;

    tracing::info!(username = %registration.username, "User registration attempt");
    let user_id = state.auth_service.register(registration, Utc::now()).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            user_id,
        }),
    ))
}

/// Handler for POST /api/users/login - User login
pub async fn login(
    State(state): State<AppState>,
    body: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>> {
    let Json(req) = body?;
    let outcome = state.auth_service.login(&req.email, &req.password, Utc::now()).await?;

    let expires_at = outcome
        .session
        .claims
        .expires_at()
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();

    Ok(Json(LoginResponse {
        token: outcome.session.token,
        expires_at,
        user: UserInfo::from(&outcome.user),
    }))
}

/// Handler for POST /api/users/forgot-password
pub async fn forgot_password(
    State(state): State<AppState>,
    body: std::result::Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> Result<Json<ForgotPasswordResponse>> {
    let Json(req) = body?;
    let reset_token = state.auth_service.request_reset(&req.email, Utc::now()).await?;

    Ok(Json(ForgotPasswordResponse {
        message: RESET_REQUESTED_MESSAGE.to_string(),
        reset_token,
    }))
}

/// Handler for POST /api/users/reset-password
pub async fn reset_password(
    State(state): State<AppState>,
    body: std::result::Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    let Json(req) = body?;
    state
        .auth_service
        .consume_reset(&req.token, &req.new_password, Utc::now())
        .await?;

    Ok(Json(MessageResponse::new(
        "Password has been reset. Please log in with your new password",
    )))
}

/// Handler for POST /api/users/change-password
///
/// The change invalidates the presented token, so a fresh one is returned in
/// the body and in `X-New-Token`.
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    body: std::result::Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(req) = body?;
    let issued = state
        .auth_service
        .change_password(&user.id, &req.current_password, &req.new_password, Utc::now())
        .await?;

    let header = HeaderValue::from_str(&issued.token)
        .map_err(|e| RentError::TokenError(format!("Token is not a valid header value: {}", e)))?;

    Ok((
        [(HeaderName::from_static(NEW_TOKEN_HEADER), header)],
        Json(ChangePasswordResponse {
            message: "Password changed successfully".to_string(),
            token: issued.token,
        }),
    ))
}

/// Handler for GET /api/users/me - Get current user info
pub async fn get_me(State(state): State<AppState>, user: AuthUser) -> Result<Json<UserInfo>> {
    let db_user = state
        .user_repo
        .find_by_id(&user.id)
        .await?
        .ok_or_else(|| RentError::NotFound("User not found".to_string()))?;

    Ok(Json(UserInfo::from(&db_user)))
}

/// Handler for PATCH /api/users/me - Update username and phone
///
/// An empty phone clears it; an absent field is left unchanged.
pub async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    body: std::result::Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<UserInfo>> {
    let Json(req) = body?;

    let db_user = state
        .user_repo
        .find_by_id(&user.id)
        .await?
        .ok_or_else(|| RentError::NotFound("User not found".to_string()))?;

    let username = match req.username {
        Some(name) => {
            let name = name.trim().to_string();
            validate_username(&name)?;
            // The UNIQUE index still guards the race; this gives the common case a clear answer
            if let Some(holder) = state.user_repo.find_by_username(&name).await? {
                if holder.id != db_user.id {
                    return Err(RentError::Conflict("Username already exists".to_string()));
                }
            }
            name
        }
        None => db_user.username.clone(),
    };

    let phone = match req.phone {
        Some(phone) if phone.trim().is_empty() => None,
        Some(phone) => {
            let phone = phone.trim().to_string();
            validate_phone(&phone)?;
            Some(phone)
        }
        None => db_user.phone.clone(),
    };

    state
        .user_repo
        .update_profile(&user.id, &username, phone.as_deref())
        .await?;

    tracing::info!(user_id = %user.id, "Profile updated");

    Ok(Json(UserInfo {
        id: db_user.id,
        username,
        email: db_user.email,
        phone,
    }))
}
