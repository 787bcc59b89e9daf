//! Authentication middleware

use crate::api::handlers::AppState;
use crate::auth::renewal::NEW_TOKEN_HEADER;
use crate::core::error::{Result, RentError};
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

/// Extension to store authenticated user info in request
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub email: String,
}

/// Token from `Authorization: Bearer <token>`; no other location is accepted
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authentication middleware
///
/// Rejects the request with 401 unless the bearer token verifies and matches
/// the identity's current version marker. After the handler has run, an aging
/// token is renewed through the `X-New-Token` response header.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()).map(str::to_string) else {
        return RentError::AuthenticationError("Missing authentication token".to_string()).into_response();
    };

    let now = Utc::now();
    let (user, claims) = match state.auth_service.authenticate(&token, now).await {
        Ok(found) => found,
        Err(e) => return e.into_response(),
    };

    request.extensions_mut().insert(AuthUser {
        id: user.id.clone(),
        username: user.username.clone(),
        email: user.email.clone(),
    });

    let mut response = next.run(request).await;

    // A handler that minted its own token (password change) has already set the header
    if response.headers().contains_key(NEW_TOKEN_HEADER) {
        return response;
    }

    match state.auth_service.renew(&user, &claims, now) {
        Ok(Some(renewed)) => match HeaderValue::from_str(&renewed.token) {
            Ok(value) => {
                response.headers_mut().insert(NEW_TOKEN_HEADER, value);
                tracing::debug!(user_id = %user.id, "Session token renewed");
            }
            Err(e) => tracing::warn!(user_id = %user.id, error = %e, "Renewed token is not a valid header value"),
        },
        Ok(None) => {}
        Err(e) => tracing::warn!(user_id = %user.id, error = %e, "Session renewal failed"),
    }

    response
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = RentError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| RentError::AuthenticationError("User not authenticated".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));
    }
}
