//! API routes

use crate::api::handlers::{
    create_listing, delete_listing, get_listing, health_check, list_listings, my_listings,
    update_listing, AppState,
};
use crate::api::middleware::{rate_limit_middleware, RateLimiter};
use crate::auth::handlers::{
    change_password, forgot_password, get_me, login, register, reset_password, update_me,
};
use crate::auth::middleware::authenticate;
use crate::core::config::RateLimitConfig;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

/// Per-endpoint request limiters
#[derive(Clone)]
pub struct RateLimiters {
    pub login: RateLimiter,
    pub register: RateLimiter,
    pub reset: RateLimiter,
}

impl RateLimiters {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            login: RateLimiter::new("login", config.login_requests, config.login_window)
                .trust_proxy_headers(config.trust_proxy_headers),
            register: RateLimiter::new("register", config.register_requests, config.register_window)
                .trust_proxy_headers(config.trust_proxy_headers),
            reset: RateLimiter::new("forgot_password", config.reset_requests, config.reset_window)
                .trust_proxy_headers(config.trust_proxy_headers),
        }
    }
}

/// Build the API routes
pub fn build_api_routes(state: AppState, limiters: RateLimiters) -> Router {
    let limited = |limiter: RateLimiter| middleware::from_fn_with_state(limiter, rate_limit_middleware);

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/users/register", post(register).layer(limited(limiters.register)))
        .route("/api/users/login", post(login).layer(limited(limiters.login)))
        .route("/api/users/forgot-password", post(forgot_password).layer(limited(limiters.reset)))
        .route("/api/users/reset-password", post(reset_password))
        .route("/api/houses", get(list_listings))
        .route("/api/houses/:id", get(get_listing));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/api/users/change-password", post(change_password))
        .route("/api/users/me", get(get_me).patch(update_me))
        .route("/api/users/me/houses", get(my_listings))
        .route("/api/houses", post(create_listing))
        .route(
            "/api/houses/:id",
            axum::routing::put(update_listing)
                .patch(update_listing)
                .delete(delete_listing),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    public_routes.merge(protected_routes).with_state(state)
}
