//! HTTP Server implementation
//!
//! This module provides the HTTP server using Axum framework with:
//! - Configurable host/port binding
//! - Graceful shutdown handling
//! - Request timeouts
//! - CORS support exposing the token renewal header

use crate::api::handlers::AppState;
use crate::api::middleware::{security_headers_middleware, trace_id_middleware, SecurityHeadersConfig};
use crate::api::routes::{build_api_routes, RateLimiters};
use crate::auth::renewal::NEW_TOKEN_HEADER;
use crate::auth::service::AuthService;
use crate::core::config::ServerConfig;
use crate::core::error::RentError;
use crate::core::Config;
use crate::db::manager::DatabaseManager;
use crate::db::repository::{ListingRepository, UserRepository};
use axum::{
    error_handling::HandleErrorLayer,
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    response::IntoResponse,
    BoxError, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// HTTP API Server
pub struct ApiServer {
    router: Router,
    config: ServerConfig,
    limiters: RateLimiters,
}

impl ApiServer {
    /// Create a new API server with the given configuration and database manager
    pub fn new(config: Config, db: Arc<DatabaseManager>) -> anyhow::Result<Self> {
        let user_repo = Arc::new(UserRepository::new(db.clone()));
        let auth_service = AuthService::new(user_repo.clone(), &config.security.jwt_secret, &config.auth)?;
        Self::with_auth_service(config, db, auth_service)
    }

    /// Create a server around a prepared `AuthService`, e.g. one with a custom reset notifier
    pub fn with_auth_service(
        config: Config,
        db: Arc<DatabaseManager>,
        auth_service: AuthService,
    ) -> anyhow::Result<Self> {
        let state = AppState {
            user_repo: Arc::new(UserRepository::new(db.clone())),
            listing_repo: Arc::new(ListingRepository::new(db.clone())),
            auth_service: Arc::new(auth_service),
            db,
        };
        let limiters = RateLimiters::from_config(&config.rate_limit);
        let router = Self::build_router(&config, state, limiters.clone());

        Ok(Self {
            router,
            config: config.server,
            limiters,
        })
    }

    /// Build the Axum router with all routes and middleware
    fn build_router(config: &Config, state: AppState, limiters: RateLimiters) -> Router {
        let security_headers = SecurityHeadersConfig::new(
            config.security.enable_hsts,
            config.security.hsts_max_age,
        );
        let timeout = Duration::from_secs(config.server.request_timeout);

        build_api_routes(state, limiters).layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(security_headers, security_headers_middleware))
                .layer(middleware::from_fn(trace_id_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(Self::build_cors_layer(&config.security.allowed_origins))
                .layer(HandleErrorLayer::new(handle_timeout))
                .timeout(timeout),
        )
    }

    /// Build CORS layer from allowed origins configuration
    ///
    /// `X-New-Token` is exposed so browser clients can read renewed tokens.
    fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
        let origin = if allowed_origins.iter().any(|o| o == "*") {
            AllowOrigin::from(Any)
        } else {
            let origins: Vec<HeaderValue> = allowed_origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            AllowOrigin::list(origins)
        };

        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .expose_headers([
                HeaderName::from_static(NEW_TOKEN_HEADER),
                HeaderName::from_static(crate::api::middleware::TRACE_ID_HEADER),
            ])
    }

    /// Start the HTTP server and listen for requests
    ///
    /// This method will block until the server is shut down gracefully.
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let socket_addr: SocketAddr = addr.parse()?;

        info!(
            host = %self.config.host,
            port = self.config.port,
            request_timeout = self.config.request_timeout,
            "Starting HTTP server"
        );

        let cleanup = [
            self.limiters.login.spawn_cleanup(LIMITER_CLEANUP_INTERVAL),
            self.limiters.register.spawn_cleanup(LIMITER_CLEANUP_INTERVAL),
            self.limiters.reset.spawn_cleanup(LIMITER_CLEANUP_INTERVAL),
        ];

        let listener = tokio::net::TcpListener::bind(socket_addr).await?;
        info!(addr = %socket_addr, "HTTP server listening");

        // Peer addresses feed the per-client rate limits
        axum::serve(
            listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        for task in cleanup {
            task.abort();
        }

        info!("HTTP server shut down gracefully");

        Ok(())
    }

    /// Get a reference to the router
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Consume the server, returning the router (for in-process tests)
    pub fn into_router(self) -> Router {
        self.router
    }
}

async fn handle_timeout(err: BoxError) -> axum::response::Response {
    if err.is::<tower::timeout::error::Elapsed>() {
        tracing::warn!("Request timed out");
        (
            axum::http::StatusCode::REQUEST_TIMEOUT,
            axum::Json(crate::core::error::ErrorResponse::new(
                "Timeout".to_string(),
                "Request timed out".to_string(),
            )),
        )
            .into_response()
    } else {
        RentError::TaskError(err.to_string()).into_response()
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Initiating graceful shutdown...");
}
