//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use concierge_core::config::ConciergeConfig;
use concierge_core::error::ConciergeError;

use crate::auth::USER_ID_HEADER;
use crate::handlers;
use crate::rate_limit::RateLimiter;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let port = state.port;
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
    ]
    .iter()
    .filter_map(|origin| origin.parse::<HeaderValue>().ok())
    .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static(USER_ID_HEADER),
        ]);

    let public_routes = Router::new().route("/health", get(handlers::health));

    let limiter = RateLimiter::new(state.rate_limit_per_sec);
    let protected_routes = Router::new()
        .route(
            "/chat",
            post(handlers::chat).layer(DefaultBodyLimit::max(512 * 1024)),
        )
        .route("/conversations/me", delete(handlers::reset_conversation))
        .layer(axum::middleware::from_fn(
            crate::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::Extension(limiter))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_auth,
        ));

    public_routes
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve on 127.0.0.1 at the configured port until `shutdown` resolves.
pub async fn start_server(
    config: &ConciergeConfig,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), ConciergeError> {
    let addr = format!("127.0.0.1:{}", config.general.port);
    let router = create_router(state);

    tracing::info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ConciergeError::Api(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ConciergeError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
