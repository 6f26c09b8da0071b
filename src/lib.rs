pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;

use crate::auth::JwtVerifier;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
    pub redis: Option<Arc<redis::Client>>,
}

/// Response wrapper for the status-style endpoints.
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }
}

/// All v1 API routes. Cart and order routes sit behind the bearer-token
/// layer; the webhook authenticates itself by signature and the redirect
/// endpoint is public by nature.
pub fn api_v1_routes(verifier: JwtVerifier) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api_status))
        .nest(
            "/carts",
            handlers::carts::carts_routes().route_layer(axum::middleware::from_fn_with_state(
                verifier.clone(),
                auth::auth_middleware,
            )),
        )
        .nest("/orders", handlers::orders::orders_routes(verifier))
        .route("/webhook", post(handlers::webhooks::receive_webhook))
}

/// Full application router: health, v1 API, Swagger UI.
pub fn app_router(state: Arc<AppState>) -> Router {
    let verifier = JwtVerifier::new(&state.config.jwt_secret);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes(verifier))
        .merge(openapi::swagger_ui())
        .with_state(state)
}

async fn api_status() -> Json<ApiResponse<Value>> {
    Json(ApiResponse::success(json!({
        "service": "cartflow-api",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Value>> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let cache_status = match state.redis.as_ref() {
        Some(client) => match client.get_async_connection().await {
            Ok(mut conn) => match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
                Ok(_) => "healthy",
                Err(_) => "unhealthy",
            },
            Err(_) => "unhealthy",
        },
        None => "disabled",
    };

    Json(ApiResponse::success(json!({
        "status": if db_status == "healthy" { "healthy" } else { "unhealthy" },
        "checks": {
            "database": db_status,
            "cache": cache_status,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}
