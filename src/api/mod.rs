//! HTTP API: routing, the response envelope, and the handler modules.

pub mod auth;
pub mod categories;
pub mod error;
pub mod ownership;
pub mod rate_limit;
pub mod transactions;
pub mod validation;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::AppState;

/// Uniform success envelope. Errors use [`error::ErrorResponse`].
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Login and register get the stricter per-IP limit
    let auth_public = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    let auth_protected = Router::new()
        .route("/profile", get(auth::get_profile).put(auth::update_profile))
        .route("/change-password", put(auth::change_password))
        .route("/account", delete(auth::delete_account))
        .route("/logout", post(auth::logout))
        .route("/verify", get(auth::verify));

    let category_routes = Router::new()
        .route(
            "/",
            get(categories::list_categories).post(categories::create_category),
        )
        .route("/stats", get(categories::category_stats))
        .route(
            "/:id",
            get(categories::get_category)
                .put(categories::update_category)
                .delete(categories::delete_category),
        );

    // Fixed paths are registered alongside /:id; axum prefers the literal
    // match, so /search and friends never parse as an id
    let transaction_routes = Router::new()
        .route(
            "/",
            get(transactions::list_transactions).post(transactions::create_transaction),
        )
        .route("/search", get(transactions::search_transactions))
        .route("/balance", get(transactions::get_balance))
        .route("/recent", get(transactions::recent_transactions))
        .route("/report", get(transactions::monthly_report))
        .route("/statistics", get(transactions::transaction_statistics))
        .route("/daily/:date", get(transactions::daily_transactions))
        .route(
            "/:id",
            get(transactions::get_transaction)
                .put(transactions::update_transaction)
                .delete(transactions::delete_transaction),
        );

    let api = Router::new()
        .nest("/auth", auth_public.merge(auth_protected))
        .nest("/categories", category_routes)
        .nest("/transactions", transaction_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .nest_service(
            "/uploads",
            ServeDir::new(&state.config.server.upload_dir),
        )
        .layer(DefaultBodyLimit::max(state.config.server.max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
