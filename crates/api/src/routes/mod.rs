//! Route registration

pub mod admin;
pub mod claims;
pub mod plans;
pub mod subscriptions;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Catalog
        .route("/api/plans", get(plans::list_plans))
        .route("/api/categories", get(plans::list_categories))
        // Claims
        .route("/api/claims", post(claims::submit_claim))
        .route("/api/claims/{payment_id}", get(claims::get_claim))
        // Subscriptions
        .route(
            "/api/users/{user_id}/categories/{category_id}/remaining-days",
            get(subscriptions::remaining_days),
        )
        .route(
            "/api/users/{user_id}/subscriptions",
            get(subscriptions::list_subscriptions),
        )
        .route(
            "/api/users/{user_id}/history",
            get(subscriptions::subscription_history),
        )
        // Admin
        .route("/api/admin/review-queue", get(admin::list_review_queue))
        .route(
            "/api/admin/review/{payment_id}",
            post(admin::resolve_payment),
        )
        .route("/api/admin/verification/run", post(admin::run_verification))
        .route(
            "/api/admin/verification/stats",
            get(admin::verification_stats),
        )
        .route("/api/admin/invariants", get(admin::run_invariants))
        .route(
            "/api/admin/subscriptions/grant",
            post(admin::grant_subscription),
        )
        .route("/api/admin/settings", get(admin::get_verifier_settings))
        .route(
            "/api/admin/settings/{key}",
            post(admin::update_verifier_setting),
        )
        .route(
            "/api/admin/subscriptions/{subscription_id}/cancel",
            post(admin::cancel_subscription),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
