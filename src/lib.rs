pub mod adapters;
pub mod chain;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod secrets;
pub mod services;
pub mod validation;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use engine::{Engine, EngineDeps};

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub admin_token: Option<String>,
}

pub fn create_app(state: AppState) -> Router {
    let admin = Router::new()
        .route(
            "/admin/withdrawals/:id/process",
            post(handlers::admin::process_withdrawal),
        )
        .route(
            "/admin/transactions/:id/amount",
            post(handlers::admin::override_amount),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::admin_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/balance", get(handlers::ledger::get_balance))
        .route("/transactions", get(handlers::ledger::list_transactions))
        .route("/charges", post(handlers::charges::create_charge))
        .route("/charges/:id", get(handlers::charges::get_charge))
        .route("/charges/:id/cancel", post(handlers::charges::cancel_charge))
        .route("/withdrawals", post(handlers::withdrawals::create_withdrawal))
        .route("/withdrawals/:id", get(handlers::withdrawals::get_withdrawal))
        .route(
            "/milestones",
            post(handlers::milestones::create_milestone).get(handlers::milestones::list_milestones),
        )
        .route("/milestones/:id", get(handlers::milestones::get_milestone))
        .route(
            "/milestones/:id/status",
            post(handlers::milestones::transition_milestone),
        )
        .route(
            "/payments/:id/accept",
            post(handlers::milestones::accept_payment),
        )
        .merge(admin)
        .layer(axum_middleware::from_fn(
            middleware::request_logger_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
