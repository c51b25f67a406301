use axum::Router;

pub mod audit;
pub mod holders;
pub mod samples;
pub mod system;
pub mod transactions;
pub mod units;

/// Router for every inventory endpoint.
pub fn router() -> Router {
    Router::new()
        .nest("/transactions", transactions::router())
        .nest("/units", units::router())
        .nest("/samples", samples::router())
        .nest("/holders", holders::router())
        .nest("/audit", audit::router())
}
