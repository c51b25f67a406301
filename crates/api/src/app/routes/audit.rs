use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    response::IntoResponse,
    routing::get,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/", get(query_audit_log))
}

pub async fn query_audit_log(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::AuditQuery>,
) -> axum::response::Response {
    let (filter, pagination) = match query.into_filter() {
        Ok(parsed) => parsed,
        Err(e) => return errors::engine_error_to_response(e),
    };

    match services.engine.audit_log(&filter, pagination).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
