use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    response::IntoResponse,
    routing::get,
};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/:name/units", get(list_holdings))
}

/// Open Borrow/Transfer/Export records held by one person.
pub async fn list_holdings(
    Extension(services): Extension<Arc<AppServices>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match services.engine.open_holdings(&name).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
