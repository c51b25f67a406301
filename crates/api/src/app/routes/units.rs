use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    response::IntoResponse,
    routing::get,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_unit).delete(deregister_unit))
        .route("/:id/holder", get(get_holder))
}

pub async fn get_unit(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match services.engine.unit(&id).await {
        Ok(Some(unit)) => Json(dto::UnitResponse::from(&unit)).into_response(),
        Ok(None) => errors::not_found(format!("unit {id}")),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// Current holder record of a unit; `null` when it is on the shelf.
pub async fn get_holder(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match services.engine.current_holder(&id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn deregister_unit(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::DeregisterUnitRequest>,
) -> axum::response::Response {
    match services.engine.deregister_unit(&id, body.actor, body.note).await {
        Ok(sample) => Json(dto::SampleResponse::from(&sample)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
