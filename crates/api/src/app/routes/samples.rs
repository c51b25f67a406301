use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:key", get(get_sample))
        .route("/:key/units", post(register_units))
}

pub async fn get_sample(
    Extension(services): Extension<Arc<AppServices>>,
    Path(key): Path<String>,
) -> axum::response::Response {
    match services.engine.sample(&key).await {
        Ok(Some(sample)) => Json(dto::SampleResponse::from(&sample)).into_response(),
        Ok(None) => errors::not_found(format!("sample {key}")),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn register_units(
    Extension(services): Extension<Arc<AppServices>>,
    Path(key): Path<String>,
    Json(body): Json<dto::RegisterUnitsRequest>,
) -> axum::response::Response {
    match services.engine.register_units(body.into_command(key)).await {
        Ok(sample) => (StatusCode::CREATED, Json(dto::SampleResponse::from(&sample))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
