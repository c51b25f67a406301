use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use sampletrack_core::TransactionId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit_transaction))
        .route("/:id", get(get_transaction))
}

pub async fn submit_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SubmitTransactionRequest>,
) -> axum::response::Response {
    let command = match body.into_command() {
        Ok(c) => c,
        Err(e) => return errors::engine_error_to_response(e),
    };

    match services.engine.submit(command).await {
        Ok(transaction_id) => (
            StatusCode::CREATED,
            Json(dto::TransactionCreated { transaction_id }),
        )
            .into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: TransactionId = match id.parse() {
        Ok(id) => id,
        Err(e) => return errors::engine_error_to_response(sampletrack_infra::EngineError::from(e)),
    };

    match services.engine.transaction(id).await {
        Ok(Some(tx)) => Json(tx).into_response(),
        Ok(None) => errors::not_found(format!("transaction {id}")),
        Err(e) => errors::engine_error_to_response(e),
    }
}
