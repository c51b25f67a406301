use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use sampletrack_infra::EngineError;

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_error_for_unit(status, err.kind(), err.to_string(), err.offending_unit())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    json_error_for_unit(status, code, message, None)
}

pub fn json_error_for_unit(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    offending_unit_id: Option<&str>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
            "offending_unit_id": offending_unit_id,
        })),
    )
        .into_response()
}

pub fn not_found(what: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", format!("{} not found", what.into()))
}
