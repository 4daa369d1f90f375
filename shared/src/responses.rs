use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(value)?.into())
        .map_err(Box::new)?)
}

pub fn error(
    status: StatusCode,
    error: &str,
    message: impl Into<String>,
) -> Result<Response<Body>, Error> {
    json(
        status,
        &ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        },
    )
}

pub fn not_found(message: impl Into<String>) -> Result<Response<Body>, Error> {
    error(StatusCode::NOT_FOUND, "NotFound", message)
}

pub fn method_not_allowed() -> Result<Response<Body>, Error> {
    error(
        StatusCode::METHOD_NOT_ALLOWED,
        "MethodNotAllowed",
        "Method not allowed",
    )
}

pub fn internal_error() -> Result<Response<Body>, Error> {
    error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "InternalError",
        "Internal Server Error",
    )
}

/// Parse a JSON request body, or build the 400 response to send instead
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Result<Response<Body>, Error>> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!("Failed to parse request body: {}", e);
        error(
            StatusCode::BAD_REQUEST,
            "InvalidRequest",
            format!("Invalid request body: {}", e),
        )
    })
}
