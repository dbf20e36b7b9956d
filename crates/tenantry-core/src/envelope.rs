use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::{response::IntoResponse, Json};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

/// Body returned to the client for every failed request.
///
/// The envelope is intentionally flat: `success` is always `false`,
/// `message` is safe for display, and `extensions` carries optional
/// machine-readable fields such as `error_code` or `reason`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(example = json!({
    "success": false,
    "message": "Subdomain is already taken",
    "error_code": "AVAILABILITY_CONFLICT"
}))]
pub struct ErrorEnvelope {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    #[schema(additional_properties = true)]
    pub extensions: BTreeMap<String, Value>,
}

/// An error to return to the client.
#[derive(Debug, Clone)]
pub struct ApiError {
    /// The status code of the response.
    pub status_code: StatusCode,
    /// Client-safe message.
    pub message: String,
    /// Additional top-level fields merged into the envelope.
    pub extensions: BTreeMap<String, Value>,
}

/// Create a new `ApiError` with the given status and message.
pub fn new<S, M>(status_code: S, message: M) -> ApiError
where
    S: Into<StatusCode>,
    M: Into<String>,
{
    ApiError {
        status_code: status_code.into(),
        message: message.into(),
        extensions: BTreeMap::new(),
    }
}

impl ApiError {
    /// Specify an arbitrary value to include in the envelope.
    ///
    /// `success` and `message` are reserved and silently ignored.
    pub fn with_value<V>(mut self, key: &str, value: V) -> Self
    where
        V: Into<Value>,
    {
        if key != "success" && key != "message" {
            self.extensions.insert(key.to_owned(), value.into());
        }
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            success: false,
            message: self.message.clone(),
            extensions: self.extensions.clone(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.status_code)
    }
}

impl std::error::Error for ApiError {}

/// Result type where the error is always an `ApiError`.
pub type Result<T> = std::result::Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code, Json(self.envelope())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_error_renders_flat_envelope() {
        let error = new(StatusCode::CONFLICT, "Subdomain is already taken")
            .with_value("error_code", "AVAILABILITY_CONFLICT");

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Subdomain is already taken");
        assert_eq!(body["error_code"], "AVAILABILITY_CONFLICT");
    }

    #[test]
    fn test_reserved_keys_are_not_overridden() {
        let error = new(StatusCode::BAD_REQUEST, "bad")
            .with_value("success", true)
            .with_value("message", "other");

        let envelope = error.envelope();
        assert!(!envelope.success);
        assert_eq!(envelope.message, "bad");
        assert!(envelope.extensions.is_empty());
    }
}
