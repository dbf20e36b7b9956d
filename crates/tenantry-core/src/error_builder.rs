use crate::envelope;
use axum::http::StatusCode;
use serde::Serialize;
use std::collections::HashMap;

pub struct ErrorBuilder {
    status: StatusCode,
    message: String,
    values: HashMap<String, serde_json::Value>,
}

impl ErrorBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: String::new(),
            values: HashMap::new(),
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn value<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.values.insert(key.to_string(), value);
        }
        self
    }

    pub fn build(self) -> envelope::ApiError {
        let message = if self.message.is_empty() {
            self.status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        } else {
            self.message
        };

        let mut error = envelope::new(self.status, message);
        for (key, value) in self.values {
            error = error.with_value(&key, value);
        }

        error
    }
}

// Common error builders
pub fn internal_server_error() -> ErrorBuilder {
    ErrorBuilder::new(StatusCode::INTERNAL_SERVER_ERROR)
        .message("An unexpected error occurred while processing your request")
        .value("error_code", "INTERNAL_SERVER_ERROR")
}

pub fn not_found() -> ErrorBuilder {
    ErrorBuilder::new(StatusCode::NOT_FOUND)
        .message("Resource not found")
        .value("error_code", "NOT_FOUND")
}

pub fn unauthorized() -> ErrorBuilder {
    ErrorBuilder::new(StatusCode::UNAUTHORIZED)
        .message("Authentication is required to access this resource")
        .value("error_code", "UNAUTHORIZED")
}

pub fn bad_request() -> ErrorBuilder {
    ErrorBuilder::new(StatusCode::BAD_REQUEST)
        .message("The request was malformed or invalid")
        .value("error_code", "VALIDATION_ERROR")
}

pub fn conflict() -> ErrorBuilder {
    ErrorBuilder::new(StatusCode::CONFLICT)
        .message("The request conflicts with the current state of the resource")
        .value("error_code", "CONFLICT")
}

pub fn bad_gateway() -> ErrorBuilder {
    ErrorBuilder::new(StatusCode::BAD_GATEWAY)
        .message("An upstream control plane rejected the request")
        .value("error_code", "UPSTREAM_ERROR")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_message_to_reason_phrase() {
        let error = ErrorBuilder::new(StatusCode::NOT_FOUND).build();
        assert_eq!(error.message, "Not Found");
    }

    #[test]
    fn test_conflict_builder_carries_error_code() {
        let error = conflict().message("taken").value("reason", "taken_locally").build();
        assert_eq!(error.status_code, StatusCode::CONFLICT);
        assert_eq!(error.message, "taken");
        assert_eq!(error.extensions["error_code"], "CONFLICT");
        assert_eq!(error.extensions["reason"], "taken_locally");
    }
}
