use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ctrl_core::ConfigError;
use ctrl_proxy::ProxyError;
use ctrl_store::StoreError;
use serde_json::json;

/// Errors surfaced by the control API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            // validation failed before anything was written
            StoreError::Config(config) => Self::Config(config),
            other => Self::Store(other),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Config(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "control request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Failures while bringing the server up.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failures_are_client_errors() {
        let err = ApiError::from(StoreError::Config(ConfigError::InvalidValue("scaleFactor".into())));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = ApiError::from(StoreError::Config(ConfigError::Loop("kiosk.lan:1337".into())));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn persistence_failures_are_server_errors() {
        let err = ApiError::from(StoreError::Database("disk I/O error".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn body_is_json_with_message() {
        let response = ApiError::BadRequest("height must be a number".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["error"], "bad request: height must be a number");
    }
}
