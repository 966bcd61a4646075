use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use ctrl_core::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The configured target is unusable or points back at the proxy.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A masked path that does not name an origin.
    #[error("bad proxy path: {0}")]
    BadPath(String),

    #[error("request body rejected: {0}")]
    RequestBody(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("failed to build upstream client: {0}")]
    Client(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadPath(_) => StatusCode::BAD_REQUEST,
            Self::RequestBody(_) => StatusCode::PAYLOAD_TOO_LARGE,
            // a broken subresource must not look like a failure to the page
            Self::Upstream(_) => StatusCode::NO_CONTENT,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = if status == StatusCode::NO_CONTENT {
            Body::empty()
        } else {
            Body::from(self.to_string())
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        if status != StatusCode::NO_CONTENT {
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
        }
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn config_error_is_500_with_message() {
        let response = ProxyError::from(ConfigError::Loop("kiosk.lan:1337".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("configuration error:"), "{text}");
        assert!(text.contains("kiosk.lan:1337"));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ProxyError::BadPath("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::RequestBody("x".into()).status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ProxyError::Client("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
