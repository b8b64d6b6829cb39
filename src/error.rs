use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    RateLimited(String),

    /// Missing per-route resource (e.g. the photo bucket). Maps to 500.
    #[error("{0}")]
    Config(String),

    /// Missing service-wide secret; no authenticated request can be served.
    #[error("{0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("pool error: {0}")]
    Pool(#[from] deadpool_sqlite::InteractError),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Unexpected failures keep the legacy single-field shape and surface
        // the raw message; everything else uses the structured envelope.
        let body = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                json!({ "error": self.to_string() })
            }
            AppError::Pool(e) => {
                tracing::error!(error = %e, "pool error");
                json!({ "error": self.to_string() })
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                json!({ "error": msg })
            }
            _ => {
                let code = if status == StatusCode::UNAUTHORIZED {
                    "UNAUTHORIZED"
                } else {
                    "INVALID_REQUEST"
                };
                json!({
                    "success": false,
                    "error": { "code": code, "message": self.to_string() }
                })
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// JSON extractor that converts deserialization rejections into the 400
/// envelope instead of axum's bare 422. Drop-in replacement for `axum::Json<T>`.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(
        req: axum::extract::Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let path = req.uri().path().to_string();
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => {
                tracing::warn!(path = %path, error = %rejection, "malformed JSON payload");
                Err(AppError::Validation(rejection.body_text()))
            }
        }
    }
}
