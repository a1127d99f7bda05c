//! Error types for web handlers.
//!
//! [`AppError`] is the single error type returned by gateway handlers. It
//! maps correlation errors and upstream failures onto HTTP statuses:
//!
//! | Error                          | Status |
//! |--------------------------------|--------|
//! | `AwaitTimeout`                 | 408    |
//! | `AlreadyWaiting`               | 409    |
//! | `MalformedEvent`               | 400    |
//! | `UnroutedEventKind`            | 404    |
//! | upstream service failure       | 502    |
//! | staging store / anything else  | 500    |

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use courier_core::CorrelationError;
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn create_team(...) -> Result<Json<Value>, AppError> {
///     let waiter = state.registry.register("team_created")?;   // 409 if busy
///     state.upstream.create_team(&request).await?;              // 502 on failure
///     Ok(Json(waiter.wait(state.await_timeout).await?))          // 408 on timeout
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    /// Returned to the client
    message: String,
    /// Stable machine-readable code
    code: &'static str,
    /// Logged, never returned
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Error with an explicit status and code.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// 400
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 404
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// 408, a correlated event did not arrive in time.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::REQUEST_TIMEOUT, "TIMEOUT", message)
    }

    /// 409, the waiter slot is taken.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// 500
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", message)
    }

    /// 502 for a failed call to `service`.
    #[must_use]
    pub fn bad_gateway(service: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            "UPSTREAM_ERROR",
            format!("{service}: {message}"),
        )
    }

    /// 503
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source: &(dyn std::error::Error + 'static) = self.source.as_ref()?.as_ref();
        Some(source)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let cause = self.source.as_ref().map(ToString::to_string);
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                cause = ?cause,
                "Request failed"
            );
        } else {
            tracing::warn!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                "Request rejected"
            );
        }

        let body = ErrorBody {
            code: self.code,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CorrelationError> for AppError {
    fn from(err: CorrelationError) -> Self {
        match err {
            CorrelationError::AwaitTimeout { .. } => Self::timeout(err.to_string()),
            CorrelationError::AlreadyWaiting { .. } => Self::conflict(err.to_string()),
            CorrelationError::MalformedEvent(message) => Self::bad_request(message),
            CorrelationError::UnroutedEventKind { .. } => Self::not_found(err.to_string()),
            CorrelationError::Store(_) => {
                Self::internal("Staging store unavailable").with_source(err)
            }
            _ => Self::internal("An internal error occurred").with_source(err),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}
