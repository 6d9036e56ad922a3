use actix_web::{HttpResponse, ResponseError, http::StatusCode};

/// Errors raised while assembling the middleware chain.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid exclusion pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid header name `{0}`")]
    InvalidHeaderName(String),

    #[error("global logger is already installed")]
    GlobalLoggerAlreadySet,
}

/// Error returned by [`RecoveryLogger`](crate::RecoveryLogger) in place of a
/// panicking handler. Renders as an empty `500 Internal Server Error`.
#[derive(Debug, thiserror::Error)]
#[error("handler panicked: {message}")]
pub struct RecoveredPanic {
    message: String,
}

impl RecoveredPanic {
    pub(crate) fn new(message: String) -> Self {
        RecoveredPanic { message }
    }

    /// Text of the recovered panic payload.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl ResponseError for RecoveredPanic {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::new(self.status_code())
    }
}
