//! Actix-web middleware chain for structured request logging.
//!
//! Every middleware writes typed [`Field`]s through a [`Logger`], which by
//! default forwards them to the standard `log` crate with key/values attached.
//!
//! # Examples:
//! ## By default middleware uses the standard `log` crate for logging.
//! ```bash
//! cargo add actix-web-middleware-reqlog
//! ```
//! Example usage with standard `log` crate and `structured_logger` crate:
//! ```rust
//! use actix_web::{web, App, HttpServer};
//! use actix_web_middleware_reqlog::{RequestIdMiddleware, StructuredLogger};
//! use structured_logger::{Builder, async_json::new_writer};
//!
//! #[actix_web::main] // or #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     Builder::new()
//!         .with_target_writer("*", new_writer(tokio::io::stdout()))
//!         .init();
//!
//!     HttpServer::new(|| {
//!         App::new()
//!             .wrap(StructuredLogger::default())
//!             .wrap(RequestIdMiddleware::default())
//!             .route("/", web::get().to(|| async { "Hello world!" }))
//!     })
//!     .bind("127.0.0.1:8080")?;
//!     Ok(())
//! }
//! ```
//! ## Full chain
//!
//! `wrap` order matters: the last middleware wrapped sees the request first.
//! Recovery goes innermost so the loggers around it observe the `500`.
//!
//! ```rust
//! use actix_web::{web, App};
//! use actix_web_middleware_reqlog::{
//!     ErrorLogger, Logger, PerformanceLogger, RecoveryLogger, RequestIdMiddleware,
//!     SecurityLogger, StructuredLogger, StructuredLoggerConfig,
//! };
//!
//! let logger = Logger::global();
//! let app = App::new()
//!     .wrap(RecoveryLogger::new(logger.clone()))
//!     .wrap(ErrorLogger::new(logger.clone()))
//!     .wrap(StructuredLogger::new(
//!         logger.clone(),
//!         StructuredLoggerConfig::default().log_client_ip(true),
//!     ))
//!     .wrap(PerformanceLogger::new(logger.clone()))
//!     .wrap(SecurityLogger::new(logger))
//!     .wrap(RequestIdMiddleware::default())
//!     .route("/", web::get().to(|| async { "Hello world!" }));
//! ```
//! ## `tracing-request-id` feature reuses the Request ID set by `TracingLogger`.
//! ```bash
//! cargo add actix-web-middleware-reqlog --features tracing-request-id
//! ```
//!
//! # Handler side
//!
//! Handlers read and extend the request context through [`RequestContextExt`]:
//!
//! ```rust
//! use actix_web::{HttpRequest, HttpResponse};
//! use actix_web_middleware_reqlog::{ErrorKind, RequestContextExt};
//!
//! async fn login(req: HttpRequest) -> HttpResponse {
//!     req.set_user_id("42");
//!     req.logger().info("user logged in", vec![]);
//!     req.push_error(ErrorKind::Public, "password expires soon");
//!     HttpResponse::Ok().finish()
//! }
//! ```
//!
//! # Path Exclusions
//!
//! ```rust
//! use actix_web_middleware_reqlog::StructuredLoggerConfig;
//!
//! let config = StructuredLoggerConfig::default()
//!     .exclude("/health")
//!     .exclude_pattern(r"^/assets/.*")
//!     .unwrap();
//! ```
//!
//! # Feature Flags
//!
//! - `log` (default) - Forward events to the standard `log` crate
//! - `tracing-request-id` - Reuse `tracing-actix-web`'s request ID
//! - `uuid_v7` - Use UUIDv7 instead of UUIDv4 for request IDs

mod body;
mod context;
mod error;
mod error_logger;
mod event;
mod logger;
mod performance;
mod recovery;
mod request_id;
pub mod security;
mod structured;
pub mod timing;
mod wrapper;

pub use crate::body::{DEFAULT_MAX_BODY_SIZE, RequestBodyLogger, capture_body, declared_length};
pub use crate::context::{
    ErrorKind, REQUEST_ID, RequestContext, RequestContextExt, RequestError, USER_ID,
};
pub use crate::error::{ConfigError, RecoveredPanic};
pub use crate::error_logger::ErrorLogger;
pub use crate::event::{Field, Level, Record, Value};
pub use crate::logger::{DiscardSink, LogSink, Logger, MemorySink};
pub use crate::performance::PerformanceLogger;
pub use crate::recovery::RecoveryLogger;
pub use crate::request_id::{DEFAULT_REQUEST_ID_HEADER, RequestId, RequestIdMiddleware};
pub use crate::security::{SecurityLogger, Threat};
pub use crate::structured::{AccessLogger, CustomFields, StructuredLogger, StructuredLoggerConfig};
pub use crate::timing::{Outcome, SLOW_REQUEST_THRESHOLD, TimeZone};
#[cfg(feature = "log")]
pub use crate::wrapper::rust_log;
