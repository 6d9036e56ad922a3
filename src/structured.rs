use std::{
    collections::HashSet,
    fmt,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use futures_core::ready;
use futures_util::future::LocalBoxFuture;
use pin_project_lite::pin_project;
use regex::Regex;
use time::OffsetDateTime;

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::body::{BodySize, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::{StatusCode, header};
use actix_web::{Error, HttpRequest, Result};

use crate::body::{DEFAULT_MAX_BODY_SIZE, body_text, capture_body};
use crate::context::{REQUEST_ID, RequestContextExt, USER_ID, client_ip, header_str};
use crate::error::ConfigError;
use crate::event::Field;
use crate::logger::Logger;
use crate::timing::{Clock, Outcome, TimeZone};

/// Callback producing extra fields appended at the end of each event.
pub type CustomFields = Rc<dyn Fn(&HttpRequest) -> Vec<Field>>;

/// Middleware for logging requests and responses summaries as structured
/// events.
///
/// One event per request, emitted once the response body has been sent.
/// Severity follows the response status: `5xx` error, `4xx` warning,
/// everything else info.
///
/// # Examples
/// ```rust
/// use actix_web::App;
/// use actix_web_middleware_reqlog::{StructuredLogger, StructuredLoggerConfig};
///
/// let config = StructuredLoggerConfig::default()
///     .log_client_ip(true)
///     .log_user_agent(true)
///     .log_header("Content-Type")
///     .exclude("/health");
///
/// let app = App::new()
///     .wrap(StructuredLogger::with_config(config));
/// ```
#[derive(Debug, Clone)]
pub struct StructuredLogger(Rc<Inner>);

#[derive(Debug)]
struct Inner {
    logger: Logger,
    config: StructuredLoggerConfig,
}

impl StructuredLogger {
    /// Create `StructuredLogger` middleware writing to `logger`.
    pub fn new(logger: Logger, config: StructuredLoggerConfig) -> StructuredLogger {
        StructuredLogger(Rc::new(Inner { logger, config }))
    }

    /// Create `StructuredLogger` middleware writing to the global logger.
    pub fn with_config(config: StructuredLoggerConfig) -> StructuredLogger {
        StructuredLogger::new(Logger::global(), config)
    }

    pub fn config(&self) -> &StructuredLoggerConfig {
        &self.0.config
    }
}

impl Default for StructuredLogger {
    /// Create `StructuredLogger` with the default configuration:
    ///
    /// Fields:
    /// - method
    /// - path
    /// - status
    /// - latency
    /// - body_size
    /// - timestamp
    /// - query (when present)
    /// - request_id / user_id (when present)
    fn default() -> Self {
        StructuredLogger::with_config(StructuredLoggerConfig::default())
    }
}

/// Immutable configuration of a [`StructuredLogger`].
#[derive(Clone)]
pub struct StructuredLoggerConfig {
    exclude: HashSet<String>,
    exclude_regex: Vec<Regex>,
    time_zone: TimeZone,
    log_client_ip: bool,
    log_user_agent: bool,
    log_referer: bool,
    log_request_body: bool,
    log_response_body: bool,
    max_body_size: usize,
    headers: Vec<String>,
    custom_fields: Option<CustomFields>,
}

impl Default for StructuredLoggerConfig {
    fn default() -> Self {
        StructuredLoggerConfig {
            exclude: HashSet::new(),
            exclude_regex: Vec::new(),
            time_zone: TimeZone::default(),
            log_client_ip: false,
            log_user_agent: false,
            log_referer: false,
            log_request_body: false,
            log_response_body: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            headers: Vec::new(),
            custom_fields: None,
        }
    }
}

impl fmt::Debug for StructuredLoggerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuredLoggerConfig")
            .field("exclude", &self.exclude)
            .field("exclude_regex", &self.exclude_regex)
            .field("time_zone", &self.time_zone)
            .field("log_client_ip", &self.log_client_ip)
            .field("log_user_agent", &self.log_user_agent)
            .field("log_referer", &self.log_referer)
            .field("log_request_body", &self.log_request_body)
            .field("log_response_body", &self.log_response_body)
            .field("max_body_size", &self.max_body_size)
            .field("headers", &self.headers)
            .field("custom_fields", &self.custom_fields.is_some())
            .finish()
    }
}

impl StructuredLoggerConfig {
    /// Ignore and do not log access info for specified path.
    pub fn exclude<T: Into<String>>(mut self, path: T) -> Self {
        self.exclude.insert(path.into());
        self
    }

    /// Ignore and do not log access info for paths that match regex.
    pub fn exclude_regex(mut self, regex: Regex) -> Self {
        self.exclude_regex.push(regex);
        self
    }

    /// Same as [`exclude_regex`](Self::exclude_regex), compiling `pattern`.
    pub fn exclude_pattern(self, pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(self.exclude_regex(regex))
    }

    pub fn time_zone(mut self, zone: TimeZone) -> Self {
        self.time_zone = zone;
        self
    }

    /// Report timestamps in UTC.
    pub fn utc(self) -> Self {
        self.time_zone(TimeZone::Utc)
    }

    pub fn log_client_ip(mut self, enabled: bool) -> Self {
        self.log_client_ip = enabled;
        self
    }

    pub fn log_user_agent(mut self, enabled: bool) -> Self {
        self.log_user_agent = enabled;
        self
    }

    pub fn log_referer(mut self, enabled: bool) -> Self {
        self.log_referer = enabled;
        self
    }

    pub fn log_request_body(mut self, enabled: bool) -> Self {
        self.log_request_body = enabled;
        self
    }

    pub fn log_response_body(mut self, enabled: bool) -> Self {
        self.log_response_body = enabled;
        self
    }

    /// Largest body, in bytes, that is captured. Zero restores the 1 MiB
    /// default.
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = if size == 0 { DEFAULT_MAX_BODY_SIZE } else { size };
        self
    }

    /// Log the value of request header `name` as `header_<name>`.
    pub fn log_header(mut self, name: impl Into<String>) -> Self {
        self.headers.push(name.into());
        self
    }

    pub fn custom_fields<F>(mut self, f: F) -> Self
    where
        F: Fn(&HttpRequest) -> Vec<Field> + 'static,
    {
        self.custom_fields = Some(Rc::new(f));
        self
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude.contains(path) || self.exclude_regex.iter().any(|r| r.is_match(path))
    }
}

impl<S, B> Transform<S, ServiceRequest> for StructuredLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<StreamLog<B>>;
    type Error = Error;
    type Transform = StructuredLoggerService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(StructuredLoggerService {
            service: Rc::new(service),
            inner: Rc::clone(&self.0),
        }))
    }
}

/// Logger middleware service.
pub struct StructuredLoggerService<S> {
    inner: Rc<Inner>,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for StructuredLoggerService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<StreamLog<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Error>>;

    actix_service::forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let inner = Rc::clone(&self.inner);

        Box::pin(async move {
            let config = &inner.config;

            if config.is_excluded(req.path()) {
                let res = service.call(req).await?;
                return Ok(res.map_body(|_, body| StreamLog::passthrough(body)));
            }

            let clock = Clock::start(config.time_zone);
            let request_body = if config.log_request_body {
                capture_body(&mut req, config.max_body_size).await
            } else {
                None
            };

            let mut completion = Completion::request(&inner.logger, config, &req, &clock);
            completion.request_body = request_body.map(|body| body_text(&body));

            match service.call(req).await {
                Ok(res) => {
                    completion.response(config, &res, clock.elapsed());
                    let limit = config.log_response_body.then_some(config.max_body_size);
                    Ok(res.map_body(move |_, body| StreamLog::new(body, completion, limit)))
                }
                Err(err) => {
                    completion.status = err.as_response_error().status_code();
                    completion.latency = clock.elapsed();
                    completion.emit(0, None);
                    Err(err)
                }
            }
        })
    }
}

/// Everything known about a request once its handler has returned, short of
/// the streamed response size.
struct Completion {
    logger: Logger,
    method: String,
    path: String,
    status: StatusCode,
    latency: Duration,
    timestamp: OffsetDateTime,
    query: String,
    ip: Option<String>,
    user_agent: Option<String>,
    referer: Option<String>,
    headers: Vec<Field>,
    request_body: Option<String>,
    request_id: Option<String>,
    user_id: Option<String>,
    custom: Vec<Field>,
}

impl Completion {
    fn request(
        logger: &Logger,
        config: &StructuredLoggerConfig,
        req: &ServiceRequest,
        clock: &Clock,
    ) -> Self {
        let headers = config
            .headers
            .iter()
            .filter_map(|name| {
                header_str(req, name)
                    .filter(|value| !value.is_empty())
                    .map(|value| Field::str(format!("header_{name}"), value))
            })
            .collect();

        Completion {
            logger: logger.clone(),
            method: req.method().to_string(),
            path: req.path().to_string(),
            status: StatusCode::OK,
            latency: Duration::ZERO,
            timestamp: clock.timestamp(),
            query: req.query_string().to_string(),
            ip: config.log_client_ip.then(|| client_ip(req)),
            user_agent: config
                .log_user_agent
                .then(|| header_str(req, header::USER_AGENT.as_str()).unwrap_or_default()),
            referer: if config.log_referer {
                header_str(req, header::REFERER.as_str()).filter(|value| !value.is_empty())
            } else {
                None
            },
            headers,
            request_body: None,
            request_id: req.request_id(),
            user_id: req.user_id(),
            // replaced once the handler has run; kept when the service fails
            custom: config
                .custom_fields
                .as_ref()
                .map(|custom| custom(req.request()))
                .unwrap_or_default(),
        }
    }

    fn response<B>(
        &mut self,
        config: &StructuredLoggerConfig,
        res: &ServiceResponse<B>,
        latency: Duration,
    ) {
        let req = res.request();
        self.status = res.status();
        self.latency = latency;
        self.request_id = req.request_id().or(self.request_id.take());
        self.user_id = req.user_id().or(self.user_id.take());
        if let Some(custom) = &config.custom_fields {
            self.custom = custom(req);
        }
    }

    fn fields(self, size: usize, response_body: Option<String>) -> Vec<Field> {
        let mut fields = vec![
            Field::str("method", self.method),
            Field::str("path", self.path),
            Field::uint("status", u64::from(self.status.as_u16())),
            Field::duration("latency", self.latency),
            Field::uint("body_size", size as u64),
            Field::time("timestamp", self.timestamp),
        ];

        if !self.query.is_empty() {
            fields.push(Field::str("query", self.query));
        }
        if let Some(ip) = self.ip {
            fields.push(Field::str("ip", ip));
        }
        if let Some(user_agent) = self.user_agent {
            fields.push(Field::str("user_agent", user_agent));
        }
        if let Some(referer) = self.referer {
            fields.push(Field::str("referer", referer));
        }
        fields.extend(self.headers);
        if let Some(body) = self.request_body {
            fields.push(Field::str("request_body", body));
        }
        if let Some(body) = response_body {
            fields.push(Field::str("response_body", body));
        }
        if let Some(id) = self.request_id {
            fields.push(Field::str(REQUEST_ID, id));
        }
        if let Some(id) = self.user_id {
            fields.push(Field::str(USER_ID, id));
        }
        fields.extend(self.custom);

        fields
    }

    fn emit(self, size: usize, response_body: Option<String>) {
        let outcome = Outcome::from_status(self.status);
        let logger = self.logger.clone();
        logger.emit(outcome.level(), outcome.message(), self.fields(size, response_body));
    }
}

pin_project! {
    pub struct StreamLog<B> {
        #[pin]
        body: B,
        completion: Option<Completion>,
        size: usize,
        captured: Option<BytesMut>,
        capture_limit: usize,
    }

    impl<B> PinnedDrop for StreamLog<B> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(completion) = this.completion.take() {
                let response_body = this.captured.take().map(|buf| body_text(&buf));
                completion.emit(*this.size, response_body);
            }
        }
    }
}

impl<B> StreamLog<B> {
    fn new(body: B, completion: Completion, capture_limit: Option<usize>) -> Self {
        StreamLog {
            body,
            completion: Some(completion),
            size: 0,
            captured: capture_limit.map(|_| BytesMut::new()),
            capture_limit: capture_limit.unwrap_or(0),
        }
    }

    fn passthrough(body: B) -> Self {
        StreamLog {
            body,
            completion: None,
            size: 0,
            captured: None,
            capture_limit: 0,
        }
    }
}

impl<B: MessageBody> MessageBody for StreamLog<B> {
    type Error = B::Error;

    #[inline]
    fn size(&self) -> BodySize {
        self.body.size()
    }

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, Self::Error>>> {
        let this = self.project();

        match ready!(this.body.poll_next(cx)) {
            Some(Ok(chunk)) => {
                *this.size += chunk.len();

                let overflow = match this.captured.as_mut() {
                    Some(buf) if buf.len() + chunk.len() <= *this.capture_limit => {
                        buf.extend_from_slice(&chunk);
                        false
                    }
                    Some(_) => true,
                    None => false,
                };
                if overflow {
                    *this.captured = None;
                }

                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(err)) => Poll::Ready(Some(Err(err))),
            None => Poll::Ready(None),
        }
    }
}

/// Minimal completion logger with a fixed field set.
///
/// Logs `method`, `path`, `status`, `latency`, `body_size`, `timestamp`,
/// `query`, `ip`, `user_agent`, `request_id` and `user_id`. Only excluded
/// paths and the timezone are configurable.
#[derive(Debug, Clone)]
pub struct AccessLogger {
    logger: Logger,
    config: StructuredLoggerConfig,
}

impl AccessLogger {
    pub fn new(logger: Logger) -> Self {
        AccessLogger {
            logger,
            config: StructuredLoggerConfig::default()
                .log_client_ip(true)
                .log_user_agent(true),
        }
    }

    /// Ignore and do not log access info for specified path.
    pub fn exclude<T: Into<String>>(mut self, path: T) -> Self {
        self.config = self.config.exclude(path);
        self
    }

    pub fn time_zone(mut self, zone: TimeZone) -> Self {
        self.config = self.config.time_zone(zone);
        self
    }

    /// Report timestamps in UTC.
    pub fn utc(self) -> Self {
        self.time_zone(TimeZone::Utc)
    }
}

impl Default for AccessLogger {
    fn default() -> Self {
        AccessLogger::new(Logger::global())
    }
}

impl<S, B> Transform<S, ServiceRequest> for AccessLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<StreamLog<B>>;
    type Error = Error;
    type Transform = StructuredLoggerService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        StructuredLogger::new(self.logger.clone(), self.config.clone()).new_transform(service)
    }
}
