//! Per-request key/value context shared by the middleware chain and handlers.

use std::{collections::BTreeMap, fmt};

use actix_web::HttpMessage;
use actix_web::dev::ServiceRequest;
use actix_web::http::header;

use crate::event::Field;
use crate::logger::Logger;

pub const REQUEST_ID: &str = "request_id";
pub const USER_ID: &str = "user_id";

/// Category of an error attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Request data could not be bound (extractor / deserialization failure).
    Bind,
    /// Response could not be rendered.
    Render,
    /// Error meant to be shown to the client.
    Public,
    /// Anything else.
    Private,
}

/// Error recorded by application code during request processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RequestError {
    pub fn new(kind: ErrorKind, error: impl fmt::Display) -> Self {
        RequestError {
            kind,
            message: error.to_string(),
        }
    }
}

/// Request-scoped values. Lives in the request extensions and is dropped with
/// the request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    values: BTreeMap<String, String>,
    errors: Vec<RequestError>,
}

impl RequestContext {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn errors(&self) -> &[RequestError] {
        &self.errors
    }

    pub fn push_error(&mut self, error: RequestError) {
        self.errors.push(error);
    }

    /// `request_id` and `user_id` fields, in that order, when set.
    pub fn identity_fields(&self) -> Vec<Field> {
        [REQUEST_ID, USER_ID]
            .into_iter()
            .filter_map(|key| self.get(key).map(|value| Field::str(key, value)))
            .collect()
    }
}

/// Access to the [`RequestContext`] of anything carrying request extensions
/// (`HttpRequest`, `ServiceRequest`).
pub trait RequestContextExt {
    fn context_value(&self, key: &str) -> Option<String>;

    fn set_context_value(&self, key: &str, value: impl Into<String>);

    fn request_id(&self) -> Option<String> {
        self.context_value(REQUEST_ID)
    }

    fn user_id(&self) -> Option<String> {
        self.context_value(USER_ID)
    }

    fn set_user_id(&self, user_id: impl Into<String>) {
        self.set_context_value(USER_ID, user_id)
    }

    /// Attach an error for [`ErrorLogger`](crate::ErrorLogger) to report.
    fn push_error(&self, kind: ErrorKind, error: impl fmt::Display);

    fn request_errors(&self) -> Vec<RequestError>;

    /// `base` bound with the identity fields known right now.
    fn scoped_logger(&self, base: &Logger) -> Logger;

    /// Global logger bound with the identity fields known right now.
    fn logger(&self) -> Logger {
        self.scoped_logger(&Logger::global())
    }
}

impl<T: HttpMessage> RequestContextExt for T {
    fn context_value(&self, key: &str) -> Option<String> {
        self.extensions()
            .get::<RequestContext>()
            .and_then(|ctx| ctx.get(key))
            .map(str::to_owned)
    }

    fn set_context_value(&self, key: &str, value: impl Into<String>) {
        let value = value.into();
        with_context_mut(self, |ctx| ctx.set(key, value));
    }

    fn push_error(&self, kind: ErrorKind, error: impl fmt::Display) {
        let error = RequestError::new(kind, error);
        with_context_mut(self, |ctx| ctx.push_error(error));
    }

    fn request_errors(&self) -> Vec<RequestError> {
        self.extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.errors().to_vec())
            .unwrap_or_default()
    }

    fn scoped_logger(&self, base: &Logger) -> Logger {
        let fields = self
            .extensions()
            .get::<RequestContext>()
            .map(RequestContext::identity_fields)
            .unwrap_or_default();
        base.with(fields)
    }
}

fn with_context_mut<T, R>(msg: &T, f: impl FnOnce(&mut RequestContext) -> R) -> R
where
    T: HttpMessage,
{
    let mut ext = msg.extensions_mut();
    match ext.get_mut::<RequestContext>() {
        Some(ctx) => f(ctx),
        None => {
            let mut ctx = RequestContext::default();
            let out = f(&mut ctx);
            ext.insert(ctx);
            out
        }
    }
}

/// Request metadata captured before the request is handed downstream.
#[derive(Debug, Clone)]
pub(crate) struct RequestInfo {
    pub method: String,
    pub path: String,
    pub ip: String,
    pub user_agent: String,
    pub request_id: Option<String>,
}

impl RequestInfo {
    pub fn capture(req: &ServiceRequest) -> Self {
        RequestInfo {
            method: req.method().to_string(),
            path: req.path().to_string(),
            ip: client_ip(req),
            user_agent: header_str(req, header::USER_AGENT.as_str()).unwrap_or_default(),
            request_id: req.request_id(),
        }
    }

    /// `method`, `path`, `ip`.
    pub fn base_fields(&self) -> Vec<Field> {
        vec![
            Field::str("method", self.method.as_str()),
            Field::str("path", self.path.as_str()),
            Field::str("ip", self.ip.as_str()),
        ]
    }

    pub fn push_request_id(&self, fields: &mut Vec<Field>) {
        if let Some(id) = &self.request_id {
            fields.push(Field::str(REQUEST_ID, id.as_str()));
        }
    }
}

/// Client address as seen through `Forwarded` / `X-Forwarded-For`, falling
/// back to the peer address. Empty when unknown.
pub(crate) fn client_ip(req: &ServiceRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .map(str::to_owned)
        .unwrap_or_default()
}

pub(crate) fn header_str(req: &ServiceRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;
    use crate::logger::MemorySink;
    use actix_web::test::TestRequest;

    #[test]
    fn test_context_values() {
        let req = TestRequest::default().to_http_request();
        assert_eq!(req.request_id(), None);
        assert_eq!(req.user_id(), None);

        req.set_context_value(REQUEST_ID, "req-1");
        req.set_user_id("42");
        req.set_context_value("tenant", "acme");

        assert_eq!(req.request_id().as_deref(), Some("req-1"));
        assert_eq!(req.user_id().as_deref(), Some("42"));
        assert_eq!(req.context_value("tenant").as_deref(), Some("acme"));
    }

    #[test]
    fn test_push_error() {
        let req = TestRequest::default().to_srv_request();
        req.push_error(ErrorKind::Bind, "missing field `name`");
        req.push_error(ErrorKind::Private, "db unavailable");

        let errors = req.request_errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].kind, ErrorKind::Bind);
        assert_eq!(errors[0].message, "missing field `name`");
        assert_eq!(errors[1].kind, ErrorKind::Private);
    }

    #[test]
    fn test_scoped_logger_reflects_current_context() {
        let sink = MemorySink::new();
        let base = sink.logger();
        let req = TestRequest::default().to_http_request();

        let unscoped = req.scoped_logger(&base);
        assert!(unscoped.bound_fields().is_empty());

        req.set_context_value(REQUEST_ID, "req-7");
        let before = req.scoped_logger(&base);
        req.set_user_id("u-1");
        let after = req.scoped_logger(&base);

        before.info("before", Vec::new());
        after.info("after", Vec::new());

        let records = sink.records();
        assert_eq!(records[0].keys(), vec!["request_id"]);
        assert_eq!(records[1].keys(), vec!["request_id", "user_id"]);
        assert_eq!(records[1].str_field("user_id"), Some("u-1"));
        assert_eq!(records[1].level, Level::Info);
    }

    #[test]
    fn test_request_info_capture() {
        let req = TestRequest::default()
            .uri("/orders?page=2")
            .insert_header(("user-agent", "curl/8.0"))
            .insert_header(("x-forwarded-for", "10.0.0.9"))
            .to_srv_request();
        req.set_context_value(REQUEST_ID, "abc");

        let info = RequestInfo::capture(&req);
        assert_eq!(info.method, "GET");
        assert_eq!(info.path, "/orders");
        assert_eq!(info.ip, "10.0.0.9");
        assert_eq!(info.user_agent, "curl/8.0");
        assert_eq!(info.request_id.as_deref(), Some("abc"));

        let mut fields = info.base_fields();
        info.push_request_id(&mut fields);
        let keys: Vec<&str> = fields.iter().map(Field::key).collect();
        assert_eq!(keys, vec!["method", "path", "ip", "request_id"]);
    }
}
