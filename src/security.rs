use std::{fmt, rc::Rc, sync::OnceLock};

use regex::Regex;

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::{Error, Result};

use crate::context::RequestInfo;
use crate::error::ConfigError;
use crate::event::Field;
use crate::logger::Logger;

/// Category of a suspicious request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Threat {
    SqlInjection,
    Xss,
    PathTraversal,
}

impl Threat {
    pub fn reason(self) -> &'static str {
        match self {
            Threat::SqlInjection => "SQL injection attempt",
            Threat::Xss => "XSS attempt",
            Threat::PathTraversal => "Path traversal attempt",
        }
    }
}

impl fmt::Display for Threat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

struct Signature {
    pattern: Regex,
    threat: Threat,
}

// Evaluation order is significant: reasons are reported in this order.
const SIGNATURE_PATTERNS: [(&str, Threat); 3] = [
    (
        r"(?i)\b(union|select|insert|delete|drop|create|alter|exec)\b",
        Threat::SqlInjection,
    ),
    (r"(?i)(<script|javascript:|onload=|onerror=)", Threat::Xss),
    (r"\.\./", Threat::PathTraversal),
];

static SIGNATURES: OnceLock<Vec<Signature>> = OnceLock::new();

fn compile_signatures() -> Result<Vec<Signature>, ConfigError> {
    SIGNATURE_PATTERNS
        .iter()
        .map(|&(pattern, threat)| {
            Regex::new(pattern)
                .map(|pattern| Signature { pattern, threat })
                .map_err(|source| ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })
        })
        .collect()
}

fn signatures() -> &'static [Signature] {
    SIGNATURES.get_or_init(|| {
        // constant patterns, compiled under test; an empty set disables inspection
        compile_signatures().unwrap_or_default()
    })
}

/// Every threat category matching `target`, in evaluation order.
pub fn inspect(target: &str) -> Vec<Threat> {
    signatures()
        .iter()
        .filter(|sig| sig.pattern.is_match(target))
        .map(|sig| sig.threat)
        .collect()
}

/// `reason` text for a set of matches.
pub fn describe(threats: &[Threat]) -> String {
    threats
        .iter()
        .map(|threat| threat.reason())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Percent-decoded path plus query string, as inspected by [`SecurityLogger`].
pub(crate) fn request_target(req: &ServiceRequest) -> String {
    let mut target = decode(req.path());
    let query = req.query_string();
    if !query.is_empty() {
        target.push('?');
        target.push_str(&decode(query));
    }
    target
}

fn decode(raw: &str) -> String {
    let plus_as_space = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(plus_as_space.as_bytes())).into_owned()
}

/// Middleware reporting requests that look like SQL injection, XSS or path
/// traversal attempts.
///
/// Observation only: the request always continues to the next service.
#[derive(Debug, Clone)]
pub struct SecurityLogger {
    logger: Rc<Logger>,
}

impl SecurityLogger {
    pub fn new(logger: Logger) -> Self {
        SecurityLogger {
            logger: Rc::new(logger),
        }
    }
}

impl Default for SecurityLogger {
    fn default() -> Self {
        SecurityLogger::new(Logger::global())
    }
}

impl<S, B> Transform<S, ServiceRequest> for SecurityLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = SecurityLoggerService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SecurityLoggerService {
            service,
            logger: Rc::clone(&self.logger),
        }))
    }
}

pub struct SecurityLoggerService<S> {
    service: S,
    logger: Rc<Logger>,
}

impl<S, B> Service<ServiceRequest> for SecurityLoggerService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = S::Future;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let threats = inspect(&request_target(&req));

        if !threats.is_empty() {
            let info = RequestInfo::capture(&req);
            let mut fields = info.base_fields();
            fields.push(Field::str("user_agent", info.user_agent.as_str()));
            fields.push(Field::str("reason", describe(&threats)));
            info.push_request_id(&mut fields);

            self.logger.warn("Suspicious request detected", fields);
        }

        self.service.call(req)
    }
}
