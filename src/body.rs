use std::{collections::HashSet, rc::Rc};

use bytes::{Bytes, BytesMut};
use futures_util::{
    StreamExt,
    future::LocalBoxFuture,
    stream,
};

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse};
use actix_web::error::PayloadError;
use actix_web::http::header;
use actix_web::{Error, HttpMessage, Result};

use crate::context::{REQUEST_ID, RequestContextExt};
use crate::event::Field;
use crate::logger::Logger;

/// Default upper bound for captured bodies (1 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// `Content-Length` declared by the request, if parseable.
pub fn declared_length(req: &ServiceRequest) -> Option<usize> {
    req.headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Buffer the request body for logging and hand an identical payload back to
/// the request.
///
/// Only bodies with a declared, non-zero length of at most `max_size` bytes are
/// read. Returns `None` when the body was not captured; the request is usable
/// either way. On a read error the bytes read so far and the error itself are
/// replayed to the handler.
pub async fn capture_body(req: &mut ServiceRequest, max_size: usize) -> Option<Bytes> {
    match declared_length(req) {
        Some(len) if len > 0 && len <= max_size => {}
        _ => return None,
    }

    let mut payload = req.take_payload();
    let mut buf = BytesMut::new();

    while let Some(chunk) = payload.next().await {
        match chunk {
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(err) => {
                req.set_payload(replay(buf.freeze(), Some(err)));
                return None;
            }
        }
    }

    let body = buf.freeze();
    req.set_payload(replay(body.clone(), None));

    if body.is_empty() { None } else { Some(body) }
}

fn replay(body: Bytes, err: Option<PayloadError>) -> Payload {
    let mut items: Vec<Result<Bytes, PayloadError>> = Vec::with_capacity(2);
    if !body.is_empty() {
        items.push(Ok(body));
    }
    if let Some(err) = err {
        items.push(Err(err));
    }
    Payload::Stream {
        payload: Box::pin(stream::iter(items)),
    }
}

pub(crate) fn body_text(body: &[u8]) -> String {
    String::from_utf8_lossy(body).into_owned()
}

/// Middleware logging request bodies at debug level.
///
/// Use with caution: bodies may carry credentials or personal data.
#[derive(Debug, Clone)]
pub struct RequestBodyLogger(Rc<Inner>);

#[derive(Debug, Clone)]
struct Inner {
    logger: Logger,
    max_body_size: usize,
    exclude: HashSet<String>,
}

impl RequestBodyLogger {
    pub fn new(logger: Logger) -> Self {
        RequestBodyLogger(Rc::new(Inner {
            logger,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            exclude: HashSet::new(),
        }))
    }

    /// Skip bodies declared larger than `size` bytes. Zero restores the default.
    pub fn max_body_size(mut self, size: usize) -> Self {
        Rc::make_mut(&mut self.0).max_body_size = if size == 0 {
            DEFAULT_MAX_BODY_SIZE
        } else {
            size
        };
        self
    }

    /// Ignore and do not log bodies for specified path.
    pub fn exclude<T: Into<String>>(mut self, path: T) -> Self {
        Rc::make_mut(&mut self.0).exclude.insert(path.into());
        self
    }
}

impl Default for RequestBodyLogger {
    fn default() -> Self {
        RequestBodyLogger::new(Logger::global())
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestBodyLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestBodyLoggerService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestBodyLoggerService {
            service: Rc::new(service),
            inner: Rc::clone(&self.0),
        }))
    }
}

pub struct RequestBodyLoggerService<S> {
    service: Rc<S>,
    inner: Rc<Inner>,
}

impl<S, B> Service<ServiceRequest> for RequestBodyLoggerService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<ServiceResponse<B>, Error>>;

    actix_service::forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let inner = Rc::clone(&self.inner);

        Box::pin(async move {
            if !inner.exclude.contains(req.path()) {
                if let Some(body) = capture_body(&mut req, inner.max_body_size).await {
                    let mut fields = vec![
                        Field::str("method", req.method().as_str()),
                        Field::str("path", req.path()),
                        Field::str("request_body", body_text(&body)),
                    ];
                    if let Some(id) = req.request_id() {
                        fields.push(Field::str(REQUEST_ID, id));
                    }
                    inner.logger.debug("Request body", fields);
                }
            }

            service.call(req).await
        })
    }
}
