use std::{
    fmt,
    future::Future,
    marker::PhantomData,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use futures_core::ready;
use pin_project_lite::pin_project;
use uuid::Uuid;

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::error::InternalError;
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{Error, HttpMessage, Result};

use crate::context::{REQUEST_ID, RequestContextExt};
use crate::error::ConfigError;

pub const DEFAULT_REQUEST_ID_HEADER: &str = "x-request-id";

/// Generated request identifier, also stored in the request extensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub(crate) fn new() -> Self {
        #[cfg(not(feature = "uuid_v7"))]
        {
            Self(Uuid::new_v4())
        }
        #[cfg(feature = "uuid_v7")]
        {
            Self(Uuid::now_v7())
        }
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.as_hyphenated(), f)
    }
}

/// Middleware assigning every request an identifier.
///
/// An identifier sent by the client in `X-Request-ID` is kept as is, otherwise
/// a UUID is generated. The value is stored in the request context under
/// `request_id` and echoed in the response header. Wrap it outside every
/// middleware that logs `request_id`.
///
/// # Examples
/// ```rust
/// use actix_web::App;
/// use actix_web_middleware_reqlog::{RequestIdMiddleware, StructuredLogger};
///
/// let app = App::new()
///     .wrap(StructuredLogger::default())
///     .wrap(RequestIdMiddleware::default());
/// ```
#[derive(Debug, Clone)]
pub struct RequestIdMiddleware {
    header: Rc<HeaderName>,
}

impl RequestIdMiddleware {
    pub fn new() -> Self {
        RequestIdMiddleware {
            header: Rc::new(HeaderName::from_static(DEFAULT_REQUEST_ID_HEADER)),
        }
    }

    /// Read and echo the identifier under `header` instead of `X-Request-ID`.
    pub fn header(mut self, header: &str) -> Result<Self, ConfigError> {
        let name = HeaderName::try_from(header)
            .map_err(|_| ConfigError::InvalidHeaderName(header.to_string()))?;
        self.header = Rc::new(name);
        Ok(self)
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.header
    }
}

impl Default for RequestIdMiddleware {
    fn default() -> Self {
        RequestIdMiddleware::new()
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestIdMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestIdService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestIdService {
            service,
            header: Rc::clone(&self.header),
        }))
    }
}

pub struct RequestIdService<S> {
    service: S,
    header: Rc<HeaderName>,
}

impl<S, B> Service<ServiceRequest> for RequestIdService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = RequestIdResponse<S, B>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let inbound = req
            .headers()
            .get(self.header.as_ref())
            .filter(|value| !value.is_empty())
            .cloned();

        // echoed byte for byte; the context keeps a lossy text copy
        let (id, value) = match inbound {
            Some(value) => (String::from_utf8_lossy(value.as_bytes()).into_owned(), Some(value)),
            None => {
                let id = generated_id(&req);
                let value = HeaderValue::from_str(&id).ok();
                (id, value)
            }
        };

        req.set_context_value(REQUEST_ID, id);

        RequestIdResponse {
            fut: self.service.call(req),
            header: Rc::clone(&self.header),
            value,
            _phantom: PhantomData,
        }
    }
}

#[cfg(feature = "tracing-request-id")]
fn generated_id(req: &ServiceRequest) -> String {
    let existing = req
        .extensions()
        .get::<tracing_actix_web::RequestId>()
        .map(|id| id.to_string());
    match existing {
        Some(id) => id,
        None => fresh_id(req),
    }
}

#[cfg(not(feature = "tracing-request-id"))]
fn generated_id(req: &ServiceRequest) -> String {
    fresh_id(req)
}

fn fresh_id(req: &ServiceRequest) -> String {
    let id = RequestId::new();
    req.extensions_mut().insert(id);
    id.to_string()
}

pin_project! {
    pub struct RequestIdResponse<S, B>
    where
        S: Service<ServiceRequest>,
    {
        #[pin]
        fut: S::Future,
        header: Rc<HeaderName>,
        value: Option<HeaderValue>,
        _phantom: PhantomData<B>,
    }
}

impl<S, B> Future for RequestIdResponse<S, B>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Output = Result<ServiceResponse<B>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match ready!(this.fut.poll(cx)) {
            Ok(mut res) => {
                if let Some(value) = this.value.take() {
                    res.headers_mut().insert(this.header.as_ref().clone(), value);
                }
                Poll::Ready(Ok(res))
            }
            Err(err) => {
                let Some(value) = this.value.take() else {
                    return Poll::Ready(Err(err));
                };
                let mut res = err.error_response();
                res.headers_mut().insert(this.header.as_ref().clone(), value);
                Poll::Ready(Err(InternalError::from_response(err, res).into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::{TestRequest, call_service, init_service, read_body};
    use actix_web::{App, HttpRequest, HttpResponse, web};

    async fn echo_id(req: HttpRequest) -> HttpResponse {
        HttpResponse::Ok().body(req.request_id().unwrap_or_default())
    }

    #[test]
    fn test_request_id_generation() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
        assert_eq!(id1.to_string().len(), 36);
    }

    #[test]
    fn test_header_config() {
        let mw = RequestIdMiddleware::default();
        assert_eq!(mw.header_name().as_str(), "x-request-id");

        let mw = RequestIdMiddleware::new().header("X-Correlation-ID").unwrap();
        assert_eq!(mw.header_name().as_str(), "x-correlation-id");

        assert!(matches!(
            RequestIdMiddleware::new().header("bad header"),
            Err(ConfigError::InvalidHeaderName(_))
        ));
    }

    #[actix_web::test]
    async fn test_reuses_inbound_id() {
        let app = init_service(
            App::new()
                .wrap(RequestIdMiddleware::default())
                .route("/", web::get().to(echo_id)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/")
            .insert_header(("X-Request-ID", "upstream-42"))
            .to_request();
        let res = call_service(&app, req).await;

        assert_eq!(
            res.headers().get("x-request-id").unwrap().to_str().unwrap(),
            "upstream-42"
        );
        let body = read_body(res).await;
        assert_eq!(body, "upstream-42");
    }

    #[actix_web::test]
    async fn test_generates_id_when_absent() {
        let app = init_service(
            App::new()
                .wrap(RequestIdMiddleware::default())
                .route("/", web::get().to(echo_id)),
        )
        .await;

        let res = call_service(&app, TestRequest::get().uri("/").to_request()).await;
        let header = res
            .headers()
            .get("x-request-id")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(!header.is_empty());
        assert!(Uuid::parse_str(&header).is_ok());

        let body = read_body(res).await;
        assert_eq!(body, header.as_str());

        let other = call_service(&app, TestRequest::get().uri("/").to_request()).await;
        assert_ne!(
            other.headers().get("x-request-id").unwrap().to_str().unwrap(),
            header
        );
    }

    #[actix_web::test]
    async fn test_empty_inbound_id_is_replaced() {
        let app = init_service(
            App::new()
                .wrap(RequestIdMiddleware::default())
                .route("/", web::get().to(echo_id)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/")
            .insert_header(("x-request-id", ""))
            .to_request();
        let res = call_service(&app, req).await;
        let header = res.headers().get("x-request-id").unwrap().to_str().unwrap();
        assert!(!header.is_empty());
    }

    async fn failing() -> Result<HttpResponse, Error> {
        Err(actix_web::error::ErrorServiceUnavailable("maintenance"))
    }

    #[actix_web::test]
    async fn test_non_ascii_inbound_id_is_kept() {
        let app = init_service(
            App::new()
                .wrap(RequestIdMiddleware::default())
                .route("/", web::get().to(echo_id)),
        )
        .await;

        let inbound = HeaderValue::from_bytes(b"id-\xe9").unwrap();
        let req = TestRequest::get()
            .uri("/")
            .insert_header(("x-request-id", inbound.clone()))
            .to_request();
        let res = call_service(&app, req).await;

        assert_eq!(res.headers().get("x-request-id"), Some(&inbound));
        let body = read_body(res).await;
        assert_eq!(body, "id-\u{FFFD}");
    }

    #[actix_web::test]
    async fn test_header_set_on_service_error() {
        let app = init_service(
            App::new()
                .wrap(RequestIdMiddleware::default())
                .wrap_fn(|req, srv| {
                    let fut = srv.call(req);
                    async move {
                        let res = fut.await?;
                        match res.response().error() {
                            Some(_) => Err(actix_web::error::ErrorServiceUnavailable("maintenance")),
                            None => Ok(res),
                        }
                    }
                })
                .route("/down", web::get().to(failing)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/down")
            .insert_header(("x-request-id", "err-1"))
            .to_request();
        let err = match app.call(req).await {
            Ok(_) => panic!("expected service error"),
            Err(err) => err,
        };
        let res = err.error_response();
        assert_eq!(res.status(), 503);
        assert_eq!(res.headers().get("x-request-id").unwrap(), "err-1");
    }

    #[actix_web::test]
    async fn test_custom_header() {
        let app = init_service(
            App::new()
                .wrap(RequestIdMiddleware::new().header("x-correlation-id").unwrap())
                .route("/", web::get().to(echo_id)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/")
            .insert_header(("x-correlation-id", "corr-1"))
            .to_request();
        let res = call_service(&app, req).await;
        assert_eq!(
            res.headers().get("x-correlation-id").unwrap().to_str().unwrap(),
            "corr-1"
        );
        assert!(res.headers().get("x-request-id").is_none());
    }
}
