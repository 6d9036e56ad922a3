use std::{
    future::Future,
    marker::PhantomData,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use futures_core::ready;
use pin_project_lite::pin_project;

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::error::{
    JsonPayloadError, PathError, PayloadError, QueryPayloadError, UrlencodedError,
};
use actix_web::{Error, Result};

use crate::context::{ErrorKind, RequestContextExt, RequestError, RequestInfo};
use crate::error::RecoveredPanic;
use crate::event::{Field, Level};
use crate::logger::Logger;

impl ErrorKind {
    pub fn level(self) -> Level {
        match self {
            ErrorKind::Bind => Level::Warn,
            ErrorKind::Render => Level::Error,
            ErrorKind::Public => Level::Info,
            ErrorKind::Private => Level::Error,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::Bind => "Binding error",
            ErrorKind::Render => "Rendering error",
            ErrorKind::Public => "Public error",
            ErrorKind::Private => "Internal error",
        }
    }

    /// Category of an actix error: extractor failures are binding errors.
    pub fn of(err: &Error) -> Self {
        let bind = err.as_error::<JsonPayloadError>().is_some()
            || err.as_error::<QueryPayloadError>().is_some()
            || err.as_error::<PathError>().is_some()
            || err.as_error::<UrlencodedError>().is_some()
            || err.as_error::<PayloadError>().is_some();
        if bind { ErrorKind::Bind } else { ErrorKind::Private }
    }
}

/// Middleware logging errors raised while handling a request.
///
/// Reports, in order, every error attached with
/// [`RequestContextExt::push_error`] and then the actix error carried by the
/// response. Errors are only logged, never altered.
#[derive(Debug, Clone)]
pub struct ErrorLogger {
    logger: Rc<Logger>,
}

impl ErrorLogger {
    pub fn new(logger: Logger) -> Self {
        ErrorLogger {
            logger: Rc::new(logger),
        }
    }
}

impl Default for ErrorLogger {
    fn default() -> Self {
        ErrorLogger::new(Logger::global())
    }
}

impl<S, B> Transform<S, ServiceRequest> for ErrorLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = ErrorLoggerService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ErrorLoggerService {
            service,
            logger: Rc::clone(&self.logger),
        }))
    }
}

pub struct ErrorLoggerService<S> {
    service: S,
    logger: Rc<Logger>,
}

impl<S, B> Service<ServiceRequest> for ErrorLoggerService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = ErrorLoggerResponse<S, B>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let info = RequestInfo::capture(&req);

        ErrorLoggerResponse {
            fut: self.service.call(req),
            info,
            logger: Rc::clone(&self.logger),
            _phantom: PhantomData,
        }
    }
}

pin_project! {
    pub struct ErrorLoggerResponse<S, B>
    where
        S: Service<ServiceRequest>,
    {
        #[pin]
        fut: S::Future,
        info: RequestInfo,
        logger: Rc<Logger>,
        _phantom: PhantomData<B>,
    }
}

impl<S, B> Future for ErrorLoggerResponse<S, B>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Output = Result<ServiceResponse<B>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let res = match ready!(this.fut.poll(cx)) {
            Ok(res) => res,
            Err(err) => {
                // recovered panics were already reported by the recovery logger
                if err.as_error::<RecoveredPanic>().is_none() {
                    let error = RequestError::new(ErrorKind::of(&err), &err);
                    report(this.logger, this.info, &error);
                }
                return Poll::Ready(Err(err));
            }
        };

        for error in res.request().request_errors() {
            report(this.logger, this.info, &error);
        }

        if let Some(err) = res.response().error() {
            let error = RequestError::new(ErrorKind::of(err), err);
            report(this.logger, this.info, &error);
        }

        Poll::Ready(Ok(res))
    }
}

fn report(logger: &Logger, info: &RequestInfo, error: &RequestError) {
    let mut fields = info.base_fields();
    fields.push(Field::str("error", error.message.as_str()));
    info.push_request_id(&mut fields);

    logger.emit(error.kind.level(), error.kind.message(), fields);
}
