use std::{
    future::Future,
    marker::PhantomData,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
    time::Duration,
};

use futures_core::ready;
use pin_project_lite::pin_project;

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::{Error, Result};

use crate::context::RequestInfo;
use crate::event::Field;
use crate::logger::Logger;
use crate::timing::{Clock, SLOW_REQUEST_THRESHOLD, TimeZone, is_slow};

/// Middleware warning about requests slower than a threshold (one second by
/// default), whatever their status.
#[derive(Debug, Clone)]
pub struct PerformanceLogger(Rc<Inner>);

#[derive(Debug)]
struct Inner {
    logger: Logger,
    threshold: Duration,
}

impl PerformanceLogger {
    pub fn new(logger: Logger) -> Self {
        PerformanceLogger::with_threshold(logger, SLOW_REQUEST_THRESHOLD)
    }

    pub fn with_threshold(logger: Logger, threshold: Duration) -> Self {
        PerformanceLogger(Rc::new(Inner { logger, threshold }))
    }

    pub fn threshold(&self) -> Duration {
        self.0.threshold
    }
}

impl Default for PerformanceLogger {
    fn default() -> Self {
        PerformanceLogger::new(Logger::global())
    }
}

impl<S, B> Transform<S, ServiceRequest> for PerformanceLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = PerformanceLoggerService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(PerformanceLoggerService {
            service,
            inner: Rc::clone(&self.0),
        }))
    }
}

pub struct PerformanceLoggerService<S> {
    service: S,
    inner: Rc<Inner>,
}

impl<S, B> Service<ServiceRequest> for PerformanceLoggerService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = PerformanceResponse<S, B>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let clock = Clock::start(TimeZone::Utc);
        let info = RequestInfo::capture(&req);

        PerformanceResponse {
            fut: self.service.call(req),
            clock,
            info: Some(info),
            inner: Rc::clone(&self.inner),
            _phantom: PhantomData,
        }
    }
}

pin_project! {
    pub struct PerformanceResponse<S, B>
    where
        S: Service<ServiceRequest>,
    {
        #[pin]
        fut: S::Future,
        clock: Clock,
        info: Option<RequestInfo>,
        inner: Rc<Inner>,
        _phantom: PhantomData<B>,
    }
}

impl<S, B> Future for PerformanceResponse<S, B>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Output = Result<ServiceResponse<B>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let res = ready!(this.fut.poll(cx));
        let latency = this.clock.elapsed();

        if is_slow(latency, this.inner.threshold) {
            let status = match &res {
                Ok(res) => res.status(),
                Err(err) => err.as_response_error().status_code(),
            };
            if let Some(info) = this.info.take() {
                report(&this.inner.logger, &info, latency, status);
            }
        }

        Poll::Ready(res)
    }
}

fn report(logger: &Logger, info: &RequestInfo, latency: Duration, status: StatusCode) {
    let mut fields = vec![
        Field::str("method", info.method.as_str()),
        Field::str("path", info.path.as_str()),
        Field::duration("latency", latency),
        Field::uint("status", u64::from(status.as_u16())),
    ];
    info.push_request_id(&mut fields);

    logger.warn("Slow request detected", fields);
}
