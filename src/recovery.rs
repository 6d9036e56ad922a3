use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

use futures_util::{FutureExt, future::LocalBoxFuture};

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::{Error, Result};

use crate::context::RequestInfo;
use crate::error::RecoveredPanic;
use crate::event::Field;
use crate::logger::Logger;

/// Middleware turning a panicking handler into a `500` response.
///
/// The panic is logged once at error level with the request metadata; the
/// request then fails with [`RecoveredPanic`] and the worker keeps serving.
/// Wrap it inside the loggers that should observe the `500`.
#[derive(Debug, Clone)]
pub struct RecoveryLogger {
    logger: Rc<Logger>,
}

impl RecoveryLogger {
    pub fn new(logger: Logger) -> Self {
        RecoveryLogger {
            logger: Rc::new(logger),
        }
    }
}

impl Default for RecoveryLogger {
    fn default() -> Self {
        RecoveryLogger::new(Logger::global())
    }
}

impl<S, B> Transform<S, ServiceRequest> for RecoveryLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RecoveryLoggerService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RecoveryLoggerService {
            service,
            logger: Rc::clone(&self.logger),
        }))
    }
}

pub struct RecoveryLoggerService<S> {
    service: S,
    logger: Rc<Logger>,
}

impl<S, B> Service<ServiceRequest> for RecoveryLoggerService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<ServiceResponse<B>, Error>>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let info = RequestInfo::capture(&req);
        let logger = Rc::clone(&self.logger);

        let fut = match panic::catch_unwind(AssertUnwindSafe(|| self.service.call(req))) {
            Ok(fut) => fut,
            Err(payload) => {
                let err = recovered(&logger, &info, payload.as_ref());
                return Box::pin(futures_util::future::ready(Err(err)));
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(res) => res,
                Err(payload) => Err(recovered(&logger, &info, payload.as_ref())),
            }
        })
    }
}

fn recovered(logger: &Logger, info: &RequestInfo, payload: &(dyn Any + Send)) -> Error {
    let message = panic_message(payload);

    let mut fields = info.base_fields();
    fields.push(Field::str("panic", message.as_str()));
    info.push_request_id(&mut fields);
    logger.error("Panic recovered", fields);

    RecoveredPanic::new(message).into()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
