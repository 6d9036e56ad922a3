//! Demo server wiring the whole middleware chain, logging JSON to stdout.
//!
//! ```bash
//! cargo run --example chain
//! curl -H 'x-request-id: demo-1' 'localhost:8080/users/7'
//! curl "localhost:8080/search?q=1'%20UNION%20SELECT%20*%20FROM%20users--"
//! curl localhost:8080/panic
//! ```
use std::time::Duration;

use actix_web::{App, HttpRequest, HttpResponse, HttpServer, rt::time::sleep, web};
use actix_web_middleware_reqlog::{
    ErrorKind, ErrorLogger, Field, Logger, PerformanceLogger, RecoveryLogger, RequestBodyLogger,
    RequestContextExt, RequestIdMiddleware, SecurityLogger, StructuredLogger,
    StructuredLoggerConfig,
};
use structured_logger::{Builder, async_json::new_writer};

async fn index() -> &'static str {
    "Hello world!"
}

async fn user(req: HttpRequest, path: web::Path<u32>) -> HttpResponse {
    let id = path.into_inner();
    req.set_user_id(id.to_string());
    req.logger()
        .info("user loaded", vec![Field::uint("profile_version", 3)]);
    HttpResponse::Ok().body(format!("user {id}"))
}

async fn search(req: HttpRequest) -> HttpResponse {
    req.push_error(ErrorKind::Public, "search index is stale");
    HttpResponse::Ok().body(req.query_string().to_owned())
}

async fn echo(body: web::Bytes) -> HttpResponse {
    HttpResponse::Ok().body(body)
}

async fn slow() -> &'static str {
    sleep(Duration::from_millis(1200)).await;
    "finally"
}

async fn boom() -> HttpResponse {
    panic!("demo panic");
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    Builder::new()
        .with_target_writer("*", new_writer(tokio::io::stdout()))
        .init();

    HttpServer::new(|| {
        let logger = Logger::global();
        let config = StructuredLoggerConfig::default()
            .log_client_ip(true)
            .log_user_agent(true)
            .log_referer(true)
            .log_response_body(true)
            .max_body_size(4096)
            .log_header("Content-Type")
            .exclude("/health")
            .custom_fields(|_req: &HttpRequest| vec![Field::str("service", "reqlog-demo")]);

        App::new()
            .wrap(RecoveryLogger::new(logger.clone()))
            .wrap(RequestBodyLogger::new(logger.clone()).max_body_size(4096))
            .wrap(ErrorLogger::new(logger.clone()))
            .wrap(StructuredLogger::new(logger.clone(), config))
            .wrap(PerformanceLogger::new(logger.clone()))
            .wrap(SecurityLogger::new(logger))
            .wrap(RequestIdMiddleware::default())
            .route("/", web::get().to(index))
            .route("/health", web::get().to(index))
            .route("/users/{id}", web::get().to(user))
            .route("/search", web::get().to(search))
            .route("/echo", web::post().to(echo))
            .route("/slow", web::get().to(slow))
            .route("/panic", web::get().to(boom))
    })
    .bind(("127.0.0.1", 8080))?
    .run()
    .await
}
