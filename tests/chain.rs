use std::time::Duration;

use actix_service::Service;
use actix_web::http::header;
use actix_web::{App, HttpRequest, HttpResponse, rt::time::sleep, test, web};
use actix_web_middleware_reqlog::{
    ErrorKind, ErrorLogger, Level, Logger, MemorySink, PerformanceLogger, RecoveryLogger,
    RequestContextExt, RequestIdMiddleware, SecurityLogger, StructuredLogger,
    StructuredLoggerConfig, Value,
};

async fn ok() -> HttpResponse {
    HttpResponse::Ok().finish()
}

async fn echo(body: web::Bytes) -> HttpResponse {
    HttpResponse::Ok().body(body)
}

async fn status(path: web::Path<u16>) -> HttpResponse {
    HttpResponse::build(actix_web::http::StatusCode::from_u16(path.into_inner()).unwrap())
        .finish()
}

async fn slow() -> HttpResponse {
    sleep(Duration::from_millis(60)).await;
    HttpResponse::NotFound().finish()
}

async fn boom() -> HttpResponse {
    panic!("chain exploded");
}

async fn profile(req: HttpRequest, base: web::Data<Logger>) -> HttpResponse {
    req.scoped_logger(&base).info("before login", vec![]);
    req.set_user_id("u-7");
    req.scoped_logger(&base).info("after login", vec![]);
    req.push_error(ErrorKind::Public, "profile incomplete");
    HttpResponse::Ok().finish()
}

macro_rules! chain {
    ($sink:expr) => {{
        let logger = $sink.logger();
        let config = StructuredLoggerConfig::default()
            .log_client_ip(true)
            .log_request_body(true)
            .max_body_size(16)
            .exclude("/health");
        test::init_service(
            App::new()
                .app_data(web::Data::new(logger.clone()))
                .wrap(RecoveryLogger::new(logger.clone()))
                .wrap(ErrorLogger::new(logger.clone()))
                .wrap(StructuredLogger::new(logger.clone(), config))
                .wrap(PerformanceLogger::with_threshold(
                    logger.clone(),
                    Duration::from_millis(20),
                ))
                .wrap(SecurityLogger::new(logger))
                .wrap(RequestIdMiddleware::default())
                .route("/health", web::post().to(echo))
                .route("/echo", web::post().to(echo))
                .route("/status/{code}", web::get().to(status))
                .route("/slow", web::get().to(slow))
                .route("/panic", web::get().to(boom))
                .route("/profile", web::get().to(profile))
                .default_service(web::to(ok)),
        )
        .await
    }};
}

fn post(uri: &str, body: &'static str) -> test::TestRequest {
    test::TestRequest::post()
        .uri(uri)
        .insert_header((header::CONTENT_LENGTH, body.len()))
        .set_payload(body)
}

#[actix_web::test]
async fn excluded_path_is_silent_and_body_untouched() {
    let sink = MemorySink::new();
    let app = chain!(sink);

    let body = test::call_and_read_body(&app, post("/health", "ping").to_request()).await;
    assert_eq!(body, "ping");
    assert!(sink.with_message("Request completed").is_empty());
    assert!(sink.records().iter().all(|r| !r.has_field("request_body")));
}

#[actix_web::test]
async fn request_id_is_echoed_or_generated() {
    let sink = MemorySink::new();
    let app = chain!(sink);

    let req = test::TestRequest::get()
        .uri("/")
        .insert_header(("x-request-id", "abc-123"))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.headers().get("x-request-id").unwrap(), "abc-123");
    drop(res);

    let res = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
    let generated = res
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap();
    assert!(!generated.is_empty());
    assert_ne!(generated, "abc-123");
    drop(res);

    let ids: Vec<String> = sink
        .with_message("Request completed")
        .iter()
        .filter_map(|r| r.str_field("request_id").map(str::to_owned))
        .collect();
    assert_eq!(ids, vec!["abc-123".to_string(), generated]);
}

#[actix_web::test]
async fn severity_tracks_status_class() {
    let sink = MemorySink::new();
    let app = chain!(sink);

    for code in [201, 301, 400, 499, 500, 599] {
        let req = test::TestRequest::get()
            .uri(&format!("/status/{code}"))
            .to_request();
        test::call_and_read_body(&app, req).await;
    }

    let levels: Vec<(u64, Level)> = sink
        .records()
        .iter()
        .filter(|r| r.has_field("body_size"))
        .map(|r| (r.field("status").and_then(Value::as_u64).unwrap(), r.level))
        .collect();
    assert_eq!(
        levels,
        vec![
            (201, Level::Info),
            (301, Level::Info),
            (400, Level::Warn),
            (499, Level::Warn),
            (500, Level::Error),
            (599, Level::Error),
        ]
    );
}

#[actix_web::test]
async fn bodies_reach_handler_and_oversized_are_not_logged() {
    let sink = MemorySink::new();
    let app = chain!(sink);

    let body = test::call_and_read_body(&app, post("/echo", "small").to_request()).await;
    assert_eq!(body, "small");
    let big = "this body is longer than sixteen bytes";
    let body = test::call_and_read_body(&app, post("/echo", big).to_request()).await;
    assert_eq!(body, big);

    let records = sink.with_message("Request completed");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].str_field("request_body"), Some("small"));
    assert!(!records[1].has_field("request_body"));
}

#[actix_web::test]
async fn security_findings_do_not_block() {
    let sink = MemorySink::new();
    let app = chain!(sink);

    let cases = [
        ("/api/users?id=1'%20UNION%20SELECT%20*%20FROM%20users--", Some("SQL injection attempt")),
        ("/search?q=%3Cscript%3Ealert(1)%3C/script%3E", Some("XSS attempt")),
        ("/files/../../etc/passwd", Some("Path traversal attempt")),
        ("/api/users/42", None),
    ];

    for (uri, reason) in cases {
        sink.clear();
        let res = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
        assert!(res.status().is_success());
        drop(res);

        let warnings = sink.with_message("Suspicious request detected");
        match reason {
            Some(reason) => {
                assert_eq!(warnings.len(), 1, "{uri}");
                assert_eq!(warnings[0].level, Level::Warn);
                assert_eq!(warnings[0].str_field("reason"), Some(reason));
            }
            None => assert!(warnings.is_empty(), "{uri}"),
        }
    }
}

#[actix_web::test]
async fn slow_request_warns_once() {
    let sink = MemorySink::new();
    let app = chain!(sink);

    test::call_and_read_body(&app, test::TestRequest::get().uri("/slow").to_request()).await;

    let warnings = sink.with_message("Slow request detected");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field("status").and_then(Value::as_u64), Some(404));
}

#[actix_web::test]
async fn panic_is_recovered_once() {
    let sink = MemorySink::new();
    let app = chain!(sink);

    let req = test::TestRequest::get()
        .uri("/panic")
        .insert_header(("x-request-id", "abc-123"))
        .to_request();
    let err = match app.call(req).await {
        Ok(_) => panic!("expected recovered panic"),
        Err(err) => err,
    };
    let res = err.error_response();
    assert_eq!(res.status(), 500);
    assert_eq!(res.headers().get("x-request-id").unwrap(), "abc-123");

    let panics = sink.with_message("Panic recovered");
    assert_eq!(panics.len(), 1);
    assert_eq!(panics[0].level, Level::Error);
    assert_eq!(panics[0].str_field("panic"), Some("chain exploded"));
    assert!(sink.with_message("Internal error").is_empty());

    let completed = sink.with_message("Server error");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].field("status").and_then(Value::as_u64), Some(500));

    let res = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
    assert!(res.status().is_success());
}

#[actix_web::test]
async fn scoped_logger_and_context_errors() {
    let sink = MemorySink::new();
    let app = chain!(sink);

    test::call_and_read_body(&app, test::TestRequest::get().uri("/profile").to_request()).await;

    let before = &sink.with_message("before login")[0];
    let after = &sink.with_message("after login")[0];
    assert_eq!(before.keys(), vec!["request_id"]);
    assert_eq!(after.keys(), vec!["request_id", "user_id"]);
    assert_eq!(before.str_field("request_id"), after.str_field("request_id"));
    assert_eq!(after.str_field("user_id"), Some("u-7"));

    let public = sink.with_message("Public error");
    assert_eq!(public.len(), 1);
    assert_eq!(public[0].level, Level::Info);

    let completed = sink.with_message("Request completed");
    assert_eq!(completed[0].str_field("user_id"), Some("u-7"));
}
