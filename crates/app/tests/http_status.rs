mod common;

use std::sync::Arc;

use actix_web::{App, http::header, test, web::Data};
use common::{CountingBackend, ScriptedDetector, config, context};
use serde_json::Value;
use vision_guide::guide::server::routes;

#[actix_web::test]
async fn status_reports_mode_and_clients_with_cors() {
    let ctx = context(
        config(),
        Arc::new(CountingBackend::default()),
        ScriptedDetector::default(),
        "",
    );
    let app = test::init_service(App::new().app_data(Data::new(ctx)).configure(routes)).await;

    let req = test::TestRequest::get()
        .uri("/")
        .insert_header((header::ORIGIN, "http://localhost:5173"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|value| value.to_str().ok()),
        Some("http://localhost:5173")
    );
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "idle");
    assert_eq!(body["mode"], "SCAN");
    assert_eq!(body["clients"], 0);
    assert_eq!(body["capture"], "idle");
    assert!(body["fault"].is_null());
}

#[actix_web::test]
async fn unknown_origins_get_no_cors_header() {
    let ctx = context(
        config(),
        Arc::new(CountingBackend::default()),
        ScriptedDetector::default(),
        "",
    );
    let app = test::init_service(App::new().app_data(Data::new(ctx)).configure(routes)).await;

    let req = test::TestRequest::get()
        .uri("/")
        .insert_header((header::ORIGIN, "http://evil.test"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert!(
        resp.headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}
