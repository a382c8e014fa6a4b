mod common;

use actix_web::body::MessageBody;
use actix_web::http::StatusCode;
use actix_web::{test, App};
use common::*;
use deckhand::ledger::{MemoryStepLedger, StepLedger};
use deckhand::models::{ConnectionMode, ModuleConfig};
use deckhand::startup::AppServices;
use serde_json::{json, Value};
use std::sync::Arc;

fn services(module: ModuleConfig, recorder: Arc<Recorder>) -> AppServices {
    let ledger: Arc<dyn StepLedger> = Arc::new(MemoryStepLedger::new());
    AppServices::new(
        catalog(module, environment(ConnectionMode::Ssh), vec![]),
        ledger,
        Arc::new(RecordingFactory { recorder }),
        fast_settings(),
    )
}

#[actix_web::test]
async fn health_check_works() {
    let services = services(binary_module("/opt/app"), Recorder::new());
    let app = test::init_service(App::new().configure(|cfg| services.configure(cfg))).await;

    let req = test::TestRequest::get().uri("/health_check").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn requests_without_caller_are_unauthorized() {
    let services = services(binary_module("/opt/app"), Recorder::new());
    let app = test::init_service(App::new().configure(|cfg| services.configure(cfg))).await;

    let req = test::TestRequest::get()
        .uri("/api/v1/deployments/active")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn only_listed_operators_may_deploy() {
    let mut module = binary_module("/opt/app");
    module.operators = vec!["alice".to_string()];
    let recorder = Recorder::new();
    let services = services(module, recorder.clone());
    let app = test::init_service(App::new().configure(|cfg| services.configure(cfg))).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/deployments")
        .insert_header(("X-User-Id", "mallory"))
        .set_json(json!({
            "module_id": MODULE_ID,
            "artifact_local_path": "/tmp/app.jar",
            "artifact_file_name": "app.jar"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(recorder.calls().is_empty());
}

#[actix_web::test]
async fn deploy_then_poll_progress() {
    let recorder = Recorder::new();
    recorder.on("uname", Reply::stdout("Linux\n"));
    let services = services(binary_module("/opt/app"), recorder.clone());
    let app = test::init_service(App::new().configure(|cfg| services.configure(cfg))).await;
    let uploads = tempfile::tempdir().unwrap();
    let local = artifact(uploads.path(), "app.jar", b"build 42");

    let req = test::TestRequest::post()
        .uri("/api/v1/deployments")
        .insert_header(("X-User-Id", "alice"))
        .set_json(json!({
            "module_id": MODULE_ID,
            "artifact_local_path": local.display().to_string(),
            "artifact_file_name": "app.jar"
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "OK");
    assert_eq!(body["item"]["version"].as_str().map(str::len), Some(10));

    let req = test::TestRequest::get()
        .uri("/api/v1/deployments/active")
        .insert_header(("X-User-Id", "alice"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let attempts = body["list"].as_array().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0]["status"], "success");
    assert_eq!(attempts[0]["user_id"], "alice");
    let attempt_id = attempts[0]["id"].as_i64().unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/deployments/{}", attempt_id))
        .insert_header(("X-User-Id", "alice"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["item"]["steps"][0]["step_key"], "local.uploaded");
    assert_eq!(body["item"]["steps"].as_array().map(Vec::len), Some(10));

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/deployments/{}", attempt_id))
        .insert_header(("X-User-Id", "bob"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn failed_deploy_reports_the_classified_message() {
    let recorder = Recorder::new();
    recorder.fail_connect(ConnectFailure::Timeout);
    let services = services(binary_module("/opt/app"), recorder);
    let app = test::init_service(App::new().configure(|cfg| services.configure(cfg))).await;
    let uploads = tempfile::tempdir().unwrap();
    let local = artifact(uploads.path(), "app.jar", b"build 42");

    let req = test::TestRequest::post()
        .uri("/api/v1/deployments")
        .insert_header(("X-User-Id", "alice"))
        .set_json(json!({
            "module_id": MODULE_ID,
            "artifact_local_path": local.display().to_string(),
            "artifact_file_name": "app.jar"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "Error");
    assert!(body["message"].as_str().unwrap().contains("timed out"));
}

#[actix_web::test]
async fn restart_and_stop_endpoints_run_lifecycle_commands() {
    let recorder = Recorder::new();
    recorder.on("uname", Reply::stdout("Linux\n"));
    let services = services(binary_module("/opt/app"), recorder.clone());
    let app = test::init_service(App::new().configure(|cfg| services.configure(cfg))).await;

    let req = test::TestRequest::post()
        .uri(&format!(
            "/api/v1/modules/{}/restart?environment_id={}",
            MODULE_ID, ENVIRONMENT_ID
        ))
        .insert_header(("X-User-Id", "alice"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/modules/{}/stop", MODULE_ID))
        .insert_header(("X-User-Id", "alice"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    assert!(recorder.position("cd '/opt/app' && ./restart.sh").is_some());
    assert!(recorder.position("cd '/opt/app' && ./stop.sh").is_some());

    let req = test::TestRequest::post()
        .uri("/api/v1/modules/99/restart")
        .insert_header(("X-User-Id", "alice"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn log_stream_is_served_as_events_and_released_on_disconnect() {
    let recorder = Recorder::new();
    recorder.tail_with(&["started on port 8080\n"]);
    let services = services(binary_module("/opt/app"), recorder.clone());
    let app = test::init_service(App::new().configure(|cfg| services.configure(cfg))).await;

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/modules/{}/logs", MODULE_ID))
        .insert_header(("X-User-Id", "alice"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert!(recorder
        .calls()
        .contains(&Call::Tail("/var/log/billing.log".to_string())));

    let mut body = Box::pin(resp.into_body());
    let chunk = futures::future::poll_fn(|cx| body.as_mut().poll_next(cx))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&chunk[..], b"data: started on port 8080\n\n");

    drop(body);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(recorder.calls().last(), Some(&Call::Disconnect));
}
