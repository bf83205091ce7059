//! HTTP handlers for `/api/ping`, `/api/post` and the `/metrics` listener

use crate::api::{ErrorResponse, PingResponse, PostRequest, PostResponse};
use crate::event::normalize;
use crate::instrumentation::{self, HANDLER_PING, HANDLER_POST};
use crate::queue::IngestQueue;
use actix_web::error::InternalError;
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use metrics_exporter_prometheus::PrometheusHandle;
use std::time::Instant;
use tracing::{debug, error, info};

/// Largest accepted `/api/post` body
pub const MAX_REQUEST_BODY: usize = 10 * 1024 * 1024;

/// Host recorded when the client address is not known
pub const UNKNOWN_PEER: &str = "unknown";

// App state
pub struct AppState {
    pub queue: IngestQueue,
}

impl AppState {
    pub fn new(queue: IngestQueue) -> Self {
        Self { queue }
    }
}

/// Register routes. Shared by the binary and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default()
        .limit(MAX_REQUEST_BODY)
        .content_type_required(false)
        .error_handler(|err, _req| {
            let message = format!("failed to decode request: {}", err);
            let response = HttpResponse::BadRequest().json(ErrorResponse::new(message));
            InternalError::from_response(err, response).into()
        });

    cfg.app_data(json_config)
        .service(web::resource("/api/ping").route(web::get().to(ping)))
        .service(web::resource("/api/post").route(web::post().to(post_events)));
}

/// Register the Prometheus scrape route, served on its own port.
pub fn configure_metrics(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/metrics").route(web::get().to(metrics_endpoint)));
}

pub async fn metrics_endpoint(handle: web::Data<PrometheusHandle>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(handle.render())
}

// Liveness and version
pub async fn ping() -> impl Responder {
    let start = Instant::now();
    debug!("Received ping request");
    let response = PingResponse::now();
    info!(status = %response.status, version = %response.version, "Sending ping response");
    instrumentation::record_handler(HANDLER_PING, start.elapsed());
    HttpResponse::Ok().json(response)
}

/// Normalize and enqueue every event in the request.
///
/// The reported count is what entered the pipeline, not what was delivered.
pub async fn post_events(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<PostRequest>,
) -> impl Responder {
    let start = Instant::now();
    let request = body.into_inner();
    let remote_addr = peer_address(&req);
    let defaults = request.defaults();
    let count = request.events.len();

    debug!(count, remote_addr = %remote_addr, "Received post request");

    let mut enqueued = 0;
    for record in request.events {
        let event = normalize(record, &defaults, &remote_addr);
        if let Err(e) = data.queue.enqueue(event).await {
            error!(enqueued, count, "Failed to enqueue event: {}", e);
            instrumentation::record_enqueued(enqueued);
            instrumentation::record_handler(HANDLER_POST, start.elapsed());
            return HttpResponse::ServiceUnavailable().json(ErrorResponse {
                error: e.to_string(),
                accepted: Some(enqueued),
            });
        }
        enqueued += 1;
    }

    info!(count, "Sending post response");
    instrumentation::record_enqueued(count);
    instrumentation::record_handler(HANDLER_POST, start.elapsed());
    HttpResponse::Ok().json(PostResponse { count })
}

fn peer_address(req: &HttpRequest) -> String {
    req.peer_addr()
        .map(|addr| addr.to_string())
        .or_else(|| req.connection_info().peer_addr().map(str::to_string))
        .unwrap_or_else(|| UNKNOWN_PEER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{QueueItem, ingest_queue};
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use serde_json::json;

    #[actix_web::test]
    async fn test_ping() {
        let (queue, _rx) = ingest_queue(4);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(queue)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/ping").to_request();
        let resp: PingResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(resp.status, "ok");
        assert_eq!(resp.version, env!("CARGO_PKG_VERSION"));
        assert!(chrono::DateTime::parse_from_rfc3339(&resp.timestamp).is_ok());
    }

    #[actix_web::test]
    async fn test_post_enqueues_normalized_events() {
        let (queue, mut rx) = ingest_queue(4);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(queue)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/post")
            .peer_addr("10.0.0.7:5555".parse().unwrap())
            .set_json(json!({
                "events": [
                    {"msg": "one", "time": "1700000000000"},
                    {"msg": "two", "time": "2023-01-01T00:00:00Z"}
                ],
                "index": "audit"
            }))
            .to_request();
        let resp: PostResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp, PostResponse { count: 2 });

        let QueueItem::Event(first) = rx.recv().await else {
            panic!("expected an event");
        };
        assert_eq!(first.payload["msg"], "one");
        assert_eq!(first.timestamp_ms, 1_700_000_000_000);
        assert_eq!(first.host, "10.0.0.7:5555");
        assert_eq!(first.source, "hermes");
        assert_eq!(first.source_type, "json");
        assert_eq!(first.index, "audit");

        let QueueItem::Event(second) = rx.recv().await else {
            panic!("expected an event");
        };
        assert_eq!(second.timestamp_ms, 1_672_531_200_000);
    }

    #[actix_web::test]
    async fn test_post_without_json_content_type() {
        let (queue, _rx) = ingest_queue(4);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(queue)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/post")
            .insert_header(("Content-Type", "application/x-www-form-urlencoded"))
            .set_payload(r#"{"events":[{"event":"AddMiddleware"}]}"#)
            .to_request();
        let resp: PostResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(resp.count, 1);
    }

    #[actix_web::test]
    async fn test_post_rejects_malformed_body() {
        let (queue, _rx) = ingest_queue(4);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(queue)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/post")
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert!(body.error.starts_with("failed to decode request"));
    }

    #[actix_web::test]
    async fn test_post_when_pipeline_is_gone() {
        let (queue, mut rx) = ingest_queue(4);
        rx.close();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(queue)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/post")
            .set_json(json!({"events": [{"msg": "late"}]}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.accepted, Some(0));
    }

    #[actix_web::test]
    async fn test_post_reports_events_enqueued_before_close() {
        let (queue, rx) = ingest_queue(2);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(queue)))
                .configure(configure),
        )
        .await;

        // the third event waits for room until the batcher side goes away
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            drop(rx);
        });

        let req = test::TestRequest::post()
            .uri("/api/post")
            .set_json(json!({"events": [{"n": 1}, {"n": 2}, {"n": 3}]}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.accepted, Some(2));
    }

    #[actix_web::test]
    async fn test_post_accepts_null_defaults() {
        let (queue, mut rx) = ingest_queue(4);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(queue)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/post")
            .peer_addr("10.0.0.9:4000".parse().unwrap())
            .set_payload(r#"{"events":[{"msg":"x"}],"host":null,"source":null}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: PostResponse = test::read_body_json(resp).await;
        assert_eq!(body, PostResponse { count: 1 });

        let QueueItem::Event(event) = rx.recv().await else {
            panic!("expected an event");
        };
        assert_eq!(event.host, "10.0.0.9:4000");
        assert_eq!(event.source, "hermes");
    }

    #[actix_web::test]
    async fn test_post_without_peer_address_uses_placeholder_host() {
        let (queue, mut rx) = ingest_queue(4);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(queue)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/post")
            .set_json(json!({"events": [{"msg": "anonymous"}]}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let QueueItem::Event(event) = rx.recv().await else {
            panic!("expected an event");
        };
        assert_eq!(event.host, UNKNOWN_PEER);
    }

    #[actix_web::test]
    async fn test_metrics_endpoint_renders_prometheus_text() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            instrumentation::record_handler(HANDLER_PING, std::time::Duration::from_millis(2));
        });

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(handle))
                .configure(configure_metrics),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = test::read_body(resp).await;
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.contains(r#"hermes_handler_duration_seconds_count{handler="ping"} 1"#));
    }

    #[actix_web::test]
    async fn test_wrong_method() {
        let (queue, _rx) = ingest_queue(4);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(queue)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/ping").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

        let req = test::TestRequest::get().uri("/api/post").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
