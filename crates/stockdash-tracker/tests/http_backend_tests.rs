/*
[INPUT]:  Tracker built from configuration against a wiremock dashboard backend
[OUTPUT]: Verification of the real HTTP path (submit, polling fallback, cancel, active listing)
[POS]:    Integration test layer - tracker over HTTP
[UPDATE]: When endpoint paths or fallback policy change
*/

use serde_json::json;
use std::time::Duration;
use tokio_test::assert_ok;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stockdash_adapter::{AnalysisRequest, TaskStatus};
use stockdash_tracker::{BackendAck, TaskId, TaskTracker, TrackerConfig};

fn envelope(data: serde_json::Value) -> serde_json::Value {
    json!({ "code": 200, "message": "success", "data": data })
}

fn config_for(server: &MockServer) -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.api.base_url = server.uri();
    config.streaming.connect_timeout_ms = 2_000;
    config.polling.interval_ms = 500;
    config
}

#[tokio::test]
async fn test_submit_then_poll_over_http_when_stream_is_refused() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/stock/analyze-async"))
        .and(header_exists("x-request-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({ "task_id": "H1" }))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tasks/H1/progress"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "task_id": "H1",
            "status": "completed",
            "progress": 100,
            "result": { "summary": "hold" }
        }))))
        .mount(&server)
        .await;

    let tracker = assert_ok!(TaskTracker::from_config(config_for(&server)));
    let task_id = assert_ok!(tracker.submit(&AnalysisRequest::new("600519.SH")).await);
    assert_eq!(task_id, TaskId::from("H1"));

    let subscription = assert_ok!(tracker.observe(task_id.clone()).await);
    let last = tokio::time::timeout(Duration::from_secs(10), subscription.wait_terminal())
        .await
        .expect("task finished in time")
        .expect("at least one state");
    assert_eq!(last.status, TaskStatus::Succeeded);
    assert_eq!(last.result, Some(json!({ "summary": "hold" })));
    assert_eq!(tracker.metrics(&task_id).await.unwrap().fallbacks, 1);

    assert_ok!(tracker.shutdown_and_wait().await);
}

#[tokio::test]
async fn test_cancel_endpoint_missing_degrades_to_local_teardown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tasks/H2/progress"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "task_id": "H2",
            "status": "running",
            "progress": 15
        }))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/tasks/H2/cancel"))
        .respond_with(ResponseTemplate::new(405))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.streaming.enabled = false;
    let tracker = assert_ok!(TaskTracker::from_config(config));

    let mut subscription = assert_ok!(tracker.observe("H2").await);
    assert_eq!(subscription.next().await.unwrap().status, TaskStatus::Pending);
    let running = tokio::time::timeout(Duration::from_secs(5), subscription.next())
        .await
        .expect("polled in time")
        .unwrap();
    assert_eq!(running.progress, Some(15.0));

    let outcome = assert_ok!(tracker.cancel(&TaskId::from("H2")).await);
    assert_eq!(outcome.backend, BackendAck::NotSupported);
    assert_eq!(outcome.state.status, TaskStatus::Cancelled);
    assert_eq!(subscription.next().await.unwrap().status, TaskStatus::Cancelled);
    assert!(subscription.next().await.is_none());
}

#[tokio::test]
async fn test_active_listing_adopts_finished_task_without_observing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tasks/active"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
            { "task_id": "A1", "status": "succeeded", "progress": 100 }
        ]))))
        .expect(2)
        .mount(&server)
        .await;

    let tracker = assert_ok!(TaskTracker::from_config(config_for(&server)));
    let states = assert_ok!(tracker.list_active().await);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].status, TaskStatus::Succeeded);

    // Every call re-fetches.
    assert_ok!(tracker.list_active().await);
    assert_eq!(tracker.tracked().await, vec![TaskId::from("A1")]);
}
