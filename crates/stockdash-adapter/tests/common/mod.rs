/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared test utilities, fixtures, and mock helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for stockdash-adapter tests

use wiremock::MockServer;

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

/// Wrap a payload in the backend's response envelope
#[allow(dead_code)]
pub fn envelope(data: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "code": 200,
        "message": "success",
        "data": data,
    })
}
