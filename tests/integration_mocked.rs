/// Integration tests with a mocked image generation service
/// Tests the client contract and the full enrichment workflow without hitting the real API
mod common;

use common::record;
use rust_permit_api::enrichment::{EnrichmentOrchestrator, GenerationOutcome};
use rust_permit_api::image_client::{GeneratedImage, ImageService, ImagenClient};
use rust_permit_api::models::{FailureReason, GenerationState, RecordId};
use rust_permit_api::store::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ImagenClient {
    ImagenClient::new(format!("{}/predict", server.uri()), "test-key".to_string()).unwrap()
}

fn success_body(payload: &str) -> serde_json::Value {
    serde_json::json!({ "predictions": [{ "bytesBase64Encoded": payload }] })
}

async fn orchestrator_for(
    server: &MockServer,
    names: &[&str],
) -> (EnrichmentOrchestrator, Vec<RecordId>) {
    let mut store = RecordStore::new();
    store.load(names.iter().map(|n| record(n)).collect());
    let ids = (0..names.len()).filter_map(|i| store.id_at(i)).collect();

    let orchestrator =
        EnrichmentOrchestrator::new(Arc::new(Mutex::new(store)), Arc::new(client_for(server)));
    (orchestrator, ids)
}

#[tokio::test]
async fn test_client_sends_predict_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .and(query_param("key", "test-key"))
        .and(body_json(serde_json::json!({
            "instances": [{ "prompt": "a portrait" }],
            "parameters": { "sampleCount": 1 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("AAAA")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let result = client.generate("a portrait", &CancellationToken::new()).await;

    assert_eq!(
        result,
        Ok(GeneratedImage {
            bytes_base64: "AAAA".to_string()
        })
    );
}

#[tokio::test]
async fn test_client_maps_api_error_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": { "code": 403, "message": "API key not valid" }
        })))
        .mount(&mock_server)
        .await;

    let result = client_for(&mock_server)
        .generate("prompt", &CancellationToken::new())
        .await;

    assert_eq!(
        result,
        Err(FailureReason::Api {
            status: 403,
            message: "API key not valid".to_string()
        })
    );
}

#[tokio::test]
async fn test_client_error_without_json_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&mock_server)
        .await;

    let result = client_for(&mock_server)
        .generate("prompt", &CancellationToken::new())
        .await;

    assert_eq!(
        result,
        Err(FailureReason::Api {
            status: 500,
            message: "Unknown error".to_string()
        })
    );
}

#[tokio::test]
async fn test_client_rejects_unusable_success_payloads() {
    for body in [
        serde_json::json!({}),
        serde_json::json!({ "predictions": [] }),
        serde_json::json!({ "predictions": [{ "mimeType": "image/png" }] }),
        serde_json::json!({ "predictions": [{ "bytesBase64Encoded": "" }] }),
    ] {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&mock_server)
            .await;

        let result = client_for(&mock_server)
            .generate("prompt", &CancellationToken::new())
            .await;

        assert_eq!(result, Err(FailureReason::UnknownResponse), "body: {}", body);
    }
}

#[tokio::test]
async fn test_generation_completes_record() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("AAAA")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (orchestrator, ids) = orchestrator_for(&mock_server, &["Zehra"]).await;
    let outcome = orchestrator.request_generation(ids[0]).await;

    assert!(matches!(outcome, GenerationOutcome::Completed(_)));
    let store = orchestrator.store().lock().await;
    let stored = store.get(ids[0]).unwrap();
    assert!(matches!(
        stored.generation_state(),
        GenerationState::Completed { .. }
    ));
    assert_eq!(
        stored.photo_url().map(|p| p.as_str()),
        Some("data:image/png;base64,AAAA")
    );
}

#[tokio::test]
async fn test_missing_payload_fails_record() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "predictions": [{}] })),
        )
        .mount(&mock_server)
        .await;

    let (orchestrator, ids) = orchestrator_for(&mock_server, &["Zehra"]).await;
    let outcome = orchestrator.request_generation(ids[0]).await;

    assert_eq!(outcome, GenerationOutcome::Failed(FailureReason::UnknownResponse));
    assert_eq!(
        outcome.message(),
        "Failed to generate photo: No image data found in API response."
    );
    let store = orchestrator.store().lock().await;
    assert!(store.get(ids[0]).unwrap().photo_url().is_none());
}

#[tokio::test]
async fn test_api_error_fails_record() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": { "message": "Quota exceeded" }
        })))
        .mount(&mock_server)
        .await;

    let (orchestrator, ids) = orchestrator_for(&mock_server, &["Zehra"]).await;
    let outcome = orchestrator.request_generation(ids[0]).await;

    let expected = FailureReason::Api {
        status: 429,
        message: "Quota exceeded".to_string(),
    };
    assert_eq!(outcome, GenerationOutcome::Failed(expected.clone()));
    let store = orchestrator.store().lock().await;
    assert_eq!(
        store.get(ids[0]).unwrap().generation_state(),
        &GenerationState::Failed { reason: expected }
    );
}

#[tokio::test]
async fn test_rapid_duplicate_requests_send_one_call() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_body("AAAA"))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let (orchestrator, ids) = orchestrator_for(&mock_server, &["Zehra"]).await;
    let (first, second) = tokio::join!(
        orchestrator.request_generation(ids[0]),
        orchestrator.request_generation(ids[0])
    );

    assert!(matches!(first, GenerationOutcome::Completed(_)));
    assert_eq!(second, GenerationOutcome::Skipped(GenerationState::InProgress));
}

#[tokio::test]
async fn test_timeout_then_retry_is_accepted() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_body("AAAA"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let (orchestrator, ids) = orchestrator_for(&mock_server, &["Zehra"]).await;
    let orchestrator = orchestrator.with_timeout(Duration::from_millis(200));

    let outcome = orchestrator.request_generation(ids[0]).await;
    assert_eq!(outcome, GenerationOutcome::Failed(FailureReason::Timeout));
    {
        let store = orchestrator.store().lock().await;
        assert!(store.get(ids[0]).unwrap().photo_url().is_none());
    }

    // Service recovers; the failed record takes a new request
    mock_server.reset().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("AAAA")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let retry = orchestrator.request_generation(ids[0]).await;
    assert!(matches!(retry, GenerationOutcome::Completed(_)));
}

#[tokio::test]
async fn test_navigation_does_not_redirect_result() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_body("AAAA"))
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&mock_server)
        .await;

    let (orchestrator, ids) = orchestrator_for(&mock_server, &["Zehra", "Hamza"]).await;
    let pending = orchestrator.begin(ids[0]).await.unwrap();
    let handle = orchestrator.spawn(pending);

    orchestrator.store().lock().await.next();
    handle.await.unwrap();

    let store = orchestrator.store().lock().await;
    assert_eq!(store.cursor(), Some(1));
    assert!(store.get(ids[0]).unwrap().photo_url().is_some());
    assert!(store.current().unwrap().photo_url().is_none());
}

#[tokio::test]
async fn test_distinct_records_generate_concurrently() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_body("AAAA"))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    let (orchestrator, ids) = orchestrator_for(&mock_server, &["Zehra", "Hamza"]).await;
    let (a, b) = tokio::join!(
        orchestrator.request_generation(ids[0]),
        orchestrator.request_generation(ids[1])
    );

    assert!(matches!(a, GenerationOutcome::Completed(_)));
    assert!(matches!(b, GenerationOutcome::Completed(_)));
    assert_eq!(orchestrator.in_flight().await, 0);
}

#[tokio::test]
async fn test_user_cancellation_aborts_call() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_body("AAAA"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let (orchestrator, ids) = orchestrator_for(&mock_server, &["Zehra"]).await;
    let pending = orchestrator.begin(ids[0]).await.unwrap();
    let handle = orchestrator.spawn(pending);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(orchestrator.cancel(ids[0]).await);

    let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, GenerationOutcome::Failed(FailureReason::Cancelled));
}

#[tokio::test]
async fn test_unreachable_service_is_transport_failure() {
    let client =
        ImagenClient::new("http://127.0.0.1:1/predict".to_string(), "test-key".to_string())
            .unwrap();
    let mut store = RecordStore::new();
    store.load(vec![record("Zehra")]);
    let id = store.current_id().unwrap();
    let orchestrator = EnrichmentOrchestrator::new(Arc::new(Mutex::new(store)), Arc::new(client));

    let outcome = orchestrator.request_generation(id).await;

    assert!(matches!(
        outcome,
        GenerationOutcome::Failed(FailureReason::Transport { .. })
    ));
    assert!(orchestrator.begin(id).await.is_ok());
}

#[tokio::test]
async fn test_abandoned_request_makes_record_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_body("AAAA"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let (orchestrator, ids) = orchestrator_for(&mock_server, &["Zehra"]).await;
    let orchestrator = orchestrator.with_timeout(Duration::from_millis(200));

    // The caller stops waiting before the bounded wait elapses
    let waited = tokio::time::timeout(
        Duration::from_millis(50),
        orchestrator.request_generation(ids[0]),
    )
    .await;
    assert!(waited.is_err());
    tokio::time::sleep(Duration::from_millis(100)).await;

    {
        let store = orchestrator.store().lock().await;
        assert_eq!(
            store.get(ids[0]).unwrap().generation_state(),
            &GenerationState::Failed {
                reason: FailureReason::Cancelled
            }
        );
    }
    assert_eq!(orchestrator.in_flight().await, 0);
    assert!(!orchestrator.cancel(ids[0]).await);

    mock_server.reset().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("AAAA")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let retry = orchestrator.request_generation(ids[0]).await;
    assert!(matches!(retry, GenerationOutcome::Completed(_)));
}
