//! HTTP client behavior against a mocked task service.

use std::sync::Arc;

use generation_dispatch::{
    Backend, CapabilityId, CapabilityRegistry, FetchError, GenerationParams, HttpTaskClient,
    HttpUploader, MediaType, ResolvedInput, SubmitError, TaskId, TaskService, TaskStatus,
    UploadError, Uploader,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn upscale_payload() -> generation_dispatch::ProviderPayload {
    let registry = CapabilityRegistry::builtin();
    let def = registry.get(CapabilityId::ImageUpscale).unwrap();
    let inputs = vec![ResolvedInput {
        input_id: "in-1".into(),
        media_type: MediaType::Image,
        role: None,
        url: "https://cdn.test/small.png".into(),
    }];
    generation_dispatch::payload::build(
        def,
        &inputs,
        &GenerationParams::default(),
        None,
        None,
        Backend::Managed,
    )
    .unwrap()
}

#[tokio::test]
async fn test_submit_posts_snapshot_and_reads_task_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/generations"))
        .and(body_partial_json(json!({
            "capability": "image_upscale",
            "backend": "managed",
            "payload": { "image_url": "https://cdn.test/small.png", "scale": 2 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "taskId": "gen-42" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpTaskClient::new(format!("{}/", server.uri()));
    let task_id = client.submit(&upscale_payload()).await.unwrap();
    assert_eq!(task_id, TaskId::new("gen-42"));
}

#[tokio::test]
async fn test_submit_http_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/generations"))
        .respond_with(ResponseTemplate::new(402).set_body_string("payment required"))
        .mount(&server)
        .await;

    let client = HttpTaskClient::new(server.uri());
    let err = client.submit(&upscale_payload()).await.unwrap_err();
    match err {
        SubmitError::Http { status, body } => {
            assert_eq!(status, 402);
            assert_eq!(body, "payment required");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_submit_rejection_in_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/generations"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "error": "prompt flagged" })),
        )
        .mount(&server)
        .await;

    let client = HttpTaskClient::new(server.uri());
    let err = client.submit(&upscale_payload()).await.unwrap_err();
    assert!(matches!(err, SubmitError::Rejected(ref m) if m == "prompt flagged"));
}

#[tokio::test]
async fn test_submit_without_task_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client = HttpTaskClient::new(server.uri());
    let err = client.submit(&upscale_payload()).await.unwrap_err();
    assert!(matches!(err, SubmitError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_fetch_status_parses_sub_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/generations/gen-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "broadcasting",
            "progress": 80,
            "statusMessage": "Rendering mouth shapes"
        })))
        .mount(&server)
        .await;

    let client = HttpTaskClient::new(server.uri());
    let task = client.fetch_status(&TaskId::new("gen-7")).await.unwrap();
    assert_eq!(task.id, TaskId::new("gen-7"));
    assert_eq!(task.status, TaskStatus::SubStatus("broadcasting".into()));
    assert!(task.status.is_processing());
    assert_eq!(task.progress, 80);
    assert_eq!(task.status_message.as_deref(), Some("Rendering mouth shapes"));
}

#[tokio::test]
async fn test_fetch_status_completed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/generations/gen-8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "progress": 100,
            "outputUrl": "https://cdn.test/out.mp4"
        })))
        .mount(&server)
        .await;

    let client = HttpTaskClient::new(server.uri());
    let task = client.fetch_status(&TaskId::new("gen-8")).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.output_url.as_deref(), Some("https://cdn.test/out.mp4"));
}

#[tokio::test]
async fn test_fetch_status_failed_with_both_error_fields() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/generations/gen-10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "failed",
            "error": "content_policy",
            "errorMessage": "NSFW content detected"
        })))
        .mount(&server)
        .await;

    let client = HttpTaskClient::new(server.uri());
    let task = client.fetch_status(&TaskId::new("gen-10")).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_message.as_deref(), Some("NSFW content detected"));
}

#[tokio::test]
async fn test_fetch_status_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/generations/gen-9"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = HttpTaskClient::new(server.uri());
    let err = client.fetch_status(&TaskId::new("gen-9")).await.unwrap_err();
    assert!(matches!(err, FetchError::Http { status: 503, .. }));
}

#[tokio::test]
async fn test_fetch_status_unreachable() {
    // Nothing listens on port 9 in the test environment.
    let client = HttpTaskClient::new("http://127.0.0.1:9");
    let err = client.fetch_status(&TaskId::new("x")).await.unwrap_err();
    assert!(matches!(err, FetchError::Network { .. }));
    assert!(!client.health().await);
}

#[tokio::test]
async fn test_cancel_and_health() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/generations/gen-1/cancel"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = HttpTaskClient::new(server.uri());
    client.cancel(&TaskId::new("gen-1")).await.unwrap();
    assert!(client.health().await);
}

#[tokio::test]
async fn test_upload_returns_hosted_url() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/uploads"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "url": "https://cdn.test/u/cat.png" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let uploader = HttpUploader::new(server.uri());
    let url = uploader
        .upload("cat.png", "image/png", Arc::new(vec![1, 2, 3, 4]))
        .await
        .unwrap();
    assert_eq!(url, "https://cdn.test/u/cat.png");
}

#[tokio::test]
async fn test_upload_http_error_names_file() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/uploads"))
        .respond_with(ResponseTemplate::new(413).set_body_string("too large"))
        .mount(&server)
        .await;

    let uploader = HttpUploader::new(server.uri());
    let err = uploader
        .upload("huge.mov", "video/quicktime", Arc::new(vec![0; 16]))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Http { status: 413, .. }));
    assert!(err.to_string().contains("huge.mov"));
}

#[tokio::test]
async fn test_upload_response_without_url() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/uploads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "url": "" })))
        .mount(&server)
        .await;

    let uploader = HttpUploader::new(server.uri());
    let err = uploader
        .upload("a.png", "image/png", Arc::new(vec![1]))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidResponse(_)));
}
