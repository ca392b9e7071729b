//! Integration tests for the API layer.
//!
//! These tests spin up a real HTTP server on a random port with fake
//! collaborators behind the coordinator.

use async_trait::async_trait;
use safespace_api::{create_router, AppState};
use safespace_common::{ImagePayload, Result, SafeSpaceError};
use safespace_coordinator::{
    Aggregator, Coordinator, Dispatcher, EmergencyHandler, FindTherapistHandler, HandlerRegistry,
    LoggingNotifier, MentalSpecialistHandler, Router, SamplingParams, VisionAnalysisHandler,
};
use safespace_llm::{LlmClient, LlmRequest, LlmResponse, VisionClient};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Fakes
// ============================================================================

/// Routes to vision when an image is attached, therapist otherwise.
struct FakeRouter;

#[async_trait]
impl LlmClient for FakeRouter {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let reply = if request.messages[0].content.contains("attached an image") {
            r#"["vision_analysis"]"#
        } else {
            r#"["find_therapist"]"#
        };
        Ok(LlmResponse::text(reply, "router"))
    }

    fn model_name(&self) -> &str {
        "router"
    }
}

/// Synthesis that echoes its prompt.
struct EchoSynth;

#[async_trait]
impl LlmClient for EchoSynth {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        Ok(LlmResponse::text(request.messages[0].content.clone(), "synth"))
    }

    fn model_name(&self) -> &str {
        "synth"
    }
}

struct Silent;

#[async_trait]
impl LlmClient for Silent {
    async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
        Ok(LlmResponse::text("", "silent"))
    }

    fn model_name(&self) -> &str {
        "silent"
    }
}

struct FakeVision {
    fail: bool,
}

#[async_trait]
impl VisionClient for FakeVision {
    async fn describe(&self, image: &ImagePayload, _prompt: &str) -> Result<String> {
        if self.fail {
            return Err(SafeSpaceError::Vision("model overloaded".into()));
        }
        assert_eq!(image.mime, "image/png");
        Ok(format!("Looked at {} PNG bytes", image.bytes.len()))
    }

    fn model_name(&self) -> &str {
        "fake-vision"
    }
}

async fn start_test_server(vision_fails: bool) -> String {
    let vision: Arc<dyn VisionClient> = Arc::new(FakeVision { fail: vision_fails });

    let registry = HandlerRegistry::builder()
        .register(Arc::new(MentalSpecialistHandler::new(
            Arc::new(Silent),
            SamplingParams::default(),
        )))
        .register(Arc::new(FindTherapistHandler))
        .register(Arc::new(EmergencyHandler::new(
            Arc::new(LoggingNotifier),
            "",
            Duration::from_secs(1),
        )))
        .register(Arc::new(VisionAnalysisHandler::new(vision.clone())))
        .build_partial();

    let coordinator = Coordinator::new(
        Router::new(Arc::new(FakeRouter)),
        Dispatcher::new(Arc::new(registry)),
        Aggregator::new(Arc::new(EchoSynth)),
    );

    let state = Arc::new(AppState::new(Arc::new(coordinator), vision));
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{}", addr)
}

/// Helper to POST JSON and return (status, body_string).
async fn post_json(base: &str, path: &str, json: &str) -> (u16, String) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}{}", base, path))
        .header("content-type", "application/json")
        .body(json.to_string())
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap();
    (status, body)
}

/// Helper to upload a file field and return (status, parsed JSON).
async fn upload(base: &str, field: &str, bytes: Vec<u8>) -> (u16, serde_json::Value) {
    let part = reqwest::multipart::Part::bytes(bytes)
        .file_name("scan.png")
        .mime_str("image/png")
        .unwrap();
    let form = reqwest::multipart::Form::new().part(field.to_string(), part);

    let resp = reqwest::Client::new()
        .post(format!("{}/upload-image-openai", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

fn sample_png() -> Vec<u8> {
    let img = image::ImageBuffer::from_pixel(4, 4, image::Rgb([10u8, 200, 30]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

// ============================================================================
// Health endpoint
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let base = start_test_server(false).await;
    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "healthy");
    assert!(json["version"].as_str().is_some());
    assert!(json["uptime_seconds"].as_u64().is_some());
}

// ============================================================================
// /ask
// ============================================================================

#[tokio::test]
async fn test_ask_returns_synthesized_response() {
    let base = start_test_server(false).await;
    let (status, body) = post_json(&base, "/ask", r#"{"message": "Is there a therapist near me?"}"#).await;

    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let response = json["response"].as_str().unwrap();
    assert!(response.contains("📍 Nearby Therapists:"));
    assert!(response.contains("Dr. Ayesha Kapoor"));
}

#[tokio::test]
async fn test_ask_with_inline_image_reaches_vision() {
    let base = start_test_server(false).await;
    let body = serde_json::json!({
        "message": "What is on my skin?",
        "image_base64": "AQIDBA==",
        "image_mime": "image/png"
    });
    let (status, body) = post_json(&base, "/ask", &body.to_string()).await;

    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(json["response"].as_str().unwrap().contains("Looked at 4 PNG bytes"));
}

#[tokio::test]
async fn test_ask_with_bad_image_is_treated_as_text() {
    let base = start_test_server(false).await;
    let (status, body) = post_json(
        &base,
        "/ask",
        r#"{"message": "hello", "image_base64": "%%%not-base64%%%"}"#,
    )
    .await;

    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(json["response"].as_str().unwrap().contains("Nearby Therapists"));
}

#[tokio::test]
async fn test_ask_malformed_body_rejected() {
    let base = start_test_server(false).await;

    let (status, _) = post_json(&base, "/ask", r#"{"msg": "wrong field"}"#).await;
    assert!((400..500).contains(&status), "status {status}");

    let (status, _) = post_json(&base, "/ask", "not json").await;
    assert!((400..500).contains(&status), "status {status}");
}

// ============================================================================
// /upload-image-openai
// ============================================================================

#[tokio::test]
async fn test_upload_valid_image() {
    let base = start_test_server(false).await;
    let (status, json) = upload(&base, "file", sample_png()).await;

    assert_eq!(status, 200);
    assert!(json["diagnosis"].as_str().unwrap().starts_with("Looked at"));
    assert!(json.get("error").is_none());
}

#[tokio::test]
async fn test_upload_non_image() {
    let base = start_test_server(false).await;
    let (status, json) = upload(&base, "file", b"just some text".to_vec()).await;

    assert_eq!(status, 200);
    assert_eq!(json["error"], "Uploaded file is not a valid image.");
}

#[tokio::test]
async fn test_upload_vision_failure() {
    let base = start_test_server(true).await;
    let (status, json) = upload(&base, "file", sample_png()).await;

    assert_eq!(status, 200);
    let error = json["error"].as_str().unwrap();
    assert!(error.starts_with("OpenAI Vision failed:"), "got {error}");
    assert!(error.contains("model overloaded"));
}

#[tokio::test]
async fn test_upload_missing_file_field() {
    let base = start_test_server(false).await;
    let (status, json) = upload(&base, "attachment", sample_png()).await;

    assert_eq!(status, 200);
    assert_eq!(json["error"], "No file uploaded.");
}

#[tokio::test]
async fn test_upload_without_multipart() {
    let base = start_test_server(false).await;
    let (status, body) = post_json(&base, "/upload-image-openai", r#"{"file": "x"}"#).await;

    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(json["error"].as_str().unwrap().starts_with("Invalid upload"));
}
