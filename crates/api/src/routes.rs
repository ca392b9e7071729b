//! HTTP route handlers for the API.

use crate::AppState;
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    Json,
};
use image::ImageFormat;
use safespace_common::{ImagePayload, Request, SafeSpaceError};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Prompt for direct uploads: describe, do not diagnose.
pub const UPLOAD_PROMPT: &str = "You're a helpful assistant. Please analyze the uploaded medical image and describe what patterns, textures, or visible details are noticeable. Do not diagnose. Just describe relevant features you observe in the image and tell is there any reason to go and see doctor.";

const INVALID_IMAGE: &str = "Uploaded file is not a valid image.";

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
    })
}

/// `/ask` request body.
#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub message: String,
    /// Optional inline image, plain base64 or a `data:` URL
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub image_mime: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub response: String,
}

/// Route a message through the coordinator. Collaborator failures are
/// already folded into the reply text, so this always answers 200 once the
/// body parses.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AskRequest>,
) -> Json<AskResponse> {
    let mut request = Request::new(body.message);
    if let Some(encoded) = body.image_base64.as_deref() {
        match decode_inline_image(encoded, body.image_mime.as_deref()) {
            Some(image) => request = request.with_image(image),
            None => warn!(request_id = %request.id, "Ignoring undecodable inline image"),
        }
    }

    info!(request_id = %request.id, has_image = request.has_image(), "Received /ask");
    let outcome = state.coordinator.process(request).await;

    Json(AskResponse {
        response: outcome.response,
    })
}

/// Decodes plain base64 or a `data:<mime>;base64,<...>` URL.
fn decode_inline_image(encoded: &str, mime: Option<&str>) -> Option<ImagePayload> {
    let encoded = encoded.trim();
    if let Some(rest) = encoded.strip_prefix("data:") {
        let (header, data) = rest.split_once(',')?;
        let data_mime = header.strip_suffix(";base64")?;
        return ImagePayload::from_base64(data, mime.unwrap_or(data_mime));
    }
    ImagePayload::from_base64(encoded, mime.unwrap_or("image/png"))
}

/// `/upload-image-openai` response: exactly one of the two fields.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UploadResponse {
    Diagnosis { diagnosis: String },
    Error { error: String },
}

impl UploadResponse {
    fn error(message: impl Into<String>) -> Json<Self> {
        Json(UploadResponse::Error {
            error: message.into(),
        })
    }
}

/// Describe an uploaded image. Every outcome is structured JSON.
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Json<UploadResponse> {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(e) => {
            warn!(error = %e, "Upload is not a multipart request");
            return UploadResponse::error(format!("Invalid upload: {}", e.body_text()));
        }
    };

    let bytes = match read_file_field(&mut multipart).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return UploadResponse::error("No file uploaded."),
        Err(message) => return UploadResponse::error(message),
    };
    debug!(bytes = bytes.len(), "Received image upload");

    let png = match tokio::task::spawn_blocking(move || normalize_to_png(&bytes)).await {
        Ok(Ok(png)) => png,
        Ok(Err(e)) => {
            warn!(error = %e, "Rejected upload");
            return UploadResponse::error(INVALID_IMAGE);
        }
        Err(e) => {
            error!(error = %e, "Image decoding task failed");
            return UploadResponse::error(INVALID_IMAGE);
        }
    };

    match state.vision.describe(&ImagePayload::png(png), UPLOAD_PROMPT).await {
        Ok(diagnosis) => {
            info!(model = %state.vision.model_name(), "Image described");
            Json(UploadResponse::Diagnosis { diagnosis })
        }
        Err(e) => {
            error!(error = %e, "Vision call failed");
            UploadResponse::error(format!("OpenAI Vision failed: {e}"))
        }
    }
}

async fn read_file_field(multipart: &mut Multipart) -> Result<Option<Vec<u8>>, String> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(None),
            Err(e) => return Err(format!("Invalid upload: {}", e.body_text())),
        };
        if field.name() != Some("file") {
            continue;
        }
        return field
            .bytes()
            .await
            .map(|b| Some(b.to_vec()))
            .map_err(|e| format!("Invalid upload: {}", e.body_text()));
    }
}

/// Decodes any supported image format and re-encodes it as RGB PNG.
pub fn normalize_to_png(bytes: &[u8]) -> Result<Vec<u8>, SafeSpaceError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|e| SafeSpaceError::InvalidImage(e.to_string()))?;
    let rgb = image::DynamicImage::ImageRgb8(decoded.to_rgb8());

    let mut png = Cursor::new(Vec::new());
    rgb.write_to(&mut png, ImageFormat::Png)
        .map_err(|e| SafeSpaceError::InvalidImage(e.to_string()))?;
    Ok(png.into_inner())
}
