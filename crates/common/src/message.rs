//! Per-turn request types.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Raw image attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    /// Encoded image bytes (PNG, JPEG, ...)
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,

    /// MIME type, e.g. `image/png`
    pub mime: String,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            mime: mime.into(),
        }
    }

    pub fn png(bytes: Vec<u8>) -> Self {
        Self::new(bytes, "image/png")
    }

    /// Decode a base64 string into a payload. Returns `None` for invalid
    /// or empty input.
    pub fn from_base64(encoded: &str, mime: impl Into<String>) -> Option<Self> {
        let bytes = STANDARD.decode(encoded.trim()).ok()?;
        if bytes.is_empty() {
            return None;
        }
        Some(Self::new(bytes, mime))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// `data:` URL form accepted by OpenAI-style vision endpoints.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.to_base64())
    }
}

/// One incoming user turn.
///
/// Immutable once built; owned by a single dispatch cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique request ID
    pub id: String,

    /// The user's free-text message
    pub message: String,

    /// Optional attached image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImagePayload>,
}

impl Request {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            id: format!("req_{}", uuid::Uuid::new_v4()),
            message: message.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImagePayload) -> Self {
        self.image = Some(image);
        self
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
