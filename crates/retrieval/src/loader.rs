//! Source document loading.

use std::path::Path;

use safespace_common::{Result, SafeSpaceError};
use tracing::{info, instrument};

/// Reads the reference document as plain text.
///
/// `.pdf` files go through text extraction; anything else is read as UTF-8.
/// This is blocking; call it from `spawn_blocking` inside the runtime.
#[instrument]
pub fn load_source(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(SafeSpaceError::Retrieval(format!(
            "Source document not found: {}",
            path.display()
        )));
    }

    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    let text = if is_pdf {
        pdf_extract::extract_text(path).map_err(|e| {
            SafeSpaceError::Retrieval(format!("Failed to extract text from {}: {}", path.display(), e))
        })?
    } else {
        std::fs::read_to_string(path)?
    };

    info!(path = %path.display(), chars = text.len(), "Loaded source document");
    Ok(text)
}
