use std::panic;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, warn};

use crate::llm::ImagePayload;

pub const DEFAULT_MAX_CHARS: usize = 12_000;
pub const DEFAULT_TRUNCATION_MARKER: &str = "\n...[text truncated]...";

/// An uploaded file, alive only for the request that carried it.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedAttachment {
    Image {
        filename: String,
        image: ImagePayload,
    },
    DocumentText {
        filename: String,
        text: String,
    },
    Unsupported {
        filename: String,
        reason: String,
    },
}

impl ClassifiedAttachment {
    pub fn filename(&self) -> &str {
        match self {
            ClassifiedAttachment::Image { filename, .. }
            | ClassifiedAttachment::DocumentText { filename, .. }
            | ClassifiedAttachment::Unsupported { filename, .. } => filename,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("PDF parse error: {0}")]
    Extraction(String),
    #[error("PDF parser crashed on malformed input")]
    Panicked,
}

/// Per-document extraction bound.
#[derive(Debug, Clone)]
pub struct DocumentLimits {
    pub max_chars: usize,
    pub truncation_marker: String,
}

impl Default for DocumentLimits {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            truncation_marker: DEFAULT_TRUNCATION_MARKER.to_string(),
        }
    }
}

/// Classify attachments in input order, extracting PDF text with `pdf-extract`.
pub fn classify(attachments: &[Attachment], limits: &DocumentLimits) -> Vec<ClassifiedAttachment> {
    classify_with(attachments, limits, extract_pdf_pages)
}

/// Same as [`classify`] with a caller-supplied page extractor.
pub fn classify_with<F>(
    attachments: &[Attachment],
    limits: &DocumentLimits,
    extract: F,
) -> Vec<ClassifiedAttachment>
where
    F: Fn(&[u8]) -> Result<Vec<String>, DocumentError>,
{
    attachments
        .iter()
        .map(|attachment| classify_one(attachment, limits, &extract))
        .collect()
}

fn classify_one<F>(attachment: &Attachment, limits: &DocumentLimits, extract: &F) -> ClassifiedAttachment
where
    F: Fn(&[u8]) -> Result<Vec<String>, DocumentError>,
{
    let filename = attachment.filename.clone();
    let media_type = attachment.media_type.to_ascii_lowercase();

    if media_type.starts_with("image/") {
        return ClassifiedAttachment::Image {
            filename,
            image: ImagePayload {
                media_type,
                data: STANDARD.encode(&attachment.bytes),
            },
        };
    }

    if media_type == "application/pdf" {
        return match extract(&attachment.bytes) {
            Ok(pages) => {
                let text = pages.join("\n");
                if text.trim().is_empty() {
                    // scanned PDFs have no text layer
                    debug!(%filename, "pdf has no extractable text");
                }
                ClassifiedAttachment::DocumentText {
                    filename,
                    text: truncate_chars(&text, limits.max_chars, &limits.truncation_marker),
                }
            }
            Err(e) => {
                warn!(%filename, "pdf extraction failed: {e}");
                ClassifiedAttachment::Unsupported {
                    reason: format!("could not extract text from {filename}: {e}"),
                    filename,
                }
            }
        };
    }

    ClassifiedAttachment::Unsupported {
        reason: format!(
            "unsupported file type: {} ({})",
            attachment.filename, attachment.media_type
        ),
        filename,
    }
}

/// Extract the text of every page, in page order.
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, DocumentError> {
    // pdf-extract panics on some malformed inputs instead of returning Err
    match panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes)) {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(DocumentError::Extraction(e.to_string())),
        Err(_) => Err(DocumentError::Panicked),
    }
}

/// Hard cut at `max_chars` characters followed by `marker`; shorter text is
/// returned unchanged.
pub fn truncate_chars(text: &str, max_chars: usize, marker: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + marker.len());
            out.push_str(&text[..byte_idx]);
            out.push_str(marker);
            out
        }
        None => text.to_string(),
    }
}
