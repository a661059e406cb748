use serde::{Deserialize, Serialize};

use crate::doc_processor::ClassifiedAttachment;
use crate::llm::ImagePayload;

pub const DOCUMENTS_HEADER: &str = "\n\n# Extracted attachment content:\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Vision,
}

/// The final prompt text plus the modality that decides model selection.
/// Images ride next to the text, never inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPayload {
    pub final_text: String,
    pub target_modality: Modality,
    pub images: Vec<ImagePayload>,
}

pub fn compose(user_prompt: &str, classified: &[ClassifiedAttachment]) -> PromptPayload {
    let mut sections = String::new();
    let mut images = Vec::new();

    for attachment in classified {
        match attachment {
            ClassifiedAttachment::Image { image, .. } => images.push(image.clone()),
            ClassifiedAttachment::DocumentText { filename, text } => {
                sections.push_str(&format!("[PDF: {filename}]\n{text}\n\n"));
            }
            ClassifiedAttachment::Unsupported { reason, .. } => {
                sections.push_str(&format!("[Attachment skipped: {reason}]\n"));
            }
        }
    }

    let mut final_text = String::with_capacity(user_prompt.len() + sections.len() + DOCUMENTS_HEADER.len());
    final_text.push_str(user_prompt);
    if !sections.is_empty() {
        final_text.push_str(DOCUMENTS_HEADER);
        final_text.push_str(&sections);
    }

    let target_modality = if images.is_empty() {
        Modality::Text
    } else {
        Modality::Vision
    };

    PromptPayload {
        final_text,
        target_modality,
        images,
    }
}
