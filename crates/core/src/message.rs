//! Conversation entry domain types.
//!
//! A [`ConversationEntry`] is one exchange unit: the user's question (or image),
//! the provider's answer once it arrives, and optionally system-prompt text.
//! These are the values the context engine stores and the provider adapters
//! serialize into their wire formats.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An image attached to a turn.
///
/// The file at `path` is usually a temp download that is deleted once the
/// message is handled, so the dispatcher loads the bytes into `data` first.
/// History keeps the loaded bytes and never rereads the path.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Path to the downloaded image.
    pub path: PathBuf,

    /// MIME type, when the messaging surface reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    #[serde(skip)]
    data: Option<Arc<[u8]>>,
}

impl ImageRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mime_type: None,
            data: None,
        }
    }

    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    /// Attach the image's contents.
    pub fn with_data(mut self, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.data = Some(bytes.into());
        self
    }

    /// The in-memory contents, if loaded.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// The MIME type, guessed from the file extension when not reported.
    pub fn mime(&self) -> &str {
        if let Some(mime) = &self.mime_type {
            return mime;
        }
        guess_image_mime(&self.path)
    }
}

fn guess_image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRef")
            .field("path", &self.path)
            .field("mime_type", &self.mime_type)
            .field("loaded_bytes", &self.data.as_ref().map(|d| d.len()))
            .finish()
    }
}

/// One exchange in a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// What the user asked (or the caption of an image turn).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,

    /// The provider's answer, filled in after a successful call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,

    /// System prompt text (identity priming).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Images attached to this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageRef>,
}

impl ConversationEntry {
    /// A system-prompt entry.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            system: Some(text.into()),
            ..Self::default()
        }
    }

    /// A plain text question.
    pub fn question(text: impl Into<String>) -> Self {
        Self {
            question: Some(text.into()),
            ..Self::default()
        }
    }

    /// An image turn with an optional caption.
    pub fn image(images: Vec<ImageRef>, caption: Option<String>) -> Self {
        Self {
            question: caption,
            images,
            ..Self::default()
        }
    }

    /// Attach an answer (builder style, mostly for tests).
    pub fn answered(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self
    }

    /// The question, if it has non-blank content.
    pub fn question_text(&self) -> Option<&str> {
        non_blank(self.question.as_deref())
    }

    /// The answer, if it has non-blank content.
    pub fn answer_text(&self) -> Option<&str> {
        non_blank(self.answer.as_deref())
    }

    /// The system prompt, if it has non-blank content.
    pub fn system_text(&self) -> Option<&str> {
        non_blank(self.system.as_deref())
    }

    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }

    /// Whether this entry carries new user input (a question or an image).
    pub fn has_input(&self) -> bool {
        self.question_text().is_some() || self.has_images()
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|t| !t.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loaded_image_keeps_bytes_across_clones() {
        let image = ImageRef::new("/tmp/photo.jpg").with_data(vec![1u8, 2, 3]);
        let entry = ConversationEntry::image(vec![image], None);
        let copy = entry.clone();
        assert_eq!(copy.images[0].data(), Some(&[1u8, 2, 3][..]));
        assert!(format!("{:?}", copy.images[0]).contains("loaded_bytes: Some(3)"));
        assert_eq!(ImageRef::new("/tmp/photo.jpg").data(), None);
    }

    #[test]
    fn blank_question_is_not_input() {
        let entry = ConversationEntry::question("   ");
        assert!(!entry.has_input());
        assert!(entry.question_text().is_none());
    }

    #[test]
    fn image_without_caption_is_input() {
        let entry = ConversationEntry::image(vec![ImageRef::new("/tmp/a.jpg")], None);
        assert!(entry.has_input());
        assert!(entry.has_images());
    }

    #[test]
    fn system_entry_has_no_input() {
        let entry = ConversationEntry::system("You are helpful");
        assert!(!entry.has_input());
        assert_eq!(entry.system_text(), Some("You are helpful"));
    }

    #[test]
    fn mime_guess_from_extension() {
        assert_eq!(ImageRef::new("/tmp/x.PNG").mime(), "image/png");
        assert_eq!(ImageRef::new("/tmp/x").mime(), "image/jpeg");
        assert_eq!(
            ImageRef::new("/tmp/x.bin").with_mime_type("image/webp").mime(),
            "image/webp"
        );
    }

    #[test]
    fn entry_serialization_skips_empty_fields() {
        let entry = ConversationEntry::question("hi").answered("hello");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("question"));
        assert!(json.contains("answer"));
        assert!(!json.contains("images"));
        assert!(!json.contains("system"));
    }
}
