use serde::{Deserialize, Serialize};
use std::fmt;

/// Which output shape the model is asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GenerationMode {
    /// Title, description, keywords and category.
    #[default]
    Metadata,
    /// Description only (an image prompt).
    Prompt,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Metadata => "metadata",
            GenerationMode::Prompt => "prompt",
        }
    }
}

/// Encoded media ready for transmission: base64 body plus declared MIME type.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedPayload {
    pub base64_data: String,
    pub mime_type: String,
}

impl EncodedPayload {
    pub fn new(base64_data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            base64_data: base64_data.into(),
            mime_type: mime_type.into(),
        }
    }
}

impl fmt::Debug for EncodedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedPayload")
            .field("mime_type", &self.mime_type)
            .field("len", &self.base64_data.len())
            .finish()
    }
}

/// Lifecycle of a staged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkItemStatus {
    Compressing,
    Ready,
    Processing,
    Error,
}

/// One staged file awaiting generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    /// Stable identifier within the staging area.
    pub id: String,
    /// Original file name, used for display and export.
    pub filename: String,
    /// Source size in bytes, used for de-duplication.
    pub size: u64,
    /// Source modification time (unix millis), used for de-duplication.
    pub modified_ms: Option<i64>,
    pub status: WorkItemStatus,
    /// Small preview image.
    pub thumbnail: Option<EncodedPayload>,
    /// Payload sent to the model. `None` until preprocessing finishes.
    pub payload: Option<EncodedPayload>,
    /// Last error message for items in the `Error` state.
    pub error: Option<String>,
}

impl WorkItem {
    /// Create a staged item that is still being preprocessed.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            id: format!("file-{}", uuid::Uuid::new_v4()),
            filename: filename.into(),
            size: 0,
            modified_ms: None,
            status: WorkItemStatus::Compressing,
            thumbnail: None,
            payload: None,
            error: None,
        }
    }

    /// Create an item that is already ready for generation.
    pub fn ready(filename: impl Into<String>, payload: EncodedPayload) -> Self {
        let mut item = Self::new(filename);
        item.status = WorkItemStatus::Ready;
        item.payload = Some(payload);
        item
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// An API authorization token. The token never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    /// Short masked form for listings, e.g. `AIza…9xQ`.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 8 {
            return "****".to_string();
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 3..].iter().collect();
        format!("{}…{}", head, tail)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.masked())
    }
}

/// Full marketplace metadata returned in metadata mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFields {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub category: String,
}

/// Description-only output returned in prompt mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptFields {
    #[serde(default)]
    pub description: String,
}

/// Structured output of one successful generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum GeneratedFields {
    Metadata(MetadataFields),
    Prompt(PromptFields),
}

impl GeneratedFields {
    pub fn mode(&self) -> GenerationMode {
        match self {
            GeneratedFields::Metadata(_) => GenerationMode::Metadata,
            GeneratedFields::Prompt(_) => GenerationMode::Prompt,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            GeneratedFields::Metadata(m) => Some(&m.title),
            GeneratedFields::Prompt(_) => None,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            GeneratedFields::Metadata(m) => &m.description,
            GeneratedFields::Prompt(p) => &p.description,
        }
    }

    pub fn keywords(&self) -> &[String] {
        match self {
            GeneratedFields::Metadata(m) => &m.keywords,
            GeneratedFields::Prompt(_) => &[],
        }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            GeneratedFields::Metadata(m) => Some(&m.category),
            GeneratedFields::Prompt(_) => None,
        }
    }
}

/// Everything the external service needs for one call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub payload: EncodedPayload,
    pub mode: GenerationMode,
    pub model: String,
}

/// The finalized outcome for one work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub id: String,
    pub item_id: String,
    pub filename: String,
    pub fields: GeneratedFields,
    /// Failure message when this record is an error placeholder.
    pub error: Option<String>,
    pub thumbnail: Option<EncodedPayload>,
    /// Kept so a single result can be regenerated later.
    pub payload: Option<EncodedPayload>,
    /// ISO 8601 timestamp of the last write.
    pub created_at: String,
}

impl ResultRecord {
    pub fn success(item: &WorkItem, fields: GeneratedFields) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            item_id: item.id.clone(),
            filename: item.filename.clone(),
            fields,
            error: None,
            thumbnail: item.thumbnail.clone(),
            payload: item.payload.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// An error placeholder so a terminal failure stays visible.
    pub fn failed(item: &WorkItem, mode: GenerationMode, message: &str) -> Self {
        let description = format!("Failed: {}", message);
        let fields = match mode {
            GenerationMode::Metadata => GeneratedFields::Metadata(MetadataFields {
                title: "Error".to_string(),
                description,
                keywords: Vec::new(),
                category: "Error".to_string(),
            }),
            GenerationMode::Prompt => GeneratedFields::Prompt(PromptFields { description }),
        };
        Self {
            error: Some(message.to_string()),
            ..Self::success(item, fields)
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn mode(&self) -> GenerationMode {
        self.fields.mode()
    }
}

/// Which sweep of the scheduler is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Pass {
    Primary,
    Retry,
}

/// Run controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "pass", rename_all = "camelCase")]
pub enum RunPhase {
    Idle,
    Running(Pass),
    Paused(Pass),
    Completed,
    Stopped,
}

impl RunPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, RunPhase::Running(_) | RunPhase::Paused(_))
    }
}

/// Progress as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub percent: f64,
    pub status: String,
    pub current: usize,
    pub total: usize,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            percent: 0.0,
            status: "Ready.".to_string(),
            current: 0,
            total: 0,
        }
    }
}

/// Terminal summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSummary {
    pub run_id: String,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    pub retried: usize,
    pub duration_ms: u64,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(CompletionSummary),
    Stopped { succeeded: usize, total: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> EncodedPayload {
        EncodedPayload::new("aGVsbG8=", "image/jpeg")
    }

    #[test]
    fn test_failed_record_metadata_mode() {
        let item = WorkItem::ready("cat.jpg", payload());
        let record = ResultRecord::failed(&item, GenerationMode::Metadata, "timeout");
        assert!(record.is_error());
        assert_eq!(record.fields.title(), Some("Error"));
        assert_eq!(record.fields.description(), "Failed: timeout");
        assert_eq!(record.fields.category(), Some("Error"));
        assert!(record.fields.keywords().is_empty());
        assert_eq!(record.payload, Some(payload()));
    }

    #[test]
    fn test_failed_record_prompt_mode() {
        let item = WorkItem::ready("cat.jpg", payload());
        let record = ResultRecord::failed(&item, GenerationMode::Prompt, "boom");
        assert_eq!(record.mode(), GenerationMode::Prompt);
        assert_eq!(record.fields.description(), "Failed: boom");
        assert!(record.fields.title().is_none());
    }

    #[test]
    fn test_credential_debug_is_masked() {
        let cred = Credential::new("AIzaSyExampleExampleExample9xQ");
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("ExampleExample"));
        assert_eq!(cred.masked(), "AIza…9xQ");
        assert_eq!(Credential::new("short").masked(), "****");
    }

    #[test]
    fn test_generated_fields_serde_tag() {
        let fields = GeneratedFields::Prompt(PromptFields {
            description: "a red apple".into(),
        });
        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(json["mode"], "prompt");
        let back: GeneratedFields = serde_json::from_value(json).unwrap();
        assert_eq!(back, fields);
    }

    #[test]
    fn test_run_phase_active() {
        assert!(RunPhase::Running(Pass::Primary).is_active());
        assert!(RunPhase::Paused(Pass::Retry).is_active());
        assert!(!RunPhase::Completed.is_active());
        assert!(!RunPhase::Idle.is_active());
    }
}
