use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Languages the assistant speaks. Detection is heuristic; when the input is
/// ambiguous the detector falls back to English, deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[serde(rename = "en")]
    English,
    #[serde(rename = "ru")]
    Russian,
    #[serde(rename = "uz")]
    Uzbek,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Russian => "ru",
            Language::Uzbek => "uz",
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::English
    }
}

/// One user turn as received on the wire. `session_id` must be a v1–v5 UUID
/// string; `user_id` is advisory only — identity comes from the bearer token.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub input: String,
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

/// The assistant's reply. Every terminal branch of the pipeline produces one
/// of these, including scripted short-circuits and failure replies.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub text: String,
    pub used_rag: bool,
    /// Detected language code ("en", "ru", "uz")
    pub language: String,
    /// Audit log id for this turn, when one was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<Uuid>,
    /// Machine-readable error code on non-200 responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One indexed passage plus its similarity score. Contexts handed to the
/// generator are sorted by descending score and truncated to the top 5.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RetrievalContext {
    pub url: String,
    pub title: String,
    pub chunk: String,
    pub chunk_index: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
    /// Cosine similarity in [0.0, 1.0]
    pub score: f64,
}

/// A free-form key fact extracted from a user's turns. Scoped per user and
/// only read or written when the user's memory preference is enabled.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MemoryEntry {
    pub fact: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Outcome of scrubbing one persisted string pair (input + reply).
/// `failed` wins over `redacted`, which wins over `skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RedactionStatus {
    Skipped,
    Redacted,
    Failed,
}

impl RedactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RedactionStatus::Skipped => "skipped",
            RedactionStatus::Redacted => "redacted",
            RedactionStatus::Failed => "failed",
        }
    }

    fn severity(self) -> u8 {
        match self {
            RedactionStatus::Skipped => 0,
            RedactionStatus::Redacted => 1,
            RedactionStatus::Failed => 2,
        }
    }

    /// Most severe of the two per-side statuses.
    pub fn combine(self, other: RedactionStatus) -> RedactionStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

/// One audit record per handled request. Input and reply are stored in their
/// redacted form; what the caller received is never modified.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LogEntry {
    pub user_id: Option<Uuid>,
    pub session_id: Uuid,
    pub language: Language,
    pub input: String,
    pub reply: String,
    pub used_rag: bool,
    /// Stage-specific context (timings, scores, the branch's `reason` tag)
    pub metadata: serde_json::Value,
    pub redaction_status: RedactionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_codes_are_stable() {
        assert_eq!(Language::English.code(), "en");
        assert_eq!(Language::Russian.code(), "ru");
        assert_eq!(Language::Uzbek.code(), "uz");
        assert_eq!(Language::default(), Language::English);
    }

    #[test]
    fn redaction_status_combines_by_severity() {
        use RedactionStatus::*;
        assert_eq!(Skipped.combine(Skipped), Skipped);
        assert_eq!(Skipped.combine(Redacted), Redacted);
        assert_eq!(Redacted.combine(Skipped), Redacted);
        assert_eq!(Redacted.combine(Failed), Failed);
        assert_eq!(Failed.combine(Skipped), Failed);
    }

    #[test]
    fn chat_request_accepts_camel_case_wire_fields() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"input": "salom", "sessionId": "6f6b7573-0000-4000-8000-000000000001"}"#,
        )
        .expect("valid request body");
        assert_eq!(req.input, "salom");
        assert!(req.user_id.is_none());
    }

    #[test]
    fn chat_response_omits_empty_optionals() {
        let body = serde_json::to_value(ChatResponse {
            text: "ok".to_string(),
            used_rag: true,
            language: "en".to_string(),
            chat_id: None,
            error: None,
        })
        .expect("serializable");
        assert!(body.get("chatId").is_none());
        assert!(body.get("error").is_none());
        assert_eq!(body["usedRag"], serde_json::json!(true));
    }
}
