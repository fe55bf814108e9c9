//! External collaborator seams for the chat pipeline.
//!
//! Every side effect the pipeline performs goes through one of these traits so
//! the decision cascade stays deterministic and mockable. Production wiring
//! lives in `openai` (moderation, embeddings, generation), `upstash` (vector
//! index) and `postgres` (feature gate, memory, audit log, tool data).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use fokus_core::chat::{Language, LogEntry, MemoryEntry, RetrievalContext};

pub mod openai;
pub mod postgres;
pub mod upstash;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider configuration error: {0}")]
    Config(String),
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// Verdict of the external content-safety check.
#[derive(Debug, Clone)]
pub struct ModerationVerdict {
    pub ok: bool,
    pub category: Option<String>,
}

/// One raw match from the vector index. The retrieval engine is responsible
/// for discarding matches whose metadata is missing chunk/url/title.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub score: f64,
    pub metadata: serde_json::Value,
}

/// Input contract of the answer generator.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub question: String,
    pub language: Language,
    pub contexts: Vec<RetrievalContext>,
    pub memory: Vec<MemoryEntry>,
}

/// A user's long-term memory state: the opt-in preference plus prior entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryProfile {
    pub enabled: bool,
    pub entries: Vec<MemoryEntry>,
}

/// Stored anchor embedding for one tool, used by the embedding router strategy.
#[derive(Debug, Clone)]
pub struct ToolAnchor {
    pub tool: String,
    pub embedding: Vec<f64>,
}

#[async_trait]
pub trait ModerationProvider: Send + Sync {
    async fn review(&self, text: &str) -> Result<ModerationVerdict, ProviderError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed each input text; the output is 1:1 with the inputs.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f64>>, ProviderError>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(
        &self,
        vector: &[f64],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<VectorMatch>, ProviderError>;
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError>;
}

/// Point-in-time read of the operator "assistant enabled" flag.
///
/// `cached = false` forces a fresh read; the pipeline uses that at each of its
/// three checkpoints so an operator can abort in-flight requests.
#[async_trait]
pub trait FeatureGate: Send + Sync {
    async fn assistant_enabled(&self, cached: bool) -> bool;
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn profile(&self, user_id: Uuid) -> Result<MemoryProfile, ProviderError>;
    async fn append(&self, user_id: Uuid, entries: &[MemoryEntry]) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Persist one entry and return its id.
    async fn record(&self, entry: &LogEntry) -> Result<Uuid, ProviderError>;
}

#[async_trait]
pub trait ToolRouteSource: Send + Sync {
    async fn anchors(&self) -> Result<Vec<ToolAnchor>, ProviderError>;
}

/// Today's motivational mantra.
#[derive(Debug, Clone)]
pub struct MantraRow {
    pub text: String,
    pub author: Option<String>,
}

/// A live or upcoming group focus session.
#[derive(Debug, Clone)]
pub struct LiveSessionRow {
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct LeaderboardRow {
    pub rank: i64,
    pub display_name: String,
    pub points: i64,
}

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub title: String,
    pub status: String,
    pub due: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct StreakRow {
    pub current_days: i64,
    pub best_days: i64,
}

#[derive(Debug, Clone)]
pub struct WeekSummaryRow {
    pub focus_minutes: i64,
    pub sessions_done: i64,
    pub tasks_done: i64,
}

#[derive(Debug, Clone)]
pub struct BookingRow {
    pub mentor: String,
    pub starts_at: DateTime<Utc>,
}

/// Read-only data calls behind the fixed tool set. Every method is a narrow
/// query; none of them mutate anything.
#[async_trait]
pub trait ToolData: Send + Sync {
    async fn mantra_today(&self) -> Result<Option<MantraRow>, ProviderError>;
    async fn live_sessions(&self) -> Result<Vec<LiveSessionRow>, ProviderError>;
    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardRow>, ProviderError>;
    async fn tasks_for(&self, user_id: Uuid) -> Result<Vec<TaskRow>, ProviderError>;
    async fn streak_for(&self, user_id: Uuid) -> Result<Option<StreakRow>, ProviderError>;
    async fn week_summary_for(&self, user_id: Uuid)
    -> Result<Option<WeekSummaryRow>, ProviderError>;
    async fn next_booking_for(&self, user_id: Uuid) -> Result<Option<BookingRow>, ProviderError>;
}
