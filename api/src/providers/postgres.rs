//! Postgres-backed collaborators: the feature gate, the memory store, the
//! audit log, tool data reads and tool route anchors.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use fokus_core::chat::{LogEntry, MemoryEntry};

use super::{
    AuditLog, BookingRow, FeatureGate, LeaderboardRow, LiveSessionRow, MantraRow, MemoryProfile,
    MemoryStore, ProviderError, StreakRow, TaskRow, ToolAnchor, ToolData, ToolRouteSource,
    WeekSummaryRow,
};

const GATE_CACHE_TTL_SECS: i64 = 5;
const MEMORY_READ_LIMIT: i64 = 50;

// --- Feature gate ---

/// Reads the operator "assistant enabled" flag. A cached read is good enough
/// for routing decisions outside the pipeline; the pipeline's three
/// checkpoints always pass `cached = false` for a fresh read.
pub struct PgFeatureGate {
    pool: PgPool,
    cache: Arc<RwLock<Option<(bool, DateTime<Utc>)>>>,
}

impl PgFeatureGate {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    async fn fetch(&self) -> Result<bool, sqlx::Error> {
        let enabled: Option<bool> =
            sqlx::query_scalar("SELECT enabled FROM assistant_settings WHERE id = TRUE")
                .fetch_optional(&self.pool)
                .await?;
        // No settings row yet means the assistant has never been disabled.
        Ok(enabled.unwrap_or(true))
    }
}

#[async_trait]
impl FeatureGate for PgFeatureGate {
    async fn assistant_enabled(&self, cached: bool) -> bool {
        let now = Utc::now();
        if cached {
            let read = self.cache.read().await;
            if let Some((enabled, fetched_at)) = *read {
                if now - fetched_at <= ChronoDuration::seconds(GATE_CACHE_TTL_SECS) {
                    return enabled;
                }
            }
        }

        match self.fetch().await {
            Ok(enabled) => {
                let mut write = self.cache.write().await;
                *write = Some((enabled, now));
                enabled
            }
            Err(err) => {
                tracing::warn!(error = %err, "assistant flag lookup failed; defaulting to enabled");
                true
            }
        }
    }
}

// --- Memory store ---

pub struct PgMemoryStore {
    pool: PgPool,
}

impl PgMemoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct MemoryRow {
    fact: String,
    created_at: DateTime<Utc>,
}

#[async_trait]
impl MemoryStore for PgMemoryStore {
    async fn profile(&self, user_id: Uuid) -> Result<MemoryProfile, ProviderError> {
        let enabled: Option<bool> =
            sqlx::query_scalar("SELECT memory_enabled FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(true) = enabled else {
            return Ok(MemoryProfile {
                enabled: false,
                entries: Vec::new(),
            });
        };

        let rows = sqlx::query_as::<_, MemoryRow>(
            "SELECT fact, created_at FROM assistant_memory \
             WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(MEMORY_READ_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(MemoryProfile {
            enabled: true,
            entries: rows
                .into_iter()
                .map(|row| MemoryEntry {
                    fact: row.fact,
                    created_at: Some(row.created_at),
                })
                .collect(),
        })
    }

    async fn append(&self, user_id: Uuid, entries: &[MemoryEntry]) -> Result<(), ProviderError> {
        for entry in entries {
            sqlx::query(
                "INSERT INTO assistant_memory (id, user_id, fact) VALUES ($1, $2, $3) \
                 ON CONFLICT (user_id, fact) DO NOTHING",
            )
            .bind(Uuid::now_v7())
            .bind(user_id)
            .bind(&entry.fact)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

// --- Audit log ---

pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn record(&self, entry: &LogEntry) -> Result<Uuid, ProviderError> {
        let id = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO assistant_chat_logs \
             (id, user_id, session_id, language, input, reply, used_rag, metadata, redaction_status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(id)
        .bind(entry.user_id)
        .bind(entry.session_id)
        .bind(entry.language.code())
        .bind(&entry.input)
        .bind(&entry.reply)
        .bind(entry.used_rag)
        .bind(&entry.metadata)
        .bind(entry.redaction_status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }
}

// --- Tool route anchors ---

pub struct PgToolRoutes {
    pool: PgPool,
}

impl PgToolRoutes {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ToolRouteRow {
    tool: String,
    embedding: serde_json::Value,
}

fn parse_embedding(value: &serde_json::Value) -> Vec<f64> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(v) = item.as_f64() else {
            return Vec::new();
        };
        out.push(v);
    }
    out
}

#[async_trait]
impl ToolRouteSource for PgToolRoutes {
    async fn anchors(&self) -> Result<Vec<ToolAnchor>, ProviderError> {
        let rows = sqlx::query_as::<_, ToolRouteRow>(
            "SELECT tool, embedding FROM assistant_tool_routes",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let embedding = parse_embedding(&row.embedding);
                if embedding.is_empty() {
                    tracing::warn!(tool = %row.tool, "tool route anchor has no usable embedding");
                    return None;
                }
                Some(ToolAnchor {
                    tool: row.tool,
                    embedding,
                })
            })
            .collect())
    }
}

// --- Tool data reads ---

pub struct PgToolData {
    pool: PgPool,
}

impl PgToolData {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct MantraDbRow {
    text: String,
    author: Option<String>,
}

#[derive(sqlx::FromRow)]
struct LiveSessionDbRow {
    title: String,
    starts_at: DateTime<Utc>,
    status: String,
}

#[derive(sqlx::FromRow)]
struct LeaderboardDbRow {
    rank: i64,
    display_name: String,
    points: i64,
}

#[derive(sqlx::FromRow)]
struct TaskDbRow {
    title: String,
    status: String,
    due_date: Option<chrono::NaiveDate>,
}

#[derive(sqlx::FromRow)]
struct StreakDbRow {
    current_days: i64,
    best_days: i64,
}

#[derive(sqlx::FromRow)]
struct WeekDbRow {
    focus_minutes_7d: i64,
    sessions_done_7d: i64,
    tasks_done_7d: i64,
}

#[derive(sqlx::FromRow)]
struct BookingDbRow {
    mentor_name: String,
    starts_at: DateTime<Utc>,
}

#[async_trait]
impl ToolData for PgToolData {
    async fn mantra_today(&self) -> Result<Option<MantraRow>, ProviderError> {
        let row = sqlx::query_as::<_, MantraDbRow>(
            "SELECT text, author FROM daily_mantras WHERE day = CURRENT_DATE",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| MantraRow {
            text: r.text,
            author: r.author,
        }))
    }

    async fn live_sessions(&self) -> Result<Vec<LiveSessionRow>, ProviderError> {
        let rows = sqlx::query_as::<_, LiveSessionDbRow>(
            "SELECT title, starts_at, status FROM live_sessions \
             WHERE status = 'live' \
                OR (status = 'upcoming' AND starts_at < NOW() + INTERVAL '24 hours') \
             ORDER BY starts_at ASC LIMIT 5",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| LiveSessionRow {
                title: r.title,
                starts_at: r.starts_at,
                status: r.status,
            })
            .collect())
    }

    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardRow>, ProviderError> {
        let rows = sqlx::query_as::<_, LeaderboardDbRow>(
            "SELECT ROW_NUMBER() OVER (ORDER BY s.points DESC) AS rank, \
                    u.display_name, s.points \
             FROM user_stats s JOIN users u ON u.id = s.user_id \
             WHERE u.is_active = TRUE \
             ORDER BY s.points DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| LeaderboardRow {
                rank: r.rank,
                display_name: r.display_name,
                points: r.points,
            })
            .collect())
    }

    async fn tasks_for(&self, user_id: Uuid) -> Result<Vec<TaskRow>, ProviderError> {
        let rows = sqlx::query_as::<_, TaskDbRow>(
            "SELECT title, status, due_date FROM tasks \
             WHERE user_id = $1 AND status <> 'archived' \
             ORDER BY due_date ASC NULLS LAST, created_at ASC LIMIT 10",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| TaskRow {
                title: r.title,
                status: r.status,
                due: r.due_date,
            })
            .collect())
    }

    async fn streak_for(&self, user_id: Uuid) -> Result<Option<StreakRow>, ProviderError> {
        let row = sqlx::query_as::<_, StreakDbRow>(
            "SELECT current_days, best_days FROM user_stats WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StreakRow {
            current_days: r.current_days,
            best_days: r.best_days,
        }))
    }

    async fn week_summary_for(
        &self,
        user_id: Uuid,
    ) -> Result<Option<WeekSummaryRow>, ProviderError> {
        let row = sqlx::query_as::<_, WeekDbRow>(
            "SELECT focus_minutes_7d, sessions_done_7d, tasks_done_7d \
             FROM user_stats WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| WeekSummaryRow {
            focus_minutes: r.focus_minutes_7d,
            sessions_done: r.sessions_done_7d,
            tasks_done: r.tasks_done_7d,
        }))
    }

    async fn next_booking_for(&self, user_id: Uuid) -> Result<Option<BookingRow>, ProviderError> {
        let row = sqlx::query_as::<_, BookingDbRow>(
            "SELECT mentor_name, starts_at FROM bookings \
             WHERE user_id = $1 AND starts_at > NOW() AND status = 'confirmed' \
             ORDER BY starts_at ASC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| BookingRow {
            mentor: r.mentor_name,
            starts_at: r.starts_at,
        }))
    }
}
