//! The decision pipeline behind `POST /v1/chat`.
//!
//! One request flows through a fixed branch order: feature gate, scripted
//! cascade, external moderation, intent routing, retrieval, memory,
//! generation. The operator gate is re-read at three checkpoints (before the
//! cascade, before generation, after generation) so a pause takes effect on
//! in-flight requests, not just new ones.
//!
//! Every branch that produces a reply also decides what gets audited. The
//! first gate refusal is the only unlogged outcome; it happens before any
//! content processing, so there is nothing worth keeping.

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use serde_json::{Map, Value};
use uuid::Uuid;

use fokus_core::chat::{ChatResponse, Language, LogEntry, RetrievalContext};
use fokus_core::error::codes;

use crate::auth::Viewer;
use crate::providers::{
    AnswerGenerator, AuditLog, EmbeddingProvider, FeatureGate, GenerationRequest, MemoryProfile,
    MemoryStore, ModerationProvider, ModerationVerdict, ToolData, ToolRouteSource, VectorIndex,
};
use crate::routes::chat::classify::{CascadeRules, ClassificationOutcome};
use crate::routes::chat::intent::{self, KeywordRouter, RouterStrategy, ToolName, ToolSelection};
use crate::routes::chat::language::detect_language;
use crate::routes::chat::memory::{self, load_memory};
use crate::routes::chat::redact::redact_pair;
use crate::routes::chat::replies::{self, ScriptedReply};
use crate::routes::chat::retrieval::{self, RetrievalOutcome};
use crate::routes::chat::tools::{self, LEADERBOARD_LIMIT};

/// Per-deployment behavior knobs, built once at startup.
pub struct ChatPolicy {
    pub rules: CascadeRules,
    pub keyword_router: KeywordRouter,
    pub router_strategy: RouterStrategy,
    /// Consult the static help corpus when the index returns nothing.
    pub fallback_corpus: bool,
}

impl Default for ChatPolicy {
    fn default() -> Self {
        Self {
            rules: CascadeRules::default(),
            keyword_router: KeywordRouter::default(),
            router_strategy: RouterStrategy::default(),
            fallback_corpus: true,
        }
    }
}

/// Every collaborator the pipeline touches, behind trait objects so tests can
/// swap any of them.
pub struct ChatServices {
    pub moderation: Arc<dyn ModerationProvider>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub generator: Arc<dyn AnswerGenerator>,
    pub gate: Arc<dyn FeatureGate>,
    pub memory: Arc<dyn MemoryStore>,
    pub audit: Arc<dyn AuditLog>,
    pub tools: Arc<dyn ToolData>,
    pub tool_routes: Arc<dyn ToolRouteSource>,
    pub policy: ChatPolicy,
}

/// One validated request, past input/session checks and the rate limiter.
pub struct ChatTurn {
    pub input: String,
    pub session_id: Uuid,
    pub viewer: Option<Viewer>,
}

pub struct TurnOutput {
    pub status: StatusCode,
    pub body: ChatResponse,
}

fn response(
    text: impl Into<String>,
    used_rag: bool,
    language: Language,
    chat_id: Option<Uuid>,
    error: Option<&str>,
) -> ChatResponse {
    ChatResponse {
        text: text.into(),
        used_rag,
        language: language.code().to_string(),
        chat_id,
        error: error.map(str::to_string),
    }
}

struct LogContext<'a> {
    reason: &'a str,
    stage: &'a str,
    best_score: Option<f64>,
    tool: Option<&'a str>,
    route_source: Option<&'a str>,
    generation_ms: Option<u64>,
    moderation_category: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    fn new(reason: &'a str, stage: &'a str) -> Self {
        Self {
            reason,
            stage,
            best_score: None,
            tool: None,
            route_source: None,
            generation_ms: None,
            moderation_category: None,
        }
    }

    fn to_metadata(&self) -> Value {
        let mut map = Map::new();
        map.insert("reason".into(), Value::from(self.reason));
        map.insert("stage".into(), Value::from(self.stage));
        if let Some(score) = self.best_score {
            map.insert("bestScore".into(), Value::from(score));
        }
        if let Some(tool) = self.tool {
            map.insert("toolName".into(), Value::from(tool));
        }
        if let Some(source) = self.route_source {
            map.insert("routeSource".into(), Value::from(source));
        }
        if let Some(ms) = self.generation_ms {
            map.insert("generationMs".into(), Value::from(ms));
        }
        if let Some(category) = self.moderation_category {
            map.insert("moderationCategory".into(), Value::from(category));
        }
        Value::Object(map)
    }
}

impl ChatServices {
    /// Run one turn to completion. Infallible by design: every internal
    /// failure maps to a response the caller can send as-is.
    pub async fn run_turn(&self, turn: ChatTurn) -> TurnOutput {
        let detected = detect_language(&turn.input);
        let language = detected.language;
        let lowered = turn.input.to_lowercase();

        // Checkpoint one. The request has not been processed yet, so a pause
        // here is not audited.
        if !self.gate.assistant_enabled(false).await {
            return TurnOutput {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: response(
                    replies::text(ScriptedReply::Paused, language),
                    false,
                    language,
                    None,
                    Some(codes::ASSISTANT_DISABLED),
                ),
            };
        }

        if let Some(outcome) = self.policy.rules.pre_moderation(&lowered) {
            return self
                .finish_scripted(&turn, language, ScriptedReply::Greeting, outcome.reason())
                .await;
        }

        // A moderation outage does not fail the turn; the rest of the cascade
        // still runs against the input.
        let verdict = match self.moderation.review(&turn.input).await {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::warn!(error = %err, "moderation call failed; continuing unmoderated");
                ModerationVerdict {
                    ok: true,
                    category: None,
                }
            }
        };
        if !verdict.ok {
            let mut ctx = LogContext::new(
                ClassificationOutcome::ModerationBlocked { category: None }.reason(),
                "cascade",
            );
            ctx.moderation_category = verdict.category.as_deref();
            let chat_id = self
                .log_exchange(
                    &turn,
                    language,
                    replies::text(ScriptedReply::ModerationBlocked, language),
                    false,
                    &ctx,
                )
                .await;
            return TurnOutput {
                status: StatusCode::OK,
                body: response(
                    replies::text(ScriptedReply::ModerationBlocked, language),
                    false,
                    language,
                    chat_id,
                    None,
                ),
            };
        }

        if let Some(outcome) = self.policy.rules.post_moderation(&lowered) {
            let reply = match outcome {
                ClassificationOutcome::RefusalPersonal if turn.viewer.is_none() => {
                    ScriptedReply::SignInRequired
                }
                ClassificationOutcome::RefusalPersonal => ScriptedReply::PrivacyRefusal,
                ClassificationOutcome::RefusalAdmin => ScriptedReply::AdminRefusal,
                _ => ScriptedReply::OffTopic,
            };
            return self
                .finish_scripted(&turn, language, reply, outcome.reason())
                .await;
        }

        // Embed once; the vector serves both intent routing and retrieval. A
        // failed embedding disables routing but the static corpus can still
        // answer, so the 500 decision is deferred to the retrieval branch.
        let vector = match self.embedder.embed(std::slice::from_ref(&turn.input)).await {
            Ok(mut vectors) if !vectors.is_empty() => Some(vectors.remove(0)),
            Ok(_) => {
                tracing::warn!("embedding provider returned no vectors");
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "embedding call failed");
                None
            }
        };

        let selection = match &vector {
            Some(vector) => self.route_intent(&lowered, vector).await,
            None => None,
        };

        let (contexts, best_score, used_rag) = match selection {
            Some(selection) if selection.tool.requires_auth() && turn.viewer.is_none() => {
                let mut ctx = LogContext::new("sign_in_required", "tool");
                ctx.tool = Some(selection.tool.as_str());
                ctx.route_source = Some(selection.source.as_str());
                let reply = replies::text(ScriptedReply::SignInRequired, language);
                let chat_id = self.log_exchange(&turn, language, reply, false, &ctx).await;
                return TurnOutput {
                    status: StatusCode::OK,
                    body: response(reply, false, language, chat_id, None),
                };
            }
            Some(selection) if selection.tool == ToolName::Leaderboard => {
                // Leaderboard is pure structured data; render it directly
                // without a generation round-trip.
                let rows = match self.tools.leaderboard(LEADERBOARD_LIMIT).await {
                    Ok(rows) => rows,
                    Err(err) => {
                        tracing::warn!(error = %err, "leaderboard fetch failed; replying empty");
                        Vec::new()
                    }
                };
                let reply = tools::render_leaderboard_reply(&rows, language);
                let mut ctx = LogContext::new("leaderboard", "tool");
                ctx.tool = Some(selection.tool.as_str());
                ctx.route_source = Some(selection.source.as_str());
                let chat_id = self.log_exchange(&turn, language, &reply, false, &ctx).await;
                return TurnOutput {
                    status: StatusCode::OK,
                    body: response(reply, false, language, chat_id, None),
                };
            }
            Some(selection) => {
                let contexts = self
                    .tool_contexts(&turn, selection, language, vector.as_deref())
                    .await;
                (contexts, 1.0, true)
            }
            None => {
                // An embedding failure, an index failure or an empty result
                // set all fall back to the static corpus; only a failure with
                // no fallback hit is unrecoverable.
                let outcome = match &vector {
                    None => {
                        let fallback = if self.policy.fallback_corpus {
                            retrieval::fallback_search(&turn.input)
                        } else {
                            RetrievalOutcome::default()
                        };
                        if fallback.contexts.is_empty() {
                            return self.finish_failure(&turn, "embedding").await;
                        }
                        fallback
                    }
                    Some(vector) => match retrieval::query_primary(&*self.vector_index, vector)
                        .await
                    {
                        Ok(outcome)
                            if outcome.contexts.is_empty() && self.policy.fallback_corpus =>
                        {
                            retrieval::fallback_search(&turn.input)
                        }
                        Ok(outcome) => outcome,
                        Err(err) => {
                            tracing::error!(error = %err, "primary retrieval failed");
                            let fallback = if self.policy.fallback_corpus {
                                retrieval::fallback_search(&turn.input)
                            } else {
                                RetrievalOutcome::default()
                            };
                            if fallback.contexts.is_empty() {
                                return self.finish_failure(&turn, "retrieval").await;
                            }
                            fallback
                        }
                    },
                };

                if !outcome.is_confident() {
                    let mut ctx = LogContext::new("not_indexed", "retrieval");
                    ctx.best_score = Some(outcome.best_score);
                    let reply = replies::text(ScriptedReply::NotIndexed, language);
                    let chat_id = self.log_exchange(&turn, language, reply, false, &ctx).await;
                    return TurnOutput {
                        status: StatusCode::OK,
                        body: response(reply, false, language, chat_id, None),
                    };
                }

                let best = outcome.best_score;
                let used = !outcome.contexts.is_empty();
                (outcome.contexts, best, used)
            }
        };

        let profile = match &turn.viewer {
            Some(viewer) => load_memory(&*self.memory, viewer.user_id).await,
            None => MemoryProfile::default(),
        };

        // Checkpoint two: last uncached read before spending generator tokens.
        if !self.gate.assistant_enabled(false).await {
            return self.finish_paused(&turn, language).await;
        }

        let started = Instant::now();
        let generated = self
            .generator
            .generate(GenerationRequest {
                question: turn.input.clone(),
                language,
                contexts: contexts.clone(),
                memory: if profile.enabled {
                    profile.entries.clone()
                } else {
                    Vec::new()
                },
            })
            .await;
        let generation_ms = started.elapsed().as_millis() as u64;

        let answer = match generated {
            Ok(answer) => answer,
            Err(err) => {
                tracing::error!(error = %err, "answer generation failed");
                return self.finish_failure(&turn, "generation").await;
            }
        };

        // Checkpoint three: an operator pause during generation still wins.
        // The generated text is discarded and never logged.
        if !self.gate.assistant_enabled(false).await {
            return self.finish_paused(&turn, language).await;
        }

        let mut ctx = LogContext::new("answered", "generation");
        ctx.best_score = Some(best_score);
        ctx.generation_ms = Some(generation_ms);
        if let Some(first) = contexts.first() {
            if let Some(tool) = first.url.strip_prefix("tool://") {
                ctx.tool = Some(tool);
            }
        }
        let chat_id = self
            .log_exchange(&turn, language, &answer, used_rag, &ctx)
            .await;

        if let Some(viewer) = &turn.viewer {
            memory::spawn_extraction(
                Arc::clone(&self.memory),
                viewer.user_id,
                profile.enabled,
                turn.input.clone(),
            );
        }

        TurnOutput {
            status: StatusCode::OK,
            body: response(answer, used_rag, language, chat_id, None),
        }
    }

    async fn route_intent(&self, lowered: &str, vector: &[f64]) -> Option<ToolSelection> {
        let anchors = if self.policy.router_strategy == RouterStrategy::KeywordOnly {
            Vec::new()
        } else {
            match self.tool_routes.anchors().await {
                Ok(anchors) => anchors,
                Err(err) => {
                    tracing::warn!(error = %err, "anchor fetch failed; keyword routing only");
                    Vec::new()
                }
            }
        };
        intent::select_tool(
            self.policy.router_strategy,
            &self.policy.keyword_router,
            lowered,
            vector,
            &anchors,
        )
    }

    /// Execute the routed tool and assemble its context list: the rendered
    /// tool output first, then whatever augmenting retrieval finds. A tool
    /// data failure degrades to the tool's "unavailable" sentence.
    async fn tool_contexts(
        &self,
        turn: &ChatTurn,
        selection: ToolSelection,
        language: Language,
        vector: Option<&[f64]>,
    ) -> Vec<RetrievalContext> {
        let user_id = turn.viewer.as_ref().map(|v| v.user_id);
        let rendered = match tools::execute(&*self.tools, selection.tool, user_id, language).await
        {
            Ok(rendered) => rendered,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    tool = selection.tool.as_str(),
                    "tool call failed; rendering as unavailable"
                );
                tools::unavailable_text(selection.tool, language).to_string()
            }
        };

        let mut contexts = vec![tools::tool_context(selection.tool, rendered)];
        if let Some(vector) = vector {
            let augmenting = retrieval::query_augmenting(&*self.vector_index, vector).await;
            contexts.extend(augmenting.contexts);
        }
        contexts
    }

    async fn finish_scripted(
        &self,
        turn: &ChatTurn,
        language: Language,
        reply: ScriptedReply,
        reason: &str,
    ) -> TurnOutput {
        let text = replies::text(reply, language);
        let ctx = LogContext::new(reason, "cascade");
        let chat_id = self.log_exchange(turn, language, text, false, &ctx).await;
        TurnOutput {
            status: StatusCode::OK,
            body: response(text, false, language, chat_id, None),
        }
    }

    async fn finish_paused(&self, turn: &ChatTurn, language: Language) -> TurnOutput {
        let text = replies::text(ScriptedReply::Paused, language);
        let ctx = LogContext::new("disabled", "gate");
        let chat_id = self.log_exchange(turn, language, text, false, &ctx).await;
        TurnOutput {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: response(text, false, language, chat_id, Some(codes::ASSISTANT_DISABLED)),
        }
    }

    /// Unrecoverable failure: the reply and the log row are always English,
    /// never the detected language.
    async fn finish_failure(&self, turn: &ChatTurn, stage: &str) -> TurnOutput {
        let text = replies::generic_failure();
        let ctx = LogContext::new("failure", stage);
        let chat_id = self
            .log_exchange(turn, Language::English, text, false, &ctx)
            .await;
        TurnOutput {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: response(
                text,
                false,
                Language::English,
                chat_id,
                Some(codes::INTERNAL_ERROR),
            ),
        }
    }

    /// Redact and persist one exchange. An audit failure is logged and
    /// swallowed; the user still gets their reply.
    async fn log_exchange(
        &self,
        turn: &ChatTurn,
        language: Language,
        reply: &str,
        used_rag: bool,
        ctx: &LogContext<'_>,
    ) -> Option<Uuid> {
        let pair = redact_pair(&turn.input, reply);
        let entry = LogEntry {
            user_id: turn.viewer.as_ref().map(|v| v.user_id),
            session_id: turn.session_id,
            language,
            input: pair.input,
            reply: pair.reply,
            used_rag,
            metadata: ctx.to_metadata(),
            redaction_status: pair.status,
        };
        match self.audit.record(&entry).await {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::error!(error = %err, "audit write failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use fokus_core::chat::MemoryEntry;
    use crate::providers::{
        BookingRow, LeaderboardRow, LiveSessionRow, MantraRow, ModerationVerdict, ProviderError,
        StreakRow, TaskRow, ToolAnchor, VectorMatch, WeekSummaryRow,
    };

    struct StaticModeration(ModerationVerdict);
    #[async_trait]
    impl ModerationProvider for StaticModeration {
        async fn review(&self, _text: &str) -> Result<ModerationVerdict, ProviderError> {
            Ok(self.0.clone())
        }
    }

    struct StaticEmbedder(Vec<f64>);
    #[async_trait]
    impl EmbeddingProvider for StaticEmbedder {
        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f64>>, ProviderError> {
            Ok(inputs.iter().map(|_| self.0.clone()).collect())
        }
    }

    struct StaticIndex(Vec<VectorMatch>);
    #[async_trait]
    impl VectorIndex for StaticIndex {
        async fn query(
            &self,
            _vector: &[f64],
            _top_k: usize,
            _include_metadata: bool,
        ) -> Result<Vec<VectorMatch>, ProviderError> {
            Ok(self.0.clone())
        }
    }

    struct FailingIndex;
    #[async_trait]
    impl VectorIndex for FailingIndex {
        async fn query(
            &self,
            _vector: &[f64],
            _top_k: usize,
            _include_metadata: bool,
        ) -> Result<Vec<VectorMatch>, ProviderError> {
            Err(ProviderError::Api {
                status: 500,
                body: "index down".to_string(),
            })
        }
    }

    struct FailingModeration;
    #[async_trait]
    impl ModerationProvider for FailingModeration {
        async fn review(&self, _text: &str) -> Result<ModerationVerdict, ProviderError> {
            Err(ProviderError::Api {
                status: 503,
                body: "moderation down".to_string(),
            })
        }
    }

    struct FailingEmbedder;
    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _inputs: &[String]) -> Result<Vec<Vec<f64>>, ProviderError> {
            Err(ProviderError::Api {
                status: 500,
                body: "embedder down".to_string(),
            })
        }
    }

    struct FailingTools;
    #[async_trait]
    impl ToolData for FailingTools {
        async fn mantra_today(&self) -> Result<Option<MantraRow>, ProviderError> {
            Err(ProviderError::Malformed("tool db down".into()))
        }
        async fn live_sessions(&self) -> Result<Vec<LiveSessionRow>, ProviderError> {
            Err(ProviderError::Malformed("tool db down".into()))
        }
        async fn leaderboard(&self, _limit: i64) -> Result<Vec<LeaderboardRow>, ProviderError> {
            Err(ProviderError::Malformed("tool db down".into()))
        }
        async fn tasks_for(&self, _user_id: Uuid) -> Result<Vec<TaskRow>, ProviderError> {
            Err(ProviderError::Malformed("tool db down".into()))
        }
        async fn streak_for(&self, _user_id: Uuid) -> Result<Option<StreakRow>, ProviderError> {
            Err(ProviderError::Malformed("tool db down".into()))
        }
        async fn week_summary_for(
            &self,
            _user_id: Uuid,
        ) -> Result<Option<WeekSummaryRow>, ProviderError> {
            Err(ProviderError::Malformed("tool db down".into()))
        }
        async fn next_booking_for(
            &self,
            _user_id: Uuid,
        ) -> Result<Option<BookingRow>, ProviderError> {
            Err(ProviderError::Malformed("tool db down".into()))
        }
    }

    struct CountingGenerator {
        calls: AtomicUsize,
        fail: bool,
    }
    #[async_trait]
    impl AnswerGenerator for CountingGenerator {
        async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Malformed("boom".into()));
            }
            Ok(format!("answer to: {}", request.question))
        }
    }

    /// Gate that pops scripted answers and then repeats the last one.
    struct ScriptedGate(Mutex<VecDeque<bool>>);
    impl ScriptedGate {
        fn always(enabled: bool) -> Self {
            Self(Mutex::new(VecDeque::from(vec![enabled])))
        }
        fn sequence(values: &[bool]) -> Self {
            Self(Mutex::new(values.iter().copied().collect()))
        }
    }
    #[async_trait]
    impl FeatureGate for ScriptedGate {
        async fn assistant_enabled(&self, _cached: bool) -> bool {
            let mut values = self.0.lock().unwrap();
            if values.len() > 1 {
                values.pop_front().unwrap()
            } else {
                *values.front().unwrap()
            }
        }
    }

    #[derive(Default)]
    struct RecordingMemory {
        profile: Option<MemoryProfile>,
        appended: Mutex<Vec<MemoryEntry>>,
    }
    #[async_trait]
    impl MemoryStore for RecordingMemory {
        async fn profile(&self, _user_id: Uuid) -> Result<MemoryProfile, ProviderError> {
            match &self.profile {
                Some(profile) => Ok(profile.clone()),
                None => Err(ProviderError::Malformed("no profile".into())),
            }
        }
        async fn append(
            &self,
            _user_id: Uuid,
            entries: &[MemoryEntry],
        ) -> Result<(), ProviderError> {
            self.appended.lock().unwrap().extend_from_slice(entries);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingAudit {
        entries: Mutex<Vec<LogEntry>>,
    }
    #[async_trait]
    impl AuditLog for RecordingAudit {
        async fn record(&self, entry: &LogEntry) -> Result<Uuid, ProviderError> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(Uuid::now_v7())
        }
    }

    #[derive(Default)]
    struct StaticTools {
        streak: Option<StreakRow>,
        leaderboard: Vec<LeaderboardRow>,
    }
    #[async_trait]
    impl ToolData for StaticTools {
        async fn mantra_today(&self) -> Result<Option<MantraRow>, ProviderError> {
            Ok(None)
        }
        async fn live_sessions(&self) -> Result<Vec<LiveSessionRow>, ProviderError> {
            Ok(Vec::new())
        }
        async fn leaderboard(&self, _limit: i64) -> Result<Vec<LeaderboardRow>, ProviderError> {
            Ok(self.leaderboard.clone())
        }
        async fn tasks_for(&self, _user_id: Uuid) -> Result<Vec<TaskRow>, ProviderError> {
            Ok(Vec::new())
        }
        async fn streak_for(&self, _user_id: Uuid) -> Result<Option<StreakRow>, ProviderError> {
            Ok(self.streak.clone())
        }
        async fn week_summary_for(
            &self,
            _user_id: Uuid,
        ) -> Result<Option<WeekSummaryRow>, ProviderError> {
            Ok(None)
        }
        async fn next_booking_for(
            &self,
            _user_id: Uuid,
        ) -> Result<Option<BookingRow>, ProviderError> {
            Ok(None)
        }
    }

    struct NoAnchors;
    #[async_trait]
    impl ToolRouteSource for NoAnchors {
        async fn anchors(&self) -> Result<Vec<ToolAnchor>, ProviderError> {
            Ok(Vec::new())
        }
    }

    fn confident_match() -> VectorMatch {
        VectorMatch {
            score: 0.82,
            metadata: serde_json::json!({
                "url": "https://fokus.uz/help/streaks",
                "title": "Streaks",
                "chunk": "Your streak grows daily.",
                "chunkIndex": 0,
            }),
        }
    }

    struct Fixture {
        services: ChatServices,
        audit: Arc<RecordingAudit>,
        generator: Arc<CountingGenerator>,
    }

    fn fixture(gate: ScriptedGate, matches: Vec<VectorMatch>) -> Fixture {
        let audit = Arc::new(RecordingAudit::default());
        let generator = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let services = ChatServices {
            moderation: Arc::new(StaticModeration(ModerationVerdict {
                ok: true,
                category: None,
            })),
            embedder: Arc::new(StaticEmbedder(vec![1.0, 0.0])),
            vector_index: Arc::new(StaticIndex(matches)),
            generator: Arc::clone(&generator) as Arc<dyn AnswerGenerator>,
            gate: Arc::new(gate),
            memory: Arc::new(RecordingMemory::default()),
            audit: Arc::clone(&audit) as Arc<dyn AuditLog>,
            tools: Arc::new(StaticTools::default()),
            tool_routes: Arc::new(NoAnchors),
            policy: ChatPolicy {
                fallback_corpus: false,
                ..ChatPolicy::default()
            },
        };
        Fixture {
            services,
            audit,
            generator,
        }
    }

    fn turn(input: &str) -> ChatTurn {
        ChatTurn {
            input: input.to_string(),
            session_id: Uuid::now_v7(),
            viewer: None,
        }
    }

    fn turn_with_viewer(input: &str) -> ChatTurn {
        ChatTurn {
            viewer: Some(Viewer {
                user_id: Uuid::now_v7(),
                scopes: vec!["assistant:chat".to_string()],
            }),
            ..turn(input)
        }
    }

    #[tokio::test]
    async fn greeting_short_circuits_before_generation() {
        let f = fixture(ScriptedGate::always(true), vec![confident_match()]);
        let out = f.services.run_turn(turn("salom")).await;

        assert_eq!(out.status, StatusCode::OK);
        assert!(out.body.text.starts_with("Salom!"));
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);

        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metadata["reason"], "greeting");
    }

    #[tokio::test]
    async fn gate_closed_at_first_checkpoint_is_not_audited() {
        let f = fixture(ScriptedGate::always(false), vec![]);
        let out = f.services.run_turn(turn("how do streaks work")).await;

        assert_eq!(out.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(out.body.error.as_deref(), Some(codes::ASSISTANT_DISABLED));
        assert!(f.audit.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gate_flip_between_checkpoints_pauses_and_audits() {
        // Open at checkpoint one, closed at checkpoint two.
        let f = fixture(
            ScriptedGate::sequence(&[true, false]),
            vec![confident_match()],
        );
        let out = f.services.run_turn(turn("how do streaks work")).await;

        assert_eq!(out.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);

        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metadata["reason"], "disabled");
    }

    #[tokio::test]
    async fn gate_flip_after_generation_discards_the_answer() {
        let f = fixture(
            ScriptedGate::sequence(&[true, true, false]),
            vec![confident_match()],
        );
        let out = f.services.run_turn(turn("how do streaks work")).await;

        assert_eq!(out.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 1);

        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        // The generated text must not appear in the log.
        assert!(!entries[0].reply.contains("answer to:"));
    }

    #[tokio::test]
    async fn moderation_block_is_scripted_and_audited_with_category() {
        let mut f = fixture(ScriptedGate::always(true), vec![]);
        f.services.moderation = Arc::new(StaticModeration(ModerationVerdict {
            ok: false,
            category: Some("harassment".to_string()),
        }));
        let out = f.services.run_turn(turn("something hostile")).await;

        assert_eq!(out.status, StatusCode::OK);
        assert!(!out.body.used_rag);

        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries[0].metadata["reason"], "moderation");
        assert_eq!(entries[0].metadata["moderationCategory"], "harassment");
    }

    #[tokio::test]
    async fn moderation_outage_degrades_to_a_normal_turn() {
        let mut f = fixture(ScriptedGate::always(true), vec![confident_match()]);
        f.services.moderation = Arc::new(FailingModeration);
        let out = f.services.run_turn(turn("how do streaks work")).await;

        assert_eq!(out.status, StatusCode::OK);
        assert!(out.body.text.starts_with("answer to:"));
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 1);

        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries[0].metadata["reason"], "answered");
    }

    #[tokio::test]
    async fn off_topic_is_refused_without_generation() {
        let f = fixture(ScriptedGate::always(true), vec![confident_match()]);
        let out = f
            .services
            .run_turn(turn("what is the capital of france"))
            .await;

        assert_eq!(out.status, StatusCode::OK);
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);
        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries[0].metadata["reason"], "off_topic");
    }

    #[tokio::test]
    async fn personal_data_question_asks_anonymous_users_to_sign_in() {
        let f = fixture(ScriptedGate::always(true), vec![]);
        let out = f.services.run_turn(turn("what is my email address")).await;

        assert_eq!(out.status, StatusCode::OK);
        assert!(out.body.text.contains("sign in"));
        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries[0].metadata["reason"], "refusal_personal");
    }

    #[tokio::test]
    async fn low_retrieval_confidence_returns_not_indexed() {
        let f = fixture(
            ScriptedGate::always(true),
            vec![VectorMatch {
                score: 0.2,
                metadata: serde_json::json!({
                    "url": "https://fokus.uz/x",
                    "chunk": "weak match",
                }),
            }],
        );
        let out = f.services.run_turn(turn("how do streaks work")).await;

        assert_eq!(out.status, StatusCode::OK);
        assert!(!out.body.used_rag);
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);

        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries[0].metadata["reason"], "not_indexed");
        assert_eq!(entries[0].metadata["bestScore"], 0.2);
    }

    #[tokio::test]
    async fn confident_retrieval_generates_and_audits_the_answer() {
        let f = fixture(ScriptedGate::always(true), vec![confident_match()]);
        let out = f.services.run_turn(turn("how do streaks work")).await;

        assert_eq!(out.status, StatusCode::OK);
        assert!(out.body.used_rag);
        assert!(out.body.chat_id.is_some());
        assert!(out.body.text.starts_with("answer to:"));

        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries[0].metadata["reason"], "answered");
        assert!(entries[0].metadata["generationMs"].is_u64());
    }

    #[tokio::test]
    async fn repeated_identical_requests_log_independent_entries() {
        let f = fixture(ScriptedGate::always(true), vec![confident_match()]);
        let session_id = Uuid::now_v7();
        let make = || ChatTurn {
            input: "how do streaks work".to_string(),
            session_id,
            viewer: None,
        };

        let first = f.services.run_turn(make()).await;
        let second = f.services.run_turn(make()).await;

        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(second.status, StatusCode::OK);

        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].session_id, entries[1].session_id);
        assert_eq!(entries[0].input, entries[1].input);
    }

    #[tokio::test]
    async fn index_failure_falls_back_to_the_static_corpus() {
        let mut f = fixture(ScriptedGate::always(true), vec![]);
        f.services.vector_index = Arc::new(FailingIndex);
        f.services.policy.fallback_corpus = true;
        let out = f
            .services
            .run_turn(turn("how do focus timers help with deep work"))
            .await;

        // The fallback corpus yields a result, so no 500; whether the turn is
        // answered or scripted depends on the fallback score.
        assert_ne!(out.status, StatusCode::INTERNAL_SERVER_ERROR);
        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn embedding_failure_consults_the_fallback_corpus() {
        let mut f = fixture(ScriptedGate::always(true), vec![]);
        f.services.embedder = Arc::new(FailingEmbedder);
        f.services.policy.fallback_corpus = true;
        let out = f
            .services
            .run_turn(turn("how do focus timers help with deep work"))
            .await;

        assert_ne!(out.status, StatusCode::INTERNAL_SERVER_ERROR);
        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn embedding_failure_without_fallback_is_500() {
        let mut f = fixture(ScriptedGate::always(true), vec![confident_match()]);
        f.services.embedder = Arc::new(FailingEmbedder);
        let out = f.services.run_turn(turn("how do streaks work")).await;

        assert_eq!(out.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);

        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries[0].metadata["stage"], "embedding");
    }

    #[tokio::test]
    async fn index_failure_without_fallback_is_500() {
        let mut f = fixture(ScriptedGate::always(true), vec![]);
        f.services.vector_index = Arc::new(FailingIndex);
        let out = f.services.run_turn(turn("how do streaks work")).await;

        assert_eq!(out.status, StatusCode::INTERNAL_SERVER_ERROR);
        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries[0].metadata["stage"], "retrieval");
    }

    #[tokio::test]
    async fn generation_failure_is_english_500() {
        let mut f = fixture(ScriptedGate::always(true), vec![confident_match()]);
        f.services.generator = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let out = f.services.run_turn(turn("Как работают фокус-сессии?")).await;

        assert_eq!(out.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(out.body.language, "en");
        assert_eq!(out.body.text, replies::generic_failure());

        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries[0].metadata["reason"], "failure");
        assert_eq!(entries[0].metadata["stage"], "generation");
        assert_eq!(entries[0].language, Language::English);
    }

    #[tokio::test]
    async fn personal_tool_without_viewer_requires_sign_in() {
        let f = fixture(ScriptedGate::always(true), vec![]);
        let out = f.services.run_turn(turn("how long is my streak")).await;

        assert_eq!(out.status, StatusCode::OK);
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);

        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries[0].metadata["reason"], "sign_in_required");
        assert_eq!(entries[0].metadata["toolName"], "my_streak");
        assert_eq!(entries[0].metadata["routeSource"], "keyword");
    }

    #[tokio::test]
    async fn personal_tool_with_viewer_feeds_generation() {
        let mut f = fixture(ScriptedGate::always(true), vec![]);
        f.services.tools = Arc::new(StaticTools {
            streak: Some(StreakRow {
                current_days: 4,
                best_days: 9,
            }),
            ..StaticTools::default()
        });
        let out = f
            .services
            .run_turn(turn_with_viewer("how long is my streak"))
            .await;

        assert_eq!(out.status, StatusCode::OK);
        assert!(out.body.used_rag);
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 1);

        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries[0].metadata["toolName"], "my_streak");
    }

    #[tokio::test]
    async fn leaderboard_shortcut_skips_generation() {
        let mut f = fixture(ScriptedGate::always(true), vec![]);
        f.services.tools = Arc::new(StaticTools {
            leaderboard: vec![LeaderboardRow {
                rank: 1,
                display_name: "Aziza".to_string(),
                points: 300,
            }],
            ..StaticTools::default()
        });
        let out = f.services.run_turn(turn("show the leaderboard")).await;

        assert_eq!(out.status, StatusCode::OK);
        assert!(!out.body.used_rag);
        assert!(out.body.text.contains("Aziza"));
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);

        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries[0].metadata["reason"], "leaderboard");
    }

    #[tokio::test]
    async fn tool_data_failure_degrades_to_the_unavailable_sentence() {
        let mut f = fixture(ScriptedGate::always(true), vec![]);
        f.services.tools = Arc::new(FailingTools);
        let out = f
            .services
            .run_turn(turn_with_viewer("how long is my streak"))
            .await;

        assert_eq!(out.status, StatusCode::OK);
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 1);

        let entries = f.audit.entries.lock().unwrap();
        assert_eq!(entries[0].metadata["reason"], "answered");
        assert_eq!(entries[0].metadata["toolName"], "my_streak");
    }

    #[tokio::test]
    async fn leaderboard_fetch_failure_replies_empty_not_500() {
        let mut f = fixture(ScriptedGate::always(true), vec![]);
        f.services.tools = Arc::new(FailingTools);
        let out = f.services.run_turn(turn("show the leaderboard")).await;

        assert_eq!(out.status, StatusCode::OK);
        assert_eq!(out.body.text, "The leaderboard is empty at the moment.");
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pii_is_redacted_in_the_audit_log_but_not_the_reply_path() {
        let f = fixture(ScriptedGate::always(true), vec![confident_match()]);
        let out = f
            .services
            .run_turn(turn("how do streaks work? reach me at aziza@fokus.uz"))
            .await;

        assert_eq!(out.status, StatusCode::OK);
        let entries = f.audit.entries.lock().unwrap();
        assert!(entries[0].input.contains("[redacted-email]"));
        assert!(!entries[0].input.contains("aziza@fokus.uz"));
        // The live reply is untouched by redaction.
        assert!(out.body.text.contains("aziza@fokus.uz"));
    }
}
