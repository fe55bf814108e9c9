//! Intent routing: decide whether a question should be answered from live
//! account/platform data (a tool) instead of retrieval.
//!
//! Two matchers run under a configurable strategy: keyword routing is exact
//! and free, embedding routing compares the question vector against anchor
//! vectors stored next to each tool. Hybrid tries keywords first and falls
//! back to embeddings.

use regex::Regex;

use crate::providers::ToolAnchor;
use crate::routes::chat::retrieval::cosine_similarity;

/// Minimum anchor similarity before an embedding route is trusted.
pub const TOOL_ROUTE_MIN_SCORE: f64 = 0.78;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouterStrategy {
    KeywordOnly,
    EmbeddingOnly,
    #[default]
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    MantraToday,
    LiveSessions,
    Leaderboard,
    MyTasks,
    MyStreak,
    MyWeek,
    NextBooking,
}

impl ToolName {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::MantraToday => "mantra_today",
            ToolName::LiveSessions => "live_sessions",
            ToolName::Leaderboard => "leaderboard",
            ToolName::MyTasks => "my_tasks",
            ToolName::MyStreak => "my_streak",
            ToolName::MyWeek => "my_week",
            ToolName::NextBooking => "next_booking",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "mantra_today" => Some(ToolName::MantraToday),
            "live_sessions" => Some(ToolName::LiveSessions),
            "leaderboard" => Some(ToolName::Leaderboard),
            "my_tasks" => Some(ToolName::MyTasks),
            "my_streak" => Some(ToolName::MyStreak),
            "my_week" => Some(ToolName::MyWeek),
            "next_booking" => Some(ToolName::NextBooking),
            _ => None,
        }
    }

    /// Tools reading a specific member's data need an authenticated viewer.
    pub fn requires_auth(self) -> bool {
        matches!(
            self,
            ToolName::MyTasks | ToolName::MyStreak | ToolName::MyWeek | ToolName::NextBooking
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    Keyword,
    Embedding,
}

impl RouteSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteSource::Keyword => "keyword",
            RouteSource::Embedding => "embedding",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolSelection {
    pub tool: ToolName,
    pub score: f64,
    pub source: RouteSource,
}

/// Keyword matchers per tool, checked in declaration order. Personal tools
/// come before the public ones so "my streak" never routes to leaderboard.
struct KeywordRoute {
    tool: ToolName,
    patterns: &'static [&'static str],
}

const KEYWORD_ROUTES: &[KeywordRoute] = &[
    KeywordRoute {
        tool: ToolName::MyTasks,
        patterns: &[
            r"\bmy tasks?\b",
            r"\btasks? (for )?today\b",
            r"\bwhat (do|should) i (work on|do) today\b",
            r"\b(мои задачи|список задач|задачи на сегодня)\b",
            r"\b(mening vazifalarim|bugungi vazifalar)\b",
        ],
    },
    KeywordRoute {
        tool: ToolName::MyStreak,
        patterns: &[
            r"\bmy streak\b",
            r"\bcurrent streak\b",
            r"\bhow (long|many days) (is|have) my streak\b",
            r"\b(мой стрик|моя серия)\b",
            r"\b(mening strikim|necha kun(lik)? strik)\b",
        ],
    },
    KeywordRoute {
        tool: ToolName::MyWeek,
        patterns: &[
            r"\bmy week\b",
            r"\b(this|past|last) week('s)? (summary|stats|progress)\b",
            r"\bweekly (summary|progress|stats)\b",
            r"\b(моя неделя|итоги недели|за неделю)\b",
            r"\b(mening haftam|haftalik (natija|hisobot))\b",
        ],
    },
    KeywordRoute {
        tool: ToolName::NextBooking,
        patterns: &[
            r"\b(my )?next booking\b",
            r"\bnext (mentor )?(call|session) (with|booked)\b",
            r"\bwhen is my (booking|mentor (call|session))\b",
            r"\b(моя бронь|следующая (бронь|встреча с ментором))\b",
            r"\b(keyingi bron|mentor bilan uchrashuv)\b",
        ],
    },
    KeywordRoute {
        tool: ToolName::MantraToday,
        patterns: &[
            r"\b(today'?s? )?mantra\b",
            r"\bmantra (of the day|today|for today)\b",
            r"\b(мантра (дня|сегодня)?)\b",
            r"\b(bugungi mantra|kun mantrasi)\b",
        ],
    },
    KeywordRoute {
        tool: ToolName::LiveSessions,
        patterns: &[
            r"\blive (sessions?|rooms?)\b",
            r"\b(upcoming|current) (group )?sessions?\b",
            r"\bwho is (focusing|online) (now|right now)\b",
            r"\b(живые сессии|лайв[- ]сессии|групповые сессии)\b",
            r"\b(jonli sessiya|guruh sessiya)\b",
        ],
    },
    KeywordRoute {
        tool: ToolName::Leaderboard,
        patterns: &[
            r"\bleaderboard\b",
            r"\btop (users|members|players)\b",
            r"\b(ranking|rankings)\b",
            r"\b(рейтинг|таблица лидеров|лидеры)\b",
            r"\b(reyting|peshqadamlar|yetakchilar)\b",
        ],
    },
];

/// Compiled keyword router. Built once per policy, not per request.
pub struct KeywordRouter {
    routes: Vec<(ToolName, Vec<Regex>)>,
}

impl Default for KeywordRouter {
    fn default() -> Self {
        let routes = KEYWORD_ROUTES
            .iter()
            .map(|route| {
                let patterns = route
                    .patterns
                    .iter()
                    .map(|p| Regex::new(p).expect("keyword route pattern must compile"))
                    .collect();
                (route.tool, patterns)
            })
            .collect();
        Self { routes }
    }
}

impl KeywordRouter {
    /// Input must already be lower-cased. A keyword hit is a full-confidence
    /// route.
    pub fn route(&self, input: &str) -> Option<ToolSelection> {
        for (tool, patterns) in &self.routes {
            if patterns.iter().any(|p| p.is_match(input)) {
                return Some(ToolSelection {
                    tool: *tool,
                    score: 1.0,
                    source: RouteSource::Keyword,
                });
            }
        }
        None
    }
}

/// Compare the question vector against every anchor; the best anchor wins if
/// it clears [`TOOL_ROUTE_MIN_SCORE`]. Anchors whose tool name is unknown are
/// skipped rather than failing the request.
pub fn route_by_embedding(vector: &[f64], anchors: &[ToolAnchor]) -> Option<ToolSelection> {
    let mut best: Option<ToolSelection> = None;

    for anchor in anchors {
        let Some(tool) = ToolName::from_str(&anchor.tool) else {
            tracing::warn!(tool = %anchor.tool, "skipping anchor for unknown tool");
            continue;
        };
        let score = cosine_similarity(vector, &anchor.embedding);
        if score < TOOL_ROUTE_MIN_SCORE {
            continue;
        }
        if best.is_none_or(|b| score > b.score) {
            best = Some(ToolSelection {
                tool,
                score,
                source: RouteSource::Embedding,
            });
        }
    }

    best
}

/// Apply the configured strategy. `input` must be lower-cased and trimmed.
pub fn select_tool(
    strategy: RouterStrategy,
    router: &KeywordRouter,
    input: &str,
    vector: &[f64],
    anchors: &[ToolAnchor],
) -> Option<ToolSelection> {
    match strategy {
        RouterStrategy::KeywordOnly => router.route(input),
        RouterStrategy::EmbeddingOnly => route_by_embedding(vector, anchors),
        RouterStrategy::Hybrid => router
            .route(input)
            .or_else(|| route_by_embedding(vector, anchors)),
    }
}
