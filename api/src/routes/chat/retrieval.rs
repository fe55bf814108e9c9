//! Retrieval engine: vector search with a confidence threshold and a local
//! fallback corpus.
//!
//! Two entry points share one scoring/sorting core. [`query_primary`] is the
//! open-retrieval path — a hard index failure is fatal to the request.
//! [`query_augmenting`] enriches a tool context — failures degrade to an
//! empty context set and are only logged.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use fokus_core::chat::RetrievalContext;

use crate::providers::{ProviderError, VectorIndex, VectorMatch};

pub const RAG_TOP_K: usize = 5;
/// Minimum similarity a match must clear before its content is trusted to
/// ground a generated answer.
pub const RAG_MIN_SCORE: f64 = 0.35;

/// Dimensions of the hashing embedding used to score the fallback corpus.
const FALLBACK_DIMENSIONS: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    /// Sorted by descending score, truncated to `RAG_TOP_K`.
    pub contexts: Vec<RetrievalContext>,
    /// Top score, or 0.0 when no usable match survived filtering.
    pub best_score: f64,
}

impl RetrievalOutcome {
    pub fn is_confident(&self) -> bool {
        self.best_score >= RAG_MIN_SCORE
    }
}

/// Convert one raw index match into a context. Matches with missing chunk or
/// url metadata are malformed and dropped.
fn context_from_match(m: &VectorMatch) -> Option<RetrievalContext> {
    let metadata = m.metadata.as_object()?;
    let url = metadata.get("url")?.as_str()?.to_string();
    let chunk = metadata.get("chunk")?.as_str()?.to_string();
    if url.is_empty() || chunk.is_empty() {
        return None;
    }

    Some(RetrievalContext {
        title: metadata
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        chunk_index: metadata
            .get("chunkIndex")
            .and_then(|v| v.as_i64())
            .unwrap_or(0),
        indexed_at: metadata
            .get("indexedAt")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        url,
        chunk,
        score: m.score,
    })
}

/// The shared scoring core: filter malformed matches, sort descending,
/// truncate to the top K, report the best score.
pub fn rank_matches(matches: &[VectorMatch]) -> RetrievalOutcome {
    let mut contexts: Vec<RetrievalContext> =
        matches.iter().filter_map(context_from_match).collect();

    contexts.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    contexts.truncate(RAG_TOP_K);

    let best_score = contexts.first().map(|c| c.score).unwrap_or(0.0);
    RetrievalOutcome {
        contexts,
        best_score,
    }
}

/// Primary retrieval: a hard failure propagates to the caller.
pub async fn query_primary(
    index: &dyn VectorIndex,
    vector: &[f64],
) -> Result<RetrievalOutcome, ProviderError> {
    let matches = index.query(vector, RAG_TOP_K, true).await?;
    Ok(rank_matches(&matches))
}

/// Tool-augmenting retrieval: failures degrade to an empty context set.
pub async fn query_augmenting(index: &dyn VectorIndex, vector: &[f64]) -> RetrievalOutcome {
    match index.query(vector, RAG_TOP_K, true).await {
        Ok(matches) => rank_matches(&matches),
        Err(err) => {
            tracing::warn!(error = %err, "augmenting retrieval failed; continuing without it");
            RetrievalOutcome::default()
        }
    }
}

// --- Fallback corpus ---

struct FallbackDoc {
    url: &'static str,
    title: &'static str,
    body: &'static str,
}

/// Static product documentation consulted when the index returns nothing at
/// all (e.g. right after a deploy, before reindexing finishes).
const FALLBACK_DOCS: &[FallbackDoc] = &[
    FallbackDoc {
        url: "https://fokus.uz/help/focus-sessions",
        title: "Focus sessions",
        body: "A focus session is a timed block of deep work. Pick a task, choose a length \
               between 15 and 90 minutes, and start the timer from the dashboard. Finishing \
               a session logs focus minutes and feeds your streak.",
    },
    FallbackDoc {
        url: "https://fokus.uz/help/streaks",
        title: "Streaks",
        body: "Your streak grows by one for every day with at least one completed focus \
               session. Missing a day resets the current streak; your best streak is kept \
               forever on your profile.",
    },
    FallbackDoc {
        url: "https://fokus.uz/help/tasks",
        title: "Tasks",
        body: "Tasks live on the dashboard. Each task has a title, a status and an optional \
               due date. Link a task to a focus session to track time spent on it.",
    },
    FallbackDoc {
        url: "https://fokus.uz/help/mentors",
        title: "Mentor bookings",
        body: "You can book a one-on-one call with a mentor from the booking calendar. \
               Confirmed bookings appear on your dashboard and the assistant can tell you \
               when your next booking starts.",
    },
    FallbackDoc {
        url: "https://fokus.uz/help/leaderboard",
        title: "Leaderboard",
        body: "The leaderboard ranks active members by points. You earn points for completed \
               focus sessions, finished tasks and keeping your streak alive.",
    },
    FallbackDoc {
        url: "https://fokus.uz/help/live-rooms",
        title: "Live rooms",
        body: "Live rooms are group focus sessions with video. Join a live or upcoming room \
               from the schedule and work alongside other members in silence.",
    },
];

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '\'' {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Deterministic bag-of-words embedding: each token hashes to a signed
/// bucket, the vector is L2-normalized. Good enough to score the handful of
/// fallback docs with the same threshold logic as real retrieval.
pub fn hashing_embedding(text: &str, dimensions: usize) -> Vec<f64> {
    let mut vec = vec![0.0_f64; dimensions];
    if dimensions == 0 {
        return vec;
    }

    let tokens = tokenize(text);
    if tokens.is_empty() {
        return vec;
    }

    let mut counts: HashMap<String, u32> = HashMap::new();
    for token in tokens {
        *counts.entry(token).or_insert(0) += 1;
    }

    for (token, count) in counts {
        let digest = Sha256::digest(token.as_bytes());
        let bucket =
            u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize % dimensions;
        let sign = if digest[4] % 2 == 0 { 1.0 } else { -1.0 };
        vec[bucket] += sign * f64::from(count);
    }

    let norm = vec.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for value in &mut vec {
            *value /= norm;
        }
    }

    vec
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Score the fallback corpus against the raw question text. Returns the same
/// outcome shape as real retrieval so the confidence rule applies unchanged.
pub fn fallback_search(question: &str) -> RetrievalOutcome {
    let query = hashing_embedding(question, FALLBACK_DIMENSIONS);

    let matches: Vec<VectorMatch> = FALLBACK_DOCS
        .iter()
        .map(|doc| {
            let doc_vector =
                hashing_embedding(&format!("{} {}", doc.title, doc.body), FALLBACK_DIMENSIONS);
            VectorMatch {
                score: cosine_similarity(&query, &doc_vector),
                metadata: serde_json::json!({
                    "url": doc.url,
                    "title": doc.title,
                    "chunk": doc.body,
                    "chunkIndex": 0,
                }),
            }
        })
        .collect();

    rank_matches(&matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector_match(score: f64, url: &str, chunk: &str) -> VectorMatch {
        VectorMatch {
            score,
            metadata: serde_json::json!({
                "url": url,
                "title": "Doc",
                "chunk": chunk,
                "chunkIndex": 2,
            }),
        }
    }

    #[test]
    fn rank_matches_sorts_descending_and_reports_best() {
        let matches = vec![
            vector_match(0.4, "https://a", "a"),
            vector_match(0.5, "https://b", "b"),
            vector_match(0.2, "https://c", "c"),
        ];
        let outcome = rank_matches(&matches);
        assert_eq!(outcome.best_score, 0.5);
        assert!(outcome.is_confident());
        let scores: Vec<f64> = outcome.contexts.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.5, 0.4, 0.2]);
    }

    #[test]
    fn rank_matches_truncates_to_top_k() {
        let matches: Vec<VectorMatch> = (0..8)
            .map(|i| vector_match(0.9 - i as f64 * 0.05, "https://d", "chunk"))
            .collect();
        let outcome = rank_matches(&matches);
        assert_eq!(outcome.contexts.len(), RAG_TOP_K);
    }

    #[test]
    fn low_scores_are_not_confident() {
        let matches = vec![
            vector_match(0.2, "https://a", "a"),
            vector_match(0.1, "https://b", "b"),
        ];
        let outcome = rank_matches(&matches);
        assert_eq!(outcome.best_score, 0.2);
        assert!(!outcome.is_confident());
    }

    #[test]
    fn malformed_matches_are_dropped() {
        let matches = vec![
            VectorMatch {
                score: 0.9,
                metadata: serde_json::json!({"title": "no url or chunk"}),
            },
            VectorMatch {
                score: 0.8,
                metadata: serde_json::Value::Null,
            },
            vector_match(0.4, "https://ok", "kept"),
        ];
        let outcome = rank_matches(&matches);
        assert_eq!(outcome.contexts.len(), 1);
        assert_eq!(outcome.best_score, 0.4);
    }

    #[test]
    fn empty_result_set_scores_zero() {
        let outcome = rank_matches(&[]);
        assert_eq!(outcome.best_score, 0.0);
        assert!(!outcome.is_confident());
    }

    #[test]
    fn hashing_embedding_is_deterministic_and_normalized() {
        let a = hashing_embedding("focus session streak", 64);
        let b = hashing_embedding("focus session streak", 64);
        assert_eq!(a, b);

        let norm = a.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_handles_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn fallback_search_finds_streak_doc_for_streak_question() {
        let outcome =
            fallback_search("how does my streak grow and what happens when missing a day");
        assert!(!outcome.contexts.is_empty());
        assert_eq!(outcome.contexts[0].url, "https://fokus.uz/help/streaks");
    }

    #[test]
    fn fallback_search_is_unconfident_for_unrelated_questions() {
        let outcome = fallback_search("quantum entanglement in superconductors");
        assert!(!outcome.is_confident());
    }
}
