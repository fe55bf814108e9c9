//! Long-term memory: load prior facts for generation and extract new ones
//! from the finished exchange in the background.
//!
//! Memory is best-effort in both directions. A load failure never blocks a
//! reply (the profile degrades to empty), and extraction runs on a spawned
//! task after the response has been sent.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use uuid::Uuid;

use fokus_core::chat::MemoryEntry;

use crate::providers::{MemoryProfile, MemoryStore};

/// At most this many facts are extracted from one exchange.
const MAX_ENTRIES_PER_TURN: usize = 3;
/// Extracted fact length cap; anything longer is a quote, not a fact.
const MAX_FACT_LEN: usize = 160;

struct FactPattern {
    regex: Regex,
    label: &'static str,
}

static FACT_PATTERNS: LazyLock<Vec<FactPattern>> = LazyLock::new(|| {
    let raw: &[(&str, &str)] = &[
        (r"(?i)\bmy name is ([\p{L}][\p{L}' -]{1,40})", "name"),
        (r"(?i)\bменя зовут ([\p{L}][\p{L}' -]{1,40})", "name"),
        (r"(?i)\bmening ismim ([\p{L}][\p{L}' -]{1,40})", "name"),
        (r"(?i)\bi (?:prefer|like) ([^.!?\n]{3,80})", "preference"),
        (r"(?i)\bя предпочитаю ([^.!?\n]{3,80})", "preference"),
        (r"(?i)\bmy goal is ([^.!?\n]{3,100})", "goal"),
        (r"(?i)\bмоя цель[ -]{1,3}([^.!?\n]{3,100})", "goal"),
        (r"(?i)\bmening maqsadim ([^.!?\n]{3,100})", "goal"),
    ];
    raw.iter()
        .map(|(pattern, label)| FactPattern {
            regex: Regex::new(pattern).expect("fact pattern must compile"),
            label,
        })
        .collect()
});

/// Pull durable first-person facts out of the user's message. Purely
/// heuristic; unmatched messages produce nothing.
pub fn extract_memory_entries(input: &str) -> Vec<MemoryEntry> {
    let mut entries = Vec::new();

    for pattern in FACT_PATTERNS.iter() {
        if entries.len() >= MAX_ENTRIES_PER_TURN {
            break;
        }
        if let Some(captures) = pattern.regex.captures(input) {
            if let Some(value) = captures.get(1) {
                let value = value.as_str().trim().trim_end_matches(['.', ',']);
                if value.is_empty() {
                    continue;
                }
                let fact = format!("{}: {}", pattern.label, value);
                if fact.len() > MAX_FACT_LEN {
                    continue;
                }
                if entries
                    .iter()
                    .any(|e: &MemoryEntry| e.fact.eq_ignore_ascii_case(&fact))
                {
                    continue;
                }
                entries.push(MemoryEntry {
                    fact,
                    created_at: None,
                });
            }
        }
    }

    entries
}

/// Load the viewer's memory profile. Failures degrade to an enabled, empty
/// profile so generation proceeds without personalization.
pub async fn load_memory(store: &dyn MemoryStore, user_id: Uuid) -> MemoryProfile {
    match store.profile(user_id).await {
        Ok(profile) => profile,
        Err(err) => {
            tracing::warn!(error = %err, %user_id, "memory load failed; continuing without it");
            MemoryProfile {
                enabled: true,
                entries: Vec::new(),
            }
        }
    }
}

/// Kick off background fact extraction for a finished exchange. Does nothing
/// when the user has memory disabled or the message yields no facts.
pub fn spawn_extraction(
    store: Arc<dyn MemoryStore>,
    user_id: Uuid,
    memory_enabled: bool,
    input: String,
) {
    if !memory_enabled {
        return;
    }
    let entries = extract_memory_entries(&input);
    if entries.is_empty() {
        return;
    }

    tokio::spawn(async move {
        if let Err(err) = store.append(user_id, &entries).await {
            tracing::warn!(error = %err, %user_id, "memory extraction write failed");
        }
    });
}
