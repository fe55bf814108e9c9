//! Heuristic language detection for the three languages the platform serves.
//!
//! This is a pure function — no model call. It only has to be good enough to
//! pick scripted replies and steer the generator; when the signal is weak it
//! must fall back to English deterministically so repeated requests with the
//! same input always detect the same language.

use fokus_core::chat::Language;

/// Uzbek Cyrillic has letters Russian lacks.
const UZBEK_CYRILLIC_MARKERS: &[char] = &['ў', 'қ', 'ғ', 'ҳ', 'Ў', 'Қ', 'Ғ', 'Ҳ'];

/// High-frequency Uzbek Latin words and digraph fragments.
const UZBEK_LATIN_MARKERS: &[&str] = &[
    "salom", "assalomu", "qanday", "nima", "menga", "mening", "bugun", "uchun", "qilish", "kerak",
    "bo'l", "o'z", "g'", "yordam", "vazifa", "sessiya", "xayrli",
];

const ENGLISH_MARKERS: &[&str] = &[
    "the", "what", "how", "is", "are", "my", "can", "do", "you", "today", "help", "when", "where",
    "show", "me",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedLanguage {
    pub language: Language,
    /// Rough share of tokens/characters that voted for the winner, in [0, 1].
    pub confidence: f64,
}

/// Detect the input's language. Consulted once per request; the result threads
/// through every scripted reply and the generator call.
pub fn detect_language(text: &str) -> DetectedLanguage {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return DetectedLanguage {
            language: Language::English,
            confidence: 0.0,
        };
    }

    let letters: Vec<char> = trimmed.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return DetectedLanguage {
            language: Language::English,
            confidence: 0.0,
        };
    }

    let cyrillic = letters
        .iter()
        .filter(|c| ('\u{0400}'..='\u{04FF}').contains(*c))
        .count();
    let cyrillic_ratio = cyrillic as f64 / letters.len() as f64;

    if cyrillic_ratio >= 0.3 {
        // Cyrillic script: Uzbek only if its distinctive letters appear.
        let uzbek_hits = letters
            .iter()
            .filter(|c| UZBEK_CYRILLIC_MARKERS.contains(c))
            .count();
        let language = if uzbek_hits > 0 {
            Language::Uzbek
        } else {
            Language::Russian
        };
        return DetectedLanguage {
            language,
            confidence: cyrillic_ratio,
        };
    }

    let lowered = trimmed.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return DetectedLanguage {
            language: Language::English,
            confidence: 0.0,
        };
    }

    let uzbek_votes = tokens
        .iter()
        .filter(|t| {
            UZBEK_LATIN_MARKERS
                .iter()
                .any(|m| **t == *m || t.starts_with(m))
        })
        .count();
    let english_votes = tokens
        .iter()
        .filter(|t| ENGLISH_MARKERS.contains(&**t))
        .count();

    // Uzbek wins ties against English: its markers are rarer words, so a hit
    // carries more signal than common English function words.
    if uzbek_votes > 0 && uzbek_votes >= english_votes {
        return DetectedLanguage {
            language: Language::Uzbek,
            confidence: uzbek_votes as f64 / tokens.len() as f64,
        };
    }

    DetectedLanguage {
        language: Language::English,
        confidence: english_votes as f64 / tokens.len() as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_russian_from_cyrillic() {
        let d = detect_language("Как работает рейтинг?");
        assert_eq!(d.language, Language::Russian);
        assert!(d.confidence > 0.5);
    }

    #[test]
    fn detects_uzbek_cyrillic_by_distinct_letters() {
        let d = detect_language("Менинг вазифаларим қандай?");
        assert_eq!(d.language, Language::Uzbek);
    }

    #[test]
    fn detects_uzbek_latin_by_markers() {
        let d = detect_language("Salom, bugun menga qanday yordam bera olasiz?");
        assert_eq!(d.language, Language::Uzbek);
    }

    #[test]
    fn detects_english() {
        let d = detect_language("How do I book a mentor session?");
        assert_eq!(d.language, Language::English);
    }

    #[test]
    fn ambiguous_input_falls_back_to_english_deterministically() {
        let first = detect_language("xyz 123 !!!");
        let second = detect_language("xyz 123 !!!");
        assert_eq!(first.language, Language::English);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_input_is_english_with_zero_confidence() {
        let d = detect_language("   ");
        assert_eq!(d.language, Language::English);
        assert_eq!(d.confidence, 0.0);
    }
}
