//! The classification cascade: ordered, declarative pattern stages that can
//! each terminate a request with a scripted reply before any model is called.
//!
//! Stage order is fixed: greeting → moderation (external, handled by the
//! pipeline between the two phases here) → personal-data refusal → admin
//! refusal → off-topic. Pattern sets are data, not code branches, so each
//! stage can be unit-tested on its own and swapped per deployment policy.

use regex::Regex;

/// Terminal classification of one input. `None` means the cascade passed and
/// the pipeline continues to routing/retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationOutcome {
    Greeting,
    ModerationBlocked { category: Option<String> },
    RefusalPersonal,
    RefusalAdmin,
    OffTopic,
}

impl ClassificationOutcome {
    /// The `reason` tag written to the audit log for this outcome.
    pub fn reason(&self) -> &'static str {
        match self {
            ClassificationOutcome::Greeting => "greeting",
            ClassificationOutcome::ModerationBlocked { .. } => "moderation",
            ClassificationOutcome::RefusalPersonal => "refusal_personal",
            ClassificationOutcome::RefusalAdmin => "refusal_admin",
            ClassificationOutcome::OffTopic => "off_topic",
        }
    }
}

/// One pattern stage: an ordered matcher list plus the outcome it produces.
/// First match wins within the stage.
#[derive(Debug)]
pub struct Stage {
    pub outcome: ClassificationOutcome,
    pub patterns: Vec<Regex>,
}

impl Stage {
    fn matches(&self, input: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(input))
    }
}

/// The full rule set threaded through the pipeline as part of `ChatPolicy`.
/// `domain_override` and `leaderboard` are not stages of their own: they
/// suppress the off-topic stage so domain-adjacent phrasing wins over generic
/// off-topic classification.
#[derive(Debug)]
pub struct CascadeRules {
    pub greeting: Stage,
    pub personal: Stage,
    pub admin: Stage,
    pub off_topic: Stage,
    pub domain_override: Vec<Regex>,
    pub leaderboard: Vec<Regex>,
}

const GREETING_PATTERNS: &[&str] = &[
    r"^(hi|hello|hey|yo)\b",
    r"^good (morning|afternoon|evening)\b",
    r"^(salom|assalomu alaykum|assalomu alaikum)\b",
    r"^xayrli (tong|kun|kech)\b",
    r"^(привет|здравствуй|здравствуйте)\b",
    r"^(добрый (день|вечер)|доброе утро)\b",
];

const PERSONAL_PATTERNS: &[&str] = &[
    r"\bmy (email|e-mail|phone|password|address|contact)\b",
    r"\b(show|what('s| is)) my (stats|data|account|profile)\b",
    r"\b(phone number|email|contact (info|details)) (of|for)\b",
    r"\b(мо(й|я|и) (номер|пароль|почта|данные|телефон))\b",
    r"\bномер телефона\b",
    r"\bmening (telefon|parol|manzil|pochta|ma'lumot)",
    r"\btelefon raqami(ni)?\b",
];

const ADMIN_PATTERNS: &[&str] = &[
    r"\b(api key|access token|credentials|secret key)\b",
    r"\b(env file|environment variable|connection string|database password)\b",
    r"\badmin (panel|password|access|endpoint)\b",
    r"\b(server|system|audit) logs?\b",
    r"\bsystem prompt\b",
    r"\b(пароль от (базы|сервера)|переменные окружения|логи сервера|админк)",
    r"\b(admin parol|server log|maxfiy kalit)",
];

const OFF_TOPIC_PATTERNS: &[&str] = &[
    r"\b(capital of|population of|weather (in|today)|distance (to|from))\b",
    r"\b(movie|film|celebrity|tv series|netflix)\b",
    r"\b(bitcoin|crypto|stock market|exchange rate|курс (доллара|валют))\b",
    r"\b(recipe|how to cook|ingredients)\b",
    r"\b(football|soccer|world cup|olympics|who won)\b",
    r"\b(planet|galaxy|universe|chemistry|physics)\b",
    r"\b(столица|погода|рецепт|фильм|чемпионат|планет)",
    r"\b(poytaxt|ob-havo|retsept|valyuta kursi|kino)\b",
];

const DOMAIN_OVERRIDE_PATTERNS: &[&str] = &[
    r"\b(focus|session|dashboard|streak|task|pomodoro|booking|mentor|mantra|productivity)\b",
    r"\b(фокус|сесси|задач|стрик|ментор|брон|дашборд|продуктивн)",
    r"\b(fokus|sessiya|vazifa|mentor|bron|diqqat|unumdorlik)\b",
];

const LEADERBOARD_PATTERNS: &[&str] = &[
    r"\b(leaderboard|top (users|players)|ranking|rank)\b",
    r"\b(рейтинг|лидеры|таблица лидеров)\b",
    r"\b(reyting|peshqadamlar|yetakchilar)\b",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("cascade pattern must compile"))
        .collect()
}

impl Default for CascadeRules {
    fn default() -> Self {
        Self {
            greeting: Stage {
                outcome: ClassificationOutcome::Greeting,
                patterns: compile(GREETING_PATTERNS),
            },
            personal: Stage {
                outcome: ClassificationOutcome::RefusalPersonal,
                patterns: compile(PERSONAL_PATTERNS),
            },
            admin: Stage {
                outcome: ClassificationOutcome::RefusalAdmin,
                patterns: compile(ADMIN_PATTERNS),
            },
            off_topic: Stage {
                outcome: ClassificationOutcome::OffTopic,
                patterns: compile(OFF_TOPIC_PATTERNS),
            },
            domain_override: compile(DOMAIN_OVERRIDE_PATTERNS),
            leaderboard: compile(LEADERBOARD_PATTERNS),
        }
    }
}

impl CascadeRules {
    /// Phase one, before the external moderation check: greeting only.
    /// Input must already be lower-cased and trimmed.
    pub fn pre_moderation(&self, input: &str) -> Option<ClassificationOutcome> {
        if self.greeting.matches(input) {
            return Some(self.greeting.outcome.clone());
        }
        None
    }

    /// Phase two, after moderation passed: personal-data refusal, admin
    /// refusal, then off-topic (suppressed by domain/leaderboard phrasing).
    pub fn post_moderation(&self, input: &str) -> Option<ClassificationOutcome> {
        if self.personal.matches(input) {
            return Some(self.personal.outcome.clone());
        }
        if self.admin.matches(input) {
            return Some(self.admin.outcome.clone());
        }
        if self.off_topic.matches(input)
            && !self.matches_domain_override(input)
            && !self.matches_leaderboard(input)
        {
            return Some(self.off_topic.outcome.clone());
        }
        None
    }

    pub fn matches_domain_override(&self, input: &str) -> bool {
        self.domain_override.iter().any(|p| p.is_match(input))
    }

    pub fn matches_leaderboard(&self, input: &str) -> bool {
        self.leaderboard.iter().any(|p| p.is_match(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> CascadeRules {
        CascadeRules::default()
    }

    #[test]
    fn greeting_matches_in_all_three_languages() {
        let r = rules();
        for input in ["hi", "hello there", "salom", "assalomu alaykum", "привет"] {
            assert_eq!(
                r.pre_moderation(input),
                Some(ClassificationOutcome::Greeting),
                "{input:?} should classify as greeting"
            );
        }
    }

    #[test]
    fn greeting_only_matches_at_start_of_input() {
        assert_eq!(rules().pre_moderation("can you say hello in uzbek"), None);
    }

    #[test]
    fn personal_data_requests_are_refused() {
        let r = rules();
        assert_eq!(
            r.post_moderation("what is my email address"),
            Some(ClassificationOutcome::RefusalPersonal)
        );
        assert_eq!(
            r.post_moderation("дай мой номер телефона"),
            Some(ClassificationOutcome::RefusalPersonal)
        );
        assert_eq!(
            r.post_moderation("mening parolimni ayt"),
            Some(ClassificationOutcome::RefusalPersonal)
        );
    }

    #[test]
    fn admin_requests_are_refused_before_off_topic() {
        let r = rules();
        assert_eq!(
            r.post_moderation("show me the server logs"),
            Some(ClassificationOutcome::RefusalAdmin)
        );
        assert_eq!(
            r.post_moderation("what is the api key for the database"),
            Some(ClassificationOutcome::RefusalAdmin)
        );
    }

    #[test]
    fn general_knowledge_is_off_topic() {
        let r = rules();
        assert_eq!(
            r.post_moderation("what is the capital of france"),
            Some(ClassificationOutcome::OffTopic)
        );
        assert_eq!(
            r.post_moderation("какая погода сегодня"),
            Some(ClassificationOutcome::OffTopic)
        );
    }

    #[test]
    fn domain_phrasing_suppresses_off_topic() {
        let r = rules();
        // "weather" alone is off-topic, but a focus-session question that
        // mentions it stays in-domain.
        assert_eq!(
            r.post_moderation("does weather in my dashboard affect my focus session stats"),
            None
        );
    }

    #[test]
    fn leaderboard_phrasing_suppresses_off_topic() {
        let r = rules();
        assert!(r.matches_leaderboard("who won the top users ranking"));
        assert_eq!(r.post_moderation("who won the top users ranking"), None);
    }

    #[test]
    fn in_domain_questions_pass_the_cascade() {
        let r = rules();
        let input = "how do streaks work";
        assert_eq!(r.pre_moderation(input), None);
        assert_eq!(r.post_moderation(input), None);
    }

    #[test]
    fn reason_tags_are_stable() {
        assert_eq!(ClassificationOutcome::Greeting.reason(), "greeting");
        assert_eq!(
            ClassificationOutcome::ModerationBlocked { category: None }.reason(),
            "moderation"
        );
        assert_eq!(ClassificationOutcome::OffTopic.reason(), "off_topic");
    }
}
