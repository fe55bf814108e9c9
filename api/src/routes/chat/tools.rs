//! Tool execution: run the routed data call and render its result as a
//! context passage the generator can quote.
//!
//! Rendering is deliberately plain text with stable formats. The generator
//! receives tool output as the first context, marked with a `tool://` url so
//! provenance survives into the audit log.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use fokus_core::chat::{Language, RetrievalContext};

use crate::providers::{LeaderboardRow, ProviderError, ToolData};
use crate::routes::chat::intent::ToolName;

/// Leaderboard rows fetched for both the tool context and the shortcut reply.
pub const LEADERBOARD_LIMIT: i64 = 10;

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Localized sentence for a tool that routed correctly but has no data to
/// show (no mantra scheduled, empty task list, no upcoming booking).
pub fn unavailable_text(tool: ToolName, language: Language) -> &'static str {
    use Language::*;
    use ToolName::*;

    match (tool, language) {
        (MantraToday, English) => "There is no mantra scheduled for today.",
        (MantraToday, Russian) => "На сегодня мантра не запланирована.",
        (MantraToday, Uzbek) => "Bugun uchun mantra belgilanmagan.",

        (LiveSessions, English) => "There are no live or upcoming group sessions right now.",
        (LiveSessions, Russian) => "Сейчас нет идущих или ближайших групповых сессий.",
        (LiveSessions, Uzbek) => "Hozircha jonli yoki yaqin guruh sessiyalari yo'q.",

        (Leaderboard, English) => "The leaderboard is empty at the moment.",
        (Leaderboard, Russian) => "Таблица лидеров пока пуста.",
        (Leaderboard, Uzbek) => "Peshqadamlar jadvali hozircha bo'sh.",

        (MyTasks, English) => "You have no open tasks right now.",
        (MyTasks, Russian) => "У вас сейчас нет открытых задач.",
        (MyTasks, Uzbek) => "Hozirda ochiq vazifalaringiz yo'q.",

        (MyStreak, English) => "You don't have a streak yet. Finish a focus session to start one.",
        (MyStreak, Russian) => {
            "У вас пока нет стрика. Завершите фокус-сессию, чтобы начать его."
        }
        (MyStreak, Uzbek) => {
            "Sizda hali strik yo'q. Boshlash uchun bitta fokus-sessiyani yakunlang."
        }

        (MyWeek, English) => "There is no activity recorded for your week yet.",
        (MyWeek, Russian) => "За эту неделю активности пока не записано.",
        (MyWeek, Uzbek) => "Bu hafta uchun hali faollik qayd etilmagan.",

        (NextBooking, English) => "You have no upcoming mentor bookings.",
        (NextBooking, Russian) => "У вас нет предстоящих броней с ментором.",
        (NextBooking, Uzbek) => "Sizda mentor bilan yaqin bronlar yo'q.",
    }
}

fn render_leaderboard_rows(rows: &[LeaderboardRow]) -> String {
    let mut out = String::from("Leaderboard:");
    for row in rows {
        out.push_str(&format!(
            "\n{}. {} — {} pts",
            row.rank, row.display_name, row.points
        ));
    }
    out
}

/// Leaderboard shortcut reply: sent to the user verbatim, no generation.
pub fn render_leaderboard_reply(rows: &[LeaderboardRow], language: Language) -> String {
    if rows.is_empty() {
        return unavailable_text(ToolName::Leaderboard, language).to_string();
    }

    let header = match language {
        Language::English => "Top members this week:",
        Language::Russian => "Лучшие участники этой недели:",
        Language::Uzbek => "Bu haftaning eng yaxshi a'zolari:",
    };
    let mut out = String::from(header);
    for row in rows {
        out.push_str(&format!(
            "\n{}. {} — {} pts",
            row.rank, row.display_name, row.points
        ));
    }
    out
}

/// Run the routed tool and render its data. `user_id` must be present for the
/// personal tools; the pipeline enforces that before calling.
pub async fn execute(
    data: &dyn ToolData,
    tool: ToolName,
    user_id: Option<Uuid>,
    language: Language,
) -> Result<String, ProviderError> {
    let rendered = match tool {
        ToolName::MantraToday => match data.mantra_today().await? {
            Some(mantra) => match mantra.author {
                Some(author) => format!("Today's mantra: \"{}\" ({})", mantra.text, author),
                None => format!("Today's mantra: \"{}\"", mantra.text),
            },
            None => unavailable_text(tool, language).to_string(),
        },
        ToolName::LiveSessions => {
            let sessions = data.live_sessions().await?;
            if sessions.is_empty() {
                unavailable_text(tool, language).to_string()
            } else {
                let mut out = String::from("Live and upcoming sessions:");
                for session in &sessions {
                    out.push_str(&format!(
                        "\n- {} [{}] starts {}",
                        session.title,
                        session.status,
                        format_ts(session.starts_at)
                    ));
                }
                out
            }
        }
        ToolName::Leaderboard => {
            let rows = data.leaderboard(LEADERBOARD_LIMIT).await?;
            if rows.is_empty() {
                unavailable_text(tool, language).to_string()
            } else {
                render_leaderboard_rows(&rows)
            }
        }
        ToolName::MyTasks => {
            let user_id = require_user(user_id)?;
            let tasks = data.tasks_for(user_id).await?;
            if tasks.is_empty() {
                unavailable_text(tool, language).to_string()
            } else {
                let mut out = format!("Tasks for {}:", Utc::now().format("%Y-%m-%d"));
                for task in &tasks {
                    out.push_str(&format!("\n- {} [{}]", task.title, task.status));
                    if let Some(due) = task.due {
                        out.push_str(&format!(" | due: {due}"));
                    }
                }
                out
            }
        }
        ToolName::MyStreak => {
            let user_id = require_user(user_id)?;
            match data.streak_for(user_id).await? {
                Some(streak) if streak.current_days > 0 || streak.best_days > 0 => format!(
                    "Current streak: {} days. Best streak: {} days.",
                    streak.current_days, streak.best_days
                ),
                _ => unavailable_text(tool, language).to_string(),
            }
        }
        ToolName::MyWeek => {
            let user_id = require_user(user_id)?;
            match data.week_summary_for(user_id).await? {
                Some(week)
                    if week.focus_minutes > 0 || week.sessions_done > 0 || week.tasks_done > 0 =>
                {
                    format!(
                        "This week: {} focus minutes across {} sessions, {} tasks completed.",
                        week.focus_minutes, week.sessions_done, week.tasks_done
                    )
                }
                _ => unavailable_text(tool, language).to_string(),
            }
        }
        ToolName::NextBooking => {
            let user_id = require_user(user_id)?;
            match data.next_booking_for(user_id).await? {
                Some(booking) => format!(
                    "Next booking: mentor {} at {}.",
                    booking.mentor,
                    format_ts(booking.starts_at)
                ),
                None => unavailable_text(tool, language).to_string(),
            }
        }
    };

    Ok(rendered)
}

fn require_user(user_id: Option<Uuid>) -> Result<Uuid, ProviderError> {
    user_id.ok_or_else(|| {
        ProviderError::Malformed("personal tool executed without an authenticated user".to_string())
    })
}

/// Wrap rendered tool output as the highest-priority context passage.
pub fn tool_context(tool: ToolName, rendered: String) -> RetrievalContext {
    RetrievalContext {
        url: format!("tool://{}", tool.as_str()),
        title: tool.as_str().to_string(),
        chunk: rendered,
        chunk_index: 0,
        indexed_at: None,
        score: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::providers::{
        BookingRow, LiveSessionRow, MantraRow, StreakRow, TaskRow, WeekSummaryRow,
    };

    #[derive(Default)]
    struct FakeToolData {
        mantra: Option<MantraRow>,
        sessions: Vec<LiveSessionRow>,
        leaderboard: Vec<LeaderboardRow>,
        tasks: Vec<TaskRow>,
        streak: Option<StreakRow>,
        week: Option<WeekSummaryRow>,
        booking: Option<BookingRow>,
    }

    #[async_trait]
    impl ToolData for FakeToolData {
        async fn mantra_today(&self) -> Result<Option<MantraRow>, ProviderError> {
            Ok(self.mantra.clone())
        }
        async fn live_sessions(&self) -> Result<Vec<LiveSessionRow>, ProviderError> {
            Ok(self.sessions.clone())
        }
        async fn leaderboard(&self, _limit: i64) -> Result<Vec<LeaderboardRow>, ProviderError> {
            Ok(self.leaderboard.clone())
        }
        async fn tasks_for(&self, _user_id: Uuid) -> Result<Vec<TaskRow>, ProviderError> {
            Ok(self.tasks.clone())
        }
        async fn streak_for(&self, _user_id: Uuid) -> Result<Option<StreakRow>, ProviderError> {
            Ok(self.streak.clone())
        }
        async fn week_summary_for(
            &self,
            _user_id: Uuid,
        ) -> Result<Option<WeekSummaryRow>, ProviderError> {
            Ok(self.week.clone())
        }
        async fn next_booking_for(
            &self,
            _user_id: Uuid,
        ) -> Result<Option<BookingRow>, ProviderError> {
            Ok(self.booking.clone())
        }
    }

    #[tokio::test]
    async fn mantra_renders_with_author() {
        let data = FakeToolData {
            mantra: Some(MantraRow {
                text: "One task at a time.".to_string(),
                author: Some("Fokus".to_string()),
            }),
            ..Default::default()
        };
        let rendered = execute(&data, ToolName::MantraToday, None, Language::English)
            .await
            .unwrap();
        assert_eq!(rendered, "Today's mantra: \"One task at a time.\" (Fokus)");
    }

    #[tokio::test]
    async fn empty_mantra_falls_back_to_localized_unavailable() {
        let data = FakeToolData::default();
        let rendered = execute(&data, ToolName::MantraToday, None, Language::Uzbek)
            .await
            .unwrap();
        assert_eq!(rendered, "Bugun uchun mantra belgilanmagan.");
    }

    #[tokio::test]
    async fn tasks_render_with_status_and_due() {
        let data = FakeToolData {
            tasks: vec![
                TaskRow {
                    title: "Write report".to_string(),
                    status: "open".to_string(),
                    due: chrono::NaiveDate::from_ymd_opt(2026, 9, 1),
                },
                TaskRow {
                    title: "Plan sprint".to_string(),
                    status: "in_progress".to_string(),
                    due: None,
                },
            ],
            ..Default::default()
        };
        let rendered = execute(&data, ToolName::MyTasks, Some(Uuid::now_v7()), Language::English)
            .await
            .unwrap();
        assert!(rendered.contains("- Write report [open] | due: 2026-09-01"));
        assert!(rendered.contains("- Plan sprint [in_progress]"));
    }

    #[tokio::test]
    async fn personal_tool_without_user_is_an_error() {
        let data = FakeToolData::default();
        let result = execute(&data, ToolName::MyStreak, None, Language::English).await;
        assert!(matches!(result, Err(ProviderError::Malformed(_))));
    }

    #[tokio::test]
    async fn streak_renders_current_and_best() {
        let data = FakeToolData {
            streak: Some(StreakRow {
                current_days: 6,
                best_days: 14,
            }),
            ..Default::default()
        };
        let rendered = execute(&data, ToolName::MyStreak, Some(Uuid::now_v7()), Language::English)
            .await
            .unwrap();
        assert_eq!(rendered, "Current streak: 6 days. Best streak: 14 days.");
    }

    #[tokio::test]
    async fn next_booking_renders_mentor_and_time() {
        let data = FakeToolData {
            booking: Some(BookingRow {
                mentor: "Dilnoza".to_string(),
                starts_at: Utc.with_ymd_and_hms(2026, 9, 2, 14, 0, 0).unwrap(),
            }),
            ..Default::default()
        };
        let rendered =
            execute(&data, ToolName::NextBooking, Some(Uuid::now_v7()), Language::English)
                .await
                .unwrap();
        assert_eq!(rendered, "Next booking: mentor Dilnoza at 2026-09-02 14:00 UTC.");
    }

    #[test]
    fn leaderboard_reply_is_localized_and_numbered() {
        let rows = vec![
            LeaderboardRow {
                rank: 1,
                display_name: "Aziza".to_string(),
                points: 320,
            },
            LeaderboardRow {
                rank: 2,
                display_name: "Timur".to_string(),
                points: 280,
            },
        ];
        let reply = render_leaderboard_reply(&rows, Language::Russian);
        assert!(reply.starts_with("Лучшие участники этой недели:"));
        assert!(reply.contains("1. Aziza — 320 pts"));
        assert!(reply.contains("2. Timur — 280 pts"));
    }

    #[test]
    fn empty_leaderboard_reply_uses_unavailable_text() {
        let reply = render_leaderboard_reply(&[], Language::English);
        assert_eq!(reply, "The leaderboard is empty at the moment.");
    }

    #[test]
    fn tool_context_carries_provenance() {
        let ctx = tool_context(ToolName::MyWeek, "This week: 120 focus minutes".to_string());
        assert_eq!(ctx.url, "tool://my_week");
        assert_eq!(ctx.score, 1.0);
        assert_eq!(ctx.chunk_index, 0);
    }
}
