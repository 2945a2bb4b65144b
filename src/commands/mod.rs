//! Application command handlers for storyvoice.
//!
//! # Commands
//! - `practice`: Read a sentence aloud and get pronunciation feedback (default)
//! - `analyze`: Upload a pre-recorded file for analysis
//! - `latest`: Fetch the latest stored feedback from the backend
//! - `feedback`: Create text-based feedback for a recording
//! - `history`: Print the local feedback history
//! - `config`: Open configuration file in user's preferred editor
//! - `list_devices`: List available audio input devices
//! - `logs`: Display recent log entries

pub mod analyze;
pub mod config;
pub mod feedback;
pub mod history;
pub mod latest;
pub mod list_devices;
pub mod logs;
pub mod practice;

pub use analyze::handle_analyze;
pub use config::handle_config;
pub use feedback::handle_feedback;
pub use history::handle_history;
pub use latest::handle_latest;
pub use list_devices::handle_list_devices;
pub use logs::handle_logs;
pub use practice::handle_practice;

use crate::config::PracticeConfig;
use crate::feedback::{FeedbackEntry, FeedbackPresenter, FeedbackResult};
use crate::recording::SessionContext;
use clap::Args;

/// Who is practicing which sentence. Unset values fall back to `[practice]` in the config.
#[derive(Args, Debug, Clone, Default)]
pub struct ContextArgs {
    /// User the feedback belongs to
    #[arg(long, value_name = "ID")]
    pub user_id: Option<i64>,

    /// Content (story) the sentence comes from
    #[arg(long, value_name = "ID")]
    pub content_id: Option<i64>,

    /// Script (sentence) within the content
    #[arg(long, value_name = "ID")]
    pub script_id: Option<i64>,

    /// Language code of the sentence, e.g. en-US
    #[arg(long, value_name = "CODE")]
    pub lang: Option<String>,
}

impl ContextArgs {
    /// Session context for these flags, with config defaults applied.
    pub fn resolve(&self, defaults: &PracticeConfig, sentence: Option<&str>) -> SessionContext {
        SessionContext {
            user_id: self.user_id.or(defaults.user_id),
            content_id: self.content_id,
            script_id: self.script_id,
            language: self.lang.clone().or_else(|| defaults.language.clone()),
            target_sentence: sentence.map(str::to_string),
        }
    }
}

/// Plain-text rendering of a result for stdout.
pub(crate) fn format_result(presenter: &FeedbackPresenter, result: &FeedbackResult) -> String {
    let presentation = presenter.present(result);
    let mut out = format!(
        "{} {}  {}",
        presentation.icon, presentation.score, presentation.message
    );
    if let Some(badge) = &presentation.medal_badge {
        out.push_str(&format!("\n{badge}"));
    }
    if !presentation.sub_scores.is_empty() {
        let subs: Vec<String> = presentation
            .sub_scores
            .iter()
            .map(|s| format!("{} {}", s.label, s.value))
            .collect();
        out.push_str(&format!("\n{}", subs.join("   ")));
    }
    if let Some(text) = &presentation.feedback_text {
        out.push_str(&format!("\n{text}"));
    }
    if let Some(date) = &result.feedback_date {
        out.push_str(&format!("\n({date})"));
    }
    out
}

/// One history line: time, triple, score and medal.
pub(crate) fn format_entry(entry: &FeedbackEntry) -> String {
    let medal = entry
        .result
        .medal
        .map(|m| format!(" {m}"))
        .unwrap_or_default();
    format!(
        "{}  user {} content {} script {}{}  {:>3}{}",
        entry.created_at.format("%Y-%m-%d %H:%M"),
        entry.key.user_id,
        entry.key.content_id,
        entry.key.script_id,
        entry
            .language
            .as_deref()
            .map(|l| format!(" [{l}]"))
            .unwrap_or_default(),
        entry.result.score,
        medal
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::Medal;

    #[test]
    fn flags_override_config_defaults() {
        let defaults = PracticeConfig {
            user_id: Some(1),
            language: Some("en-US".to_string()),
        };
        let args = ContextArgs {
            user_id: None,
            content_id: Some(7),
            script_id: Some(3),
            lang: Some("en-GB".to_string()),
        };
        let ctx = args.resolve(&defaults, Some("The cat sat."));
        assert_eq!(ctx.user_id, Some(1));
        assert_eq!(ctx.content_id, Some(7));
        assert_eq!(ctx.script_id, Some(3));
        assert_eq!(ctx.language.as_deref(), Some("en-GB"));
        assert_eq!(ctx.target_sentence.as_deref(), Some("The cat sat."));
    }

    #[test]
    fn result_text_includes_badge_and_feedback() {
        let mut result = FeedbackResult::new(92);
        result.medal = Some(Medal::Gold);
        result.feedback_text = Some("Lovely reading".to_string());
        let text = format_result(&FeedbackPresenter::default(), &result);
        assert!(text.contains("92"));
        assert!(text.contains("GOLD"));
        assert!(text.contains("Lovely reading"));
    }
}
