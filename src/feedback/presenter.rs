//! Display model for analysis results and errors.
//!
//! Everything here is a pure function of its input: the same result always
//! yields the same presentation, and nothing derived is stored back.

use anyhow::anyhow;

use super::model::{FeedbackResult, Medal};
use crate::errors::{FeedbackError, NextAction};

/// Encouragement level of the feedback message, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageTier {
    Encouragement,
    Good,
    Great,
    Perfect,
}

/// Minimum scores for the three upper tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierThresholds {
    top: u8,
    second: u8,
    third: u8,
}

impl TierThresholds {
    /// # Errors
    /// - If any threshold exceeds 100
    /// - If the thresholds are not non-increasing
    pub fn new(top: u8, second: u8, third: u8) -> anyhow::Result<Self> {
        if top > 100 {
            return Err(anyhow!("presenter.top must be at most 100, got {top}"));
        }
        if !(top >= second && second >= third) {
            return Err(anyhow!(
                "presenter thresholds must satisfy top >= second >= third (got {top}/{second}/{third})"
            ));
        }
        Ok(Self { top, second, third })
    }

    pub fn tier_for(&self, score: u8, medal: Option<Medal>) -> MessageTier {
        if score >= self.top || medal == Some(Medal::Gold) {
            MessageTier::Perfect
        } else if score >= self.second || medal == Some(Medal::Silver) {
            MessageTier::Great
        } else if score >= self.third {
            MessageTier::Good
        } else {
            MessageTier::Encouragement
        }
    }
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            top: 90,
            second: 75,
            third: 60,
        }
    }
}

/// A named sub-score that the backend actually reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubScore {
    pub label: &'static str,
    pub value: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presentation {
    pub score: u8,
    pub tier: MessageTier,
    pub message: &'static str,
    pub icon: &'static str,
    pub medal_badge: Option<String>,
    pub sub_scores: Vec<SubScore>,
    pub feedback_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPresentation {
    pub message: String,
    pub next_action: NextAction,
    pub action_hint: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackPresenter {
    thresholds: TierThresholds,
}

impl FeedbackPresenter {
    pub fn new(thresholds: TierThresholds) -> Self {
        Self { thresholds }
    }

    pub fn present(&self, result: &FeedbackResult) -> Presentation {
        let tier = self.thresholds.tier_for(result.score, result.medal);
        let (icon, message) = tier_text(tier);

        let sub_scores = [
            ("Accuracy", result.accuracy),
            ("Fluency", result.fluency),
            ("Completeness", result.completeness),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.map(|value| SubScore { label, value }))
        .collect();

        Presentation {
            score: result.score,
            tier,
            message,
            icon,
            medal_badge: result.medal.map(medal_badge),
            sub_scores,
            feedback_text: result.feedback_text.clone(),
        }
    }

    pub fn present_error(&self, error: &FeedbackError) -> ErrorPresentation {
        let next_action = error.next_action();
        ErrorPresentation {
            message: error.user_message(),
            next_action,
            action_hint: match next_action {
                NextAction::ReRecord => "Press r to record again",
                NextAction::RetryLater => "Press r to try again, or q to quit",
                NextAction::Dismiss => "Press q to close",
            },
        }
    }
}

fn tier_text(tier: MessageTier) -> (&'static str, &'static str) {
    match tier {
        MessageTier::Perfect => ("🌟", "Wow! That was perfect!"),
        MessageTier::Great => ("👍", "Great job! A little more practice and it will be perfect!"),
        MessageTier::Good => ("😊", "Nice! Try saying it once more, slowly and clearly."),
        MessageTier::Encouragement => ("💪", "That's okay! Follow along slowly and try again."),
    }
}

fn medal_badge(medal: Medal) -> String {
    let emoji = match medal {
        Medal::Gold => "🥇",
        Medal::Silver => "🥈",
        Medal::Bronze => "🥉",
    };
    format!("{emoji} {medal}")
}
