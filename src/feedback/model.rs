//! Pronunciation feedback data model.
//!
//! [`RawFeedback`] mirrors whatever the backend sends; [`FeedbackResult`] is the
//! single normalized shape the rest of the crate works with.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::FeedbackError;

/// Medal tier awarded by the backend. Ordered `Bronze < Silver < Gold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Medal {
    Bronze,
    Silver,
    Gold,
}

impl FromStr for Medal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GOLD" => Ok(Medal::Gold),
            "SILVER" => Ok(Medal::Silver),
            "BRONZE" => Ok(Medal::Bronze),
            other => Err(format!("unknown medal '{other}'")),
        }
    }
}

impl fmt::Display for Medal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Medal::Gold => write!(f, "GOLD"),
            Medal::Silver => write!(f, "SILVER"),
            Medal::Bronze => write!(f, "BRONZE"),
        }
    }
}

/// Normalized analysis result. All scores are rounded integers in 0-100.
///
/// Sub-scores and medal are optional; absent means the backend did not
/// report them, not zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackResult {
    pub score: u8,
    #[serde(default)]
    pub accuracy: Option<u8>,
    #[serde(default)]
    pub fluency: Option<u8>,
    #[serde(default)]
    pub completeness: Option<u8>,
    #[serde(default)]
    pub medal: Option<Medal>,
    #[serde(default)]
    pub feedback_text: Option<String>,
    #[serde(default)]
    pub feedback_date: Option<String>,
}

impl FeedbackResult {
    pub fn new(score: u8) -> Self {
        Self {
            score: score.min(100),
            accuracy: None,
            fluency: None,
            completeness: None,
            medal: None,
            feedback_text: None,
            feedback_date: None,
        }
    }
}

/// Analysis response as sent by the backend.
///
/// Older endpoints send `score`, newer ones `finalScore`; `finalScore` wins
/// when both are present. Number fields may arrive as floats.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFeedback {
    #[serde(default)]
    pub final_score: Option<f64>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default, alias = "accuracyScore")]
    pub accuracy: Option<f64>,
    #[serde(default, alias = "fluencyScore")]
    pub fluency: Option<f64>,
    #[serde(default, alias = "completenessScore")]
    pub completeness: Option<f64>,
    #[serde(default)]
    pub medal: Option<String>,
    #[serde(default)]
    pub feedback_text: Option<String>,
    #[serde(default)]
    pub feedback_date: Option<serde_json::Value>,
}

impl RawFeedback {
    /// Converts a backend response into a [`FeedbackResult`].
    ///
    /// # Errors
    /// - `AnalysisFailure` if the response carries no usable score
    pub fn normalize(self) -> Result<FeedbackResult, FeedbackError> {
        let score = self
            .final_score
            .or(self.score)
            .and_then(to_percent)
            .ok_or_else(|| FeedbackError::AnalysisFailure {
                detail: "response did not contain a score".to_string(),
            })?;

        let medal = match self.medal.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => match raw.parse::<Medal>() {
                Ok(medal) => Some(medal),
                Err(e) => {
                    tracing::warn!("Ignoring medal from backend: {}", e);
                    None
                }
            },
        };

        Ok(FeedbackResult {
            score,
            accuracy: self.accuracy.and_then(to_percent),
            fluency: self.fluency.and_then(to_percent),
            completeness: self.completeness.and_then(to_percent),
            medal,
            feedback_text: self.feedback_text.filter(|t| !t.trim().is_empty()),
            feedback_date: self.feedback_date.and_then(date_to_string),
        })
    }
}

fn to_percent(value: f64) -> Option<u8> {
    if value.is_finite() {
        Some(value.round().clamp(0.0, 100.0) as u8)
    } else {
        None
    }
}

/// Timestamps arrive either as ISO strings or as `[y, m, d, h, min, s]` arrays.
fn date_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        serde_json::Value::Array(parts) => {
            let nums: Vec<i64> = parts.iter().filter_map(|p| p.as_i64()).collect();
            match nums.as_slice() {
                [y, mo, d, h, mi, s, ..] => {
                    Some(format!("{y:04}-{mo:02}-{d:02}T{h:02}:{mi:02}:{s:02}"))
                }
                [y, mo, d, h, mi] => Some(format!("{y:04}-{mo:02}-{d:02}T{h:02}:{mi:02}:00")),
                [y, mo, d] => Some(format!("{y:04}-{mo:02}-{d:02}")),
                _ => None,
            }
        }
        _ => None,
    }
}
