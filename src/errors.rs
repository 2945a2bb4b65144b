//! Client-observable error taxonomy for the practice workflow.
//!
//! Every failure that can reach the screen is normalized into a [`FeedbackError`]
//! before it leaves the capture or submission layer. The `Display` text of each
//! variant is the one pre-written message shown to the user; the detail fields are
//! only ever written to the log.

use thiserror::Error;

/// What the screen should offer after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Record the sentence again
    ReRecord,
    /// The service is unavailable right now; try again later
    RetryLater,
    /// Nothing the user can do from here
    Dismiss,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedbackError {
    #[error("Microphone access is required. Allow access to the microphone and try again.")]
    PermissionDenied { detail: String },

    #[error("No usable microphone was found. Check that one is connected and try again.")]
    Device { detail: String },

    #[error("That recording was too short. Press record and read the whole sentence.")]
    TooShort {
        bytes: usize,
        min_bytes: usize,
        millis: u64,
        min_millis: u64,
    },

    #[error("Some required information is missing ({field}).")]
    Validation { field: &'static str },

    #[error("This audio format is not supported. Use a webm or wav recording.")]
    UnsupportedFormat,

    #[error("We couldn't understand the recording. Please record it again.")]
    AnalysisFailure { detail: String },

    #[error("The pronunciation service is having trouble. Please try again in a moment.")]
    UpstreamServiceFailure,

    #[error("The analysis took too long. Please try again.")]
    Timeout,

    #[error("Could not reach the server. Check your network connection.")]
    NetworkFailure { detail: String },

    #[error("There is no pronunciation feedback for this sentence yet.")]
    NotFound,

    #[error("Something went wrong while analyzing your voice. Please try again.")]
    Failed { status: Option<u16>, detail: String },
}

impl FeedbackError {
    /// Maps a non-success HTTP status from the analysis backend to its category.
    ///
    /// Each status code produces exactly one category; the response body is kept
    /// only as log detail.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            400 => FeedbackError::Validation { field: "request" },
            404 => FeedbackError::NotFound,
            415 => FeedbackError::UnsupportedFormat,
            422 => FeedbackError::AnalysisFailure {
                detail: body.to_string(),
            },
            502 => FeedbackError::UpstreamServiceFailure,
            504 => FeedbackError::Timeout,
            _ => FeedbackError::Failed {
                status: Some(status),
                detail: body.to_string(),
            },
        }
    }

    /// Maps a transport-level failure (no HTTP response) to its category.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            FeedbackError::Timeout
        } else if err.is_connect() || err.is_request() {
            FeedbackError::NetworkFailure {
                detail: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            FeedbackError::from_status(status.as_u16(), "")
        } else {
            FeedbackError::Failed {
                status: None,
                detail: err.to_string(),
            }
        }
    }

    /// The pre-written message for this category.
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    pub fn next_action(&self) -> NextAction {
        match self {
            FeedbackError::PermissionDenied { .. }
            | FeedbackError::TooShort { .. }
            | FeedbackError::UnsupportedFormat
            | FeedbackError::AnalysisFailure { .. } => NextAction::ReRecord,
            FeedbackError::UpstreamServiceFailure
            | FeedbackError::Timeout
            | FeedbackError::NetworkFailure { .. }
            | FeedbackError::Failed { .. } => NextAction::RetryLater,
            FeedbackError::Device { .. }
            | FeedbackError::Validation { .. }
            | FeedbackError::NotFound => NextAction::Dismiss,
        }
    }

    /// Diagnostic detail for the log, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            FeedbackError::PermissionDenied { detail }
            | FeedbackError::Device { detail }
            | FeedbackError::AnalysisFailure { detail }
            | FeedbackError::NetworkFailure { detail }
            | FeedbackError::Failed { detail, .. } => Some(detail.as_str()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FeedbackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_422_is_analysis_failure() {
        let err = FeedbackError::from_status(422, "stt failed");
        assert!(matches!(err, FeedbackError::AnalysisFailure { .. }));
        assert_eq!(
            err.user_message(),
            "We couldn't understand the recording. Please record it again."
        );
    }

    #[test]
    fn status_502_is_upstream_failure() {
        let err = FeedbackError::from_status(502, "");
        assert_eq!(err, FeedbackError::UpstreamServiceFailure);
        assert_eq!(err.next_action(), NextAction::RetryLater);
    }

    #[test]
    fn mapped_statuses_are_deterministic() {
        for status in [400u16, 404, 415, 422, 500, 502, 503, 504] {
            let first = FeedbackError::from_status(status, "body");
            let second = FeedbackError::from_status(status, "body");
            assert_eq!(first, second, "status {status} mapped inconsistently");
        }
        assert_eq!(FeedbackError::from_status(415, ""), FeedbackError::UnsupportedFormat);
        assert_eq!(FeedbackError::from_status(504, ""), FeedbackError::Timeout);
        assert!(matches!(
            FeedbackError::from_status(400, ""),
            FeedbackError::Validation { .. }
        ));
    }

    #[test]
    fn unknown_status_is_generic_failure() {
        let err = FeedbackError::from_status(418, "teapot");
        assert_eq!(
            err,
            FeedbackError::Failed {
                status: Some(418),
                detail: "teapot".into()
            }
        );
    }

    #[test]
    fn message_hides_detail() {
        let err = FeedbackError::NetworkFailure {
            detail: "dns error: no such host".into(),
        };
        assert!(!err.user_message().contains("dns"));
        assert_eq!(err.detail(), Some("dns error: no such host"));
    }

    #[test]
    fn too_short_asks_for_rerecord() {
        let err = FeedbackError::TooShort {
            bytes: 50,
            min_bytes: 1000,
            millis: 1,
            min_millis: 50,
        };
        assert_eq!(err.next_action(), NextAction::ReRecord);
    }
}
