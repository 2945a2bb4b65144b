//! Pronunciation feedback: the backend client, result model, local history
//! and the display model derived from results.

pub mod animation;
pub mod api;
pub mod history;
pub mod model;
pub mod presenter;
pub mod submitter;

pub use animation::AnalyzingAnimation;
pub use api::{FeedbackApi, FeedbackKey, HttpFeedbackClient, SubmissionContext, TextFeedbackRequest};
pub use history::{FeedbackEntry, FeedbackHistory};
pub use model::{FeedbackResult, Medal, RawFeedback};
pub use presenter::{FeedbackPresenter, MessageTier, Presentation, TierThresholds};
pub use submitter::FeedbackSubmitter;
