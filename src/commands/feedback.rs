//! Text-based feedback for an already uploaded recording.

use super::analyze::log_error;
use super::format_result;
use crate::config::AppConfig;
use crate::errors::FeedbackError;
use crate::feedback::{
    FeedbackApi, FeedbackPresenter, HttpFeedbackClient, TextFeedbackRequest,
};

/// Asks the backend to produce feedback for `recorded_file`, a path the backend
/// already stores, read against `sentence`.
///
/// # Errors
/// - If the user id is missing or the sentence is blank
/// - If the request fails
pub async fn handle_feedback(
    user_id: Option<i64>,
    sentence: String,
    recorded_file: String,
) -> Result<(), anyhow::Error> {
    let config = AppConfig::load()?;

    let user_id = user_id
        .or(config.practice.user_id)
        .ok_or(FeedbackError::Validation { field: "userId" })?;
    if sentence.trim().is_empty() {
        return Err(FeedbackError::Validation {
            field: "targetSentence",
        }
        .into());
    }

    let request = TextFeedbackRequest {
        user_id,
        target_sentence: sentence,
        recorded_file_path: recorded_file,
    };
    tracing::info!(
        "Requesting text feedback for {}",
        request.recorded_file_path
    );

    let client = HttpFeedbackClient::new(&config.api)?;
    let result = client
        .create_text_feedback(&request)
        .await
        .inspect_err(log_error)?;

    let presenter = FeedbackPresenter::new(config.presenter.thresholds()?);
    println!("{}", format_result(&presenter, &result));
    Ok(())
}
