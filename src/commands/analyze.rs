//! Analysis of a pre-recorded file.

use std::path::PathBuf;
use std::sync::Arc;

use super::{format_result, ContextArgs};
use crate::config::{get_data_dir, AppConfig};
use crate::errors::FeedbackError;
use crate::feedback::{
    submitter::payload_from_file, FeedbackHistory, FeedbackPresenter, FeedbackSubmitter,
    HttpFeedbackClient,
};

/// Uploads a webm or wav recording for the given sentence and prints the score.
///
/// The result is stored in the local feedback history like a live practice result.
///
/// # Errors
/// - If a required context value is missing (nothing is uploaded)
/// - If the file is not webm/wav or cannot be read
/// - If the analysis request fails
pub async fn handle_analyze(
    file: PathBuf,
    context: ContextArgs,
    sentence: Option<String>,
) -> Result<(), anyhow::Error> {
    tracing::info!("=== storyvoice Analyze: {} ===", file.display());

    let config = AppConfig::load()?;
    let session_context = context.resolve(&config.practice, sentence.as_deref());
    let submission = FeedbackSubmitter::validate(&session_context).inspect_err(log_error)?;
    let payload = payload_from_file(&file).inspect_err(log_error)?;

    let client = HttpFeedbackClient::new(&config.api)?;
    let submitter = FeedbackSubmitter::new(Arc::new(client));
    let result = submitter
        .submit_payload(&payload, &submission)
        .await
        .inspect_err(log_error)?;

    let mut history = FeedbackHistory::new(&get_data_dir()?, config.history.capacity);
    if let Err(e) = history.append(submission.key(), Some(&submission.language), &result) {
        tracing::warn!("Failed to save feedback to history: {}", e);
    }

    let presenter = FeedbackPresenter::new(config.presenter.thresholds()?);
    println!("{}", format_result(&presenter, &result));
    Ok(())
}

pub(crate) fn log_error(error: &FeedbackError) {
    match error.detail() {
        Some(detail) => tracing::error!("{}: {}", error, detail),
        None => tracing::error!("{}", error),
    }
}
