//! Latest stored feedback lookup.

use std::sync::Arc;

use super::analyze::log_error;
use super::{format_result, ContextArgs};
use crate::config::{get_data_dir, AppConfig};
use crate::errors::FeedbackError;
use crate::feedback::{FeedbackApi, FeedbackHistory, FeedbackKey, FeedbackPresenter, HttpFeedbackClient};

/// Fetches the most recent backend feedback for a user/content/script triple and
/// makes it the only local history entry for that triple.
///
/// # Errors
/// - If user, content or script id is missing
/// - If the backend has no feedback for the triple or the request fails
pub async fn handle_latest(context: ContextArgs) -> Result<(), anyhow::Error> {
    let config = AppConfig::load()?;
    let resolved = context.resolve(&config.practice, None);

    let key = FeedbackKey {
        user_id: resolved
            .user_id
            .ok_or(FeedbackError::Validation { field: "userId" })?,
        content_id: resolved
            .content_id
            .ok_or(FeedbackError::Validation { field: "contentsId" })?,
        script_id: resolved
            .script_id
            .ok_or(FeedbackError::Validation { field: "scriptId" })?,
    };
    tracing::info!(
        "Fetching latest feedback for user {} content {} script {}",
        key.user_id,
        key.content_id,
        key.script_id
    );

    let client: Arc<dyn FeedbackApi> = Arc::new(HttpFeedbackClient::new(&config.api)?);
    let result = client.latest(key).await.inspect_err(log_error)?;

    let mut history = FeedbackHistory::new(&get_data_dir()?, config.history.capacity);
    if let Err(e) = history.replace_latest_for(key, resolved.language.as_deref(), &result) {
        tracing::warn!("Failed to update local history: {}", e);
    }

    let presenter = FeedbackPresenter::new(config.presenter.thresholds()?);
    println!("{}", format_result(&presenter, &result));
    Ok(())
}
