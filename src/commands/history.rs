//! Local feedback history listing.

use super::format_entry;
use crate::config::{get_data_dir, AppConfig};
use crate::feedback::FeedbackHistory;

/// Prints stored feedback, newest first, optionally filtered by user or content.
///
/// # Errors
/// - If the data directory cannot be determined
/// - If the history database cannot be read
pub async fn handle_history(
    user: Option<i64>,
    content: Option<i64>,
    limit: usize,
) -> Result<(), anyhow::Error> {
    let config = AppConfig::load()?;
    let mut history = FeedbackHistory::new(&get_data_dir()?, config.history.capacity);

    let mut entries = match (user, content) {
        (Some(user_id), content) => {
            let mut entries = history.for_user(user_id)?;
            if let Some(content_id) = content {
                entries.retain(|e| e.key.content_id == content_id);
            }
            entries
        }
        (None, Some(content_id)) => history.for_content(content_id)?,
        (None, None) => history.recent(limit)?,
    };
    entries.truncate(limit);

    if entries.is_empty() {
        println!("No feedback history found.");
        return Ok(());
    }

    for entry in &entries {
        println!("{}", format_entry(entry));
    }
    tracing::debug!("Listed {} history entries", entries.len());
    Ok(())
}
