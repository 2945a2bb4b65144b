//! Local feedback history stored in SQLite.
//!
//! A bounded log of analysis results, newest first. Appending past the
//! configured capacity drops the oldest entries.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

use super::api::FeedbackKey;
use super::model::FeedbackResult;

/// One stored analysis result.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEntry {
    pub id: i64,
    pub key: FeedbackKey,
    pub language: Option<String>,
    pub result: FeedbackResult,
    pub created_at: DateTime<Local>,
}

pub struct FeedbackHistory {
    database_path: PathBuf,
    capacity: usize,
    /// Opened on first use
    connection: Option<Connection>,
}

const SELECT_COLUMNS: &str =
    "SELECT id, user_id, content_id, script_id, language, result, created_at FROM feedback";

impl FeedbackHistory {
    /// History stored as `feedback_history.db` inside `data_dir`.
    pub fn new(data_dir: &Path, capacity: usize) -> Self {
        Self {
            database_path: data_dir.join("feedback_history.db"),
            capacity: capacity.max(1),
            connection: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.database_path
    }

    fn get_connection(&mut self) -> Result<&Connection> {
        if self.connection.is_none() {
            let connection = Connection::open(&self.database_path)?;
            connection.execute(
                "CREATE TABLE IF NOT EXISTS feedback (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    content_id INTEGER NOT NULL,
                    script_id INTEGER NOT NULL,
                    language TEXT,
                    score INTEGER NOT NULL,
                    result TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )",
                [],
            )?;
            connection.execute(
                "CREATE INDEX IF NOT EXISTS feedback_key ON feedback (user_id, content_id, script_id)",
                [],
            )?;
            self.connection = Some(connection);
        }
        self.connection
            .as_ref()
            .ok_or_else(|| anyhow!("History database is not open"))
    }

    /// Stores a result and trims the log to capacity. Returns the new entry id.
    pub fn append(
        &mut self,
        key: FeedbackKey,
        language: Option<&str>,
        result: &FeedbackResult,
    ) -> Result<i64> {
        let capacity = self.capacity as i64;
        let json = serde_json::to_string(result)?;
        let connection = self.get_connection()?;

        connection.execute(
            "INSERT INTO feedback (user_id, content_id, script_id, language, score, result, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key.user_id,
                key.content_id,
                key.script_id,
                language,
                result.score,
                json,
                Local::now().to_rfc3339()
            ],
        )?;
        let id = connection.last_insert_rowid();

        let trimmed = connection.execute(
            "DELETE FROM feedback WHERE id NOT IN (SELECT id FROM feedback ORDER BY id DESC LIMIT ?1)",
            params![capacity],
        )?;
        if trimmed > 0 {
            tracing::debug!("Trimmed {} old feedback entries", trimmed);
        }

        tracing::debug!("Feedback saved to history (score {})", result.score);
        Ok(id)
    }

    /// Drops every stored entry for `key` and stores `result` as its only one.
    pub fn replace_latest_for(
        &mut self,
        key: FeedbackKey,
        language: Option<&str>,
        result: &FeedbackResult,
    ) -> Result<i64> {
        self.get_connection()?.execute(
            "DELETE FROM feedback WHERE user_id = ?1 AND content_id = ?2 AND script_id = ?3",
            params![key.user_id, key.content_id, key.script_id],
        )?;
        self.append(key, language, result)
    }

    /// Up to `limit` entries, newest first.
    pub fn recent(&mut self, limit: usize) -> Result<Vec<FeedbackEntry>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?1");
        self.query(&sql, params![limit as i64])
    }

    pub fn latest_for(&mut self, key: FeedbackKey) -> Result<Option<FeedbackEntry>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE user_id = ?1 AND content_id = ?2 AND script_id = ?3 ORDER BY id DESC LIMIT 1"
        );
        let connection = self.get_connection()?;
        let entry = connection
            .query_row(
                &sql,
                params![key.user_id, key.content_id, key.script_id],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn for_user(&mut self, user_id: i64) -> Result<Vec<FeedbackEntry>> {
        let sql = format!("{SELECT_COLUMNS} WHERE user_id = ?1 ORDER BY id DESC");
        self.query(&sql, params![user_id])
    }

    pub fn for_content(&mut self, content_id: i64) -> Result<Vec<FeedbackEntry>> {
        let sql = format!("{SELECT_COLUMNS} WHERE content_id = ?1 ORDER BY id DESC");
        self.query(&sql, params![content_id])
    }

    fn query(&mut self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<FeedbackEntry>> {
        let connection = self.get_connection()?;
        let mut statement = connection.prepare(sql)?;
        let entries = statement
            .query_map(params, entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<FeedbackEntry> {
    let json = row.get::<_, String>(5)?;
    let result: FeedbackResult = serde_json::from_str(&json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let timestamp = row.get::<_, String>(6)?;
    let created_at = DateTime::parse_from_rfc3339(&timestamp)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(FeedbackEntry {
        id: row.get(0)?,
        key: FeedbackKey {
            user_id: row.get(1)?,
            content_id: row.get(2)?,
            script_id: row.get(3)?,
        },
        language: row.get(4)?,
        result,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::model::Medal;

    fn key(user_id: i64, content_id: i64, script_id: i64) -> FeedbackKey {
        FeedbackKey {
            user_id,
            content_id,
            script_id,
        }
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = FeedbackHistory::new(dir.path(), 10);

        let mut result = FeedbackResult::new(92);
        result.medal = Some(Medal::Gold);
        result.accuracy = Some(88);
        history.append(key(1, 7, 3), Some("en-US"), &result).unwrap();

        let entries = history.recent(5).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, key(1, 7, 3));
        assert_eq!(entries[0].language.as_deref(), Some("en-US"));
        assert_eq!(entries[0].result, result);
    }

    #[test]
    fn capacity_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = FeedbackHistory::new(dir.path(), 3);
        for score in [10, 20, 30, 40, 50] {
            history
                .append(key(1, 1, 1), None, &FeedbackResult::new(score))
                .unwrap();
        }
        let scores: Vec<u8> = history
            .recent(10)
            .unwrap()
            .iter()
            .map(|e| e.result.score)
            .collect();
        assert_eq!(scores, vec![50, 40, 30]);
    }

    #[test]
    fn filters_by_user_content_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = FeedbackHistory::new(dir.path(), 50);
        history.append(key(1, 7, 3), None, &FeedbackResult::new(60)).unwrap();
        history.append(key(2, 7, 3), None, &FeedbackResult::new(70)).unwrap();
        history.append(key(1, 8, 4), None, &FeedbackResult::new(80)).unwrap();
        history.append(key(1, 7, 3), None, &FeedbackResult::new(65)).unwrap();

        assert_eq!(history.for_user(1).unwrap().len(), 3);
        assert_eq!(history.for_content(7).unwrap().len(), 3);
        let latest = history.latest_for(key(1, 7, 3)).unwrap().unwrap();
        assert_eq!(latest.result.score, 65);
        assert!(history.latest_for(key(9, 9, 9)).unwrap().is_none());
    }

    #[test]
    fn replace_keeps_single_entry_for_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = FeedbackHistory::new(dir.path(), 50);
        history.append(key(1, 7, 3), None, &FeedbackResult::new(40)).unwrap();
        history.append(key(1, 7, 3), None, &FeedbackResult::new(45)).unwrap();
        history.append(key(1, 8, 3), None, &FeedbackResult::new(99)).unwrap();

        history
            .replace_latest_for(key(1, 7, 3), Some("en-US"), &FeedbackResult::new(88))
            .unwrap();

        let for_key: Vec<_> = history
            .for_user(1)
            .unwrap()
            .into_iter()
            .filter(|e| e.key == key(1, 7, 3))
            .collect();
        assert_eq!(for_key.len(), 1);
        assert_eq!(for_key[0].result.score, 88);
        assert_eq!(history.for_content(8).unwrap().len(), 1);
    }

    #[test]
    fn history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut history = FeedbackHistory::new(dir.path(), 5);
            history.append(key(1, 2, 3), None, &FeedbackResult::new(77)).unwrap();
        }
        let mut reopened = FeedbackHistory::new(dir.path(), 5);
        assert_eq!(reopened.recent(1).unwrap()[0].result.score, 77);
    }
}
