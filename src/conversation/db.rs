use super::state::{ConversationState, ConversationStatus};
use super::store::StateStore;
use crate::survey::{QuestionId, RespondentId, SurveyId};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Raw row shared by the live and history tables.
struct StateRow {
    respondent_id: RespondentId,
    survey_id: SurveyId,
    current_question: Option<QuestionId>,
    history: String,
    status: String,
    started_at: String,
    last_activity: String,
}

impl StateRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            respondent_id: row.get(0)?,
            survey_id: row.get(1)?,
            current_question: row.get(2)?,
            history: row.get(3)?,
            status: row.get(4)?,
            started_at: row.get(5)?,
            last_activity: row.get(6)?,
        })
    }

    fn into_state(self) -> anyhow::Result<ConversationState> {
        let status = ConversationStatus::parse(&self.status)
            .with_context(|| format!("unknown conversation status '{}'", self.status))?;
        let history: Vec<QuestionId> = serde_json::from_str(&self.history)
            .with_context(|| format!("corrupt history for respondent {}", self.respondent_id))?;
        Ok(ConversationState {
            respondent_id: self.respondent_id,
            survey_id: self.survey_id,
            current_question: self.current_question,
            history,
            status,
            started_at: parse_timestamp(&self.started_at)?,
            last_activity: parse_timestamp(&self.last_activity)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp '{raw}'"))?
        .with_timezone(&Utc))
}

/// SQLite-backed conversation state.
///
/// Wraps `Connection` in a `Mutex`; share one store across tasks via `Arc`.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStateStore {
    /// Open (or create) the state database at the given path.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create state directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open state DB: {}", path.display()))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (for tests and simulation).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA busy_timeout=5000;

                 CREATE TABLE IF NOT EXISTS conversation_states (
                     respondent_id    INTEGER PRIMARY KEY NOT NULL,
                     survey_id        INTEGER NOT NULL,
                     current_question INTEGER,
                     history          TEXT NOT NULL DEFAULT '[]',
                     status           TEXT NOT NULL,
                     started_at       TEXT NOT NULL,
                     last_activity    TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_conversation_states_status
                     ON conversation_states(status);

                 CREATE TABLE IF NOT EXISTS conversation_history (
                     id               INTEGER PRIMARY KEY AUTOINCREMENT,
                     respondent_id    INTEGER NOT NULL,
                     survey_id        INTEGER NOT NULL,
                     current_question INTEGER,
                     history          TEXT NOT NULL,
                     status           TEXT NOT NULL,
                     started_at       TEXT NOT NULL,
                     last_activity    TEXT NOT NULL,
                     archived_at      TEXT NOT NULL DEFAULT (datetime('now'))
                 );
                 CREATE INDEX IF NOT EXISTS idx_conversation_history_respondent
                     ON conversation_history(respondent_id);",
            )
            .context("failed to initialize state schema")?;
        Ok(())
    }

    fn read_live(
        conn: &Connection,
        respondent_id: RespondentId,
    ) -> anyhow::Result<Option<ConversationState>> {
        let mut stmt = conn.prepare(
            "SELECT respondent_id, survey_id, current_question, history, status,
                    started_at, last_activity
             FROM conversation_states WHERE respondent_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![respondent_id], StateRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row.into_state()?)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    // ── History ──────────────────────────────────────────────────

    /// Archived conversations, newest first, optionally for one respondent.
    pub fn list_history(
        &self,
        respondent_id: Option<RespondentId>,
        limit: usize,
    ) -> anyhow::Result<Vec<ConversationState>> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = guard.prepare(
            "SELECT respondent_id, survey_id, current_question, history, status,
                    started_at, last_activity
             FROM conversation_history
             WHERE ?1 IS NULL OR respondent_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            params![respondent_id, i64::try_from(limit).unwrap_or(i64::MAX)],
            StateRow::from_row,
        )?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?.into_state()?);
        }
        Ok(result)
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get_state(
        &self,
        respondent_id: RespondentId,
    ) -> anyhow::Result<Option<ConversationState>> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        Self::read_live(&guard, respondent_id)
    }

    async fn save_state(&self, state: &ConversationState) -> anyhow::Result<()> {
        let history = serde_json::to_string(&state.history)?;
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute(
            "INSERT OR REPLACE INTO conversation_states
                (respondent_id, survey_id, current_question, history, status,
                 started_at, last_activity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                state.respondent_id,
                state.survey_id,
                state.current_question,
                history,
                state.status.as_str(),
                state.started_at.to_rfc3339(),
                state.last_activity.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Move the live record into `conversation_history` in one transaction.
    async fn archive_state(
        &self,
        respondent_id: RespondentId,
    ) -> anyhow::Result<Option<ConversationState>> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let Some(state) = Self::read_live(&guard, respondent_id)? else {
            return Ok(None);
        };

        guard.execute_batch("BEGIN")?;
        let result = (|| -> anyhow::Result<()> {
            guard.execute(
                "INSERT INTO conversation_history
                    (respondent_id, survey_id, current_question, history, status,
                     started_at, last_activity)
                 SELECT respondent_id, survey_id, current_question, history, status,
                        started_at, last_activity
                 FROM conversation_states WHERE respondent_id = ?1",
                params![respondent_id],
            )?;
            guard.execute(
                "DELETE FROM conversation_states WHERE respondent_id = ?1",
                params![respondent_id],
            )?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                guard.execute_batch("COMMIT")?;
                tracing::debug!(
                    respondent_id,
                    survey_id = state.survey_id,
                    status = %state.status,
                    "conversation archived"
                );
                Ok(Some(state))
            }
            Err(e) => {
                let _ = guard.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::NextDeterminant;
    use tempfile::TempDir;

    fn sample(respondent_id: RespondentId) -> ConversationState {
        let now = Utc::now();
        let mut state = ConversationState::new(respondent_id, 4, now);
        state.start(1, now).unwrap();
        state
            .advance(NextDeterminant::GoToQuestion(2), now)
            .unwrap();
        state
            .advance(NextDeterminant::GoToQuestion(3), now)
            .unwrap();
        state
    }

    #[test]
    fn creates_tables() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let guard = store.conn.lock().unwrap();
        let _: i64 = guard
            .query_row("SELECT COUNT(*) FROM conversation_states", [], |r| r.get(0))
            .unwrap();
        let _: i64 = guard
            .query_row("SELECT COUNT(*) FROM conversation_history", [], |r| {
                r.get(0)
            })
            .unwrap();
    }

    #[tokio::test]
    async fn save_and_get_round_trip() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let state = sample(11);
        store.save_state(&state).await.unwrap();
        assert_eq!(store.get_state(11).await.unwrap(), Some(state));
        assert!(store.get_state(12).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_overwrites() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let mut state = sample(11);
        store.save_state(&state).await.unwrap();
        state.back(Utc::now()).unwrap();
        store.save_state(&state).await.unwrap();
        let loaded = store.get_state(11).await.unwrap().unwrap();
        assert_eq!(loaded.current_question, Some(2));
        assert_eq!(loaded.history, vec![1]);
    }

    #[tokio::test]
    async fn archive_moves_to_history() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let mut state = sample(11);
        state.cancel(Utc::now()).unwrap();
        store.save_state(&state).await.unwrap();
        store.save_state(&sample(12)).await.unwrap();

        let archived = store.archive_state(11).await.unwrap();
        assert_eq!(archived, Some(state.clone()));
        assert!(store.get_state(11).await.unwrap().is_none());
        assert!(store.archive_state(11).await.unwrap().is_none());

        let history = store.list_history(Some(11), 10).unwrap();
        assert_eq!(history, vec![state]);
        assert!(store.list_history(Some(12), 10).unwrap().is_empty());
        assert_eq!(store.list_history(None, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn open_on_disk_persists() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("state.db");
        let state = sample(3);
        {
            let store = SqliteStateStore::open(&path).unwrap();
            store.save_state(&state).await.unwrap();
        }
        let store = SqliteStateStore::open(&path).unwrap();
        assert_eq!(store.db_path(), path.as_path());
        assert_eq!(store.get_state(3).await.unwrap(), Some(state));
    }
}
