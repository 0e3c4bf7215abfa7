//! Reminder storage repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::warn;

use super::model::{Reminder, ReminderId, ReminderState};
use super::store::ReminderStore;
use super::update::ReminderUpdate;
use crate::{Error, Result};

const SELECT_COLUMNS: &str = r"
    SELECT id, source_message_id, source_thread_id, sender, recipient, subject,
           original_subject, original_send_time, schedule, last_fired_index, state
    FROM reminders
";

/// Repository for durable reminder storage in `SQLite`.
pub struct SqliteReminderRepository {
    pool: SqlitePool,
}

impl SqliteReminderRepository {
    /// Create a new repository with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Create an in-memory repository for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS reminders (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                source_message_id TEXT NOT NULL,
                source_thread_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                original_subject TEXT NOT NULL DEFAULT '',
                original_send_time TEXT NOT NULL,
                schedule TEXT NOT NULL DEFAULT '[]',
                last_fired_index INTEGER,
                state TEXT NOT NULL DEFAULT 'pending'
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Ingest de-duplication looks reminders up by source message
        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_reminders_source ON reminders(source_message_id)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS deleted_sources (
                source_message_id TEXT PRIMARY KEY,
                deleted_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_row(
        conn: &mut SqliteConnection,
        id: &ReminderId,
        update: ReminderUpdate,
    ) -> Result<Reminder> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        let mut reminder = row
            .as_ref()
            .and_then(reminder_from_row)
            .ok_or_else(|| Error::NotFound(id.clone()))?;

        update.apply_to(&mut reminder);
        Self::write_row(&mut *conn, &reminder).await?;
        Ok(reminder)
    }

    async fn delete_row(conn: &mut SqliteConnection, id: &ReminderId) -> Result<()> {
        let source: Option<String> =
            sqlx::query_scalar("SELECT source_message_id FROM reminders WHERE id = ?")
                .bind(id.as_str())
                .fetch_optional(&mut *conn)
                .await?;
        let source = source.ok_or_else(|| Error::NotFound(id.clone()))?;

        sqlx::query("DELETE FROM reminders WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *conn)
            .await?;

        // Remembered so ingest does not recreate it from the same message
        sqlx::query(
            "INSERT OR IGNORE INTO deleted_sources (source_message_id, deleted_at) VALUES (?, ?)",
        )
        .bind(&source)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn write_row(
        executor: impl sqlx::SqliteExecutor<'_>,
        reminder: &Reminder,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE reminders SET
                sender = ?, recipient = ?, subject = ?, original_subject = ?,
                original_send_time = ?, schedule = ?, last_fired_index = ?, state = ?
            WHERE id = ?
            ",
        )
        .bind(&reminder.sender)
        .bind(&reminder.recipient)
        .bind(&reminder.subject)
        .bind(&reminder.original_subject)
        .bind(reminder.original_send_time.to_rfc3339())
        .bind(encode_schedule(&reminder.schedule)?)
        .bind(encode_index(reminder.last_fired_index))
        .bind(reminder.state.as_str())
        .bind(reminder.id.as_str())
        .execute(executor)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ReminderStore for SqliteReminderRepository {
    async fn create(&self, reminder: &Reminder) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO reminders
                (id, source_message_id, source_thread_id, sender, recipient, subject,
                 original_subject, original_send_time, schedule, last_fired_index, state)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(reminder.id.as_str())
        .bind(&reminder.source_message_id)
        .bind(&reminder.source_thread_id)
        .bind(&reminder.sender)
        .bind(&reminder.recipient)
        .bind(&reminder.subject)
        .bind(&reminder.original_subject)
        .bind(reminder.original_send_time.to_rfc3339())
        .bind(encode_schedule(&reminder.schedule)?)
        .bind(encode_index(reminder.last_fired_index))
        .bind(reminder.state.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::Duplicate(reminder.id.clone())
            }
            other => Error::Database(other),
        })?;

        Ok(())
    }

    async fn get(&self, id: &ReminderId) -> Result<Option<Reminder>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().and_then(reminder_from_row))
    }

    async fn list_all(&self) -> Result<Vec<Reminder>> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY seq ASC"))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().filter_map(reminder_from_row).collect())
    }

    async fn update(&self, id: &ReminderId, update: ReminderUpdate) -> Result<Reminder> {
        let mut conn = self.pool.acquire().await?;
        begin_immediate(&mut *conn).await?;
        let result = Self::update_row(&mut *conn, id, update).await;
        finish(&mut *conn, result).await
    }

    async fn delete(&self, id: &ReminderId) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        begin_immediate(&mut *conn).await?;
        let result = Self::delete_row(&mut *conn, id).await;
        finish(&mut *conn, result).await
    }

    async fn find_by_source_message(&self, message_id: &str) -> Result<Option<Reminder>> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE source_message_id = ? ORDER BY seq ASC LIMIT 1"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(reminder_from_row))
    }

    async fn is_source_deleted(&self, message_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM deleted_sources WHERE source_message_id = ?")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }
}

/// Takes the write lock up front, so a second process updating the same
/// file waits on the busy timeout instead of failing on a lock upgrade.
async fn begin_immediate(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("BEGIN IMMEDIATE").execute(conn).await?;
    Ok(())
}

/// Commits on success and rolls back otherwise.
async fn finish<T>(conn: &mut SqliteConnection, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => match sqlx::query("COMMIT").execute(&mut *conn).await {
            Ok(_) => Ok(value),
            Err(e) => {
                rollback(conn).await;
                Err(e.into())
            }
        },
        Err(e) => {
            rollback(conn).await;
            Err(e)
        }
    }
}

async fn rollback(conn: &mut SqliteConnection) {
    if let Err(e) = sqlx::query("ROLLBACK").execute(conn).await {
        warn!(error = %e, "Failed to roll back reminder transaction");
    }
}

fn encode_schedule(schedule: &[DateTime<Utc>]) -> Result<String> {
    let values: Vec<String> = schedule.iter().map(DateTime::to_rfc3339).collect();
    Ok(serde_json::to_string(&values)?)
}

fn encode_index(index: Option<usize>) -> Option<i64> {
    index.and_then(|i| i64::try_from(i).ok())
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Decodes a row, skipping (and logging) rows that no longer parse.
fn reminder_from_row(row: &SqliteRow) -> Option<Reminder> {
    let id: String = row.get("id");

    let decoded = (|| {
        let original_send_time = parse_time(&row.get::<String, _>("original_send_time"))?;
        let schedule_json: String = row.get("schedule");
        let schedule = serde_json::from_str::<Vec<String>>(&schedule_json)
            .ok()?
            .iter()
            .map(|s| parse_time(s))
            .collect::<Option<Vec<_>>>()?;
        let last_fired_index = match row.get::<Option<i64>, _>("last_fired_index") {
            Some(index) => Some(usize::try_from(index).ok()?),
            None => None,
        };
        let state = row.get::<String, _>("state").parse::<ReminderState>().ok()?;

        Some(Reminder {
            id: ReminderId::from(id.as_str()),
            source_message_id: row.get("source_message_id"),
            source_thread_id: row.get("source_thread_id"),
            sender: row.get("sender"),
            recipient: row.get("recipient"),
            subject: row.get("subject"),
            original_subject: row.get("original_subject"),
            original_send_time,
            schedule,
            last_fired_index,
            state,
        })
    })();

    if decoded.is_none() {
        warn!(reminder_id = %id, "Skipping unreadable reminder row");
    }
    decoded
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::reminder::store::tests::sample;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_create_and_retrieve() {
        let repo = SqliteReminderRepository::in_memory().await.unwrap();
        let reminder = sample("r1", "m1");

        repo.create(&reminder).await.unwrap();

        let stored = repo.get(&ReminderId::from("r1")).await.unwrap().unwrap();
        assert_eq!(stored, reminder);
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order() {
        let repo = SqliteReminderRepository::in_memory().await.unwrap();
        for (id, msg) in [("b", "m1"), ("a", "m2"), ("c", "m3")] {
            repo.create(&sample(id, msg)).await.unwrap();
        }

        let ids: Vec<String> = repo
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_update_sorts_schedule_and_persists() {
        let repo = SqliteReminderRepository::in_memory().await.unwrap();
        repo.create(&sample("r1", "m1")).await.unwrap();

        let update: ReminderUpdate =
            serde_json::from_str(r#"{"reminderDates":["2024-03-01","2024-02-01"]}"#).unwrap();
        let updated = repo.update(&ReminderId::from("r1"), update).await.unwrap();

        let expected = vec![
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        ];
        assert_eq!(updated.schedule, expected);
        let stored = repo.get(&ReminderId::from("r1")).await.unwrap().unwrap();
        assert_eq!(stored.schedule, expected);
    }

    #[tokio::test]
    async fn test_progress_update_round_trips() {
        let repo = SqliteReminderRepository::in_memory().await.unwrap();
        repo.create(&sample("r1", "m1")).await.unwrap();

        repo.update(
            &ReminderId::from("r1"),
            ReminderUpdate::progress(Some(1), ReminderState::Completed),
        )
        .await
        .unwrap();

        let stored = repo.get(&ReminderId::from("r1")).await.unwrap().unwrap();
        assert_eq!(stored.last_fired_index, Some(1));
        assert_eq!(stored.state, ReminderState::Completed);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let repo = SqliteReminderRepository::in_memory().await.unwrap();

        let err = repo
            .update(&ReminderId::from("nope"), ReminderUpdate::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(repo.delete(&ReminderId::from("nope")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_and_find_by_source() {
        let repo = SqliteReminderRepository::in_memory().await.unwrap();
        repo.create(&sample("r1", "m1")).await.unwrap();

        assert!(repo.find_by_source_message("m1").await.unwrap().is_some());
        assert!(!repo.is_source_deleted("m1").await.unwrap());

        repo.delete(&ReminderId::from("r1")).await.unwrap();
        assert!(repo.find_by_source_message("m1").await.unwrap().is_none());
        assert!(repo.list_all().await.unwrap().is_empty());
        assert!(repo.is_source_deleted("m1").await.unwrap());
        assert!(!repo.is_source_deleted("m2").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_update_releases_transaction() {
        let repo = SqliteReminderRepository::in_memory().await.unwrap();
        repo.create(&sample("r1", "m1")).await.unwrap();

        // The single connection must not be left inside an open transaction
        for _ in 0..2 {
            assert!(
                repo.update(&ReminderId::from("nope"), ReminderUpdate::default())
                    .await
                    .unwrap_err()
                    .is_not_found()
            );
        }
        let updated = repo
            .update(
                &ReminderId::from("r1"),
                ReminderUpdate::progress(Some(0), ReminderState::Sent),
            )
            .await
            .unwrap();
        assert_eq!(updated.state, ReminderState::Sent);
    }

    async fn edit(repo: &SqliteReminderRepository, id: &str, n: usize) -> Result<Reminder> {
        let update = ReminderUpdate {
            subject: Some(format!("edit {n}")),
            ..ReminderUpdate::default()
        };
        repo.update(&ReminderId::from(id), update).await
    }

    #[tokio::test]
    async fn test_two_handles_on_one_file_update_concurrently() {
        let path = std::env::temp_dir().join(format!("followup-{}.db", uuid::Uuid::new_v4()));
        let path_str = path.to_str().unwrap().to_string();

        let first = SqliteReminderRepository::new(&path_str).await.unwrap();
        let second = SqliteReminderRepository::new(&path_str).await.unwrap();
        first.create(&sample("r1", "m1")).await.unwrap();
        second.create(&sample("r2", "m2")).await.unwrap();

        for n in 0..10 {
            let (a, b) = tokio::join!(
                edit(&first, "r1", n),
                edit(&second, if n % 2 == 0 { "r1" } else { "r2" }, n)
            );
            a.unwrap();
            b.unwrap();
        }
        assert_eq!(first.list_all().await.unwrap().len(), 2);

        first.pool.close().await;
        second.pool.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{path_str}{suffix}"));
        }
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let repo = SqliteReminderRepository::in_memory().await.unwrap();
        repo.create(&sample("r1", "m1")).await.unwrap();
        assert!(matches!(
            repo.create(&sample("r1", "m2")).await.unwrap_err(),
            Error::Duplicate(id) if id.as_str() == "r1"
        ));
        assert_eq!(repo.list_all().await.unwrap().len(), 1);
    }
}
