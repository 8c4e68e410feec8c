//! `SQLite`-backed record store.

use crate::email::EmailRecord;
use crate::error::{Error, Result};
use crate::store::{EmailQuery, RecordStore, SortOrder};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS emails (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id TEXT NOT NULL UNIQUE,
        from_email TEXT NOT NULL,
        to_email TEXT NOT NULL,
        subject TEXT NOT NULL,
        body TEXT NOT NULL,
        date_sent TEXT,
        is_read INTEGER NOT NULL DEFAULT 0,
        has_attachments INTEGER NOT NULL DEFAULT 0,
        labels TEXT NOT NULL,
        iu_score INTEGER NOT NULL,
        intention TEXT NOT NULL,
        summary TEXT NOT NULL,
        created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
    );

    CREATE INDEX IF NOT EXISTS idx_emails_score_read ON emails(iu_score, is_read);
";

const COLUMNS: &str = "id, message_id, from_email, to_email, subject, body, date_sent, is_read, \
                       has_attachments, labels, iu_score, intention, summary, created_at";

/// `SQLite`-backed record store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("connection lock poisoned".to_string()))
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<EmailRecord> {
        let date_sent: Option<String> = row.get(6)?;
        let created_at: i64 = row.get(13)?;

        Ok(EmailRecord {
            id: row.get(0)?,
            message_id: row.get(1)?,
            from: row.get(2)?,
            to: row.get(3)?,
            subject: row.get(4)?,
            body: row.get(5)?,
            date_sent: date_sent
                .and_then(|d| DateTime::parse_from_rfc3339(&d).ok())
                .map(|d| d.with_timezone(&Utc)),
            is_read: row.get(7)?,
            has_attachments: row.get(8)?,
            category: row.get(9)?,
            iu_score: row.get(10)?,
            intent: row.get(11)?,
            summary: row.get(12)?,
            created_at: DateTime::from_timestamp(created_at, 0),
        })
    }
}

#[allow(clippy::significant_drop_tightening)]
impl RecordStore for SqliteStore {
    fn exists(&self, message_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM emails WHERE message_id = ?)",
            params![message_id],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn insert_batch(&self, records: &[EmailRecord]) -> Result<usize> {
        let mut conn = self.lock()?;
        // Dropping the transaction on any early return rolls it back.
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO emails (message_id, from_email, to_email, subject, body, date_sent,
                                     is_read, has_attachments, labels, iu_score, intention, summary)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.message_id,
                    record.from,
                    record.to,
                    record.subject,
                    record.body,
                    record.date_sent.map(|d| d.to_rfc3339()),
                    record.is_read,
                    record.has_attachments,
                    record.category,
                    record.iu_score,
                    record.intent,
                    record.summary,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn get_by_message_id(&self, message_id: &str) -> Result<Option<EmailRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM emails WHERE message_id = ?"))?;
        let mut rows = stmt.query_map(params![message_id], Self::row_to_record)?;
        Ok(rows.next().transpose()?)
    }

    fn query(&self, query: &EmailQuery) -> Result<Vec<EmailRecord>> {
        let conn = self.lock()?;

        let mut sql = format!("SELECT {COLUMNS} FROM emails WHERE 1=1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if query.unread_only {
            sql.push_str(" AND is_read = 0");
        }
        if let Some(min) = query.min_score {
            sql.push_str(" AND iu_score >= ?");
            params_vec.push(Box::new(min));
        }
        match query.order {
            SortOrder::Newest => sql.push_str(" ORDER BY id DESC"),
            SortOrder::Score => sql.push_str(" ORDER BY iu_score DESC, id DESC"),
        }
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            params_vec.push(Box::new(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(AsRef::as_ref).collect();
        let records = stmt
            .query_map(params_refs.as_slice(), Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn mark_read(&self, message_ids: &[String]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE emails SET is_read = 1 WHERE message_id = ? AND is_read = 0")?;
            for id in message_ids {
                changed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM emails", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn close(&self) {
        let Ok(conn) = self.lock() else {
            return;
        };
        // Checkpoint WAL so the main database file holds every committed run
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        tracing::info!("SQLite database checkpointed and ready for shutdown");
    }
}
