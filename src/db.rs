//! Database module for chat-relay
//!
//! SQLite persistence for threads, messages, provider configurations and the
//! user's provider/model selection.

mod schema;

pub use schema::*;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),
    #[error("Message not found: {0}")]
    MessageNotFound(String),
    #[error("API configuration not found: {0}")]
    ApiNotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Thread Operations ====================

    /// Create a new thread
    pub fn create_thread(&self, id: &str, title: &str) -> DbResult<Thread> {
        let conn = self.conn.lock().unwrap();
        let now = timestamp_now();

        conn.execute(
            "INSERT INTO threads (id, title, last_message, last_message_timestamp, created_at)
             VALUES (?1, ?2, '', NULL, ?3)",
            params![id, title, format_datetime(&now)],
        )?;

        Ok(Thread {
            id: id.to_string(),
            title: title.to_string(),
            last_message: String::new(),
            last_message_timestamp: None,
            created_at: now,
        })
    }

    /// Get thread by ID
    pub fn get_thread(&self, id: &str) -> DbResult<Thread> {
        let conn = self.conn.lock().unwrap();
        Self::get_thread_locked(&conn, id)
    }

    fn get_thread_locked(conn: &Connection, id: &str) -> DbResult<Thread> {
        conn.query_row(
            "SELECT id, title, last_message, last_message_timestamp, created_at
             FROM threads WHERE id = ?1",
            params![id],
            parse_thread_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::ThreadNotFound(id.to_string()),
            other => DbError::Sqlite(other),
        })
    }

    /// List threads, most recently active first
    pub fn list_threads(&self) -> DbResult<Vec<Thread>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, last_message, last_message_timestamp, created_at
             FROM threads
             ORDER BY COALESCE(last_message_timestamp, created_at) DESC",
        )?;

        let rows = stmt.query_map([], parse_thread_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Record the latest exchange on a thread.
    ///
    /// The stored timestamp never moves backwards: a concurrent writer that
    /// already recorded a later time keeps it.
    pub fn touch_thread(&self, id: &str, excerpt: &str, at: &DateTime<Utc>) -> DbResult<Thread> {
        let conn = self.conn.lock().unwrap();

        let updated = conn.execute(
            "UPDATE threads
             SET last_message = ?1,
                 last_message_timestamp = MAX(COALESCE(last_message_timestamp, ''), ?2)
             WHERE id = ?3",
            params![excerpt, format_datetime(at), id],
        )?;

        if updated == 0 {
            return Err(DbError::ThreadNotFound(id.to_string()));
        }
        Self::get_thread_locked(&conn, id)
    }

    // ==================== Message Operations ====================

    /// Add a message to a thread.
    ///
    /// `created_at` is strictly increasing within a thread, so creation order
    /// and timestamp order always agree.
    pub fn add_message(
        &self,
        message_id: &str,
        thread_id: &str,
        sender: Sender,
        content: &str,
        model: &str,
    ) -> DbResult<Message> {
        let conn = self.conn.lock().unwrap();

        let (sequence_id, last_created): (i64, Option<String>) = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1,
                    (SELECT created_at FROM messages WHERE thread_id = ?1
                     ORDER BY sequence_id DESC LIMIT 1)
             FROM messages WHERE thread_id = ?1",
            params![thread_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut now = timestamp_now();
        if let Some(last) = last_created.as_deref().map(parse_datetime) {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }

        conn.execute(
            "INSERT INTO messages (message_id, thread_id, sequence_id, sender, content, model, useful, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            params![
                message_id,
                thread_id,
                sequence_id,
                sender.as_str(),
                content,
                model,
                format_datetime(&now),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
            {
                DbError::ThreadNotFound(thread_id.to_string())
            }
            other => DbError::Sqlite(other),
        })?;

        Ok(Message {
            message_id: message_id.to_string(),
            thread_id: thread_id.to_string(),
            sequence_id,
            sender,
            content: content.to_string(),
            model: model.to_string(),
            useful: false,
            created_at: now,
        })
    }

    /// Overwrite a message's content, sender and model label
    pub fn finalize_message(
        &self,
        message_id: &str,
        sender: Sender,
        content: &str,
        model: &str,
    ) -> DbResult<Message> {
        let conn = self.conn.lock().unwrap();

        let updated = conn.execute(
            "UPDATE messages SET sender = ?1, content = ?2, model = ?3 WHERE message_id = ?4",
            params![sender.as_str(), content, model, message_id],
        )?;

        if updated == 0 {
            return Err(DbError::MessageNotFound(message_id.to_string()));
        }
        Self::get_message_locked(&conn, message_id)
    }

    /// Get messages for a thread in creation order
    pub fn get_messages(&self, thread_id: &str) -> DbResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT message_id, thread_id, sequence_id, sender, content, model, useful, created_at
             FROM messages WHERE thread_id = ?1 ORDER BY sequence_id ASC",
        )?;

        let rows = stmt.query_map(params![thread_id], parse_message_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Get a message by its `message_id`
    fn get_message_locked(conn: &Connection, message_id: &str) -> DbResult<Message> {
        conn.query_row(
            "SELECT message_id, thread_id, sequence_id, sender, content, model, useful, created_at
             FROM messages WHERE message_id = ?1",
            params![message_id],
            parse_message_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                DbError::MessageNotFound(message_id.to_string())
            }
            other => DbError::Sqlite(other),
        })
    }

    /// Flip a message's usefulness flag, returning the new value
    pub fn toggle_useful(&self, message_id: &str) -> DbResult<bool> {
        let conn = self.conn.lock().unwrap();

        let updated = conn.execute(
            "UPDATE messages SET useful = NOT useful WHERE message_id = ?1",
            params![message_id],
        )?;
        if updated == 0 {
            return Err(DbError::MessageNotFound(message_id.to_string()));
        }

        conn.query_row(
            "SELECT useful FROM messages WHERE message_id = ?1",
            params![message_id],
            |row| row.get(0),
        )
        .map_err(DbError::from)
    }

    // ==================== Provider Configuration ====================

    /// Register an OpenAI-compatible endpoint
    pub fn create_api(
        &self,
        id: &str,
        name: &str,
        url: &str,
        api_key: &str,
        color: &str,
    ) -> DbResult<ApiConfig> {
        let conn = self.conn.lock().unwrap();
        let now = timestamp_now();

        conn.execute(
            "INSERT INTO apis (id, name, url, api_key, color, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, name, url, api_key, color, format_datetime(&now)],
        )?;

        Ok(ApiConfig {
            id: id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            api_key: api_key.to_string(),
            color: color.to_string(),
            created_at: now,
        })
    }

    /// Get an API configuration by ID
    fn get_api_locked(conn: &Connection, id: &str) -> DbResult<ApiConfig> {
        conn.query_row(
            "SELECT id, name, url, api_key, color, created_at FROM apis WHERE id = ?1",
            params![id],
            parse_api_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::ApiNotFound(id.to_string()),
            other => DbError::Sqlite(other),
        })
    }

    /// List API configurations, newest first
    pub fn list_apis(&self) -> DbResult<Vec<ApiConfig>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, url, api_key, color, created_at FROM apis ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map([], parse_api_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== User Settings ====================

    /// Get a user's provider/model selection, creating the row on first use
    pub fn user_settings(&self, username: &str) -> DbResult<UserSettings> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO users (username) VALUES (?1)",
            params![username],
        )?;

        conn.query_row(
            "SELECT username, selected_api, selected_model_name FROM users WHERE username = ?1",
            params![username],
            |row| {
                Ok(UserSettings {
                    username: row.get(0)?,
                    selected_api: row.get(1)?,
                    selected_model_name: row.get(2)?,
                })
            },
        )
        .map_err(DbError::from)
    }

    /// Select the API and model a user's turns are sent to
    pub fn select_api(
        &self,
        username: &str,
        api_id: &str,
        model_name: &str,
    ) -> DbResult<UserSettings> {
        {
            let conn = self.conn.lock().unwrap();
            Self::get_api_locked(&conn, api_id)?;
            conn.execute(
                "INSERT INTO users (username, selected_api, selected_model_name)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(username) DO UPDATE
                 SET selected_api = excluded.selected_api,
                     selected_model_name = excluded.selected_model_name",
                params![username, api_id, model_name],
            )?;
        }
        self.user_settings(username)
    }

    /// Resolve the user's selected API together with the chosen model name.
    ///
    /// Returns `None` when nothing has been selected yet.
    pub fn selected_api(&self, username: &str) -> DbResult<Option<(ApiConfig, String)>> {
        let conn = self.conn.lock().unwrap();
        let selection: Option<(Option<String>, String)> = conn
            .query_row(
                "SELECT selected_api, selected_model_name FROM users WHERE username = ?1",
                params![username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match selection {
            Some((Some(api_id), model_name)) if !api_id.is_empty() => {
                let api = Self::get_api_locked(&conn, &api_id)?;
                Ok(Some((api, model_name)))
            }
            _ => Ok(None),
        }
    }
}

fn parse_thread_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: row.get(0)?,
        title: row.get(1)?,
        last_message: row.get(2)?,
        last_message_timestamp: row
            .get::<_, Option<String>>(3)?
            .filter(|s| !s.is_empty())
            .map(|s| parse_datetime(&s)),
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn parse_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        message_id: row.get(0)?,
        thread_id: row.get(1)?,
        sequence_id: row.get(2)?,
        sender: Sender::parse(&row.get::<_, String>(3)?),
        content: row.get(4)?,
        model: row.get(5)?,
        useful: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

fn parse_api_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApiConfig> {
    Ok(ApiConfig {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        api_key: row.get(3)?,
        color: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}
