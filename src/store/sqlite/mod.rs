//! SQLite implementation of the store traits.
//!
//! This provides persistent state that survives service restarts.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::{
    CommentUpdate, NewReview, Reminder, ReminderChannel, ReminderStatus, ReminderStore,
    ReminderTiming, ReviewItem, ReviewStatus, ReviewStore, ReviewerRegistry, StoreError,
};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 2;

/// Column list shared by every query that materializes a full review item.
const REVIEW_COLUMNS: &str = "id, title, link, status, submitter_id, submitter_username, \
     chat_id, comment, created_at, updated_at, last_pending_reminder_at, \
     last_need_fix_reminder_at";

/// Column list shared by every query that materializes a full reminder.
const REMINDER_COLUMNS: &str =
    "id, target_username, content, status, timing, interval_minutes, next_remind_at, created_at";

/// SQLite-backed store.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteStore {
    /// Database connection. Exposed as `pub(crate)` for test access to
    /// manipulate timestamps when testing reminder due-filters.
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    ///
    /// Creates the database file and schema if they don't exist, and runs any
    /// pending migrations if the database has an older schema.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for better concurrency and crash safety
    /// - `synchronous = FULL` for maximum durability (survives OS/power failure)
    /// - `busy_timeout = 5000ms` to handle concurrent access gracefully
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();

        // Ensure parent directory exists (unless it's :memory: or empty path)
        let path_str = path_ref.to_string_lossy();
        if path_str != ":memory:" && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;

                    // Set restrictive permissions on the state directory (Unix
                    // only). This protects all database files including the
                    // WAL/SHM files SQLite creates with default umask
                    // permissions.
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let dir_permissions = std::fs::Permissions::from_mode(0o700);
                        if let Err(e) = std::fs::set_permissions(parent, dir_permissions) {
                            warn!(
                                "Failed to set restrictive permissions on state directory: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| StoreError::storage("open database", e.to_string()))?;

        // Set restrictive permissions on the database file (Unix only). The
        // database holds chat ids and message content.
        #[cfg(unix)]
        if path_str != ":memory:" && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // Configure durability settings.
        // We must verify WAL mode was actually enabled - SQLite can silently
        // keep DELETE mode on some filesystems (e.g., network filesystems that
        // don't support shared memory), which would violate our
        // durability/concurrency assumptions.
        //
        // For in-memory databases (:memory:), SQLite returns "memory" as the
        // journal mode, which is expected - there's no durability concern since
        // in-memory databases are ephemeral by design.
        let is_in_memory = path_str == ":memory:";
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));

        if !journal_mode_ok {
            return Err(StoreError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'. \
                     This can happen on filesystems that don't support shared memory \
                     (e.g., some network filesystems). The database requires WAL mode \
                     for durability and concurrency guarantees.",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| StoreError::storage("configure pragmas", e.to_string()))?;

        // Set restrictive permissions on WAL and SHM files (Unix only). SQLite
        // creates these with default umask permissions when WAL mode is
        // enabled; the directory permissions are the primary protection.
        #[cfg(unix)]
        if path_str != ":memory:" && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);

            let wal_path = format!("{}-wal", path_str);
            if std::path::Path::new(&wal_path).exists() {
                if let Err(e) = std::fs::set_permissions(&wal_path, permissions.clone()) {
                    warn!("Failed to set restrictive permissions on WAL file: {}", e);
                }
            }

            let shm_path = format!("{}-shm", path_str);
            if std::path::Path::new(&shm_path).exists() {
                if let Err(e) = std::fs::set_permissions(&shm_path, permissions) {
                    warn!("Failed to set restrictive permissions on SHM file: {}", e);
                }
            }
        }

        // Create schema version table if it doesn't exist
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::storage("create schema_version table", e.to_string()))?;

        // Get current version (0 if table is empty = fresh database)
        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        // Migration from version 0 (fresh database) to version 1: review
        // items and the reviewer registry. The partial unique index backs the
        // active-title uniqueness rule: an approved title may be reused, a
        // pending or needs-fix one may not.
        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS reviews (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    link TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    submitter_id INTEGER NOT NULL,
                    submitter_username TEXT NOT NULL,
                    chat_id INTEGER NOT NULL,
                    comment TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    last_pending_reminder_at INTEGER,
                    last_need_fix_reminder_at INTEGER
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_reviews_active_title
                    ON reviews(title) WHERE status IN ('pending', 'need_fix');
                CREATE INDEX IF NOT EXISTS idx_reviews_status
                    ON reviews(status);
                CREATE INDEX IF NOT EXISTS idx_reviews_chat
                    ON reviews(chat_id, status);

                CREATE TABLE IF NOT EXISTS reviewers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    created_at INTEGER NOT NULL
                );
                "#,
            )
            .map_err(|e| StoreError::storage("migration v1", e.to_string()))?;
        }

        // Migration from version 1 to version 2: personal reminders.
        if from_version < 2 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS reminders (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    target_username TEXT NOT NULL,
                    content TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'draft',
                    timing TEXT,
                    interval_minutes INTEGER,
                    next_remind_at INTEGER,
                    created_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_reminders_due
                    ON reminders(next_remind_at)
                    WHERE status = 'pending' AND next_remind_at IS NOT NULL;
                CREATE INDEX IF NOT EXISTS idx_reminders_target
                    ON reminders(target_username) WHERE status = 'pending';
                "#,
            )
            .map_err(|e| StoreError::storage("migration v2", e.to_string()))?;
        }

        // Update schema version
        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Create a new in-memory SQLite store (for testing).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:")
    }
}

// =============================================================================
// Row decoding helpers
// =============================================================================

/// Raw review row image before status/timestamp decoding.
struct ReviewRow {
    id: i64,
    title: String,
    link: String,
    status: String,
    submitter_id: i64,
    submitter_username: String,
    chat_id: i64,
    comment: Option<String>,
    created_at: i64,
    updated_at: i64,
    last_pending_reminder_at: Option<i64>,
    last_need_fix_reminder_at: Option<i64>,
}

fn read_review_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReviewRow> {
    Ok(ReviewRow {
        id: row.get(0)?,
        title: row.get(1)?,
        link: row.get(2)?,
        status: row.get(3)?,
        submitter_id: row.get(4)?,
        submitter_username: row.get(5)?,
        chat_id: row.get(6)?,
        comment: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        last_pending_reminder_at: row.get(10)?,
        last_need_fix_reminder_at: row.get(11)?,
    })
}

fn decode_review(raw: ReviewRow) -> Result<ReviewItem, StoreError> {
    let status = ReviewStatus::parse(&raw.status).ok_or_else(|| {
        StoreError::corruption(format!(
            "unknown review status '{}' for item {}",
            raw.status, raw.id
        ))
    })?;
    Ok(ReviewItem {
        id: raw.id,
        title: raw.title,
        link: raw.link,
        status,
        submitter_id: raw.submitter_id,
        submitter_username: raw.submitter_username,
        chat_id: raw.chat_id,
        comment: raw.comment,
        created_at: ts(raw.created_at)?,
        updated_at: ts(raw.updated_at)?,
        last_pending_reminder_at: ts_opt(raw.last_pending_reminder_at)?,
        last_need_fix_reminder_at: ts_opt(raw.last_need_fix_reminder_at)?,
    })
}

/// Raw reminder row image before decoding.
struct ReminderRow {
    id: i64,
    target_username: String,
    content: String,
    status: String,
    timing: Option<String>,
    interval_minutes: Option<i64>,
    next_remind_at: Option<i64>,
    created_at: i64,
}

fn read_reminder_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReminderRow> {
    Ok(ReminderRow {
        id: row.get(0)?,
        target_username: row.get(1)?,
        content: row.get(2)?,
        status: row.get(3)?,
        timing: row.get(4)?,
        interval_minutes: row.get(5)?,
        next_remind_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn decode_reminder(raw: ReminderRow) -> Result<Reminder, StoreError> {
    let status = ReminderStatus::parse(&raw.status).ok_or_else(|| {
        StoreError::corruption(format!(
            "unknown reminder status '{}' for reminder {}",
            raw.status, raw.id
        ))
    })?;
    let timing = match raw.timing {
        Some(value) => Some(ReminderTiming::parse(&value).ok_or_else(|| {
            StoreError::corruption(format!(
                "unknown reminder timing '{}' for reminder {}",
                value, raw.id
            ))
        })?),
        None => None,
    };
    Ok(Reminder {
        id: raw.id,
        target_username: raw.target_username,
        content: raw.content,
        status,
        timing,
        interval_minutes: raw.interval_minutes,
        next_remind_at: ts_opt(raw.next_remind_at)?,
        created_at: ts(raw.created_at)?,
    })
}

fn ts(secs: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StoreError::corruption(format!("timestamp {} out of range", secs)))
}

fn ts_opt(secs: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    secs.map(ts).transpose()
}

/// Render a status set as SQL literals for an `IN (...)` clause. The values
/// come from the closed `ReviewStatus` enum, never from user input.
fn status_list_sql(statuses: &[ReviewStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn channel_columns(channel: ReminderChannel) -> (&'static str, &'static str) {
    match channel {
        ReminderChannel::Pending => ("pending", "last_pending_reminder_at"),
        ReminderChannel::NeedFix => ("need_fix", "last_need_fix_reminder_at"),
    }
}

/// Collect a list query, skipping rows that no longer decode instead of
/// failing the whole listing.
fn collect_reviews(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
    operation: &'static str,
) -> Result<Vec<ReviewItem>, StoreError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| StoreError::storage(operation, e.to_string()))?;
    let rows = stmt
        .query_map(params, read_review_row)
        .map_err(|e| StoreError::storage(operation, e.to_string()))?;

    let mut items = Vec::new();
    for row in rows {
        let raw = row.map_err(|e| StoreError::storage(operation, e.to_string()))?;
        match decode_review(raw) {
            Ok(item) => items.push(item),
            Err(e) => warn!("Skipping undecodable review row: {}", e),
        }
    }
    Ok(items)
}

// =============================================================================
// ReviewStore trait implementation
// =============================================================================

#[async_trait]
impl ReviewStore for SqliteStore {
    async fn insert_unless_active_title(
        &self,
        new: NewReview,
    ) -> Result<Option<ReviewItem>, StoreError> {
        let conn = self.conn.clone();
        let now = Utc::now().timestamp();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            // Atomic duplicate check: the insert only happens when no active
            // row holds the title. The partial unique index is the backstop.
            let sql = format!(
                "INSERT INTO reviews (title, link, submitter_id, submitter_username, \
                                      chat_id, status, created_at, updated_at)
                 SELECT ?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6
                 WHERE NOT EXISTS (
                     SELECT 1 FROM reviews
                     WHERE title = ?1 AND status IN ('pending', 'need_fix')
                 )
                 RETURNING {REVIEW_COLUMNS}"
            );
            let raw = conn
                .query_row(
                    &sql,
                    params![
                        new.title,
                        new.link,
                        new.submitter_id,
                        new.submitter_username,
                        new.chat_id,
                        now
                    ],
                    read_review_row,
                )
                .optional()
                .map_err(|e| StoreError::storage("insert review", e.to_string()))?;

            raw.map(decode_review).transpose()
        })
        .await
        .map_err(|e| StoreError::storage("insert review", e.to_string()))?
    }

    async fn get(&self, id: i64) -> Result<Option<ReviewItem>, StoreError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let sql = format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = ?1");
            let raw = conn
                .query_row(&sql, params![id], read_review_row)
                .optional()
                .map_err(|e| StoreError::storage("get review", e.to_string()))?;
            raw.map(decode_review).transpose()
        })
        .await
        .map_err(|e| StoreError::storage("get review", e.to_string()))?
    }

    async fn find_active_by_title(&self, title: &str) -> Result<Option<ReviewItem>, StoreError> {
        let conn = self.conn.clone();
        let title = title.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            // TEXT comparison uses the default BINARY collation, so the match
            // is exact and case-sensitive.
            let sql = format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews
                 WHERE title = ?1 AND status IN ('pending', 'need_fix')"
            );
            let raw = conn
                .query_row(&sql, params![title], read_review_row)
                .optional()
                .map_err(|e| StoreError::storage("find review by title", e.to_string()))?;
            raw.map(decode_review).transpose()
        })
        .await
        .map_err(|e| StoreError::storage("find review by title", e.to_string()))?
    }

    async fn transition(
        &self,
        id: i64,
        expected: &[ReviewStatus],
        new_status: ReviewStatus,
        comment: CommentUpdate,
    ) -> Result<Option<ReviewItem>, StoreError> {
        let conn = self.conn.clone();
        let now = Utc::now().timestamp();
        let expected_list = status_list_sql(expected);

        // Entering a status resets that channel's reminder stamp.
        let stamp_reset = match new_status {
            ReviewStatus::Pending => ", last_pending_reminder_at = NULL",
            ReviewStatus::NeedsFix => ", last_need_fix_reminder_at = NULL",
            ReviewStatus::Approved => "",
        };

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let raw = match comment {
                CommentUpdate::Keep => {
                    let sql = format!(
                        "UPDATE reviews SET status = ?1, updated_at = ?2{stamp_reset}
                         WHERE id = ?3 AND status IN ({expected_list})
                         RETURNING {REVIEW_COLUMNS}"
                    );
                    conn.query_row(&sql, params![new_status.as_str(), now, id], read_review_row)
                }
                CommentUpdate::Assign(value) => {
                    let sql = format!(
                        "UPDATE reviews SET status = ?1, updated_at = ?2, comment = ?4{stamp_reset}
                         WHERE id = ?3 AND status IN ({expected_list})
                         RETURNING {REVIEW_COLUMNS}"
                    );
                    conn.query_row(
                        &sql,
                        params![new_status.as_str(), now, id, value],
                        read_review_row,
                    )
                }
            }
            .optional()
            .map_err(|e| StoreError::storage("transition review", e.to_string()))?;

            raw.map(decode_review).transpose()
        })
        .await
        .map_err(|e| StoreError::storage("transition review", e.to_string()))?
    }

    async fn list_chat_by_status(
        &self,
        chat_id: i64,
        statuses: &[ReviewStatus],
    ) -> Result<Vec<ReviewItem>, StoreError> {
        let conn = self.conn.clone();
        let status_list = status_list_sql(statuses);

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let sql = format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews
                 WHERE chat_id = ?1 AND status IN ({status_list})
                 ORDER BY created_at ASC, id ASC"
            );
            collect_reviews(&conn, &sql, &[&chat_id], "list chat reviews")
        })
        .await
        .map_err(|e| StoreError::storage("list chat reviews", e.to_string()))?
    }

    async fn list_by_status(&self, status: ReviewStatus) -> Result<Vec<ReviewItem>, StoreError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let sql = format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews
                 WHERE status = ?1
                 ORDER BY created_at ASC, id ASC"
            );
            collect_reviews(&conn, &sql, &[&status.as_str()], "list reviews by status")
        })
        .await
        .map_err(|e| StoreError::storage("list reviews by status", e.to_string()))?
    }

    async fn list_all(&self) -> Result<Vec<ReviewItem>, StoreError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let sql = format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews ORDER BY created_at ASC, id ASC"
            );
            collect_reviews(&conn, &sql, &[], "list all reviews")
        })
        .await
        .map_err(|e| StoreError::storage("list all reviews", e.to_string()))?
    }

    async fn due_for_reminder(
        &self,
        channel: ReminderChannel,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ReviewItem>, StoreError> {
        let conn = self.conn.clone();
        let cutoff_secs = cutoff.timestamp();
        let (status, stamp_col) = channel_columns(channel);

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let sql = format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews
                 WHERE status = ?1 AND ({stamp_col} IS NULL OR {stamp_col} <= ?2)
                 ORDER BY created_at ASC, id ASC"
            );
            collect_reviews(
                &conn,
                &sql,
                &[&status, &cutoff_secs],
                "list due reviews",
            )
        })
        .await
        .map_err(|e| StoreError::storage("list due reviews", e.to_string()))?
    }

    async fn mark_reminded(
        &self,
        channel: ReminderChannel,
        ids: &[i64],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        let conn = self.conn.clone();
        let at_secs = at.timestamp();
        let (_, stamp_col) = channel_columns(channel);
        let id_list = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let sql = format!("UPDATE reviews SET {stamp_col} = ?1 WHERE id IN ({id_list})");
            conn.execute(&sql, params![at_secs])
                .map_err(|e| StoreError::storage("mark reminded", e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::storage("mark reminded", e.to_string()))?
    }
}

// =============================================================================
// ReviewerRegistry trait implementation
// =============================================================================

#[async_trait]
impl ReviewerRegistry for SqliteStore {
    async fn add(&self, username: &str) -> Result<bool, StoreError> {
        let conn = self.conn.clone();
        let username = username.to_string();
        let now = Utc::now().timestamp();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let changed = conn
                .execute(
                    "INSERT OR IGNORE INTO reviewers (username, created_at) VALUES (?1, ?2)",
                    params![username, now],
                )
                .map_err(|e| StoreError::storage("add reviewer", e.to_string()))?;
            Ok(changed > 0)
        })
        .await
        .map_err(|e| StoreError::storage("add reviewer", e.to_string()))?
    }

    async fn remove(&self, username: &str) -> Result<bool, StoreError> {
        let conn = self.conn.clone();
        let username = username.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let changed = conn
                .execute(
                    "DELETE FROM reviewers WHERE username = ?1",
                    params![username],
                )
                .map_err(|e| StoreError::storage("remove reviewer", e.to_string()))?;
            Ok(changed > 0)
        })
        .await
        .map_err(|e| StoreError::storage("remove reviewer", e.to_string()))?
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn
                .prepare("SELECT username FROM reviewers ORDER BY username ASC")
                .map_err(|e| StoreError::storage("list reviewers", e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| StoreError::storage("list reviewers", e.to_string()))?;

            let mut usernames = Vec::new();
            for row in rows {
                usernames.push(row.map_err(|e| StoreError::storage("list reviewers", e.to_string()))?);
            }
            Ok(usernames)
        })
        .await
        .map_err(|e| StoreError::storage("list reviewers", e.to_string()))?
    }
}

// =============================================================================
// ReminderStore trait implementation
// =============================================================================

#[async_trait]
impl ReminderStore for SqliteStore {
    async fn create_draft(
        &self,
        target_username: &str,
        content: &str,
    ) -> Result<Reminder, StoreError> {
        let conn = self.conn.clone();
        let target_username = target_username.to_string();
        let content = content.to_string();
        let now = Utc::now().timestamp();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let sql = format!(
                "INSERT INTO reminders (target_username, content, status, created_at)
                 VALUES (?1, ?2, 'draft', ?3)
                 RETURNING {REMINDER_COLUMNS}"
            );
            let raw = conn
                .query_row(&sql, params![target_username, content, now], read_reminder_row)
                .map_err(|e| StoreError::storage("create reminder draft", e.to_string()))?;
            decode_reminder(raw)
        })
        .await
        .map_err(|e| StoreError::storage("create reminder draft", e.to_string()))?
    }

    async fn activate(
        &self,
        id: i64,
        timing: ReminderTiming,
        interval_minutes: Option<i64>,
        next_remind_at: DateTime<Utc>,
    ) -> Result<Option<Reminder>, StoreError> {
        let conn = self.conn.clone();
        let next_secs = next_remind_at.timestamp();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            // Only a draft can be activated; a second callback for the same
            // draft finds no matching row.
            let sql = format!(
                "UPDATE reminders
                 SET status = 'pending', timing = ?1, interval_minutes = ?2, next_remind_at = ?3
                 WHERE id = ?4 AND status = 'draft'
                 RETURNING {REMINDER_COLUMNS}"
            );
            let raw = conn
                .query_row(
                    &sql,
                    params![timing.as_str(), interval_minutes, next_secs, id],
                    read_reminder_row,
                )
                .optional()
                .map_err(|e| StoreError::storage("activate reminder", e.to_string()))?;
            raw.map(decode_reminder).transpose()
        })
        .await
        .map_err(|e| StoreError::storage("activate reminder", e.to_string()))?
    }

    async fn get_reminder(&self, id: i64) -> Result<Option<Reminder>, StoreError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let sql = format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1");
            let raw = conn
                .query_row(&sql, params![id], read_reminder_row)
                .optional()
                .map_err(|e| StoreError::storage("get reminder", e.to_string()))?;
            raw.map(decode_reminder).transpose()
        })
        .await
        .map_err(|e| StoreError::storage("get reminder", e.to_string()))?
    }

    async fn list_pending_for(&self, username: &str) -> Result<Vec<Reminder>, StoreError> {
        let conn = self.conn.clone();
        let username = username.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let sql = format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders
                 WHERE status = 'pending' AND target_username = ?1
                 ORDER BY created_at ASC, id ASC"
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StoreError::storage("list reminders", e.to_string()))?;
            let rows = stmt
                .query_map(params![username], read_reminder_row)
                .map_err(|e| StoreError::storage("list reminders", e.to_string()))?;

            let mut reminders = Vec::new();
            for row in rows {
                let raw = row.map_err(|e| StoreError::storage("list reminders", e.to_string()))?;
                match decode_reminder(raw) {
                    Ok(reminder) => reminders.push(reminder),
                    Err(e) => warn!("Skipping undecodable reminder row: {}", e),
                }
            }
            Ok(reminders)
        })
        .await
        .map_err(|e| StoreError::storage("list reminders", e.to_string()))?
    }

    async fn count_pending(&self) -> Result<usize, StoreError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM reminders WHERE status = 'pending'",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| StoreError::storage("count reminders", e.to_string()))?;
            Ok(count as usize)
        })
        .await
        .map_err(|e| StoreError::storage("count reminders", e.to_string()))?
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>, StoreError> {
        let conn = self.conn.clone();
        let now_secs = now.timestamp();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let sql = format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders
                 WHERE status = 'pending' AND next_remind_at IS NOT NULL
                       AND next_remind_at <= ?1
                 ORDER BY created_at ASC, id ASC"
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StoreError::storage("list due reminders", e.to_string()))?;
            let rows = stmt
                .query_map(params![now_secs], read_reminder_row)
                .map_err(|e| StoreError::storage("list due reminders", e.to_string()))?;

            let mut reminders = Vec::new();
            for row in rows {
                let raw =
                    row.map_err(|e| StoreError::storage("list due reminders", e.to_string()))?;
                match decode_reminder(raw) {
                    Ok(reminder) => reminders.push(reminder),
                    Err(e) => warn!("Skipping undecodable reminder row: {}", e),
                }
            }
            Ok(reminders)
        })
        .await
        .map_err(|e| StoreError::storage("list due reminders", e.to_string()))?
    }

    async fn set_next_remind_at(
        &self,
        id: i64,
        next: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let next_secs = next.map(|at| at.timestamp());

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "UPDATE reminders SET next_remind_at = ?1 WHERE id = ?2",
                params![next_secs, id],
            )
            .map_err(|e| StoreError::storage("set next remind time", e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::storage("set next remind time", e.to_string()))?
    }

    async fn mark_done(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let changed = conn
                .execute(
                    "UPDATE reminders SET status = 'done' WHERE id = ?1 AND status != 'done'",
                    params![id],
                )
                .map_err(|e| StoreError::storage("mark reminder done", e.to_string()))?;
            Ok(changed > 0)
        })
        .await
        .map_err(|e| StoreError::storage("mark reminder done", e.to_string()))?
    }

    async fn delete_stale_drafts(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn.clone();
        let cutoff_secs = cutoff.timestamp();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let removed = conn
                .execute(
                    "DELETE FROM reminders WHERE status = 'draft' AND created_at <= ?1",
                    params![cutoff_secs],
                )
                .map_err(|e| StoreError::storage("delete stale drafts", e.to_string()))?;
            Ok(removed)
        })
        .await
        .map_err(|e| StoreError::storage("delete stale drafts", e.to_string()))?
    }
}
