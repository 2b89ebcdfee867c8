//! Storage abstraction for review items, reviewers, and personal reminders.
//!
//! This module defines the store traits the workflow engine and scheduler are
//! built against. Implementations provide the actual backend: `SqliteStore`
//! for durable state, `MemoryStore` for tests.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Lifecycle state of a review item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    NeedsFix,
    Approved,
}

impl ReviewStatus {
    /// Statuses whose titles take part in the uniqueness check. An approved
    /// title may be reused; a pending or needs-fix one may not.
    pub const ACTIVE: [ReviewStatus; 2] = [ReviewStatus::Pending, ReviewStatus::NeedsFix];

    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::NeedsFix => "need_fix",
            ReviewStatus::Approved => "approved",
        }
    }

    pub fn parse(s: &str) -> Option<ReviewStatus> {
        match s {
            "pending" => Some(ReviewStatus::Pending),
            "need_fix" => Some(ReviewStatus::NeedsFix),
            "approved" => Some(ReviewStatus::Approved),
            _ => None,
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked review request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewItem {
    pub id: i64,
    /// Display name; unique among active items, used as the command lookup key.
    pub title: String,
    pub link: String,
    pub submitter_id: i64,
    pub submitter_username: String,
    /// Chat the item was created in; list/notify replies are routed here.
    pub chat_id: i64,
    pub status: ReviewStatus,
    /// Set when flagged needs-fix, cleared on resubmission.
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last time this item appeared in a pending-channel reminder.
    pub last_pending_reminder_at: Option<DateTime<Utc>>,
    /// Last time this item appeared in a need-fix-channel reminder.
    pub last_need_fix_reminder_at: Option<DateTime<Utc>>,
}

/// Fields supplied when creating a review item.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReview {
    pub title: String,
    pub link: String,
    pub submitter_id: i64,
    pub submitter_username: String,
    pub chat_id: i64,
}

/// The two scheduled reminder channels, each with its own per-item stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderChannel {
    /// Reviewers are nagged about `PENDING` items.
    Pending,
    /// Submitters are nagged about `NEEDS_FIX` items.
    NeedFix,
}

impl ReminderChannel {
    /// The status whose items the channel reminds about.
    pub fn status(&self) -> ReviewStatus {
        match self {
            ReminderChannel::Pending => ReviewStatus::Pending,
            ReminderChannel::NeedFix => ReviewStatus::NeedsFix,
        }
    }
}

/// How a transition treats the stored comment.
#[derive(Debug, Clone, PartialEq)]
pub enum CommentUpdate {
    /// Leave the existing comment untouched.
    Keep,
    /// Replace the comment; `None` clears it.
    Assign(Option<String>),
}

/// Lifecycle state of a personal reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderStatus {
    /// Created, schedule not chosen yet; never fires.
    Draft,
    /// Live. Fires while `next_remind_at` is set.
    Pending,
    /// Acknowledged via `/remind_done`.
    Done,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Draft => "draft",
            ReminderStatus::Pending => "pending",
            ReminderStatus::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<ReminderStatus> {
        match s {
            "draft" => Some(ReminderStatus::Draft),
            "pending" => Some(ReminderStatus::Pending),
            "done" => Some(ReminderStatus::Done),
            _ => None,
        }
    }
}

/// Whether a personal reminder fires once or repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderTiming {
    Once,
    Periodic,
}

impl ReminderTiming {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderTiming::Once => "once",
            ReminderTiming::Periodic => "periodic",
        }
    }

    pub fn parse(s: &str) -> Option<ReminderTiming> {
        match s {
            "once" => Some(ReminderTiming::Once),
            "periodic" => Some(ReminderTiming::Periodic),
            _ => None,
        }
    }
}

/// An ad-hoc timed note for a teammate, unrelated to any review item.
#[derive(Debug, Clone, PartialEq)]
pub struct Reminder {
    pub id: i64,
    pub target_username: String,
    pub content: String,
    pub status: ReminderStatus,
    /// Unset while the reminder is a draft.
    pub timing: Option<ReminderTiming>,
    pub interval_minutes: Option<i64>,
    pub next_remind_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Error from a storage backend.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The backend failed to execute an operation.
    Storage { operation: String, message: String },
    /// A persisted row could not be decoded.
    Corruption { message: String },
}

impl StoreError {
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        StoreError::Corruption {
            message: message.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Storage { operation, message } => {
                write!(f, "storage operation '{}' failed: {}", operation, message)
            }
            StoreError::Corruption { message } => {
                write!(f, "corrupt stored data: {}", message)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Repository of review items.
///
/// Implementations are pure data access. Status policy (which transitions are
/// legal, what counts as a duplicate) lives in the workflow engine, which
/// expresses it through the conditional operations below; the conditions are
/// applied atomically so concurrent commands cannot interleave between a check
/// and its write.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Insert a new `PENDING` item unless an active item already holds the
    /// title (exact, case-sensitive match).
    ///
    /// Returns `None` when the title is taken. The check and the insert are a
    /// single atomic step.
    async fn insert_unless_active_title(
        &self,
        new: NewReview,
    ) -> Result<Option<ReviewItem>, StoreError>;

    /// Fetch a single item by id.
    async fn get(&self, id: i64) -> Result<Option<ReviewItem>, StoreError>;

    /// Exact, case-sensitive title lookup among active items.
    async fn find_active_by_title(&self, title: &str) -> Result<Option<ReviewItem>, StoreError>;

    /// Conditionally transition an item.
    ///
    /// The update only applies while the row's status is one of `expected`;
    /// `None` means it was not (or the id is gone), and nothing changed.
    /// A successful transition refreshes `updated_at` and clears the reminder
    /// stamp of the channel belonging to `new_status`, so the item is due at
    /// the next tick of that channel.
    async fn transition(
        &self,
        id: i64,
        expected: &[ReviewStatus],
        new_status: ReviewStatus,
        comment: CommentUpdate,
    ) -> Result<Option<ReviewItem>, StoreError>;

    /// Items in one chat with one of the given statuses, oldest first.
    async fn list_chat_by_status(
        &self,
        chat_id: i64,
        statuses: &[ReviewStatus],
    ) -> Result<Vec<ReviewItem>, StoreError>;

    /// Items with the given status across every chat, oldest first.
    async fn list_by_status(&self, status: ReviewStatus) -> Result<Vec<ReviewItem>, StoreError>;

    /// Every item across every chat, oldest first.
    async fn list_all(&self) -> Result<Vec<ReviewItem>, StoreError>;

    /// Items in the channel's status whose stamp is unset or at/before
    /// `cutoff`, oldest first.
    async fn due_for_reminder(
        &self,
        channel: ReminderChannel,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ReviewItem>, StoreError>;

    /// Record that the given items were included in a channel reminder at `at`.
    async fn mark_reminded(
        &self,
        channel: ReminderChannel,
        ids: &[i64],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Registry of reviewer identities.
#[async_trait]
pub trait ReviewerRegistry: Send + Sync {
    /// Add a reviewer. Returns `false` when the username was already present.
    async fn add(&self, username: &str) -> Result<bool, StoreError>;

    /// Remove a reviewer. Returns `false` when the username was not present.
    async fn remove(&self, username: &str) -> Result<bool, StoreError>;

    /// All reviewer usernames, sorted for deterministic display.
    async fn list(&self) -> Result<Vec<String>, StoreError>;
}

/// Repository of personal reminders.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Store a new `DRAFT` reminder awaiting schedule selection.
    async fn create_draft(
        &self,
        target_username: &str,
        content: &str,
    ) -> Result<Reminder, StoreError>;

    /// Activate a draft: set timing and first fire time, move to `PENDING`.
    ///
    /// Returns `None` when the id does not name a draft (already activated,
    /// done, swept away, or never existed). The draft check and the update are
    /// a single atomic step.
    async fn activate(
        &self,
        id: i64,
        timing: ReminderTiming,
        interval_minutes: Option<i64>,
        next_remind_at: DateTime<Utc>,
    ) -> Result<Option<Reminder>, StoreError>;

    /// Fetch a single reminder by id.
    async fn get_reminder(&self, id: i64) -> Result<Option<Reminder>, StoreError>;

    /// `PENDING` reminders targeting a username, oldest first.
    async fn list_pending_for(&self, username: &str) -> Result<Vec<Reminder>, StoreError>;

    /// Number of `PENDING` reminders across all users.
    async fn count_pending(&self) -> Result<usize, StoreError>;

    /// `PENDING` reminders whose fire time is set and at/before `now`, oldest
    /// first.
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>, StoreError>;

    /// Set (or clear) a reminder's next fire time.
    async fn set_next_remind_at(
        &self,
        id: i64,
        next: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Mark a reminder `DONE`. Returns `false` when it was already done or
    /// missing.
    async fn mark_done(&self, id: i64) -> Result<bool, StoreError>;

    /// Delete drafts created at or before `cutoff`, returning the count.
    async fn delete_stale_drafts(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}
