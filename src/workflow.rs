//! The review request state machine.
//!
//! Every chat command that touches an item funnels through [`ReviewWorkflow`],
//! which owns the legal-transition table:
//!
//! ```text
//! (create) -> PENDING -> APPROVED            (terminal)
//!                |  ^
//!                v  |  (resubmit)
//!             NEEDS_FIX -> NEEDS_FIX         (comment overwritten)
//! ```
//!
//! The workflow never checks state before writing. It asks the store for a
//! conditional transition and interprets "no row matched" after the fact, so
//! two racing commands settle in whichever order the store applies them and
//! the loser gets a precise error instead of clobbering the winner.

use std::fmt;
use std::sync::Arc;

use crate::store::{
    CommentUpdate, NewReview, ReviewItem, ReviewStatus, ReviewStore, StoreError,
};

/// How a command names an existing item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemRef {
    /// Stable row id, used by inline keyboard callbacks.
    ById(i64),
    /// Exact, case-sensitive title. Only resolves among active items, so an
    /// approved item never shadows a new request that reuses its title.
    ByTitle(String),
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemRef::ById(id) => write!(f, "#{}", id),
            ItemRef::ByTitle(title) => write!(f, "'{}'", title),
        }
    }
}

/// Why a workflow operation was refused.
///
/// All variants are recoverable: the caller reports them to the chat and the
/// service keeps running.
#[derive(Debug)]
pub enum WorkflowError {
    /// The reference matched no item (or no active item, for titles).
    NotFound,
    /// An active item already holds the requested title.
    DuplicateTitle,
    /// The item exists but its current status forbids the transition.
    InvalidState { status: ReviewStatus },
    /// The store could not execute the operation.
    Store(StoreError),
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::NotFound => write!(f, "no matching review request"),
            WorkflowError::DuplicateTitle => {
                write!(f, "an active review request already holds this title")
            }
            WorkflowError::InvalidState { status } => {
                write!(f, "review request is already {}", status)
            }
            WorkflowError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl std::error::Error for WorkflowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkflowError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(e: StoreError) -> Self {
        WorkflowError::Store(e)
    }
}

/// All items grouped by status, oldest first within each group.
#[derive(Debug, Default)]
pub struct GroupedReviews {
    pub pending: Vec<ReviewItem>,
    pub needs_fix: Vec<ReviewItem>,
    pub approved: Vec<ReviewItem>,
}

/// Command-side engine over the review store.
pub struct ReviewWorkflow {
    store: Arc<dyn ReviewStore>,
}

impl ReviewWorkflow {
    pub fn new(store: Arc<dyn ReviewStore>) -> Self {
        Self { store }
    }

    /// Register a single review request.
    ///
    /// Fails with [`WorkflowError::DuplicateTitle`] when an active item (in
    /// either `PENDING` or `NEEDS_FIX`) already holds the title. Approved
    /// items do not block reuse.
    pub async fn create(&self, new: NewReview) -> Result<ReviewItem, WorkflowError> {
        match self.store.insert_unless_active_title(new).await? {
            Some(item) => Ok(item),
            None => Err(WorkflowError::DuplicateTitle),
        }
    }

    /// Register a batch of review requests, one result per request.
    ///
    /// A rejected line (duplicate title, store hiccup) never blocks the lines
    /// after it; the caller reports the per-line outcomes together.
    pub async fn create_batch(
        &self,
        requests: Vec<NewReview>,
    ) -> Vec<Result<ReviewItem, WorkflowError>> {
        let mut results = Vec::with_capacity(requests.len());
        for new in requests {
            results.push(self.create(new).await);
        }
        results
    }

    /// Pending items of one chat, oldest first. Feeds the selection keyboard.
    pub async fn select_pending(&self, chat_id: i64) -> Result<Vec<ReviewItem>, WorkflowError> {
        Ok(self
            .store
            .list_chat_by_status(chat_id, &[ReviewStatus::Pending])
            .await?)
    }

    /// Approve a pending item. `APPROVED` is terminal.
    pub async fn approve(&self, reference: &ItemRef) -> Result<ReviewItem, WorkflowError> {
        let item = self.resolve(reference).await?;
        self.transition(
            item.id,
            &[ReviewStatus::Pending],
            ReviewStatus::Approved,
            CommentUpdate::Keep,
        )
        .await
    }

    /// Flag a pending item for fixes, or overwrite the comment on one that is
    /// already flagged. `comment: None` overwrites an old comment with nothing.
    pub async fn mark_need_fix(
        &self,
        reference: &ItemRef,
        comment: Option<String>,
    ) -> Result<ReviewItem, WorkflowError> {
        let item = self.resolve(reference).await?;
        self.transition(
            item.id,
            &[ReviewStatus::Pending, ReviewStatus::NeedsFix],
            ReviewStatus::NeedsFix,
            CommentUpdate::Assign(comment),
        )
        .await
    }

    /// Send a flagged item back to review. Clears the fix comment; the item
    /// keeps its original creation time and with it its place in the
    /// oldest-first queue.
    pub async fn resubmit(&self, reference: &ItemRef) -> Result<ReviewItem, WorkflowError> {
        let item = self.resolve(reference).await?;
        self.transition(
            item.id,
            &[ReviewStatus::NeedsFix],
            ReviewStatus::Pending,
            CommentUpdate::Assign(None),
        )
        .await
    }

    /// Every item ever registered, grouped by status.
    pub async fn list_all_grouped(&self) -> Result<GroupedReviews, WorkflowError> {
        let mut grouped = GroupedReviews::default();
        for item in self.store.list_all().await? {
            match item.status {
                ReviewStatus::Pending => grouped.pending.push(item),
                ReviewStatus::NeedsFix => grouped.needs_fix.push(item),
                ReviewStatus::Approved => grouped.approved.push(item),
            }
        }
        Ok(grouped)
    }

    /// Resolve a reference to the item it names right now.
    ///
    /// Ids resolve regardless of status (a stale keyboard callback should
    /// report "already approved", not "not found"). Titles resolve among
    /// active items only.
    pub async fn resolve(&self, reference: &ItemRef) -> Result<ReviewItem, WorkflowError> {
        let found = match reference {
            ItemRef::ById(id) => self.store.get(*id).await?,
            ItemRef::ByTitle(title) => self.store.find_active_by_title(title).await?,
        };
        found.ok_or(WorkflowError::NotFound)
    }

    /// Run a conditional transition and turn "no row matched" into a precise
    /// error by re-reading the loser's view of the item.
    async fn transition(
        &self,
        id: i64,
        expected: &[ReviewStatus],
        new_status: ReviewStatus,
        comment: CommentUpdate,
    ) -> Result<ReviewItem, WorkflowError> {
        if let Some(item) = self
            .store
            .transition(id, expected, new_status, comment)
            .await?
        {
            return Ok(item);
        }

        // The conditional update matched nothing: either the item changed
        // status under us or the id never existed.
        match self.store.get(id).await? {
            Some(item) => Err(WorkflowError::InvalidState {
                status: item.status,
            }),
            None => Err(WorkflowError::NotFound),
        }
    }
}
