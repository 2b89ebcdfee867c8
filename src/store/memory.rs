//! In-memory implementation of the store traits.
//!
//! All state is held in memory and lost on restart. Used by tests and as a
//! scratch backend for local experiments.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    CommentUpdate, NewReview, Reminder, ReminderChannel, ReminderStatus, ReminderStore,
    ReminderTiming, ReviewItem, ReviewStatus, ReviewStore, ReviewerRegistry, StoreError,
};

/// In-memory store.
///
/// Review items and reminders live in `HashMap`s behind `RwLock`s; ids come
/// from atomic counters. Reviewers are a `BTreeSet` so listing is already
/// sorted.
pub struct MemoryStore {
    reviews: RwLock<HashMap<i64, ReviewItem>>,
    reviewers: RwLock<BTreeSet<String>>,
    reminders: RwLock<HashMap<i64, Reminder>>,
    next_review_id: AtomicI64,
    next_reminder_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            reviews: RwLock::new(HashMap::new()),
            reviewers: RwLock::new(BTreeSet::new()),
            reminders: RwLock::new(HashMap::new()),
            next_review_id: AtomicI64::new(1),
            next_reminder_id: AtomicI64::new(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Oldest first, with the id as a stable tiebreak for equal timestamps.
fn sort_oldest_first(items: &mut [ReviewItem]) {
    items.sort_by_key(|item| (item.created_at, item.id));
}

fn stamp(item: &ReviewItem, channel: ReminderChannel) -> Option<DateTime<Utc>> {
    match channel {
        ReminderChannel::Pending => item.last_pending_reminder_at,
        ReminderChannel::NeedFix => item.last_need_fix_reminder_at,
    }
}

fn set_stamp(item: &mut ReviewItem, channel: ReminderChannel, value: Option<DateTime<Utc>>) {
    match channel {
        ReminderChannel::Pending => item.last_pending_reminder_at = value,
        ReminderChannel::NeedFix => item.last_need_fix_reminder_at = value,
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn insert_unless_active_title(
        &self,
        new: NewReview,
    ) -> Result<Option<ReviewItem>, StoreError> {
        let mut reviews = self.reviews.write().await;
        let taken = reviews
            .values()
            .any(|item| ReviewStatus::ACTIVE.contains(&item.status) && item.title == new.title);
        if taken {
            return Ok(None);
        }

        let now = Utc::now();
        let id = self.next_review_id.fetch_add(1, Ordering::SeqCst);
        let item = ReviewItem {
            id,
            title: new.title,
            link: new.link,
            submitter_id: new.submitter_id,
            submitter_username: new.submitter_username,
            chat_id: new.chat_id,
            status: ReviewStatus::Pending,
            comment: None,
            created_at: now,
            updated_at: now,
            last_pending_reminder_at: None,
            last_need_fix_reminder_at: None,
        };
        reviews.insert(id, item.clone());
        Ok(Some(item))
    }

    async fn get(&self, id: i64) -> Result<Option<ReviewItem>, StoreError> {
        let reviews = self.reviews.read().await;
        Ok(reviews.get(&id).cloned())
    }

    async fn find_active_by_title(&self, title: &str) -> Result<Option<ReviewItem>, StoreError> {
        let reviews = self.reviews.read().await;
        Ok(reviews
            .values()
            .find(|item| ReviewStatus::ACTIVE.contains(&item.status) && item.title == title)
            .cloned())
    }

    async fn transition(
        &self,
        id: i64,
        expected: &[ReviewStatus],
        new_status: ReviewStatus,
        comment: CommentUpdate,
    ) -> Result<Option<ReviewItem>, StoreError> {
        let mut reviews = self.reviews.write().await;
        let Some(item) = reviews.get_mut(&id) else {
            return Ok(None);
        };
        if !expected.contains(&item.status) {
            return Ok(None);
        }

        item.status = new_status;
        if let CommentUpdate::Assign(value) = comment {
            item.comment = value;
        }
        item.updated_at = Utc::now();
        // The item re-enters this channel's queue as if freshly created.
        match new_status {
            ReviewStatus::Pending => set_stamp(item, ReminderChannel::Pending, None),
            ReviewStatus::NeedsFix => set_stamp(item, ReminderChannel::NeedFix, None),
            ReviewStatus::Approved => {}
        }
        Ok(Some(item.clone()))
    }

    async fn list_chat_by_status(
        &self,
        chat_id: i64,
        statuses: &[ReviewStatus],
    ) -> Result<Vec<ReviewItem>, StoreError> {
        let reviews = self.reviews.read().await;
        let mut items: Vec<ReviewItem> = reviews
            .values()
            .filter(|item| item.chat_id == chat_id && statuses.contains(&item.status))
            .cloned()
            .collect();
        sort_oldest_first(&mut items);
        Ok(items)
    }

    async fn list_by_status(&self, status: ReviewStatus) -> Result<Vec<ReviewItem>, StoreError> {
        let reviews = self.reviews.read().await;
        let mut items: Vec<ReviewItem> = reviews
            .values()
            .filter(|item| item.status == status)
            .cloned()
            .collect();
        sort_oldest_first(&mut items);
        Ok(items)
    }

    async fn list_all(&self) -> Result<Vec<ReviewItem>, StoreError> {
        let reviews = self.reviews.read().await;
        let mut items: Vec<ReviewItem> = reviews.values().cloned().collect();
        sort_oldest_first(&mut items);
        Ok(items)
    }

    async fn due_for_reminder(
        &self,
        channel: ReminderChannel,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ReviewItem>, StoreError> {
        let reviews = self.reviews.read().await;
        let mut items: Vec<ReviewItem> = reviews
            .values()
            .filter(|item| {
                item.status == channel.status()
                    && stamp(item, channel).is_none_or(|at| at <= cutoff)
            })
            .cloned()
            .collect();
        sort_oldest_first(&mut items);
        Ok(items)
    }

    async fn mark_reminded(
        &self,
        channel: ReminderChannel,
        ids: &[i64],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut reviews = self.reviews.write().await;
        for id in ids {
            if let Some(item) = reviews.get_mut(id) {
                set_stamp(item, channel, Some(at));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ReviewerRegistry for MemoryStore {
    async fn add(&self, username: &str) -> Result<bool, StoreError> {
        let mut reviewers = self.reviewers.write().await;
        Ok(reviewers.insert(username.to_string()))
    }

    async fn remove(&self, username: &str) -> Result<bool, StoreError> {
        let mut reviewers = self.reviewers.write().await;
        Ok(reviewers.remove(username))
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let reviewers = self.reviewers.read().await;
        Ok(reviewers.iter().cloned().collect())
    }
}

#[async_trait]
impl ReminderStore for MemoryStore {
    async fn create_draft(
        &self,
        target_username: &str,
        content: &str,
    ) -> Result<Reminder, StoreError> {
        let mut reminders = self.reminders.write().await;
        let id = self.next_reminder_id.fetch_add(1, Ordering::SeqCst);
        let reminder = Reminder {
            id,
            target_username: target_username.to_string(),
            content: content.to_string(),
            status: ReminderStatus::Draft,
            timing: None,
            interval_minutes: None,
            next_remind_at: None,
            created_at: Utc::now(),
        };
        reminders.insert(id, reminder.clone());
        Ok(reminder)
    }

    async fn activate(
        &self,
        id: i64,
        timing: ReminderTiming,
        interval_minutes: Option<i64>,
        next_remind_at: DateTime<Utc>,
    ) -> Result<Option<Reminder>, StoreError> {
        let mut reminders = self.reminders.write().await;
        let Some(reminder) = reminders.get_mut(&id) else {
            return Ok(None);
        };
        if reminder.status != ReminderStatus::Draft {
            return Ok(None);
        }

        reminder.status = ReminderStatus::Pending;
        reminder.timing = Some(timing);
        reminder.interval_minutes = interval_minutes;
        reminder.next_remind_at = Some(next_remind_at);
        Ok(Some(reminder.clone()))
    }

    async fn get_reminder(&self, id: i64) -> Result<Option<Reminder>, StoreError> {
        let reminders = self.reminders.read().await;
        Ok(reminders.get(&id).cloned())
    }

    async fn list_pending_for(&self, username: &str) -> Result<Vec<Reminder>, StoreError> {
        let reminders = self.reminders.read().await;
        let mut due: Vec<Reminder> = reminders
            .values()
            .filter(|r| r.status == ReminderStatus::Pending && r.target_username == username)
            .cloned()
            .collect();
        due.sort_by_key(|r| (r.created_at, r.id));
        Ok(due)
    }

    async fn count_pending(&self) -> Result<usize, StoreError> {
        let reminders = self.reminders.read().await;
        Ok(reminders
            .values()
            .filter(|r| r.status == ReminderStatus::Pending)
            .count())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>, StoreError> {
        let reminders = self.reminders.read().await;
        let mut due: Vec<Reminder> = reminders
            .values()
            .filter(|r| {
                r.status == ReminderStatus::Pending
                    && r.next_remind_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|r| (r.created_at, r.id));
        Ok(due)
    }

    async fn set_next_remind_at(
        &self,
        id: i64,
        next: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut reminders = self.reminders.write().await;
        if let Some(reminder) = reminders.get_mut(&id) {
            reminder.next_remind_at = next;
        }
        Ok(())
    }

    async fn mark_done(&self, id: i64) -> Result<bool, StoreError> {
        let mut reminders = self.reminders.write().await;
        match reminders.get_mut(&id) {
            Some(reminder) if reminder.status != ReminderStatus::Done => {
                reminder.status = ReminderStatus::Done;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_stale_drafts(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut reminders = self.reminders.write().await;
        let initial_len = reminders.len();
        reminders.retain(|_, r| !(r.status == ReminderStatus::Draft && r.created_at <= cutoff));
        Ok(initial_len - reminders.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn new_review(title: &str) -> NewReview {
        NewReview {
            title: title.to_string(),
            link: "https://example.com/doc".to_string(),
            submitter_id: 11,
            submitter_username: "alice".to_string(),
            chat_id: -1001,
        }
    }

    #[tokio::test]
    async fn test_insert_then_get() {
        let store = MemoryStore::new();
        let item = store
            .insert_unless_active_title(new_review("Q3 report"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(item.status, ReviewStatus::Pending);
        assert!(item.comment.is_none());

        let fetched = store.get(item.id).await.unwrap();
        assert_eq!(fetched, Some(item));
    }

    #[tokio::test]
    async fn test_duplicate_title_rejected_while_active() {
        let store = MemoryStore::new();
        store
            .insert_unless_active_title(new_review("Q3 report"))
            .await
            .unwrap()
            .unwrap();

        let second = store
            .insert_unless_active_title(new_review("Q3 report"))
            .await
            .unwrap();
        assert!(second.is_none(), "active title must not be reusable");
    }

    #[tokio::test]
    async fn test_title_reusable_after_approval() {
        let store = MemoryStore::new();
        let item = store
            .insert_unless_active_title(new_review("Q3 report"))
            .await
            .unwrap()
            .unwrap();

        store
            .transition(
                item.id,
                &[ReviewStatus::Pending],
                ReviewStatus::Approved,
                CommentUpdate::Keep,
            )
            .await
            .unwrap()
            .unwrap();

        let again = store
            .insert_unless_active_title(new_review("Q3 report"))
            .await
            .unwrap();
        assert!(again.is_some(), "approved titles leave the active set");
    }

    #[tokio::test]
    async fn test_transition_from_unexpected_state_is_rejected() {
        let store = MemoryStore::new();
        let item = store
            .insert_unless_active_title(new_review("Q3 report"))
            .await
            .unwrap()
            .unwrap();

        // NEEDS_FIX -> PENDING while the item is still PENDING: no match.
        let result = store
            .transition(
                item.id,
                &[ReviewStatus::NeedsFix],
                ReviewStatus::Pending,
                CommentUpdate::Assign(None),
            )
            .await
            .unwrap();
        assert!(result.is_none());

        let unchanged = store.get(item.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, ReviewStatus::Pending);
    }

    #[tokio::test]
    async fn test_transition_assigns_and_clears_comment() {
        let store = MemoryStore::new();
        let item = store
            .insert_unless_active_title(new_review("Q3 report"))
            .await
            .unwrap()
            .unwrap();

        let flagged = store
            .transition(
                item.id,
                &[ReviewStatus::Pending, ReviewStatus::NeedsFix],
                ReviewStatus::NeedsFix,
                CommentUpdate::Assign(Some("wrong date".to_string())),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(flagged.comment.as_deref(), Some("wrong date"));

        let resubmitted = store
            .transition(
                item.id,
                &[ReviewStatus::NeedsFix],
                ReviewStatus::Pending,
                CommentUpdate::Assign(None),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resubmitted.status, ReviewStatus::Pending);
        assert!(resubmitted.comment.is_none());
    }

    #[tokio::test]
    async fn test_transition_clears_entered_channel_stamp() {
        let store = MemoryStore::new();
        let item = store
            .insert_unless_active_title(new_review("Q3 report"))
            .await
            .unwrap()
            .unwrap();

        let now = Utc::now();
        store
            .mark_reminded(ReminderChannel::Pending, &[item.id], now)
            .await
            .unwrap();

        store
            .transition(
                item.id,
                &[ReviewStatus::Pending],
                ReviewStatus::NeedsFix,
                CommentUpdate::Assign(None),
            )
            .await
            .unwrap()
            .unwrap();
        let back = store
            .transition(
                item.id,
                &[ReviewStatus::NeedsFix],
                ReviewStatus::Pending,
                CommentUpdate::Assign(None),
            )
            .await
            .unwrap()
            .unwrap();

        assert!(
            back.last_pending_reminder_at.is_none(),
            "re-entering PENDING must reset the pending channel stamp"
        );
    }

    #[tokio::test]
    async fn test_due_for_reminder_filters_by_stamp() {
        let store = MemoryStore::new();
        let reminded = store
            .insert_unless_active_title(new_review("reminded"))
            .await
            .unwrap()
            .unwrap();
        let fresh = store
            .insert_unless_active_title(new_review("fresh"))
            .await
            .unwrap()
            .unwrap();

        let now = Utc::now();
        store
            .mark_reminded(ReminderChannel::Pending, &[reminded.id], now)
            .await
            .unwrap();

        // Cutoff one hour back: the just-reminded item is not due, the
        // never-reminded one is.
        let due = store
            .due_for_reminder(ReminderChannel::Pending, now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, fresh.id);
    }

    #[tokio::test]
    async fn test_list_chat_by_status_scopes_to_chat() {
        let store = MemoryStore::new();
        store
            .insert_unless_active_title(new_review("here"))
            .await
            .unwrap()
            .unwrap();
        let mut elsewhere = new_review("elsewhere");
        elsewhere.chat_id = -2002;
        store
            .insert_unless_active_title(elsewhere)
            .await
            .unwrap()
            .unwrap();

        let items = store
            .list_chat_by_status(-1001, &[ReviewStatus::Pending])
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "here");
    }

    #[tokio::test]
    async fn test_reviewer_add_is_idempotent_remove_is_not() {
        let store = MemoryStore::new();
        assert!(store.add("alice").await.unwrap());
        assert!(!store.add("alice").await.unwrap());

        assert_eq!(
            ReviewerRegistry::list(&store).await.unwrap(),
            vec!["alice".to_string()]
        );

        assert!(store.remove("alice").await.unwrap());
        assert!(!store.remove("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_reminder_draft_activate_due_flow() {
        let store = MemoryStore::new();
        let draft = store.create_draft("bob", "water the plants").await.unwrap();
        assert_eq!(draft.status, ReminderStatus::Draft);
        assert_eq!(store.count_pending().await.unwrap(), 0);

        let now = Utc::now();
        // Drafts never fire, no matter how far the clock advances.
        assert!(store.due(now + Duration::days(30)).await.unwrap().is_empty());

        let fire_at = now + Duration::hours(1);
        let active = store
            .activate(draft.id, ReminderTiming::Once, None, fire_at)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.status, ReminderStatus::Pending);
        assert_eq!(active.next_remind_at, Some(fire_at));

        // A draft can only be activated once.
        let replay = store
            .activate(draft.id, ReminderTiming::Once, None, fire_at)
            .await
            .unwrap();
        assert!(replay.is_none());

        assert_eq!(store.due(fire_at).await.unwrap().len(), 1);
        assert!(store.due(fire_at - Duration::minutes(1)).await.unwrap().is_empty());

        // A fired one-shot keeps PENDING with no fire time: listed, not due.
        store.set_next_remind_at(draft.id, None).await.unwrap();
        assert!(store.due(fire_at).await.unwrap().is_empty());
        assert_eq!(store.list_pending_for("bob").await.unwrap().len(), 1);
        assert_eq!(store.count_pending().await.unwrap(), 1);

        assert!(store.mark_done(draft.id).await.unwrap());
        assert!(!store.mark_done(draft.id).await.unwrap());
        assert!(store.list_pending_for("bob").await.unwrap().is_empty());
        assert_eq!(store.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_stale_drafts_leaves_active_reminders() {
        let store = MemoryStore::new();
        let stale = store.create_draft("bob", "old draft").await.unwrap();
        let kept = store.create_draft("bob", "new draft").await.unwrap();
        store
            .activate(kept.id, ReminderTiming::Once, None, Utc::now())
            .await
            .unwrap()
            .unwrap();

        let removed = store.delete_stale_drafts(Utc::now()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_reminder(stale.id).await.unwrap().is_none());
        assert!(store.get_reminder(kept.id).await.unwrap().is_some());
    }

    // =========================================================================
    // Property-based tests
    // =========================================================================

    /// Generate an arbitrary review status.
    fn arb_status() -> impl Strategy<Value = ReviewStatus> {
        prop_oneof![
            Just(ReviewStatus::Pending),
            Just(ReviewStatus::NeedsFix),
            Just(ReviewStatus::Approved),
        ]
    }

    /// Drive an item into `status` through the public transition API.
    async fn place_in_status(store: &MemoryStore, id: i64, status: ReviewStatus) {
        match status {
            ReviewStatus::Pending => {}
            ReviewStatus::NeedsFix => {
                store
                    .transition(
                        id,
                        &[ReviewStatus::Pending],
                        ReviewStatus::NeedsFix,
                        CommentUpdate::Assign(None),
                    )
                    .await
                    .unwrap()
                    .unwrap();
            }
            ReviewStatus::Approved => {
                store
                    .transition(
                        id,
                        &[ReviewStatus::Pending],
                        ReviewStatus::Approved,
                        CommentUpdate::Keep,
                    )
                    .await
                    .unwrap()
                    .unwrap();
            }
        }
    }

    proptest! {
        /// Property: due_for_reminder returns exactly the items in the
        /// channel's status whose stamp is unset or at/before the cutoff,
        /// oldest first.
        #[test]
        fn due_filter_matches_status_and_stamp(
            specs in proptest::collection::vec((arb_status(), proptest::option::of(any::<bool>())), 0..20)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            rt.block_on(async {
                let store = MemoryStore::new();
                let cutoff = Utc::now();

                let mut expected: Vec<i64> = Vec::new();
                for (i, (status, stamped_before_cutoff)) in specs.iter().enumerate() {
                    let item = store
                        .insert_unless_active_title(new_review(&format!("item {}", i)))
                        .await
                        .unwrap()
                        .unwrap();
                    place_in_status(&store, item.id, *status).await;

                    // Stamp the pending channel (the one under test) where the
                    // spec asks for it, before or after the cutoff.
                    if let Some(before) = stamped_before_cutoff {
                        let at = if *before {
                            cutoff - Duration::minutes(5)
                        } else {
                            cutoff + Duration::minutes(5)
                        };
                        store
                            .mark_reminded(ReminderChannel::Pending, &[item.id], at)
                            .await
                            .unwrap();
                    }

                    let due = *status == ReviewStatus::Pending
                        && stamped_before_cutoff.is_none_or(|before| before);
                    if due {
                        expected.push(item.id);
                    }
                }

                let due_ids: Vec<i64> = store
                    .due_for_reminder(ReminderChannel::Pending, cutoff)
                    .await
                    .unwrap()
                    .iter()
                    .map(|item| item.id)
                    .collect();

                // Insertion order is creation order, so the expected list is
                // already oldest first.
                assert_eq!(due_ids, expected);
            });
        }

        /// Property: listing by status partitions list_all exactly.
        #[test]
        fn status_lists_partition_all(
            statuses in proptest::collection::vec(arb_status(), 0..20)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            rt.block_on(async {
                let store = MemoryStore::new();
                for (i, status) in statuses.iter().enumerate() {
                    let item = store
                        .insert_unless_active_title(new_review(&format!("item {}", i)))
                        .await
                        .unwrap()
                        .unwrap();
                    place_in_status(&store, item.id, *status).await;
                }

                let all = store.list_all().await.unwrap();
                let mut by_status = 0;
                for status in [
                    ReviewStatus::Pending,
                    ReviewStatus::NeedsFix,
                    ReviewStatus::Approved,
                ] {
                    let listed = store.list_by_status(status).await.unwrap();
                    assert!(listed.iter().all(|item| item.status == status));
                    by_status += listed.len();
                }
                assert_eq!(by_status, all.len());
            });
        }
    }
}
