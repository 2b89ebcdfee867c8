//! Outbound chat notifications.
//!
//! The dispatcher is the boundary between workflow decisions and the chat
//! transport. Handlers and the scheduler decide WHAT to announce; this module
//! decides who hears it and keeps one misbehaving chat from silencing the
//! rest. Per-chat send failures are logged and skipped, and a broadcast
//! reports how many chats actually took the message.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::messages;
use crate::store::{Reminder, ReviewItem, ReviewerRegistry, StoreError};

/// Minimal sending surface the dispatcher needs.
///
/// `TelegramClient` implements it for production; tests substitute a
/// recording double.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send an HTML-formatted message to one chat.
    async fn send_html(&self, chat_id: i64, text: &str) -> anyhow::Result<()>;
}

/// What a reviewer-call broadcast amounted to.
#[derive(Debug, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// The call went out, mentioning this many reviewers.
    Sent { reviewer_count: usize },
    /// Nothing is waiting for review, so nothing was sent.
    NothingPending,
    /// No reviewers are registered to call.
    NoReviewers,
    /// Every broadcast chat rejected the message.
    Undelivered,
}

/// Fans notifications out to the configured chats.
pub struct NotificationDispatcher {
    transport: Arc<dyn ChatTransport>,
    reviewers: Arc<dyn ReviewerRegistry>,
    /// Chats that receive scheduled broadcasts and personal reminders.
    broadcast_chats: Vec<i64>,
}

impl NotificationDispatcher {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        reviewers: Arc<dyn ReviewerRegistry>,
        broadcast_chats: Vec<i64>,
    ) -> Self {
        Self {
            transport,
            reviewers,
            broadcast_chats,
        }
    }

    /// Tell the submitter, in the chat where the approval happened, that
    /// their item went through.
    pub async fn notify_approved(&self, chat_id: i64, item: &ReviewItem) {
        let text = messages::format_approved_notice(item);
        if let Err(e) = self.transport.send_html(chat_id, &text).await {
            error!(
                "Failed to notify @{} about approval of '{}': {}",
                item.submitter_username, item.title, e
            );
        }
    }

    /// Tell the submitter their item needs changes.
    pub async fn notify_need_fix(&self, chat_id: i64, item: &ReviewItem) {
        let text = messages::format_need_fix_notice(item);
        if let Err(e) = self.transport.send_html(chat_id, &text).await {
            error!(
                "Failed to notify @{} about fixes for '{}': {}",
                item.submitter_username, item.title, e
            );
        }
    }

    /// Call reviewers to the pending queue in every broadcast chat.
    ///
    /// The caller picks the items (the scheduler passes only due ones, the
    /// manual trigger passes the whole queue); this method only refuses to
    /// send an empty call. `Sent` means at least one chat accepted the
    /// message, so a reminder stamp may advance on it.
    pub async fn broadcast_pending(
        &self,
        items: &[ReviewItem],
    ) -> Result<BroadcastOutcome, StoreError> {
        if items.is_empty() {
            info!("No pending reviews to announce");
            return Ok(BroadcastOutcome::NothingPending);
        }

        let reviewers = self.reviewers.list().await?;
        if reviewers.is_empty() {
            warn!("No reviewers registered, skipping pending-review call");
            return Ok(BroadcastOutcome::NoReviewers);
        }

        let text = messages::format_pending_broadcast(items, &reviewers);
        let delivered = self.send_to_broadcast_chats(&text, "pending-review call").await;
        if delivered == 0 {
            warn!("Pending-review call reached no chats");
            return Ok(BroadcastOutcome::Undelivered);
        }

        Ok(BroadcastOutcome::Sent {
            reviewer_count: reviewers.len(),
        })
    }

    /// Nag submitters about their flagged items in every broadcast chat.
    /// Returns how many chats accepted the nag.
    pub async fn broadcast_need_fix(&self, items: &[ReviewItem]) -> usize {
        if items.is_empty() {
            info!("No need-fix reviews to announce");
            return 0;
        }
        let text = messages::format_need_fix_broadcast(items);
        self.send_to_broadcast_chats(&text, "need-fix nag").await
    }

    /// Deliver a personal reminder to every broadcast chat.
    pub async fn send_personal_reminder(&self, reminder: &Reminder) {
        let text = messages::format_personal_reminder(reminder);
        self.send_to_broadcast_chats(&text, "personal reminder").await;
    }

    /// Send one message to all broadcast chats, returning how many accepted
    /// it. A chat that rejects the message (bot kicked, chat deleted) is
    /// logged and skipped so the rest still hear it.
    async fn send_to_broadcast_chats(&self, text: &str, what: &str) -> usize {
        let mut delivered = 0;
        for &chat_id in &self.broadcast_chats {
            match self.transport.send_html(chat_id, text).await {
                Ok(()) => {
                    info!("Sent {} to chat {}", what, chat_id);
                    delivered += 1;
                }
                Err(e) => error!("Failed to send {} to chat {}: {}", what, chat_id, e),
            }
        }
        delivered
    }
}
