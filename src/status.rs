//! Status types for the status endpoint.
//!
//! This module provides types for displaying the bot's state in a web browser.

use serde::Serialize;

use crate::store::{ReviewItem, ReviewStatus};

/// Summary statistics for the status page.
#[derive(Debug, Default, Serialize)]
pub struct StatusSummary {
    pub total_items: usize,
    pub pending: usize,
    pub need_fix: usize,
    pub approved: usize,
    /// Personal reminders still waiting to fire or to be acknowledged.
    pub pending_reminders: usize,
}

/// A review item entry for display on the status page.
#[derive(Debug, Serialize)]
pub struct ReviewStatusEntry {
    pub id: i64,
    pub title: String,
    pub link: String,
    pub status: String,
    pub submitter_username: String,
    pub chat_id: i64,
    pub comment: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub last_pending_reminder_at: Option<String>,
    pub last_need_fix_reminder_at: Option<String>,
}

/// Full status data for rendering.
#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub summary: StatusSummary,
    pub reviews: Vec<ReviewStatusEntry>,
    pub reviewers: Vec<String>,
}

impl StatusData {
    /// Create status data from the full item list, reviewer roster, and
    /// open personal-reminder count.
    pub fn from_parts(
        items: Vec<ReviewItem>,
        reviewers: Vec<String>,
        pending_reminders: usize,
        version: String,
    ) -> Self {
        let mut summary = StatusSummary {
            total_items: items.len(),
            pending_reminders,
            ..Default::default()
        };

        let mut reviews = Vec::with_capacity(items.len());

        for item in items {
            match item.status {
                ReviewStatus::Pending => summary.pending += 1,
                ReviewStatus::NeedsFix => summary.need_fix += 1,
                ReviewStatus::Approved => summary.approved += 1,
            }

            reviews.push(ReviewStatusEntry {
                id: item.id,
                title: item.title,
                link: item.link,
                status: item.status.to_string(),
                submitter_username: item.submitter_username,
                chat_id: item.chat_id,
                comment: item.comment,
                created_at: item.created_at.to_rfc3339(),
                updated_at: item.updated_at.to_rfc3339(),
                last_pending_reminder_at: item.last_pending_reminder_at.map(|t| t.to_rfc3339()),
                last_need_fix_reminder_at: item.last_need_fix_reminder_at.map(|t| t.to_rfc3339()),
            });
        }

        Self {
            version,
            summary,
            reviews,
            reviewers,
        }
    }
}
