//! User-facing message formatting.
//!
//! Everything the bot says is assembled here from domain types, so the chat
//! wording lives in one place and the handlers stay free of string soup. All
//! output is Telegram HTML: callers send it with `parse_mode=HTML`, so every
//! piece of stored text goes through [`escape_html`] first.

use chrono::{DateTime, FixedOffset, Utc};

use crate::store::{Reminder, ReminderTiming, ReviewItem, ReviewStatus};
use crate::workflow::GroupedReviews;

/// Escape text for inclusion in a Telegram HTML message.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn status_emoji(status: ReviewStatus) -> &'static str {
    match status {
        ReviewStatus::Pending => "⏳",
        ReviewStatus::NeedsFix => "🔧",
        ReviewStatus::Approved => "✅",
    }
}

fn local_time(at: DateTime<Utc>, tz: FixedOffset) -> String {
    at.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string()
}

/// The `/start` and `/help` reply: every command the bot understands.
pub fn help_text() -> &'static str {
    "👋 Hi! I keep track of review requests for this group\n\n\
     📝 Review management:\n\
     • /review Title : link - register a review request\n\
     • /review_approve - approve an item\n\
     • /review_need_fix [comment] - send an item back for fixes\n\
     • /review_again - resubmit a fixed item\n\
     • /review_list - list tracked items\n\
     • /review_notify - ping reviewers about pending items now\n\n\
     👥 Reviewer management:\n\
     • /reviewer_add username - add a reviewer\n\
     • /reviewer_remove username - remove a reviewer\n\
     • /reviewer_list - list reviewers\n\n\
     ⏰ Reminders:\n\
     • /remind @user content - schedule a reminder for someone\n\
     • /remind_list - list your open reminders\n\
     • /remind_done ID - mark a reminder as done\n\n\
     ⏰ I also nudge reviewers about open items on a schedule\n\
     💡 Tip: /review takes several lines, one item per line"
}

// =============================================================================
// Review registration
// =============================================================================

/// Per-line outcome of a `/review` batch, in input order.
#[derive(Debug)]
pub enum LineOutcome {
    /// The line became a tracked item.
    Registered(ReviewItem),
    /// The line parsed but the workflow refused it.
    Rejected { title: String, reason: String },
}

/// Usage text for `/review` when no line could even be parsed.
pub fn review_usage() -> &'static str {
    "❌ Bad format\n\n\
     Use:\n\
     /review Title : link\n\n\
     Or register several at once:\n\
     /review Title one : https://example.com/one\n\
     Title two : https://example.com/two"
}

/// The reply to a `/review` command: per-line results, reviewer mentions,
/// malformed leftovers, and the pending queue as it stands now.
pub fn format_create_report(
    outcomes: &[LineOutcome],
    malformed: &[String],
    reviewers: &[String],
    pending: &[ReviewItem],
) -> String {
    let mut parts = Vec::new();

    let mut lines = Vec::new();
    for outcome in outcomes {
        match outcome {
            LineOutcome::Registered(item) => {
                lines.push(format!("✅ {}", escape_html(&item.title)));
            }
            LineOutcome::Rejected { title, reason } => {
                lines.push(format!("❌ {} ({})", escape_html(title), escape_html(reason)));
            }
        }
    }
    if !lines.is_empty() {
        let mut msg = format!("📝 Review requests:\n{}", lines.join("\n"));
        if !reviewers.is_empty() {
            let mentions: Vec<String> = reviewers
                .iter()
                .map(|r| format!("@{}", escape_html(r)))
                .collect();
            msg.push_str(&format!("\n\n🔔 Calling reviewers: {}", mentions.join(" ")));
        }
        parts.push(msg);
    }

    if !malformed.is_empty() {
        let bad: Vec<String> = malformed
            .iter()
            .map(|line| format!("❌ {}", escape_html(line)))
            .collect();
        parts.push(format!(
            "⚠️ These lines are malformed (expected 'Title : link'):\n{}",
            bad.join("\n")
        ));
    }

    parts.push(format_review_section(pending, "Currently waiting for review"));

    parts.join("\n\n")
}

// =============================================================================
// Listings
// =============================================================================

/// One titled, collapsible section of items.
pub fn format_review_section(items: &[ReviewItem], heading: &str) -> String {
    let heading = escape_html(heading);
    if items.is_empty() {
        return format!("📋 {}\n\n(none)", heading);
    }

    let mut lines = Vec::new();
    for item in items {
        lines.push(format!(
            "{} {}",
            status_emoji(item.status),
            escape_html(&item.title)
        ));
        lines.push(format!("   Link: {}", escape_html(&item.link)));
        lines.push(format!(
            "   Submitter: {}",
            escape_html(&item.submitter_username)
        ));
        if let Some(comment) = &item.comment {
            lines.push(format!("   💬 Comment: {}", escape_html(comment)));
        }
        lines.push(String::new());
    }

    format!(
        "📋 {}\n\n<blockquote expandable>{}</blockquote>",
        heading,
        lines.join("\n")
    )
}

/// The `/review_list` reply: every item ever registered, grouped by status.
/// Empty groups are dropped rather than rendered as "(none)".
pub fn format_grouped_list(grouped: &GroupedReviews) -> String {
    let mut parts = Vec::new();
    if !grouped.pending.is_empty() {
        parts.push(format_review_section(&grouped.pending, "Waiting for review"));
    }
    if !grouped.needs_fix.is_empty() {
        parts.push(format_review_section(&grouped.needs_fix, "Waiting for fixes"));
    }
    if !grouped.approved.is_empty() {
        parts.push(format_review_section(&grouped.approved, "Approved"));
    }

    if parts.is_empty() {
        return "📋 No review items yet".to_string();
    }
    parts.join("\n\n")
}

// =============================================================================
// Scheduled broadcasts
// =============================================================================

/// The periodic nag that calls reviewers to the pending queue.
pub fn format_pending_broadcast(items: &[ReviewItem], reviewers: &[String]) -> String {
    let mentions: Vec<String> = reviewers
        .iter()
        .map(|r| format!("@{}", escape_html(r)))
        .collect();
    let bullets: Vec<String> = items
        .iter()
        .map(|item| {
            format!(
                "• {} - {}",
                escape_html(&item.title),
                escape_html(&item.link)
            )
        })
        .collect();

    format!(
        "📢 Review reminder\n\n\
         {}\n\n\
         Waiting for review:\n\
         <blockquote expandable>{}</blockquote>\n\
         Use /review_list for details",
        mentions.join(" "),
        bullets.join("\n")
    )
}

/// The periodic nag that sends submitters back to their flagged items,
/// grouped per submitter in first-seen order.
pub fn format_need_fix_broadcast(items: &[ReviewItem]) -> String {
    let mut order: Vec<&str> = Vec::new();
    for item in items {
        if !order.contains(&item.submitter_username.as_str()) {
            order.push(&item.submitter_username);
        }
    }

    let mut lines = Vec::new();
    for submitter in order {
        lines.push(format!("@{} please revise:", escape_html(submitter)));
        for item in items.iter().filter(|i| i.submitter_username == submitter) {
            lines.push(format!(
                "  • {} - {}",
                escape_html(&item.title),
                escape_html(&item.link)
            ));
            if let Some(comment) = &item.comment {
                lines.push(format!("    💬 {}", escape_html(comment)));
            }
        }
        lines.push(String::new());
    }

    format!(
        "📢 Fix reminder\n\n\
         <blockquote expandable>{}</blockquote>\n\
         When fixed, resubmit with /review_again",
        lines.join("\n")
    )
}

// =============================================================================
// Submitter notifications
// =============================================================================

/// Tells the submitter their item was approved.
pub fn format_approved_notice(item: &ReviewItem) -> String {
    format!(
        "✅ Review approved\n\n@{}, your submission '{}' has been approved!",
        escape_html(&item.submitter_username),
        escape_html(&item.title)
    )
}

/// Tells the submitter their item needs changes.
pub fn format_need_fix_notice(item: &ReviewItem) -> String {
    let mut msg = format!(
        "🔧 Fixes requested\n\n\
         @{}, your submission '{}' needs changes\n\
         Link: {}",
        escape_html(&item.submitter_username),
        escape_html(&item.title),
        escape_html(&item.link)
    );
    if let Some(comment) = &item.comment {
        msg.push_str(&format!("\n💬 Comment: {}", escape_html(comment)));
    }
    msg.push_str("\n\nWhen fixed, resubmit with /review_again");
    msg
}

// =============================================================================
// Personal reminders
// =============================================================================

fn interval_label(minutes: i64) -> String {
    match minutes {
        1440 => "daily".to_string(),
        4320 => "every 3 days".to_string(),
        10080 => "weekly".to_string(),
        n => format!("every {} minutes", n),
    }
}

/// A personal reminder firing in chat.
pub fn format_personal_reminder(reminder: &Reminder) -> String {
    format!(
        "🔔 Reminder for @{}\n\n📝 {}",
        escape_html(&reminder.target_username),
        escape_html(&reminder.content)
    )
}

/// Confirmation after a schedule button was pressed.
pub fn format_reminder_scheduled(reminder: &Reminder, tz: FixedOffset) -> String {
    let what = match (reminder.timing, reminder.interval_minutes) {
        (Some(ReminderTiming::Periodic), Some(minutes)) => {
            format!("a reminder ({})", interval_label(minutes))
        }
        _ => "a one-off reminder".to_string(),
    };
    let mut msg = format!(
        "✅ Scheduled {} for @{}!",
        what,
        escape_html(&reminder.target_username)
    );
    if let Some(next) = reminder.next_remind_at {
        msg.push_str(&format!("\n⏰ Next reminder: {}", local_time(next, tz)));
    }
    msg
}

/// The `/remind_list` reply for one user.
pub fn format_reminder_list(reminders: &[Reminder], tz: FixedOffset) -> String {
    if reminders.is_empty() {
        return "📋 You have no pending reminders".to_string();
    }

    let mut lines = vec!["📋 Your pending reminders:".to_string()];
    for reminder in reminders {
        let timing = match reminder.timing {
            Some(ReminderTiming::Periodic) => "🔄",
            _ => "⏳",
        };
        lines.push(format!(
            "{} ID: {} - {}",
            timing,
            reminder.id,
            escape_html(&reminder.content)
        ));
        if let Some(next) = reminder.next_remind_at {
            lines.push(format!("   Next: {}", local_time(next, tz)));
        }
    }
    lines.push("\nMark one done with /remind_done <id>".to_string());
    lines.join("\n")
}
