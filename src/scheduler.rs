//! Periodic background work: review nag broadcasts and personal reminders.
//!
//! Each loop wakes on its own cadence, does one tick of work against the
//! store, and logs failures without dying. Scheduled review broadcasts
//! respect the configured quiet hours; personal reminders and the manual
//! /review_notify trigger do not.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval, interval_at, Instant};
use tracing::{debug, error, info};

use crate::notify::BroadcastOutcome;
use crate::store::{Reminder, ReminderChannel, ReminderTiming, ReviewItem, ReviewStatus, StoreError};
use crate::AppState;

/// First ticks are staggered so a restart does not blast every chat at once.
const FIRST_PENDING_TICK_SECS: u64 = 10;
const FIRST_NEED_FIX_TICK_SECS: u64 = 30;
/// How often due personal reminders are collected.
const REMINDER_SWEEP_SECS: u64 = 30;
/// Reminder drafts older than this were abandoned mid-dialog.
const STALE_DRAFT_MINUTES: i64 = 60;

/// Broadcast nag messages for reviews still waiting on reviewers.
pub async fn pending_reminder_loop(state: Arc<AppState>) {
    let period = Duration::from_secs(state.config.pending_interval_minutes as u64 * 60);
    let mut ticks = interval_at(
        Instant::now() + Duration::from_secs(FIRST_PENDING_TICK_SECS),
        period,
    );
    loop {
        ticks.tick().await;
        if let Err(e) = run_pending_tick(&state).await {
            error!("Error broadcasting pending-review reminders: {e:?}");
        }
    }
}

/// Broadcast nag messages for reviews waiting on their submitters.
pub async fn need_fix_reminder_loop(state: Arc<AppState>) {
    let period = Duration::from_secs(state.config.need_fix_interval_minutes as u64 * 60);
    let mut ticks = interval_at(
        Instant::now() + Duration::from_secs(FIRST_NEED_FIX_TICK_SECS),
        period,
    );
    loop {
        ticks.tick().await;
        if let Err(e) = run_need_fix_tick(&state).await {
            error!("Error broadcasting need-fix reminders: {e:?}");
        }
    }
}

/// Deliver due personal reminders and prune abandoned drafts. The first
/// tick fires immediately, so reminders that came due while the bot was
/// down go out right after startup.
pub async fn reminder_sweep_loop(state: Arc<AppState>) {
    let mut ticks = interval(Duration::from_secs(REMINDER_SWEEP_SECS));
    loop {
        ticks.tick().await;
        if let Err(e) = run_reminder_sweep(&state).await {
            error!("Error delivering personal reminders: {e:?}");
        }
    }
}

/// One pass of the pending-review nag. Items are due when they have never
/// been reminded on this channel or their last reminder is at least one
/// interval old. The stamp only advances when a broadcast actually went
/// out, so items stay due while no reviewers are registered or no chat
/// will take the message.
pub async fn run_pending_tick(state: &AppState) -> anyhow::Result<()> {
    if in_quiet_hours(state) {
        debug!("Inside quiet hours, skipping pending-review reminders");
        return Ok(());
    }

    let cutoff = Utc::now() - chrono::Duration::minutes(state.config.pending_interval_minutes);
    let due = state
        .reviews
        .due_for_reminder(ReminderChannel::Pending, cutoff)
        .await?;
    if due.is_empty() {
        return Ok(());
    }

    let outcome = state.dispatcher.broadcast_pending(&due).await?;
    if let BroadcastOutcome::Sent { .. } = outcome {
        mark_all_reminded(state, ReminderChannel::Pending, &due).await?;
    }
    Ok(())
}

/// One pass of the need-fix nag. There is no reviewer gate on this channel,
/// but the stamp still only advances when at least one chat took the nag.
pub async fn run_need_fix_tick(state: &AppState) -> anyhow::Result<()> {
    if in_quiet_hours(state) {
        debug!("Inside quiet hours, skipping need-fix reminders");
        return Ok(());
    }

    let cutoff = Utc::now() - chrono::Duration::minutes(state.config.need_fix_interval_minutes);
    let due = state
        .reviews
        .due_for_reminder(ReminderChannel::NeedFix, cutoff)
        .await?;
    if due.is_empty() {
        return Ok(());
    }

    let delivered = state.dispatcher.broadcast_need_fix(&due).await;
    if delivered > 0 {
        mark_all_reminded(state, ReminderChannel::NeedFix, &due).await?;
    }
    Ok(())
}

/// Immediate broadcast for the /review_notify command. Skips the quiet
/// hours and cadence checks and includes every pending item, not just the
/// due ones.
pub async fn notify_reviewers_now(state: &AppState) -> anyhow::Result<BroadcastOutcome> {
    let pending = state.reviews.list_by_status(ReviewStatus::Pending).await?;
    let outcome = state.dispatcher.broadcast_pending(&pending).await?;
    if let BroadcastOutcome::Sent { .. } = outcome {
        mark_all_reminded(state, ReminderChannel::Pending, &pending).await?;
    }
    Ok(outcome)
}

/// One pass over due personal reminders. A failure on one reminder is
/// logged and does not block the rest.
pub async fn run_reminder_sweep(state: &AppState) -> anyhow::Result<()> {
    let now = Utc::now();
    let due = state.reminders.due(now).await?;
    for reminder in due {
        if let Err(e) = fire_reminder(state, &reminder, now).await {
            error!("Error firing reminder {}: {e:?}", reminder.id);
        }
    }

    let cutoff = now - chrono::Duration::minutes(STALE_DRAFT_MINUTES);
    let removed = state.reminders.delete_stale_drafts(cutoff).await?;
    if removed > 0 {
        info!("Removed {} abandoned reminder drafts", removed);
    }
    Ok(())
}

/// Send one reminder and advance its schedule. A one-off reminder keeps
/// its pending status with no next time; only /remind_done completes it.
async fn fire_reminder(
    state: &AppState,
    reminder: &Reminder,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    state.dispatcher.send_personal_reminder(reminder).await;
    let next = match (reminder.timing, reminder.interval_minutes) {
        (Some(ReminderTiming::Periodic), Some(minutes)) => {
            Some(now + chrono::Duration::minutes(minutes))
        }
        _ => None,
    };
    state.reminders.set_next_remind_at(reminder.id, next).await
}

async fn mark_all_reminded(
    state: &AppState,
    channel: ReminderChannel,
    items: &[ReviewItem],
) -> Result<(), StoreError> {
    let ids: Vec<i64> = items.iter().map(|item| item.id).collect();
    state.reviews.mark_reminded(channel, &ids, Utc::now()).await
}

fn in_quiet_hours(state: &AppState) -> bool {
    let Some(window) = &state.config.quiet_hours else {
        return false;
    };
    let local_now = Utc::now().with_timezone(&state.config.tz).time();
    window.contains(local_now)
}
