//! The Telegram webhook endpoint.
//!
//! Telegram POSTs one update per request. The handler authenticates the
//! call, decides whether the update is for us, then hands the real work to a
//! background task so the webhook can acknowledge within Telegram's timeout.
//! Everything the bot says back goes through [`crate::messages`].

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::command::{self, BotCommand, CallbackAction, ParseResult};
use crate::messages::{self, LineOutcome};
use crate::notify::BroadcastOutcome;
use crate::scheduler;
use crate::store::{NewReview, ReminderStatus, ReminderTiming, ReviewItem, ReviewStatus};
use crate::telegram::{InlineKeyboardButton, InlineKeyboardMarkup, TelegramUser};
use crate::workflow::{ItemRef, WorkflowError};
use crate::AppState;

/// One update from Telegram. Only the two kinds the bot reacts to are
/// modelled; any other update deserializes with both fields empty and is
/// dropped.
#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    /// The message carrying the pressed keyboard. Telegram omits it once
    /// the message is too old.
    pub message: Option<IncomingMessage>,
    pub data: Option<String>,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

/// Tag attached to each update so log lines written while handling it can
/// be tied back together.
#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

/// Check the secret token Telegram echoes back on every webhook call.
///
/// setWebhook registers the secret and Telegram repeats it verbatim in a
/// header, so plain equality is the entire scheme. Without a configured
/// secret every caller is accepted.
async fn verify_webhook_secret(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(expected) = &state.config.webhook_secret {
        let provided = request
            .headers()
            .get("x-telegram-bot-api-secret-token")
            .and_then(|h| h.to_str().ok());
        if provided != Some(expected.as_str()) {
            warn!("Rejected webhook call with missing or wrong secret token");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    request
        .extensions_mut()
        .insert(CorrelationId(Uuid::new_v4().to_string()));

    Ok(next.run(request).await)
}

pub async fn telegram_webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone());

    let (_parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let update: Update = serde_json::from_slice(&bytes).map_err(|_| StatusCode::BAD_REQUEST)?;

    debug!(
        "Received update {} (correlation: {})",
        update.update_id,
        correlation_id.as_deref().unwrap_or("-")
    );

    if let Some(message) = update.message {
        dispatch_message(&state, message, correlation_id);
    } else if let Some(callback) = update.callback_query {
        dispatch_callback(&state, callback, correlation_id);
    }

    Ok(Json(WebhookResponse {
        message: "Update received".to_string(),
    }))
}

/// Route a chat message: drop everything that is not one of our commands
/// issued in an allowed chat, then run the command in a background task so
/// the webhook can return immediately.
fn dispatch_message(
    state: &Arc<AppState>,
    message: IncomingMessage,
    correlation_id: Option<String>,
) {
    let chat_id = message.chat.id;
    if !state.config.allowed_chat_ids.contains(&chat_id) {
        info!("Ignoring message in unlisted chat {}", chat_id);
        return;
    }
    let Some(text) = message.text else {
        return;
    };
    let Some(from) = message.from else {
        return;
    };

    match command::parse_message(&text, &state.bot_username) {
        ParseResult::NotCommand | ParseResult::OtherBot => {}
        ParseResult::UnknownCommand { attempted } => {
            debug!("Ignoring unknown command /{} in chat {}", attempted, chat_id);
        }
        ParseResult::Command(cmd) => {
            info!(
                "Processing {} in chat {} (correlation: {})",
                cmd.name(),
                chat_id,
                correlation_id.as_deref().unwrap_or("-")
            );
            let state = state.clone();
            tokio::spawn(async move {
                if let Err(e) = process_command(state, chat_id, from, cmd).await {
                    error!(
                        "Error processing command in chat {} (correlation: {}): {:?}",
                        chat_id,
                        correlation_id.as_deref().unwrap_or("-"),
                        e
                    );
                }
            });
        }
    }
}

/// Route a keyboard press the same way. Unrecognized payloads (buttons from
/// an older version of the bot) and presses carrying no source message are
/// still acknowledged so the client stops its spinner.
fn dispatch_callback(
    state: &Arc<AppState>,
    callback: CallbackQuery,
    correlation_id: Option<String>,
) {
    let Some((chat_id, prompt_id)) = callback
        .message
        .as_ref()
        .map(|m| (m.chat.id, m.message_id))
    else {
        debug!("Ignoring callback {} without a source message", callback.id);
        let state = state.clone();
        tokio::spawn(async move {
            ack_callback(&state, &callback.id, None).await;
        });
        return;
    };
    if !state.config.allowed_chat_ids.contains(&chat_id) {
        info!("Ignoring callback in unlisted chat {}", chat_id);
        return;
    }

    let Some(action) = callback.data.as_deref().and_then(command::parse_callback_data) else {
        debug!("Ignoring unrecognized callback data {:?}", callback.data);
        let state = state.clone();
        tokio::spawn(async move {
            ack_callback(&state, &callback.id, None).await;
        });
        return;
    };

    info!(
        "Processing callback {:?} in chat {} (correlation: {})",
        action,
        chat_id,
        correlation_id.as_deref().unwrap_or("-")
    );
    let state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = process_callback(state, chat_id, prompt_id, callback, action).await {
            error!(
                "Error processing callback in chat {} (correlation: {}): {:?}",
                chat_id,
                correlation_id.as_deref().unwrap_or("-"),
                e
            );
        }
    });
}

async fn process_command(
    state: Arc<AppState>,
    chat_id: i64,
    from: TelegramUser,
    command: BotCommand,
) -> anyhow::Result<()> {
    match command {
        BotCommand::Start | BotCommand::Help => {
            state
                .telegram
                .send_message(chat_id, messages::help_text())
                .await?;
            Ok(())
        }
        BotCommand::Review { parsed, malformed } => {
            process_review(&state, chat_id, &from, parsed, malformed).await
        }
        BotCommand::ReviewApprove { reference } => {
            process_approve(&state, chat_id, reference).await
        }
        BotCommand::ReviewNeedFix { reference, comment } => {
            process_need_fix(&state, chat_id, from.id, reference, comment).await
        }
        BotCommand::ReviewAgain { reference } => process_again(&state, chat_id, reference).await,
        BotCommand::ReviewList => process_review_list(&state, chat_id).await,
        BotCommand::ReviewNotify => process_review_notify(&state, chat_id).await,
        BotCommand::ReviewerAdd { username } => {
            process_reviewer_add(&state, chat_id, username).await
        }
        BotCommand::ReviewerRemove { username } => {
            process_reviewer_remove(&state, chat_id, username).await
        }
        BotCommand::ReviewerList => process_reviewer_list(&state, chat_id).await,
        BotCommand::Remind { request } => process_remind(&state, chat_id, request).await,
        BotCommand::RemindList => process_remind_list(&state, chat_id, &from).await,
        BotCommand::RemindDone { id } => process_remind_done(&state, chat_id, id).await,
    }
}

async fn process_review(
    state: &AppState,
    chat_id: i64,
    from: &TelegramUser,
    parsed: Vec<command::ReviewLine>,
    malformed: Vec<String>,
) -> anyhow::Result<()> {
    if parsed.is_empty() && malformed.is_empty() {
        state
            .telegram
            .send_message(chat_id, messages::review_usage())
            .await?;
        return Ok(());
    }

    let submitter = display_name(from);
    let requests: Vec<NewReview> = parsed
        .into_iter()
        .map(|line| NewReview {
            title: line.title,
            link: line.link,
            submitter_id: from.id,
            submitter_username: submitter.clone(),
            chat_id,
        })
        .collect();
    let titles: Vec<String> = requests.iter().map(|r| r.title.clone()).collect();

    let results = state.workflow.create_batch(requests).await;
    let mut outcomes = Vec::with_capacity(results.len());
    for (result, title) in results.into_iter().zip(titles) {
        match result {
            Ok(item) => outcomes.push(LineOutcome::Registered(item)),
            Err(WorkflowError::DuplicateTitle) => outcomes.push(LineOutcome::Rejected {
                title,
                reason: "already being reviewed".to_string(),
            }),
            Err(e) => {
                warn!("Failed to register review '{}': {:?}", title, e);
                outcomes.push(LineOutcome::Rejected {
                    title,
                    reason: "could not be saved".to_string(),
                });
            }
        }
    }

    let reviewers = state.reviewers.list().await?;
    let pending = state.workflow.select_pending(chat_id).await?;
    let reply = messages::format_create_report(&outcomes, &malformed, &reviewers, &pending);
    state.telegram.send_message(chat_id, &reply).await?;
    Ok(())
}

async fn process_approve(
    state: &AppState,
    chat_id: i64,
    reference: Option<ItemRef>,
) -> anyhow::Result<()> {
    let Some(reference) = reference else {
        let pending = state.workflow.select_pending(chat_id).await?;
        if pending.is_empty() {
            state
                .telegram
                .send_message(chat_id, "📋 Nothing is waiting for review")
                .await?;
            return Ok(());
        }
        let keyboard = selection_keyboard(&pending, "✅", "approve");
        state
            .telegram
            .send_message_with_keyboard(chat_id, "📋 Choose an item to approve:", &keyboard)
            .await?;
        return Ok(());
    };

    match state.workflow.approve(&reference).await {
        // The submitter notice doubles as the public confirmation.
        Ok(item) => state.dispatcher.notify_approved(chat_id, &item).await,
        Err(WorkflowError::Store(e)) => return Err(e.into()),
        Err(e) => {
            state
                .telegram
                .send_message(chat_id, &refusal_text(&e, &reference))
                .await?;
        }
    }
    Ok(())
}

async fn process_need_fix(
    state: &AppState,
    chat_id: i64,
    caller_id: i64,
    reference: Option<ItemRef>,
    comment: Option<String>,
) -> anyhow::Result<()> {
    let Some(reference) = reference else {
        let pending = state.workflow.select_pending(chat_id).await?;
        if pending.is_empty() {
            state
                .telegram
                .send_message(chat_id, "📋 Nothing is waiting for review")
                .await?;
            return Ok(());
        }

        let mut prompt = "📋 Choose an item to flag for fixes:".to_string();
        if let Some(comment) = &comment {
            prompt.push_str(&format!("\n💬 Comment: {}", messages::escape_html(comment)));
        }
        // Park the comment until this user picks an item.
        if let Some(comment) = comment {
            state
                .need_fix_comments
                .write()
                .await
                .insert(caller_id, comment);
        }

        let keyboard = selection_keyboard(&pending, "🔧", "needfix");
        state
            .telegram
            .send_message_with_keyboard(chat_id, &prompt, &keyboard)
            .await?;
        return Ok(());
    };

    match state.workflow.mark_need_fix(&reference, comment).await {
        Ok(item) => state.dispatcher.notify_need_fix(chat_id, &item).await,
        Err(WorkflowError::Store(e)) => return Err(e.into()),
        Err(e) => {
            state
                .telegram
                .send_message(chat_id, &refusal_text(&e, &reference))
                .await?;
        }
    }
    Ok(())
}

async fn process_again(
    state: &AppState,
    chat_id: i64,
    reference: Option<ItemRef>,
) -> anyhow::Result<()> {
    let Some(reference) = reference else {
        let waiting = state
            .reviews
            .list_chat_by_status(chat_id, &[ReviewStatus::NeedsFix])
            .await?;
        if waiting.is_empty() {
            state
                .telegram
                .send_message(chat_id, "📋 Nothing is waiting for fixes")
                .await?;
            return Ok(());
        }
        let keyboard = selection_keyboard(&waiting, "🔄", "again");
        state
            .telegram
            .send_message_with_keyboard(chat_id, "🔄 Choose an item to resubmit:", &keyboard)
            .await?;
        return Ok(());
    };

    match state.workflow.resubmit(&reference).await {
        Ok(item) => {
            let reply = format!(
                "🔄 '{}' is back in review\n📎 Link: {}",
                messages::escape_html(&item.title),
                messages::escape_html(&item.link)
            );
            state.telegram.send_message(chat_id, &reply).await?;
        }
        Err(WorkflowError::Store(e)) => return Err(e.into()),
        Err(e) => {
            state
                .telegram
                .send_message(chat_id, &refusal_text(&e, &reference))
                .await?;
        }
    }
    Ok(())
}

async fn process_review_list(state: &AppState, chat_id: i64) -> anyhow::Result<()> {
    let grouped = state.workflow.list_all_grouped().await?;
    let text = messages::format_grouped_list(&grouped);
    state.telegram.send_message(chat_id, &text).await?;
    Ok(())
}

async fn process_review_notify(state: &AppState, chat_id: i64) -> anyhow::Result<()> {
    let reply = match scheduler::notify_reviewers_now(state).await? {
        BroadcastOutcome::Sent { reviewer_count } => format!(
            "📢 Notified {} reviewers about the pending queue",
            reviewer_count
        ),
        BroadcastOutcome::NothingPending => "📋 Nothing is waiting for review".to_string(),
        BroadcastOutcome::NoReviewers => {
            "👥 No reviewers registered yet, add one with /reviewer_add username".to_string()
        }
        BroadcastOutcome::Undelivered => {
            "⚠️ The call could not be delivered to any chat".to_string()
        }
    };
    state.telegram.send_message(chat_id, &reply).await?;
    Ok(())
}

async fn process_reviewer_add(
    state: &AppState,
    chat_id: i64,
    username: Option<String>,
) -> anyhow::Result<()> {
    let Some(username) = username else {
        state
            .telegram
            .send_message(chat_id, "❌ Provide a username\nUse: /reviewer_add username")
            .await?;
        return Ok(());
    };
    let reply = if state.reviewers.add(&username).await? {
        format!("✅ Added reviewer @{}", messages::escape_html(&username))
    } else {
        format!("ℹ️ @{} is already a reviewer", messages::escape_html(&username))
    };
    state.telegram.send_message(chat_id, &reply).await?;
    Ok(())
}

async fn process_reviewer_remove(
    state: &AppState,
    chat_id: i64,
    username: Option<String>,
) -> anyhow::Result<()> {
    let Some(username) = username else {
        state
            .telegram
            .send_message(chat_id, "❌ Provide a username\nUse: /reviewer_remove username")
            .await?;
        return Ok(());
    };
    let reply = if state.reviewers.remove(&username).await? {
        format!("✅ Removed reviewer @{}", messages::escape_html(&username))
    } else {
        format!("❌ No reviewer named @{}", messages::escape_html(&username))
    };
    state.telegram.send_message(chat_id, &reply).await?;
    Ok(())
}

async fn process_reviewer_list(state: &AppState, chat_id: i64) -> anyhow::Result<()> {
    let reviewers = state.reviewers.list().await?;
    let reply = if reviewers.is_empty() {
        "📋 Reviewers\n\n(none yet)\n\nAdd one with /reviewer_add username".to_string()
    } else {
        let lines: Vec<String> = reviewers
            .iter()
            .map(|u| format!("• @{}", messages::escape_html(u)))
            .collect();
        format!("📋 Reviewers\n\n{}", lines.join("\n"))
    };
    state.telegram.send_message(chat_id, &reply).await?;
    Ok(())
}

async fn process_remind(
    state: &AppState,
    chat_id: i64,
    request: Option<command::RemindRequest>,
) -> anyhow::Result<()> {
    let Some(request) = request else {
        state
            .telegram
            .send_message(chat_id, "❌ Bad format\n\nUse: /remind @username content")
            .await?;
        return Ok(());
    };

    let draft = state
        .reminders
        .create_draft(&request.target_username, &request.content)
        .await?;

    let prompt = format!(
        "🔔 Setting a reminder for @{}:\n📝 {}\n\nChoose the reminder type:",
        messages::escape_html(&draft.target_username),
        messages::escape_html(&draft.content)
    );
    state
        .telegram
        .send_message_with_keyboard(chat_id, &prompt, &timing_keyboard(draft.id))
        .await?;
    Ok(())
}

async fn process_remind_list(
    state: &AppState,
    chat_id: i64,
    from: &TelegramUser,
) -> anyhow::Result<()> {
    let handle = caller_handle(from);
    let reminders = state.reminders.list_pending_for(&handle).await?;
    let text = messages::format_reminder_list(&reminders, state.config.tz);
    state.telegram.send_message(chat_id, &text).await?;
    Ok(())
}

async fn process_remind_done(
    state: &AppState,
    chat_id: i64,
    id: Option<i64>,
) -> anyhow::Result<()> {
    let Some(id) = id else {
        state
            .telegram
            .send_message(chat_id, "❌ Provide the reminder ID, e.g. /remind_done 1")
            .await?;
        return Ok(());
    };

    let reply = match state.reminders.get_reminder(id).await? {
        None => format!("❌ No reminder with ID {}", id),
        Some(reminder) if reminder.status == ReminderStatus::Done => {
            format!("ℹ️ Reminder {} is already done", id)
        }
        Some(_) => {
            if state.reminders.mark_done(id).await? {
                format!("✅ Reminder {} marked as done!", id)
            } else {
                "❌ Could not update the reminder".to_string()
            }
        }
    };
    state.telegram.send_message(chat_id, &reply).await?;
    Ok(())
}

async fn process_callback(
    state: Arc<AppState>,
    chat_id: i64,
    prompt_id: i64,
    callback: CallbackQuery,
    action: CallbackAction,
) -> anyhow::Result<()> {
    match action {
        CallbackAction::Approve(item_id) => {
            callback_approve(&state, chat_id, prompt_id, &callback.id, item_id).await
        }
        CallbackAction::NeedFix(item_id) => {
            callback_need_fix(
                &state,
                chat_id,
                prompt_id,
                &callback.id,
                item_id,
                callback.from.id,
            )
            .await
        }
        CallbackAction::Resubmit(item_id) => {
            callback_again(&state, chat_id, prompt_id, &callback.id, item_id).await
        }
        CallbackAction::RemindTiming { draft_id, timing } => {
            callback_remind_timing(&state, chat_id, prompt_id, &callback.id, draft_id, timing)
                .await
        }
        CallbackAction::RemindSchedule {
            draft_id,
            timing,
            minutes,
        } => {
            callback_remind_schedule(
                &state,
                chat_id,
                prompt_id,
                &callback.id,
                draft_id,
                timing,
                minutes,
            )
            .await
        }
    }
}

async fn callback_approve(
    state: &AppState,
    chat_id: i64,
    prompt_id: i64,
    callback_id: &str,
    item_id: i64,
) -> anyhow::Result<()> {
    let display = item_display(state, item_id).await;
    ack_callback(
        state,
        callback_id,
        Some(&format!("⏳ Approving '{}'...", display)),
    )
    .await;

    match state.workflow.approve(&ItemRef::ById(item_id)).await {
        Ok(item) => {
            let done = format!("✅ '{}' approved!", messages::escape_html(&item.title));
            delete_or_edit(state, chat_id, prompt_id, &done).await;
            state.dispatcher.notify_approved(chat_id, &item).await;
        }
        Err(WorkflowError::Store(e)) => return Err(e.into()),
        Err(_) => {
            let text = format!(
                "❌ Could not approve '{}' (already handled or missing)",
                messages::escape_html(&display)
            );
            state
                .telegram
                .edit_message_text(chat_id, prompt_id, &text)
                .await?;
        }
    }
    Ok(())
}

async fn callback_need_fix(
    state: &AppState,
    chat_id: i64,
    prompt_id: i64,
    callback_id: &str,
    item_id: i64,
    presser_id: i64,
) -> anyhow::Result<()> {
    let display = item_display(state, item_id).await;
    ack_callback(
        state,
        callback_id,
        Some(&format!("⏳ Flagging '{}' for fixes...", display)),
    )
    .await;

    // Retrieve the comment stashed by the bare command, if any.
    let comment = state.need_fix_comments.write().await.remove(&presser_id);

    match state
        .workflow
        .mark_need_fix(&ItemRef::ById(item_id), comment)
        .await
    {
        Ok(item) => {
            let mut done = format!("🔧 '{}' flagged for fixes", messages::escape_html(&item.title));
            if let Some(comment) = &item.comment {
                done.push_str(&format!("\n💬 Comment: {}", messages::escape_html(comment)));
            }
            delete_or_edit(state, chat_id, prompt_id, &done).await;
            state.dispatcher.notify_need_fix(chat_id, &item).await;
        }
        Err(WorkflowError::Store(e)) => return Err(e.into()),
        Err(_) => {
            let text = format!(
                "❌ Could not flag '{}' (already approved or missing)",
                messages::escape_html(&display)
            );
            state
                .telegram
                .edit_message_text(chat_id, prompt_id, &text)
                .await?;
        }
    }
    Ok(())
}

async fn callback_again(
    state: &AppState,
    chat_id: i64,
    prompt_id: i64,
    callback_id: &str,
    item_id: i64,
) -> anyhow::Result<()> {
    let display = item_display(state, item_id).await;
    ack_callback(
        state,
        callback_id,
        Some(&format!("⏳ Resubmitting '{}'...", display)),
    )
    .await;

    match state.workflow.resubmit(&ItemRef::ById(item_id)).await {
        Ok(item) => {
            let text = format!(
                "🔄 '{}' is back in review\n📎 Link: {}",
                messages::escape_html(&item.title),
                messages::escape_html(&item.link)
            );
            // The result goes to the chat; the spent menu just disappears.
            if state.telegram.delete_message(chat_id, prompt_id).await.is_ok() {
                state.telegram.send_message(chat_id, &text).await?;
            } else {
                state
                    .telegram
                    .edit_message_text(chat_id, prompt_id, &text)
                    .await?;
            }
        }
        Err(WorkflowError::Store(e)) => return Err(e.into()),
        Err(WorkflowError::InvalidState { status }) => {
            let text = format!(
                "ℹ️ '{}' is {} now, not awaiting fixes",
                messages::escape_html(&display),
                status
            );
            state
                .telegram
                .edit_message_text(chat_id, prompt_id, &text)
                .await?;
        }
        Err(_) => {
            let text = format!("❌ No review request found for #{}", item_id);
            state
                .telegram
                .edit_message_text(chat_id, prompt_id, &text)
                .await?;
        }
    }
    Ok(())
}

async fn callback_remind_timing(
    state: &AppState,
    chat_id: i64,
    prompt_id: i64,
    callback_id: &str,
    draft_id: i64,
    timing: ReminderTiming,
) -> anyhow::Result<()> {
    ack_callback(state, callback_id, None).await;

    let text = match timing {
        ReminderTiming::Once => "Choose when the reminder should fire:",
        ReminderTiming::Periodic => "Choose the reminder period:",
    };
    state
        .telegram
        .edit_message_with_keyboard(chat_id, prompt_id, text, &schedule_keyboard(draft_id, timing))
        .await?;
    Ok(())
}

async fn callback_remind_schedule(
    state: &AppState,
    chat_id: i64,
    prompt_id: i64,
    callback_id: &str,
    draft_id: i64,
    timing: ReminderTiming,
    minutes: i64,
) -> anyhow::Result<()> {
    ack_callback(state, callback_id, None).await;

    let next = Utc::now() + chrono::Duration::minutes(minutes);
    let interval = match timing {
        ReminderTiming::Periodic => Some(minutes),
        ReminderTiming::Once => None,
    };

    match state
        .reminders
        .activate(draft_id, timing, interval, next)
        .await?
    {
        Some(reminder) => {
            let text = messages::format_reminder_scheduled(&reminder, state.config.tz);
            state
                .telegram
                .edit_message_text(chat_id, prompt_id, &text)
                .await?;
        }
        None => {
            state
                .telegram
                .edit_message_text(
                    chat_id,
                    prompt_id,
                    "❌ This reminder dialog has expired, start over with /remind",
                )
                .await?;
        }
    }
    Ok(())
}

/// Acknowledge a button press. Failure is logged, not fatal: Telegram
/// expires queries quickly and the press should still take effect.
async fn ack_callback(state: &AppState, callback_id: &str, text: Option<&str>) {
    if let Err(e) = state.telegram.answer_callback_query(callback_id, text).await {
        warn!("Failed to answer callback query: {:?}", e);
    }
}

/// Remove a spent selection keyboard. Deletion can fail (message too old,
/// missing rights), then editing the text in place is the fallback.
async fn delete_or_edit(state: &AppState, chat_id: i64, message_id: i64, fallback: &str) {
    if state.telegram.delete_message(chat_id, message_id).await.is_err() {
        if let Err(e) = state
            .telegram
            .edit_message_text(chat_id, message_id, fallback)
            .await
        {
            warn!(
                "Failed to replace spent keyboard message {}: {:?}",
                message_id, e
            );
        }
    }
}

/// Best display name for an item referenced from a keyboard: the title if
/// the row still exists, the raw id otherwise.
async fn item_display(state: &AppState, item_id: i64) -> String {
    match state.reviews.get(item_id).await {
        Ok(Some(item)) => item.title,
        _ => format!("#{}", item_id),
    }
}

/// One button per item, `{action}:{id}` as the callback payload.
fn selection_keyboard(items: &[ReviewItem], emoji: &str, action: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::single_column(
        items
            .iter()
            .map(|item| InlineKeyboardButton {
                text: format!("{} {}", emoji, item.title),
                callback_data: format!("{}:{}", action, item.id),
            })
            .collect(),
    )
}

/// First reminder step: one-off or repeating.
fn timing_keyboard(draft_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![vec![
            InlineKeyboardButton {
                text: "One-time".to_string(),
                callback_data: format!("remind_type:{}:once", draft_id),
            },
            InlineKeyboardButton {
                text: "Periodic".to_string(),
                callback_data: format!("remind_type:{}:periodic", draft_id),
            },
        ]],
    }
}

/// Second reminder step: the delay (once) or the period (periodic).
fn schedule_keyboard(draft_id: i64, timing: ReminderTiming) -> InlineKeyboardMarkup {
    let button = |label: &str, minutes: i64| InlineKeyboardButton {
        text: label.to_string(),
        callback_data: format!("remind_sched:{}:{}:{}", draft_id, timing.as_str(), minutes),
    };
    let rows = match timing {
        ReminderTiming::Once => vec![
            vec![button("In 1 hour", 60), button("In 4 hours", 240)],
            vec![button("In 1 day", 1440), button("In 3 days", 4320)],
        ],
        ReminderTiming::Periodic => vec![
            vec![button("Daily", 1440), button("Every 3 days", 4320)],
            vec![button("Weekly", 10080)],
        ],
    };
    InlineKeyboardMarkup {
        inline_keyboard: rows,
    }
}

/// Username if the account has one, else first name, else the numeric id.
fn display_name(user: &TelegramUser) -> String {
    user.username
        .clone()
        .or_else(|| user.first_name.clone())
        .unwrap_or_else(|| user.id.to_string())
}

/// The key `/remind` stores targets under: the bare username, or the
/// numeric id for accounts without one.
fn caller_handle(user: &TelegramUser) -> String {
    user.username.clone().unwrap_or_else(|| user.id.to_string())
}

/// Chat-friendly text for a refused transition. Storage errors never reach
/// this; callers propagate those instead of reporting them to the chat.
fn refusal_text(err: &WorkflowError, reference: &ItemRef) -> String {
    match err {
        WorkflowError::NotFound => format!(
            "❌ No review request found for {}",
            messages::escape_html(&reference.to_string())
        ),
        WorkflowError::InvalidState { status } => format!(
            "ℹ️ {} is already {}",
            messages::escape_html(&reference.to_string()),
            status
        ),
        other => format!("❌ {}", other),
    }
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(telegram_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_secret,
        ))
}
