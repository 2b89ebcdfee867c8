use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};

use reviewbot::config::Config;
use reviewbot::notify::NotificationDispatcher;
use reviewbot::scheduler;
use reviewbot::store::SqliteStore;
use reviewbot::telegram::{CommandDescription, TelegramClient};
use reviewbot::webhook::webhook_router;
use reviewbot::workflow::ReviewWorkflow;
use reviewbot::AppState;

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "reviewbot"
    })))
}

async fn help_handler(headers: HeaderMap) -> Response {
    // Check Accept header for content negotiation
    let accept = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json");

    // If client prefers HTML, serve HTML (case-insensitive check)
    if accept.to_lowercase().contains("text/html") {
        let html = generate_help_html();
        return Html(html).into_response();
    }

    // Default to JSON
    let version = reviewbot::get_bot_version();
    let json_data = json!({
        "service": "reviewbot",
        "version": version,
        "description": "Telegram bot that tracks review requests and nags reviewers",
        "endpoints": [
            {
                "path": "/health",
                "method": "GET",
                "description": "Health check endpoint",
                "authentication": "None",
                "response_format": "application/json"
            },
            {
                "path": "/webhook",
                "method": "POST",
                "description": "Telegram webhook receiver for messages and keyboard callbacks",
                "authentication": "Telegram secret token (X-Telegram-Bot-Api-Secret-Token)",
                "response_format": "application/json"
            },
            {
                "path": "/help",
                "method": "GET",
                "description": "API documentation and service information",
                "authentication": "None",
                "response_format": "Supports content negotiation (JSON/HTML)"
            },
            {
                "path": "/status",
                "method": "GET",
                "description": "Status dashboard showing tracked review items and reviewers",
                "authentication": "Bearer token (STATUS_AUTH_TOKEN)",
                "response_format": "Supports content negotiation (JSON/HTML)"
            }
        ],
        "features": [
            "Review request tracking through pending / need-fix / approved states",
            "Batch registration, one 'Title : link' per line",
            "Inline keyboard selection for approve, need-fix and resubmit",
            "Scheduled reviewer reminders with separate pending and need-fix cadences",
            "Quiet hours for scheduled reminders",
            "Manual reviewer ping via /review_notify",
            "Personal reminders with one-time and periodic schedules",
            "Reviewer roster management"
        ],
        "configuration": {
            "required_env_vars": [
                "TELEGRAM_BOT_TOKEN",
                "ALLOWED_CHAT_IDS"
            ],
            "optional_env_vars": [
                "PORT (default: 3000)",
                "STATE_DIR (default: state)",
                "REMINDER_INTERVAL_PENDING (default: 60 minutes)",
                "REMINDER_INTERVAL_NEED_FIX (default: 120 minutes)",
                "QUIET_HOURS_START / QUIET_HOURS_END (HH:MM, both required)",
                "UTC_OFFSET_MINUTES (default: 480)",
                "TELEGRAM_WEBHOOK_URL",
                "TELEGRAM_WEBHOOK_SECRET",
                "STATUS_AUTH_TOKEN"
            ]
        }
    });

    Json(json_data).into_response()
}

fn generate_help_html() -> String {
    const HELP_HTML_TEMPLATE: &str = include_str!("help.html");
    let version = reviewbot::get_bot_version();
    HELP_HTML_TEMPLATE.replace("{version}", &version)
}

async fn status_handler(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    // Without a configured token the endpoint stays dark
    let Some(expected) = &state.config.status_auth_token else {
        return StatusCode::FORBIDDEN.into_response();
    };
    let authorized = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token == expected)
        .unwrap_or(false);
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let items = match state.reviews.list_all().await {
        Ok(items) => items,
        Err(e) => {
            error!("Failed to load review items for status page: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let reviewers = match state.reviewers.list().await {
        Ok(reviewers) => reviewers,
        Err(e) => {
            error!("Failed to load reviewers for status page: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let pending_reminders = match state.reminders.count_pending().await {
        Ok(count) => count,
        Err(e) => {
            error!("Failed to count reminders for status page: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let version = reviewbot::get_bot_version();
    let status_data =
        reviewbot::status::StatusData::from_parts(items, reviewers, pending_reminders, version);

    // Check Accept header for content negotiation
    let accept = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json");

    // If client prefers HTML, serve HTML
    if accept.to_lowercase().contains("text/html") {
        let html = generate_status_html(&status_data);
        return Html(html).into_response();
    }

    // Default to JSON
    Json(status_data).into_response()
}

/// Serialize a value for the dashboard's script block. Literal `<` is
/// JSON-escaped inside the strings so a review title cannot close the
/// surrounding script tag.
fn script_json<T: serde::Serialize>(value: &T, empty: &str) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| empty.to_string())
        .replace('<', "\\u003c")
}

fn generate_status_html(data: &reviewbot::status::StatusData) -> String {
    const STATUS_HTML_TEMPLATE: &str = include_str!("status.html");

    let summary_json = script_json(&data.summary, "{}");
    let reviews_json = script_json(&data.reviews, "[]");
    let reviewers_json = script_json(&data.reviewers, "[]");
    let timestamp = chrono::Utc::now()
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string();

    STATUS_HTML_TEMPLATE
        .replace("{version}", &data.version)
        .replace("{timestamp}", &timestamp)
        .replace("{summary_json}", &summary_json)
        .replace("{reviews_json}", &reviews_json)
        .replace("{reviewers_json}", &reviewers_json)
}

/// The command list Telegram clients show for `/` autocompletion.
fn command_menu() -> Vec<CommandDescription> {
    let entry = |command: &str, description: &str| CommandDescription {
        command: command.to_string(),
        description: description.to_string(),
    };
    vec![
        entry("review", "Register a review request (Title : link)"),
        entry("review_approve", "Approve an item"),
        entry("review_need_fix", "Send an item back for fixes"),
        entry("review_again", "Resubmit a fixed item"),
        entry("review_list", "List tracked items"),
        entry("review_notify", "Ping reviewers about pending items"),
        entry("reviewer_add", "Add a reviewer"),
        entry("reviewer_remove", "Remove a reviewer"),
        entry("reviewer_list", "List reviewers"),
        entry("remind", "Schedule a reminder (@user content)"),
        entry("remind_list", "List your open reminders"),
        entry("remind_done", "Mark a reminder as done (ID)"),
        entry("help", "Show usage"),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting review bot");

    let config =
        Config::from_env().expect("Failed to load configuration from environment variables");

    let db_path = config.state_dir.join("reviewbot.db");
    info!("Using state database: {}", db_path.display());
    let store = Arc::new(SqliteStore::new(&db_path).expect("Failed to initialize SQLite database"));

    let telegram = TelegramClient::new(config.bot_token.clone());

    let me = telegram
        .get_me()
        .await
        .context("Failed to look up the bot account (check TELEGRAM_BOT_TOKEN)")?;
    let bot_username = me.username.unwrap_or_else(|| format!("bot{}", me.id));
    info!("Authenticated as @{}", bot_username);

    let workflow = ReviewWorkflow::new(store.clone());
    let dispatcher = NotificationDispatcher::new(
        Arc::new(telegram.clone()),
        store.clone(),
        config.allowed_chat_ids.clone(),
    );

    let app_state = Arc::new(AppState {
        config: config.clone(),
        telegram: telegram.clone(),
        workflow,
        reviews: store.clone(),
        reviewers: store.clone(),
        reminders: store,
        dispatcher,
        bot_username,
        need_fix_comments: Arc::new(RwLock::new(HashMap::new())),
    });

    if let Err(e) = telegram.set_my_commands(&command_menu()).await {
        warn!("Failed to register the command menu: {:?}", e);
    }

    if config.webhook_secret.is_none() {
        warn!("TELEGRAM_WEBHOOK_SECRET is not set, webhook calls will be accepted unauthenticated");
    }

    match &config.webhook_url {
        Some(url) => {
            telegram
                .set_webhook(url, config.webhook_secret.as_deref())
                .await
                .context("Failed to register the webhook with Telegram")?;
            info!("Webhook registered at {}", url);
        }
        None => {
            warn!("TELEGRAM_WEBHOOK_URL is not set, assuming the webhook is registered externally")
        }
    }

    // Scheduled reminder loops
    tokio::spawn(scheduler::pending_reminder_loop(app_state.clone()));
    tokio::spawn(scheduler::need_fix_reminder_loop(app_state.clone()));
    tokio::spawn(scheduler::reminder_sweep_loop(app_state.clone()));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/help", get(help_handler))
        .route("/status", get(status_handler))
        .merge(webhook_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state.clone());

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
