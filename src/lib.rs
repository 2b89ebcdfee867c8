pub mod command;
pub mod config;
pub mod messages;
pub mod notify;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod telegram;
pub mod webhook;
pub mod workflow;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

pub use config::Config;
pub use notify::NotificationDispatcher;
pub use store::{ReminderStore, ReviewStore, ReviewerRegistry};
pub use telegram::TelegramClient;
pub use workflow::ReviewWorkflow;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub fn get_bot_version() -> String {
    // First check for a git hash passed in by the deployment build
    if let Some(git_hash) = option_env!("REVIEWBOT_GIT_HASH") {
        if git_hash.len() >= 8 {
            git_hash[..8].to_string()
        } else {
            git_hash.to_string()
        }
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        // Fall back to built crate's git detection (for cargo builds)
        if git_hash.len() >= 8 {
            git_hash[..8].to_string()
        } else {
            git_hash.to_string()
        }
    } else {
        "unknown".to_string()
    }
}

pub struct AppState {
    pub config: Config,
    pub telegram: TelegramClient,
    pub workflow: ReviewWorkflow,
    pub reviews: Arc<dyn ReviewStore>,
    pub reviewers: Arc<dyn ReviewerRegistry>,
    pub reminders: Arc<dyn ReminderStore>,
    pub dispatcher: NotificationDispatcher,
    /// Username the bot was registered under, used to ignore commands
    /// addressed to other bots in the same group.
    pub bot_username: String,
    /// Comments supplied with a bare `/review_need_fix`, keyed by the user
    /// who issued it, held until that user picks an item from the keyboard.
    pub need_fix_comments: Arc<RwLock<HashMap<i64, String>>>,
}
