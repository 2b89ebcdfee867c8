//! Minimal Telegram Bot API client covering the calls the bot makes.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::notify::ChatTransport;

const API_BASE: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    bot_token: String,
}

/// Envelope every Bot API response arrives in.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// A Telegram account, as embedded in updates and returned by getMe.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

impl InlineKeyboardMarkup {
    /// One button per row, the layout used for selection menus.
    pub fn single_column(buttons: Vec<InlineKeyboardButton>) -> Self {
        Self {
            inline_keyboard: buttons.into_iter().map(|b| vec![b]).collect(),
        }
    }
}

/// An entry for setMyCommands, which feeds client-side autocompletion.
#[derive(Debug, Serialize)]
pub struct CommandDescription {
    pub command: String,
    pub description: String,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Serialize)]
struct EditMessageTextRequest<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
    parse_mode: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Serialize)]
struct DeleteMessageRequest {
    chat_id: i64,
    message_id: i64,
}

#[derive(Serialize)]
struct AnswerCallbackQueryRequest<'a> {
    callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Serialize)]
struct SetMyCommandsRequest<'a> {
    commands: &'a [CommandDescription],
}

#[derive(Serialize)]
struct SetWebhookRequest<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_token: Option<&'a str>,
    allowed_updates: &'a [&'a str],
}

impl TelegramClient {
    pub fn new(bot_token: String) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("reviewbot/0.3.0")
            .build()
            .expect("Failed to create HTTP client");

        Self { client, bot_token }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.bot_token, method)
    }

    /// POST one Bot API method and unwrap its response envelope.
    async fn call<T: DeserializeOwned, B: Serialize>(&self, method: &str, body: &B) -> Result<T> {
        debug!("Calling Telegram {}", method);
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to call Telegram {}", method))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            return Err(anyhow!(
                "Telegram {} error: {} - {}",
                method,
                status,
                error_text
            ));
        }

        let api: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Telegram {} response", method))?;

        if !api.ok {
            return Err(anyhow!(
                "Telegram {} refused: {}",
                method,
                api.description.as_deref().unwrap_or("no description")
            ));
        }
        api.result
            .ok_or_else(|| anyhow!("Telegram {} returned no result", method))
    }

    /// Send an HTML-formatted message. All user-supplied text in `text`
    /// must already be escaped.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<SentMessage> {
        self.call(
            "sendMessage",
            &SendMessageRequest {
                chat_id,
                text,
                parse_mode: "HTML",
                reply_markup: None,
            },
        )
        .await
    }

    pub async fn send_message_with_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<SentMessage> {
        self.call(
            "sendMessage",
            &SendMessageRequest {
                chat_id,
                text,
                parse_mode: "HTML",
                reply_markup: Some(keyboard),
            },
        )
        .await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<()> {
        // editMessageText returns the edited message; we only need success
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                &EditMessageTextRequest {
                    chat_id,
                    message_id,
                    text,
                    parse_mode: "HTML",
                    reply_markup: None,
                },
            )
            .await?;
        Ok(())
    }

    /// Edit a message and swap its inline keyboard in the same call, used to
    /// move a selection dialog to its next step.
    pub async fn edit_message_with_keyboard(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                &EditMessageTextRequest {
                    chat_id,
                    message_id,
                    text,
                    parse_mode: "HTML",
                    reply_markup: Some(keyboard),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let _: bool = self
            .call(
                "deleteMessage",
                &DeleteMessageRequest {
                    chat_id,
                    message_id,
                },
            )
            .await?;
        Ok(())
    }

    /// Acknowledge a callback query so the client stops its spinner.
    /// Telegram expires unanswered queries quickly, so handlers answer
    /// before doing any real work.
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<()> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &AnswerCallbackQueryRequest {
                    callback_query_id,
                    text,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn set_my_commands(&self, commands: &[CommandDescription]) -> Result<()> {
        let _: bool = self
            .call("setMyCommands", &SetMyCommandsRequest { commands })
            .await?;
        Ok(())
    }

    /// Point Telegram at our webhook endpoint. Only message and callback
    /// updates are requested since nothing else is handled.
    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<()> {
        let _: bool = self
            .call(
                "setWebhook",
                &SetWebhookRequest {
                    url,
                    secret_token,
                    allowed_updates: &["message", "callback_query"],
                },
            )
            .await?;
        Ok(())
    }

    pub async fn get_me(&self) -> Result<TelegramUser> {
        // getMe takes no parameters
        self.call("getMe", &serde_json::json!({})).await
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_html(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_message(chat_id, text).await.map(|_| ())
    }
}
