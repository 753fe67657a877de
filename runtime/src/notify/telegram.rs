//! Telegram Bot API notifier.
//!
//! Every call is a JSON POST to `{api}/bot{token}/{method}`. The token is
//! part of the URL, so transport errors are stripped of their URL before
//! they can reach a log line.

use super::{NotifierError, Notifier, ParseMode};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Default Bot API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

#[derive(Deserialize)]
struct ApiReply<T> {
    ok: bool,
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

#[derive(Deserialize)]
struct BotUser {
    first_name: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Serialize)]
struct SendPhoto<'a> {
    chat_id: &'a str,
    photo: &'a str,
    caption: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
}

fn parse_mode_name(mode: ParseMode) -> Option<&'static str> {
    match mode {
        ParseMode::Plain => None,
        ParseMode::Markdown => Some("Markdown"),
    }
}

fn transport(e: reqwest::Error) -> NotifierError {
    NotifierError::Transport(e.without_url())
}

/// Sends notifications as a Telegram bot.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

impl TelegramNotifier {
    pub fn new(api_url: &Url, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Telegram HTTP client")?;

        Ok(Self {
            client,
            api_url: api_url.as_str().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<ApiReply<T>, NotifierError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/bot{}/{}", self.api_url, self.token, method);
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            return Err(NotifierError::Unauthorized(format!(
                "{method} returned {}",
                status.as_u16()
            )));
        }

        resp.json::<ApiReply<T>>().await.map_err(transport)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn verify(&self) -> Result<String, NotifierError> {
        let reply: ApiReply<BotUser> = self.call("getMe", &serde_json::json!({})).await?;
        match reply.result {
            Some(user) if reply.ok => Ok(user.username.unwrap_or(user.first_name)),
            _ => Err(NotifierError::Unauthorized(
                reply
                    .description
                    .unwrap_or_else(|| "getMe was not ok".to_string()),
            )),
        }
    }

    async fn send_photo(
        &self,
        channel: &str,
        image_url: &str,
        caption: &str,
        mode: ParseMode,
    ) -> Result<(), NotifierError> {
        let body = SendPhoto {
            chat_id: channel,
            photo: image_url,
            caption,
            parse_mode: parse_mode_name(mode),
        };
        let reply: ApiReply<serde_json::Value> = self.call("sendPhoto", &body).await?;
        if reply.ok {
            return Ok(());
        }
        Err(NotifierError::Rejected {
            code: reply.error_code,
            description: reply
                .description
                .unwrap_or_else(|| "sendPhoto was not ok".to_string()),
        })
    }
}
