//! Notification delivery.
//!
//! The scheduler only sees the [`Notifier`] trait. [`telegram::TelegramNotifier`]
//! posts photos with captions to a Telegram channel through the Bot API.

pub mod telegram;

use async_trait::async_trait;
use thiserror::Error;

/// How the receiving side should render a caption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Plain,
    Markdown,
}

#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("notifier request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notifier credential rejected: {0}")]
    Unauthorized(String),
    #[error("message rejected: {description}")]
    Rejected {
        code: Option<i64>,
        description: String,
    },
}

impl NotifierError {
    /// True when the remote side refused the credential, as opposed to being
    /// unreachable or refusing one message.
    pub fn is_rejected_credential(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// A destination for offer announcements.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Check that the credential is accepted. Returns the account name.
    async fn verify(&self) -> Result<String, NotifierError>;

    /// Post an image with a caption to `channel`.
    async fn send_photo(
        &self,
        channel: &str,
        image_url: &str,
        caption: &str,
        mode: ParseMode,
    ) -> Result<(), NotifierError>;
}
