//! Configuration loading and resolution.
//!
//! Two sources: a JSON settings file holding the bot credential and target
//! channel (prompted for and saved on first run), and environment variables
//! for endpoints and timings.

use crate::acquisition::http_client::DEFAULT_ORIGIN;
use crate::notify::telegram::DEFAULT_API_URL;
use crate::scheduler::BackoffPolicy;
use anyhow::{bail, Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

const DEFAULT_CONFIG_FILE: &str = "config.json";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Resolve the settings file path.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Some(env_path) = read_env_string("TANUKI_CONFIG") {
        return PathBuf::from(env_path);
    }

    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Bot credential and destination channel.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "BotToken", alias = "bot_token")]
    pub bot_token: String,
    #[serde(rename = "Channel", alias = "channel")]
    pub channel: String,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("bot_token", &"<redacted>")
            .field("channel", &self.channel)
            .finish()
    }
}

impl Settings {
    fn is_complete(&self) -> bool {
        !self.bot_token.trim().is_empty() && !self.channel.trim().is_empty()
    }

    /// Read settings from `path`.
    ///
    /// `None` when the file is missing, unparseable, or has an empty field;
    /// the caller is expected to prompt in that case.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        match serde_json::from_str::<Settings>(&raw) {
            Ok(settings) if settings.is_complete() => Ok(Some(settings)),
            Ok(_) => {
                warn!(path = %path.display(), "settings file has empty fields, ignoring");
                Ok(None)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "settings file is not valid, ignoring");
                Ok(None)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Ask for both values on the terminal.
    pub fn prompt() -> Result<Self> {
        let mut rl = DefaultEditor::new().context("failed to open terminal")?;
        Self::prompt_with(|label| match rl.readline(label) {
            Ok(line) => Ok(line),
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                bail!("settings prompt cancelled")
            }
            Err(e) => Err(e.into()),
        })
    }

    /// Ask through `ask` until each value is non-empty.
    pub fn prompt_with<F>(mut ask: F) -> Result<Self>
    where
        F: FnMut(&str) -> Result<String>,
    {
        let bot_token = ask_non_empty(&mut ask, "Bot token: ")?;
        let channel = ask_non_empty(&mut ask, "Channel (@name or chat id): ")?;
        Ok(Self { bot_token, channel })
    }

    /// Load from `path`, or prompt and persist when nothing usable is there.
    pub fn load_or_prompt(path: &Path) -> Result<Self> {
        if let Some(settings) = Self::load(path)? {
            return Ok(settings);
        }
        info!(path = %path.display(), "no usable settings, prompting");
        let settings = Self::prompt()?;
        settings.save(path)?;
        Ok(settings)
    }
}

fn ask_non_empty<F>(ask: &mut F, label: &str) -> Result<String>
where
    F: FnMut(&str) -> Result<String>,
{
    loop {
        let answer = ask(label)?;
        let answer = answer.trim();
        if !answer.is_empty() {
            return Ok(answer.to_string());
        }
    }
}

/// Endpoints and timings, all overridable from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub origin: Url,
    pub telegram_api: Url,
    pub request_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(read_env_string)
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// Unparseable numbers fall back to their defaults. Unparseable URLs are
    /// an error.
    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let secs = |name: &str, default: u64| -> Duration {
            Duration::from_secs(
                lookup(name)
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(default),
            )
        };
        let url = |name: &str, default: &str| -> Result<Url> {
            let raw = lookup(name).unwrap_or_else(|| default.to_string());
            Url::parse(raw.trim()).with_context(|| format!("{name} is not a valid URL: {raw}"))
        };

        let defaults = BackoffPolicy::default();
        Ok(Self {
            origin: url("TANUKI_ORIGIN", DEFAULT_ORIGIN)?,
            telegram_api: url("TELEGRAM_API_URL", DEFAULT_API_URL)?,
            request_timeout: secs("TANUKI_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            backoff: BackoffPolicy {
                error: secs("TANUKI_BACKOFF_SECS", defaults.error.as_secs()),
                no_offer: secs("TANUKI_NO_OFFER_BACKOFF_SECS", defaults.no_offer.as_secs()),
                min_interval: secs("TANUKI_MIN_POLL_SECS", defaults.min_interval.as_secs()),
            },
        })
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
