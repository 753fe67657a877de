//! Async HTTP client for the shop, wrapping reqwest.
//!
//! One client, one origin, one request timeout. No retries: a failed request
//! surfaces as a [`TransportError`] and the scheduler decides when to try
//! again.

use super::{FeedSource, MenuSource, TransportError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

/// Default shop origin.
pub const DEFAULT_ORIGIN: &str = "https://www.tanuki.ru";

/// Body of every special-offer request. The API wants to know which agent
/// is asking and which method it calls; nothing in it varies between polls.
pub fn feed_request_body() -> Value {
    json!({
        "header": {
            "version": "2.0",
            "userId": "Bot",
            "debugMode": false,
            "agent": {
                "device": "desktop",
                "version": "Bot"
            },
            "cityId": "1"
        },
        "method": {
            "name": "getSpecialGoods"
        },
        "data": {}
    })
}

/// HTTP client bound to a single shop origin.
#[derive(Clone)]
pub struct ShopClient {
    client: reqwest::Client,
    origin: Url,
    feed_url: Url,
    menu_url: Url,
}

impl ShopClient {
    /// Create a client for `origin` whose requests give up after `timeout`.
    pub fn new(origin: Url, timeout: Duration) -> Result<Self> {
        let ua = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(ua)
            .build()
            .context("failed to build shop HTTP client")?;

        let feed_url = origin
            .join("/api/")
            .with_context(|| format!("invalid feed URL for origin {origin}"))?;
        let menu_url = origin
            .join("/menu")
            .with_context(|| format!("invalid menu URL for origin {origin}"))?;

        Ok(Self {
            client,
            origin,
            feed_url,
            menu_url,
        })
    }

    /// The origin product links are resolved against.
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    async fn read_body(resp: reqwest::Response) -> Result<Vec<u8>, TransportError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait]
impl FeedSource for ShopClient {
    async fn fetch_feed(&self) -> Result<Vec<u8>, TransportError> {
        tracing::debug!(url = %self.feed_url, "requesting special offer");
        let resp = self
            .client
            .post(self.feed_url.clone())
            .json(&feed_request_body())
            .send()
            .await?;
        Self::read_body(resp).await
    }
}

#[async_trait]
impl MenuSource for ShopClient {
    async fn fetch_menu(&self) -> Result<Vec<u8>, TransportError> {
        tracing::debug!(url = %self.menu_url, "requesting menu page");
        let resp = self.client.get(self.menu_url.clone()).send().await?;
        Self::read_body(resp).await
    }
}
