//! HTTP acquisition of the two shop documents: the special-offer feed and
//! the menu page.
//!
//! The rest of the crate talks to the shop through the [`FeedSource`] and
//! [`MenuSource`] traits, so components can be exercised against in-memory
//! fakes. [`http_client::ShopClient`] is the reqwest-backed implementation.

pub mod http_client;

use async_trait::async_trait;
use thiserror::Error;

/// Failure to obtain a response body from the shop.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned {status}")]
    Status { status: u16, url: String },
}

/// Source of raw special-offer feed responses.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Issue one feed request and return the response body.
    async fn fetch_feed(&self) -> Result<Vec<u8>, TransportError>;
}

/// Source of raw menu page documents.
#[async_trait]
pub trait MenuSource: Send + Sync {
    /// Fetch the menu page and return the response body.
    async fn fetch_menu(&self) -> Result<Vec<u8>, TransportError>;
}
