//! Special-offer feed: request, envelope decoding, and validation.
//!
//! The feed answers with a nested envelope. Checks run in a fixed order and
//! each maps to one [`PollError`] variant:
//!
//! 1. transport failure            → [`PollError::Transport`]
//! 2. non-zero `errorCode`         → [`PollError::Remote`]
//! 3. `ResponseBody.result: false` → [`PollError::NoActiveOffer`]
//! 4. no `"current"` slot          → [`PollError::MalformedResponse`]
//! 5. zero id or price             → [`PollError::InvalidOffer`]

use crate::acquisition::{FeedSource, TransportError};
use crate::wire::lenient_u16;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Name of the item slot holding the offer that is live right now.
const CURRENT_SLOT: &str = "current";

/// The offer the feed reports as live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentOffer {
    pub id: u16,
    pub discounted_price: u16,
    /// Seconds until the offer ends, as reported by the shop.
    pub remaining_seconds: u16,
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("shop reported code {code}, error code {error_code}, message: {message}")]
    Remote {
        code: i64,
        error_code: i64,
        message: String,
    },
    #[error("no special offer is active")]
    NoActiveOffer,
    #[error("malformed feed response: {0}")]
    MalformedResponse(String),
    #[error("offer is invalid (id {id}, price {discounted_price})")]
    InvalidOffer { id: u16, discounted_price: u16 },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Response", alias = "response")]
    response: ResponseInfo,
    #[serde(rename = "ResponseBody", alias = "responseBody", default)]
    body: Option<ResponseBody>,
}

#[derive(Deserialize)]
struct ResponseInfo {
    #[serde(rename = "Result", alias = "result")]
    result: ResultInfo,
}

#[derive(Deserialize)]
struct ResultInfo {
    #[serde(alias = "Code")]
    code: i64,
    #[serde(rename = "errorCode", alias = "ErrorCode")]
    error_code: i64,
    #[serde(alias = "Message", default)]
    message: String,
}

#[derive(Deserialize)]
struct ResponseBody {
    result: bool,
    #[serde(default)]
    items: Option<HashMap<String, Value>>,
}

#[derive(Deserialize)]
struct FeedItem {
    #[serde(deserialize_with = "lenient_u16")]
    id: u16,
    #[serde(deserialize_with = "lenient_u16")]
    price: u16,
    time: FeedTime,
}

#[derive(Deserialize)]
struct FeedTime {
    left: u16,
}

/// Poll the feed once and return the live offer.
pub async fn poll<S>(source: &S) -> Result<CurrentOffer, PollError>
where
    S: FeedSource + ?Sized,
{
    let body = source.fetch_feed().await?;
    decode_offer(&body)
}

/// Decode and validate a raw feed response.
pub fn decode_offer(body: &[u8]) -> Result<CurrentOffer, PollError> {
    let envelope: Envelope = serde_json::from_slice(body)
        .map_err(|e| PollError::MalformedResponse(format!("envelope: {e}")))?;

    let result = envelope.response.result;
    if result.error_code != 0 {
        return Err(PollError::Remote {
            code: result.code,
            error_code: result.error_code,
            message: result.message,
        });
    }

    let body = envelope
        .body
        .ok_or_else(|| PollError::MalformedResponse("ResponseBody is missing".into()))?;
    if !body.result {
        return Err(PollError::NoActiveOffer);
    }

    let current = body
        .items
        .and_then(|mut items| items.remove(CURRENT_SLOT))
        .ok_or_else(|| PollError::MalformedResponse("items do not contain current offer".into()))?;
    let item: FeedItem = serde_json::from_value(current)
        .map_err(|e| PollError::MalformedResponse(format!("current offer: {e}")))?;

    if item.id == 0 || item.price == 0 {
        return Err(PollError::InvalidOffer {
            id: item.id,
            discounted_price: item.price,
        });
    }

    Ok(CurrentOffer {
        id: item.id,
        discounted_price: item.price,
        remaining_seconds: item.time.left,
    })
}
