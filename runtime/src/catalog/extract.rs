//! Build a [`Catalog`] from the shop's menu page.
//!
//! The menu page is a server-rendered Next.js document. Its first inline
//! `<script>` in `<body>` starts with `__NEXT_DATA__ = ` followed by the
//! page state as JSON, which includes every product with its price, title
//! and image. The `share` link in that JSON is not trustworthy, so each
//! product's link is re-read from the rendered product card instead.
//! Products without a card are not on sale right now and are dropped.
//!
//! `scraper::Html` is `!Send`: the whole extraction is synchronous and the
//! document never outlives [`Extractor::extract`].

use super::types::{Catalog, Product};
use crate::wire::lenient_u16;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Literal that precedes the page-state JSON in the menu script.
pub const NEXT_DATA_PREFIX: &str = "__NEXT_DATA__ = ";

/// Products whose menu entries are known to be broken and are never listed.
pub const DEFAULT_DENYLIST: &[u16] = &[13943];

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("menu page has no inline script in <body>")]
    ScriptNotFound,
    #[error("malformed menu payload: {0}")]
    MalformedPayload(String),
    #[error("product {id} is displayed but its link has no href")]
    BrokenLink { id: u16 },
}

/// What the rendered page says about one product's link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductLink {
    /// No product card for this id.
    NotShown,
    /// The card's anchor exists but carries no usable `href`.
    MissingHref,
    /// The anchor's `href`, as written in the page.
    Href(String),
}

/// Lookup of a product's link in a rendered page, by product id.
pub trait ProductLinks {
    fn product_link(&self, id: u16) -> ProductLink;
}

/// A parsed menu page.
pub struct MenuDocument {
    html: Html,
}

impl MenuDocument {
    pub fn parse(page: &[u8]) -> Self {
        Self {
            html: Html::parse_document(&String::from_utf8_lossy(page)),
        }
    }

    /// Text of the first inline script that is a direct child of `<body>`.
    pub fn first_body_script(&self) -> Option<String> {
        let sel = Selector::parse("body > script:not([src])").ok()?;
        self.html
            .select(&sel)
            .next()
            .map(|script| script.text().collect::<String>())
    }
}

impl ProductLinks for MenuDocument {
    fn product_link(&self, id: u16) -> ProductLink {
        let css = format!(r#"div[data-id="{id}"] > div > div[class="product__box"] > a"#);
        let Ok(sel) = Selector::parse(&css) else {
            return ProductLink::NotShown;
        };

        match self.html.select(&sel).next() {
            None => ProductLink::NotShown,
            Some(anchor) => match anchor.value().attr("href").map(str::trim) {
                Some(href) if !href.is_empty() => ProductLink::Href(href.to_string()),
                _ => ProductLink::MissingHref,
            },
        }
    }
}

// ── Page state JSON ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct NextData {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    props: Option<Props>,
}

#[derive(Deserialize)]
struct Props {
    #[serde(rename = "initialState", default)]
    initial_state: Option<State>,
}

#[derive(Deserialize)]
struct State {
    #[serde(default)]
    products: Option<ProductsInfo>,
}

#[derive(Deserialize)]
struct ProductsInfo {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    data: Option<HashMap<u16, RawProduct>>,
}

#[derive(Deserialize)]
struct RawProduct {
    #[serde(deserialize_with = "lenient_u16")]
    price: u16,
    title: String,
    img: String,
    share: String,
}

/// An error slot counts as set unless it is absent, `null` or `""`.
fn reported_error(slot: &Option<Value>) -> Option<String> {
    match slot {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Pull the product map out of the menu script's text.
fn decode_payload(script: &str) -> Result<HashMap<u16, RawProduct>, ExtractError> {
    let line = script
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| ExtractError::MalformedPayload("script is empty".into()))?;

    let json = line
        .strip_prefix(NEXT_DATA_PREFIX)
        .ok_or_else(|| {
            ExtractError::MalformedPayload(format!("script does not start with {NEXT_DATA_PREFIX:?}"))
        })?
        .trim_end_matches(';');

    let data: NextData = serde_json::from_str(json)
        .map_err(|e| ExtractError::MalformedPayload(format!("page state: {e}")))?;

    if let Some(err) = reported_error(&data.err) {
        return Err(ExtractError::MalformedPayload(format!("menu error: {err}")));
    }
    let props = data
        .props
        .ok_or_else(|| ExtractError::MalformedPayload("props is missing".into()))?;
    let state = props
        .initial_state
        .ok_or_else(|| ExtractError::MalformedPayload("initialState is missing".into()))?;
    let products = state
        .products
        .ok_or_else(|| ExtractError::MalformedPayload("products is missing".into()))?;
    if let Some(err) = reported_error(&products.error) {
        return Err(ExtractError::MalformedPayload(format!("products error: {err}")));
    }
    products
        .data
        .ok_or_else(|| ExtractError::MalformedPayload("products data is missing".into()))
}

// ── Extraction ──────────────────────────────────────────────────────────────

/// Turns menu pages into catalogs for one shop origin.
#[derive(Debug, Clone)]
pub struct Extractor {
    origin: Url,
    denylist: HashSet<u16>,
}

impl Extractor {
    /// Extractor for `origin` with the default denylist.
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            denylist: DEFAULT_DENYLIST.iter().copied().collect(),
        }
    }

    /// Replace the denylist.
    pub fn with_denylist(mut self, ids: impl IntoIterator<Item = u16>) -> Self {
        self.denylist = ids.into_iter().collect();
        self
    }

    /// Parse a menu page into a catalog with repaired links.
    pub fn extract(&self, page: &[u8]) -> Result<Catalog, ExtractError> {
        let document = MenuDocument::parse(page);
        let script = document
            .first_body_script()
            .ok_or(ExtractError::ScriptNotFound)?;
        let products = decode_payload(&script)?;
        self.repair(products, &document)
    }

    /// Replace every product's link with the one from its rendered card.
    ///
    /// Unreconcilable products are collected first and removed afterwards.
    /// One displayed product without an `href` fails the whole catalog.
    fn repair<L>(
        &self,
        mut products: HashMap<u16, RawProduct>,
        links: &L,
    ) -> Result<Catalog, ExtractError>
    where
        L: ProductLinks + ?Sized,
    {
        let mut excluded = Vec::new();

        for (&id, product) in products.iter_mut() {
            if self.denylist.contains(&id) {
                excluded.push(id);
                continue;
            }
            if id == 0 || product.price == 0 {
                warn!(id, price = product.price, "dropping product with zero id or price");
                excluded.push(id);
                continue;
            }

            match links.product_link(id) {
                ProductLink::NotShown => {
                    debug!(id, "product is not displayed, dropping");
                    excluded.push(id);
                }
                ProductLink::MissingHref => return Err(ExtractError::BrokenLink { id }),
                ProductLink::Href(href) => {
                    let link = self
                        .origin
                        .join(&href)
                        .map_err(|_| ExtractError::BrokenLink { id })?;
                    product.share = link.to_string();
                }
            }
        }

        for id in &excluded {
            products.remove(id);
        }

        debug!(
            kept = products.len(),
            dropped = excluded.len(),
            "menu catalog extracted"
        );

        Ok(products
            .into_iter()
            .map(|(id, raw)| Product {
                id,
                price: raw.price,
                title: raw.title,
                image_link: raw.img,
                canonical_link: raw.share,
            })
            .collect())
    }
}
