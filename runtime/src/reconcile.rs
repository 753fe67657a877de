//! Join the live offer with catalog metadata.
//!
//! The feed only knows product ids. Titles, images, regular prices and
//! links come from the catalog, which is re-scraped when it does not know
//! the offered product.

use crate::acquisition::{MenuSource, TransportError};
use crate::catalog::{CatalogCache, ExtractError, Extractor, Product};
use crate::feed::CurrentOffer;
use thiserror::Error;
use tracing::info;

/// Message sent for one offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    /// Markdown caption.
    pub caption: String,
    pub image_link: String,
}

impl NotificationPayload {
    pub fn compose(offer: &CurrentOffer, product: &Product) -> Self {
        let caption = format!(
            "{}\nСтарая цена: {}₽\nЦена по акции: {}₽\n[Ссылка]({})",
            product.title, product.price, offer.discounted_price, product.canonical_link
        );
        Self {
            caption,
            image_link: product.image_link.clone(),
        }
    }
}

/// Why a fresh catalog could not be obtained.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("menu request failed: {0}")]
    Fetch(#[from] TransportError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("product {id} is not in the catalog")]
    ProductNotInCatalog { id: u16 },
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(#[from] CatalogError),
}

/// Resolves offers against a [`CatalogCache`], scraping the menu on a miss.
pub struct ReconcileEngine<M> {
    menu: M,
    extractor: Extractor,
}

impl<M: MenuSource> ReconcileEngine<M> {
    pub fn new(menu: M, extractor: Extractor) -> Self {
        Self { menu, extractor }
    }

    /// Scrape the menu and swap the result into `cache`.
    ///
    /// On failure the cache keeps whatever it held before.
    pub async fn refresh(&self, cache: &mut CatalogCache) -> Result<(), CatalogError> {
        let page = self.menu.fetch_menu().await?;
        let catalog = self.extractor.extract(&page)?;
        info!(products = catalog.len(), "catalog refreshed from menu");
        cache.replace(catalog);
        Ok(())
    }

    /// Build the notification for `offer`.
    ///
    /// A miss triggers exactly one refresh. If the fresh catalog still lacks
    /// the product the cycle fails with
    /// [`ReconcileError::ProductNotInCatalog`]; the fresh catalog stays
    /// cached either way.
    pub async fn resolve(
        &self,
        cache: &mut CatalogCache,
        offer: &CurrentOffer,
    ) -> Result<NotificationPayload, ReconcileError> {
        if let Some(product) = cache.lookup(offer.id) {
            return Ok(NotificationPayload::compose(offer, product));
        }

        info!(
            id = offer.id,
            populated = cache.is_populated(),
            "offer not in cached catalog, refreshing"
        );
        self.refresh(cache).await?;

        cache
            .lookup(offer.id)
            .map(|product| NotificationPayload::compose(offer, product))
            .ok_or(ReconcileError::ProductNotInCatalog { id: offer.id })
    }
}
