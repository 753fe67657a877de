//! In-memory holder for the latest catalog.
//!
//! The cache only stores and answers. It never fetches: on a miss the caller
//! decides whether to scrape the menu again and hands the result to
//! [`CatalogCache::replace`].

use super::types::{Catalog, Product};
use std::sync::Arc;

/// Holds zero or one [`Catalog`].
///
/// The catalog sits behind an `Arc`, so replacing it is a pointer swap: a
/// reader holding a [`snapshot`](Self::snapshot) keeps the complete old
/// catalog, and later lookups see only the new one.
#[derive(Debug, Default)]
pub struct CatalogCache {
    catalog: Option<Arc<Catalog>>,
}

impl CatalogCache {
    /// Create an empty, unpopulated cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a product. `None` means a miss, whether the cache is empty or
    /// the catalog lacks the id.
    pub fn lookup(&self, id: u16) -> Option<&Product> {
        self.catalog.as_deref().and_then(|catalog| catalog.get(id))
    }

    /// Swap in a freshly extracted catalog, dropping the previous one.
    pub fn replace(&mut self, catalog: Catalog) {
        tracing::debug!(products = catalog.len(), "catalog cache replaced");
        self.catalog = Some(Arc::new(catalog));
    }

    /// Forget the cached catalog.
    pub fn invalidate(&mut self) {
        self.catalog = None;
    }

    pub fn is_populated(&self) -> bool {
        self.catalog.is_some()
    }

    /// Number of cached products (zero when unpopulated).
    pub fn len(&self) -> usize {
        self.catalog.as_ref().map_or(0, |catalog| catalog.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared handle to the current catalog.
    pub fn snapshot(&self) -> Option<Arc<Catalog>> {
        self.catalog.clone()
    }
}
