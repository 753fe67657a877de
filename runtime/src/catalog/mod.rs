//! Product catalog scraped from the menu page, and its in-memory cache.

pub mod cache;
pub mod extract;
pub mod types;

pub use cache::CatalogCache;
pub use extract::{ExtractError, Extractor};
pub use types::{Catalog, Product};
