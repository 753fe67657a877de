//! Catalog data model.

use std::collections::HashMap;

/// A product as listed on the menu page, with its link already repaired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: u16,
    /// Regular (non-promotional) price. Never zero.
    pub price: u16,
    pub title: String,
    pub image_link: String,
    /// Absolute link to the product page on the shop.
    pub canonical_link: String,
}

/// All products known from one menu scrape, keyed by id.
///
/// Built in one piece by the extractor and never edited afterwards; a newer
/// scrape produces a new `Catalog`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    products: HashMap<u16, Product>,
}

impl Catalog {
    pub fn get(&self, id: u16) -> Option<&Product> {
        self.products.get(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.products.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Product ids in ascending order.
    pub fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.products.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl FromIterator<Product> for Catalog {
    fn from_iter<I: IntoIterator<Item = Product>>(iter: I) -> Self {
        Self {
            products: iter.into_iter().map(|p| (p.id, p)).collect(),
        }
    }
}
