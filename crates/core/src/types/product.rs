//! Product snapshots carried on cart lines.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::ProductId;

/// Product image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductImage {
    pub url: String,
}

/// Point-in-time copy of product data stored with a cart line.
///
/// Lets the cart render name and price without another catalog request.
/// Fields the cart does not interpret are kept in `extra` so a snapshot
/// survives a trip through local storage unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Unit price in the store currency. Accepts JSON numbers or strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ProductImage>,
    /// Stock available, when the catalog reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProductSnapshot {
    /// Snapshot with only an ID.
    #[must_use]
    pub fn new(id: ProductId) -> Self {
        Self {
            id,
            name: None,
            price: None,
            images: Vec::new(),
            quantity: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    #[must_use]
    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.images.push(ProductImage { url: url.into() });
        self
    }
}

/// What a caller hands to `add_to_cart`: a bare ID or a full snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum ProductRef {
    Id(ProductId),
    Snapshot(ProductSnapshot),
}

impl ProductRef {
    #[must_use]
    pub const fn product_id(&self) -> ProductId {
        match self {
            Self::Id(id) => *id,
            Self::Snapshot(snapshot) => snapshot.id,
        }
    }

    /// Split into the ID and the snapshot, if any.
    #[must_use]
    pub fn into_parts(self) -> (ProductId, Option<ProductSnapshot>) {
        match self {
            Self::Id(id) => (id, None),
            Self::Snapshot(snapshot) => (snapshot.id, Some(snapshot)),
        }
    }
}

impl From<ProductId> for ProductRef {
    fn from(id: ProductId) -> Self {
        Self::Id(id)
    }
}

impl From<ProductSnapshot> for ProductRef {
    fn from(snapshot: ProductSnapshot) -> Self {
        Self::Snapshot(snapshot)
    }
}
