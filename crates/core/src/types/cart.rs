//! Cart and cart line types.
//!
//! A [`Cart`] holds at most one [`CartItem`] per product and never keeps a
//! line with a zero quantity. Every mutating method here preserves both
//! rules, so callers that only go through these methods cannot break them.
//!
//! JSON field names follow the backend and the persisted envelope: a line is
//! `{ id?, productId, quantity, product? }` where `id` is the server-side
//! line ID.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::id::{CartId, CartItemId, ProductId, UserId};
use super::product::ProductSnapshot;

/// Rejected quantity for a cart mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("quantity must be at least 1")]
    Zero,
}

/// Explicit lookup key for a cart line.
///
/// Server line IDs and product IDs are both integers, so the key says which
/// one it is instead of matching either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKey {
    /// Server-side cart line ID.
    Server(CartItemId),
    /// Product ID, the join key for lines that only exist locally.
    Product(ProductId),
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server(id) => write!(f, "line {id}"),
            Self::Product(id) => write!(f, "product {id}"),
        }
    }
}

/// One cart line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    /// Server line ID, present once the line exists remotely.
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<CartItemId>,
    #[serde(rename = "productId")]
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductSnapshot>,
    /// Further server lines for the same product that were folded into this
    /// one. Updates and removals have to reach them too.
    #[serde(skip)]
    pub merged_server_ids: Vec<CartItemId>,
}

impl CartItem {
    /// A line that has not been persisted remotely.
    #[must_use]
    pub const fn local(
        product_id: ProductId,
        quantity: u32,
        product: Option<ProductSnapshot>,
    ) -> Self {
        Self {
            server_id: None,
            product_id,
            quantity,
            product,
            merged_server_ids: Vec::new(),
        }
    }

    /// A line as the server reported it.
    #[must_use]
    pub const fn remote(
        server_id: CartItemId,
        product_id: ProductId,
        quantity: u32,
        product: Option<ProductSnapshot>,
    ) -> Self {
        Self {
            server_id: Some(server_id),
            product_id,
            quantity,
            product,
            merged_server_ids: Vec::new(),
        }
    }

    /// Every server line behind this line, primary first. Empty for a line
    /// that only exists locally.
    #[must_use]
    pub fn server_ids(&self) -> Vec<CartItemId> {
        self.server_id
            .into_iter()
            .chain(self.merged_server_ids.iter().copied())
            .collect()
    }

    /// Unit price from the snapshot, if known.
    #[must_use]
    pub fn unit_price(&self) -> Option<Decimal> {
        self.product.as_ref().and_then(|p| p.price)
    }

    /// Quantity times unit price; unknown prices count as zero.
    ///
    /// Saturates at `Decimal::MAX` instead of overflowing.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price()
            .unwrap_or(Decimal::ZERO)
            .checked_mul(Decimal::from(self.quantity))
            .unwrap_or(Decimal::MAX)
    }

    fn matches(&self, key: ItemKey) -> bool {
        match key {
            ItemKey::Server(id) => {
                self.server_id == Some(id) || self.merged_server_ids.contains(&id)
            }
            ItemKey::Product(id) => self.product_id == id,
        }
    }
}

/// A shopping cart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    /// Server cart ID, when the cart came from the backend.
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<CartId>,
    /// Owning client, when the cart came from the backend.
    #[serde(rename = "client_id", default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<UserId>,
    #[serde(default)]
    pub items: Vec<CartItem>,
}

impl Cart {
    /// An empty cart with no server identity.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            server_id: None,
            owner_id: None,
            items: Vec::new(),
        }
    }

    /// A local cart built from persisted lines, normalized.
    #[must_use]
    pub fn from_items(items: Vec<CartItem>) -> Self {
        let mut cart = Self {
            server_id: None,
            owner_id: None,
            items,
        };
        cart.normalize();
        cart
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn find_by_server_id(&self, id: CartItemId) -> Option<&CartItem> {
        self.items.iter().find(|it| it.matches(ItemKey::Server(id)))
    }

    #[must_use]
    pub fn find_by_product_id(&self, id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|it| it.matches(ItemKey::Product(id)))
    }

    /// Look up a line by an explicit key.
    #[must_use]
    pub fn find(&self, key: ItemKey) -> Option<&CartItem> {
        match key {
            ItemKey::Server(id) => self.find_by_server_id(id),
            ItemKey::Product(id) => self.find_by_product_id(id),
        }
    }

    fn position(&self, key: ItemKey) -> Option<usize> {
        self.items.iter().position(|it| it.matches(key))
    }

    /// Add `quantity` of a product: bump the existing line or append a new one.
    ///
    /// A snapshot is attached to a new line, and to an existing line that
    /// has none yet.
    ///
    /// # Errors
    ///
    /// Returns `QuantityError::Zero` if `quantity` is zero; the cart is
    /// left untouched.
    pub fn merge_or_append(
        &mut self,
        product_id: ProductId,
        quantity: u32,
        snapshot: Option<ProductSnapshot>,
    ) -> Result<(), QuantityError> {
        if quantity == 0 {
            return Err(QuantityError::Zero);
        }
        if let Some(item) = self
            .items
            .iter_mut()
            .find(|it| it.matches(ItemKey::Product(product_id)))
        {
            item.quantity = item.quantity.saturating_add(quantity);
            if item.product.is_none() {
                item.product = snapshot;
            }
        } else {
            self.items
                .push(CartItem::local(product_id, quantity, snapshot));
        }
        Ok(())
    }

    /// Set a line's quantity. Zero removes the line.
    ///
    /// Returns `false` if no line matches `key`.
    pub fn set_quantity(&mut self, key: ItemKey, quantity: u32) -> bool {
        let Some(index) = self.position(key) else {
            return false;
        };
        if quantity == 0 {
            self.items.remove(index);
        } else if let Some(item) = self.items.get_mut(index) {
            item.quantity = quantity;
        }
        true
    }

    /// Remove a line, returning it.
    pub fn remove(&mut self, key: ItemKey) -> Option<CartItem> {
        self.position(key).map(|index| self.items.remove(index))
    }

    /// Drop everything, including server identity.
    pub fn clear(&mut self) {
        *self = Self::empty();
    }

    /// Restore the invariants on data from an untrusted source.
    ///
    /// Zero-quantity lines are dropped. Repeated product IDs are folded into
    /// the first occurrence, summing quantities; the server IDs of folded
    /// lines are kept in `merged_server_ids`. Returns the number of lines
    /// removed.
    pub fn normalize(&mut self) -> usize {
        let before = self.items.len();
        let mut folded: Vec<CartItem> = Vec::with_capacity(before);
        for item in self.items.drain(..) {
            if item.quantity == 0 {
                continue;
            }
            if let Some(existing) = folded
                .iter_mut()
                .find(|it| it.product_id == item.product_id)
            {
                let folded_ids = item.server_ids();
                existing.quantity = existing.quantity.saturating_add(item.quantity);
                if existing.product.is_none() {
                    existing.product = item.product;
                }
                for id in folded_ids {
                    if existing.server_id.is_none() {
                        existing.server_id = Some(id);
                    } else if !existing.server_ids().contains(&id) {
                        existing.merged_server_ids.push(id);
                    }
                }
            } else {
                folded.push(item);
            }
        }
        self.items = folded;
        before - self.items.len()
    }

    /// Sum of quantities over all lines.
    #[must_use]
    pub fn total_item_count(&self) -> u64 {
        self.items.iter().map(|it| u64::from(it.quantity)).sum()
    }

    /// Sum of line totals; lines without a known price contribute zero.
    ///
    /// Saturates at `Decimal::MAX` instead of overflowing.
    #[must_use]
    pub fn total_price(&self) -> Decimal {
        self.items.iter().fold(Decimal::ZERO, |total, item| {
            total
                .checked_add(item.line_total())
                .unwrap_or(Decimal::MAX)
        })
    }
}
