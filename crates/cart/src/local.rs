//! Persisted guest cart: the expiring envelope kept in the local store.
//!
//! Stored shape under a single key:
//!
//! ```json
//! { "items": [ { "productId": 7, "quantity": 2, "product": { ... } } ], "expiresAt": 1767225600000 }
//! ```
//!
//! `expiresAt` is epoch milliseconds. Reads never fail: a missing, expired,
//! or malformed envelope reads as an empty cart, and the last two are deleted
//! on the read that notices them. A live envelope without an `items` array
//! reads as empty. An older envelope whose `expiresAt` is absent or not a
//! number is rewritten in place with a fresh expiry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use varketplace_core::{Cart, CartItem};

use crate::config::StorageConfig;
use crate::error::ErrorKind;
use crate::store::KeyValueStore;

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    items: &'a [CartItem],
    #[serde(rename = "expiresAt", with = "chrono::serde::ts_milliseconds")]
    expires_at: DateTime<Utc>,
}

/// What a read found in the store.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalRead {
    /// Nothing stored (or the store could not be read).
    Missing,
    /// A live envelope.
    Fresh(Vec<CartItem>),
    /// An envelope without expiry, now upgraded.
    Migrated(Vec<CartItem>),
    /// Past its expiry; deleted.
    Expired,
    /// Not a valid envelope; deleted.
    Corrupt,
}

impl LocalRead {
    /// The cart this read stands for.
    #[must_use]
    pub fn into_cart(self) -> Cart {
        match self {
            Self::Fresh(items) | Self::Migrated(items) => Cart::from_items(items),
            Self::Missing | Self::Expired | Self::Corrupt => Cart::empty(),
        }
    }
}

/// The guest cart mirror over a [`KeyValueStore`].
#[derive(Clone)]
pub struct LocalCart {
    store: Arc<dyn KeyValueStore>,
    key: String,
    ttl: chrono::Duration,
}

impl LocalCart {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, config: &StorageConfig) -> Self {
        Self {
            store,
            key: config.cart_key.clone(),
            ttl: config.ttl,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the cart as of now.
    #[must_use]
    pub fn read(&self) -> Cart {
        self.read_at(Utc::now()).into_cart()
    }

    /// Read the envelope as of `now`, repairing it if needed.
    #[must_use]
    pub fn read_at(&self, now: DateTime<Utc>) -> LocalRead {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return LocalRead::Missing,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Local cart store unreadable, treating as empty");
                return LocalRead::Missing;
            }
        };

        let envelope: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => return self.discard_corrupt(&e),
        };

        let expires_at = envelope
            .get("expiresAt")
            .and_then(serde_json::Value::as_i64)
            .and_then(DateTime::from_timestamp_millis);
        let items = match envelope.get("items").filter(|v| v.is_array()) {
            Some(items) => match Vec::<CartItem>::deserialize(items) {
                Ok(items) => Some(items),
                Err(e) => return self.discard_corrupt(&e),
            },
            None => None,
        };

        match (expires_at, items) {
            (Some(expires_at), _) if expires_at < now => {
                debug!(key = %self.key, %expires_at, "Local cart expired");
                self.delete();
                LocalRead::Expired
            }
            (Some(_), items) => LocalRead::Fresh(items.unwrap_or_default()),
            (None, Some(items)) => {
                debug!(key = %self.key, "Upgrading local cart envelope without expiry");
                self.write_at(&items, now);
                LocalRead::Migrated(items)
            }
            (None, None) => self.discard_corrupt(&"neither an expiry nor an items array"),
        }
    }

    fn discard_corrupt(&self, reason: &dyn std::fmt::Display) -> LocalRead {
        warn!(
            key = %self.key,
            kind = %ErrorKind::StorageCorrupt,
            error = %reason,
            "Discarding malformed local cart"
        );
        self.delete();
        LocalRead::Corrupt
    }

    /// Persist `items` with a fresh expiry.
    pub fn write(&self, items: &[CartItem]) {
        self.write_at(items, Utc::now());
    }

    /// Persist `items` expiring `ttl` after `now`.
    ///
    /// Store failures (quota, I/O) are logged and dropped; the in-memory cart
    /// stays authoritative for the session.
    pub fn write_at(&self, items: &[CartItem], now: DateTime<Utc>) {
        let envelope = EnvelopeOut {
            items,
            expires_at: now + self.ttl,
        };
        let raw = match serde_json::to_string(&envelope) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to encode local cart");
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key, &raw) {
            warn!(key = %self.key, error = %e, "Failed to persist local cart");
        }
    }

    /// Replace the mirror with an empty envelope.
    pub fn clear(&self) {
        self.write(&[]);
    }

    fn delete(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            warn!(key = %self.key, error = %e, "Failed to delete local cart");
        }
    }
}

impl std::fmt::Debug for LocalCart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCart")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
