//! Error types for the cart synchronizer.
//!
//! [`CartError`] is what operations return. [`ErrorKind`] is the coarse,
//! copyable classification kept as the synchronizer's `last_error` so a UI
//! can pick a message without holding the error itself.

use serde::Serialize;
use thiserror::Error;
use varketplace_core::{ItemKey, QuantityError};

/// Coarse classification of a cart failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The backend could not be reached, answered non-2xx, or sent a body
    /// that could not be decoded.
    NetworkFailure,
    /// The backend rejected the session credentials.
    Unauthorized,
    /// The target line of an update or removal is not in the cart.
    ItemNotFound,
    /// The local envelope was malformed. Recovered by deleting it; never
    /// returned from an operation.
    StorageCorrupt,
    /// The caller passed an invalid argument (e.g. zero quantity on add).
    ValidationFailure,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NetworkFailure => "network failure",
            Self::Unauthorized => "unauthorized",
            Self::ItemNotFound => "item not found",
            Self::StorageCorrupt => "storage corrupt",
            Self::ValidationFailure => "validation failure",
        };
        f.write_str(s)
    }
}

/// Errors returned by cart operations and the remote cart service.
#[derive(Debug, Error)]
pub enum CartError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status.
    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Backend rejected the credentials (HTTP 401).
    #[error("Unauthorized")]
    Unauthorized,

    /// Rate limited by the backend.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Response body was not the expected JSON.
    #[error("JSON parse error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Update or removal target is not in the cart.
    #[error("Item not found: {0}")]
    ItemNotFound(ItemKey),

    /// Quantity rejected before any state change.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(#[from] QuantityError),
}

impl CartError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(_) | Self::Status { .. } | Self::RateLimited(_) | Self::Decode(_) => {
                ErrorKind::NetworkFailure
            }
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::ItemNotFound(_) => ErrorKind::ItemNotFound,
            Self::InvalidQuantity(_) => ErrorKind::ValidationFailure,
        }
    }

    /// Whether this came from talking to the backend.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NetworkFailure | ErrorKind::Unauthorized
        )
    }
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;
