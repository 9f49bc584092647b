//! Varketplace cart synchronizer.
//!
//! Keeps a shopper's cart consistent across a local mirror (for guests, and
//! as a fallback) and the remote cart service (for signed-in users), and
//! merges the guest cart into the server cart on sign-in.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use varketplace_cart::{
//!     AuthState, CartConfig, CartSynchronizer, FileStore, HttpCartService, LocalCart,
//! };
//! use varketplace_core::ProductId;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CartConfig::from_env()?;
//! let store = Arc::new(FileStore::open(&config.storage.store_dir)?);
//! let sync = CartSynchronizer::new(
//!     HttpCartService::new(&config.api)?,
//!     LocalCart::new(store, &config.storage),
//!     AuthState::with_session(config.session.clone()),
//! );
//!
//! sync.load_cart().await;
//! sync.add_to_cart(ProductId::new(7), 2).await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod auth;
pub mod checkout;
pub mod config;
pub mod error;
pub mod local;
pub mod remote;
pub mod store;
pub mod sync;

pub use auth::{AuthSession, AuthState, CartMode};
pub use checkout::{CheckoutError, CheckoutRequest, build_checkout_request};
pub use config::{ApiConfig, CartConfig, ConfigError, StorageConfig};
pub use error::{CartError, ErrorKind, Result};
pub use local::{LocalCart, LocalRead};
pub use remote::{CartService, HttpCartService};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use sync::{AuthTransition, CartSynchronizer, ListenerKey, MergeFailure, MergeReport};
