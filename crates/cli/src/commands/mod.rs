//! CLI command implementations.

pub mod cart;
pub mod session;

use std::io::Write;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use varketplace_cart::{
    AuthState, CartConfig, CartError, CartSynchronizer, CheckoutError, ConfigError, FileStore,
    HttpCartService, LocalCart, StoreError,
};
use varketplace_core::{CartItemId, ItemKey, ProductId};

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Everything a command needs: the synchronizer and the auth handle it
/// follows.
pub struct Context {
    pub sync: CartSynchronizer<HttpCartService>,
    pub auth: AuthState,
}

impl Context {
    /// Build the synchronizer over a file store in the configured directory,
    /// starting from the configured session if there is one.
    pub fn open(config: &CartConfig) -> Result<Self, CommandError> {
        let store = Arc::new(FileStore::open(&config.storage.store_dir)?);
        let auth = AuthState::with_session(config.session.clone());
        let sync = CartSynchronizer::new(
            HttpCartService::new(&config.api)?,
            LocalCart::new(store, &config.storage),
            auth.clone(),
        );
        Ok(Self { sync, auth })
    }
}

/// A command-line line key: a product ID unless `server` is set.
pub const fn item_key(key: i64, server: bool) -> ItemKey {
    if server {
        ItemKey::Server(CartItemId::new(key))
    } else {
        ItemKey::Product(ProductId::new(key))
    }
}

/// Write `value` to stdout as pretty JSON.
pub fn emit<T: Serialize>(value: &T) -> Result<(), CommandError> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}
