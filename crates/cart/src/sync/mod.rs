//! The cart synchronizer.
//!
//! [`CartSynchronizer`] owns the in-memory cart and keeps it consistent with
//! two backing stores: the local mirror (always) and the remote service (while
//! a session is active). Which store is authoritative is decided from the
//! [`AuthState`] at the start of every operation.
//!
//! # Concurrency
//!
//! Every public operation first takes a turn on a FIFO queue, so operations
//! on one synchronizer never interleave across their network calls. The cart
//! itself sits behind a plain mutex that is only held for in-memory work.
//!
//! # Auth transitions
//!
//! | From | To | Effect |
//! |---|---|---|
//! | guest | signed in | merge local lines into the server cart, reload, clear local |
//! | signed in | guest | adopt whatever the local mirror holds |
//! | user A | user B | reload from the server for B |

mod listeners;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use varketplace_core::{Cart, CartItem, CartItemId, ItemKey, ProductId, ProductRef, QuantityError};

use crate::auth::{AuthSession, AuthState, CartMode};
use crate::error::{CartError, ErrorKind, Result};
use crate::local::LocalCart;
use crate::remote::CartService;

pub use listeners::ListenerKey;
use listeners::Listeners;

/// Outcome of pushing guest lines to the server after sign-in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Products the server accepted.
    pub succeeded: Vec<ProductId>,
    /// Products the server rejected; these lines are lost.
    pub failed: Vec<MergeFailure>,
}

impl MergeReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A guest line that could not be merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeFailure {
    pub product_id: ProductId,
    pub kind: ErrorKind,
    pub message: String,
}

/// What an auth transition did to the cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthTransition {
    SignedIn(MergeReport),
    SignedOut,
    SwitchedUser,
    Unchanged,
}

#[derive(Debug)]
struct SyncState {
    cart: Cart,
    last_error: Option<ErrorKind>,
}

/// Decrements the in-flight counter when dropped.
struct LoadingGuard<'a>(&'a AtomicUsize);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Keeps one shopping cart in sync between memory, the local mirror and the
/// remote cart service.
///
/// Share it behind an `Arc`; all methods take `&self`.
pub struct CartSynchronizer<R> {
    remote: R,
    local: LocalCart,
    auth: AuthState,
    queue: tokio::sync::Mutex<()>,
    state: Mutex<SyncState>,
    in_flight: AtomicUsize,
    listeners: Listeners,
}

impl<R: CartService> CartSynchronizer<R> {
    /// Create a synchronizer with an empty cart. Call
    /// [`load_cart`](Self::load_cart) to populate it.
    #[must_use]
    pub fn new(remote: R, local: LocalCart, auth: AuthState) -> Self {
        Self {
            remote,
            local,
            auth,
            queue: tokio::sync::Mutex::new(()),
            state: Mutex::new(SyncState {
                cart: Cart::empty(),
                last_error: None,
            }),
            in_flight: AtomicUsize::new(0),
            listeners: Listeners::default(),
        }
    }

    // =========================================================================
    // Observable state
    // =========================================================================

    /// Snapshot of the current cart.
    #[must_use]
    pub fn cart(&self) -> Cart {
        self.state().cart.clone()
    }

    #[must_use]
    pub fn mode(&self) -> CartMode {
        self.auth.mode()
    }

    /// Whether a remote call is in progress.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Failure recorded by the most recent operation, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.state().last_error
    }

    #[must_use]
    pub fn total_item_count(&self) -> u64 {
        self.state().cart.total_item_count()
    }

    #[must_use]
    pub fn total_price(&self) -> Decimal {
        self.state().cart.total_price()
    }

    /// Register a callback run with the new cart after every change.
    pub fn subscribe<F>(&self, listener: F) -> ListenerKey
    where
        F: Fn(&Cart) + Send + Sync + 'static,
    {
        self.listeners.register(listener)
    }

    /// Returns `false` if the key was not registered.
    pub fn unsubscribe(&self, key: ListenerKey) -> bool {
        self.listeners.unregister(key)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Load the cart from the server when signed in, else from the local
    /// mirror.
    ///
    /// A failed fetch is recorded in [`last_error`](Self::last_error) and
    /// falls back to the local mirror, so this always yields a cart.
    #[instrument(skip(self))]
    pub async fn load_cart(&self) -> Cart {
        let _turn = self.queue.lock().await;
        self.clear_error();
        let session = self.auth.current();
        self.load_locked(session.as_ref()).await
    }

    /// Add `quantity` of a product.
    ///
    /// Signed in, a failed remote add still lands in the local cart with the
    /// error recorded, and the resulting cart is returned.
    ///
    /// # Errors
    ///
    /// Returns `CartError::InvalidQuantity` if `quantity` is zero.
    #[instrument(skip(self, product), fields(product_id))]
    pub async fn add_to_cart(&self, product: impl Into<ProductRef>, quantity: u32) -> Result<Cart> {
        let (product_id, snapshot) = product.into().into_parts();
        tracing::Span::current().record("product_id", product_id.as_i64());

        let _turn = self.queue.lock().await;
        self.clear_error();

        if quantity == 0 {
            return Err(QuantityError::Zero.into());
        }

        let Some(session) = self.auth.current() else {
            return self.apply_local(|cart| {
                cart.merge_or_append(product_id, quantity, snapshot)
                    .map_err(CartError::from)
            });
        };

        let result = {
            let _loading = self.begin_loading();
            self.remote.add_item(&session, product_id, quantity).await
        };

        match result {
            Ok(()) => Ok(self.load_locked(Some(&session)).await),
            Err(e) => {
                warn!(error = %e, "Remote add failed, keeping the line locally");
                self.record_error(e.kind());
                self.apply_local(|cart| {
                    cart.merge_or_append(product_id, quantity, snapshot)
                        .map_err(CartError::from)
                })
            }
        }
    }

    /// Set a line's quantity. Zero removes the line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::ItemNotFound` if no line matches `key`, or the
    /// remote error if the server rejected the change. Either way the cart is
    /// left as it was.
    #[instrument(skip(self))]
    pub async fn update_item(&self, key: ItemKey, quantity: u32) -> Result<Cart> {
        let _turn = self.queue.lock().await;
        self.clear_error();

        let server_ids = self.lookup(key)?;
        match self.auth.current() {
            Some(session) if !server_ids.is_empty() => {
                let result = {
                    let _loading = self.begin_loading();
                    self.set_remote_quantity(&session, &server_ids, quantity)
                        .await
                };
                self.finish_remote(result, &session).await
            }
            _ => self.apply_local(|cart| {
                if cart.set_quantity(key, quantity) {
                    Ok(())
                } else {
                    Err(CartError::ItemNotFound(key))
                }
            }),
        }
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Same as [`update_item`](Self::update_item).
    #[instrument(skip(self))]
    pub async fn remove_item(&self, key: ItemKey) -> Result<Cart> {
        let _turn = self.queue.lock().await;
        self.clear_error();

        let server_ids = self.lookup(key)?;
        match self.auth.current() {
            Some(session) if !server_ids.is_empty() => {
                let result = {
                    let _loading = self.begin_loading();
                    self.remove_remote_lines(&session, &server_ids).await
                };
                self.finish_remote(result, &session).await
            }
            _ => self.apply_local(|cart| {
                cart.remove(key)
                    .map(|_| ())
                    .ok_or(CartError::ItemNotFound(key))
            }),
        }
    }

    /// Empty the cart.
    ///
    /// # Errors
    ///
    /// Signed in, returns the remote error if the server could not clear the
    /// cart; the cart is left as it was.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self) -> Result<Cart> {
        let _turn = self.queue.lock().await;
        self.clear_error();

        let Some(session) = self.auth.current() else {
            return self.apply_local(|cart| {
                cart.clear();
                Ok(())
            });
        };

        let result = {
            let _loading = self.begin_loading();
            self.remote.clear_cart(&session).await
        };
        if let Err(e) = result {
            warn!(error = %e, "Remote clear failed");
            self.record_error(e.kind());
            return Err(e);
        }

        self.local.clear();
        let cart = Cart::empty();
        self.commit(cart.clone());
        Ok(cart)
    }

    // =========================================================================
    // Auth transitions
    // =========================================================================

    /// Push every line of the local mirror to the server for the current
    /// session, then reload and clear the mirror.
    ///
    /// Signed out, there is nothing to merge into and an empty report is
    /// returned.
    #[instrument(skip(self))]
    pub async fn merge_local_to_server(&self) -> MergeReport {
        let _turn = self.queue.lock().await;
        self.clear_error();
        match self.auth.current() {
            Some(session) => self.merge_locked(&session).await,
            None => {
                debug!("No session, skipping merge");
                MergeReport::default()
            }
        }
    }

    /// Apply the transition from `previous` to `next`.
    pub async fn on_auth_change(
        &self,
        previous: Option<&AuthSession>,
        next: Option<&AuthSession>,
    ) -> AuthTransition {
        let _turn = self.queue.lock().await;
        self.clear_error();

        match (previous, next) {
            (None, Some(session)) => {
                info!(user_id = %session.user_id(), "Signed in, merging guest cart");
                AuthTransition::SignedIn(self.merge_locked(session).await)
            }
            (Some(_), None) => {
                info!("Signed out, restoring local cart");
                self.commit(self.local.read());
                AuthTransition::SignedOut
            }
            (Some(old), Some(new)) if old.user_id() != new.user_id() => {
                info!(from = %old.user_id(), to = %new.user_id(), "Session switched user, reloading cart");
                self.load_locked(Some(new)).await;
                AuthTransition::SwitchedUser
            }
            _ => AuthTransition::Unchanged,
        }
    }

    /// Follow session changes on `sessions` until its sender is dropped.
    ///
    /// Changes that arrive while a transition is running are coalesced; only
    /// the latest session is acted on.
    pub async fn watch_auth(&self, mut sessions: watch::Receiver<Option<AuthSession>>) {
        let mut previous = sessions.borrow_and_update().clone();
        while sessions.changed().await.is_ok() {
            let next = sessions.borrow_and_update().clone();
            let outcome = self.on_auth_change(previous.as_ref(), next.as_ref()).await;
            debug!(?outcome, "Handled auth transition");
            previous = next;
        }
        debug!("Auth channel closed");
    }

    // =========================================================================
    // Internals (caller holds the queue turn)
    // =========================================================================

    async fn load_locked(&self, session: Option<&AuthSession>) -> Cart {
        if let Some(session) = session {
            let result = {
                let _loading = self.begin_loading();
                self.remote.fetch_cart(session).await
            };
            match result {
                Ok(cart) => {
                    self.local.write(&cart.items);
                    self.commit(cart.clone());
                    return cart;
                }
                Err(e) => {
                    warn!(error = %e, "Remote cart unavailable, using local cart");
                    self.record_error(e.kind());
                }
            }
        }

        let cart = self.local.read();
        self.commit(cart.clone());
        cart
    }

    async fn merge_locked(&self, session: &AuthSession) -> MergeReport {
        let pending = self.local.read();
        let mut report = MergeReport::default();

        {
            let _loading = self.begin_loading();
            for item in &pending.items {
                match self
                    .remote
                    .add_item(session, item.product_id, item.quantity)
                    .await
                {
                    Ok(()) => report.succeeded.push(item.product_id),
                    Err(e) => {
                        warn!(product_id = %item.product_id, error = %e, "Failed to merge guest line");
                        report.failed.push(MergeFailure {
                            product_id: item.product_id,
                            kind: e.kind(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        self.load_locked(Some(session)).await;
        self.local.clear();

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Merged guest cart"
        );
        report
    }

    /// Reload after a successful remote mutation, or record and return the
    /// error.
    async fn finish_remote(&self, result: Result<()>, session: &AuthSession) -> Result<Cart> {
        match result {
            Ok(()) => Ok(self.load_locked(Some(session)).await),
            Err(e) => {
                warn!(error = %e, "Remote cart update failed");
                self.record_error(e.kind());
                Err(e)
            }
        }
    }

    /// The server line IDs behind the line matching `key`; empty for a line
    /// that only exists locally.
    fn lookup(&self, key: ItemKey) -> Result<Vec<CartItemId>> {
        self.state()
            .cart
            .find(key)
            .map(CartItem::server_ids)
            .ok_or(CartError::ItemNotFound(key))
    }

    /// Put `quantity` on the first server line and delete the rest, or
    /// delete them all for zero.
    async fn set_remote_quantity(
        &self,
        session: &AuthSession,
        ids: &[CartItemId],
        quantity: u32,
    ) -> Result<()> {
        match ids.split_first() {
            Some((&first, rest)) if quantity > 0 => {
                self.remote.update_item(session, first, quantity).await?;
                self.remove_remote_lines(session, rest).await
            }
            _ => self.remove_remote_lines(session, ids).await,
        }
    }

    /// Delete server lines in order, stopping at the first failure.
    async fn remove_remote_lines(&self, session: &AuthSession, ids: &[CartItemId]) -> Result<()> {
        for &id in ids {
            self.remote.remove_item(session, id).await?;
        }
        Ok(())
    }

    /// Run `change` on a copy of the cart; on success adopt it, persist it
    /// locally and notify listeners. On error nothing changes.
    fn apply_local<F>(&self, change: F) -> Result<Cart>
    where
        F: FnOnce(&mut Cart) -> Result<()>,
    {
        let mut cart = self.cart();
        change(&mut cart)?;
        self.local.write(&cart.items);
        self.commit(cart.clone());
        Ok(cart)
    }

    fn commit(&self, cart: Cart) {
        self.state().cart = cart.clone();
        self.listeners.notify(&cart);
    }

    fn record_error(&self, kind: ErrorKind) {
        self.state().last_error = Some(kind);
    }

    fn clear_error(&self) {
        self.state().last_error = None;
    }

    fn begin_loading(&self) -> LoadingGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        LoadingGuard(&self.in_flight)
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R> std::fmt::Debug for CartSynchronizer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartSynchronizer")
            .field("local", &self.local)
            .field("auth", &self.auth)
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}
