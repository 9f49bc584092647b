#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;
use varketplace_core::{CartItem, CartItemId, ProductSnapshot, UserId};

use super::*;
use crate::config::StorageConfig;
use crate::store::MemoryStore;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Fetch(UserId),
    Add(ProductId, u32),
    Update(CartItemId, u32),
    Remove(CartItemId),
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    Fetch,
    Add,
    Update,
    Remove,
    Clear,
}

#[derive(Default)]
struct Backend {
    lines: Vec<CartItem>,
    next_id: i64,
    failing: HashSet<Op>,
    rejected_products: HashSet<ProductId>,
    calls: Vec<Call>,
}

/// In-memory cart service with scripted failures and an optional delay
/// before every call.
#[derive(Clone, Default)]
struct ScriptedService {
    backend: Arc<Mutex<Backend>>,
    delay: Option<Duration>,
}

impl ScriptedService {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn fail(&self, op: Op) {
        self.backend.lock().unwrap().failing.insert(op);
    }

    fn reject_product(&self, product_id: ProductId) {
        self.backend
            .lock()
            .unwrap()
            .rejected_products
            .insert(product_id);
    }

    fn seed(&self, product_id: i64, quantity: u32) -> CartItemId {
        let mut backend = self.backend.lock().unwrap();
        backend.next_id += 1;
        let id = CartItemId::new(100 + backend.next_id);
        backend.lines.push(CartItem::remote(
            id,
            ProductId::new(product_id),
            quantity,
            Some(priced(product_id)),
        ));
        id
    }

    fn calls(&self) -> Vec<Call> {
        self.backend.lock().unwrap().calls.clone()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn begin(&self, call: Call, op: Op) -> Result<std::sync::MutexGuard<'_, Backend>> {
        let mut backend = self.backend.lock().unwrap();
        backend.calls.push(call);
        if backend.failing.contains(&op) {
            return Err(CartError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(backend)
    }
}

impl CartService for ScriptedService {
    async fn fetch_cart(&self, session: &AuthSession) -> Result<Cart> {
        self.pause().await;
        let backend = self.begin(Call::Fetch(session.user_id()), Op::Fetch)?;
        Ok(Cart::from_items(backend.lines.clone()))
    }

    async fn add_item(&self, _: &AuthSession, product_id: ProductId, quantity: u32) -> Result<()> {
        self.pause().await;
        let mut backend = self.begin(Call::Add(product_id, quantity), Op::Add)?;
        if backend.rejected_products.contains(&product_id) {
            return Err(CartError::Status {
                status: 422,
                body: "out of stock".to_string(),
            });
        }
        if let Some(line) = backend
            .lines
            .iter_mut()
            .find(|l| l.product_id == product_id)
        {
            line.quantity += quantity;
        } else {
            backend.next_id += 1;
            let id = CartItemId::new(100 + backend.next_id);
            backend.lines.push(CartItem::remote(
                id,
                product_id,
                quantity,
                Some(priced(product_id.as_i64())),
            ));
        }
        Ok(())
    }

    async fn update_item(&self, _: &AuthSession, item_id: CartItemId, quantity: u32) -> Result<()> {
        self.pause().await;
        let mut backend = self.begin(Call::Update(item_id, quantity), Op::Update)?;
        if let Some(line) = backend
            .lines
            .iter_mut()
            .find(|l| l.server_id == Some(item_id))
        {
            line.quantity = quantity;
        }
        Ok(())
    }

    async fn remove_item(&self, _: &AuthSession, item_id: CartItemId) -> Result<()> {
        self.pause().await;
        let mut backend = self.begin(Call::Remove(item_id), Op::Remove)?;
        backend.lines.retain(|l| l.server_id != Some(item_id));
        Ok(())
    }

    async fn clear_cart(&self, _: &AuthSession) -> Result<()> {
        self.pause().await;
        let mut backend = self.begin(Call::Clear, Op::Clear)?;
        backend.lines.clear();
        Ok(())
    }
}

fn priced(product_id: i64) -> ProductSnapshot {
    ProductSnapshot::new(ProductId::new(product_id)).with_price(Decimal::TEN)
}

fn session(user_id: i64) -> AuthSession {
    AuthSession::new(
        UserId::new(user_id),
        SecretString::from(format!("token-{user_id}")),
    )
}

struct Harness {
    sync: Arc<CartSynchronizer<ScriptedService>>,
    remote: ScriptedService,
    local: LocalCart,
    auth: AuthState,
}

fn harness_with(remote: ScriptedService, auth: AuthState) -> Harness {
    let local = LocalCart::new(Arc::new(MemoryStore::new()), &StorageConfig::default());
    let sync = Arc::new(CartSynchronizer::new(
        remote.clone(),
        local.clone(),
        auth.clone(),
    ));
    Harness {
        sync,
        remote,
        local,
        auth,
    }
}

fn guest() -> Harness {
    harness_with(ScriptedService::default(), AuthState::new())
}

fn signed_in() -> Harness {
    harness_with(
        ScriptedService::default(),
        AuthState::with_session(Some(session(1))),
    )
}

fn product(id: i64) -> ProductId {
    ProductId::new(id)
}

// =============================================================================
// Guest mode
// =============================================================================

#[tokio::test]
async fn test_guest_add_merges_by_product() {
    let h = guest();

    let snapshot = ProductSnapshot::new(product(7)).with_price(Decimal::TEN);
    h.sync.add_to_cart(snapshot, 2).await.unwrap();
    let cart = h.sync.add_to_cart(product(7), 3).await.unwrap();

    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].product_id, product(7));
    assert_eq!(cart.items[0].quantity, 5);
    assert_eq!(h.sync.total_item_count(), 5);
    assert_eq!(h.sync.total_price(), Decimal::new(50, 0));
    assert!(h.remote.calls().is_empty());

    // Persisted for the next session.
    assert_eq!(h.local.read(), cart);
}

#[tokio::test]
async fn test_add_zero_is_rejected() {
    let h = guest();
    h.sync.add_to_cart(product(1), 1).await.unwrap();

    let err = h.sync.add_to_cart(product(1), 0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    assert_eq!(h.sync.cart().items[0].quantity, 1);
}

#[tokio::test]
async fn test_guest_load_reads_local_mirror() {
    let h = guest();
    h.local
        .write(&[CartItem::local(product(3), 4, None)]);

    let cart = h.sync.load_cart().await;
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 4);
    assert_eq!(h.sync.mode(), CartMode::Guest);
}

#[tokio::test]
async fn test_guest_update_and_remove() {
    let h = guest();
    h.sync.add_to_cart(product(1), 1).await.unwrap();
    h.sync.add_to_cart(product(2), 1).await.unwrap();

    let cart = h
        .sync
        .update_item(ItemKey::Product(product(1)), 6)
        .await
        .unwrap();
    assert_eq!(cart.find_by_product_id(product(1)).unwrap().quantity, 6);

    let cart = h
        .sync
        .update_item(ItemKey::Product(product(1)), 0)
        .await
        .unwrap();
    assert!(cart.find_by_product_id(product(1)).is_none());

    let cart = h
        .sync
        .remove_item(ItemKey::Product(product(2)))
        .await
        .unwrap();
    assert!(cart.is_empty());
    assert!(h.local.read().is_empty());
}

#[tokio::test]
async fn test_missing_item_leaves_cart_unchanged() {
    let h = guest();
    h.sync.add_to_cart(product(1), 2).await.unwrap();
    let before = h.sync.cart();

    let err = h
        .sync
        .remove_item(ItemKey::Product(product(9)))
        .await
        .unwrap_err();
    assert!(matches!(err, CartError::ItemNotFound(ItemKey::Product(id)) if id == product(9)));

    let err = h
        .sync
        .update_item(ItemKey::Server(CartItemId::new(5)), 3)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ItemNotFound);

    assert_eq!(h.sync.cart(), before);
}

#[tokio::test]
async fn test_guest_clear() {
    let h = guest();
    h.sync.add_to_cart(product(1), 2).await.unwrap();

    let cart = h.sync.clear_cart().await.unwrap();
    assert!(cart.is_empty());
    assert!(h.local.read().is_empty());
}

// =============================================================================
// Signed in
// =============================================================================

#[tokio::test]
async fn test_load_replaces_with_remote_and_mirrors() {
    let h = signed_in();
    let id = h.remote.seed(5, 2);

    let cart = h.sync.load_cart().await;
    assert_eq!(cart.items[0].server_id, Some(id));
    assert_eq!(h.local.read(), cart);
    assert_eq!(h.sync.last_error(), None);
    assert!(!h.sync.is_loading());
}

#[tokio::test]
async fn test_load_falls_back_to_local_on_failure() {
    let h = signed_in();
    h.local.write(&[CartItem::local(product(8), 1, None)]);
    h.remote.fail(Op::Fetch);

    let cart = h.sync.load_cart().await;
    assert_eq!(cart, h.local.read());
    assert_eq!(cart.items[0].product_id, product(8));
    assert_eq!(h.sync.last_error(), Some(ErrorKind::NetworkFailure));
    assert!(!h.sync.is_loading());
}

#[tokio::test]
async fn test_remote_add_reloads() {
    let h = signed_in();

    let cart = h.sync.add_to_cart(product(4), 2).await.unwrap();
    assert_eq!(
        h.remote.calls(),
        vec![Call::Add(product(4), 2), Call::Fetch(UserId::new(1))]
    );
    assert!(cart.items[0].server_id.is_some());
    assert_eq!(cart.total_price(), Decimal::new(20, 0));
}

#[tokio::test]
async fn test_remote_add_failure_keeps_line_locally() {
    let h = signed_in();
    h.remote.fail(Op::Add);

    let cart = h.sync.add_to_cart(product(4), 2).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].server_id, None);
    assert_eq!(h.sync.last_error(), Some(ErrorKind::NetworkFailure));
    assert_eq!(h.local.read(), cart);
}

#[tokio::test]
async fn test_remote_update_uses_server_id() {
    let h = signed_in();
    let id = h.remote.seed(5, 2);
    h.sync.load_cart().await;

    let cart = h
        .sync
        .update_item(ItemKey::Product(product(5)), 7)
        .await
        .unwrap();
    assert_eq!(cart.items[0].quantity, 7);
    assert!(h.remote.calls().contains(&Call::Update(id, 7)));

    let cart = h.sync.update_item(ItemKey::Server(id), 0).await.unwrap();
    assert!(cart.is_empty());
    assert!(h.remote.calls().contains(&Call::Remove(id)));
}

#[tokio::test]
async fn test_remote_update_failure_is_returned() {
    let h = signed_in();
    let id = h.remote.seed(5, 2);
    h.sync.load_cart().await;
    h.remote.fail(Op::Update);

    let err = h.sync.update_item(ItemKey::Server(id), 9).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NetworkFailure);
    assert_eq!(h.sync.last_error(), Some(ErrorKind::NetworkFailure));
    assert_eq!(h.sync.cart().items[0].quantity, 2);
}

#[tokio::test]
async fn test_local_only_line_is_updated_locally_when_signed_in() {
    let h = signed_in();
    h.remote.fail(Op::Add);
    h.sync.add_to_cart(product(3), 1).await.unwrap();
    let calls_before = h.remote.calls().len();

    let cart = h
        .sync
        .update_item(ItemKey::Product(product(3)), 4)
        .await
        .unwrap();
    assert_eq!(cart.items[0].quantity, 4);
    assert_eq!(h.remote.calls().len(), calls_before);
}

#[tokio::test]
async fn test_remote_remove() {
    let h = signed_in();
    let id = h.remote.seed(5, 2);
    h.remote.seed(6, 1);
    h.sync.load_cart().await;

    let cart = h.sync.remove_item(ItemKey::Server(id)).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].product_id, product(6));
}

#[tokio::test]
async fn test_duplicate_server_lines_update_together() {
    let h = signed_in();
    let first = h.remote.seed(5, 2);
    let second = h.remote.seed(5, 3);

    let cart = h.sync.load_cart().await;
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 5);

    let cart = h
        .sync
        .update_item(ItemKey::Server(first), 1)
        .await
        .unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 1);
    assert_eq!(cart.items[0].server_ids(), vec![first]);

    let calls = h.remote.calls();
    assert!(calls.contains(&Call::Update(first, 1)));
    assert!(calls.contains(&Call::Remove(second)));
}

#[tokio::test]
async fn test_duplicate_server_lines_remove_together() {
    let h = signed_in();
    let first = h.remote.seed(5, 2);
    let second = h.remote.seed(5, 3);
    h.remote.seed(6, 1);
    h.sync.load_cart().await;

    // The folded-away line ID still finds the product.
    let cart = h.sync.remove_item(ItemKey::Server(second)).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].product_id, product(6));

    let calls = h.remote.calls();
    assert!(calls.contains(&Call::Remove(first)));
    assert!(calls.contains(&Call::Remove(second)));
}

#[tokio::test]
async fn test_duplicate_server_lines_update_to_zero() {
    let h = signed_in();
    h.remote.seed(5, 2);
    h.remote.seed(5, 3);
    h.sync.load_cart().await;

    let cart = h
        .sync
        .update_item(ItemKey::Product(product(5)), 0)
        .await
        .unwrap();
    assert!(cart.is_empty());
}

#[tokio::test]
async fn test_remote_clear() {
    let h = signed_in();
    h.remote.seed(5, 2);
    h.sync.load_cart().await;

    let cart = h.sync.clear_cart().await.unwrap();
    assert!(cart.is_empty());
    assert!(h.local.read().is_empty());
    assert!(h.remote.calls().contains(&Call::Clear));
}

#[tokio::test]
async fn test_remote_clear_failure_leaves_cart() {
    let h = signed_in();
    h.remote.seed(5, 2);
    h.sync.load_cart().await;
    h.remote.fail(Op::Clear);

    assert!(h.sync.clear_cart().await.is_err());
    assert_eq!(h.sync.cart().items.len(), 1);
    assert_eq!(h.local.read().items.len(), 1);
}

#[tokio::test]
async fn test_last_error_is_cleared_by_next_operation() {
    let h = signed_in();
    h.remote.fail(Op::Fetch);
    h.sync.load_cart().await;
    assert_eq!(h.sync.last_error(), Some(ErrorKind::NetworkFailure));

    h.sync.add_to_cart(product(1), 1).await.unwrap();
    assert_eq!(h.sync.last_error(), Some(ErrorKind::NetworkFailure));

    h.remote.backend.lock().unwrap().failing.clear();
    h.sync.load_cart().await;
    assert_eq!(h.sync.last_error(), None);
}

// =============================================================================
// Auth transitions
// =============================================================================

#[tokio::test]
async fn test_merge_on_login() {
    let h = guest();
    h.sync.add_to_cart(product(1), 2).await.unwrap();
    h.sync.add_to_cart(product(2), 1).await.unwrap();
    h.remote.reject_product(product(2));

    let new = session(1);
    h.auth.login(new.clone());
    let outcome = h.sync.on_auth_change(None, Some(&new)).await;

    let AuthTransition::SignedIn(report) = outcome else {
        panic!("expected sign-in, got {outcome:?}");
    };
    assert_eq!(report.succeeded, vec![product(1)]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].product_id, product(2));
    assert_eq!(report.failed[0].kind, ErrorKind::NetworkFailure);
    assert!(!report.is_complete());

    assert_eq!(
        h.remote.calls(),
        vec![
            Call::Add(product(1), 2),
            Call::Add(product(2), 1),
            Call::Fetch(UserId::new(1)),
        ]
    );
    assert!(h.local.read().is_empty());
    assert_eq!(h.sync.cart().items.len(), 1);
    assert_eq!(h.sync.cart().items[0].product_id, product(1));
}

#[tokio::test]
async fn test_merge_clears_local_even_when_everything_fails() {
    let h = guest();
    h.sync.add_to_cart(product(1), 1).await.unwrap();
    h.remote.fail(Op::Add);
    h.remote.fail(Op::Fetch);

    let new = session(1);
    h.auth.login(new.clone());
    let report = h.sync.merge_local_to_server().await;

    assert!(report.succeeded.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert!(h.local.read().is_empty());
}

#[tokio::test]
async fn test_merge_without_session_is_noop() {
    let h = guest();
    h.sync.add_to_cart(product(1), 1).await.unwrap();

    let report = h.sync.merge_local_to_server().await;
    assert_eq!(report, MergeReport::default());
    assert!(h.remote.calls().is_empty());
    assert_eq!(h.local.read().items.len(), 1);
}

#[tokio::test]
async fn test_logout_adopts_local_mirror() {
    let h = signed_in();
    h.remote.seed(5, 2);
    h.sync.load_cart().await;
    h.local.write(&[CartItem::local(product(9), 1, None)]);

    let old = session(1);
    h.auth.logout();
    let outcome = h.sync.on_auth_change(Some(&old), None).await;

    assert_eq!(outcome, AuthTransition::SignedOut);
    let cart = h.sync.cart();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].product_id, product(9));
}

#[tokio::test]
async fn test_user_switch_reloads_without_merge() {
    let h = signed_in();
    h.sync.load_cart().await;

    let (a, b) = (session(1), session(2));
    h.auth.login(b.clone());
    let outcome = h.sync.on_auth_change(Some(&a), Some(&b)).await;

    assert_eq!(outcome, AuthTransition::SwitchedUser);
    let calls = h.remote.calls();
    assert_eq!(calls.last(), Some(&Call::Fetch(UserId::new(2))));
    assert!(!calls.iter().any(|c| matches!(c, Call::Add(..))));

    let same = h.sync.on_auth_change(Some(&b), Some(&b)).await;
    assert_eq!(same, AuthTransition::Unchanged);
}

#[tokio::test]
async fn test_watch_auth_merges_on_login() {
    let h = guest();
    h.sync.add_to_cart(product(1), 2).await.unwrap();

    let watcher = {
        let sync = h.sync.clone();
        let sessions = h.auth.subscribe();
        tokio::spawn(async move { sync.watch_auth(sessions).await })
    };

    h.auth.login(session(1));

    let merged = tokio::time::timeout(Duration::from_secs(5), async {
        while !h.remote.calls().contains(&Call::Fetch(UserId::new(1))) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(merged.is_ok(), "watcher never merged");

    // Queue turn ensures the merge finished before we read.
    h.sync.load_cart().await;
    assert_eq!(h.remote.calls()[0], Call::Add(product(1), 2));
    assert!(h.local.read().items.iter().all(|i| i.server_id.is_some()));

    watcher.abort();
}

// =============================================================================
// Listeners and concurrency
// =============================================================================

#[tokio::test]
async fn test_listeners_see_every_change() {
    let h = guest();
    let seen = Arc::new(AtomicUsize::new(0));

    let key = {
        let seen = seen.clone();
        h.sync.subscribe(move |cart| {
            seen.store(
                usize::try_from(cart.total_item_count()).unwrap(),
                Ordering::SeqCst,
            );
        })
    };

    h.sync.add_to_cart(product(1), 3).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 3);

    assert!(h.sync.unsubscribe(key));
    h.sync.add_to_cart(product(1), 1).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert!(!h.sync.unsubscribe(key));
}

#[tokio::test]
async fn test_failed_operation_does_not_notify() {
    let h = guest();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        h.sync.subscribe(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }

    let _ = h.sync.remove_item(ItemKey::Product(product(1))).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_adds_compose() {
    let h = harness_with(
        ScriptedService::with_delay(Duration::from_millis(20)),
        AuthState::with_session(Some(session(1))),
    );
    h.remote.fail(Op::Add);

    let first = {
        let sync = h.sync.clone();
        tokio::spawn(async move { sync.add_to_cart(ProductId::new(7), 2).await })
    };
    let second = {
        let sync = h.sync.clone();
        tokio::spawn(async move { sync.add_to_cart(ProductId::new(7), 3).await })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let cart = h.sync.cart();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 5);
    assert_eq!(h.local.read().items[0].quantity, 5);
    assert!(!h.sync.is_loading());
}

#[tokio::test]
async fn test_loading_flag_during_remote_call() {
    let h = harness_with(
        ScriptedService::with_delay(Duration::from_millis(100)),
        AuthState::with_session(Some(session(1))),
    );

    let load = {
        let sync = h.sync.clone();
        tokio::spawn(async move { sync.load_cart().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.sync.is_loading());

    load.await.unwrap();
    assert!(!h.sync.is_loading());
}
