//! Cart change listeners.

use std::sync::{Arc, Mutex, PoisonError};

use slotmap::{SlotMap, new_key_type};
use varketplace_core::Cart;

new_key_type! {
    /// Handle returned by `subscribe`, used to unsubscribe.
    pub struct ListenerKey;
}

type Listener = Arc<dyn Fn(&Cart) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Listeners {
    inner: Mutex<SlotMap<ListenerKey, Listener>>,
}

impl Listeners {
    pub(crate) fn register<F>(&self, listener: F) -> ListenerKey
    where
        F: Fn(&Cart) + Send + Sync + 'static,
    {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Arc::new(listener))
    }

    pub(crate) fn unregister(&self, key: ListenerKey) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Call every listener with `cart`.
    ///
    /// The registry lock is released before any listener runs, so a listener
    /// may subscribe or unsubscribe.
    pub(crate) fn notify(&self, cart: &Cart) {
        let snapshot: Vec<Listener> = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for listener in snapshot {
            listener(cart);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
