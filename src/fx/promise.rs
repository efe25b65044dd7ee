//! Single-assignment cells.

use std::sync::Arc;

use tokio::sync::watch;

/// A cell written at most once and awaited any number of times.
///
/// ```rust
/// use undertow::fx::Promise;
///
/// # tokio_test::block_on(async {
/// let promise = Promise::new();
/// assert!(promise.complete(1));
/// assert!(!promise.complete(2));
/// assert_eq!(promise.get().await, 1);
/// # });
/// ```
#[derive(Debug)]
pub struct Promise<A> {
    slot: Arc<watch::Sender<Option<A>>>,
}

impl<A> Clone for Promise<A> {
    fn clone(&self) -> Self {
        Promise {
            slot: self.slot.clone(),
        }
    }
}

impl<A> Default for Promise<A> {
    fn default() -> Self {
        Promise::new()
    }
}

impl<A> Promise<A> {
    /// An empty promise.
    pub fn new() -> Self {
        Promise {
            slot: Arc::new(watch::Sender::new(None)),
        }
    }

    /// Store `value` if nothing was stored yet. Returns whether it was.
    pub fn complete(&self, value: A) -> bool {
        self.slot.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    /// Whether a value was stored.
    pub fn is_completed(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

impl<A: Clone> Promise<A> {
    /// The value, if already stored.
    pub fn try_get(&self) -> Option<A> {
        self.slot.borrow().clone()
    }

    /// Wait for the value.
    pub async fn get(&self) -> A {
        let mut rx = self.slot.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(value) = current {
                return value;
            }
            let closed = rx.changed().await.is_err();
            if closed {
                return std::future::pending().await;
            }
        }
    }
}
