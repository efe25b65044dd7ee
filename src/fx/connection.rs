//! Cancellation registries.
//!
//! A [`Connection`] is a stack of [`CancelToken`]s plus a canceled flag. The
//! fiber that owns it pushes finalizers while it runs; anyone holding the
//! connection may cancel it, which drains the stack in LIFO order.
//!
//! The shared state is untyped ([`Registry`]) so that one registry can be
//! reached from the task-local fiber context whatever the fiber's error
//! type. [`Connection<E>`] is the typed view used by callers.

use std::fmt;
use std::marker::PhantomData;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::fx::error::{Canceled, Failure, FxError, Panic};
use crate::fx::executor::FiberContext;
use crate::fx::region::detach;
use crate::fx::token::{CancelToken, ErasedToken};

// ============================================================================
// Registry
// ============================================================================

struct State {
    /// `None` once canceled.
    stack: Option<Vec<(u64, ErasedToken)>>,
    next_key: u64,
    /// Failures of tokens run by uncancelable regions after cancellation.
    late: Vec<Failure>,
}

/// Outcome of offering a token to a registry.
pub(crate) enum Push {
    Stacked(u64),
    Canceled(ErasedToken),
    Ignored,
}

pub(crate) struct Registry {
    cancelable: bool,
    state: Mutex<State>,
    canceled: watch::Sender<bool>,
    regions: watch::Sender<usize>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Registry")
            .field("cancelable", &self.cancelable)
            .field("canceled", &state.stack.is_none())
            .field("tokens", &state.stack.as_ref().map_or(0, Vec::len))
            .field("regions", &*self.regions.borrow())
            .finish()
    }
}

impl Registry {
    fn with_mode(cancelable: bool) -> Arc<Self> {
        Arc::new(Registry {
            cancelable,
            state: Mutex::new(State {
                stack: Some(Vec::new()),
                next_key: 0,
                late: Vec::new(),
            }),
            canceled: watch::Sender::new(false),
            regions: watch::Sender::new(0),
        })
    }

    pub(crate) fn new() -> Arc<Self> {
        Registry::with_mode(true)
    }

    pub(crate) fn uncancelable() -> Arc<Self> {
        Registry::with_mode(false)
    }

    pub(crate) fn is_cancelable(&self) -> bool {
        self.cancelable
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.cancelable && self.state.lock().stack.is_none()
    }

    pub(crate) fn try_push(&self, token: ErasedToken) -> Push {
        if !self.cancelable {
            return Push::Ignored;
        }
        let mut state = self.state.lock();
        let key = state.next_key;
        match state.stack.as_mut() {
            Some(stack) => {
                stack.push((key, token));
                state.next_key += 1;
                Push::Stacked(key)
            }
            None => Push::Canceled(token),
        }
    }

    pub(crate) fn pop(&self) -> Option<ErasedToken> {
        let mut state = self.state.lock();
        state
            .stack
            .as_mut()
            .and_then(Vec::pop)
            .map(|(_, token)| token)
    }

    /// Drop the token stacked under `key` without running it.
    ///
    /// Returns `false` if a drain already took it.
    pub(crate) fn remove(&self, key: u64) -> bool {
        let mut state = self.state.lock();
        let Some(stack) = state.stack.as_mut() else {
            return false;
        };
        match stack.iter().rposition(|(k, _)| *k == key) {
            Some(index) => {
                drop(stack.remove(index));
                true
            }
            None => false,
        }
    }

    pub(crate) fn try_reactivate(&self) -> bool {
        if !self.cancelable {
            return false;
        }
        let mut state = self.state.lock();
        if state.stack.is_some() {
            return false;
        }
        state.stack = Some(Vec::new());
        drop(state);
        self.canceled.send_replace(false);
        true
    }

    pub(crate) fn record_late(&self, failure: Failure) {
        self.state.lock().late.push(failure);
    }

    /// Resolves once the registry is canceled. Never resolves for an
    /// uncancelable registry.
    pub(crate) async fn canceled(&self) {
        if !self.cancelable {
            return std::future::pending().await;
        }
        let mut rx = self.canceled.subscribe();
        let closed = rx.wait_for(|canceled| *canceled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }

    pub(crate) fn enter_region(self: &Arc<Self>) -> RegionGuard {
        self.regions.send_modify(|count| *count += 1);
        RegionGuard {
            registry: self.clone(),
        }
    }

    /// Wait until no uncancelable region of this registry is running.
    pub(crate) async fn quiesce(&self) {
        let mut rx = self.regions.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Cancel and drain, returning every failure the tokens produced.
    ///
    /// The first caller drains. Later callers only wait for that drain and
    /// any other in-flight region to finish.
    pub(crate) async fn cancel(self: &Arc<Self>) -> Drained {
        if !self.cancelable {
            return Drained::default();
        }
        let guard = self.enter_region();
        let taken = self.state.lock().stack.take();
        let Some(tokens) = taken else {
            drop(guard);
            self.quiesce().await;
            return Drained::default();
        };
        self.canceled.send_replace(true);
        tracing::trace!(tokens = tokens.len(), "draining canceled connection");

        let executor = FiberContext::current().executor;
        let mut drained = detach(&executor, guard, drain(tokens))
            .await
            .unwrap_or_default();
        self.quiesce().await;
        let late = std::mem::take(&mut self.state.lock().late);
        drained.failures.extend(late);
        drained
    }

    /// Run a token that arrived after cancellation, shielded from drops.
    pub(crate) async fn run_now(self: &Arc<Self>, token: ErasedToken) -> Drained {
        tracing::trace!("token pushed after cancel, running it now");
        let guard = self.enter_region();
        let executor = FiberContext::current().executor;
        detach(&executor, guard, drain(vec![(0, token)]))
            .await
            .unwrap_or_default()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        for failure in &self.state.get_mut().late {
            failure.log_unclaimed();
        }
    }
}

/// Keeps a registry's region count raised while alive.
pub(crate) struct RegionGuard {
    registry: Arc<Registry>,
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        self.registry.regions.send_modify(|count| *count -= 1);
    }
}

/// Everything that went wrong while running a batch of tokens.
#[derive(Debug, Default)]
pub(crate) struct Drained {
    failures: Vec<Failure>,
    panics: Vec<Panic>,
}

impl Drained {
    /// Compose the failures into `E`. A captured panic is resumed instead.
    pub(crate) fn into_result<E: FxError>(self) -> Result<(), E> {
        let mut composed: Option<E> = None;
        for failure in self.failures {
            if let Some(error) = failure.into_error::<E>() {
                composed = Some(match composed {
                    Some(primary) => primary.combine(error),
                    None => error,
                });
            }
        }
        if let Some(panic) = self.panics.into_iter().next() {
            if let Some(error) = composed {
                tracing::error!(?error, "cancel token failures superseded by a panic");
            }
            resume_unwind(panic);
        }
        composed.map_or(Ok(()), Err)
    }
}

/// Run `tokens` last to first. Every token runs whatever the others do.
async fn drain(tokens: Vec<(u64, ErasedToken)>) -> Drained {
    let mut drained = Drained::default();
    for (_, token) in tokens.into_iter().rev() {
        match AssertUnwindSafe(async move { token().await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(failure)) => drained.failures.push(failure),
            Err(panic) => {
                tracing::error!("cancel token panicked, continuing with the remaining tokens");
                drained.panics.push(panic);
            }
        }
    }
    drained
}

// ============================================================================
// Connection
// ============================================================================

/// Typed handle on a cancellation registry.
///
/// Cheap to clone; clones share the same stack and flag.
///
/// ```rust
/// use std::sync::Arc;
/// use parking_lot::Mutex;
/// use undertow::fx::{CancelToken, Connection};
///
/// # tokio_test::block_on(async {
/// let order = Arc::new(Mutex::new(Vec::new()));
/// let conn = Connection::<String>::new();
/// for n in 1..=3 {
///     let order = order.clone();
///     conn.push(CancelToken::new(move || async move {
///         order.lock().push(n);
///         Ok(())
///     }))
///     .await
///     .unwrap();
/// }
///
/// conn.cancel().invoke().await.unwrap();
/// assert_eq!(*order.lock(), vec![3, 2, 1]);
/// assert!(conn.is_canceled());
/// # });
/// ```
pub struct Connection<E> {
    pub(crate) registry: Arc<Registry>,
    _error: PhantomData<fn() -> E>,
}

impl<E> Clone for Connection<E> {
    fn clone(&self) -> Self {
        Connection {
            registry: self.registry.clone(),
            _error: PhantomData,
        }
    }
}

impl<E> fmt::Debug for Connection<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Connection").field(&self.registry).finish()
    }
}

impl<E: FxError> Default for Connection<E> {
    fn default() -> Self {
        Connection::new()
    }
}

/// Where a token ended up after [`Connection::push_keyed`].
pub(crate) enum Pushed {
    Stacked(u64),
    Ran,
    Ignored,
}

impl<E: FxError> Connection<E> {
    /// A fresh, cancelable connection.
    pub fn new() -> Self {
        Connection::from_registry(Registry::new())
    }

    /// A connection that cannot be canceled.
    ///
    /// `push` and `pop` do nothing and `cancel` completes immediately.
    pub fn uncancelable() -> Self {
        Connection::from_registry(Registry::uncancelable())
    }

    /// The connection of the fiber currently running.
    ///
    /// Outside a fiber this is an uncancelable connection.
    pub fn current() -> Self {
        Connection::from_registry(FiberContext::current().registry)
    }

    pub(crate) fn from_registry(registry: Arc<Registry>) -> Self {
        Connection {
            registry,
            _error: PhantomData,
        }
    }

    /// Snapshot of the canceled flag.
    pub fn is_canceled(&self) -> bool {
        self.registry.is_canceled()
    }

    /// Negation of [`is_canceled`](Connection::is_canceled).
    pub fn is_not_canceled(&self) -> bool {
        !self.is_canceled()
    }

    /// Whether this connection can be canceled at all.
    pub fn is_cancelable(&self) -> bool {
        self.registry.is_cancelable()
    }

    /// Register `token` to run on cancellation.
    ///
    /// On a connection that is already canceled the token runs right away,
    /// before this returns, and its failure is returned.
    pub async fn push(&self, token: CancelToken<E>) -> Result<(), E> {
        self.push_keyed(token).await.map(|_| ())
    }

    /// Register one token canceling both `lhs` and `rhs`.
    pub async fn push_pair(&self, lhs: &Connection<E>, rhs: &Connection<E>) -> Result<(), E> {
        self.push(lhs.cancel().and(rhs.cancel())).await
    }

    /// Remove the most recently pushed token without running it.
    ///
    /// Returns a no-op token when the stack is empty or canceled.
    pub fn pop(&self) -> CancelToken<E> {
        self.registry
            .pop()
            .map_or_else(CancelToken::noop, CancelToken::from_erased)
    }

    /// Token that cancels this connection.
    ///
    /// The first invocation marks the connection canceled and runs every
    /// stacked token in LIFO order, continuing past failures and composing
    /// them. It completes only after the drain and every uncancelable region
    /// of the connection have finished. Later invocations wait for the same
    /// and report nothing.
    ///
    /// Failures of tokens whose error type is not `E` cannot be composed
    /// into the result. They are logged at `error` level and the drain
    /// still reports `Ok(())` for them.
    pub fn cancel(&self) -> CancelToken<E> {
        let registry = self.registry.clone();
        CancelToken::new(move || async move { registry.cancel().await.into_result::<E>() })
    }

    /// Turn a canceled connection back into an empty, active one.
    ///
    /// Returns `false` if it was not canceled or cannot be canceled.
    pub fn try_reactivate(&self) -> bool {
        self.registry.try_reactivate()
    }

    pub(crate) async fn push_keyed(&self, token: CancelToken<E>) -> Result<Pushed, E> {
        match self.registry.try_push(token.erase()) {
            Push::Stacked(key) => Ok(Pushed::Stacked(key)),
            Push::Ignored => Ok(Pushed::Ignored),
            Push::Canceled(token) => self
                .registry
                .run_now(token)
                .await
                .into_result::<E>()
                .map(|()| Pushed::Ran),
        }
    }

    pub(crate) fn record_late(&self, error: E) {
        self.registry.record_late(Failure::new(error));
    }
}

// ============================================================================
// Stacked
// ============================================================================

/// A token stacked on a connection for the duration of an operation.
///
/// Dropping it without [`disarm`](Stacked::disarm) leaves the token on the
/// stack, which is what a canceled operation needs.
pub(crate) struct Stacked<E> {
    connection: Connection<E>,
    key: Option<u64>,
}

impl<E: FxError> Stacked<E> {
    /// Stack `token`. Fails with [`Canceled`] if the connection was already
    /// canceled, after running the token.
    pub(crate) async fn install(connection: Connection<E>, token: CancelToken<E>) -> Result<Self, E> {
        let key = match connection.push_keyed(token).await? {
            Pushed::Stacked(key) => Some(key),
            Pushed::Ignored => None,
            Pushed::Ran => return Err(Canceled.into()),
        };
        Ok(Stacked { connection, key })
    }

    pub(crate) fn disarm(self) {
        if let Some(key) = self.key {
            self.connection.registry.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semigroup::Semigroup;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    #[derive(Debug)]
    struct DiskError(&'static str);

    impl Semigroup for DiskError {
        fn combine(self, _other: Self) -> Self {
            self
        }
    }

    impl From<Canceled> for DiskError {
        fn from(_: Canceled) -> Self {
            DiskError("canceled")
        }
    }

    fn counting(counter: &Arc<AtomicUsize>) -> CancelToken<String> {
        let counter = counter.clone();
        CancelToken::new(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn failing(message: &'static str) -> CancelToken<String> {
        CancelToken::new(move || async move { Err(message.to_string()) })
    }

    #[tokio::test]
    async fn cancel_is_sticky_and_second_cancel_is_noop() {
        let conn = Connection::<String>::new();
        let counter = Arc::new(AtomicUsize::new(0));
        conn.push(counting(&counter)).await.unwrap();

        assert!(conn.is_not_canceled());
        conn.cancel().invoke().await.unwrap();
        conn.cancel().invoke().await.unwrap();

        assert!(conn.is_canceled());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn push_after_cancel_runs_immediately_once() {
        let conn = Connection::<String>::new();
        conn.cancel().invoke().await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        conn.push(counting(&counter)).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        conn.cancel().invoke().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn push_after_cancel_reports_failure() {
        let conn = Connection::<String>::new();
        conn.cancel().invoke().await.unwrap();
        assert_eq!(conn.push(failing("late")).await, Err("late".to_string()));
    }

    #[tokio::test]
    async fn pop_returns_latest_without_running() {
        let conn = Connection::<String>::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        conn.push(counting(&first)).await.unwrap();
        conn.push(counting(&second)).await.unwrap();

        let popped = conn.pop();
        assert_eq!(second.load(Ordering::SeqCst), 0);

        conn.cancel().invoke().await.unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);

        popped.invoke().await.unwrap();
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pop_on_empty_is_noop() {
        let conn = Connection::<String>::new();
        assert_eq!(conn.pop().invoke().await, Ok(()));
    }

    #[tokio::test]
    async fn failures_are_composed_and_do_not_stop_the_drain() {
        let conn = Connection::<String>::new();
        let counter = Arc::new(AtomicUsize::new(0));
        conn.push(counting(&counter)).await.unwrap();
        conn.push(failing("A")).await.unwrap();
        conn.push(failing("B")).await.unwrap();

        let result = conn.cancel().invoke().await;

        assert_eq!(result, Err("B; A".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_token_does_not_stop_the_drain() {
        let conn = Connection::<String>::new();
        let counter = Arc::new(AtomicUsize::new(0));
        conn.push(counting(&counter)).await.unwrap();
        conn.push(CancelToken::new(|| async {
            if true {
                panic!("token exploded");
            }
            Ok(())
        }))
        .await
        .unwrap();

        let outcome = AssertUnwindSafe(conn.cancel().invoke())
            .catch_unwind()
            .await;

        assert!(outcome.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn uncancelable_ignores_everything() {
        let conn = Connection::<String>::uncancelable();
        let counter = Arc::new(AtomicUsize::new(0));
        conn.push(counting(&counter)).await.unwrap();
        conn.cancel().invoke().await.unwrap();

        assert!(!conn.is_canceled());
        assert!(!conn.is_cancelable());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn try_reactivate_only_after_cancel() {
        let conn = Connection::<String>::new();
        assert!(!conn.try_reactivate());

        conn.cancel().invoke().await.unwrap();
        assert!(conn.try_reactivate());
        assert!(conn.is_not_canceled());

        let counter = Arc::new(AtomicUsize::new(0));
        conn.push(counting(&counter)).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn push_pair_cancels_both_children() {
        let parent = Connection::<String>::new();
        let left = Connection::<String>::new();
        let right = Connection::<String>::new();
        parent.push_pair(&left, &right).await.unwrap();

        parent.cancel().invoke().await.unwrap();

        assert!(left.is_canceled());
        assert!(right.is_canceled());
    }

    #[tokio::test]
    async fn disarmed_token_is_not_run() {
        let conn = Connection::<String>::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let stacked = Stacked::install(conn.clone(), counting(&counter)).await.unwrap();
        stacked.disarm();

        conn.cancel().invoke().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn install_on_canceled_connection_fails_after_running() {
        let conn = Connection::<String>::new();
        conn.cancel().invoke().await.unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let result = Stacked::install(conn, counting(&counter)).await;

        assert!(matches!(result, Err(ref e) if e == "fiber was canceled"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn failure_of_another_error_type_is_logged_not_returned() {
        let conn = Connection::<String>::new();
        let disks = Connection::<DiskError>::from_registry(conn.registry.clone());
        let counter = Arc::new(AtomicUsize::new(0));
        conn.push(counting(&counter)).await.unwrap();
        disks
            .push(CancelToken::new(|| async { Err(DiskError("unmount failed")) }))
            .await
            .unwrap();

        assert_eq!(conn.cancel().invoke().await, Ok(()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(logs_contain("foreign error type"));
        assert!(logs_contain("unmount failed"));
    }
}
