//! Cancel tokens: deferred cancellation work.

use std::fmt;
use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};

use futures::FutureExt;

use crate::effect::boxed::BoxFuture;
use crate::effect::constructors::from_async;
use crate::effect::trait_def::Effect;
use crate::fx::error::Failure;
use crate::semigroup::Semigroup;

/// A type-erased token as stored on a connection.
pub(crate) type ErasedToken = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), Failure>> + Send>;

/// How to cancel a running computation.
///
/// A token does nothing until invoked, and can be invoked at most once.
/// Invoking it is expected to be idempotent with respect to the thing being
/// canceled, but that is a convention of the code building the token.
///
/// ```rust
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use undertow::fx::CancelToken;
///
/// # tokio_test::block_on(async {
/// let flag = Arc::new(AtomicBool::new(false));
/// let seen = flag.clone();
/// let token = CancelToken::<String>::new(move || async move {
///     seen.store(true, Ordering::SeqCst);
///     Ok(())
/// });
///
/// assert!(!flag.load(Ordering::SeqCst));
/// token.invoke().await.unwrap();
/// assert!(flag.load(Ordering::SeqCst));
/// # });
/// ```
pub struct CancelToken<E> {
    thunk: Box<dyn FnOnce() -> BoxFuture<'static, Result<(), E>> + Send>,
}

impl<E> fmt::Debug for CancelToken<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("thunk", &"<function>")
            .finish()
    }
}

impl<E: Send + 'static> CancelToken<E> {
    /// Token running the future built by `f`.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        CancelToken {
            thunk: Box::new(move || Box::pin(f())),
        }
    }

    /// Token that does nothing.
    pub fn noop() -> Self {
        CancelToken::new(|| async { Ok(()) })
    }

    /// Token running `effect` against `env`.
    pub fn from_effect<Eff>(effect: Eff, env: Eff::Env) -> Self
    where
        Eff: Effect<Output = (), Error = E> + 'static,
        Eff::Env: 'static,
    {
        CancelToken::new(move || async move { effect.run(&env).await })
    }

    /// Token running `self` and then `other`.
    ///
    /// `other` runs even if `self` fails or panics. Failures are composed
    /// with `self`'s first.
    pub fn and(self, other: CancelToken<E>) -> Self
    where
        E: Semigroup,
    {
        CancelToken::new(move || async move {
            let first = AssertUnwindSafe(self.invoke()).catch_unwind().await;
            let second = other.invoke().await;
            match (first, second) {
                (Err(panic), _) => resume_unwind(panic),
                (Ok(Ok(())), second) => second,
                (Ok(Err(error)), Ok(())) => Err(error),
                (Ok(Err(error)), Err(more)) => Err(error.combine(more)),
            }
        })
    }

    /// Run the cancellation.
    pub async fn invoke(self) -> Result<(), E> {
        (self.thunk)().await
    }

    /// Use the token as a step in an effect chain.
    pub fn into_effect<Env>(self) -> impl Effect<Output = (), Error = E, Env = Env>
    where
        Env: Clone + Send + Sync,
    {
        from_async(move |_: &Env| self.invoke())
    }

    pub(crate) fn erase(self) -> ErasedToken
    where
        E: fmt::Debug,
    {
        Box::new(move || Box::pin(async move { self.invoke().await.map_err(Failure::new) }))
    }

    pub(crate) fn from_erased(token: ErasedToken) -> Self {
        CancelToken::new(move || async move {
            match token().await {
                Ok(()) => Ok(()),
                Err(failure) => failure.into_error::<E>().map_or(Ok(()), Err),
            }
        })
    }
}
