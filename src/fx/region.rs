//! Uncancelable regions.
//!
//! Cancellation drops a fiber's future at its next `.await`. Work that must
//! not be cut short is therefore moved into a task of its own, which the
//! fiber merely waits on. The owning connection counts such tasks and its
//! `cancel` does not complete until they are done.

use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::oneshot;

use crate::effect::trait_def::Effect;
use crate::fx::connection::{RegionGuard, Registry};
use crate::fx::error::Canceled;
use crate::fx::executor::{Executor, FiberContext};

/// Run `fut` as a separate task on `executor`, holding `guard` until it ends.
///
/// The task sees an uncancelable connection. A panic inside is resumed
/// here; a task dropped by its executor yields [`Canceled`].
pub(crate) async fn detach<T, F>(
    executor: &Arc<dyn Executor>,
    guard: RegionGuard,
    fut: F,
) -> Result<T, Canceled>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let context = FiberContext {
        registry: Registry::uncancelable(),
        executor: executor.clone(),
    };
    let task = context.scope(async move {
        let outcome = AssertUnwindSafe(fut).catch_unwind().await;
        let _ = tx.send(outcome);
        drop(guard);
    });
    executor.submit(Box::pin(task));

    match rx.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(panic)) => resume_unwind(panic),
        Err(_) => Err(Canceled),
    }
}

/// Run `fut` so that canceling the current fiber cannot interrupt it.
///
/// Outside a cancelable fiber this is just `fut.await`.
pub(crate) async fn uncancelable_region<T, E, F>(fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<Canceled> + Send + 'static,
{
    let context = FiberContext::current();
    if !context.registry.is_cancelable() {
        return fut.await;
    }
    let guard = context.registry.enter_region();
    detach(&context.executor, guard, fut)
        .await
        .unwrap_or_else(|canceled| Err(canceled.into()))
}

/// Effect returned by [`uncancelable`].
pub struct Uncancelable<Eff> {
    inner: Eff,
}

impl<Eff> std::fmt::Debug for Uncancelable<Eff> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uncancelable")
            .field("inner", &"<effect>")
            .finish()
    }
}

impl<Eff> Effect for Uncancelable<Eff>
where
    Eff: Effect + 'static,
    Eff::Output: 'static,
    Eff::Error: From<Canceled> + 'static,
    Eff::Env: 'static,
{
    type Output = Eff::Output;
    type Error = Eff::Error;
    type Env = Eff::Env;

    async fn run(self, env: &Self::Env) -> Result<Self::Output, Self::Error> {
        let inner = self.inner;
        let env = env.clone();
        uncancelable_region(async move { inner.run(&env).await }).await
    }
}

/// Run `effect` so that cancellation cannot interrupt it.
///
/// If the fiber is canceled meanwhile, `effect` still runs to completion and
/// the cancel waits for it; the fiber then ends as canceled.
pub fn uncancelable<Eff>(effect: Eff) -> Uncancelable<Eff>
where
    Eff: Effect + 'static,
{
    Uncancelable { inner: effect }
}
