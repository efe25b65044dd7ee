//! Fibers: effects running on their own, with a handle to join or cancel.

use std::fmt;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;

use crate::effect::constructors::from_async;
use crate::effect::trait_def::Effect;
use crate::fx::connection::Connection;
use crate::fx::error::{Canceled, FxError, Panic};
use crate::fx::executor::{Executor, FiberContext};
use crate::fx::promise::Promise;
use crate::fx::token::CancelToken;

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

enum Outcome<T, E> {
    Finished(Result<T, E>),
    Panicked(Panic),
}

struct FiberCell<T, E> {
    outcome: Mutex<Option<Outcome<T, E>>>,
    done: Promise<()>,
}

impl<T, E> FiberCell<T, E> {
    fn settle(&self, outcome: Outcome<T, E>) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        drop(slot);
        self.done.complete(());
    }
}

/// Settles the fiber as canceled if its task is dropped before finishing.
struct SettleOnDrop<T, E: From<Canceled>> {
    cell: Option<Arc<FiberCell<T, E>>>,
}

impl<T, E: From<Canceled>> SettleOnDrop<T, E> {
    fn settle(mut self, outcome: Outcome<T, E>) {
        if let Some(cell) = self.cell.take() {
            cell.settle(outcome);
        }
    }
}

impl<T, E: From<Canceled>> Drop for SettleOnDrop<T, E> {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            cell.settle(Outcome::Finished(Err(Canceled.into())));
        }
    }
}

/// Handle to an effect running on its own.
///
/// Dropping a `Fiber` does not stop it. Use [`Fiber::cancel`] for that, or
/// [`Fiber::join`] to wait for its result.
pub struct Fiber<T, E> {
    id: u64,
    cell: Arc<FiberCell<T, E>>,
    connection: Connection<E>,
}

impl<T, E> fmt::Debug for Fiber<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("done", &self.cell.done.is_completed())
            .field("connection", &self.connection)
            .finish()
    }
}

impl<T, E> Fiber<T, E>
where
    T: Send + 'static,
    E: FxError,
{
    /// Start `effect` on `executor` right away.
    pub(crate) fn start<Eff>(effect: Eff, env: Eff::Env, executor: Arc<dyn Executor>) -> Self
    where
        Eff: Effect<Output = T, Error = E> + 'static,
        Eff::Env: 'static,
    {
        let id = NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed);
        let connection = Connection::<E>::new();
        let cell = Arc::new(FiberCell {
            outcome: Mutex::new(None),
            done: Promise::new(),
        });

        let registry = connection.registry.clone();
        let context = FiberContext {
            registry: registry.clone(),
            executor: executor.clone(),
        };
        let settle = SettleOnDrop {
            cell: Some(cell.clone()),
        };
        let task = async move {
            tracing::debug!(fiber = id, "fiber started");
            let outcome = tokio::select! {
                biased;
                () = registry.canceled() => {
                    tracing::debug!(fiber = id, "fiber canceled");
                    Outcome::Finished(Err(Canceled.into()))
                }
                result = AssertUnwindSafe(effect.run(&env)).catch_unwind() => match result {
                    Ok(result) => {
                        tracing::debug!(fiber = id, ok = result.is_ok(), "fiber completed");
                        Outcome::Finished(result)
                    }
                    Err(panic) => {
                        tracing::debug!(fiber = id, "fiber panicked");
                        Outcome::Panicked(panic)
                    }
                },
            };
            settle.settle(outcome);
        };
        executor.submit(Box::pin(context.scope(task)));

        Fiber {
            id,
            cell,
            connection,
        }
    }

    /// Wait for the result.
    ///
    /// Works just as well after the fiber has finished. A canceled fiber
    /// yields `Canceled` converted into `E`; a panic inside the fiber is
    /// resumed in the joiner.
    pub fn join<Env>(self) -> impl Effect<Output = T, Error = E, Env = Env>
    where
        Env: Clone + Send + Sync,
    {
        from_async(move |_: &Env| self.outcome())
    }

    /// Cancel the fiber and wait for its cleanup.
    pub fn cancel<Env>(&self) -> impl Effect<Output = (), Error = E, Env = Env>
    where
        Env: Clone + Send + Sync,
    {
        self.cancel_token().into_effect()
    }

    /// Token that cancels the fiber.
    ///
    /// Completes once the fiber's connection is drained, its uncancelable
    /// regions are finished and the fiber itself has stopped.
    ///
    /// As with [`Connection::cancel`], a failing token stacked with a
    /// different error type is only logged and does not fail this token.
    pub fn cancel_token(&self) -> CancelToken<E> {
        let cancel = self.connection.cancel();
        let cell = self.cell.clone();
        CancelToken::new(move || async move {
            let drained = cancel.invoke().await;
            cell.done.get().await;
            drained
        })
    }

    /// Whether the fiber has finished, in any way.
    pub fn is_done(&self) -> bool {
        self.cell.done.is_completed()
    }

    /// The connection the fiber runs under.
    pub fn connection(&self) -> &Connection<E> {
        &self.connection
    }

    pub(crate) async fn finished(&self) {
        self.cell.done.get().await;
    }

    pub(crate) async fn outcome(self) -> Result<T, E> {
        self.finished().await;
        self.try_outcome().unwrap_or_else(|panic| resume_unwind(panic))
    }

    /// Take the outcome of a finished fiber, handing back a panic payload
    /// instead of resuming it.
    pub(crate) fn try_outcome(self) -> Result<Result<T, E>, Panic> {
        let outcome = self.cell.outcome.lock().take();
        match outcome {
            Some(Outcome::Finished(result)) => Ok(result),
            Some(Outcome::Panicked(panic)) => Err(panic),
            None => Ok(Err(Canceled.into())),
        }
    }
}

/// Start `effect` on `executor` and return its fiber without waiting.
///
/// ```rust
/// use undertow::effect::prelude::*;
/// use undertow::fx::Ambient;
///
/// # tokio_test::block_on(async {
/// let program = spawn(pure::<_, String, ()>(21).map(|n| n * 2), Ambient)
///     .and_then(|fiber| fiber.join());
/// assert_eq!(program.run(&()).await, Ok(42));
/// # });
/// ```
pub fn spawn<Eff, X>(
    effect: Eff,
    executor: X,
) -> impl Effect<Output = Fiber<Eff::Output, Eff::Error>, Error = Eff::Error, Env = Eff::Env>
where
    Eff: Effect + 'static,
    Eff::Output: 'static,
    Eff::Error: FxError,
    Eff::Env: 'static,
    X: Executor,
{
    from_async(move |env: &Eff::Env| {
        let fiber = Fiber::start(effect, env.clone(), Arc::new(executor));
        async move { Ok(fiber) }
    })
}

/// [`spawn`] on the executor of the current fiber.
pub fn fork<Eff>(
    effect: Eff,
) -> impl Effect<Output = Fiber<Eff::Output, Eff::Error>, Error = Eff::Error, Env = Eff::Env>
where
    Eff: Effect + 'static,
    Eff::Output: 'static,
    Eff::Error: FxError,
    Eff::Env: 'static,
{
    from_async(move |env: &Eff::Env| {
        let executor = FiberContext::current().executor;
        let fiber = Fiber::start(effect, env.clone(), executor);
        async move { Ok(fiber) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::constructors::{fail, pure};
    use crate::effect::ext::EffectExt;
    use crate::fx::executor::Ambient;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    fn slow(ms: u64, value: i32) -> impl Effect<Output = i32, Error = String, Env = ()> {
        from_async(move |_: &()| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(value)
        })
    }

    #[tokio::test]
    async fn join_returns_result() {
        let fiber = Fiber::start(slow(5, 3), (), Arc::new(Ambient));
        assert_eq!(fiber.join().run(&()).await, Ok(3));
    }

    #[tokio::test]
    async fn join_after_completion() {
        let fiber = Fiber::start(pure::<_, String, ()>(9), (), Arc::new(Ambient));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(fiber.is_done());
        assert_eq!(fiber.join().run(&()).await, Ok(9));
    }

    #[tokio::test]
    async fn join_propagates_failure() {
        let fiber = Fiber::start(fail::<i32, _, ()>("bad".to_string()), (), Arc::new(Ambient));
        assert_eq!(fiber.join().run(&()).await, Err("bad".to_string()));
    }

    #[tokio::test]
    async fn canceled_fiber_joins_as_canceled() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let effect = slow(200, 1).map(move |v| {
            flag.store(true, Ordering::SeqCst);
            v
        });
        let fiber = Fiber::start(effect, (), Arc::new(Ambient));

        tokio::time::sleep(Duration::from_millis(5)).await;
        fiber.cancel().run(&()).await.unwrap();

        assert!(fiber.is_done());
        assert_eq!(fiber.join().run(&()).await, Err("fiber was canceled".to_string()));
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_waits_for_pushed_finalizers() {
        let released = Arc::new(AtomicUsize::new(0));
        let seen = released.clone();
        let effect = from_async(move |_: &()| async move {
            let token = CancelToken::new(move || async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Connection::<String>::current().push(token).await?;
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, String>(())
        });
        let fiber = Fiber::start(effect, (), Arc::new(Ambient));

        tokio::time::sleep(Duration::from_millis(10)).await;
        fiber.cancel().run(&()).await.unwrap();

        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panic_is_resumed_in_joiner() {
        let effect = from_async(|_: &()| async {
            if true {
                panic!("fiber blew up");
            }
            Ok::<i32, String>(0)
        });
        let fiber = Fiber::start(effect, (), Arc::new(Ambient));

        let joined = AssertUnwindSafe(fiber.join().run(&())).catch_unwind().await;
        assert!(joined.is_err());
    }

    #[tokio::test]
    async fn fork_outside_fiber_uses_ambient_runtime() {
        let program = fork(slow(5, 4)).and_then(|fiber| fiber.join());
        assert_eq!(program.run(&()).await, Ok(4));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawn_on_handle() {
        let handle = tokio::runtime::Handle::current();
        let program = spawn(slow(5, 8), handle).and_then(|fiber| fiber.join());
        assert_eq!(program.run(&()).await, Ok(8));
    }
}
