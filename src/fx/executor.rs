//! Executors and the per-fiber runtime context.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::effect::boxed::BoxFuture;
use crate::fx::connection::Registry;

/// Somewhere to run a task, possibly on another thread, later.
///
/// The runtime only ever submits detached tasks and never waits on a
/// handle, so any spawner fits.
pub trait Executor: Send + Sync + 'static {
    /// Start running `task`. Must not block on it.
    fn submit(&self, task: BoxFuture<'static, ()>);
}

/// Spawns on the tokio runtime that is current when the task is submitted.
///
/// Submitting outside a tokio runtime panics, as `tokio::spawn` does.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ambient;

impl Executor for Ambient {
    fn submit(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }
}

impl Executor for tokio::runtime::Handle {
    fn submit(&self, task: BoxFuture<'static, ()>) {
        self.spawn(task);
    }
}

impl<X: Executor + ?Sized> Executor for Arc<X> {
    fn submit(&self, task: BoxFuture<'static, ()>) {
        (**self).submit(task);
    }
}

tokio::task_local! {
    static FIBER: FiberContext;
}

/// What a running fiber needs to know about itself.
#[derive(Clone)]
pub(crate) struct FiberContext {
    pub(crate) registry: Arc<Registry>,
    pub(crate) executor: Arc<dyn Executor>,
}

impl fmt::Debug for FiberContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberContext")
            .field("registry", &self.registry)
            .field("executor", &"<executor>")
            .finish()
    }
}

impl FiberContext {
    /// Context of the fiber being polled, or a detached one outside fibers.
    pub(crate) fn current() -> FiberContext {
        FIBER
            .try_with(FiberContext::clone)
            .unwrap_or_else(|_| FiberContext::detached())
    }

    /// Uncancelable context on the ambient tokio runtime.
    pub(crate) fn detached() -> FiberContext {
        FiberContext {
            registry: Registry::uncancelable(),
            executor: Arc::new(Ambient),
        }
    }

    pub(crate) fn scope<F: Future>(self, fut: F) -> impl Future<Output = F::Output> {
        FIBER.scope(self, fut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn outside_fibers_context_is_uncancelable() {
        let context = FiberContext::current();
        assert!(!context.registry.is_cancelable());
    }

    #[tokio::test]
    async fn scope_is_visible_inside() {
        let registry = Registry::new();
        let context = FiberContext {
            registry: registry.clone(),
            executor: Arc::new(Ambient),
        };
        let seen = context
            .scope(async { FiberContext::current().registry })
            .await;
        assert!(Arc::ptr_eq(&seen, &registry));
    }

    #[tokio::test]
    async fn handle_executor_runs_task() {
        let (tx, rx) = oneshot::channel();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        tokio::runtime::Handle::current().submit(Box::pin(async move {
            seen.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        }));
        rx.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
