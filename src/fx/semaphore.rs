//! Counting semaphore whose waits can be canceled.
//!
//! Permits live in a [`tokio::sync::Semaphore`]. Acquired permits are
//! forgotten, so they come back only through [`Semaphore::release_n`] or
//! when a [`Semaphore::with_permit`] bracket ends. A canceled acquirer is
//! dropped from the wait queue and any permits already assigned to it are
//! handed back.
//!
//! ```rust
//! use undertow::effect::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let semaphore = Semaphore::new(2);
//! let effect = semaphore.with_permit(pure::<_, String, ()>(1));
//!
//! assert_eq!(effect.run(&()).await, Ok(1));
//! assert_eq!(semaphore.available(), 2);
//! # });
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore as Permits};

use crate::effect::constructors::{from_async, from_fn, pure};
use crate::effect::ext::EffectExt;
use crate::effect::trait_def::Effect;
use crate::fx::bracket::bracket;
use crate::fx::error::{Canceled, FxError};
use crate::fx::region::uncancelable_region;

/// A counting semaphore for use inside effects.
///
/// Cheap to clone; clones share the same permits.
#[derive(Debug, Clone)]
pub struct Semaphore {
    permits: Arc<Permits>,
    waiting: Arc<AtomicUsize>,
    cancelable: bool,
}

/// Counts the permits requested by parked acquirers while alive.
struct Waiting {
    waiting: Arc<AtomicUsize>,
    n: usize,
}

impl Waiting {
    fn enter(waiting: &Arc<AtomicUsize>, n: u32) -> Self {
        let n = n as usize;
        waiting.fetch_add(n, Ordering::SeqCst);
        Waiting {
            waiting: waiting.clone(),
            n,
        }
    }
}

impl Drop for Waiting {
    fn drop(&mut self) {
        self.waiting.fetch_sub(self.n, Ordering::SeqCst);
    }
}

async fn acquire_owned(
    permits: Arc<Permits>,
    waiting: Arc<AtomicUsize>,
    n: u32,
) -> Result<OwnedSemaphorePermit, Canceled> {
    if let Ok(permit) = permits.clone().try_acquire_many_owned(n) {
        return Ok(permit);
    }
    let _parked = Waiting::enter(&waiting, n);
    tracing::trace!(permits = n, "waiting for semaphore permits");
    permits.acquire_many_owned(n).await.map_err(|_| Canceled)
}

impl Semaphore {
    /// A semaphore holding `permits` permits.
    ///
    /// Canceling a fiber that waits in [`acquire_n`](Semaphore::acquire_n)
    /// abandons the wait.
    pub fn new(permits: usize) -> Self {
        Semaphore {
            permits: Arc::new(Permits::new(permits)),
            waiting: Arc::new(AtomicUsize::new(0)),
            cancelable: true,
        }
    }

    /// A semaphore whose [`acquire_n`](Semaphore::acquire_n) cannot be
    /// interrupted. A cancel arriving during the wait completes only after
    /// the permits were acquired.
    pub fn uncancelable(permits: usize) -> Self {
        Semaphore {
            cancelable: false,
            ..Semaphore::new(permits)
        }
    }

    /// Permits that can be acquired right now. Never negative.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Available permits minus the permits requested by waiting acquirers.
    ///
    /// Negative while acquirers are parked. A waiter that has been handed
    /// part of its request still counts with its whole request.
    pub fn count(&self) -> i64 {
        let available = self.available() as i64;
        let waiting = self.waiting.load(Ordering::SeqCst) as i64;
        available - waiting
    }

    /// Take `n` permits, waiting until they are available.
    pub fn acquire_n<E, Env>(&self, n: u32) -> impl Effect<Output = (), Error = E, Env = Env>
    where
        E: FxError,
        Env: Clone + Send + Sync,
    {
        let permits = self.permits.clone();
        let waiting = self.waiting.clone();
        let cancelable = self.cancelable;
        from_async(move |_: &Env| async move {
            let acquire = async move {
                acquire_owned(permits, waiting, n)
                    .await
                    .map(OwnedSemaphorePermit::forget)
                    .map_err(E::from)
            };
            if cancelable {
                acquire.await
            } else {
                uncancelable_region(acquire).await
            }
        })
    }

    /// Take one permit.
    pub fn acquire<E, Env>(&self) -> impl Effect<Output = (), Error = E, Env = Env>
    where
        E: FxError,
        Env: Clone + Send + Sync,
    {
        self.acquire_n(1)
    }

    /// Take `n` permits if they are available now.
    pub fn try_acquire_n<E, Env>(&self, n: u32) -> impl Effect<Output = bool, Error = E, Env = Env>
    where
        E: Send,
        Env: Clone + Send + Sync,
    {
        let permits = self.permits.clone();
        from_fn(move |_: &Env| match permits.try_acquire_many(n) {
            Ok(permit) => {
                permit.forget();
                Ok(true)
            }
            Err(_) => Ok(false),
        })
    }

    /// Take one permit if it is available now.
    pub fn try_acquire<E, Env>(&self) -> impl Effect<Output = bool, Error = E, Env = Env>
    where
        E: Send,
        Env: Clone + Send + Sync,
    {
        self.try_acquire_n(1)
    }

    /// Give back `n` permits, waking waiters in the order they arrived.
    pub fn release_n<E, Env>(&self, n: u32) -> impl Effect<Output = (), Error = E, Env = Env>
    where
        E: Send,
        Env: Clone + Send + Sync,
    {
        let permits = self.permits.clone();
        from_fn(move |_: &Env| {
            permits.add_permits(n as usize);
            Ok(())
        })
    }

    /// Give back one permit.
    pub fn release<E, Env>(&self) -> impl Effect<Output = (), Error = E, Env = Env>
    where
        E: Send,
        Env: Clone + Send + Sync,
    {
        self.release_n(1)
    }

    /// Run `effect` holding one permit.
    ///
    /// Waiting for the permit can be canceled. Once held, the permit is
    /// returned however `effect` ends.
    pub fn with_permit<Eff>(
        &self,
        effect: Eff,
    ) -> impl Effect<Output = Eff::Output, Error = Eff::Error, Env = Eff::Env>
    where
        Eff: Effect + 'static,
        Eff::Error: FxError + Clone,
        Eff::Env: 'static,
    {
        let permits = self.permits.clone();
        let waiting = self.waiting.clone();
        from_async(move |_: &Eff::Env| async move {
            acquire_owned(permits, waiting, 1)
                .await
                .map_err(<Eff::Error as From<Canceled>>::from)
        })
        .and_then(move |permit| {
            let held = Arc::new(Mutex::new(Some(permit)));
            bracket(
                pure::<_, Eff::Error, Eff::Env>(held),
                move |_| effect,
                |held| {
                    drop(held.lock().take());
                    pure(())
                },
            )
        })
    }
}
