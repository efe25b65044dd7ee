//! Method syntax for the concurrency combinators.
//!
//! Every method forwards to the free function of the same name, so
//! `effect.timeout(d)` and `timeout(effect, d)` are interchangeable.

use std::sync::Arc;
use std::time::Duration;

use crate::effect::constructors::from_async;
use crate::effect::trait_def::Effect;
use crate::fx::bracket;
use crate::fx::connection::{Connection, Stacked};
use crate::fx::error::FxError;
use crate::fx::executor::Executor;
use crate::fx::exit_case::ExitCase;
use crate::fx::fiber::{self, Fiber};
use crate::fx::par::par_map2;
use crate::fx::race::{self, Race2, RacePair};
use crate::fx::region::{self, Uncancelable};
use crate::fx::timer;

/// Run `effect` on `executor` and continue with its result.
///
/// Canceling the caller while it waits cancels the shifted work.
///
/// ```rust
/// use undertow::effect::prelude::*;
///
/// # tokio_test::block_on(async {
/// let handle = tokio::runtime::Handle::current();
/// let effect = evaluate_on(pure::<_, String, ()>(3).map(|n| n + 1), handle);
/// assert_eq!(effect.run(&()).await, Ok(4));
/// # });
/// ```
pub fn evaluate_on<Eff, X>(
    effect: Eff,
    executor: X,
) -> impl Effect<Output = Eff::Output, Error = Eff::Error, Env = Eff::Env>
where
    Eff: Effect + 'static,
    Eff::Output: 'static,
    Eff::Error: FxError,
    Eff::Env: 'static,
    X: Executor,
{
    from_async(move |env: &Eff::Env| {
        let fiber = Fiber::start(effect, env.clone(), Arc::new(executor));
        async move {
            let stacked = Stacked::install(Connection::current(), fiber.cancel_token()).await?;
            let outcome = fiber.outcome().await;
            stacked.disarm();
            outcome
        }
    })
}

/// Concurrency combinators as methods on every [`Effect`].
pub trait ConcurrentExt: Effect {
    /// Start on the current fiber's executor. See [`fork`](crate::fx::fork).
    fn fork(self) -> impl Effect<Output = Fiber<Self::Output, Self::Error>, Error = Self::Error, Env = Self::Env>
    where
        Self: 'static,
        Self::Output: 'static,
        Self::Error: FxError,
        Self::Env: 'static,
    {
        fiber::fork(self)
    }

    /// Start on `executor`. See [`spawn`](crate::fx::spawn).
    fn fork_on<X>(
        self,
        executor: X,
    ) -> impl Effect<Output = Fiber<Self::Output, Self::Error>, Error = Self::Error, Env = Self::Env>
    where
        Self: 'static,
        Self::Output: 'static,
        Self::Error: FxError,
        Self::Env: 'static,
        X: Executor,
    {
        fiber::spawn(self, executor)
    }

    /// Run on `executor` and resume with the result. See [`evaluate_on`].
    fn evaluate_on<X>(self, executor: X) -> impl Effect<Output = Self::Output, Error = Self::Error, Env = Self::Env>
    where
        Self: 'static,
        Self::Output: 'static,
        Self::Error: FxError,
        Self::Env: 'static,
        X: Executor,
    {
        evaluate_on(self, executor)
    }

    /// See [`guarantee`](crate::fx::guarantee).
    fn guarantee<Fin>(self, finalizer: Fin) -> impl Effect<Output = Self::Output, Error = Self::Error, Env = Self::Env>
    where
        Self::Error: FxError + Clone,
        Self::Env: 'static,
        Fin: Effect<Output = (), Error = Self::Error, Env = Self::Env> + 'static,
    {
        bracket::guarantee(self, finalizer)
    }

    /// See [`guarantee_case`](crate::fx::guarantee_case).
    fn guarantee_case<F, Fin>(
        self,
        finalizer: F,
    ) -> impl Effect<Output = Self::Output, Error = Self::Error, Env = Self::Env>
    where
        Self::Error: FxError + Clone,
        Self::Env: 'static,
        F: FnOnce(ExitCase<Self::Error>) -> Fin + Send + 'static,
        Fin: Effect<Output = (), Error = Self::Error, Env = Self::Env> + 'static,
    {
        bracket::guarantee_case(self, finalizer)
    }

    /// See [`on_cancel`](crate::fx::on_cancel).
    fn on_cancel<Fin>(self, finalizer: Fin) -> impl Effect<Output = Self::Output, Error = Self::Error, Env = Self::Env>
    where
        Self::Error: FxError + Clone,
        Self::Env: 'static,
        Fin: Effect<Output = (), Error = Self::Error, Env = Self::Env> + 'static,
    {
        bracket::on_cancel(self, finalizer)
    }

    /// See [`uncancelable`](crate::fx::uncancelable).
    fn uncancelable(self) -> Uncancelable<Self>
    where
        Self: 'static,
    {
        region::uncancelable(self)
    }

    /// See [`race2`](crate::fx::race2).
    fn race_with<Other>(
        self,
        other: Other,
    ) -> impl Effect<Output = Race2<Self::Output, Other::Output>, Error = Self::Error, Env = Self::Env>
    where
        Self: 'static,
        Self::Output: 'static,
        Self::Error: FxError,
        Self::Env: 'static,
        Other: Effect<Error = Self::Error, Env = Self::Env> + 'static,
        Other::Output: 'static,
    {
        race::race2(self, other)
    }

    /// See [`race_pair`](crate::fx::race_pair).
    fn race_pair_with<Other>(
        self,
        other: Other,
    ) -> impl Effect<Output = RacePair<Self::Output, Other::Output, Self::Error>, Error = Self::Error, Env = Self::Env>
    where
        Self: 'static,
        Self::Output: 'static,
        Self::Error: FxError,
        Self::Env: 'static,
        Other: Effect<Error = Self::Error, Env = Self::Env> + 'static,
        Other::Output: 'static,
    {
        race::race_pair(self, other)
    }

    /// Run alongside `other` and pair up both values. See
    /// [`par_map2`](crate::fx::par_map2).
    fn par_zip<Other>(
        self,
        other: Other,
    ) -> impl Effect<Output = (Self::Output, Other::Output), Error = Self::Error, Env = Self::Env>
    where
        Self: 'static,
        Self::Output: 'static,
        Self::Error: FxError,
        Self::Env: 'static,
        Other: Effect<Error = Self::Error, Env = Self::Env> + 'static,
        Other::Output: 'static,
    {
        par_map2(self, other, |a, b| (a, b))
    }

    /// See [`timeout`](crate::fx::timeout).
    fn timeout(self, duration: Duration) -> impl Effect<Output = Option<Self::Output>, Error = Self::Error, Env = Self::Env>
    where
        Self: 'static,
        Self::Output: 'static,
        Self::Error: FxError,
        Self::Env: 'static,
    {
        timer::timeout(self, duration)
    }
}

impl<Eff: Effect> ConcurrentExt for Eff {}
