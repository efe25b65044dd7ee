//! The `Effect` trait - a description of work that runs when asked to.
//!
//! An effect is inert until [`Effect::run`] is called with an environment.
//! Nothing in this module schedules, forks or cancels; that is the job of
//! the [`fx`](crate::fx) runtime, which is written purely in terms of this
//! trait.

use std::future::Future;

/// A lazily evaluated computation that needs an `Env` and either produces
/// an `Output` or fails with an `Error`.
///
/// Combinators return concrete types, so a chain such as
/// `pure(1).map(f).and_then(g)` is a single nested value with no boxing.
/// Call [`EffectExt::boxed`](crate::effect::EffectExt::boxed) when a uniform
/// type is needed.
///
/// # Example
///
/// ```rust
/// use undertow::effect::prelude::*;
///
/// # tokio_test::block_on(async {
/// let effect = pure::<_, String, ()>(20).map(|n| n + 1).and_then(|n| pure(n * 2));
/// assert_eq!(effect.run(&()).await, Ok(42));
/// # });
/// ```
pub trait Effect: Sized + Send {
    /// Value produced on success.
    type Output: Send;

    /// Value produced on failure.
    type Error: Send;

    /// Dependencies the effect reads while running.
    ///
    /// `Clone` because spawning and boxing move an owned copy into a
    /// `'static` future.
    type Env: Clone + Send + Sync;

    /// Run the effect against `env`.
    fn run(self, env: &Self::Env)
        -> impl Future<Output = Result<Self::Output, Self::Error>> + Send;
}
